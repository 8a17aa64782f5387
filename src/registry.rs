//! Schema Registry
//!
//! Name → definition lookup used to resolve nested schemas that refer to
//! each other by name. Registration is append-only: a name, once bound,
//! keeps its definition for the life of the registry.
//!
//! The process-wide registry is [`SchemaRegistry::global`]. Isolated
//! registries (for tests, or for independent schema families) are plain
//! values created with [`SchemaRegistry::new`].

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use once_cell::sync::Lazy;
use parking_lot::RwLock;

use crate::error::{Result, SchemaError};
use crate::schema::SchemaDef;

type Entries = RwLock<HashMap<String, Arc<SchemaDef>>>;

/// Shared handle to a set of named schema definitions
#[derive(Clone, Default)]
pub struct SchemaRegistry {
    entries: Arc<Entries>,
}

static GLOBAL_REGISTRY: Lazy<SchemaRegistry> = Lazy::new(SchemaRegistry::new);

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry
    pub fn global() -> SchemaRegistry {
        GLOBAL_REGISTRY.clone()
    }

    /// Bind `def` under its name.
    ///
    /// Registering a definition with the same fingerprint as the bound one
    /// returns the bound one; a different definition under a taken name is
    /// an error. Opaque definitions (see [`SchemaDef::is_opaque`]) only match
    /// the bound `Arc` itself. Check and insert happen under one write lock.
    pub fn register(&self, def: Arc<SchemaDef>) -> Result<Arc<SchemaDef>> {
        let mut entries = self.entries.write();
        if let Some(existing) = entries.get(def.name()) {
            let same = existing.fingerprint() == def.fingerprint()
                && (!def.is_opaque() || Arc::ptr_eq(existing, &def));
            if same {
                tracing::trace!(schema = %def.name(), "schema already registered");
                return Ok(existing.clone());
            }
            return Err(SchemaError::AlreadyExists {
                name: def.name().to_string(),
                existing: existing.fingerprint().short().to_string(),
                attempted: def.fingerprint().short().to_string(),
            });
        }
        tracing::debug!(
            schema = %def.name(),
            fields = def.fields().len(),
            fingerprint = %def.fingerprint().short(),
            "registered schema"
        );
        entries.insert(def.name().to_string(), def.clone());
        Ok(def)
    }

    pub fn get(&self, name: &str) -> Option<Arc<SchemaDef>> {
        self.entries.read().get(name).cloned()
    }

    /// Like [`get`](Self::get), but a missing name is an error
    pub fn resolve(&self, name: &str) -> Result<Arc<SchemaDef>> {
        self.get(name).ok_or_else(|| SchemaError::NotFound {
            name: name.to_string(),
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.read().contains_key(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.entries.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub(crate) fn downgrade(&self) -> WeakRegistry {
        WeakRegistry(Arc::downgrade(&self.entries))
    }
}

impl std::fmt::Debug for SchemaRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaRegistry")
            .field("schemas", &self.names())
            .finish()
    }
}

/// Non-owning registry handle kept by definitions.
///
/// Definitions live inside their registry, so holding a strong handle
/// would form a cycle.
#[derive(Clone)]
pub(crate) struct WeakRegistry(Weak<Entries>);

impl WeakRegistry {
    pub(crate) fn upgrade(&self) -> Option<SchemaRegistry> {
        self.0.upgrade().map(|entries| SchemaRegistry { entries })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::Field;

    fn user(registry: &SchemaRegistry, with_email: bool) -> Arc<SchemaDef> {
        let mut builder = SchemaDef::builder("User")
            .registry(registry)
            .field(Field::string("name"));
        if with_email {
            builder = builder.field(Field::email("email"));
        }
        builder.build().unwrap()
    }

    #[test]
    fn test_register_and_resolve() {
        let registry = SchemaRegistry::new();
        let def = registry.register(user(&registry, false)).unwrap();
        assert!(registry.contains("User"));
        assert!(Arc::ptr_eq(&registry.resolve("User").unwrap(), &def));
        assert!(matches!(
            registry.resolve("Missing"),
            Err(SchemaError::NotFound { name }) if name == "Missing"
        ));
    }

    #[test]
    fn test_identical_registration_is_idempotent() {
        let registry = SchemaRegistry::new();
        let first = registry.register(user(&registry, false)).unwrap();
        let second = registry.register(user(&registry, false)).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_conflicting_registration_fails() {
        let registry = SchemaRegistry::new();
        registry.register(user(&registry, false)).unwrap();
        let err = registry.register(user(&registry, true)).unwrap_err();
        assert!(matches!(err, SchemaError::AlreadyExists { name, .. } if name == "User"));
    }

    #[test]
    fn test_registration_compares_values_and_validator_params() {
        let registry = SchemaRegistry::new();
        let age = |min: f64, missing: i64| {
            SchemaDef::builder("Age")
                .registry(&registry)
                .field(
                    Field::integer("age")
                        .validate(crate::validate::range(Some(min), None))
                        .missing(missing),
                )
                .build()
                .unwrap()
        };
        let first = registry.register(age(0.0, 1)).unwrap();
        assert!(Arc::ptr_eq(&first, &registry.register(age(0.0, 1)).unwrap()));
        assert!(matches!(
            registry.register(age(18.0, 1)),
            Err(SchemaError::AlreadyExists { .. })
        ));
        assert!(matches!(
            registry.register(age(0.0, 99)),
            Err(SchemaError::AlreadyExists { .. })
        ));
    }

    #[test]
    fn test_opaque_definitions_only_match_themselves() {
        let registry = SchemaRegistry::new();
        let hooked = || {
            SchemaDef::builder("Hooked")
                .registry(&registry)
                .field(Field::string("name"))
                .post_load(|data| data)
                .build()
                .unwrap()
        };
        let first = registry.register(hooked()).unwrap();
        assert!(Arc::ptr_eq(&first, &registry.register(first.clone()).unwrap()));
        assert!(matches!(
            registry.register(hooked()),
            Err(SchemaError::AlreadyExists { .. })
        ));
    }

    #[test]
    fn test_concurrent_first_registration_yields_one_definition() {
        let registry = SchemaRegistry::new();
        let winners: Vec<Arc<SchemaDef>> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| scope.spawn(|| registry.register(user(&registry, true)).unwrap()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert_eq!(registry.len(), 1);
        let bound = registry.resolve("User").unwrap();
        assert!(winners.iter().all(|def| Arc::ptr_eq(def, &bound)));
    }

    #[test]
    fn test_registries_are_isolated() {
        let a = SchemaRegistry::new();
        let b = SchemaRegistry::new();
        a.register(user(&a, false)).unwrap();
        assert!(!b.contains("User"));
        assert_eq!(a.names(), vec!["User".to_string()]);
    }

    #[test]
    fn test_weak_handle_does_not_keep_registry_alive() {
        let registry = SchemaRegistry::new();
        let weak = registry.downgrade();
        assert!(weak.upgrade().is_some());
        drop(registry);
        assert!(weak.upgrade().is_none());
    }
}
