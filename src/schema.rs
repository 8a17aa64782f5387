//! Schema definitions and instances
//!
//! A [`SchemaDef`] is built once per schema type: its fields, options and
//! hooks never change after [`SchemaBuilder::build`]. A [`Schema`] is a
//! cheap per-call view of a definition that may narrow the field set, flip
//! strict mode or carry a context map, without touching the definition.
//!
//! ```
//! use familiar_marshal::{Field, Native, Schema, SchemaDef, SchemaRegistry};
//! use serde_json::json;
//!
//! let registry = SchemaRegistry::new();
//! let def = SchemaDef::builder("User")
//!     .registry(&registry)
//!     .field(Field::string("name").required())
//!     .field(Field::integer("age"))
//!     .build()
//!     .unwrap();
//!
//! let schema = Schema::new(def);
//! let user = Native::map([("name", Native::from("Ada")), ("age", Native::from(36))]);
//! let dumped = schema.dump(&user).unwrap();
//! assert_eq!(dumped.data(), &json!({"name": "Ada", "age": 36}));
//!
//! let loaded = schema.load(&json!({"age": "x"})).unwrap();
//! assert!(loaded.errors().contains("name"));
//! assert!(loaded.errors().contains("age"));
//! ```

use std::fmt;
use std::sync::Arc;

use serde_json::{json, Map, Value};

use crate::dates::DateFormat;
use crate::error::{Result, SchemaError};
use crate::field::{Context, Field, FieldRegistry};
use crate::fingerprint::Fingerprint;
use crate::marshal::Marshaller;
use crate::options::{check_exclusive, SchemaOpts, UnknownPolicy};
use crate::registry::{SchemaRegistry, WeakRegistry};
use crate::result::{MarshalResult, Outcome, UnmarshalResult};
use crate::tree::ErrorTree;
use crate::unmarshal::{Partial, Unmarshaller};
use crate::value::{NativeMap, Source};

type MapHook = dyn Fn(Map<String, Value>) -> Map<String, Value> + Send + Sync;
type NativeHook = dyn Fn(NativeMap) -> NativeMap + Send + Sync;

/// Per-item transforms around the field walk
#[derive(Clone, Default)]
pub(crate) struct Hooks {
    pub(crate) pre_load: Option<Arc<MapHook>>,
    pub(crate) post_dump: Option<Arc<MapHook>>,
    pub(crate) post_load: Option<Arc<NativeHook>>,
}

/// An immutable schema definition: fields, options and hooks
pub struct SchemaDef {
    name: String,
    fields: FieldRegistry,
    opts: SchemaOpts,
    hooks: Hooks,
    fingerprint: Fingerprint,
    opaque: bool,
    registry: WeakRegistry,
}

impl SchemaDef {
    pub fn builder(name: impl Into<String>) -> SchemaBuilder {
        SchemaBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &FieldRegistry {
        &self.fields
    }

    pub fn opts(&self) -> &SchemaOpts {
        &self.opts
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    pub(crate) fn hooks(&self) -> &Hooks {
        &self.hooks
    }

    /// Whether the fingerprint leaves out caller closures (hooks, function
    /// fields, custom validators); such definitions only match themselves
    pub fn is_opaque(&self) -> bool {
        self.opaque
    }

    /// Registry used to resolve nested schema names
    pub(crate) fn registry(&self) -> Result<SchemaRegistry> {
        self.registry
            .upgrade()
            .ok_or_else(|| SchemaError::RegistryDropped(self.name.clone()))
    }

    /// Fields active for one call.
    ///
    /// The definition's own `only`/`exclude` apply first (`only` also fixes
    /// the order), then the call-scoped layer narrows further.
    pub(crate) fn select(
        &self,
        only: Option<&[String]>,
        exclude: &[String],
    ) -> Result<Vec<&Field>> {
        check_exclusive(only, exclude)?;
        self.check_names("only", only.unwrap_or(&[]))?;
        self.check_names("exclude", exclude)?;

        let base: Vec<&Field> = match &self.opts.only {
            Some(names) => names.iter().filter_map(|n| self.fields.get(n)).collect(),
            None => self.fields.iter().collect(),
        };
        Ok(base
            .into_iter()
            .filter(|f| !self.opts.exclude.iter().any(|e| e == f.name()))
            .filter(|f| only.map_or(true, |o| o.iter().any(|n| n == f.name())))
            .filter(|f| !exclude.iter().any(|e| e == f.name()))
            .collect())
    }

    fn check_names(&self, option: &'static str, names: &[String]) -> Result<()> {
        match names.iter().find(|n| !self.fields.contains(n)) {
            Some(name) => Err(SchemaError::UnknownFieldName {
                option,
                name: name.clone(),
            }),
            None => Ok(()),
        }
    }

    /// Structural description: name, fields, options and hook presence
    pub fn describe(&self) -> Result<Value> {
        describe(&self.name, &self.fields, &self.opts, &self.hooks)
    }
}

fn describe(
    name: &str,
    fields: &FieldRegistry,
    opts: &SchemaOpts,
    hooks: &Hooks,
) -> Result<Value> {
    Ok(json!({
        "name": name,
        "fields": fields.iter().map(Field::describe).collect::<Vec<_>>(),
        "options": serde_json::to_value(opts)?,
        "hooks": {
            "pre_load": hooks.pre_load.is_some(),
            "post_dump": hooks.post_dump.is_some(),
            "post_load": hooks.post_load.is_some(),
        },
    }))
}

impl fmt::Debug for SchemaDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaDef")
            .field("name", &self.name)
            .field("fields", &self.fields.names().collect::<Vec<_>>())
            .field("opts", &self.opts)
            .field("fingerprint", &self.fingerprint.short())
            .finish()
    }
}

/// Builder for [`SchemaDef`]
pub struct SchemaBuilder {
    name: String,
    fields: Vec<Field>,
    opts: SchemaOpts,
    hooks: Hooks,
    registry: Option<SchemaRegistry>,
}

impl SchemaBuilder {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            opts: SchemaOpts::default(),
            hooks: Hooks::default(),
            registry: None,
        }
    }

    pub fn field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    pub fn fields(mut self, fields: impl IntoIterator<Item = Field>) -> Self {
        self.fields.extend(fields);
        self
    }

    /// Replace all options at once
    pub fn options(mut self, opts: SchemaOpts) -> Self {
        self.opts = opts;
        self
    }

    pub fn only<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.opts = self.opts.only(names);
        self
    }

    pub fn exclude<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.opts = self.opts.exclude(names);
        self
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.opts = self.opts.strict(strict);
        self
    }

    pub fn ordered(mut self, ordered: bool) -> Self {
        self.opts = self.opts.ordered(ordered);
        self
    }

    pub fn dateformat(mut self, format: impl Into<DateFormat>) -> Self {
        self.opts = self.opts.dateformat(format);
        self
    }

    pub fn unknown(mut self, policy: UnknownPolicy) -> Self {
        self.opts = self.opts.unknown(policy);
        self
    }

    pub fn pre_load<F>(mut self, hook: F) -> Self
    where
        F: Fn(Map<String, Value>) -> Map<String, Value> + Send + Sync + 'static,
    {
        self.hooks.pre_load = Some(Arc::new(hook));
        self
    }

    pub fn post_dump<F>(mut self, hook: F) -> Self
    where
        F: Fn(Map<String, Value>) -> Map<String, Value> + Send + Sync + 'static,
    {
        self.hooks.post_dump = Some(Arc::new(hook));
        self
    }

    pub fn post_load<F>(mut self, hook: F) -> Self
    where
        F: Fn(NativeMap) -> NativeMap + Send + Sync + 'static,
    {
        self.hooks.post_load = Some(Arc::new(hook));
        self
    }

    /// Registry for nested name lookups and [`register`](Self::register);
    /// defaults to the global one
    pub fn registry(mut self, registry: &SchemaRegistry) -> Self {
        self.registry = Some(registry.clone());
        self
    }

    /// Validate and freeze the definition without registering it
    pub fn build(self) -> Result<Arc<SchemaDef>> {
        self.finish().map(|(def, _)| def)
    }

    /// Build, then bind the definition under its name in the registry
    pub fn register(self) -> Result<Arc<SchemaDef>> {
        let (def, registry) = self.finish()?;
        registry.register(def)
    }

    fn finish(self) -> Result<(Arc<SchemaDef>, SchemaRegistry)> {
        let mut fields = FieldRegistry::new();
        for field in self.fields {
            field.check()?;
            fields.register(field)?;
        }
        self.opts.validate()?;
        for (option, names) in [
            ("only", self.opts.only.as_deref().unwrap_or(&[])),
            ("exclude", self.opts.exclude.as_slice()),
        ] {
            if let Some(name) = names.iter().find(|n| !fields.contains(n)) {
                return Err(SchemaError::UnknownFieldName {
                    option,
                    name: name.clone(),
                });
            }
        }

        let description = describe(&self.name, &fields, &self.opts, &self.hooks)?;
        let fingerprint = Fingerprint::from_json(&description);
        let opaque = fields.iter().any(Field::is_opaque)
            || self.hooks.pre_load.is_some()
            || self.hooks.post_dump.is_some()
            || self.hooks.post_load.is_some();
        let registry = self.registry.unwrap_or_else(SchemaRegistry::global);
        let def = Arc::new(SchemaDef {
            name: self.name,
            fields,
            opts: self.opts,
            hooks: self.hooks,
            fingerprint,
            opaque,
            registry: registry.downgrade(),
        });
        Ok((def, registry))
    }
}

/// Arguments for [`Schema::load_with`]
#[derive(Debug, Clone, Default)]
pub struct LoadArgs {
    pub many: bool,
    pub partial: Partial,
}

impl LoadArgs {
    pub fn many(mut self, many: bool) -> Self {
        self.many = many;
        self
    }

    pub fn partial(mut self, partial: impl Into<Partial>) -> Self {
        self.partial = partial.into();
        self
    }
}

/// A definition plus call-scoped overrides; the unit callers dump and load with
#[derive(Clone)]
pub struct Schema {
    def: Arc<SchemaDef>,
    only: Option<Vec<String>>,
    exclude: Vec<String>,
    strict: Option<bool>,
    prefix: String,
    context: Context,
}

impl Schema {
    pub fn new(def: Arc<SchemaDef>) -> Self {
        Self {
            def,
            only: None,
            exclude: Vec::new(),
            strict: None,
            prefix: String::new(),
            context: Context::new(),
        }
    }

    /// Instance of a definition bound in the global registry
    pub fn named(name: &str) -> Result<Self> {
        SchemaRegistry::global().resolve(name).map(Self::new)
    }

    /// Narrow this instance to `names`
    pub fn only<I, S>(mut self, names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.only = Some(names.into_iter().map(Into::into).collect());
        self.check()?;
        Ok(self)
    }

    /// Drop `names` from this instance
    pub fn exclude<I, S>(mut self, names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude = names.into_iter().map(Into::into).collect();
        self.check()?;
        Ok(self)
    }

    /// Override the definition's strict flag
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = Some(strict);
        self
    }

    /// Prepend `prefix` to every dumped key and dump error key. Nested
    /// schemas keep their own keys.
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Values visible to function fields during dump
    pub fn context(mut self, context: Context) -> Self {
        self.context = context;
        self
    }

    pub fn definition(&self) -> &Arc<SchemaDef> {
        &self.def
    }

    pub fn is_strict(&self) -> bool {
        self.strict.unwrap_or(self.def.opts.strict)
    }

    fn check(&self) -> Result<()> {
        self.def.select(self.only.as_deref(), &self.exclude).map(|_| ())
    }

    fn marshaller(&self) -> Result<Marshaller<'_>> {
        let fields = self.def.select(self.only.as_deref(), &self.exclude)?;
        Ok(Marshaller::new(&self.def, fields, &self.context).prefix(&self.prefix))
    }

    fn unmarshaller(&self, partial: Partial, abort_on_unknown: bool) -> Result<Unmarshaller<'_>> {
        let fields = self.def.select(self.only.as_deref(), &self.exclude)?;
        Ok(Unmarshaller::new(&self.def, fields, partial).abort_on_unknown(abort_on_unknown))
    }

    /// Serialize one object
    pub fn dump(&self, obj: &dyn Source) -> Result<MarshalResult> {
        let (data, errors) = self.marshaller()?.serialize(obj)?;
        self.finish_dump(data, errors)
    }

    /// Serialize a collection; errors are keyed by element index
    pub fn dump_many<S: Source>(&self, objs: &[S]) -> Result<MarshalResult> {
        let items = objs.iter().map(|o| o as &dyn Source);
        let (data, errors) = self.marshaller()?.serialize_each(items)?;
        self.finish_dump(data, errors)
    }

    pub fn load(&self, data: &Value) -> Result<UnmarshalResult> {
        self.load_with(data, LoadArgs::default())
    }

    pub fn load_many(&self, data: &Value) -> Result<UnmarshalResult> {
        self.load_with(data, LoadArgs::default().many(true))
    }

    /// Deserialize with explicit `many` and `partial`
    pub fn load_with(&self, data: &Value, args: LoadArgs) -> Result<UnmarshalResult> {
        let strict = self.is_strict();
        let unmarshaller = self.unmarshaller(args.partial, strict)?;
        let (native, errors) = if args.many {
            unmarshaller.deserialize_many(data)?
        } else {
            unmarshaller.deserialize(data)?
        };
        tracing::debug!(
            schema = %self.def.name,
            many = args.many,
            errors = errors.len(),
            "load finished"
        );
        if strict && !errors.is_empty() {
            return Err(SchemaError::Unmarshalling { data: native, errors });
        }
        Ok(Outcome::new(native, errors))
    }

    /// Errors a load would report. Never fails on validation errors, even
    /// when strict.
    pub fn validate(&self, data: &Value) -> Result<ErrorTree> {
        let (_, errors) = self.unmarshaller(Partial::Off, false)?.deserialize(data)?;
        Ok(errors)
    }

    fn finish_dump(&self, data: Value, errors: ErrorTree) -> Result<MarshalResult> {
        tracing::debug!(schema = %self.def.name, errors = errors.len(), "dump finished");
        if self.is_strict() && !errors.is_empty() {
            return Err(SchemaError::Marshalling { data, errors });
        }
        Ok(Outcome::new(data, errors))
    }
}

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schema")
            .field("def", &self.def.name)
            .field("only", &self.only)
            .field("exclude", &self.exclude)
            .field("strict", &self.is_strict())
            .field("prefix", &self.prefix)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Native;
    use serde_json::json;

    fn person(registry: &SchemaRegistry) -> Arc<SchemaDef> {
        SchemaDef::builder("Person")
            .registry(registry)
            .field(Field::string("name").required())
            .field(Field::integer("age"))
            .field(Field::email("email"))
            .build()
            .unwrap()
    }

    #[test]
    fn test_builder_rejects_bad_options() {
        let registry = SchemaRegistry::new();
        let err = SchemaDef::builder("Bad")
            .registry(&registry)
            .field(Field::string("a"))
            .only(["a"])
            .exclude(["a"])
            .build()
            .unwrap_err();
        assert!(matches!(err, SchemaError::Config(_)));

        let err = SchemaDef::builder("Bad")
            .registry(&registry)
            .field(Field::string("a"))
            .exclude(["b"])
            .build()
            .unwrap_err();
        assert!(matches!(err, SchemaError::UnknownFieldName { option: "exclude", .. }));

        let err = SchemaDef::builder("Bad")
            .registry(&registry)
            .field(Field::string("a"))
            .field(Field::integer("a"))
            .build()
            .unwrap_err();
        assert!(matches!(err, SchemaError::DuplicateField(_)));
    }

    #[test]
    fn test_only_orders_output() {
        let registry = SchemaRegistry::new();
        let def = SchemaDef::builder("Ordered")
            .registry(&registry)
            .field(Field::string("a"))
            .field(Field::string("b"))
            .field(Field::string("c"))
            .only(["c", "a"])
            .build()
            .unwrap();
        let fields: Vec<_> = def.select(None, &[]).unwrap().iter().map(|f| f.name()).collect();
        assert_eq!(fields, vec!["c", "a"]);
    }

    #[test]
    fn test_instance_overrides_do_not_touch_definition() {
        let registry = SchemaRegistry::new();
        let def = person(&registry);
        let narrow = Schema::new(def.clone()).only(["name"]).unwrap();
        let obj = Native::map([("name", Native::from("Ada")), ("age", Native::from(36))]);

        assert_eq!(narrow.dump(&obj).unwrap().data(), &json!({"name": "Ada"}));
        assert_eq!(
            Schema::new(def).dump(&obj).unwrap().data(),
            &json!({"name": "Ada", "age": 36})
        );
    }

    #[test]
    fn test_instance_override_names_are_checked() {
        let registry = SchemaRegistry::new();
        let schema = Schema::new(person(&registry));
        assert!(matches!(
            schema.clone().only(["nope"]),
            Err(SchemaError::UnknownFieldName { option: "only", .. })
        ));
        let err = schema.only(["name"]).unwrap().exclude(["age"]).unwrap_err();
        assert!(matches!(err, SchemaError::Config(_)));
    }

    #[test]
    fn test_validate_returns_errors_even_when_strict() {
        let registry = SchemaRegistry::new();
        let schema = Schema::new(person(&registry)).strict(true);
        let errors = schema.validate(&json!({"email": "nope"})).unwrap();
        assert!(errors.contains("name"));
        assert!(errors.contains("email"));
        assert!(schema.load(&json!({})).is_err());
    }

    #[test]
    fn test_fingerprint_tracks_shape() {
        let registry = SchemaRegistry::new();
        let a = person(&registry);
        let b = person(&registry);
        assert_eq!(a.fingerprint(), b.fingerprint());
        let c = SchemaDef::builder("Person")
            .registry(&registry)
            .field(Field::string("name"))
            .build()
            .unwrap();
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn test_builder_rejects_unusable_fields() {
        let registry = SchemaRegistry::new();
        let err = SchemaDef::builder("Ledger")
            .registry(&registry)
            .field(Field::fixed("amount", 40))
            .build()
            .unwrap_err();
        assert!(matches!(err, SchemaError::Config(_)));

        let err = SchemaDef::builder("Ledger")
            .registry(&registry)
            .field(Field::datetime("at").format("%Y-%m-%d %Q"))
            .build()
            .unwrap_err();
        assert!(matches!(err, SchemaError::Config(_)));

        let err = SchemaDef::builder("Ledger")
            .registry(&registry)
            .dateformat("%Q")
            .field(Field::datetime("at"))
            .build()
            .unwrap_err();
        assert!(matches!(err, SchemaError::Config(_)));
    }

    #[test]
    fn test_opacity_tracks_closures() {
        let registry = SchemaRegistry::new();
        assert!(!person(&registry).is_opaque());
        let hooked = SchemaDef::builder("Hooked")
            .registry(&registry)
            .field(Field::string("a"))
            .post_load(|data| data)
            .build()
            .unwrap();
        assert!(hooked.is_opaque());
    }

    #[test]
    fn test_prefix_applies_to_keys_and_errors() {
        let registry = SchemaRegistry::new();
        let schema = Schema::new(person(&registry)).prefix("usr_");
        let obj = Native::map([("name", Native::from("Ada")), ("email", Native::from("x"))]);
        let result = schema.dump(&obj).unwrap();
        assert_eq!(result.data(), &json!({"usr_name": "Ada"}));
        assert!(result.errors().contains("usr_email"));
    }

    #[test]
    fn test_schema_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Schema>();
        assert_send_sync::<SchemaDef>();
        assert_send_sync::<SchemaRegistry>();
    }
}
