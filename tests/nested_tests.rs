//! Nested, self-referential and registry-resolved schemas

use std::sync::Arc;

use serde_json::json;

use familiar_marshal::{
    Field, LoadArgs, Native, Schema, SchemaDef, SchemaError, SchemaRegistry, Source,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

struct Address {
    street: &'static str,
    zip: &'static str,
}

impl Source for Address {
    fn attribute(&self, name: &str) -> Option<Native> {
        match name {
            "street" => Some(self.street.into()),
            "zip" => Some(self.zip.into()),
            _ => None,
        }
    }
}

struct Person {
    name: &'static str,
    address: Option<Address>,
}

impl Source for Person {
    fn attribute(&self, name: &str) -> Option<Native> {
        match name {
            "name" => Some(self.name.into()),
            "address" => Some(match &self.address {
                Some(a) => Native::object(Address {
                    street: a.street,
                    zip: a.zip,
                }),
                None => Native::Null,
            }),
            _ => None,
        }
    }
}

fn address_def(registry: &SchemaRegistry) -> Arc<SchemaDef> {
    SchemaDef::builder("Address")
        .registry(registry)
        .field(Field::string("street"))
        .field(Field::string("zip").required())
        .register()
        .unwrap()
}

fn person_def(registry: &SchemaRegistry) -> Arc<SchemaDef> {
    address_def(registry);
    SchemaDef::builder("Person")
        .registry(registry)
        .field(Field::string("name").required())
        .field(Field::nested("address", "Address").allow_none())
        .register()
        .unwrap()
}

// =============================================================================
// Nested Error Paths
// =============================================================================

#[test]
fn test_nested_error_path() {
    init_tracing();
    let registry = SchemaRegistry::new();
    let schema = Schema::new(person_def(&registry));

    let result = schema.load(&json!({"name": "a", "address": {}})).unwrap();
    assert_eq!(
        result.errors().to_value(),
        json!({"address": {"zip": ["Missing data for required field."]}})
    );
    assert_eq!(
        result.errors().flatten(),
        vec![(
            "address.zip".to_string(),
            "Missing data for required field.".to_string()
        )]
    );
}

#[test]
fn test_nested_error_path_strict() {
    let registry = SchemaRegistry::new();
    let schema = Schema::new(person_def(&registry)).strict(true);

    let err = schema.load(&json!({"name": "a", "address": {}})).unwrap_err();
    assert!(matches!(err, SchemaError::Unmarshalling { .. }));
    assert_eq!(
        err.errors().unwrap().to_value(),
        json!({"address": {"zip": ["Missing data for required field."]}})
    );
}

#[test]
fn test_nested_non_mapping_input() {
    let registry = SchemaRegistry::new();
    let schema = Schema::new(person_def(&registry));
    let result = schema.load(&json!({"name": "a", "address": 12})).unwrap();
    assert_eq!(
        result.errors().to_value(),
        json!({"address": {"_schema": ["Invalid input type."]}})
    );
}

#[test]
fn test_nested_null() {
    let registry = SchemaRegistry::new();
    let schema = Schema::new(person_def(&registry));
    let result = schema.load(&json!({"name": "a", "address": null})).unwrap();
    assert!(result.is_valid());
    assert_eq!(result.data().get("address"), Some(&Native::Null));

    let dumped = schema
        .dump(&Person {
            name: "a",
            address: None,
        })
        .unwrap();
    assert_eq!(dumped.data(), &json!({"name": "a", "address": null}));
}

// =============================================================================
// Nested Dump / Load
// =============================================================================

#[test]
fn test_nested_dump_of_objects() {
    let registry = SchemaRegistry::new();
    let schema = Schema::new(person_def(&registry));
    let person = Person {
        name: "Monty",
        address: Some(Address {
            street: "1 Spam Lane",
            zip: "12345",
        }),
    };
    let dumped = schema.dump(&person).unwrap();
    assert!(dumped.is_valid());
    assert_eq!(
        dumped.data(),
        &json!({"name": "Monty", "address": {"street": "1 Spam Lane", "zip": "12345"}})
    );

    let loaded = schema.load(dumped.data()).unwrap();
    assert_eq!(
        loaded.data(),
        &Native::map([
            ("name", Native::from("Monty")),
            (
                "address",
                Native::map([("street", "1 Spam Lane"), ("zip", "12345")]),
            ),
        ])
    );
}

#[test]
fn test_nested_only_and_exclude() {
    let registry = SchemaRegistry::new();
    let address = address_def(&registry);
    let def = SchemaDef::builder("Envelope")
        .registry(&registry)
        .field(Field::nested("to", &address).only(["zip"]))
        .field(Field::nested("from", &address).exclude(["zip"]))
        .build()
        .unwrap();
    let obj = Native::map([
        ("to", Native::map([("street", "a"), ("zip", "1")])),
        ("from", Native::map([("street", "b"), ("zip", "2")])),
    ]);
    let dumped = Schema::new(def).dump(&obj).unwrap();
    assert_eq!(
        dumped.data(),
        &json!({"to": {"zip": "1"}, "from": {"street": "b"}})
    );
}

#[test]
fn test_nested_many_reports_element_paths() {
    let registry = SchemaRegistry::new();
    address_def(&registry);
    let def = SchemaDef::builder("Company")
        .registry(&registry)
        .field(Field::nested("offices", "Address").many())
        .build()
        .unwrap();
    let result = Schema::new(def)
        .load(&json!({"offices": [{"zip": "1"}, {"street": "x"}]}))
        .unwrap();
    assert_eq!(
        result.errors().to_value(),
        json!({"offices": {"1": {"zip": ["Missing data for required field."]}}})
    );
    assert_eq!(
        result.data().get("offices").and_then(Native::as_list).map(|l| l.len()),
        Some(2)
    );
}

#[test]
fn test_list_of_nested() {
    let registry = SchemaRegistry::new();
    let address = address_def(&registry);
    let def = SchemaDef::builder("Route")
        .registry(&registry)
        .field(Field::list("stops", Field::nested("stop", &address)))
        .build()
        .unwrap();
    let obj = Native::map([(
        "stops",
        Native::from(vec![
            Native::map([("zip", "1")]),
            Native::map([("zip", "2")]),
        ]),
    )]);
    let dumped = Schema::new(def).dump(&obj).unwrap();
    assert_eq!(dumped.data(), &json!({"stops": [{"zip": "1"}, {"zip": "2"}]}));
}

#[test]
fn test_pluck_dumps_bare_values() {
    let registry = SchemaRegistry::new();
    let address = address_def(&registry);
    let def = SchemaDef::builder("Mailing")
        .registry(&registry)
        .field(Field::nested("primary", &address).pluck("zip"))
        .field(Field::nested("others", &address).pluck("zip").many())
        .build()
        .unwrap();
    let schema = Schema::new(def);
    let obj = Native::map([
        ("primary", Native::map([("street", "a"), ("zip", "1")])),
        (
            "others",
            Native::from(vec![
                Native::map([("zip", "2")]),
                Native::map([("street", "c"), ("zip", "3")]),
            ]),
        ),
    ]);
    let dumped = schema.dump(&obj).unwrap();
    assert!(dumped.is_valid());
    assert_eq!(dumped.data(), &json!({"primary": "1", "others": ["2", "3"]}));

    let loaded = schema.load(dumped.data()).unwrap();
    assert!(loaded.is_valid());
    assert_eq!(
        loaded.data(),
        &Native::map([
            ("primary", Native::map([("zip", "1")])),
            (
                "others",
                Native::from(vec![Native::map([("zip", "2")]), Native::map([("zip", "3")])]),
            ),
        ])
    );
}

#[test]
fn test_pluck_of_unknown_field_is_an_error() {
    let registry = SchemaRegistry::new();
    let address = address_def(&registry);
    let def = SchemaDef::builder("Mailing")
        .registry(&registry)
        .field(Field::nested("primary", &address).pluck("postcode"))
        .build()
        .unwrap();
    let obj = Native::map([("primary", Native::map([("zip", "1")]))]);
    assert!(matches!(
        Schema::new(def).dump(&obj),
        Err(SchemaError::UnknownFieldName { option: "only", .. })
    ));
}

// =============================================================================
// Partial Propagation
// =============================================================================

#[test]
fn test_partial_dotted_names_reach_nested_fields() {
    let registry = SchemaRegistry::new();
    let schema = Schema::new(person_def(&registry));
    let data = json!({"name": "a", "address": {"street": "x"}});

    let result = schema
        .load_with(&data, LoadArgs::default().partial(["address.zip"]))
        .unwrap();
    assert!(result.is_valid());

    let result = schema
        .load_with(&data, LoadArgs::default().partial(["zip"]))
        .unwrap();
    assert!(result.errors().child("address").is_some());
}

#[test]
fn test_partial_all_propagates() {
    let registry = SchemaRegistry::new();
    let schema = Schema::new(person_def(&registry));
    let result = schema
        .load_with(&json!({"address": {}}), LoadArgs::default().partial(true))
        .unwrap();
    assert!(result.is_valid());
}

// =============================================================================
// Self Reference and Registry Resolution
// =============================================================================

fn node_def(registry: &SchemaRegistry) -> Arc<SchemaDef> {
    SchemaDef::builder("Node")
        .registry(registry)
        .field(Field::string("name").required())
        .field(Field::nested("children", "self").many())
        .field(Field::nested("parent", "self").only(["name"]))
        .build()
        .unwrap()
}

#[test]
fn test_self_reference_dumps_finite_data() {
    let registry = SchemaRegistry::new();
    let schema = Schema::new(node_def(&registry));
    let leaf = Native::map([("name", "leaf")]);
    let root = Native::map([
        ("name", Native::from("root")),
        ("children", Native::from(vec![leaf])),
        ("parent", Native::map([("name", "origin")])),
    ]);
    let dumped = schema.dump(&root).unwrap();
    assert_eq!(
        dumped.data(),
        &json!({
            "name": "root",
            "children": [{"name": "leaf"}],
            "parent": {"name": "origin"},
        })
    );
}

#[test]
fn test_self_reference_loads_deep_errors() {
    let registry = SchemaRegistry::new();
    let schema = Schema::new(node_def(&registry));
    let result = schema
        .load(&json!({
            "name": "root",
            "children": [{"name": "a", "children": [{}]}],
        }))
        .unwrap();
    assert_eq!(
        result.errors().flatten(),
        vec![(
            "children.0.children.0.name".to_string(),
            "Missing data for required field.".to_string()
        )]
    );
}

#[test]
fn test_unresolvable_nested_name() {
    let registry = SchemaRegistry::new();
    let def = SchemaDef::builder("Orphan")
        .registry(&registry)
        .field(Field::nested("ghost", "Ghost"))
        .build()
        .unwrap();
    let schema = Schema::new(def);

    // Resolution is lazy; absent values never touch the registry.
    assert!(schema.load(&json!({})).unwrap().is_valid());
    let err = schema.load(&json!({"ghost": {}})).unwrap_err();
    assert!(matches!(err, SchemaError::NotFound { name } if name == "Ghost"));
}

#[test]
fn test_forward_reference_resolved_on_first_use() {
    let registry = SchemaRegistry::new();
    let def = SchemaDef::builder("Author")
        .registry(&registry)
        .field(Field::string("name"))
        .field(Field::nested("books", "Book").many())
        .register()
        .unwrap();
    SchemaDef::builder("Book")
        .registry(&registry)
        .field(Field::string("title").required())
        .field(Field::nested("author", "Author").only(["name"]))
        .register()
        .unwrap();

    let result = Schema::new(def)
        .load(&json!({"name": "Monty", "books": [{"title": "Spam", "author": {"name": "Monty"}}]}))
        .unwrap();
    assert!(result.is_valid());
}

#[test]
fn test_global_registry_lookup() {
    SchemaDef::builder("GlobalWidgetForNestedTests")
        .field(Field::string("label"))
        .register()
        .unwrap();
    let schema = Schema::named("GlobalWidgetForNestedTests").unwrap();
    let dumped = schema.dump(&Native::map([("label", "ok")])).unwrap();
    assert_eq!(dumped.data(), &json!({"label": "ok"}));
    assert!(matches!(
        Schema::named("NoSuchSchemaAnywhere"),
        Err(SchemaError::NotFound { .. })
    ));
}

// =============================================================================
// Concurrency
// =============================================================================

#[test]
fn test_concurrent_first_use_registers_once() {
    let registry = SchemaRegistry::new();
    let defs: Vec<Arc<SchemaDef>> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| scope.spawn(|| address_def(&registry)))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    assert_eq!(registry.names(), vec!["Address".to_string()]);
    assert!(defs.iter().all(|def| Arc::ptr_eq(def, &defs[0])));
}

#[test]
fn test_schema_shared_across_threads() {
    let registry = SchemaRegistry::new();
    let schema = Schema::new(person_def(&registry));

    std::thread::scope(|scope| {
        for i in 0..4 {
            let schema = &schema;
            scope.spawn(move || {
                let input = if i % 2 == 0 {
                    json!({"name": "a", "address": {"zip": "1"}})
                } else {
                    json!({"address": {}})
                };
                let result = schema.load(&input).unwrap();
                assert_eq!(result.is_valid(), i % 2 == 0);
            });
        }
    });
}
