//! Field descriptors
//!
//! A [`Field`] describes how one attribute moves between a native object and
//! a primitive mapping: the key it uses on each side, its type coercion, its
//! required/null rules and its validators. Fields are collected into a
//! [`FieldRegistry`] once per schema definition and never change afterwards.
//!
//! ```text
//! native attribute  ── serialize ──▶  primitive key
//!   (attribute)     ◀─ deserialize ──    (name)
//! ```

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use indexmap::IndexMap;
use once_cell::sync::OnceCell;
use rust_decimal::{Decimal, RoundingStrategy};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::dates::{self, DateFormat};
use crate::error::{Result, SchemaError};
use crate::marshal::Marshaller;
use crate::schema::SchemaDef;
use crate::tree::{ErrorNode, ErrorTree};
use crate::unmarshal::{Partial, Unmarshaller};
use crate::validate::{self, Validator};
use crate::value::{duration_seconds, Native, Source};

pub const MISSING_MESSAGE: &str = "Missing data for required field.";
pub const NULL_MESSAGE: &str = "Field may not be null.";

/// Caller-supplied values visible to function fields during dump
pub type Context = serde_json::Map<String, Value>;

type DumpFn = dyn Fn(&dyn Source, &Context) -> std::result::Result<Value, String> + Send + Sync;
type LoadFn = dyn Fn(&Value) -> std::result::Result<Native, String> + Send + Sync;

const DEFAULT_FALSY: [&str; 5] = ["False", "false", "0", "null", "None"];

/// Largest scale a fixed-precision field can round to
pub const MAX_DECIMALS: u32 = 28;

// Integral floats in this range convert to i64 without saturating.
const I64_LOWER: f64 = -9_223_372_036_854_775_808.0;
const I64_UPPER: f64 = 9_223_372_036_854_775_808.0;

/// Reference from a nested field to the schema it embeds
#[derive(Clone)]
pub enum SchemaRef {
    /// A definition held directly
    Def(Arc<SchemaDef>),
    /// A name resolved through the schema registry on first use
    Named(String),
    /// The schema that owns the field
    SelfRef,
}

impl SchemaRef {
    fn label(&self) -> &str {
        match self {
            SchemaRef::Def(def) => def.name(),
            SchemaRef::Named(name) => name,
            SchemaRef::SelfRef => "self",
        }
    }
}

impl From<Arc<SchemaDef>> for SchemaRef {
    fn from(def: Arc<SchemaDef>) -> Self {
        SchemaRef::Def(def)
    }
}

impl From<&Arc<SchemaDef>> for SchemaRef {
    fn from(def: &Arc<SchemaDef>) -> Self {
        SchemaRef::Def(def.clone())
    }
}

impl From<&str> for SchemaRef {
    fn from(name: &str) -> Self {
        match name {
            "self" => SchemaRef::SelfRef,
            other => SchemaRef::Named(other.to_string()),
        }
    }
}

impl From<String> for SchemaRef {
    fn from(name: String) -> Self {
        SchemaRef::from(name.as_str())
    }
}

/// Settings of a nested-schema field
#[derive(Clone)]
pub struct Nested {
    target: SchemaRef,
    many: bool,
    only: Option<Vec<String>>,
    exclude: Vec<String>,
    pluck: Option<String>,
    resolved: Arc<OnceCell<Arc<SchemaDef>>>,
}

impl Nested {
    fn new(target: SchemaRef) -> Self {
        Self {
            target,
            many: false,
            only: None,
            exclude: Vec::new(),
            pluck: None,
            resolved: Arc::new(OnceCell::new()),
        }
    }

    pub fn target(&self) -> &SchemaRef {
        &self.target
    }

    pub fn is_many(&self) -> bool {
        self.many
    }

    /// Fields of the nested schema in use; a plucked field narrows to itself
    pub fn only(&self) -> Option<&[String]> {
        match &self.pluck {
            Some(name) => Some(std::slice::from_ref(name)),
            None => self.only.as_deref(),
        }
    }

    /// Exclusions still in force; `only` wins over `exclude`
    pub fn exclude(&self) -> &[String] {
        if self.only().is_some() {
            &[]
        } else {
            &self.exclude
        }
    }

    /// Field whose bare value stands in for each nested object
    pub fn plucked(&self) -> Option<&str> {
        self.pluck.as_deref()
    }

    /// Resolve the embedded schema, caching registry lookups.
    ///
    /// `self` (or the owner's own name) resolves to `parent` and is never
    /// cached, so a definition does not keep itself alive.
    pub(crate) fn resolve(&self, parent: &Arc<SchemaDef>) -> Result<Arc<SchemaDef>> {
        match &self.target {
            SchemaRef::SelfRef => Ok(parent.clone()),
            SchemaRef::Def(def) => Ok(def.clone()),
            SchemaRef::Named(name) if name == parent.name() => Ok(parent.clone()),
            SchemaRef::Named(name) => {
                if let Some(def) = self.resolved.get() {
                    return Ok(def.clone());
                }
                let def = parent.registry()?.resolve(name)?;
                tracing::trace!(parent = %parent.name(), nested = %name, "resolved nested schema");
                Ok(self.resolved.get_or_init(|| def).clone())
            }
        }
    }
}

/// The closed set of field types
#[derive(Clone)]
pub enum FieldKind {
    /// Passed through without formatting
    Raw,
    String,
    Uuid,
    Integer { as_string: bool },
    Float { as_string: bool },
    /// Fixed-precision decimal rendered as a string
    Fixed { decimals: u32 },
    /// Decimal rendered as a string at whatever precision it carries
    Arbitrary,
    Boolean { truthy: Vec<String>, falsy: Vec<String> },
    DateTime { format: Option<DateFormat>, localtime: bool },
    Date,
    Time,
    /// Duration as total seconds
    TimeDelta,
    Url { relative: bool },
    Email,
    Select(Vec<Native>),
    /// Template interpolating `{attribute}` values from the source object
    FormattedString(String),
    Nested(Nested),
    List(Box<Field>),
    /// Caller-supplied conversion functions
    Function {
        dump: Option<Arc<DumpFn>>,
        load: Option<Arc<LoadFn>>,
    },
}

impl FieldKind {
    /// Stable tag used in descriptions and fingerprints
    pub fn tag(&self) -> &'static str {
        match self {
            FieldKind::Raw => "raw",
            FieldKind::String => "string",
            FieldKind::Uuid => "uuid",
            FieldKind::Integer { .. } => "integer",
            FieldKind::Float { .. } => "float",
            FieldKind::Fixed { .. } => "fixed",
            FieldKind::Arbitrary => "arbitrary",
            FieldKind::Boolean { .. } => "boolean",
            FieldKind::DateTime { .. } => "datetime",
            FieldKind::Date => "date",
            FieldKind::Time => "time",
            FieldKind::TimeDelta => "timedelta",
            FieldKind::Url { .. } => "url",
            FieldKind::Email => "email",
            FieldKind::Select(_) => "select",
            FieldKind::FormattedString(_) => "formatted_string",
            FieldKind::Nested(_) => "nested",
            FieldKind::List(_) => "list",
            FieldKind::Function { .. } => "function",
        }
    }

    // These kinds compute their output from the whole object.
    fn reads_whole_object(&self) -> bool {
        matches!(self, FieldKind::FormattedString(_) | FieldKind::Function { .. })
    }
}

impl fmt::Debug for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldKind::Nested(nested) => f
                .debug_struct("Nested")
                .field("target", &nested.target.label())
                .field("many", &nested.many)
                .field("pluck", &nested.pluck)
                .finish(),
            FieldKind::List(inner) => f.debug_tuple("List").field(inner).finish(),
            FieldKind::Select(choices) => f.debug_tuple("Select").field(choices).finish(),
            FieldKind::DateTime { format, localtime } => f
                .debug_struct("DateTime")
                .field("format", format)
                .field("localtime", localtime)
                .finish(),
            FieldKind::Function { dump, load } => f
                .debug_struct("Function")
                .field("dump", &dump.is_some())
                .field("load", &load.is_some())
                .finish(),
            other => f.write_str(other.tag()),
        }
    }
}

/// Result of converting one field value: a value, errors, both or neither
pub(crate) struct Slot<T> {
    pub(crate) value: Option<T>,
    pub(crate) errors: Option<ErrorNode>,
}

impl<T> Slot<T> {
    pub(crate) fn ok(value: T) -> Self {
        Self {
            value: Some(value),
            errors: None,
        }
    }

    pub(crate) fn fail(node: impl Into<ErrorNode>) -> Self {
        Self {
            value: None,
            errors: Some(node.into()),
        }
    }

    pub(crate) fn omit() -> Self {
        Self {
            value: None,
            errors: None,
        }
    }

    pub(crate) fn with_tree(value: T, errors: ErrorTree) -> Self {
        Self {
            value: Some(value),
            errors: (!errors.is_empty()).then(|| ErrorNode::Tree(errors)),
        }
    }
}

// A collection only has a value when every element produced one.
fn collect_elements<T>(slots: Vec<Slot<T>>) -> Slot<Vec<T>> {
    let mut values = Vec::with_capacity(slots.len());
    let mut errors = ErrorTree::new();
    let mut complete = true;
    for (idx, slot) in slots.into_iter().enumerate() {
        if let Some(node) = slot.errors {
            errors.insert(idx, node);
        }
        match slot.value {
            Some(v) => values.push(v),
            None => complete = false,
        }
    }
    Slot {
        value: complete.then_some(values),
        errors: (!errors.is_empty()).then(|| ErrorNode::Tree(errors)),
    }
}

/// A typed, named descriptor for one attribute
#[derive(Clone, Debug)]
pub struct Field {
    name: String,
    attribute: Option<String>,
    kind: FieldKind,
    required: bool,
    allow_none: bool,
    default: Option<Native>,
    missing: Option<Native>,
    error: Option<String>,
    load_only: bool,
    dump_only: bool,
    validators: Vec<Validator>,
}

impl Field {
    /// Create a field of any kind
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            attribute: None,
            kind,
            required: false,
            allow_none: false,
            default: None,
            missing: None,
            error: None,
            load_only: false,
            dump_only: false,
            validators: Vec::new(),
        }
    }

    pub fn raw(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Raw)
    }

    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::String)
    }

    pub fn uuid(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Uuid)
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Integer { as_string: false })
    }

    pub fn float(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Float { as_string: false })
    }

    pub fn fixed(name: impl Into<String>, decimals: u32) -> Self {
        Self::new(name, FieldKind::Fixed { decimals })
    }

    /// Two-decimal fixed number
    pub fn price(name: impl Into<String>) -> Self {
        Self::fixed(name, 2)
    }

    /// Decimal string keeping the precision of its input; dumps `"0"` when
    /// the attribute is absent
    pub fn arbitrary(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Arbitrary).default(0)
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(
            name,
            FieldKind::Boolean {
                truthy: Vec::new(),
                falsy: DEFAULT_FALSY.iter().map(|s| s.to_string()).collect(),
            },
        )
    }

    pub fn datetime(name: impl Into<String>) -> Self {
        Self::new(
            name,
            FieldKind::DateTime {
                format: None,
                localtime: false,
            },
        )
    }

    /// Datetime rendered in the local timezone
    pub fn local_datetime(name: impl Into<String>) -> Self {
        Self::new(
            name,
            FieldKind::DateTime {
                format: None,
                localtime: true,
            },
        )
    }

    pub fn date(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Date)
    }

    pub fn time(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Time)
    }

    pub fn timedelta(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::TimeDelta)
    }

    pub fn url(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Url { relative: false })
    }

    pub fn email(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Email)
    }

    pub fn select<T: Into<Native>>(
        name: impl Into<String>,
        choices: impl IntoIterator<Item = T>,
    ) -> Self {
        let choices = choices.into_iter().map(Into::into).collect();
        Self::new(name, FieldKind::Select(choices))
    }

    pub fn formatted(name: impl Into<String>, template: impl Into<String>) -> Self {
        Self::new(name, FieldKind::FormattedString(template.into()))
    }

    /// Embed another schema, by definition, registry name or `"self"`
    pub fn nested(name: impl Into<String>, target: impl Into<SchemaRef>) -> Self {
        Self::new(name, FieldKind::Nested(Nested::new(target.into())))
    }

    /// A list whose elements are converted by `inner`
    pub fn list(name: impl Into<String>, inner: Field) -> Self {
        Self::new(name, FieldKind::List(Box::new(inner)))
    }

    /// A field computed from the whole source object on dump
    pub fn function<F>(name: impl Into<String>, dump: F) -> Self
    where
        F: Fn(&dyn Source, &Context) -> std::result::Result<Value, String> + Send + Sync + 'static,
    {
        Self::new(
            name,
            FieldKind::Function {
                dump: Some(Arc::new(dump)),
                load: None,
            },
        )
    }

    // --- builder ---

    /// Native attribute name, when it differs from the primitive key
    pub fn attribute(mut self, attribute: impl Into<String>) -> Self {
        self.attribute = Some(attribute.into());
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn allow_none(mut self) -> Self {
        self.allow_none = true;
        self
    }

    /// Value dumped when the source attribute is absent
    pub fn default(mut self, value: impl Into<Native>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Value loaded when the input key is absent
    pub fn missing(mut self, value: impl Into<Native>) -> Self {
        self.missing = Some(value.into());
        self
    }

    /// Message replacing coercion and validator failures
    pub fn error(mut self, message: impl Into<String>) -> Self {
        self.error = Some(message.into());
        self
    }

    pub fn validate(mut self, validator: Validator) -> Self {
        self.validators.push(validator);
        self
    }

    pub fn load_only(mut self) -> Self {
        self.load_only = true;
        self
    }

    pub fn dump_only(mut self) -> Self {
        self.dump_only = true;
        self
    }

    /// Render numbers as strings. Integer and float fields only.
    pub fn as_string(mut self) -> Self {
        match &mut self.kind {
            FieldKind::Integer { as_string } | FieldKind::Float { as_string } => *as_string = true,
            _ => {}
        }
        self
    }

    /// Datetime format for this field. Datetime fields only.
    pub fn format(mut self, fmt: impl Into<DateFormat>) -> Self {
        if let FieldKind::DateTime { format, .. } = &mut self.kind {
            *format = Some(fmt.into());
        }
        self
    }

    /// Strings accepted as `true`; others (outside the falsy set) are rejected.
    /// Boolean fields only.
    pub fn truthy<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if let FieldKind::Boolean { truthy, .. } = &mut self.kind {
            *truthy = values.into_iter().map(Into::into).collect();
        }
        self
    }

    /// Strings accepted as `false`. Boolean fields only.
    pub fn falsy<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if let FieldKind::Boolean { falsy, .. } = &mut self.kind {
            *falsy = values.into_iter().map(Into::into).collect();
        }
        self
    }

    /// Accept relative URLs. Url fields only.
    pub fn relative(mut self) -> Self {
        if let FieldKind::Url { relative } = &mut self.kind {
            *relative = true;
        }
        self
    }

    /// Nest a collection of objects. Nested fields only.
    pub fn many(mut self) -> Self {
        if let FieldKind::Nested(nested) = &mut self.kind {
            nested.many = true;
        }
        self
    }

    /// Restrict the nested schema's fields. Nested fields only.
    pub fn only<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if let FieldKind::Nested(nested) = &mut self.kind {
            nested.only = Some(names.into_iter().map(Into::into).collect());
        }
        self
    }

    /// Drop fields from the nested schema. Nested fields only.
    pub fn exclude<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if let FieldKind::Nested(nested) = &mut self.kind {
            nested.exclude = names.into_iter().map(Into::into).collect();
        }
        self
    }

    /// Represent each nested object by the value of one of its fields.
    /// Nested fields only.
    pub fn pluck(mut self, name: impl Into<String>) -> Self {
        if let FieldKind::Nested(nested) = &mut self.kind {
            nested.pluck = Some(name.into());
        }
        self
    }

    /// Load conversion for a function field
    pub fn deserialize_with<F>(mut self, load: F) -> Self
    where
        F: Fn(&Value) -> std::result::Result<Native, String> + Send + Sync + 'static,
    {
        if let FieldKind::Function { load: slot, .. } = &mut self.kind {
            *slot = Some(Arc::new(load));
        }
        self
    }

    // --- accessors ---

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Native attribute name; defaults to the field name
    pub fn attribute_name(&self) -> &str {
        self.attribute.as_deref().unwrap_or(&self.name)
    }

    pub fn kind(&self) -> &FieldKind {
        &self.kind
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    pub fn allows_none(&self) -> bool {
        self.allow_none
    }

    pub fn is_load_only(&self) -> bool {
        self.load_only
    }

    pub fn is_dump_only(&self) -> bool {
        self.dump_only
    }

    pub fn validators(&self) -> &[Validator] {
        &self.validators
    }

    /// Structural description, used for fingerprints
    pub fn describe(&self) -> Value {
        let validators: Vec<String> = self
            .validators
            .iter()
            .map(|v| v.description().unwrap_or_else(|| v.name().to_string()))
            .collect();
        let mut desc = json!({
            "name": self.name,
            "attribute": self.attribute_name(),
            "kind": self.kind.tag(),
            "required": self.required,
            "allow_none": self.allow_none,
            "default": self.default.as_ref().map(|v| format!("{:?}", v)),
            "missing": self.missing.as_ref().map(|v| format!("{:?}", v)),
            "error": self.error,
            "load_only": self.load_only,
            "dump_only": self.dump_only,
            "validators": validators,
        });
        let extra = match &self.kind {
            FieldKind::Integer { as_string } | FieldKind::Float { as_string } => {
                json!({ "as_string": as_string })
            }
            FieldKind::Fixed { decimals } => json!({ "decimals": decimals }),
            FieldKind::Boolean { truthy, falsy } => json!({ "truthy": truthy, "falsy": falsy }),
            FieldKind::DateTime { format, localtime } => json!({
                "format": format.as_ref().map(|f| f.name().to_string()),
                "localtime": localtime,
            }),
            FieldKind::Url { relative } => json!({ "relative": relative }),
            FieldKind::Select(choices) => json!({ "choices": format!("{:?}", choices) }),
            FieldKind::FormattedString(template) => json!({ "template": template }),
            FieldKind::Nested(nested) => json!({
                "target": nested.target.label(),
                "many": nested.many,
                "only": nested.only,
                "exclude": nested.exclude,
                "pluck": nested.pluck,
            }),
            FieldKind::List(inner) => json!({ "inner": inner.describe() }),
            _ => Value::Null,
        };
        if let (Some(desc), Value::Object(extra)) = (desc.as_object_mut(), extra) {
            desc.extend(extra);
        }
        desc
    }

    /// Whether this field holds caller closures a description cannot capture
    pub(crate) fn is_opaque(&self) -> bool {
        let kind = match &self.kind {
            FieldKind::Function { .. } => true,
            FieldKind::List(inner) => inner.is_opaque(),
            _ => false,
        };
        kind || self.validators.iter().any(|v| v.description().is_none())
    }

    /// Reject settings that could only fail at conversion time
    pub(crate) fn check(&self) -> Result<()> {
        match &self.kind {
            FieldKind::Fixed { decimals } if *decimals > MAX_DECIMALS => Err(SchemaError::Config(
                format!(
                    "field {:?}: at most {} decimals are supported, got {}",
                    self.name, MAX_DECIMALS, decimals
                ),
            )),
            FieldKind::DateTime {
                format: Some(format),
                ..
            } => format.check(),
            FieldKind::List(inner) => inner.check(),
            _ => Ok(()),
        }
    }

    // --- dump ---

    /// Read this field's attribute from `source` and convert it.
    ///
    /// Absent and null attributes fall back to `default`; without one a
    /// required field reports the missing-data message. Validators see the
    /// attribute's own value, never the default.
    pub(crate) fn serialize(
        &self,
        source: &dyn Source,
        m: &Marshaller<'_>,
    ) -> Result<Slot<Value>> {
        if self.kind.reads_whole_object() {
            return Ok(self.serialize_computed(source, m));
        }
        match source.attribute(self.attribute_name()) {
            None => match &self.default {
                Some(default) => self.serialize_value(default, source, m),
                None if self.required => Ok(Slot::fail(MISSING_MESSAGE)),
                None => Ok(Slot::omit()),
            },
            Some(Native::Null) => match &self.default {
                _ if self.allow_none => Ok(Slot::ok(Value::Null)),
                Some(default) => self.serialize_value(default, source, m),
                None if self.required => Ok(Slot::fail(MISSING_MESSAGE)),
                None => Ok(Slot::ok(Value::Null)),
            },
            Some(value) => match self.first_failure(&value) {
                Some(msg) => Ok(Slot::fail(msg)),
                None => self.serialize_value(&value, source, m),
            },
        }
    }

    fn serialize_computed(&self, source: &dyn Source, m: &Marshaller<'_>) -> Slot<Value> {
        let result = match &self.kind {
            FieldKind::FormattedString(template) => {
                interpolate(template, source).map(Value::String)
            }
            FieldKind::Function { dump: Some(dump), .. } => dump(source, m.context()),
            _ => return Slot::omit(),
        };
        match result {
            Ok(value) => Slot::ok(value),
            Err(msg) => Slot::fail(self.message(msg)),
        }
    }

    fn serialize_value(
        &self,
        value: &Native,
        source: &dyn Source,
        m: &Marshaller<'_>,
    ) -> Result<Slot<Value>> {
        match &self.kind {
            FieldKind::Nested(nested) => m.dump_nested(nested, value),
            FieldKind::List(inner) => {
                let items = match value.as_list() {
                    Some(items) => items,
                    None => return Ok(Slot::fail(self.message("Not a valid list.".to_string()))),
                };
                let mut slots = Vec::with_capacity(items.len());
                for item in items {
                    slots.push(match item {
                        Native::Null => Slot::ok(Value::Null),
                        item => inner.serialize_value(item, source, m)?,
                    });
                }
                let slot = collect_elements(slots);
                Ok(Slot {
                    value: slot.value.map(Value::Array),
                    errors: slot.errors,
                })
            }
            _ => Ok(match self.dump_scalar(value, m.dateformat()) {
                Ok(v) => Slot::ok(v),
                Err(msg) => Slot::fail(self.message(msg)),
            }),
        }
    }

    fn dump_scalar(
        &self,
        value: &Native,
        dateformat: &DateFormat,
    ) -> std::result::Result<Value, String> {
        match &self.kind {
            FieldKind::Raw => value.to_primitive(),
            FieldKind::String => match value {
                Native::Str(s) => Ok(Value::String(s.clone())),
                Native::Int(_) | Native::Float(_) | Native::Bool(_) | Native::Uuid(_) => {
                    Ok(Value::String(display_scalar(value)))
                }
                Native::DateTime(_) | Native::Date(_) | Native::Time(_) => value.to_primitive(),
                _ => Err(invalid("string")),
            },
            FieldKind::Uuid => match value {
                Native::Uuid(u) => Ok(Value::String(u.to_string())),
                Native::Str(s) => Uuid::parse_str(s)
                    .map(|u| Value::String(u.to_string()))
                    .map_err(|_| invalid("UUID")),
                _ => Err(invalid("UUID")),
            },
            FieldKind::Integer { as_string } => {
                let n = match value {
                    Native::Int(i) => *i,
                    Native::Float(f) => float_to_i64(f.trunc()).ok_or_else(|| invalid("integer"))?,
                    Native::Str(s) => s.trim().parse::<i64>().map_err(|_| invalid("integer"))?,
                    _ => return Err(invalid("integer")),
                };
                Ok(if *as_string {
                    Value::String(n.to_string())
                } else {
                    Value::from(n)
                })
            }
            FieldKind::Float { as_string } => {
                let f = match value {
                    Native::Str(s) => parse_float(s)?,
                    other => other.as_f64().ok_or_else(|| invalid("number"))?,
                };
                if *as_string {
                    Ok(Value::String(format!("{:?}", f)))
                } else {
                    finite_number(f)
                }
            }
            FieldKind::Fixed { decimals } => {
                native_decimal(value).and_then(|d| fixed(d, *decimals)).map(Value::String)
            }
            FieldKind::Arbitrary => native_decimal(value).map(arbitrary).map(Value::String),
            FieldKind::Boolean { .. } => Ok(Value::Bool(truthiness(value))),
            FieldKind::DateTime { format, localtime } => {
                let fmt = format.as_ref().unwrap_or(dateformat);
                match value {
                    Native::DateTime(dt) => fmt.format(dt, *localtime).map(Value::String),
                    Native::Date(d) => {
                        let dt = d
                            .and_hms_opt(0, 0, 0)
                            .map(|naive| naive.and_utc().fixed_offset())
                            .ok_or_else(|| invalid("datetime"))?;
                        fmt.format(&dt, *localtime).map(Value::String)
                    }
                    other => Err(format!("{:?} cannot be formatted as a datetime.", other)),
                }
            }
            FieldKind::Date => match value {
                Native::Date(d) => Ok(Value::String(dates::format_date(d))),
                Native::DateTime(dt) => Ok(Value::String(dates::format_date(&dt.date_naive()))),
                other => Err(format!("{:?} cannot be formatted as a date.", other)),
            },
            FieldKind::Time => match value {
                Native::Time(t) => Ok(Value::String(dates::format_time(t))),
                Native::DateTime(dt) => Ok(Value::String(dates::format_time(&dt.time()))),
                other => Err(format!("{:?} cannot be formatted as a time.", other)),
            },
            FieldKind::TimeDelta => match value {
                Native::Duration(d) => finite_number(duration_seconds(d)),
                other => Err(format!("{:?} cannot be formatted as a timedelta.", other)),
            },
            FieldKind::Url { relative } => match value {
                Native::Str(s) if s.is_empty() => Ok(Value::Null),
                Native::Str(s) => validate::validate_url(s, *relative).map(Value::String),
                _ => Err(invalid("URL")),
            },
            FieldKind::Email => match value {
                Native::Str(s) if s.is_empty() => Ok(Value::Null),
                Native::Str(s) => validate::validate_email(s).map(Value::String),
                _ => Err(invalid("email address")),
            },
            FieldKind::Select(choices) => {
                if choices.contains(value) {
                    value.to_primitive()
                } else {
                    Err(format!("{:?} is not a valid choice for this field.", value))
                }
            }
            FieldKind::FormattedString(_)
            | FieldKind::Function { .. }
            | FieldKind::Nested(_)
            | FieldKind::List(_) => value.to_primitive(),
        }
    }

    // --- load ---

    /// Convert the input value for this field, or apply the absent rules.
    pub(crate) fn deserialize(
        &self,
        input: Option<&Value>,
        u: &Unmarshaller<'_>,
        partial: &Partial,
    ) -> Result<Slot<Native>> {
        match input {
            None => Ok(match &self.missing {
                Some(missing) => Slot::ok(missing.clone()),
                None if self.required => Slot::fail(MISSING_MESSAGE),
                None => Slot::omit(),
            }),
            Some(Value::Null) if self.allow_none => Ok(Slot::ok(Native::Null)),
            Some(Value::Null) => Ok(Slot::fail(NULL_MESSAGE)),
            Some(raw) => self.deserialize_value(raw, u, partial),
        }
    }

    fn deserialize_value(
        &self,
        raw: &Value,
        u: &Unmarshaller<'_>,
        partial: &Partial,
    ) -> Result<Slot<Native>> {
        let slot = match &self.kind {
            FieldKind::Nested(nested) => u.load_nested(nested, raw, partial)?,
            FieldKind::List(inner) => match raw {
                Value::Array(items) => {
                    let mut slots = Vec::with_capacity(items.len());
                    for item in items {
                        slots.push(match item {
                            Value::Null if inner.allow_none => Slot::ok(Native::Null),
                            Value::Null => Slot::fail(NULL_MESSAGE),
                            item => inner.deserialize_value(item, u, partial)?,
                        });
                    }
                    let slot = collect_elements(slots);
                    Slot {
                        value: slot.value.map(Native::List),
                        errors: slot.errors,
                    }
                }
                _ => Slot::fail(self.message("Not a valid list.".to_string())),
            },
            _ => match self.load_scalar(raw, u.dateformat()) {
                Ok(native) => Slot::ok(native),
                Err(msg) => Slot::fail(self.message(msg)),
            },
        };
        Ok(self.run_validators(slot))
    }

    // Values with conversion errors are not validated.
    fn run_validators(&self, slot: Slot<Native>) -> Slot<Native> {
        if slot.errors.is_some() {
            return slot;
        }
        match slot.value.as_ref().and_then(|value| self.first_failure(value)) {
            Some(msg) => Slot::fail(msg),
            None => slot,
        }
    }

    // First failing validator wins.
    fn first_failure(&self, value: &Native) -> Option<String> {
        self.validators.iter().find_map(|validator| {
            validator.check(value).err().map(|msg| {
                tracing::trace!(
                    field = %self.name,
                    validator = validator.name(),
                    "validator rejected value"
                );
                self.message(msg)
            })
        })
    }

    fn load_scalar(
        &self,
        raw: &Value,
        dateformat: &DateFormat,
    ) -> std::result::Result<Native, String> {
        match &self.kind {
            FieldKind::Raw | FieldKind::FormattedString(_) => Ok(Native::from(raw)),
            FieldKind::String => match raw {
                Value::String(s) => Ok(Native::Str(s.clone())),
                Value::Number(n) => Ok(Native::Str(n.to_string())),
                Value::Bool(b) => Ok(Native::Str(b.to_string())),
                _ => Err(invalid("string")),
            },
            FieldKind::Uuid => raw
                .as_str()
                .and_then(|s| Uuid::parse_str(s).ok())
                .map(Native::Uuid)
                .ok_or_else(|| invalid("UUID")),
            FieldKind::Integer { .. } => match raw {
                Value::Number(n) => n
                    .as_i64()
                    .or_else(|| {
                        // u64 beyond i64::MAX also lands here and is rejected
                        n.as_f64().filter(|f| f.fract() == 0.0).and_then(float_to_i64)
                    })
                    .map(Native::Int)
                    .ok_or_else(|| invalid("integer")),
                Value::String(s) => s
                    .trim()
                    .parse::<i64>()
                    .map(Native::Int)
                    .map_err(|_| invalid("integer")),
                _ => Err(invalid("integer")),
            },
            FieldKind::Float { .. } => match raw {
                Value::Number(n) => n.as_f64().map(Native::Float).ok_or_else(|| invalid("number")),
                Value::String(s) => parse_float(s).map(Native::Float),
                _ => Err(invalid("number")),
            },
            FieldKind::Fixed { decimals } => {
                raw_decimal(raw).and_then(|d| fixed(d, *decimals)).map(Native::Str)
            }
            FieldKind::Arbitrary => raw_decimal(raw).map(arbitrary).map(Native::Str),
            FieldKind::Boolean { truthy, falsy } => load_boolean(raw, truthy, falsy),
            FieldKind::DateTime { format, .. } => {
                let fmt = format.as_ref().unwrap_or(dateformat);
                raw.as_str()
                    .and_then(|s| fmt.parse_datetime(s))
                    .map(Native::DateTime)
                    .ok_or_else(|| format!("Cannot deserialize {} to a datetime.", raw))
            }
            FieldKind::Date => raw
                .as_str()
                .and_then(dates::parse_date)
                .map(Native::Date)
                .ok_or_else(|| format!("Could not deserialize {} to a date object.", raw)),
            FieldKind::Time => raw
                .as_str()
                .and_then(dates::parse_time)
                .map(Native::Time)
                .ok_or_else(|| format!("Could not deserialize {} to a time object.", raw)),
            FieldKind::TimeDelta => {
                let seconds = match raw {
                    Value::Number(n) => n.as_f64(),
                    Value::String(s) => s.trim().parse::<f64>().ok(),
                    _ => None,
                }
                .filter(|f| f.is_finite())
                .ok_or_else(|| invalid("period of time"))?;
                Ok(Native::Duration(chrono::Duration::microseconds(
                    (seconds * 1_000_000.0).round() as i64,
                )))
            }
            FieldKind::Url { relative } => match raw {
                Value::String(s) => validate::validate_url(s, *relative).map(Native::Str),
                _ => Err(invalid("URL")),
            },
            FieldKind::Email => match raw {
                Value::String(s) => validate::validate_email(s).map(Native::Str),
                _ => Err(invalid("email address")),
            },
            FieldKind::Select(choices) => {
                let native = Native::from(raw);
                if choices.contains(&native) {
                    Ok(native)
                } else {
                    Err(format!("{} is not a valid choice for this field.", raw))
                }
            }
            FieldKind::Function { load, .. } => match load {
                Some(load) => load(raw),
                None => Ok(Native::from(raw)),
            },
            FieldKind::Nested(_) | FieldKind::List(_) => Ok(Native::from(raw)),
        }
    }

    fn message(&self, fallback: String) -> String {
        self.error.clone().unwrap_or(fallback)
    }
}

fn invalid(what: &str) -> String {
    format!("Not a valid {}.", what)
}

fn parse_float(s: &str) -> std::result::Result<f64, String> {
    s.trim()
        .parse::<f64>()
        .ok()
        .filter(|f| f.is_finite())
        .ok_or_else(|| invalid("number"))
}

fn float_to_i64(f: f64) -> Option<i64> {
    (f.is_finite() && (I64_LOWER..I64_UPPER).contains(&f)).then(|| f as i64)
}

fn finite_number(f: f64) -> std::result::Result<Value, String> {
    serde_json::Number::from_f64(f)
        .map(Value::Number)
        .ok_or_else(|| format!("{} is not a finite number.", f))
}

fn display_scalar(value: &Native) -> String {
    match value {
        Native::Str(s) => s.clone(),
        Native::Int(i) => i.to_string(),
        Native::Float(f) => f.to_string(),
        Native::Bool(b) => b.to_string(),
        Native::Uuid(u) => u.to_string(),
        other => match other.to_primitive() {
            Ok(Value::String(s)) => s,
            Ok(v) => v.to_string(),
            Err(_) => format!("{:?}", other),
        },
    }
}

fn truthiness(value: &Native) -> bool {
    match value {
        Native::Null => false,
        Native::Bool(b) => *b,
        Native::Int(i) => *i != 0,
        Native::Float(f) => *f != 0.0,
        Native::Str(s) => !s.is_empty(),
        Native::List(items) => !items.is_empty(),
        Native::Map(map) => !map.is_empty(),
        Native::Duration(d) => *d != chrono::Duration::zero(),
        _ => true,
    }
}

fn load_boolean(
    raw: &Value,
    truthy: &[String],
    falsy: &[String],
) -> std::result::Result<Native, String> {
    let text = match raw {
        Value::Bool(b) => return Ok(Native::Bool(*b)),
        Value::Number(n) => {
            return Ok(Native::Bool(n.as_f64().map_or(false, |f| f != 0.0)));
        }
        Value::String(s) if s.is_empty() => return Ok(Native::Bool(false)),
        Value::String(s) => s.as_str(),
        _ => return Err(invalid("boolean")),
    };
    if falsy.iter().any(|f| f == text) {
        Ok(Native::Bool(false))
    } else if truthy.is_empty() || truthy.iter().any(|t| t == text) {
        Ok(Native::Bool(true))
    } else {
        Err(format!("{:?} is not in {:?} nor {:?}.", text, truthy, falsy))
    }
}

const INVALID_DECIMAL: &str = "Invalid Fixed precision number.";

// Floats convert through their exact binary value, so 2.675 is 2.67499...
fn float_decimal(f: f64) -> std::result::Result<Decimal, String> {
    if !f.is_finite() {
        return Err(INVALID_DECIMAL.to_string());
    }
    Decimal::from_f64_retain(f).ok_or_else(|| INVALID_DECIMAL.to_string())
}

// Decimal strings are taken exactly; exponent notation is accepted.
fn parse_decimal(s: &str) -> std::result::Result<Decimal, String> {
    let s = s.trim();
    Decimal::from_str(s)
        .or_else(|_| Decimal::from_scientific(s))
        .or_else(|_| parse_float(s).and_then(float_decimal))
        .map_err(|_| invalid("number"))
}

fn native_decimal(value: &Native) -> std::result::Result<Decimal, String> {
    match value {
        Native::Int(i) => Ok(Decimal::from(*i)),
        Native::Float(f) => float_decimal(*f),
        Native::Str(s) => parse_decimal(s),
        _ => Err(invalid("number")),
    }
}

fn raw_decimal(raw: &Value) -> std::result::Result<Decimal, String> {
    match raw {
        Value::Number(n) => match n.as_i64() {
            Some(i) => Ok(Decimal::from(i)),
            None => n.as_f64().ok_or_else(|| invalid("number")).and_then(float_decimal),
        },
        Value::String(s) => parse_decimal(s),
        _ => Err(invalid("number")),
    }
}

/// Round half to even at `decimals` places and render with exactly that many
fn fixed(value: Decimal, decimals: u32) -> std::result::Result<String, String> {
    if decimals > MAX_DECIMALS {
        return Err(INVALID_DECIMAL.to_string());
    }
    let rounded = value.round_dp_with_strategy(decimals, RoundingStrategy::MidpointNearestEven);
    Ok(format!("{:.*}", decimals as usize, rounded))
}

fn arbitrary(value: Decimal) -> String {
    value.normalize().to_string()
}

/// Replace `{attr}` placeholders with attributes of `source`; `{{`/`}}` escape
fn interpolate(template: &str, source: &dyn Source) -> std::result::Result<String, String> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut key = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(ch) => key.push(ch),
                        None => return Err(format!("Unterminated placeholder in {:?}.", template)),
                    }
                }
                let key = key.trim();
                let value = source
                    .attribute(key)
                    .ok_or_else(|| format!("Cannot format: attribute {:?} is missing.", key))?;
                out.push_str(&display_scalar(&value));
            }
            other => out.push(other),
        }
    }
    Ok(out)
}

/// Ordered, uniquely named fields of one schema definition
#[derive(Debug, Clone, Default)]
pub struct FieldRegistry {
    fields: IndexMap<String, Field>,
}

impl FieldRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field; names must be unique
    pub fn register(&mut self, field: Field) -> Result<()> {
        if self.fields.contains_key(field.name()) {
            return Err(SchemaError::DuplicateField(field.name().to_string()));
        }
        self.fields.insert(field.name().to_string(), field);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Field> {
        self.fields.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Field> {
        self.fields.values()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}
