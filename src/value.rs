//! Native value model
//!
//! [`Native`] is the in-memory side of a conversion: dump reads it from a
//! [`Source`], load produces it. Primitive data on the other side is plain
//! `serde_json::Value`.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, Utc};
use indexmap::IndexMap;
use serde_json::Value;
use uuid::Uuid;

/// Ordered attribute map produced by load and accepted by dump
pub type NativeMap = IndexMap<String, Native>;

/// Attribute access on a native object.
///
/// Dict-shaped objects (maps) look attributes up by key; caller types
/// implement the trait to expose their fields by name. `None` means the
/// attribute is absent, which is distinct from `Some(Native::Null)`.
pub trait Source: Send + Sync {
    fn attribute(&self, name: &str) -> Option<Native>;
}

/// A dynamically typed native value
#[derive(Clone)]
pub enum Native {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Uuid(Uuid),
    DateTime(DateTime<FixedOffset>),
    Date(NaiveDate),
    Time(NaiveTime),
    Duration(chrono::Duration),
    List(Vec<Native>),
    Map(NativeMap),
    /// An attribute-shaped caller object
    Object(Arc<dyn Source>),
}

impl Native {
    /// Wrap a caller object so it can sit inside another native value
    pub fn object(source: impl Source + 'static) -> Self {
        Native::Object(Arc::new(source))
    }

    /// Build a map value from `(key, value)` pairs
    pub fn map<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<Native>,
        I: IntoIterator<Item = (K, V)>,
    {
        Native::Map(pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Native::Null)
    }

    /// Short type name used in error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Native::Null => "null",
            Native::Bool(_) => "boolean",
            Native::Int(_) => "integer",
            Native::Float(_) => "float",
            Native::Str(_) => "string",
            Native::Uuid(_) => "uuid",
            Native::DateTime(_) => "datetime",
            Native::Date(_) => "date",
            Native::Time(_) => "time",
            Native::Duration(_) => "timedelta",
            Native::List(_) => "list",
            Native::Map(_) => "map",
            Native::Object(_) => "object",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Native::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Native::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Native::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric view; integers widen to `f64`
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Native::Int(i) => Some(*i as f64),
            Native::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Native]> {
        match self {
            Native::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&NativeMap> {
        match self {
            Native::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Look up a key on a map value (not on objects)
    pub fn get(&self, key: &str) -> Option<&Native> {
        self.as_map().and_then(|m| m.get(key))
    }

    /// Length of strings (in chars), lists and maps
    pub fn len(&self) -> Option<usize> {
        match self {
            Native::Str(s) => Some(s.chars().count()),
            Native::List(items) => Some(items.len()),
            Native::Map(map) => Some(map.len()),
            _ => None,
        }
    }

    /// Schema-free conversion to a primitive value.
    ///
    /// Temporal values use ISO 8601, durations become seconds. Caller
    /// objects have no schema-free representation.
    pub fn to_primitive(&self) -> Result<Value, String> {
        Ok(match self {
            Native::Null => Value::Null,
            Native::Bool(b) => Value::Bool(*b),
            Native::Int(i) => Value::from(*i),
            Native::Float(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .ok_or_else(|| format!("{} is not a finite number.", f))?,
            Native::Str(s) => Value::String(s.clone()),
            Native::Uuid(u) => Value::String(u.to_string()),
            Native::DateTime(dt) => Value::String(dt.to_rfc3339()),
            Native::Date(d) => Value::String(d.format("%Y-%m-%d").to_string()),
            Native::Time(t) => Value::String(t.format("%H:%M:%S%.f").to_string()),
            Native::Duration(d) => Value::from(duration_seconds(d)),
            Native::List(items) => Value::Array(
                items
                    .iter()
                    .map(Native::to_primitive)
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            Native::Map(map) => {
                let mut out = serde_json::Map::with_capacity(map.len());
                for (k, v) in map {
                    out.insert(k.clone(), v.to_primitive()?);
                }
                Value::Object(out)
            }
            Native::Object(_) => {
                return Err("Object values need a nested schema to be serialized.".to_string())
            }
        })
    }
}

/// Total seconds of a duration, keeping sub-second precision
pub(crate) fn duration_seconds(d: &chrono::Duration) -> f64 {
    match d.num_microseconds() {
        Some(us) => us as f64 / 1_000_000.0,
        None => d.num_milliseconds() as f64 / 1_000.0,
    }
}

impl fmt::Debug for Native {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Native::Null => write!(f, "Null"),
            Native::Bool(b) => write!(f, "Bool({})", b),
            Native::Int(i) => write!(f, "Int({})", i),
            Native::Float(x) => write!(f, "Float({})", x),
            Native::Str(s) => write!(f, "Str({:?})", s),
            Native::Uuid(u) => write!(f, "Uuid({})", u),
            Native::DateTime(dt) => write!(f, "DateTime({})", dt.to_rfc3339()),
            Native::Date(d) => write!(f, "Date({})", d),
            Native::Time(t) => write!(f, "Time({})", t),
            Native::Duration(d) => write!(f, "Duration({}s)", duration_seconds(d)),
            Native::List(items) => f.debug_list().entries(items).finish(),
            Native::Map(map) => f.debug_map().entries(map).finish(),
            Native::Object(obj) => write!(f, "Object({:p})", Arc::as_ptr(obj)),
        }
    }
}

impl PartialEq for Native {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Native::Null, Native::Null) => true,
            (Native::Bool(a), Native::Bool(b)) => a == b,
            (Native::Int(a), Native::Int(b)) => a == b,
            (Native::Float(a), Native::Float(b)) => a == b,
            (Native::Str(a), Native::Str(b)) => a == b,
            (Native::Uuid(a), Native::Uuid(b)) => a == b,
            (Native::DateTime(a), Native::DateTime(b)) => a == b,
            (Native::Date(a), Native::Date(b)) => a == b,
            (Native::Time(a), Native::Time(b)) => a == b,
            (Native::Duration(a), Native::Duration(b)) => a == b,
            (Native::List(a), Native::List(b)) => a == b,
            (Native::Map(a), Native::Map(b)) => a == b,
            // Objects carry no structural equality
            (Native::Object(a), Native::Object(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl From<Value> for Native {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Native::Null,
            Value::Bool(b) => Native::Bool(b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Native::Int(i),
                None => Native::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => Native::Str(s),
            Value::Array(items) => Native::List(items.into_iter().map(Native::from).collect()),
            Value::Object(map) => {
                Native::Map(map.into_iter().map(|(k, v)| (k, Native::from(v))).collect())
            }
        }
    }
}

impl From<&Value> for Native {
    fn from(value: &Value) -> Self {
        Native::from(value.clone())
    }
}

macro_rules! native_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Native {
                fn from(v: $ty) -> Self {
                    Native::$variant(v.into())
                }
            }
        )*
    };
}

native_from! {
    bool => Bool,
    i8 => Int,
    i16 => Int,
    i32 => Int,
    i64 => Int,
    u8 => Int,
    u16 => Int,
    u32 => Int,
    f32 => Float,
    f64 => Float,
    String => Str,
    &str => Str,
    Uuid => Uuid,
    DateTime<FixedOffset> => DateTime,
    NaiveDate => Date,
    NaiveTime => Time,
    chrono::Duration => Duration,
    NativeMap => Map,
}

impl From<DateTime<Utc>> for Native {
    fn from(dt: DateTime<Utc>) -> Self {
        Native::DateTime(dt.fixed_offset())
    }
}

impl<T: Into<Native>> From<Vec<T>> for Native {
    fn from(items: Vec<T>) -> Self {
        Native::List(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Native>> From<Option<T>> for Native {
    fn from(opt: Option<T>) -> Self {
        opt.map(Into::into).unwrap_or(Native::Null)
    }
}

impl Source for Native {
    fn attribute(&self, name: &str) -> Option<Native> {
        match self {
            Native::Map(map) => map.get(name).cloned(),
            Native::Object(obj) => obj.attribute(name),
            _ => None,
        }
    }
}

impl Source for NativeMap {
    fn attribute(&self, name: &str) -> Option<Native> {
        self.get(name).cloned()
    }
}

impl Source for HashMap<String, Native> {
    fn attribute(&self, name: &str) -> Option<Native> {
        self.get(name).cloned()
    }
}

impl Source for serde_json::Map<String, Value> {
    fn attribute(&self, name: &str) -> Option<Native> {
        self.get(name).map(Native::from)
    }
}

impl<T: Source + ?Sized> Source for &T {
    fn attribute(&self, name: &str) -> Option<Native> {
        (**self).attribute(name)
    }
}

impl<T: Source + ?Sized> Source for Arc<T> {
    fn attribute(&self, name: &str) -> Option<Native> {
        (**self).attribute(name)
    }
}

impl<T: Source + ?Sized> Source for Box<T> {
    fn attribute(&self, name: &str) -> Option<Native> {
        (**self).attribute(name)
    }
}
