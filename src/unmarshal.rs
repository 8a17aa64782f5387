//! Unmarshaller: primitive mapping → validated native values

use std::borrow::Cow;
use std::collections::HashSet;
use std::sync::Arc;

use serde_json::Value;

use crate::dates::DateFormat;
use crate::error::Result;
use crate::field::{Field, Nested, Slot};
use crate::options::UnknownPolicy;
use crate::schema::SchemaDef;
use crate::tree::{ErrorTree, SCHEMA_KEY};
use crate::value::{Native, NativeMap};

pub const INVALID_INPUT_MESSAGE: &str = "Invalid input type.";
pub const UNKNOWN_FIELD_MESSAGE: &str = "Unknown field.";

/// Which absent fields are exempt from required checks.
///
/// `Fields` names may be dotted (`"address.zip"`) to reach into nested
/// schemas; `All` applies at every depth.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Partial {
    #[default]
    Off,
    All,
    Fields(HashSet<String>),
}

impl Partial {
    /// Whether an absent `name` skips its required check
    pub fn exempts(&self, name: &str) -> bool {
        match self {
            Partial::Off => false,
            Partial::All => true,
            Partial::Fields(names) => names.contains(name),
        }
    }

    /// The partial setting seen by the nested schema under `name`
    pub fn descend(&self, name: &str) -> Partial {
        match self {
            Partial::Off => Partial::Off,
            Partial::All => Partial::All,
            Partial::Fields(names) => {
                let prefix = format!("{}.", name);
                let inner: HashSet<String> = names
                    .iter()
                    .filter_map(|n| n.strip_prefix(&prefix))
                    .map(str::to_string)
                    .collect();
                if inner.is_empty() {
                    Partial::Off
                } else {
                    Partial::Fields(inner)
                }
            }
        }
    }
}

impl From<bool> for Partial {
    fn from(all: bool) -> Self {
        if all {
            Partial::All
        } else {
            Partial::Off
        }
    }
}

impl<S: Into<String>> FromIterator<S> for Partial {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Partial::Fields(iter.into_iter().map(Into::into).collect())
    }
}

impl<S: Into<String>, const N: usize> From<[S; N]> for Partial {
    fn from(names: [S; N]) -> Self {
        names.into_iter().collect()
    }
}

impl<S: Into<String>> From<Vec<S>> for Partial {
    fn from(names: Vec<S>) -> Self {
        names.into_iter().collect()
    }
}

/// Walks the active fields of one definition against input mappings.
pub struct Unmarshaller<'a> {
    def: &'a Arc<SchemaDef>,
    fields: Vec<&'a Field>,
    partial: Partial,
    abort_on_unknown: bool,
}

impl<'a> Unmarshaller<'a> {
    pub(crate) fn new(def: &'a Arc<SchemaDef>, fields: Vec<&'a Field>, partial: Partial) -> Self {
        Self {
            def,
            fields,
            partial,
            abort_on_unknown: false,
        }
    }

    /// Stop before the field walk when `raise` finds unknown keys
    pub(crate) fn abort_on_unknown(mut self, abort: bool) -> Self {
        self.abort_on_unknown = abort;
        self
    }

    pub(crate) fn dateformat(&self) -> &DateFormat {
        &self.def.opts().dateformat
    }

    /// Deserialize one mapping
    pub fn deserialize(&self, data: &Value) -> Result<(Native, ErrorTree)> {
        let mut out = NativeMap::new();
        let mut errors = ErrorTree::new();

        let map = match data {
            Value::Object(map) => map,
            _ => {
                errors.add_message(SCHEMA_KEY, INVALID_INPUT_MESSAGE);
                return Ok((Native::Map(out), errors));
            }
        };
        let input = match &self.def.hooks().pre_load {
            Some(hook) => Cow::Owned(hook(map.clone())),
            None => Cow::Borrowed(map),
        };

        let known: HashSet<&str> = self
            .fields
            .iter()
            .filter(|f| !f.is_dump_only())
            .map(|f| f.name())
            .collect();
        let unknown: Vec<(&String, &Value)> = input
            .iter()
            .filter(|(key, _)| !known.contains(key.as_str()))
            .collect();

        if self.def.opts().unknown == UnknownPolicy::Raise {
            for (key, _) in &unknown {
                errors.add_message(key.as_str(), UNKNOWN_FIELD_MESSAGE);
            }
            if self.abort_on_unknown && !errors.is_empty() {
                tracing::debug!(
                    schema = %self.def.name(),
                    unknown = unknown.len(),
                    "aborting on unknown fields"
                );
                return Ok((Native::Map(out), errors));
            }
        }

        for field in &self.fields {
            if field.is_dump_only() {
                continue;
            }
            let raw = input.get(field.name());
            if raw.is_none() && self.partial.exempts(field.name()) {
                continue;
            }
            let slot = field.deserialize(raw, self, &self.partial.descend(field.name()))?;
            if let Some(node) = slot.errors {
                tracing::trace!(schema = %self.def.name(), field = %field.name(), "load error");
                errors.insert(field.name(), node);
            }
            if let Some(value) = slot.value {
                out.insert(field.attribute_name().to_string(), value);
            }
        }

        if self.def.opts().unknown == UnknownPolicy::Include {
            for (key, value) in unknown {
                out.entry(key.clone()).or_insert_with(|| Native::from(value));
            }
        }
        if let Some(hook) = &self.def.hooks().post_load {
            out = hook(out);
        }
        Ok((Native::Map(out), errors))
    }

    /// Deserialize a sequence of mappings; errors are keyed by element index
    pub fn deserialize_many(&self, data: &Value) -> Result<(Native, ErrorTree)> {
        match data {
            Value::Array(items) => self.deserialize_each(items),
            _ => {
                let mut errors = ErrorTree::new();
                errors.add_message(SCHEMA_KEY, INVALID_INPUT_MESSAGE);
                Ok((Native::List(Vec::new()), errors))
            }
        }
    }

    fn deserialize_each(&self, items: &[Value]) -> Result<(Native, ErrorTree)> {
        let mut out = Vec::with_capacity(items.len());
        let mut errors = ErrorTree::new();
        for (idx, item) in items.iter().enumerate() {
            let (data, item_errors) = self.deserialize(item)?;
            errors.insert(idx, item_errors.into());
            out.push(data);
        }
        Ok((Native::List(out), errors))
    }

    /// Load a nested value with the nested definition's own unmarshaller.
    ///
    /// A plucked field takes bare values, wrapped back into one-key
    /// mappings before the nested load.
    pub(crate) fn load_nested(
        &self,
        nested: &Nested,
        raw: &Value,
        partial: &Partial,
    ) -> Result<Slot<Native>> {
        let def = nested.resolve(self.def)?;
        let fields = def.select(nested.only(), nested.exclude())?;
        let child = Unmarshaller::new(&def, fields, partial.clone());

        let unplucked;
        let raw = match nested.plucked() {
            Some(key) => {
                unplucked = match raw {
                    Value::Array(items) if nested.is_many() => {
                        Value::Array(items.iter().map(|item| unpluck(key, item)).collect())
                    }
                    other => unpluck(key, other),
                };
                &unplucked
            }
            None => raw,
        };

        let (data, errors) = if nested.is_many() {
            match raw {
                Value::Array(items) => child.deserialize_each(items)?,
                _ => return Ok(Slot::fail("Not a valid list.")),
            }
        } else {
            child.deserialize(raw)?
        };
        Ok(Slot::with_tree(data, errors))
    }
}

fn unpluck(key: &str, value: &Value) -> Value {
    let mut map = serde_json::Map::new();
    map.insert(key.to_string(), value.clone());
    Value::Object(map)
}
