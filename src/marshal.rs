//! Marshaller: native object → primitive mapping

use std::sync::Arc;

use serde_json::{Map, Value};

use crate::dates::DateFormat;
use crate::error::Result;
use crate::field::{Context, Field, Nested, Slot};
use crate::schema::SchemaDef;
use crate::tree::ErrorTree;
use crate::value::{Native, Source};

/// Walks the active fields of one definition against source objects.
///
/// Dump never reports unknown attributes; field failures are collected by
/// output key and the walk continues.
pub struct Marshaller<'a> {
    def: &'a Arc<SchemaDef>,
    fields: Vec<&'a Field>,
    context: &'a Context,
    prefix: &'a str,
}

impl<'a> Marshaller<'a> {
    pub(crate) fn new(
        def: &'a Arc<SchemaDef>,
        fields: Vec<&'a Field>,
        context: &'a Context,
    ) -> Self {
        Self {
            def,
            fields,
            context,
            prefix: "",
        }
    }

    /// Prepended to every output key
    pub(crate) fn prefix(mut self, prefix: &'a str) -> Self {
        self.prefix = prefix;
        self
    }

    pub(crate) fn context(&self) -> &Context {
        self.context
    }

    pub(crate) fn dateformat(&self) -> &DateFormat {
        &self.def.opts().dateformat
    }

    /// Serialize one object into a mapping
    pub fn serialize(&self, obj: &dyn Source) -> Result<(Value, ErrorTree)> {
        let mut out = Map::new();
        let mut errors = ErrorTree::new();
        for field in &self.fields {
            if field.is_load_only() {
                continue;
            }
            let key = format!("{}{}", self.prefix, field.name());
            let slot = field.serialize(obj, self)?;
            if let Some(node) = slot.errors {
                tracing::trace!(schema = %self.def.name(), field = %key, "dump error");
                errors.insert(key.as_str(), node);
            }
            if let Some(value) = slot.value {
                out.insert(key, value);
            }
        }
        if !self.def.opts().ordered {
            out = sorted(out);
        }
        if let Some(hook) = &self.def.hooks().post_dump {
            out = hook(out);
        }
        Ok((Value::Object(out), errors))
    }

    /// Serialize a sequence; errors are keyed by element index
    pub fn serialize_each<'s, I>(&self, items: I) -> Result<(Value, ErrorTree)>
    where
        I: IntoIterator<Item = &'s dyn Source>,
    {
        let mut out = Vec::new();
        let mut errors = ErrorTree::new();
        for (idx, item) in items.into_iter().enumerate() {
            let (data, item_errors) = self.serialize(item)?;
            errors.insert(idx, item_errors.into());
            out.push(data);
        }
        Ok((Value::Array(out), errors))
    }

    /// Dump a nested value with the nested definition's own marshaller
    pub(crate) fn dump_nested(&self, nested: &Nested, value: &Native) -> Result<Slot<Value>> {
        let def = nested.resolve(self.def)?;
        let fields = def.select(nested.only(), nested.exclude())?;
        let child = Marshaller::new(&def, fields, self.context);

        if nested.is_many() {
            let items = match value.as_list() {
                Some(items) => items,
                None => return Ok(Slot::fail("Not a valid list.")),
            };
            let (data, errors) = child.serialize_each(items.iter().map(|i| i as &dyn Source))?;
            let data = match (nested.plucked(), data) {
                (Some(key), Value::Array(items)) => {
                    Value::Array(items.into_iter().map(|item| pluck(item, key)).collect())
                }
                (_, data) => data,
            };
            return Ok(Slot::with_tree(data, errors));
        }

        match value {
            Native::Map(_) | Native::Object(_) => {
                let (data, errors) = child.serialize(value)?;
                let data = match nested.plucked() {
                    Some(key) => pluck(data, key),
                    None => data,
                };
                Ok(Slot::with_tree(data, errors))
            }
            other => Ok(Slot::fail(format!(
                "Cannot serialize {} as a nested object.",
                other.type_name()
            ))),
        }
    }
}

// Null when the plucked field was omitted.
fn pluck(mut data: Value, key: &str) -> Value {
    data.as_object_mut()
        .and_then(|map| map.remove(key))
        .unwrap_or(Value::Null)
}

fn sorted(map: Map<String, Value>) -> Map<String, Value> {
    let mut entries: Vec<_> = map.into_iter().collect();
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    entries.into_iter().collect()
}
