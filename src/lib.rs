//! Familiar Marshal
//!
//! Declarative schemas that convert between typed in-memory objects and
//! primitive mappings (`serde_json::Value`), validating every field and
//! collecting all failures into one error tree instead of stopping at the
//! first.
//!
//! ## Features
//!
//! - **Dump**: native object → primitive mapping
//! - **Load**: primitive mapping → validated native values
//! - **Error trees**: failures keyed by field path, nested and indexed
//! - **Nested schemas**: by definition, by registry name or self-referential
//! - **Collections**: `many` for top-level and nested sequences
//! - **Partial loads**: exempt some or all fields from required checks
//! - **Strict mode**: a non-empty error report becomes an `Err`
//!
//! ## Architecture
//!
//! ```text
//! SchemaBuilder ──build──▶ Arc<SchemaDef> ──register──▶ SchemaRegistry
//!                              │  FieldRegistry + SchemaOpts + hooks
//!                              ▼
//!                           Schema (only / exclude / strict / context)
//!                            │                        │
//!                     dump   ▼                 load   ▼
//!                       Marshaller              Unmarshaller
//!                            │                        │
//!                            ▼                        ▼
//!                      MarshalResult          UnmarshalResult
//!                     (Value, ErrorTree)     (Native, ErrorTree)
//! ```

pub mod config;
pub mod dates;
pub mod error;
pub mod field;
pub mod fingerprint;
pub mod marshal;
pub mod options;
pub mod registry;
pub mod result;
pub mod schema;
pub mod tree;
pub mod unmarshal;
pub mod validate;
pub mod value;

pub use config::MarshalConfig;
pub use dates::DateFormat;
pub use error::{Result, SchemaError};
pub use field::{Context, Field, FieldKind, FieldRegistry, SchemaRef};
pub use fingerprint::Fingerprint;
pub use marshal::Marshaller;
pub use options::{SchemaOpts, UnknownPolicy};
pub use registry::SchemaRegistry;
pub use result::{MarshalResult, Outcome, UnmarshalResult};
pub use schema::{LoadArgs, Schema, SchemaBuilder, SchemaDef};
pub use tree::{ErrorKey, ErrorNode, ErrorTree};
pub use unmarshal::{Partial, Unmarshaller};
pub use validate::Validator;
pub use value::{Native, NativeMap, Source};
