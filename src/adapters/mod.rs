// Adapters layer: concrete validators for schema type tags, and invokers that
// call into command-line programs or in-process functions.

pub mod bytes;
pub mod command;
pub mod function;
pub mod json;
pub mod table;

pub use bytes::{BytesSchema, BytesValidator};
pub use command::{CommandInvoker, CommandSpec};
pub use function::FnInvoker;
pub use json::{JsonKind, JsonSchema, JsonValidator};
pub use table::{TableSchema, TableValidator};
