use crate::domain::model::{Method, Resource, Schema, Value, Values};
use crate::utils::error::Result;
use async_trait::async_trait;

/// Interprets the payload of one schema type tag.
///
/// Handle references never reach a validator: the registry resolves them to
/// the stored [`Value`] and calls [`Validator::normalize`] instead of `decode`.
pub trait Validator: Send + Sync {
    /// Reads an inline or file resource into a native value, failing with
    /// `SchemaMismatch` when it does not have the declared shape.
    fn decode(&self, schema: &Schema, resource: &Resource) -> Result<Value>;

    /// Checks a value that is already in native form.
    fn check(&self, schema: &Schema, value: &Value) -> Result<()>;

    /// Checks a native value and returns it in the form `decode` would have
    /// produced.
    fn normalize(&self, schema: &Schema, value: &Value) -> Result<Value> {
        self.check(schema, value)?;
        Ok(value.clone())
    }

    /// Writes `value` out as a resource. A file destination is written in
    /// place; otherwise the value is returned inline.
    fn encode(&self, schema: &Schema, value: &Value, destination: Option<&Resource>)
        -> Result<Resource>;

    /// Format tag used when the caller gives no destination.
    fn default_format(&self) -> &str;
}

/// One call into a wrapped model, with sources already validated.
#[derive(Debug, Clone)]
pub struct Invocation<'a> {
    pub class_name: &'a str,
    pub method: &'a Method,
    pub sources: Values,
}

/// Performs the actual call into a program or library function.
#[async_trait]
pub trait Invoker: Send + Sync {
    async fn invoke(&self, invocation: Invocation<'_>) -> Result<Values>;
}
