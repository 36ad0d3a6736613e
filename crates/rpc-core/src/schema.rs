//! Input/event validation (spec §3/§4.2). A `Schema<T>` turns a raw
//! `serde_json::Value` into a concrete `T`, or a `SchemaMismatch` the
//! router/event-emitter turns into the right rejection.

use rpc_protocol::RpcError;
use serde::de::DeserializeOwned;
use std::marker::PhantomData;
use std::sync::Arc;

pub trait Schema<T>: Send + Sync {
    fn parse(&self, value: serde_json::Value) -> Result<T, RpcError>;
}

/// The default schema: plain `serde::Deserialize`. Covers the common case
/// where a procedure's input type already derives `Deserialize`.
pub struct SerdeSchema<T>(PhantomData<fn() -> T>);

impl<T> SerdeSchema<T> {
    pub fn new() -> Self {
        SerdeSchema(PhantomData)
    }
}

impl<T> Default for SerdeSchema<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: DeserializeOwned + Send + Sync> Schema<T> for SerdeSchema<T> {
    fn parse(&self, value: serde_json::Value) -> Result<T, RpcError> {
        serde_json::from_value(value).map_err(|e| RpcError::SchemaMismatch(e.to_string()))
    }
}

pub fn serde_schema<T: DeserializeOwned + Send + Sync + 'static>() -> Arc<dyn Schema<T>> {
    Arc::new(SerdeSchema::<T>::new())
}

/// A validator that only checks shape, used for WS incoming/outgoing
/// payloads where the emitter never needs the concrete Rust type (spec
/// §4.2's "incoming"/"outgoing" schema slots).
pub trait ValueValidator: Send + Sync {
    fn validate(&self, value: &serde_json::Value) -> Result<(), RpcError>;
}

impl<F> ValueValidator for F
where
    F: Fn(&serde_json::Value) -> Result<(), RpcError> + Send + Sync,
{
    fn validate(&self, value: &serde_json::Value) -> Result<(), RpcError> {
        self(value)
    }
}

/// Adapts any typed `Schema<T>` into a shape-only `ValueValidator` by
/// parsing and discarding the result.
pub struct SchemaValidator<T> {
    schema: Arc<dyn Schema<T>>,
}

impl<T> SchemaValidator<T> {
    pub fn new(schema: Arc<dyn Schema<T>>) -> Self {
        SchemaValidator { schema }
    }
}

impl<T: Send + Sync> ValueValidator for SchemaValidator<T> {
    fn validate(&self, value: &serde_json::Value) -> Result<(), RpcError> {
        self.schema.parse(value.clone()).map(|_| ())
    }
}
