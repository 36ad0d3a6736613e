//! The procedure builder (spec C7): an immutable, chainable descriptor that
//! is finalized into a type-erased route the router can dispatch without
//! knowing the concrete input/output types.

use crate::context::{run_chain, Middleware, RequestMeta};
use crate::schema::Schema;
use crate::server_socket::ServerSocket;
use crate::support::BoxFuture;
use rpc_protocol::{RichValue, RpcError};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;

/// What kind of transport a finalized procedure answers on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Kind {
    Get,
    Post,
    Ws,
}

/// Metadata the router exposes for introspection (`Router::procedures`).
#[derive(Clone, Debug)]
pub struct ProcedureMeta {
    pub path: String,
    pub kind: Kind,
    pub description: Option<String>,
}

/// Wraps any `Serialize` type to select a plain-JSON handler response,
/// distinguishing it from `()` (empty success) and `RichValue` (explicit
/// tagged response) without an overlapping blanket impl.
pub struct Json<T>(pub T);

pub enum HandlerBody {
    Empty,
    Json(serde_json::Value),
    Rich(RichValue),
}

pub trait IntoHandlerBody {
    fn into_handler_body(self) -> HandlerBody;
}

impl IntoHandlerBody for () {
    fn into_handler_body(self) -> HandlerBody {
        HandlerBody::Empty
    }
}

impl<T: Serialize> IntoHandlerBody for Json<T> {
    fn into_handler_body(self) -> HandlerBody {
        match serde_json::to_value(self.0) {
            Ok(value) => HandlerBody::Json(value),
            Err(e) => return HandlerBody::Rich(RichValue::String(format!("serialize error: {e}"))),
        }
    }
}

impl IntoHandlerBody for RichValue {
    fn into_handler_body(self) -> HandlerBody {
        HandlerBody::Rich(self)
    }
}

/// Raw fields as they arrive off the wire: each value is a per-field
/// codec-encoded string (spec §4.1/§6), whether it came from a query
/// parameter or a POST body field.
pub type RawFields = std::collections::HashMap<String, String>;

type HttpHandlerFn =
    Arc<dyn Fn(RawFields, RequestMeta) -> BoxFuture<'static, Result<HandlerBody, RpcError>> + Send + Sync>;

/// Hooks returned by a WS connection factory, invoked over the socket's
/// lifetime (spec §4.5).
#[derive(Clone, Default)]
pub struct ConnectionHooks {
    pub on_disconnect: Option<Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>>,
    pub on_error: Option<Arc<dyn Fn(String) -> BoxFuture<'static, ()> + Send + Sync>>,
}

type WsHandlerFn = Arc<dyn Fn(Arc<ServerSocket>) -> BoxFuture<'static, ConnectionHooks> + Send + Sync>;

/// A finalized, type-erased procedure. Stored by the router under its
/// flattened `group/name` key.
#[derive(Clone)]
pub struct Procedure {
    pub(crate) kind: Kind,
    pub(crate) description: Option<String>,
    pub(crate) http: Option<HttpHandlerFn>,
    pub(crate) ws: Option<WsHandlerFn>,
    pub(crate) incoming: Option<Arc<dyn crate::schema::ValueValidator>>,
    pub(crate) outgoing: Option<Arc<dyn crate::schema::ValueValidator>>,
}

impl Procedure {
    pub fn meta(&self, path: impl Into<String>) -> ProcedureMeta {
        ProcedureMeta {
            path: path.into(),
            kind: self.kind,
            description: self.description.clone(),
        }
    }
}

/// A chainable, immutable procedure descriptor (spec §4.4). Each builder
/// method consumes `self` and returns a new value; nothing is mutated
/// in place.
pub struct ProcedureBuilder<In = ()> {
    input: Option<Arc<dyn Schema<In>>>,
    incoming: Option<Arc<dyn crate::schema::ValueValidator>>,
    outgoing: Option<Arc<dyn crate::schema::ValueValidator>>,
    middlewares: Vec<Arc<dyn Middleware>>,
    description: Option<String>,
}

impl ProcedureBuilder<()> {
    pub fn new() -> Self {
        ProcedureBuilder {
            input: None,
            incoming: None,
            outgoing: None,
            middlewares: Vec::new(),
            description: None,
        }
    }
}

impl Default for ProcedureBuilder<()> {
    fn default() -> Self {
        Self::new()
    }
}

impl<In> ProcedureBuilder<In> {
    /// Attaches an input schema for the HTTP body/query (spec §4.2). Only
    /// one input schema is meaningful per procedure, so calling this
    /// again replaces it and changes `In` for the rest of the chain.
    pub fn input<In2>(self, schema: Arc<dyn Schema<In2>>) -> ProcedureBuilder<In2> {
        ProcedureBuilder {
            input: Some(schema),
            incoming: self.incoming,
            outgoing: self.outgoing,
            middlewares: self.middlewares,
            description: self.description,
        }
    }

    /// Attaches a WS incoming-event validator (spec §4.2, ws only).
    pub fn incoming(mut self, validator: Arc<dyn crate::schema::ValueValidator>) -> Self {
        self.incoming = Some(validator);
        self
    }

    /// Attaches a WS outgoing-event validator (spec §4.2, ws only).
    pub fn outgoing(mut self, validator: Arc<dyn crate::schema::ValueValidator>) -> Self {
        self.outgoing = Some(validator);
        self
    }

    pub fn use_mw(mut self, middleware: impl Middleware) -> Self {
        self.middlewares.push(Arc::new(middleware));
        self
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    fn build_http<F, Fut, Out>(self, kind: Kind, handler: F) -> Procedure
    where
        In: 'static,
        F: Fn(In, crate::context::MiddlewareContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Out, RpcError>> + Send + 'static,
        Out: IntoHandlerBody,
    {
        let input_schema = self.input;
        let middlewares = self.middlewares;
        let handler = Arc::new(handler);
        let http: HttpHandlerFn = Arc::new(move |raw, req| {
            let middlewares = middlewares.clone();
            let input_schema = input_schema.clone();
            let handler = handler.clone();
            Box::pin(async move {
                let ctx = run_chain(&middlewares, req).await?;
                let mut fields = serde_json::Map::with_capacity(raw.len());
                for (key, encoded) in raw {
                    let rich = rpc_protocol::codec::decode(&encoded)?;
                    fields.insert(key, rich.into_schema_json());
                }
                let value = serde_json::Value::Object(fields);
                let input = match &input_schema {
                    Some(schema) => schema.parse(value)?,
                    None => serde_json::from_value(serde_json::Value::Object(
                        serde_json::Map::new(),
                    ))
                    .map_err(|e| RpcError::SchemaMismatch(e.to_string()))?,
                };
                let out = handler(input, ctx).await?;
                Ok(out.into_handler_body())
            })
        });
        Procedure {
            kind,
            description: self.description,
            http: Some(http),
            ws: None,
            incoming: None,
            outgoing: None,
        }
    }

    pub fn get<F, Fut, Out>(self, handler: F) -> Procedure
    where
        In: 'static,
        F: Fn(In, crate::context::MiddlewareContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Out, RpcError>> + Send + 'static,
        Out: IntoHandlerBody,
    {
        self.build_http(Kind::Get, handler)
    }

    /// Alias for [`ProcedureBuilder::get`] (spec's query/mutation naming).
    pub fn query<F, Fut, Out>(self, handler: F) -> Procedure
    where
        In: 'static,
        F: Fn(In, crate::context::MiddlewareContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Out, RpcError>> + Send + 'static,
        Out: IntoHandlerBody,
    {
        self.get(handler)
    }

    pub fn post<F, Fut, Out>(self, handler: F) -> Procedure
    where
        In: 'static,
        F: Fn(In, crate::context::MiddlewareContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Out, RpcError>> + Send + 'static,
        Out: IntoHandlerBody,
    {
        self.build_http(Kind::Post, handler)
    }

    pub fn mutation<F, Fut, Out>(self, handler: F) -> Procedure
    where
        In: 'static,
        F: Fn(In, crate::context::MiddlewareContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Out, RpcError>> + Send + 'static,
        Out: IntoHandlerBody,
    {
        self.post(handler)
    }

    /// Finalizes a WS procedure. `factory` acts as the connection's
    /// `onConnect`: it receives the live socket and returns the
    /// lifecycle hooks the router invokes later.
    pub fn ws<F, Fut>(self, factory: F) -> Procedure
    where
        F: Fn(Arc<ServerSocket>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ConnectionHooks> + Send + 'static,
    {
        let factory = Arc::new(factory);
        let ws: WsHandlerFn = Arc::new(move |socket| {
            let factory = factory.clone();
            Box::pin(async move { factory(socket).await })
        });
        Procedure {
            kind: Kind::Ws,
            description: self.description,
            http: None,
            ws: Some(ws),
            incoming: self.incoming,
            outgoing: self.outgoing,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::serde_schema;
    use serde::Deserialize;

    #[derive(Deserialize)]
    struct Echo {
        n: u32,
    }

    #[tokio::test]
    async fn get_procedure_parses_input_and_runs_handler() {
        let proc = ProcedureBuilder::new()
            .input(serde_schema::<Echo>())
            .get(|input: Echo, _ctx| async move { Ok(Json(input.n * 2)) });
        let mut raw = RawFields::new();
        raw.insert(
            "n".into(),
            rpc_protocol::codec::encode(&RichValue::Number(4.0)),
        );
        let req = RequestMeta {
            method: http::Method::GET,
            path: "/echo".into(),
            headers: http::HeaderMap::new(),
        };
        let body = (proc.http.unwrap())(raw, req).await.unwrap();
        match body {
            HandlerBody::Json(v) => assert_eq!(v, serde_json::json!(8)),
            _ => panic!("expected json body"),
        }
    }

    #[tokio::test]
    async fn void_handler_returns_empty_body() {
        let proc = ProcedureBuilder::new().post(|_input: (), _ctx| async move { Ok(()) });
        let req = RequestMeta {
            method: http::Method::POST,
            path: "/noop".into(),
            headers: http::HeaderMap::new(),
        };
        let body = (proc.http.unwrap())(RawFields::new(), req).await.unwrap();
        assert!(matches!(body, HandlerBody::Empty));
    }

    #[tokio::test]
    async fn schema_mismatch_surfaces_as_error() {
        let proc = ProcedureBuilder::new()
            .input(serde_schema::<Echo>())
            .get(|input: Echo, _ctx| async move { Ok(Json(input.n)) });
        let mut raw = RawFields::new();
        raw.insert(
            "n".into(),
            rpc_protocol::codec::encode(&RichValue::String("not-a-number".into())),
        );
        let req = RequestMeta {
            method: http::Method::GET,
            path: "/echo".into(),
            headers: http::HeaderMap::new(),
        };
        let err = (proc.http.unwrap())(raw, req).await.unwrap_err();
        assert!(matches!(err, RpcError::SchemaMismatch(_)));
    }
}
