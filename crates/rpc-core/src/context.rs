//! Middleware chain support (spec §4.4). Rust has no mutable "augment c"
//! object the way a dynamic host does, so the accumulated key/value bag a
//! chain of middleware builds up is modelled on `http::Extensions` — the
//! same type-keyed bag axum itself threads through a request.

use crate::support::BoxFuture;
use http::{HeaderMap, Method};
use rpc_protocol::RpcError;
use std::sync::Arc;

/// The per-request facts middleware can inspect. Owned rather than
/// borrowed so a middleware closure doesn't need a lifetime parameter.
#[derive(Clone, Debug)]
pub struct RequestMeta {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
}

/// The accumulated context a middleware chain builds up, handed to the
/// final handler. Each middleware receives the previous step's context and
/// returns the next one — inserting into it is how a middleware's "patch"
/// is merged (spec invariant: patches merge left to right).
#[derive(Default)]
pub struct MiddlewareContext {
    extensions: http::Extensions,
}

impl MiddlewareContext {
    pub fn new() -> Self {
        MiddlewareContext::default()
    }

    pub fn get<T: Clone + Send + Sync + 'static>(&self) -> Option<&T> {
        self.extensions.get::<T>()
    }

    pub fn insert<T: Send + Sync + 'static>(&mut self, value: T) -> &mut Self {
        self.extensions.insert(value);
        self
    }
}

/// Marker inserted by the router's implicit leading middleware (spec
/// invariant: "the chain always contains an implicit leading codec
/// middleware"). Its presence is what a handler could check to confirm
/// the tagged-JSON codec ran upstream of it.
#[derive(Clone, Copy, Debug)]
pub struct CodecActive;

pub type MiddlewareFut = BoxFuture<'static, Result<MiddlewareContext, RpcError>>;

pub trait Middleware: Send + Sync + 'static {
    fn call(&self, ctx: MiddlewareContext, req: RequestMeta) -> MiddlewareFut;
}

impl<F, Fut> Middleware for F
where
    F: Fn(MiddlewareContext, RequestMeta) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<MiddlewareContext, RpcError>> + Send + 'static,
{
    fn call(&self, ctx: MiddlewareContext, req: RequestMeta) -> MiddlewareFut {
        Box::pin(self(ctx, req))
    }
}

/// Runs a chain of middleware in order, starting from the implicit codec
/// step, each one handed the previous one's context.
pub async fn run_chain(
    chain: &[Arc<dyn Middleware>],
    req: RequestMeta,
) -> Result<MiddlewareContext, RpcError> {
    let mut ctx = MiddlewareContext::new();
    ctx.insert(CodecActive);
    for middleware in chain {
        ctx = middleware.call(ctx, req.clone()).await?;
    }
    Ok(ctx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone)]
    struct UserId(u64);

    fn sample_req() -> RequestMeta {
        RequestMeta {
            method: Method::GET,
            path: "/x".into(),
            headers: HeaderMap::new(),
        }
    }

    #[tokio::test]
    async fn chain_runs_in_declaration_order_and_merges_patches() {
        let order = Arc::new(std::sync::Mutex::new(Vec::<&'static str>::new()));
        let o1 = order.clone();
        let o2 = order.clone();
        let chain: Vec<Arc<dyn Middleware>> = vec![
            Arc::new(move |mut ctx: MiddlewareContext, _req: RequestMeta| {
                let o1 = o1.clone();
                async move {
                    o1.lock().unwrap().push("first");
                    ctx.insert(UserId(7));
                    Ok(ctx)
                }
            }),
            Arc::new(move |ctx: MiddlewareContext, _req: RequestMeta| {
                let o2 = o2.clone();
                async move {
                    o2.lock().unwrap().push("second");
                    Ok(ctx)
                }
            }),
        ];
        let ctx = run_chain(&chain, sample_req()).await.unwrap();
        assert_eq!(*order.lock().unwrap(), vec!["first", "second"]);
        assert_eq!(ctx.get::<UserId>().unwrap().0, 7);
        assert!(ctx.get::<CodecActive>().is_some());
    }

    #[tokio::test]
    async fn a_failing_middleware_stops_the_chain() {
        let chain: Vec<Arc<dyn Middleware>> = vec![Arc::new(
            |_ctx: MiddlewareContext, _req: RequestMeta| async {
                Err(RpcError::SchemaMismatch("nope".into()))
            },
        )];
        assert!(run_chain(&chain, sample_req()).await.is_err());
    }
}
