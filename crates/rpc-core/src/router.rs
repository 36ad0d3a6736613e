//! The router (spec C8): flattened `group/name` dispatch for GET/POST/WS,
//! sub-router mounting with lazy factories, and error bubbling across
//! mount boundaries.
//!
//! The router does its own path matching rather than leaning on axum's
//! nested-router feature: axum's `Router` is immutable once built, which
//! doesn't fit a mount that may still be an unresolved async factory the
//! first time a request arrives. Instead one axum fallback route hands
//! every request to [`Router::dispatch_request`], which matches, resolves
//! mounts (caching after the first load), and re-dispatches with the
//! matched prefix stripped.

use crate::context::RequestMeta;
use crate::defaults::translate_error;
use crate::dynamic_loader::{resolve_module, ModuleFactory};
use crate::event_emitter::RawChannel;
use crate::procedure::{HandlerBody, Kind, Procedure, ProcedureMeta, RawFields};
use crate::pubsub::PubSubAdapter;
use crate::server_socket::ServerSocket;
use crate::support::BoxFuture;
use axum::body::{Body, Bytes};
use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{FromRequestParts, Request};
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use http::{Method, StatusCode};
use http_body_util::BodyExt;
use rpc_protocol::{Frame, HttpError, RpcError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};
use tracing::warn;

type ErrorHook = Arc<dyn Fn(&RpcError) + Send + Sync>;

enum MountTarget {
    Static(Arc<Router>),
    Lazy {
        factory: ModuleFactory,
        cache: OnceCell<Arc<Router>>,
    },
}

impl MountTarget {
    async fn resolve(&self) -> Result<Arc<Router>, RpcError> {
        match self {
            MountTarget::Static(router) => Ok(router.clone()),
            MountTarget::Lazy { factory, cache } => {
                cache
                    .get_or_try_init(|| async {
                        let module = (factory)().await;
                        resolve_module(module)
                    })
                    .await
                    .map(Arc::clone)
            }
        }
    }
}

/// Something that can be mounted under a router: a ready-made sub-router,
/// or an async factory resolved on first use (spec §4.8's "factory" kind).
pub enum Mountable {
    Router(Arc<Router>),
    Factory(ModuleFactory),
}

impl From<Router> for Mountable {
    fn from(router: Router) -> Self {
        Mountable::Router(Arc::new(router))
    }
}

impl From<Arc<Router>> for Mountable {
    fn from(router: Arc<Router>) -> Self {
        Mountable::Router(router)
    }
}

impl From<ModuleFactory> for Mountable {
    fn from(factory: ModuleFactory) -> Self {
        Mountable::Factory(factory)
    }
}

#[derive(Default)]
pub struct Router {
    routes: HashMap<String, Procedure>,
    mounts: HashMap<String, MountTarget>,
    error_handler: Option<ErrorHook>,
}

impl Router {
    pub fn new() -> Self {
        Router::default()
    }

    /// Registers a single flat-keyed procedure (e.g. `"ping"`).
    pub fn route(mut self, name: impl Into<String>, procedure: Procedure) -> Self {
        self.routes.insert(name.into(), procedure);
        self
    }

    /// Registers every entry under `group/name` (e.g. `("users", [("get",
    /// p1), ("list", p2)])` yields `users/get` and `users/list`).
    pub fn group(
        mut self,
        group: impl Into<String>,
        entries: impl IntoIterator<Item = (&'static str, Procedure)>,
    ) -> Self {
        let group = group.into();
        for (name, procedure) in entries {
            self.routes.insert(format!("{group}/{name}"), procedure);
        }
        self
    }

    /// Mounts `target` under `name`. Mount names are a single path
    /// segment: rejecting `/` keeps the two-segment mount key lookup
    /// (`first/second`) unambiguous.
    pub fn mount(
        mut self,
        name: impl Into<String>,
        target: impl Into<Mountable>,
    ) -> Result<Self, RpcError> {
        let name = name.into();
        if name.contains('/') {
            return Err(RpcError::InvalidMountName(name));
        }
        let mount = match target.into() {
            Mountable::Router(router) => MountTarget::Static(router),
            Mountable::Factory(factory) => MountTarget::Lazy {
                factory,
                cache: OnceCell::new(),
            },
        };
        self.mounts.insert(name, mount);
        Ok(self)
    }

    pub fn on_error(mut self, handler: impl Fn(&RpcError) + Send + Sync + 'static) -> Self {
        self.error_handler = Some(Arc::new(handler));
        self
    }

    /// Metadata for every locally-registered procedure (not recursing
    /// into mounts).
    pub fn procedures(&self) -> Vec<ProcedureMeta> {
        self.routes
            .iter()
            .map(|(path, procedure)| procedure.meta(path.clone()))
            .collect()
    }

    fn run_error_hook(&self, err: &RpcError) {
        if let Some(hook) = &self.error_handler {
            hook(err);
        }
    }

    /// Builds the axum router that serves every request through this
    /// router's own dispatch logic (a single fallback route; see the
    /// module doc for why).
    pub fn into_axum_router(self: Arc<Self>, adapter: Arc<dyn PubSubAdapter>) -> axum::Router {
        axum::Router::new().fallback(move |req: Request| {
            let router = self.clone();
            let adapter = adapter.clone();
            async move { router.dispatch_request(req, &adapter).await }
        })
    }

    /// Entry point for one incoming request: matches a local route,
    /// resolves and re-dispatches into a mount, or answers 404.
    pub async fn dispatch_request(
        self: &Arc<Self>,
        req: Request,
        adapter: &Arc<dyn PubSubAdapter>,
    ) -> Response {
        let (mut parts, body) = req.into_parts();
        let path = parts.uri.path().trim_start_matches('/').to_owned();
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let key = segments.join("/");

        if let Some(procedure) = self.routes.get(&key) {
            return self
                .dispatch_local(procedure, &mut parts, body, adapter)
                .await;
        }

        if segments.len() >= 2 {
            let mount_key = format!("{}/{}", segments[0], segments[1]);
            if let Some(mount) = self.mounts.get(&mount_key) {
                let sub_router = match mount.resolve().await {
                    Ok(router) => router,
                    Err(e) => {
                        self.run_error_hook(&e);
                        return translate_error(&e);
                    }
                };
                let remaining = segments[2..].join("/");
                let new_path = format!("/{remaining}");
                parts.uri = match rewrite_uri_path(&parts.uri, &new_path) {
                    Ok(uri) => uri,
                    Err(_) => return StatusCode::BAD_REQUEST.into_response(),
                };
                let rewritten = Request::from_parts(parts, body);
                let response = sub_router.dispatch_request(rewritten, adapter).await;
                return self.bubble_if_error(response).await;
            }
        }

        StatusCode::NOT_FOUND.into_response()
    }

    /// If a mounted sub-router's response is an error, re-raises it at
    /// this level too (spec's error-bubbling guarantee) before forwarding
    /// the same response upward.
    async fn bubble_if_error(&self, response: Response) -> Response {
        if response.status().as_u16() < 400 {
            return response;
        }
        let status = response.status().as_u16();
        let (parts, body) = response.into_parts();
        let message = match body.collect().await {
            Ok(collected) => String::from_utf8_lossy(&collected.to_bytes()).into_owned(),
            Err(_) => String::new(),
        };
        let err = RpcError::Http(HttpError::new(status, message.clone()));
        self.run_error_hook(&err);
        Response::from_parts(parts, Body::from(message))
    }

    async fn dispatch_local(
        self: &Arc<Self>,
        procedure: &Procedure,
        parts: &mut http::request::Parts,
        body: Body,
        adapter: &Arc<dyn PubSubAdapter>,
    ) -> Response {
        match procedure.kind {
            Kind::Ws => self.dispatch_ws(procedure, parts, adapter).await,
            Kind::Get if parts.method == Method::GET => {
                let fields = parts
                    .uri
                    .query()
                    .map(crate::support::parse_query_string)
                    .unwrap_or_default();
                self.dispatch_http(procedure, fields, parts).await
            }
            Kind::Post if parts.method == Method::POST => {
                let fields = match collect_body_fields(body).await {
                    Ok(fields) => fields,
                    Err(e) => {
                        self.run_error_hook(&e);
                        return translate_error(&e);
                    }
                };
                self.dispatch_http(procedure, fields, parts).await
            }
            _ => StatusCode::METHOD_NOT_ALLOWED.into_response(),
        }
    }

    async fn dispatch_http(
        self: &Arc<Self>,
        procedure: &Procedure,
        fields: RawFields,
        parts: &http::request::Parts,
    ) -> Response {
        let req_meta = RequestMeta {
            method: parts.method.clone(),
            path: parts.uri.path().to_owned(),
            headers: parts.headers.clone(),
        };
        let handler = procedure
            .http
            .as_ref()
            .expect("Get/Post procedures always carry an http handler");
        match handler(fields, req_meta).await {
            Ok(HandlerBody::Empty) => StatusCode::NO_CONTENT.into_response(),
            Ok(HandlerBody::Json(value)) => axum::Json(value).into_response(),
            Ok(HandlerBody::Rich(value)) => crate::defaults::rich_response(&value),
            Err(e) => {
                self.run_error_hook(&e);
                translate_error(&e)
            }
        }
    }

    async fn dispatch_ws(
        self: &Arc<Self>,
        procedure: &Procedure,
        parts: &mut http::request::Parts,
        adapter: &Arc<dyn PubSubAdapter>,
    ) -> Response {
        if parts.method != Method::GET {
            return StatusCode::METHOD_NOT_ALLOWED.into_response();
        }
        let upgrade = match WebSocketUpgrade::from_request_parts(parts, &()).await {
            Ok(upgrade) => upgrade,
            Err(rejection) => return rejection.into_response(),
        };
        let handler = procedure
            .ws
            .clone()
            .expect("Ws procedures always carry a ws handler");
        let incoming = procedure.incoming.clone();
        let outgoing = procedure.outgoing.clone();
        let adapter = adapter.clone();
        upgrade.on_upgrade(move |socket| async move {
            run_ws_connection(socket, adapter, handler, incoming, outgoing).await;
        })
    }
}

fn rewrite_uri_path(original: &http::Uri, new_path: &str) -> Result<http::Uri, http::Error> {
    let mut parts = original.clone().into_parts();
    let path_and_query = match original.query() {
        Some(query) => format!("{new_path}?{query}"),
        None => new_path.to_owned(),
    };
    parts.path_and_query = Some(path_and_query.parse()?);
    http::Uri::from_parts(parts).map_err(http::Error::from)
}

async fn collect_body_fields(body: Body) -> Result<RawFields, RpcError> {
    let bytes: Bytes = body
        .collect()
        .await
        .map_err(|e| RpcError::Http(HttpError::bad_request(e.to_string())))?
        .to_bytes();
    if bytes.is_empty() {
        return Ok(RawFields::new());
    }
    let value: serde_json::Value = serde_json::from_slice(&bytes)
        .map_err(|e| RpcError::Http(HttpError::bad_request(format!("invalid JSON body: {e}"))))?;
    let object = value
        .as_object()
        .ok_or_else(|| RpcError::Http(HttpError::bad_request("body must be a JSON object")))?;
    let mut fields = RawFields::new();
    for (key, value) in object {
        let text = value
            .as_str()
            .ok_or_else(|| {
                RpcError::Http(HttpError::bad_request(format!(
                    "field {key} must be a codec-encoded string"
                )))
            })?
            .to_owned();
        fields.insert(key.clone(), text);
    }
    Ok(fields)
}

struct AxumWsChannel {
    sink: Arc<Mutex<futures_util::stream::SplitSink<WebSocket, WsMessage>>>,
    open: Arc<AtomicBool>,
}

impl RawChannel for AxumWsChannel {
    fn send(&self, text: String) -> BoxFuture<'static, bool> {
        let sink = self.sink.clone();
        let open = self.open.clone();
        Box::pin(async move {
            if !open.load(Ordering::SeqCst) {
                return false;
            }
            let mut sink = sink.lock().await;
            sink.send(WsMessage::Text(text.into())).await.is_ok()
        })
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

async fn run_ws_connection(
    socket: WebSocket,
    adapter: Arc<dyn PubSubAdapter>,
    handler: Arc<
        dyn Fn(Arc<ServerSocket>) -> BoxFuture<'static, crate::procedure::ConnectionHooks>
            + Send
            + Sync,
    >,
    incoming: Option<Arc<dyn crate::schema::ValueValidator>>,
    outgoing: Option<Arc<dyn crate::schema::ValueValidator>>,
) {
    let (sink, mut stream) = socket.split();
    let open = Arc::new(AtomicBool::new(true));
    let channel: Arc<dyn RawChannel> = Arc::new(AxumWsChannel {
        sink: Arc::new(Mutex::new(sink)),
        open: open.clone(),
    });
    let server_socket = ServerSocket::new(channel, adapter, incoming, outgoing);
    let hooks = handler(server_socket.clone()).await;

    while let Some(message) = stream.next().await {
        match message {
            Ok(WsMessage::Text(text)) => {
                let Some(frame) = Frame::parse(&text) else {
                    warn!("dropping malformed ws frame");
                    continue;
                };
                if frame.is_ping() {
                    server_socket.emitter.emit("pong", serde_json::Value::Null).await;
                    continue;
                }
                if let Err(e) = server_socket.emitter.handle_event(frame).await {
                    if let Some(on_error) = &hooks.on_error {
                        on_error(e.to_string()).await;
                    }
                }
            }
            Ok(WsMessage::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }

    open.store(false, Ordering::SeqCst);
    server_socket.close().await;
    if let Some(on_disconnect) = &hooks.on_disconnect {
        on_disconnect().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::procedure::{Json, ProcedureBuilder};
    use crate::pubsub::InProcessPubSub;
    use crate::schema::serde_schema;
    use axum::body::Body;
    use serde::Deserialize;

    #[derive(Deserialize)]
    struct Greeting {
        name: String,
    }

    fn sample_router() -> Arc<Router> {
        let procedure = ProcedureBuilder::new()
            .input(serde_schema::<Greeting>())
            .get(|input: Greeting, _ctx| async move { Ok(Json(format!("hi {}", input.name))) });
        Arc::new(Router::new().route("greet", procedure))
    }

    #[tokio::test]
    async fn dispatches_a_matching_get_route() {
        let router = sample_router();
        let adapter: Arc<dyn PubSubAdapter> = InProcessPubSub::new();
        let encoded = rpc_protocol::codec::encode(&rpc_protocol::RichValue::String("Ann".into()));
        let uri = format!("/greet?name={}", urlencode_for_test(&encoded));
        let req = Request::builder()
            .method(Method::GET)
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        let response = router.dispatch_request(req, &adapter).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_path_is_404() {
        let router = sample_router();
        let adapter: Arc<dyn PubSubAdapter> = InProcessPubSub::new();
        let req = Request::builder()
            .method(Method::GET)
            .uri("/nope")
            .body(Body::empty())
            .unwrap();
        let response = router.dispatch_request(req, &adapter).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn mounted_sub_router_is_reachable_under_its_prefix() {
        let inner = ProcedureBuilder::new().get(|_input: (), _ctx| async move { Ok(()) });
        let sub = Router::new().route("get", inner);
        let outer = Router::new().mount("users", sub).unwrap();
        let outer = Arc::new(outer);
        let adapter: Arc<dyn PubSubAdapter> = InProcessPubSub::new();
        let req = Request::builder()
            .method(Method::GET)
            .uri("/users/get")
            .body(Body::empty())
            .unwrap();
        let response = outer.dispatch_request(req, &adapter).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn mount_with_slash_in_name_is_rejected() {
        let sub = Router::new();
        let result = Router::new().mount("a/b", sub);
        assert!(matches!(result, Err(RpcError::InvalidMountName(_))));
    }

    #[tokio::test]
    async fn sub_router_error_bubbles_to_outer_error_hook() {
        use std::sync::atomic::AtomicUsize;
        let failing =
            ProcedureBuilder::new().get(|_input: (), _ctx| async move {
                Err::<(), _>(RpcError::Http(HttpError::not_found("no such user")))
            });
        let sub = Router::new().route("get", failing);
        let outer_hits = Arc::new(AtomicUsize::new(0));
        let hits = outer_hits.clone();
        let outer = Router::new()
            .mount("users", sub)
            .unwrap()
            .on_error(move |_e| {
                hits.fetch_add(1, Ordering::SeqCst);
            });
        let outer = Arc::new(outer);
        let adapter: Arc<dyn PubSubAdapter> = InProcessPubSub::new();
        let req = Request::builder()
            .method(Method::GET)
            .uri("/users/get")
            .body(Body::empty())
            .unwrap();
        let response = outer.dispatch_request(req, &adapter).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(outer_hits.load(Ordering::SeqCst), 1);
    }

    fn urlencode_for_test(raw: &str) -> String {
        crate::support::percent_encode_segment(raw)
    }
}
