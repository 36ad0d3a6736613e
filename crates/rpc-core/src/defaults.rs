//! Default host-integration glue (spec C11): CORS policy, the rich-response
//! helper handlers use to return a tagged-JSON body, and the error
//! translator the router calls after every failed dispatch.

use axum::body::Body;
use axum::http::{header, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use rpc_protocol::{codec::encode, RichValue, RpcError};
use tower_http::cors::{AllowOrigin, CorsLayer};

/// Mirrors the requesting origin and allows credentials, exposing the
/// tagged-body header so browser clients can see it (spec §6's transport
/// notes on the default CORS stance).
pub fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_credentials(true)
        .allow_origin(AllowOrigin::mirror_request())
        .allow_methods(tower_http::cors::Any)
        .allow_headers(tower_http::cors::Any)
        .expose_headers([HeaderName::from_static(rpc_protocol::wire::TAGGED_BODY_HEADER)])
}

/// Builds a tagged-JSON response body, setting the header that tells the
/// client its codec must run before treating the body as plain JSON.
pub fn rich_response(value: &RichValue) -> Response {
    let body = encode(value);
    let mut response = Response::new(Body::from(body));
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response.headers_mut().insert(
        HeaderName::from_static(rpc_protocol::wire::TAGGED_BODY_HEADER),
        HeaderValue::from_static("true"),
    );
    response
}

/// Maps an [`RpcError`] onto an HTTP response (spec §6/§7's error
/// taxonomy): status from `err.status()`, a plain-text body with the
/// message.
pub fn translate_error(err: &RpcError) -> Response {
    let status = StatusCode::from_u16(err.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, err.message()).into_response()
}
