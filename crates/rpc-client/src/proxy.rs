//! The typed client proxy (spec C9).
//!
//! The spec describes this as a runtime property-access proxy: accessing
//! `proxy.users.get` builds up a path, and one of four reserved terminal
//! calls (`$get`/`$post`/`$url`/`$ws`) fires the request. Rust has no
//! analogous dynamic-property mechanism, so this is instead a generic
//! builder: `client.route(["users", "get"]).get::<Out>(data)` plays the
//! same role — path accumulation via `.route()`/`.push()`, then one of the
//! same four terminal operations.

use crate::socket::ClientSocket;
use rpc_core::schema::ValueValidator;
use rpc_protocol::{HttpError, RichValue, RpcError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Holds the base URL and HTTP client shared by every route built from it.
pub struct ClientProxy {
    base_url: String,
    http: reqwest::Client,
}

impl ClientProxy {
    /// `base_url` must be absolute, or empty for same-origin requests.
    /// Credentials default to "include" (spec default), realized here as a
    /// cookie-storing `reqwest::Client` — the closest native-HTTP analogue
    /// to a browser `fetch` credentials policy.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_credentials_include(base_url, true)
    }

    pub fn with_credentials_include(base_url: impl Into<String>, include: bool) -> Self {
        ClientProxy {
            base_url: base_url.into(),
            http: reqwest::Client::builder()
                .cookie_store(include)
                .build()
                .expect("reqwest client builds with default TLS config"),
        }
    }

    /// Starts a route at `segments` (e.g. `["users", "get"]`).
    pub fn route(&self, segments: impl IntoIterator<Item = impl Into<String>>) -> RouteHandle<'_> {
        RouteHandle {
            proxy: self,
            segments: segments.into_iter().map(Into::into).collect(),
        }
    }

    /// Joins `path` onto the base, without duplicating the base prefix if
    /// `path` already carries it (spec's base-URL-dedupe rule).
    fn join(&self, path: &str) -> String {
        if self.base_url.is_empty() {
            return path.to_owned();
        }
        if path.starts_with(&self.base_url) {
            return path.to_owned();
        }
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }
}

pub struct RouteHandle<'a> {
    proxy: &'a ClientProxy,
    segments: Vec<String>,
}

impl<'a> RouteHandle<'a> {
    fn path(&self) -> String {
        format!("/{}", self.segments.join("/"))
    }

    /// `$url(args?)`: the target URL with no request issued. `query`
    /// entries whose value is `None` are skipped; everything else is
    /// stringified.
    pub fn url(&self, query: Option<&HashMap<String, Option<String>>>) -> String {
        let base = self.proxy.join(&self.path());
        let Some(query) = query else { return base };
        let pairs: Vec<String> = query
            .iter()
            .filter_map(|(k, v)| v.as_ref().map(|v| format!("{k}={v}")))
            .collect();
        if pairs.is_empty() {
            base
        } else {
            format!("{base}?{}", pairs.join("&"))
        }
    }

    /// `$get(data?, opts?)`: per-field encode `data`'s top-level fields,
    /// issue a GET with them as the query string, decode the (possibly
    /// tagged) response body into `Out`.
    pub async fn get<Out, In>(&self, data: Option<In>) -> Result<Out, RpcError>
    where
        Out: DeserializeOwned,
        In: Serialize,
    {
        let url = self.proxy.join(&self.path());
        let mut request = self.proxy.http.get(&url);
        if let Some(fields) = encode_fields(data)? {
            let query: Vec<(String, String)> = fields.into_iter().collect();
            request = request.query(&query);
        }
        self.send(request).await
    }

    /// `$post(data?, opts?)`: per-field encode `data`'s top-level fields
    /// into a JSON object body.
    pub async fn post<Out, In>(&self, data: Option<In>) -> Result<Out, RpcError>
    where
        Out: DeserializeOwned,
        In: Serialize,
    {
        let url = self.proxy.join(&self.path());
        let mut request = self.proxy.http.post(&url);
        if let Some(fields) = encode_fields(data)? {
            request = request.json(&fields);
        }
        self.send(request).await
    }

    async fn send<Out: DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> Result<Out, RpcError> {
        let response = request
            .send()
            .await
            .map_err(|e| RpcError::Http(HttpError::internal(e.to_string())))?;
        let status = response.status();
        let tagged = response
            .headers()
            .get(rpc_protocol::wire::TAGGED_BODY_HEADER)
            .is_some();
        let text = response
            .text()
            .await
            .map_err(|e| RpcError::Http(HttpError::internal(e.to_string())))?;
        if !status.is_success() {
            return Err(RpcError::Http(HttpError::new(status.as_u16(), text)));
        }
        if tagged {
            let rich = rpc_protocol::codec::decode(&text)?;
            let value = rich.into_schema_json();
            serde_json::from_value(value).map_err(|e| RpcError::SchemaMismatch(e.to_string()))
        } else {
            serde_json::from_str(&text).map_err(|e| RpcError::SchemaMismatch(e.to_string()))
        }
    }

    /// `$ws(args?)`: opens a [`ClientSocket`] to this route, translating an
    /// `http(s)` base scheme to `ws(s)`.
    pub async fn ws(
        &self,
        incoming: Option<Arc<dyn ValueValidator>>,
        outgoing: Option<Arc<dyn ValueValidator>>,
    ) -> Result<Arc<ClientSocket>, RpcError> {
        let url = to_ws_scheme(&self.proxy.join(&self.path()));
        ClientSocket::connect(url, incoming, outgoing).await
    }
}

fn to_ws_scheme(url: &str) -> String {
    if let Some(rest) = url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        url.to_owned()
    }
}

/// Serializes `data`, then per-field-encodes each top-level field via the
/// tagged-JSON codec (spec §4.1/§6). `None` means "no body/query fields".
fn encode_fields<In: Serialize>(data: Option<In>) -> Result<Option<HashMap<String, String>>, RpcError> {
    let Some(data) = data else { return Ok(None) };
    let value =
        serde_json::to_value(data).map_err(|e| RpcError::SchemaMismatch(e.to_string()))?;
    let object = value
        .as_object()
        .ok_or_else(|| RpcError::SchemaMismatch("request data must serialize to an object".into()))?;
    let mut fields = HashMap::with_capacity(object.len());
    for (key, value) in object {
        let rich = RichValue::from_json(value.clone());
        fields.insert(key.clone(), rpc_protocol::codec::encode(&rich));
    }
    Ok(Some(fields))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Serialize)]
    struct Greeting {
        name: String,
    }

    #[derive(Deserialize, PartialEq, Debug)]
    struct Greeted {
        message: String,
    }

    #[test]
    fn join_does_not_duplicate_an_already_prefixed_path() {
        let proxy = ClientProxy::new("http://localhost:8080");
        let handle = proxy.route(["users", "get"]);
        assert_eq!(handle.path(), "/users/get");
        assert_eq!(
            proxy.join("http://localhost:8080/users/get"),
            "http://localhost:8080/users/get"
        );
    }

    #[test]
    fn url_builds_query_string_and_skips_none_values() {
        let proxy = ClientProxy::new("http://localhost:8080");
        let handle = proxy.route(["greet"]);
        let mut query = HashMap::new();
        query.insert("name".to_owned(), Some("Ann".to_owned()));
        query.insert("unused".to_owned(), None);
        let url = handle.url(Some(&query));
        assert!(url.starts_with("http://localhost:8080/greet?"));
        assert!(url.contains("name=Ann"));
        assert!(!url.contains("unused"));
    }

    #[test]
    fn to_ws_scheme_translates_http_schemes() {
        assert_eq!(to_ws_scheme("http://x/a"), "ws://x/a");
        assert_eq!(to_ws_scheme("https://x/a"), "wss://x/a");
    }

    #[test]
    fn encode_fields_rejects_non_object_data() {
        let result = encode_fields(Some(42));
        assert!(matches!(result, Err(RpcError::SchemaMismatch(_))));
    }

    #[test]
    fn encode_fields_per_field_encodes_each_top_level_key() {
        let fields = encode_fields(Some(Greeting { name: "Ann".into() }))
            .unwrap()
            .unwrap();
        let decoded = rpc_protocol::codec::decode(&fields["name"]).unwrap();
        assert_eq!(decoded.into_schema_json(), serde_json::json!("Ann"));
    }
}
