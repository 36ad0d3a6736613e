//! The pub/sub adapter abstraction (spec C3) and its two implementations:
//! an in-process one for tests and single-process deployments, and the
//! default HTTP-streamed one (spec §4.3/§6) for multi-process deployments.

use crate::support::{percent_encode_segment, BoxFuture};
use futures_util::StreamExt;
use rpc_protocol::{Frame, RpcError};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, watch, RwLock};
use tracing::{debug, warn};

pub type OnMessage = Arc<dyn Fn(Frame) -> BoxFuture<'static, ()> + Send + Sync>;
pub type OnOpen = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;
pub type OnError = Arc<dyn Fn(RpcError) -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Default, Clone)]
pub struct SubscribeOpts {
    pub on_open: Option<OnOpen>,
    pub on_error: Option<OnError>,
}

/// A live subscription. Cancelling it stops the background delivery task;
/// the cancellation is cooperative, mirroring the spec's `AbortSignal`.
pub struct Subscription {
    cancel: watch::Sender<bool>,
}

impl Subscription {
    pub fn cancel(&self) {
        let _ = self.cancel.send(true);
    }
}

pub trait PubSubAdapter: Send + Sync {
    fn publish(&self, topic: String, payload: Frame) -> BoxFuture<'static, Result<(), RpcError>>;

    fn subscribe(
        &self,
        topic: String,
        on_message: OnMessage,
        opts: SubscribeOpts,
    ) -> BoxFuture<'static, Subscription>;
}

/// A single-process adapter backed by `tokio::sync::broadcast`, one
/// channel per topic, created lazily.
#[derive(Default)]
pub struct InProcessPubSub {
    topics: RwLock<HashMap<String, broadcast::Sender<Frame>>>,
}

impl InProcessPubSub {
    pub fn new() -> Arc<Self> {
        Arc::new(InProcessPubSub::default())
    }

    async fn sender_for(&self, topic: &str) -> broadcast::Sender<Frame> {
        if let Some(tx) = self.topics.read().await.get(topic) {
            return tx.clone();
        }
        let mut topics = self.topics.write().await;
        if let Some(tx) = topics.get(topic) {
            return tx.clone();
        }
        let (tx, _rx) = broadcast::channel(1024);
        topics.insert(topic.to_owned(), tx.clone());
        tx
    }
}

impl PubSubAdapter for InProcessPubSub {
    fn publish(&self, topic: String, payload: Frame) -> BoxFuture<'static, Result<(), RpcError>> {
        Box::pin(async move {
            let tx = self.sender_for(&topic).await;
            // No subscribers yet is not an error; the room may be empty.
            let _ = tx.send(payload);
            Ok(())
        })
    }

    fn subscribe(
        &self,
        topic: String,
        on_message: OnMessage,
        opts: SubscribeOpts,
    ) -> BoxFuture<'static, Subscription> {
        Box::pin(async move {
            let tx = self.sender_for(&topic).await;
            let mut rx = tx.subscribe();
            let (cancel_tx, mut cancel_rx) = watch::channel(false);
            if let Some(on_open) = &opts.on_open {
                on_open().await;
            }
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = cancel_rx.changed() => {
                            if *cancel_rx.borrow() {
                                break;
                            }
                        }
                        recv = rx.recv() => match recv {
                            Ok(frame) => on_message(frame).await,
                            Err(broadcast::error::RecvError::Lagged(n)) => {
                                warn!(topic = %topic, skipped = n, "in-process pub/sub subscriber lagged");
                            }
                            Err(broadcast::error::RecvError::Closed) => break,
                        }
                    }
                }
            });
            Subscription { cancel: cancel_tx }
        })
    }
}

/// The default adapter: publishes over HTTP POST and subscribes by
/// reading a server-sent-events-style stream, per spec §4.3/§6. Each
/// line has the shape `data: <prefix>,<room>,<json-payload>`.
pub struct HttpStreamPubSub {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    prefix: String,
}

impl HttpStreamPubSub {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Arc<Self> {
        Arc::new(HttpStreamPubSub {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            token,
            prefix: "rpc".to_owned(),
        })
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Parses one SSE-style line; returns `None` for lines that don't
    /// carry a room/payload pair and should be skipped.
    fn parse_line(&self, line: &str) -> Option<Frame> {
        parse_sse_line(&self.prefix, line)
    }
}

/// Parses a `data: <prefix>,<room>,<json-payload>` line, used both by the
/// buffered streaming loop and directly in tests.
fn parse_sse_line(expected_prefix: &str, line: &str) -> Option<Frame> {
    let rest = line.strip_prefix("data: ")?;
    let mut parts = rest.splitn(3, ',');
    let prefix = parts.next()?;
    let _room = parts.next()?;
    let payload = parts.next()?;
    if prefix != expected_prefix {
        return None;
    }
    serde_json::from_str(payload).ok()
}

impl PubSubAdapter for HttpStreamPubSub {
    fn publish(&self, topic: String, payload: Frame) -> BoxFuture<'static, Result<(), RpcError>> {
        let url = format!(
            "{}/publish/{}",
            self.base_url,
            percent_encode_segment(&topic)
        );
        let request = self.authed(self.client.post(url)).json(&payload);
        Box::pin(async move {
            let response = request
                .send()
                .await
                .map_err(|e| RpcError::PublishError(e.to_string()))?;
            if !response.status().is_success() {
                return Err(RpcError::PublishError(format!(
                    "publish rejected with status {}",
                    response.status()
                )));
            }
            Ok(())
        })
    }

    fn subscribe(
        &self,
        topic: String,
        on_message: OnMessage,
        opts: SubscribeOpts,
    ) -> BoxFuture<'static, Subscription> {
        let url = format!(
            "{}/subscribe/{}",
            self.base_url,
            percent_encode_segment(&topic)
        );
        let request = self.authed(
            self.client
                .get(url)
                .header("accept", "text/event-stream"),
        );
        let prefix = self.prefix.clone();
        Box::pin(async move {
            let (cancel_tx, mut cancel_rx) = watch::channel(false);
            tokio::spawn(async move {
                let response = match request.send().await {
                    Ok(r) => r,
                    Err(e) => {
                        if let Some(on_error) = &opts.on_error {
                            on_error(RpcError::SubscriptionError(e.to_string())).await;
                        }
                        return;
                    }
                };
                if let Some(on_open) = &opts.on_open {
                    on_open().await;
                }
                let mut stream = response.bytes_stream();
                let mut buf = String::new();
                loop {
                    tokio::select! {
                        _ = cancel_rx.changed() => {
                            if *cancel_rx.borrow() {
                                break;
                            }
                        }
                        chunk = stream.next() => match chunk {
                            Some(Ok(bytes)) => {
                                buf.push_str(&String::from_utf8_lossy(&bytes));
                                while let Some(pos) = buf.find('\n') {
                                    let line = buf[..pos].trim_end_matches('\r').to_owned();
                                    buf.drain(..=pos);
                                    if line.is_empty() {
                                        continue;
                                    }
                                    match parse_sse_line(&prefix, &line) {
                                        Some(frame) => on_message(frame).await,
                                        None => debug!(line = %line, "skipping malformed pub/sub line"),
                                    }
                                }
                            }
                            Some(Err(e)) => {
                                if let Some(on_error) = &opts.on_error {
                                    on_error(RpcError::SubscriptionError(e.to_string())).await;
                                }
                                break;
                            }
                            None => break,
                        }
                    }
                }
            });
            Subscription { cancel: cancel_tx }
        })
    }
}
