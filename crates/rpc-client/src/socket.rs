//! The reconnecting client socket (spec C6): opens a channel, wraps it in
//! an `rpc-core` [`EventEmitter`], and on disconnect rebinds the emitter's
//! channel to a freshly reconnected one rather than replacing the emitter
//! itself — handlers registered with `on` never need to be copied across,
//! they were never attached to the old channel in the first place.

use crate::channel::TungsteniteChannel;
use futures_util::StreamExt;
use rpc_core::schema::ValueValidator;
use rpc_core::EventEmitter;
use rpc_protocol::{Frame, RpcError};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::warn;

const RECONNECT_DELAY: Duration = Duration::from_millis(1500);
const MAX_RECONNECT_ATTEMPTS: usize = 3;

pub const ON_CONNECT: &str = "onConnect";
pub const ON_ERROR: &str = "onError";

pub struct ClientSocket {
    url: String,
    pub emitter: EventEmitter,
    connected: AtomicBool,
    reconnect_attempts: AtomicUsize,
    closed: AtomicBool,
    reader_task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl ClientSocket {
    /// Opens `url` and returns a socket once the initial connection
    /// succeeds. Subsequent drops are retried internally; only the first
    /// connect attempt can fail the caller.
    pub async fn connect(
        url: impl Into<String>,
        incoming: Option<Arc<dyn ValueValidator>>,
        outgoing: Option<Arc<dyn ValueValidator>>,
    ) -> Result<Arc<Self>, RpcError> {
        let url = url.into();
        let (stream, _response) = tokio_tungstenite::connect_async(&url)
            .await
            .map_err(|e| RpcError::SubscriptionError(e.to_string()))?;
        let (sink, stream_half) = stream.split();
        let (channel, open_flag) = TungsteniteChannel::new(sink);

        let emitter = EventEmitter::new(channel, incoming, outgoing);
        let socket = Arc::new(ClientSocket {
            url,
            emitter,
            connected: AtomicBool::new(true),
            reconnect_attempts: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            reader_task: std::sync::Mutex::new(None),
        });

        socket.spawn_reader(stream_half, open_flag);
        socket
            .emitter
            .dispatch_control(ON_CONNECT, serde_json::Value::Null)
            .await
            .ok();
        Ok(socket)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn reconnect_attempts(&self) -> usize {
        self.reconnect_attempts.load(Ordering::SeqCst)
    }

    pub fn on<F, Fut>(&self, event: impl Into<String>, handler: F) -> usize
    where
        F: Fn(serde_json::Value) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<(), RpcError>> + Send + 'static,
    {
        self.emitter.on(event, handler)
    }

    pub fn off(&self, event: &str, id: Option<usize>) {
        self.emitter.off(event, id);
    }

    pub async fn emit(&self, event: impl Into<String>, data: serde_json::Value) -> bool {
        self.emitter.emit(event, data).await
    }

    pub async fn close(self: &Arc<Self>) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(task) = self.reader_task.lock().unwrap().take() {
            task.abort();
        }
    }

    fn spawn_reader(
        self: &Arc<Self>,
        mut stream: futures_util::stream::SplitStream<crate::channel::WsStream>,
        open_flag: Arc<AtomicBool>,
    ) {
        let weak = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            while let Some(message) = stream.next().await {
                let Some(socket) = weak.upgrade() else { break };
                match message {
                    Ok(tokio_tungstenite::tungstenite::Message::Text(text)) => {
                        let Some(frame) = Frame::parse(&text) else {
                            warn!("dropping malformed client frame");
                            continue;
                        };
                        if frame.is_pong() {
                            continue;
                        }
                        if let Err(e) = socket.emitter.handle_event(frame).await {
                            warn!(error = %e, "client event handler failed");
                        }
                    }
                    Ok(tokio_tungstenite::tungstenite::Message::Close(_)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
            open_flag.store(false, Ordering::SeqCst);
            if let Some(socket) = weak.upgrade() {
                socket.handle_disconnect().await;
            }
        });
        *self.reader_task.lock().unwrap() = Some(task);
    }

    async fn handle_disconnect(self: &Arc<Self>) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        self.connected.store(false, Ordering::SeqCst);
        let attempts = self.reconnect_attempts.fetch_add(1, Ordering::SeqCst);
        if attempts >= MAX_RECONNECT_ATTEMPTS {
            self.emitter
                .dispatch_control(
                    ON_ERROR,
                    serde_json::json!({ "message": "reconnect attempts exhausted" }),
                )
                .await
                .ok();
            return;
        }
        let socket = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::time::sleep(RECONNECT_DELAY).await;
            if let Some(socket) = socket.upgrade() {
                socket.reconnect().await;
            }
        });
    }

    async fn reconnect(self: Arc<Self>) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        match tokio_tungstenite::connect_async(&self.url).await {
            Ok((stream, _response)) => {
                let (sink, stream_half) = stream.split();
                let (channel, open_flag) = TungsteniteChannel::new(sink);
                self.emitter.rebind_channel(channel);
                self.connected.store(true, Ordering::SeqCst);
                self.reconnect_attempts.store(0, Ordering::SeqCst);
                self.spawn_reader(stream_half, open_flag);
                self.emitter
                    .dispatch_control(ON_CONNECT, serde_json::Value::Null)
                    .await
                    .ok();
            }
            Err(e) => {
                self.emitter
                    .dispatch_control(ON_ERROR, serde_json::json!({ "message": e.to_string() }))
                    .await
                    .ok();
                self.handle_disconnect().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rpc_test_support::MockWsServer;
    use std::sync::Mutex;

    #[tokio::test]
    async fn connect_dispatches_on_connect_and_resets_the_attempt_counter() {
        let server = MockWsServer::start().await.unwrap();
        let url = format!("ws://{}", server.local_addr());
        let socket = ClientSocket::connect(url, None, None).await.unwrap();
        assert!(socket.is_connected());
        assert_eq!(socket.reconnect_attempts(), 0);
    }

    #[tokio::test]
    async fn emit_round_trips_through_an_echo_server() {
        let server = MockWsServer::start().await.unwrap();
        let url = format!("ws://{}", server.local_addr());
        let socket = ClientSocket::connect(url, None, None).await.unwrap();

        let received = Arc::new(Mutex::new(Vec::new()));
        let r = received.clone();
        socket.on("greeting", move |data| {
            let r = r.clone();
            async move {
                r.lock().unwrap().push(data);
                Ok(())
            }
        });

        assert!(socket.emit("greeting", serde_json::json!("hi")).await);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(received.lock().unwrap().as_slice(), &[serde_json::json!("hi")]);
    }

    #[tokio::test]
    async fn close_is_idempotent_and_stops_the_reader() {
        let server = MockWsServer::start().await.unwrap();
        let url = format!("ws://{}", server.local_addr());
        let socket = ClientSocket::connect(url, None, None).await.unwrap();
        socket.close().await;
        socket.close().await;
    }
}
