//! The per-socket event bus (spec C2): validated `on`/`off`/`emit` plus
//! the dispatch path WS frames arrive through. Decoupled from any one
//! transport via [`RawChannel`], so the server and client sockets share
//! this implementation.

use crate::schema::ValueValidator;
use crate::support::BoxFuture;
use rpc_protocol::{Frame, RpcError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tracing::warn;

/// The duplex send primitive an `EventEmitter` pushes frames through.
/// Implemented by the server socket (over an axum WS sink) and the
/// client socket (over a tungstenite sink).
pub trait RawChannel: Send + Sync {
    fn send(&self, text: String) -> BoxFuture<'static, bool>;
    fn is_open(&self) -> bool;
}

type Handler = Arc<dyn Fn(serde_json::Value) -> BoxFuture<'static, Result<(), RpcError>> + Send + Sync>;

struct Registration {
    id: usize,
    handler: Handler,
}

/// A validated pub/sub-style event bus bound to one connection.
///
/// The channel lives behind a lock rather than being fixed at construction
/// so a reconnecting client socket can rebind it in place on reconnect,
/// instead of replacing the whole emitter and copying its handler map —
/// the handler table never moves, so there's nothing to transplant.
pub struct EventEmitter {
    channel: RwLock<Arc<dyn RawChannel>>,
    handlers: Mutex<HashMap<String, Vec<Registration>>>,
    next_id: AtomicUsize,
    incoming: Option<Arc<dyn ValueValidator>>,
    outgoing: Option<Arc<dyn ValueValidator>>,
}

impl EventEmitter {
    pub fn new(
        channel: Arc<dyn RawChannel>,
        incoming: Option<Arc<dyn ValueValidator>>,
        outgoing: Option<Arc<dyn ValueValidator>>,
    ) -> Self {
        EventEmitter {
            channel: RwLock::new(channel),
            handlers: Mutex::new(HashMap::new()),
            next_id: AtomicUsize::new(0),
            incoming,
            outgoing,
        }
    }

    /// Swaps in a new raw channel (e.g. after a client reconnect) without
    /// disturbing registered handlers.
    pub fn rebind_channel(&self, channel: Arc<dyn RawChannel>) {
        *self.channel.write().unwrap() = channel;
    }

    /// Registers a handler for `event`, returning a token usable with
    /// [`EventEmitter::off`].
    pub fn on<F, Fut>(&self, event: impl Into<String>, handler: F) -> usize
    where
        F: Fn(serde_json::Value) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<(), RpcError>> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let handler: Handler = Arc::new(move |data| Box::pin(handler(data)));
        self.handlers
            .lock()
            .unwrap()
            .entry(event.into())
            .or_default()
            .push(Registration { id, handler });
        id
    }

    /// Removes a handler by token, or every handler for `event` if
    /// `id` is `None`.
    pub fn off(&self, event: &str, id: Option<usize>) {
        let mut handlers = self.handlers.lock().unwrap();
        match id {
            Some(id) => {
                if let Some(list) = handlers.get_mut(event) {
                    list.retain(|reg| reg.id != id);
                }
            }
            None => {
                handlers.remove(event);
            }
        }
    }

    /// Validates `data` against the outgoing schema (if any), then sends
    /// `[event, data]` over the channel. Returns `false` if the channel is
    /// closed or the payload was rejected.
    pub async fn emit(&self, event: impl Into<String>, data: serde_json::Value) -> bool {
        let channel = self.channel.read().unwrap().clone();
        if !channel.is_open() {
            return false;
        }
        if let Some(validator) = &self.outgoing {
            if let Err(e) = validator.validate(&data) {
                warn!(error = %e, "outgoing event rejected by schema");
                return false;
            }
        }
        let frame = Frame::new(event, data);
        channel.send(frame.to_text()).await
    }

    /// Whether the underlying channel currently reports itself open.
    pub fn is_open(&self) -> bool {
        self.channel.read().unwrap().is_open()
    }

    /// Validates an inbound frame, then invokes every handler registered
    /// for its event in registration order. Failures are isolated per
    /// handler and aggregated into a single [`RpcError::HandlerFailure`].
    pub async fn handle_event(&self, frame: Frame) -> Result<(), RpcError> {
        if let Some(validator) = &self.incoming {
            if let Err(e) = validator.validate(&frame.data) {
                warn!(event = %frame.event, error = %e, "incoming event rejected by schema");
                return Ok(());
            }
        }
        self.dispatch_local(frame).await
    }

    /// Invokes every handler registered for `event`, bypassing the incoming
    /// schema. Used for connection-lifecycle events (`onConnect`, `onError`)
    /// that never travelled over the wire and so were never subject to it.
    pub async fn dispatch_control(
        &self,
        event: impl Into<String>,
        data: serde_json::Value,
    ) -> Result<(), RpcError> {
        self.dispatch_local(Frame::new(event, data)).await
    }

    async fn dispatch_local(&self, frame: Frame) -> Result<(), RpcError> {
        let snapshot: Vec<Handler> = {
            let handlers = self.handlers.lock().unwrap();
            handlers
                .get(&frame.event)
                .map(|list| list.iter().map(|r| r.handler.clone()).collect())
                .unwrap_or_default()
        };
        if snapshot.is_empty() {
            return Ok(());
        }
        let mut failures = 0;
        for handler in &snapshot {
            if let Err(e) = handler(frame.data.clone()).await {
                warn!(event = %frame.event, error = %e, "event handler failed");
                failures += 1;
            }
        }
        if failures > 0 {
            Err(RpcError::HandlerFailure(failures, snapshot.len()))
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    struct RecordingChannel {
        open: AtomicBool,
        sent: Mutex<Vec<String>>,
    }

    impl RecordingChannel {
        fn new() -> Arc<Self> {
            Arc::new(RecordingChannel {
                open: AtomicBool::new(true),
                sent: Mutex::new(Vec::new()),
            })
        }
    }

    impl RawChannel for RecordingChannel {
        fn send(&self, text: String) -> BoxFuture<'static, bool> {
            self.sent.lock().unwrap().push(text);
            Box::pin(async { true })
        }

        fn is_open(&self) -> bool {
            self.open.load(Ordering::SeqCst)
        }
    }

    #[tokio::test]
    async fn emit_sends_a_two_element_frame() {
        let channel = RecordingChannel::new();
        let emitter = EventEmitter::new(channel.clone(), None, None);
        assert!(emitter.emit("greeting", serde_json::json!("hi")).await);
        let sent = channel.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0], r#"["greeting","hi"]"#);
    }

    #[tokio::test]
    async fn emit_on_closed_channel_returns_false() {
        let channel = RecordingChannel::new();
        channel.open.store(false, Ordering::SeqCst);
        let emitter = EventEmitter::new(channel, None, None);
        assert!(!emitter.emit("x", serde_json::json!(null)).await);
    }

    #[tokio::test]
    async fn handlers_run_in_registration_order_and_failures_are_isolated() {
        let channel = RecordingChannel::new();
        let emitter = EventEmitter::new(channel, None, None);
        let order = Arc::new(Mutex::new(Vec::new()));
        let o1 = order.clone();
        emitter.on("ev", move |_data| {
            let o1 = o1.clone();
            async move {
                o1.lock().unwrap().push(1);
                Err(RpcError::SchemaMismatch("boom".into()))
            }
        });
        let o2 = order.clone();
        emitter.on("ev", move |_data| {
            let o2 = o2.clone();
            async move {
                o2.lock().unwrap().push(2);
                Ok(())
            }
        });
        let result = emitter
            .handle_event(Frame::new("ev", serde_json::json!(null)))
            .await;
        assert_eq!(*order.lock().unwrap(), vec![1, 2]);
        assert!(matches!(result, Err(RpcError::HandlerFailure(1, 2))));
    }

    #[tokio::test]
    async fn off_removes_only_the_targeted_handler() {
        let channel = RecordingChannel::new();
        let emitter = EventEmitter::new(channel, None, None);
        let hits = Arc::new(Mutex::new(0));
        let h1 = hits.clone();
        let id1 = emitter.on("ev", move |_d| {
            let h1 = h1.clone();
            async move {
                *h1.lock().unwrap() += 1;
                Ok(())
            }
        });
        let h2 = hits.clone();
        emitter.on("ev", move |_d| {
            let h2 = h2.clone();
            async move {
                *h2.lock().unwrap() += 10;
                Ok(())
            }
        });
        emitter.off("ev", Some(id1));
        emitter
            .handle_event(Frame::new("ev", serde_json::json!(null)))
            .await
            .unwrap();
        assert_eq!(*hits.lock().unwrap(), 10);
    }

    #[tokio::test]
    async fn incoming_schema_rejection_drops_the_frame_silently() {
        let channel = RecordingChannel::new();
        let incoming: Arc<dyn ValueValidator> =
            Arc::new(|_v: &serde_json::Value| Err(RpcError::SchemaMismatch("no".into())));
        let emitter = EventEmitter::new(channel, Some(incoming), None);
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        emitter.on("ev", move |_d| {
            let h = h.clone();
            async move {
                h.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });
        let result = emitter
            .handle_event(Frame::new("ev", serde_json::json!(null)))
            .await;
        assert!(result.is_ok());
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }
}
