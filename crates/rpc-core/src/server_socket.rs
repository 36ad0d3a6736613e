//! The per-connection server socket (spec C5): room membership, the
//! heartbeat sender/monitor pair, and the event emitter a WS procedure's
//! connection factory is handed.
//!
//! Design note (resolved open question): joining a second room replaces
//! the first rather than adding to a set — the socket tracks a single
//! `current_room`. Subscription/heartbeat state stays keyed by room name
//! so the bookkeeping generalizes cleanly if that's ever relaxed.

use crate::event_emitter::{EventEmitter, RawChannel};
use crate::pubsub::{OnOpen, PubSubAdapter, SubscribeOpts, Subscription};
use rpc_protocol::Frame;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(45);
const MONITOR_INTERVAL: Duration = Duration::from_secs(5);

struct RoomState {
    subscription: Subscription,
    sender_task: JoinHandle<()>,
    monitor_task: JoinHandle<()>,
}

impl RoomState {
    fn abort(&self) {
        self.subscription.cancel();
        self.sender_task.abort();
        self.monitor_task.abort();
    }
}

pub struct ServerSocket {
    pub emitter: EventEmitter,
    channel: Arc<dyn RawChannel>,
    adapter: Arc<dyn PubSubAdapter>,
    current_room: Mutex<Option<(String, RoomState)>>,
    closed: AtomicBool,
}

impl ServerSocket {
    pub fn new(
        channel: Arc<dyn RawChannel>,
        adapter: Arc<dyn PubSubAdapter>,
        incoming: Option<Arc<dyn crate::schema::ValueValidator>>,
        outgoing: Option<Arc<dyn crate::schema::ValueValidator>>,
    ) -> Arc<Self> {
        let emitter = EventEmitter::new(channel.clone(), incoming, outgoing);
        Arc::new(ServerSocket {
            emitter,
            channel,
            adapter,
            current_room: Mutex::new(None),
            closed: AtomicBool::new(false),
        })
    }

    pub async fn current_room(&self) -> Option<String> {
        self.current_room.lock().await.as_ref().map(|(r, _)| r.clone())
    }

    /// Subscribes to `room`, replacing any current subscription. Starts a
    /// heartbeat sender (ping every 30s) and a monitor that resubscribes
    /// if no heartbeat (ping or otherwise) has been seen in 45s.
    pub async fn join(self: &Arc<Self>, room: impl Into<String>) {
        let room = room.into();
        self.leave_current().await;

        let last_heartbeat = Arc::new(std::sync::Mutex::new(Instant::now()));
        let channel = self.channel.clone();
        let lh = last_heartbeat.clone();
        let on_message = {
            let channel = channel.clone();
            let lh = last_heartbeat.clone();
            Arc::new(move |frame: Frame| {
                let channel = channel.clone();
                let lh = lh.clone();
                Box::pin(async move {
                    if frame.is_ping() {
                        *lh.lock().unwrap() = Instant::now();
                    }
                    channel.send(frame.to_text()).await;
                }) as crate::support::BoxFuture<'static, ()>
            })
        };
        let opened = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let o = opened.clone();
        let on_open: OnOpen = Arc::new(move || {
            let o = o.clone();
            Box::pin(async move {
                o.store(true, Ordering::SeqCst);
            })
        });
        let subscription = self
            .adapter
            .subscribe(
                room.clone(),
                on_message,
                SubscribeOpts {
                    on_open: Some(on_open),
                    on_error: None,
                },
            )
            .await;

        let adapter = self.adapter.clone();
        let room_for_sender = room.clone();
        let sender_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
            ticker.tick().await; // first tick fires immediately; skip it
            loop {
                ticker.tick().await;
                if adapter
                    .publish(room_for_sender.clone(), Frame::ping())
                    .await
                    .is_err()
                {
                    warn!(room = %room_for_sender, "heartbeat publish failed");
                }
            }
        });

        let socket = Arc::downgrade(self);
        let room_for_monitor = room.clone();
        let monitor_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(MONITOR_INTERVAL);
            loop {
                ticker.tick().await;
                let elapsed = lh.lock().unwrap().elapsed();
                if elapsed > HEARTBEAT_TIMEOUT {
                    debug!(room = %room_for_monitor, "heartbeat timed out, resubscribing");
                    if let Some(socket) = socket.upgrade() {
                        socket.join(room_for_monitor.clone()).await;
                    }
                    break;
                }
            }
        });

        *self.current_room.lock().await = Some((
            room,
            RoomState {
                subscription,
                sender_task,
                monitor_task,
            },
        ));
    }

    async fn leave_current(&self) {
        if let Some((_room, state)) = self.current_room.lock().await.take() {
            state.abort();
        }
    }

    /// Leaves `room` if it is the current room; a no-op otherwise.
    pub async fn leave(&self, room: &str) {
        let mut guard = self.current_room.lock().await;
        if guard.as_ref().is_some_and(|(r, _)| r == room) {
            if let Some((_, state)) = guard.take() {
                state.abort();
            }
        }
    }

    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.leave_current().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pubsub::InProcessPubSub;
    use std::sync::atomic::AtomicBool as StdAtomicBool;

    struct NullChannel {
        open: StdAtomicBool,
    }

    impl RawChannel for NullChannel {
        fn send(&self, _text: String) -> crate::support::BoxFuture<'static, bool> {
            Box::pin(async { true })
        }
        fn is_open(&self) -> bool {
            self.open.load(Ordering::SeqCst)
        }
    }

    #[tokio::test]
    async fn join_then_join_replaces_current_room() {
        let channel: Arc<dyn RawChannel> = Arc::new(NullChannel {
            open: StdAtomicBool::new(true),
        });
        let adapter = InProcessPubSub::new();
        let socket = ServerSocket::new(channel, adapter, None, None);
        socket.join("room-a").await;
        assert_eq!(socket.current_room().await, Some("room-a".to_owned()));
        socket.join("room-b").await;
        assert_eq!(socket.current_room().await, Some("room-b".to_owned()));
    }

    #[tokio::test]
    async fn leave_is_a_no_op_if_room_is_not_current() {
        let channel: Arc<dyn RawChannel> = Arc::new(NullChannel {
            open: StdAtomicBool::new(true),
        });
        let adapter = InProcessPubSub::new();
        let socket = ServerSocket::new(channel, adapter, None, None);
        socket.join("room-a").await;
        socket.leave("room-b").await;
        assert_eq!(socket.current_room().await, Some("room-a".to_owned()));
        socket.leave("room-a").await;
        assert_eq!(socket.current_room().await, None);
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let channel: Arc<dyn RawChannel> = Arc::new(NullChannel {
            open: StdAtomicBool::new(true),
        });
        let adapter = InProcessPubSub::new();
        let socket = ServerSocket::new(channel, adapter, None, None);
        socket.join("room-a").await;
        socket.close().await;
        socket.close().await;
        assert_eq!(socket.current_room().await, None);
    }
}
