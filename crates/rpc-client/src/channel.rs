//! A [`RawChannel`] implementation over a `tokio-tungstenite` WS stream, so
//! [`crate::ClientSocket`] can drive the same `rpc-core` event emitter the
//! server side uses.

use futures_util::stream::SplitSink;
use futures_util::SinkExt;
use rpc_core::RawChannel;
use rpc_core::support::BoxFuture;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

pub type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

pub struct TungsteniteChannel {
    sink: Arc<Mutex<SplitSink<WsStream, Message>>>,
    open: Arc<AtomicBool>,
}

impl TungsteniteChannel {
    pub fn new(sink: SplitSink<WsStream, Message>) -> (Arc<dyn RawChannel>, Arc<AtomicBool>) {
        let open = Arc::new(AtomicBool::new(true));
        let channel = Arc::new(TungsteniteChannel {
            sink: Arc::new(Mutex::new(sink)),
            open: open.clone(),
        });
        (channel, open)
    }
}

impl RawChannel for TungsteniteChannel {
    fn send(&self, text: String) -> BoxFuture<'static, bool> {
        let sink = self.sink.clone();
        let open = self.open.clone();
        Box::pin(async move {
            if !open.load(Ordering::SeqCst) {
                return false;
            }
            let mut sink = sink.lock().await;
            sink.send(Message::Text(text.into())).await.is_ok()
        })
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}
