//! A mock WebSocket server for integration-testing `rpc-core`'s router and
//! `rpc-client`'s socket without standing up a full axum app.
//!
//! Binds to port 0 (random) and exposes the actual bound port; each test
//! gets its own isolated instance. Default behaviour is to echo every frame
//! back to the sender; pass a handler to `start_with_handler` to script
//! other responses (or drop a frame by returning `None`).

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use rpc_protocol::Frame;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::protocol::Message;

pub type FrameHandler = Arc<dyn Fn(Frame) -> Option<Frame> + Send + Sync>;

pub struct MockWsServer {
    addr: SocketAddr,
    _task: tokio::task::JoinHandle<()>,
}

impl MockWsServer {
    /// Starts a server that echoes every well-formed frame back to its sender.
    pub async fn start() -> Result<Self, Box<dyn std::error::Error>> {
        Self::start_with_handler(Arc::new(Some)).await
    }

    /// Starts a server whose replies are produced by `handler`. Malformed
    /// (non-`[event, data]`) text frames are dropped before reaching it.
    pub async fn start_with_handler(
        handler: FrameHandler,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let task = tokio::spawn(async move {
            Self::accept_loop(listener, handler).await;
        });
        Ok(Self { addr, _task: task })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    async fn accept_loop(listener: TcpListener, handler: FrameHandler) {
        loop {
            match listener.accept().await {
                Ok((stream, _peer)) => {
                    let handler = handler.clone();
                    tokio::spawn(async move {
                        let _ = Self::handle_connection(stream, handler).await;
                    });
                }
                Err(_) => break,
            }
        }
    }

    async fn handle_connection(
        stream: tokio::net::TcpStream,
        handler: FrameHandler,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        let (mut write, mut read) = ws_stream.split();

        while let Some(msg) = read.next().await {
            let msg = msg?;
            let text = match msg {
                Message::Text(t) => t,
                Message::Close(_) => break,
                Message::Ping(data) => {
                    write.send(Message::Pong(data)).await?;
                    continue;
                }
                _ => continue,
            };
            let Some(frame) = Frame::parse(&text) else {
                continue;
            };
            if let Some(reply) = handler(frame) {
                write.send(Message::Text(reply.to_text().into())).await?;
            }
        }

        Ok(())
    }
}
