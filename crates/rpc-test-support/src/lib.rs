//! rpc-test-support: mock WebSocket client/server test doubles shared by
//! `rpc-core` and `rpc-client`'s integration tests.

pub mod mock_ws_client;
pub mod mock_ws_server;

pub use mock_ws_client::MockWsClient;
pub use mock_ws_server::{FrameHandler, MockWsServer};

#[cfg(test)]
mod tests {
    use super::*;
    use rpc_protocol::Frame;
    use std::sync::Arc;

    #[tokio::test]
    async fn echo_server_roundtrips_a_frame() {
        let server = MockWsServer::start().await.unwrap();
        let url = format!("ws://{}", server.local_addr());
        let mut client = MockWsClient::connect(&url).await.unwrap();

        client
            .send_frame(&Frame::new("hello", serde_json::json!({"n": 1})))
            .await
            .unwrap();
        let echoed = client.recv_frame().await.unwrap();
        assert_eq!(echoed.event, "hello");
        assert_eq!(echoed.data, serde_json::json!({"n": 1}));
    }

    #[tokio::test]
    async fn custom_handler_can_reply_with_a_different_frame() {
        let handler: FrameHandler = Arc::new(|frame| {
            if frame.event == "ping" {
                Some(Frame::new("pong", serde_json::Value::Null))
            } else {
                None
            }
        });
        let server = MockWsServer::start_with_handler(handler).await.unwrap();
        let url = format!("ws://{}", server.local_addr());
        let mut client = MockWsClient::connect(&url).await.unwrap();

        client
            .send_frame(&Frame::new("ping", serde_json::Value::Null))
            .await
            .unwrap();
        let reply = client.recv_frame().await.unwrap();
        assert_eq!(reply.event, "pong");
    }

    #[tokio::test]
    async fn multiple_clients_connect_independently() {
        let server = MockWsServer::start().await.unwrap();
        let url = format!("ws://{}", server.local_addr());
        let mut c1 = MockWsClient::connect(&url).await.unwrap();
        let mut c2 = MockWsClient::connect(&url).await.unwrap();

        c1.send_frame(&Frame::new("a", serde_json::json!(1)))
            .await
            .unwrap();
        c2.send_frame(&Frame::new("b", serde_json::json!(2)))
            .await
            .unwrap();

        assert_eq!(c1.recv_frame().await.unwrap().event, "a");
        assert_eq!(c2.recv_frame().await.unwrap().event, "b");
    }
}
