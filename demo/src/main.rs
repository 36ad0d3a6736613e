//! A small chat server exercising the full stack: a couple of plain HTTP
//! procedures, and a WS room that relays chat messages through the IO
//! broadcaster so every subscriber of the room receives them, including
//! across processes when `PUBSUB_BASE_URL` points at a shared adapter.

use rpc_core::schema::{serde_schema, SchemaValidator};
use rpc_core::{
    HttpStreamPubSub, InProcessPubSub, IoBroadcaster, Json, ProcedureBuilder, PubSubAdapter,
    Router,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Deserialize)]
struct Greeting {
    name: String,
}

#[derive(Deserialize, Serialize, Clone)]
struct ChatMessage {
    author: String,
    body: String,
}

const LOBBY: &str = "lobby";

#[tokio::main]
async fn main() {
    let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_owned());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(log_level))
        .init();

    let adapter = build_pubsub_adapter();
    let io = IoBroadcaster::new(adapter.clone());

    let ping = ProcedureBuilder::new().get(|_input: (), _ctx| async move { Ok(Json("pong")) });

    let greet = ProcedureBuilder::new()
        .input(serde_schema::<Greeting>())
        .get(|input: Greeting, _ctx| async move { Ok(Json(format!("hello, {}", input.name))) });

    let chat = ProcedureBuilder::new()
        .incoming(Arc::new(SchemaValidator::new(serde_schema::<ChatMessage>())))
        .outgoing(Arc::new(SchemaValidator::new(serde_schema::<ChatMessage>())))
        .ws(move |socket| {
            let io = io.clone();
            async move {
                socket.join(LOBBY).await;
                socket.emitter.on("message", move |data: serde_json::Value| {
                    let io = io.clone();
                    async move {
                        io.to(LOBBY).emit("message", data).await
                    }
                });
                rpc_core::ConnectionHooks::default()
            }
        });

    let router = Arc::new(
        Router::new()
            .route("ping", ping)
            .route("greet", greet)
            .route("chat", chat),
    );

    let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_owned());
    let app = router.into_axum_router(adapter);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .expect("failed to bind");
    info!(addr = %bind_addr, "demo server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");
    info!("server shut down gracefully");
}

/// `HttpStreamPubSub` when `PUBSUB_BASE_URL` is set (multi-process
/// deployment with a shared pub/sub backend), `InProcessPubSub` otherwise.
fn build_pubsub_adapter() -> Arc<dyn PubSubAdapter> {
    match env::var("PUBSUB_BASE_URL") {
        Ok(base_url) => {
            let token = env::var("PUBSUB_TOKEN").ok();
            info!(base_url = %base_url, "using HTTP-streamed pub/sub adapter");
            HttpStreamPubSub::new(base_url, token)
        }
        Err(_) => {
            info!("no PUBSUB_BASE_URL set, using in-process pub/sub adapter");
            InProcessPubSub::new()
        }
    }
}

/// Waits for SIGTERM or Ctrl-C (SIGINT) and returns to trigger graceful shutdown.
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => { info!("received Ctrl+C, shutting down"); },
        _ = terminate => { info!("received SIGTERM, shutting down"); },
    }
}
