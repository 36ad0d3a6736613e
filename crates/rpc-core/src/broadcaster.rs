//! The IO broadcaster (spec C4): `io.to(room).emit(event, data)`.
//!
//! The spec's host runs single-threaded, so `to` can mutate and return
//! `this`. Shared across concurrent axum handlers, that would race two
//! requests targeting the same `IoBroadcaster` against one mutable target
//! field. `to` instead returns a fresh, owned [`RoomEmitter`] per call —
//! same call-site shape, no shared mutable state.

use crate::pubsub::PubSubAdapter;
use rpc_protocol::{Frame, RpcError};
use std::sync::Arc;

#[derive(Clone)]
pub struct IoBroadcaster {
    adapter: Arc<dyn PubSubAdapter>,
}

impl IoBroadcaster {
    pub fn new(adapter: Arc<dyn PubSubAdapter>) -> Self {
        IoBroadcaster { adapter }
    }

    pub fn to(&self, room: impl Into<String>) -> RoomEmitter {
        RoomEmitter {
            adapter: self.adapter.clone(),
            room: room.into(),
        }
    }
}

pub struct RoomEmitter {
    adapter: Arc<dyn PubSubAdapter>,
    room: String,
}

impl RoomEmitter {
    pub async fn emit(
        self,
        event: impl Into<String>,
        data: serde_json::Value,
    ) -> Result<(), RpcError> {
        self.adapter.publish(self.room, Frame::new(event, data)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pubsub::InProcessPubSub;

    #[tokio::test]
    async fn to_emit_publishes_to_the_named_room() {
        let adapter = InProcessPubSub::new();
        let io = IoBroadcaster::new(adapter.clone());
        io.to("race-1")
            .emit("lap", serde_json::json!({"n": 1}))
            .await
            .unwrap();
    }
}
