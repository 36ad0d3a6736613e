//! WS wire framing (spec §6): every frame is a two-element JSON sequence
//! `[event_name, data]`. `ping`/`pong` are reserved for heartbeats.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod reserved {
    pub const PING: &str = "ping";
    pub const PONG: &str = "pong";
}

/// A single `[event, data]` WS frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub event: String,
    pub data: Value,
}

impl Frame {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Frame {
            event: event.into(),
            data,
        }
    }

    pub fn ping() -> Self {
        Frame::new(reserved::PING, Value::Null)
    }

    pub fn pong() -> Self {
        Frame::new(reserved::PONG, Value::Null)
    }

    pub fn is_ping(&self) -> bool {
        self.event == reserved::PING
    }

    pub fn is_pong(&self) -> bool {
        self.event == reserved::PONG
    }

    /// Parses a raw text frame as a `[event, data]` sequence. Malformed
    /// frames (wrong arity, non-string event name) are rejected so callers
    /// can log-and-drop per spec §4.6/§6.
    pub fn parse(text: &str) -> Option<Frame> {
        let value: Value = serde_json::from_str(text).ok()?;
        let arr = value.as_array()?;
        if arr.len() != 2 {
            return None;
        }
        let event = arr[0].as_str()?.to_owned();
        Some(Frame::new(event, arr[1].clone()))
    }

    pub fn to_text(&self) -> String {
        serde_json::to_string(&(&self.event, &self.data))
            .expect("frame always serializes")
    }
}

/// The envelope header signaling a whole-body tagged-JSON response
/// (spec §4.1/§6).
pub const TAGGED_BODY_HEADER: &str = "x-is-superjson";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_frame() {
        let frame = Frame::parse(r#"["hello", {"n": 7}]"#).unwrap();
        assert_eq!(frame.event, "hello");
        assert_eq!(frame.data, serde_json::json!({"n": 7}));
    }

    #[test]
    fn rejects_wrong_arity() {
        assert!(Frame::parse(r#"["hello"]"#).is_none());
        assert!(Frame::parse(r#"["hello", 1, 2]"#).is_none());
    }

    #[test]
    fn rejects_non_string_event_name() {
        assert!(Frame::parse(r#"[1, "data"]"#).is_none());
    }

    #[test]
    fn round_trips_through_to_text() {
        let frame = Frame::new("hello", serde_json::json!({"n": 7}));
        let parsed = Frame::parse(&frame.to_text()).unwrap();
        assert_eq!(parsed, frame);
    }

    #[test]
    fn ping_pong_are_reserved_and_recognized() {
        assert!(Frame::ping().is_ping());
        assert!(Frame::pong().is_pong());
    }
}
