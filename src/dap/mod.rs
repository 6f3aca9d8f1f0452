//! Debug Adapter Protocol wire contract: the JSON envelope and the
//! `Content-Length` framing. The adapter loop itself lives in an external
//! frontend; the runtime only promises these shapes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Requests the runtime side must accept.
pub const SUPPORTED_REQUESTS: &[&str] = &[
    "initialize",
    "launch",
    "configurationDone",
    "setBreakpoints",
    "breakpointLocations",
    "threads",
    "stackTrace",
    "scopes",
    "variables",
    "continue",
    "next",
    "stepIn",
    "stepOut",
    "pause",
    "disconnect",
    "terminate",
];

/// Reasons carried by a `stopped` event.
pub const STOP_REASONS: &[&str] = &["breakpoint", "exception", "pause", "step"];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Message {
    Request(Request),
    Response(Response),
    Event(Event),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Request {
    pub seq: i64,
    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Response {
    pub seq: i64,
    pub request_seq: i64,
    pub success: bool,
    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    pub seq: i64,
    pub event: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

/// `initialize` arguments the runtime honors: clients may shift line and
/// column numbering, 1-based by default.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InitializeArguments {
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default = "default_true")]
    pub lines_start_at1: bool,
    #[serde(default = "default_true")]
    pub columns_start_at1: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug)]
pub enum FrameError {
    MissingContentLength,
    InvalidJson(String),
}

impl std::fmt::Display for FrameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameError::MissingContentLength => write!(f, "missing Content-Length header"),
            FrameError::InvalidJson(message) => write!(f, "invalid message body: {}", message),
        }
    }
}

impl std::error::Error for FrameError {}

/// Frame a message as `Content-Length: N\r\n\r\n<json>`.
pub fn encode(message: &Message) -> Vec<u8> {
    let body = serde_json::to_vec(message).unwrap_or_default();
    let mut framed = format!("Content-Length: {}\r\n\r\n", body.len()).into_bytes();
    framed.extend_from_slice(&body);
    framed
}

/// Incremental decoder over a byte stream of framed messages.
#[derive(Debug, Default)]
pub struct Decoder {
    buffer: Vec<u8>,
}

impl Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Pop the next complete message, if the buffer holds one.
    pub fn next_message(&mut self) -> Result<Option<Message>, FrameError> {
        let header_end = match find_header_end(&self.buffer) {
            Some(position) => position,
            None => return Ok(None),
        };
        let header = String::from_utf8_lossy(&self.buffer[..header_end]);
        let length = header
            .lines()
            .find_map(|line| {
                let (name, value) = line.split_once(':')?;
                if name.trim().eq_ignore_ascii_case("content-length") {
                    value.trim().parse::<usize>().ok()
                } else {
                    None
                }
            })
            .ok_or(FrameError::MissingContentLength)?;

        let body_start = header_end + 4;
        if self.buffer.len() < body_start + length {
            return Ok(None);
        }
        let body: Vec<u8> = self.buffer.drain(..body_start + length).collect();
        let message = serde_json::from_slice(&body[body_start..])
            .map_err(|error| FrameError::InvalidJson(error.to_string()))?;
        Ok(Some(message))
    }
}

fn find_header_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(4).position(|window| window == b"\r\n\r\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_round_trip() {
        let message = Message::Request(Request {
            seq: 1,
            command: "initialize".to_string(),
            arguments: Some(serde_json::json!({ "linesStartAt1": false })),
        });
        let encoded = encode(&message);

        let mut decoder = Decoder::new();
        // Feed in two pieces to exercise the incremental path.
        decoder.feed(&encoded[..10]);
        assert!(decoder.next_message().unwrap().is_none());
        decoder.feed(&encoded[10..]);
        let decoded = decoder.next_message().unwrap().unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn initialize_arguments_default_to_one_based() {
        let arguments: InitializeArguments = serde_json::from_value(serde_json::json!({})).unwrap();
        assert!(arguments.lines_start_at1);
        assert!(arguments.columns_start_at1);

        let arguments: InitializeArguments =
            serde_json::from_value(serde_json::json!({ "linesStartAt1": false })).unwrap();
        assert!(!arguments.lines_start_at1);
    }

    #[test]
    fn event_envelope_serializes_with_type_tag() {
        let event = Message::Event(Event {
            seq: 7,
            event: "stopped".to_string(),
            body: Some(serde_json::json!({ "reason": "breakpoint" })),
        });
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "event");
        assert_eq!(value["event"], "stopped");
    }
}
