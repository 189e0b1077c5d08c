//! Wire messages exchanged over a peer channel.
//!
//! Every call carries a request envelope of free-form `data` plus transport
//! `headers`. On the wire the envelope is wrapped in a frame that adds the
//! method name and a correlation id, and responses echo that id back with
//! either a payload or an error message.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Request envelope supplied by the caller: method arguments and headers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    /// Method arguments; an empty object for argument-less calls.
    #[serde(default)]
    pub data: Value,
    /// Transport headers attached to the call.
    #[serde(default)]
    pub headers: Map<String, Value>,
}

impl RequestEnvelope {
    /// An empty-bodied envelope announcing a JSON payload, the form used for
    /// every peer query.
    pub fn json() -> Self {
        let mut headers = Map::new();
        headers.insert(
            "Content-Type".to_string(),
            Value::String("application/json".to_string()),
        );
        RequestEnvelope {
            data: Value::Object(Map::new()),
            headers,
        }
    }
}

impl Default for RequestEnvelope {
    fn default() -> Self {
        RequestEnvelope::json()
    }
}

/// A single outgoing call as serialized onto the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestFrame {
    /// Correlation id echoed back by the matching response.
    pub id: u64,
    /// Method name, e.g. `p2p.peer.getPeers`.
    pub event: String,
    /// The caller-supplied envelope.
    #[serde(flatten)]
    pub envelope: RequestEnvelope,
}

impl RequestFrame {
    /// Create a frame for one call.
    pub fn new(id: u64, event: impl Into<String>, envelope: RequestEnvelope) -> Self {
        RequestFrame {
            id,
            event: event.into(),
            envelope,
        }
    }
}

/// A single incoming response as parsed off the wire.
///
/// Exactly one of `data` and `error` is expected to be present; a response
/// with neither is treated as an empty payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseFrame {
    /// Correlation id of the request this frame answers.
    pub id: u64,
    /// Successful response payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Error message when the peer rejected the call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ResponseFrame {
    /// A successful response carrying a payload.
    pub fn data(id: u64, data: Value) -> Self {
        ResponseFrame {
            id,
            data: Some(data),
            error: None,
        }
    }

    /// An error response carrying a message.
    pub fn error(id: u64, message: impl Into<String>) -> Self {
        ResponseFrame {
            id,
            data: None,
            error: Some(message.into()),
        }
    }
}
