//! JSON envelope encoding for WebSocket text frames

use serde_json::Value;
use thiserror::Error;

use crate::client::ClientMessage;
use crate::server::ServerMessage;

#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame was not valid JSON or did not match any known event.
    /// `event` carries the envelope's event name when one could be read.
    #[error("undecodable frame (event: {}): {source}", event.as_deref().unwrap_or("unknown"))]
    Decode {
        event: Option<String>,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode {event}: {source}")]
    Encode {
        event: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

impl ProtocolError {
    /// Event name of the frame that failed to decode, if known.
    pub fn event(&self) -> Option<&str> {
        match self {
            ProtocolError::Decode { event, .. } => event.as_deref(),
            ProtocolError::Encode { event, .. } => Some(event),
        }
    }
}

/// Decode a backend text frame.
pub fn decode_server_frame(text: &str) -> Result<ServerMessage, ProtocolError> {
    let value: Value = serde_json::from_str(text).map_err(|source| ProtocolError::Decode {
        event: None,
        source,
    })?;
    let event = value
        .get("event")
        .and_then(Value::as_str)
        .map(str::to_string);
    serde_json::from_value(value).map_err(|source| ProtocolError::Decode { event, source })
}

/// Encode a terminal request as a text frame.
pub fn encode_client_frame(msg: &ClientMessage) -> Result<String, ProtocolError> {
    serde_json::to_string(msg).map_err(|source| ProtocolError::Encode {
        event: msg.event_name(),
        source,
    })
}
