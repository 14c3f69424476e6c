//! Backend → terminal events

use serde::{Deserialize, Serialize};

/// Named events pushed by the backend.
///
/// Response payloads keep their fields optional: a response with a missing
/// field still decodes so the terminal can log it as malformed instead of
/// dropping it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerMessage {
    // Card reader
    RfidDetected {
        rfid_uid: String,
    },
    RequestPin {
        rfid_uid: String,
    },

    // Keypad
    PinUpdated {
        pin_length: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pin_buffer: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        rfid_uid: Option<String>,
    },

    // Authentication
    AuthResult {
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        rfid_uid: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        holder_name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        account_number: Option<String>,
    },

    // Ledger
    BalanceResponse {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        balance: Option<f64>,
    },
    TransactionResult {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        success: Option<bool>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        amount: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        balance: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
}

impl ServerMessage {
    /// Wire name of the event.
    pub fn event_name(&self) -> &'static str {
        match self {
            ServerMessage::RfidDetected { .. } => "rfid_detected",
            ServerMessage::RequestPin { .. } => "request_pin",
            ServerMessage::PinUpdated { .. } => "pin_updated",
            ServerMessage::AuthResult { .. } => "auth_result",
            ServerMessage::BalanceResponse { .. } => "balance_response",
            ServerMessage::TransactionResult { .. } => "transaction_result",
        }
    }
}
