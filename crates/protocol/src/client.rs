//! Terminal → backend requests

use serde::{Deserialize, Serialize};

/// Named events sent from the terminal to the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientMessage {
    // Keypad emulation
    KeyPressed { key: String },

    // Ledger
    BalanceRequest { account_id: String },
    Withdraw { account_id: String, amount: f64 },
}

impl ClientMessage {
    /// Wire name of the event.
    pub fn event_name(&self) -> &'static str {
        match self {
            ClientMessage::KeyPressed { .. } => "key_pressed",
            ClientMessage::BalanceRequest { .. } => "balance_request",
            ClientMessage::Withdraw { .. } => "withdraw",
        }
    }
}
