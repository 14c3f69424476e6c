//! Session data model
//!
//! One `SessionState` describes what the terminal shows and why. It has no
//! behavior beyond keeping its fields consistent with the active view; all
//! changes go through `transition()`.

use chrono::{DateTime, Utc};
use serde::Serialize;

pub const BALANCE_INQUIRY_TITLE: &str = "Balance Inquiry";
pub const WITHDRAWAL_TITLE: &str = "Withdrawal";

const DEFAULT_HOLDER_NAME: &str = "Valued Customer";

/// Channel status as last reported by the channel adapter
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connected,
}

/// The single active screen
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum View {
    #[default]
    Welcome,
    PinEntry,
    ActionChoice,
    Withdraw,
    Receipt,
}

impl View {
    pub fn as_str(self) -> &'static str {
        match self {
            View::Welcome => "welcome",
            View::PinEntry => "pin_entry",
            View::ActionChoice => "action_choice",
            View::Withdraw => "withdraw",
            View::Receipt => "receipt",
        }
    }

    /// Views that only make sense for an authorized cardholder.
    pub fn requires_account(self) -> bool {
        matches!(self, View::ActionChoice | View::Withdraw | View::Receipt)
    }
}

impl std::fmt::Display for View {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cardholder details established by a successful authorization
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Account {
    pub holder_name: String,
    pub masked_account_number: String,
    pub card_id: String,
}

impl Account {
    /// Build the account record from an `auth_result`.
    ///
    /// The backend may omit holder and account number; the card id then
    /// stands in for the account number on screen.
    pub fn from_auth(
        card_id: String,
        holder_name: Option<String>,
        account_number: Option<String>,
    ) -> Self {
        let holder_name = holder_name
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| DEFAULT_HOLDER_NAME.to_string());
        let masked_account_number =
            mask_account_number(account_number.as_deref().unwrap_or(&card_id));
        Self {
            holder_name,
            masked_account_number,
            card_id,
        }
    }
}

/// Mask everything but the last four alphanumeric characters.
pub fn mask_account_number(raw: &str) -> String {
    let visible: Vec<char> = raw.chars().filter(char::is_ascii_alphanumeric).collect();
    let tail: String = visible[visible.len().saturating_sub(4)..].iter().collect();
    format!("**** **** **** {tail}")
}

/// Receipt shown (and printed) at the end of a transaction
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Receipt {
    pub title: String,
    pub timestamp: DateTime<Utc>,
    pub amount: f64,
    pub resulting_balance: f64,
    /// Transaction reference printed on the slip.
    pub reference: u64,
}

impl Receipt {
    pub fn balance_inquiry(balance: f64, now: DateTime<Utc>) -> Self {
        Self {
            title: BALANCE_INQUIRY_TITLE.to_string(),
            timestamp: now,
            amount: 0.0,
            resulting_balance: balance,
            reference: 0,
        }
    }

    pub fn withdrawal(amount: f64, balance: f64, now: DateTime<Utc>) -> Self {
        Self {
            title: WITHDRAWAL_TITLE.to_string(),
            timestamp: now,
            amount,
            resulting_balance: balance,
            reference: 0,
        }
    }

    pub fn with_reference(mut self, reference: u64) -> Self {
        self.reference = reference;
        self
    }

    /// `TXN` followed by the zero-padded reference number.
    pub fn transaction_id(&self) -> String {
        format!("TXN{:06}", self.reference)
    }
}

/// The one outbound ledger request a session may have outstanding
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PendingRequest {
    Balance,
    Withdraw { amount: f64 },
}

/// Per-session record. `Default` is the initial Welcome state.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionState {
    pub view: View,
    pub card_id: Option<String>,
    pub pin_length: u32,
    /// Mirror of raw key events for diagnostics. Never used for authorization.
    pub pin_echo: String,
    pub account: Option<Account>,
    pub pending_withdraw_amount: Option<f64>,
    pub in_flight: Option<PendingRequest>,
    pub receipt: Option<Receipt>,
    pub notice: Option<String>,
}

impl SessionState {
    /// Full re-initialization.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Switch views, clearing whatever the new view does not own.
    pub fn enter(&mut self, view: View) {
        if view != self.view {
            self.notice = None;
        }
        if view != View::PinEntry {
            self.pin_length = 0;
            self.pin_echo.clear();
        }
        if view != View::Withdraw {
            self.pending_withdraw_amount = None;
        }
        if view != View::Receipt {
            self.receipt = None;
        }
        if !view.requires_account() {
            self.account = None;
            self.in_flight = None;
        }
        self.view = view;
    }

    /// First broken view/field invariant, if any.
    pub fn invariant_violation(&self) -> Option<&'static str> {
        if self.view.requires_account() != self.account.is_some() {
            return Some("account must be present exactly in authorized views");
        }
        if self.receipt.is_some() != (self.view == View::Receipt) {
            return Some("receipt must be present exactly in the receipt view");
        }
        if self.pending_withdraw_amount.is_some() && self.view != View::Withdraw {
            return Some("pending withdraw amount outside the withdraw view");
        }
        if self.in_flight.is_some() && self.account.is_none() {
            return Some("request in flight without an account");
        }
        if self.view != View::PinEntry && (self.pin_length != 0 || !self.pin_echo.is_empty()) {
            return Some("pin progress outside the pin entry view");
        }
        None
    }
}
