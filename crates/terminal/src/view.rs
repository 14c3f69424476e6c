//! Screen projection
//!
//! `project()` turns a published snapshot into a description of what the
//! terminal shows. `Display` renders it as plain text for the console.

use std::fmt;

use serde::Serialize;

use crate::receipt::render_receipt;
use crate::session::{ConnectionStatus, PendingRequest, View};
use crate::transition::TerminalSnapshot;

/// Log lines shown under the active panel.
pub const VISIBLE_LOG_LINES: usize = 5;

const MAX_PIN_DOTS: usize = 12;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ViewModel {
    pub connection: ConnectionStatus,
    pub panel: Panel,
    pub notice: Option<String>,
    pub recent_log: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "screen", rename_all = "snake_case")]
pub enum Panel {
    Welcome {
        card_hint: Option<String>,
    },
    PinEntry {
        card_hint: Option<String>,
        pin_dots: String,
        pin_echo: String,
    },
    ActionMenu {
        holder_name: String,
        masked_account_number: String,
        awaiting: Option<&'static str>,
    },
    WithdrawForm {
        holder_name: String,
        awaiting: Option<&'static str>,
    },
    Receipt {
        slip: String,
    },
}

pub fn project(snapshot: &TerminalSnapshot) -> ViewModel {
    let session = &snapshot.session;
    let card_hint = session.card_id.as_deref().map(card_hint);
    let awaiting = session.in_flight.map(|request| match request {
        PendingRequest::Balance => "balance",
        PendingRequest::Withdraw { .. } => "withdrawal",
    });
    let holder_name = session
        .account
        .as_ref()
        .map(|a| a.holder_name.clone())
        .unwrap_or_default();

    let panel = match session.view {
        View::Welcome => Panel::Welcome { card_hint },
        View::PinEntry => Panel::PinEntry {
            card_hint,
            pin_dots: "*".repeat((session.pin_length as usize).min(MAX_PIN_DOTS)),
            pin_echo: session.pin_echo.clone(),
        },
        View::ActionChoice => Panel::ActionMenu {
            holder_name,
            masked_account_number: session
                .account
                .as_ref()
                .map(|a| a.masked_account_number.clone())
                .unwrap_or_default(),
            awaiting,
        },
        View::Withdraw => Panel::WithdrawForm {
            holder_name,
            awaiting,
        },
        View::Receipt => Panel::Receipt {
            slip: session
                .receipt
                .as_ref()
                .map(|r| render_receipt(r, session.account.as_ref()))
                .unwrap_or_default(),
        },
    };

    let skip = snapshot.recent_log.len().saturating_sub(VISIBLE_LOG_LINES);
    ViewModel {
        connection: snapshot.connection_status,
        panel,
        notice: session.notice.clone(),
        recent_log: snapshot
            .recent_log
            .iter()
            .skip(skip)
            .map(ToString::to_string)
            .collect(),
    }
}

/// First four characters of the card id, the rest masked.
fn card_hint(card_id: &str) -> String {
    let head: String = card_id.chars().take(4).collect();
    format!("{head} **** **** ****")
}

impl fmt::Display for ViewModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = match self.connection {
            ConnectionStatus::Connected => "Connected",
            ConnectionStatus::Disconnected => "Disconnected",
        };
        writeln!(f, "---- Secure Banking Terminal [{status}] ----")?;

        match &self.panel {
            Panel::Welcome { card_hint } => {
                writeln!(f, "Welcome. Please tap your card.")?;
                if let Some(hint) = card_hint {
                    writeln!(f, "Card detected: {hint}")?;
                }
            }
            Panel::PinEntry {
                card_hint,
                pin_dots,
                pin_echo,
            } => {
                if let Some(hint) = card_hint {
                    writeln!(f, "Card: {hint}")?;
                }
                writeln!(f, "Enter your PIN on the keypad: [{pin_dots}]")?;
                if !pin_echo.is_empty() {
                    writeln!(f, "Keys received: {pin_echo}")?;
                }
                writeln!(f, "(* clears, # submits)")?;
            }
            Panel::ActionMenu {
                holder_name,
                masked_account_number,
                awaiting,
            } => {
                writeln!(f, "Hello, {holder_name}  ({masked_account_number})")?;
                writeln!(f, "  [balance]  Check balance")?;
                writeln!(f, "  [withdraw] Withdraw cash")?;
                writeln!(f, "  [done]     Log out")?;
                if let Some(what) = awaiting {
                    writeln!(f, "Waiting for {what} response...")?;
                }
            }
            Panel::WithdrawForm {
                holder_name,
                awaiting,
            } => {
                writeln!(f, "{holder_name}, enter the amount to withdraw:")?;
                writeln!(f, "  amount <value>   |   back")?;
                if let Some(what) = awaiting {
                    writeln!(f, "Waiting for {what} response...")?;
                }
            }
            Panel::Receipt { slip } => {
                f.write_str(slip)?;
                writeln!(f, "  [done] Finish   [reprint] Print again")?;
            }
        }

        if let Some(notice) = &self.notice {
            writeln!(f, "! {notice}")?;
        }
        if !self.recent_log.is_empty() {
            writeln!(f, "-- log --")?;
            for line in &self.recent_log {
                writeln!(f, "{line}")?;
            }
        }
        Ok(())
    }
}
