//! Pure state transition function
//!
//! Every session rule lives here as a pure, synchronous function:
//! `transition(state, input, now) -> (state, effects)`.
//! No IO, no async, no timers. The actor executes the returned effects.

use chrono::{DateTime, Utc};
use kiosk_protocol::{is_keypad_key, ClientMessage, ServerMessage, ENTER_KEY};
use serde::Serialize;

use crate::channel::ChannelEvent;
use crate::diagnostic_log::{DiagnosticLog, LogEntry};
use crate::receipt::render_receipt;
use crate::session::{Account, ConnectionStatus, PendingRequest, Receipt, SessionState, View};
use crate::session_command::UserIntent;

// ---------------------------------------------------------------------------
// TerminalState: everything the actor owns
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct TerminalState {
    pub connection_status: ConnectionStatus,
    pub session: SessionState,
    /// Survives session resets.
    pub log: DiagnosticLog,
    /// Ticket of the scheduled auto-print, if one is pending.
    pub print_ticket: Option<u64>,
    pub next_ticket: u64,
    pub revision: u64,
}

impl TerminalState {
    pub fn new(log_capacity: usize) -> Self {
        Self {
            log: DiagnosticLog::with_capacity(log_capacity),
            ..Default::default()
        }
    }

    fn allocate_ticket(&mut self) -> u64 {
        self.next_ticket += 1;
        self.next_ticket
    }

    pub fn snapshot(&self, log_tail: usize) -> TerminalSnapshot {
        TerminalSnapshot {
            revision: self.revision,
            connection_status: self.connection_status,
            session: self.session.clone(),
            recent_log: self.log.tail(log_tail),
            log_len: self.log.len(),
            log_evicted: self.log.evicted(),
        }
    }
}

/// Read-only copy published after every transition
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TerminalSnapshot {
    pub revision: u64,
    pub connection_status: ConnectionStatus,
    pub session: SessionState,
    pub recent_log: Vec<LogEntry>,
    pub log_len: usize,
    pub log_evicted: u64,
}

// ---------------------------------------------------------------------------
// Input: channel and user events, presenter callbacks
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    Connected,
    Disconnected {
        reason: Option<String>,
    },
    Server(ServerMessage),
    Undecodable {
        event: Option<String>,
        error: String,
    },
    User(UserIntent),
    PrintDue {
        ticket: u64,
    },
    PrintFinished {
        ticket: u64,
        result: Result<(), String>,
    },
}

impl From<ChannelEvent> for Input {
    fn from(event: ChannelEvent) -> Self {
        match event {
            ChannelEvent::Connected => Input::Connected,
            ChannelEvent::Disconnected { reason } => Input::Disconnected { reason },
            ChannelEvent::Message(msg) => Input::Server(msg),
            ChannelEvent::Undecodable { event, error } => Input::Undecodable { event, error },
        }
    }
}

impl From<UserIntent> for Input {
    fn from(intent: UserIntent) -> Self {
        Input::User(intent)
    }
}

// ---------------------------------------------------------------------------
// Effects: IO for the caller to perform
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Fire-and-forget request to the backend.
    Send(ClientMessage),
    /// Start the settle-delay timer for an auto-print.
    SchedulePrint { ticket: u64 },
    /// Abandon a scheduled auto-print.
    CancelPrint { ticket: u64 },
    /// Hand rendered receipt content to the printer.
    Print { ticket: u64, content: String },
}

// ---------------------------------------------------------------------------
// transition(): the pure core
// ---------------------------------------------------------------------------

/// Pure, synchronous state transition.
///
/// Given the current state and an input, returns the new state and the
/// effects to execute. Every channel event and user intent appends exactly
/// one diagnostic log entry, including ones ignored as stale.
pub fn transition(
    mut state: TerminalState,
    input: Input,
    now: DateTime<Utc>,
) -> (TerminalState, Vec<Effect>) {
    let mut effects: Vec<Effect> = Vec::new();

    let note = match input {
        // -- Channel lifecycle ------------------------------------------------
        Input::Connected => {
            state.connection_status = ConnectionStatus::Connected;
            Some("Connected to banking system".to_string())
        }

        Input::Disconnected { reason } => {
            // The session is kept; the channel is expected to come back.
            state.connection_status = ConnectionStatus::Disconnected;
            Some(match reason {
                Some(reason) => format!("Disconnected: {reason}"),
                None => "Disconnected".to_string(),
            })
        }

        Input::Undecodable { event, error } => Some(match event.as_deref() {
            Some("balance_response") => {
                balance_failed(&mut state, &format!("undecodable response ({error})"))
            }
            Some("transaction_result") => {
                transaction_failed(&mut state, &format!("undecodable response ({error})"))
            }
            Some(name) => format!("Ignored undecodable {name} event: {error}"),
            None => format!("Ignored undecodable frame: {error}"),
        }),

        Input::Server(msg) => Some(apply_server_message(&mut state, msg, now, &mut effects)),

        Input::User(intent) => Some(apply_intent(&mut state, intent, &mut effects)),

        // -- Receipt presenter ------------------------------------------------
        Input::PrintDue { ticket } => {
            let due = state.print_ticket == Some(ticket) && state.session.view == View::Receipt;
            match (due, state.session.receipt.as_ref()) {
                (true, Some(receipt)) => {
                    let content = render_receipt(receipt, state.session.account.as_ref());
                    state.print_ticket = None;
                    effects.push(Effect::Print { ticket, content });
                    Some("Printing receipt".to_string())
                }
                // Superseded timer; nothing happened from the operator's view.
                _ => None,
            }
        }

        Input::PrintFinished { ticket, result } => Some(match result {
            Ok(()) => format!("Receipt printed (job {ticket})"),
            Err(error) => format!("Receipt printing failed (job {ticket}): {error}"),
        }),
    };

    if let Some(note) = note {
        state.log.append(now, note);
        state.revision += 1;
    }

    debug_assert_eq!(state.session.invariant_violation(), None);
    (state, effects)
}

fn apply_server_message(
    state: &mut TerminalState,
    msg: ServerMessage,
    now: DateTime<Utc>,
    effects: &mut Vec<Effect>,
) -> String {
    match msg {
        ServerMessage::RfidDetected { rfid_uid } => {
            let note = format!("RFID detected: {rfid_uid}");
            state.session.card_id = Some(rfid_uid);
            note
        }

        ServerMessage::RequestPin { rfid_uid } => {
            let mut note = format!("Card {rfid_uid}: enter PIN on physical keypad");
            if state.session.view.requires_account() {
                reset_session(state, effects);
                note.push_str(" (previous session discarded)");
            }
            enter_view(state, View::PinEntry, effects);
            let session = &mut state.session;
            session.card_id = Some(rfid_uid);
            session.pin_length = 0;
            session.pin_echo.clear();
            note
        }

        ServerMessage::PinUpdated {
            pin_length,
            pin_buffer,
            ..
        } => {
            if state.session.view != View::PinEntry {
                return stale("pin_updated", state.session.view);
            }
            state.session.pin_length = pin_length;
            state.session.pin_echo = pin_buffer.unwrap_or_default();
            format!("PIN updated: {pin_length} digit(s)")
        }

        ServerMessage::AuthResult {
            success,
            message,
            rfid_uid,
            holder_name,
            account_number,
        } => {
            if state.session.view != View::PinEntry {
                return stale("auth_result", state.session.view);
            }
            if !success {
                reset_session(state, effects);
                return format!(
                    "Authentication failed: {}; session reset",
                    message.as_deref().unwrap_or("no reason given")
                );
            }
            let Some(card_id) = rfid_uid.or_else(|| state.session.card_id.clone()) else {
                return "Ignored auth_result: no card presented".to_string();
            };
            state.session.card_id = Some(card_id.clone());
            state.session.account = Some(Account::from_auth(card_id, holder_name, account_number));
            enter_view(state, View::ActionChoice, effects);
            "Authentication successful - choose action".to_string()
        }

        ServerMessage::BalanceResponse { balance } => {
            if state.session.in_flight != Some(PendingRequest::Balance) {
                return stale("balance_response", state.session.view);
            }
            let Some(balance) = balance else {
                return balance_failed(state, "response missing balance");
            };
            state.session.in_flight = None;
            enter_view(state, View::Receipt, effects);
            state.session.receipt =
                Some(Receipt::balance_inquiry(balance, now).with_reference(state.next_ticket));
            format!("Received balance from server: ${balance:.2}")
        }

        ServerMessage::TransactionResult {
            success,
            amount,
            balance,
            message,
        } => {
            let Some(PendingRequest::Withdraw { amount: requested }) = state.session.in_flight
            else {
                return stale("transaction_result", state.session.view);
            };
            let Some(success) = success else {
                return transaction_failed(state, "response missing result");
            };
            state.session.in_flight = None;
            enter_view(state, View::Receipt, effects);
            state.session.receipt = Some(
                Receipt::withdrawal(amount.unwrap_or(requested), balance.unwrap_or(0.0), now)
                    .with_reference(state.next_ticket),
            );
            message.unwrap_or_else(|| {
                if success {
                    "Withdrawal approved".to_string()
                } else {
                    "Withdrawal declined".to_string()
                }
            })
        }
    }
}

fn apply_intent(state: &mut TerminalState, intent: UserIntent, effects: &mut Vec<Effect>) -> String {
    let view = state.session.view;
    match intent {
        UserIntent::ChooseBalance => {
            if view != View::ActionChoice {
                return ignored("Balance request", view);
            }
            if state.session.in_flight.is_some() {
                return "Balance request ignored: a request is already in flight".to_string();
            }
            let Some(account) = state.session.account.as_ref() else {
                return "Balance request ignored: no account".to_string();
            };
            effects.push(Effect::Send(ClientMessage::BalanceRequest {
                account_id: account.card_id.clone(),
            }));
            state.session.in_flight = Some(PendingRequest::Balance);
            state.session.notice = None;
            "Requested balance from server".to_string()
        }

        UserIntent::ChooseWithdraw => {
            if view != View::ActionChoice {
                return ignored("Withdraw selection", view);
            }
            enter_view(state, View::Withdraw, effects);
            "Withdrawal selected - enter amount".to_string()
        }

        UserIntent::SubmitWithdraw { amount } => {
            if view != View::Withdraw {
                return ignored("Withdrawal submit", view);
            }
            let Some(value) = parse_amount(&amount) else {
                return format!("Invalid withdraw amount: {:?}", amount.trim());
            };
            if state.session.in_flight.is_some() {
                return "Withdrawal ignored: a request is already in flight".to_string();
            }
            let Some(account) = state.session.account.as_ref() else {
                return "Withdrawal ignored: no account".to_string();
            };
            effects.push(Effect::Send(ClientMessage::Withdraw {
                account_id: account.card_id.clone(),
                amount: value,
            }));
            state.session.pending_withdraw_amount = Some(value);
            state.session.in_flight = Some(PendingRequest::Withdraw { amount: value });
            state.session.notice = None;
            format!("Requested withdrawal of ${value:.2}")
        }

        UserIntent::Back | UserIntent::Cancel => match view {
            View::Withdraw => {
                enter_view(state, View::ActionChoice, effects);
                "Returned to action menu".to_string()
            }
            View::ActionChoice => {
                reset_session(state, effects);
                "Session cancelled; session reset".to_string()
            }
            _ => ignored("Cancel", view),
        },

        UserIntent::Done => {
            if !view.requires_account() {
                return ignored("Logout", view);
            }
            reset_session(state, effects);
            "Session ended; session reset".to_string()
        }

        UserIntent::PressKey(key) => {
            if view != View::PinEntry {
                return ignored("Keypad input", view);
            }
            if !is_keypad_key(key) {
                return "Keypad input ignored: not a keypad key".to_string();
            }
            effects.push(Effect::Send(ClientMessage::KeyPressed {
                key: key.to_string(),
            }));
            "Keypad input sent".to_string()
        }

        UserIntent::SubmitPin { digits } => {
            if view != View::PinEntry {
                return ignored("PIN submit", view);
            }
            if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
                return "PIN submit ignored: PIN must be digits only".to_string();
            }
            for digit in digits.chars().chain(std::iter::once(ENTER_KEY)) {
                effects.push(Effect::Send(ClientMessage::KeyPressed {
                    key: digit.to_string(),
                }));
            }
            "PIN submitted for verification".to_string()
        }

        UserIntent::Reprint => {
            let content = match (view, state.session.receipt.as_ref()) {
                (View::Receipt, Some(receipt)) => {
                    render_receipt(receipt, state.session.account.as_ref())
                }
                _ => return ignored("Reprint", view),
            };
            let ticket = state.allocate_ticket();
            effects.push(Effect::Print { ticket, content });
            "Reprinting receipt".to_string()
        }
    }
}

/// Move to `view`, keeping the auto-print schedule in step: entering the
/// receipt view schedules one print, leaving it cancels a pending one.
fn enter_view(state: &mut TerminalState, view: View, effects: &mut Vec<Effect>) {
    let from = state.session.view;
    if from == View::Receipt && view != View::Receipt {
        cancel_pending_print(state, effects);
    }
    state.session.enter(view);
    if view == View::Receipt && from != View::Receipt {
        let ticket = state.allocate_ticket();
        state.print_ticket = Some(ticket);
        effects.push(Effect::SchedulePrint { ticket });
    }
}

fn reset_session(state: &mut TerminalState, effects: &mut Vec<Effect>) {
    cancel_pending_print(state, effects);
    state.session.reset();
}

fn cancel_pending_print(state: &mut TerminalState, effects: &mut Vec<Effect>) {
    if let Some(ticket) = state.print_ticket.take() {
        effects.push(Effect::CancelPrint { ticket });
    }
}

/// Malformed balance response: release the request and tell the user.
fn balance_failed(state: &mut TerminalState, detail: &str) -> String {
    if state.session.in_flight == Some(PendingRequest::Balance) {
        state.session.in_flight = None;
        state.session.notice = Some("Balance inquiry failed. Please try again.".to_string());
    }
    format!("Balance inquiry failed: {detail}")
}

/// Malformed transaction result: release the request and tell the user.
fn transaction_failed(state: &mut TerminalState, detail: &str) -> String {
    if matches!(state.session.in_flight, Some(PendingRequest::Withdraw { .. })) {
        state.session.in_flight = None;
        state.session.pending_withdraw_amount = None;
        state.session.notice = Some("Withdrawal failed. Please try again.".to_string());
    }
    format!("Transaction failed: {detail}")
}

/// A finite, strictly positive amount, or `None`.
pub fn parse_amount(raw: &str) -> Option<f64> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|amount| amount.is_finite() && *amount > 0.0)
}

fn stale(event: &str, view: View) -> String {
    format!("Ignored {event} while in {view}")
}

fn ignored(action: &str, view: View) -> String {
    format!("{action} ignored while in {view}")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 12, 30, 45).unwrap()
    }

    fn run(state: TerminalState, input: Input) -> (TerminalState, Vec<Effect>) {
        transition(state, input, now())
    }

    fn request_pin(uid: &str) -> Input {
        Input::Server(ServerMessage::RequestPin {
            rfid_uid: uid.to_string(),
        })
    }

    fn pin_updated(len: u32, echo: &str) -> Input {
        Input::Server(ServerMessage::PinUpdated {
            pin_length: len,
            pin_buffer: Some(echo.to_string()),
            rfid_uid: None,
        })
    }

    fn auth(success: bool, message: &str) -> Input {
        Input::Server(ServerMessage::AuthResult {
            success,
            message: Some(message.to_string()),
            rfid_uid: None,
            holder_name: None,
            account_number: None,
        })
    }

    fn balance(value: Option<f64>) -> Input {
        Input::Server(ServerMessage::BalanceResponse { balance: value })
    }

    fn tx_result(success: Option<bool>, amount: Option<f64>, balance: Option<f64>) -> Input {
        Input::Server(ServerMessage::TransactionResult {
            success,
            amount,
            balance,
            message: Some("Withdrawal complete".to_string()),
        })
    }

    fn user(intent: UserIntent) -> Input {
        Input::User(intent)
    }

    fn submit(amount: &str) -> Input {
        user(UserIntent::SubmitWithdraw {
            amount: amount.to_string(),
        })
    }

    fn authorized() -> TerminalState {
        let (state, _) = run(TerminalState::default(), Input::Connected);
        let (state, _) = run(state, request_pin("ABCD1234"));
        let (state, _) = run(state, auth(true, "Access granted"));
        assert_eq!(state.session.view, View::ActionChoice);
        state
    }

    fn in_receipt() -> (TerminalState, u64) {
        let (state, _) = run(authorized(), user(UserIntent::ChooseBalance));
        let (state, effects) = run(state, balance(Some(1250.75)));
        let ticket = match effects.as_slice() {
            [Effect::SchedulePrint { ticket }] => *ticket,
            other => panic!("expected a single SchedulePrint, got {other:?}"),
        };
        (state, ticket)
    }

    fn sends(effects: &[Effect]) -> Vec<&ClientMessage> {
        effects
            .iter()
            .filter_map(|e| match e {
                Effect::Send(msg) => Some(msg),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn connection_events_update_status_and_log() {
        let (state, effects) = run(TerminalState::default(), Input::Connected);
        assert_eq!(state.connection_status, ConnectionStatus::Connected);
        assert!(effects.is_empty());

        let (state, _) = run(
            state,
            Input::Disconnected {
                reason: Some("connection reset".to_string()),
            },
        );
        assert_eq!(state.connection_status, ConnectionStatus::Disconnected);
        assert_eq!(state.log.len(), 2);
        assert!(state.log.contains("connection reset"));
    }

    #[test]
    fn disconnect_mid_session_keeps_the_session() {
        let state = authorized();
        let (state, _) = run(state, Input::Disconnected { reason: None });
        assert_eq!(state.session.view, View::ActionChoice);
        assert!(state.session.account.is_some());
    }

    #[test]
    fn rfid_detected_sets_card_without_changing_view() {
        let (state, effects) = run(
            TerminalState::default(),
            Input::Server(ServerMessage::RfidDetected {
                rfid_uid: "ABCD1234".to_string(),
            }),
        );
        assert_eq!(state.session.view, View::Welcome);
        assert_eq!(state.session.card_id.as_deref(), Some("ABCD1234"));
        assert!(effects.is_empty());
        assert!(state.log.contains("RFID detected: ABCD1234"));
    }

    #[test]
    fn scenario_a_card_pin_and_successful_auth() {
        let (state, _) = run(TerminalState::default(), request_pin("ABCD1234"));
        assert_eq!(state.session.view, View::PinEntry);
        assert_eq!(state.session.card_id.as_deref(), Some("ABCD1234"));
        assert_eq!(state.session.pin_length, 0);

        let (state, _) = run(state, pin_updated(3, "1 2 3"));
        assert_eq!(state.session.pin_length, 3);
        assert_eq!(state.session.pin_echo, "1 2 3");

        let (state, effects) = run(state, auth(true, "Access granted"));
        assert_eq!(state.session.view, View::ActionChoice);
        let account = state.session.account.as_ref().expect("account populated");
        assert_eq!(account.card_id, "ABCD1234");
        assert_eq!(account.masked_account_number, "**** **** **** 1234");
        assert_eq!(state.session.pin_length, 0, "pin progress is cleared");
        assert!(effects.is_empty());
    }

    #[test]
    fn scenario_b_balance_inquiry() {
        let (state, effects) = run(authorized(), user(UserIntent::ChooseBalance));
        assert_eq!(
            sends(&effects),
            vec![&ClientMessage::BalanceRequest {
                account_id: "ABCD1234".to_string()
            }]
        );
        assert_eq!(state.session.view, View::ActionChoice);

        let (state, effects) = run(state, user(UserIntent::ChooseBalance));
        assert!(sends(&effects).is_empty(), "only one request in flight");

        let (state, effects) = run(state, balance(Some(1250.75)));
        assert_eq!(state.session.view, View::Receipt);
        let receipt = state.session.receipt.as_ref().expect("receipt");
        assert_eq!(receipt.title, "Balance Inquiry");
        assert_eq!(receipt.amount, 0.0);
        assert_eq!(receipt.resulting_balance, 1250.75);
        assert_eq!(receipt.timestamp, now());
        assert!(state.session.in_flight.is_none());
        assert!(matches!(effects.as_slice(), [Effect::SchedulePrint { .. }]));
    }

    #[test]
    fn scenario_c_withdrawal() {
        let (state, _) = run(authorized(), user(UserIntent::ChooseWithdraw));
        assert_eq!(state.session.view, View::Withdraw);

        let (state, effects) = run(state, submit("50"));
        assert_eq!(
            sends(&effects),
            vec![&ClientMessage::Withdraw {
                account_id: "ABCD1234".to_string(),
                amount: 50.0
            }]
        );
        assert_eq!(state.session.pending_withdraw_amount, Some(50.0));
        assert_eq!(state.session.view, View::Withdraw);

        let (state, effects) = run(state, tx_result(Some(true), Some(50.0), Some(1200.75)));
        assert_eq!(state.session.view, View::Receipt);
        let receipt = state.session.receipt.as_ref().expect("receipt");
        assert_eq!(receipt.title, "Withdrawal");
        assert_eq!(receipt.amount, 50.0);
        assert_eq!(receipt.resulting_balance, 1200.75);
        assert!(state.session.pending_withdraw_amount.is_none());
        assert!(state.log.contains("Withdrawal complete"));
        assert!(matches!(effects.as_slice(), [Effect::SchedulePrint { .. }]));
    }

    #[test]
    fn scenario_d_failed_auth_resets_session() {
        let (state, _) = run(TerminalState::default(), request_pin("ABCD1234"));
        let (state, _) = run(state, pin_updated(4, "1 2 3 4"));
        let (state, effects) = run(state, auth(false, "bad pin"));

        assert_eq!(state.session, SessionState::default());
        assert!(state.session.account.is_none());
        assert!(state.log.contains("bad pin"));
        assert!(effects.is_empty());
    }

    #[test]
    fn scenario_e_pin_update_in_welcome_only_logs() {
        let before = TerminalState::default();
        let (state, effects) = run(before.clone(), pin_updated(2, "1 2"));

        assert_eq!(state.session, before.session);
        assert_eq!(state.log.len(), 1);
        assert!(state.log.contains("Ignored pin_updated while in welcome"));
        assert!(effects.is_empty());
    }

    #[test]
    fn auth_result_outside_pin_entry_is_stale() {
        let (state, _) = run(TerminalState::default(), auth(true, "Access granted"));
        assert_eq!(state.session.view, View::Welcome);
        assert!(state.session.account.is_none());

        let state = authorized();
        let (state, _) = run(state, auth(false, "late failure"));
        assert_eq!(state.session.view, View::ActionChoice, "no reset outside PinEntry");
    }

    #[test]
    fn auth_result_uses_backend_account_details() {
        let (state, _) = run(TerminalState::default(), request_pin("ABCD1234"));
        let (state, _) = run(
            state,
            Input::Server(ServerMessage::AuthResult {
                success: true,
                message: None,
                rfid_uid: Some("ABCD1234".to_string()),
                holder_name: Some("Jane Roe".to_string()),
                account_number: Some("4000123456789010".to_string()),
            }),
        );
        let account = state.session.account.expect("account");
        assert_eq!(account.holder_name, "Jane Roe");
        assert_eq!(account.masked_account_number, "**** **** **** 9010");
    }

    #[test]
    fn invalid_withdraw_amounts_never_send() {
        let (mut state, _) = run(authorized(), user(UserIntent::ChooseWithdraw));
        for raw in ["0", "-5", "abc", "", "NaN", "inf", "1e999"] {
            let before = state.session.clone();
            let (next, effects) = run(state, submit(raw));
            assert!(sends(&effects).is_empty(), "{raw:?} must not be sent");
            assert_eq!(next.session, before, "{raw:?} must not change state");
            assert!(next.log.contains("Invalid withdraw amount"));
            state = next;
        }
    }

    #[test]
    fn withdraw_amount_is_trimmed() {
        assert_eq!(parse_amount(" 20.5 "), Some(20.5));
        assert_eq!(parse_amount("0.0"), None);
    }

    #[test]
    fn second_withdraw_while_in_flight_is_ignored() {
        let (state, _) = run(authorized(), user(UserIntent::ChooseWithdraw));
        let (state, _) = run(state, submit("50"));
        let (state, effects) = run(state, submit("60"));
        assert!(sends(&effects).is_empty());
        assert_eq!(state.session.pending_withdraw_amount, Some(50.0));
    }

    #[test]
    fn balance_response_without_request_is_stale() {
        let (state, effects) = run(authorized(), balance(Some(10.0)));
        assert_eq!(state.session.view, View::ActionChoice);
        assert!(state.session.receipt.is_none());
        assert!(effects.is_empty());
        assert!(state.log.contains("Ignored balance_response"));
    }

    #[test]
    fn malformed_balance_response_sets_notice_and_frees_slot() {
        let (state, _) = run(authorized(), user(UserIntent::ChooseBalance));
        let (state, effects) = run(state, balance(None));

        assert_eq!(state.session.view, View::ActionChoice);
        assert!(state.session.in_flight.is_none());
        assert!(state.session.notice.is_some());
        assert!(effects.is_empty());
        assert!(state.log.contains("Balance inquiry failed"));

        let (_, effects) = run(state, user(UserIntent::ChooseBalance));
        assert_eq!(sends(&effects).len(), 1, "user may retry");
    }

    #[test]
    fn undecodable_transaction_result_counts_as_malformed() {
        let (state, _) = run(authorized(), user(UserIntent::ChooseWithdraw));
        let (state, _) = run(state, submit("50"));
        let (state, _) = run(
            state,
            Input::Undecodable {
                event: Some("transaction_result".to_string()),
                error: "invalid type: string \"yes\", expected a boolean".to_string(),
            },
        );
        assert_eq!(state.session.view, View::Withdraw);
        assert!(state.session.in_flight.is_none());
        assert!(state.session.pending_withdraw_amount.is_none());
        assert!(state.log.contains("Transaction failed"));
    }

    #[test]
    fn transaction_result_missing_success_is_malformed() {
        let (state, _) = run(authorized(), user(UserIntent::ChooseWithdraw));
        let (state, _) = run(state, submit("50"));
        let (state, effects) = run(state, tx_result(None, Some(50.0), Some(1.0)));
        assert_eq!(state.session.view, View::Withdraw);
        assert!(state.session.receipt.is_none());
        assert!(effects.is_empty());
    }

    #[test]
    fn transaction_result_falls_back_to_requested_amount() {
        let (state, _) = run(authorized(), user(UserIntent::ChooseWithdraw));
        let (state, _) = run(state, submit("40"));
        let (state, _) = run(state, tx_result(Some(false), None, None));
        let receipt = state.session.receipt.expect("receipt");
        assert_eq!(receipt.amount, 40.0);
        assert_eq!(receipt.resulting_balance, 0.0);
    }

    #[test]
    fn back_and_cancel_navigation() {
        let (state, _) = run(authorized(), user(UserIntent::ChooseWithdraw));
        let (state, _) = run(state, user(UserIntent::Back));
        assert_eq!(state.session.view, View::ActionChoice);
        assert!(state.session.account.is_some());

        let (state, _) = run(state, user(UserIntent::Cancel));
        assert_eq!(state.session, SessionState::default());
    }

    #[test]
    fn done_from_receipt_resets_and_cancels_print() {
        let (state, ticket) = in_receipt();
        let (state, effects) = run(state, user(UserIntent::Done));
        assert_eq!(state.session, SessionState::default());
        assert_eq!(effects, vec![Effect::CancelPrint { ticket }]);
        assert!(state.print_ticket.is_none());
    }

    #[test]
    fn reset_twice_matches_reset_once() {
        let (state, _) = in_receipt();
        let (once, _) = run(state, user(UserIntent::Done));
        let (twice, effects) = run(once.clone(), user(UserIntent::Done));
        assert_eq!(once.session, twice.session);
        assert!(effects.is_empty());
    }

    #[test]
    fn print_fires_once_for_current_ticket() {
        let (state, ticket) = in_receipt();
        let (state, _) = run(state, pin_updated(1, "1"));
        let (state, effects) = run(state, Input::PrintDue { ticket });
        assert!(matches!(
            effects.as_slice(),
            [Effect::Print { ticket: t, content }] if *t == ticket && content.contains("Balance Inquiry")
        ));

        let (_, effects) = run(state, Input::PrintDue { ticket });
        assert!(effects.is_empty(), "a ticket prints at most once");
    }

    #[test]
    fn print_due_after_reset_is_ignored() {
        let (state, ticket) = in_receipt();
        let (state, _) = run(state, user(UserIntent::Done));
        let log_len = state.log.len();
        let (state, effects) = run(state, Input::PrintDue { ticket });
        assert!(effects.is_empty());
        assert_eq!(state.log.len(), log_len);
    }

    #[test]
    fn print_finished_logs_outcome() {
        let (state, _) = run(
            TerminalState::default(),
            Input::PrintFinished {
                ticket: 3,
                result: Err("paper out".to_string()),
            },
        );
        assert!(state.log.contains("Receipt printing failed (job 3): paper out"));
    }

    #[test]
    fn receipt_reference_matches_its_print_ticket() {
        let (state, ticket) = in_receipt();
        let receipt = state.session.receipt.as_ref().expect("receipt");
        assert_eq!(receipt.reference, ticket);

        let (_, effects) = run(state, Input::PrintDue { ticket });
        match effects.as_slice() {
            [Effect::Print { content, .. }] => {
                assert!(content.contains(&format!("Ref: TXN{ticket:06}")));
            }
            other => panic!("unexpected effects {other:?}"),
        }
    }

    #[test]
    fn reprint_prints_immediately_without_touching_schedule() {
        let (state, ticket) = in_receipt();
        let (state, effects) = run(state, user(UserIntent::Reprint));
        assert!(matches!(effects.as_slice(), [Effect::Print { ticket: t, .. }] if *t != ticket));
        assert_eq!(state.print_ticket, Some(ticket));
    }

    #[test]
    fn request_pin_mid_session_starts_fresh() {
        let (state, ticket) = in_receipt();
        let (state, effects) = run(state, request_pin("FFFF0000"));
        assert_eq!(state.session.view, View::PinEntry);
        assert_eq!(state.session.card_id.as_deref(), Some("FFFF0000"));
        assert!(state.session.account.is_none());
        assert_eq!(effects, vec![Effect::CancelPrint { ticket }]);
    }

    #[test]
    fn legacy_pin_submit_sends_each_digit_then_enter() {
        let (state, _) = run(TerminalState::default(), request_pin("ABCD1234"));
        let (state, effects) = run(
            state,
            user(UserIntent::SubmitPin {
                digits: "9876".to_string(),
            }),
        );
        let keys: Vec<_> = sends(&effects)
            .into_iter()
            .map(|msg| match msg {
                ClientMessage::KeyPressed { key } => key.as_str(),
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(keys, vec!["9", "8", "7", "6", "#"]);
        assert!(!state.log.contains("9876"), "PIN digits are never logged");
        assert_eq!(
            state.log.last().map(|e| e.message.as_str()),
            Some("PIN submitted for verification")
        );
    }

    #[test]
    fn key_presses_only_in_pin_entry() {
        let (state, effects) = run(TerminalState::default(), user(UserIntent::PressKey('5')));
        assert!(effects.is_empty());

        let (state, _) = run(state, request_pin("ABCD1234"));
        let (state, effects) = run(state, user(UserIntent::PressKey('X')));
        assert!(effects.is_empty());
        let (_, effects) = run(state, user(UserIntent::PressKey('*')));
        assert_eq!(
            sends(&effects),
            vec![&ClientMessage::KeyPressed {
                key: "*".to_string()
            }]
        );
    }

    #[test]
    fn every_event_and_intent_appends_one_entry() {
        let inputs = vec![
            Input::Connected,
            Input::Server(ServerMessage::RfidDetected {
                rfid_uid: "ABCD1234".to_string(),
            }),
            request_pin("ABCD1234"),
            pin_updated(1, "1"),
            auth(true, "ok"),
            user(UserIntent::ChooseBalance),
            balance(None),
            user(UserIntent::ChooseWithdraw),
            submit("oops"),
            submit("20"),
            tx_result(Some(true), Some(20.0), Some(80.0)),
            user(UserIntent::Done),
            Input::Undecodable {
                event: None,
                error: "expected value".to_string(),
            },
            Input::Disconnected { reason: None },
        ];
        let mut state = TerminalState::default();
        for (i, input) in inputs.into_iter().enumerate() {
            state = run(state, input).0;
            assert_eq!(state.log.len(), i + 1);
        }
    }

    /// Drive every short sequence of inputs from a few starting points and
    /// check the view/field invariants after each step.
    #[test]
    fn invariants_hold_across_input_sequences() {
        let alphabet = vec![
            request_pin("ABCD1234"),
            pin_updated(2, "1 2"),
            auth(true, "ok"),
            auth(false, "bad pin"),
            balance(Some(5.0)),
            balance(None),
            tx_result(Some(true), Some(5.0), Some(0.0)),
            tx_result(None, None, None),
            user(UserIntent::ChooseBalance),
            user(UserIntent::ChooseWithdraw),
            submit("5"),
            submit("-1"),
            user(UserIntent::Back),
            user(UserIntent::Done),
            user(UserIntent::Reprint),
            Input::PrintDue { ticket: 1 },
            Input::Disconnected { reason: None },
        ];

        let starts = vec![TerminalState::default(), authorized(), in_receipt().0];
        for start in starts {
            for a in &alphabet {
                for b in &alphabet {
                    for c in &alphabet {
                        let mut state = start.clone();
                        for input in [a, b, c] {
                            state = run(state, input.clone()).0;
                            assert_eq!(
                                state.session.invariant_violation(),
                                None,
                                "after {input:?}"
                            );
                            if state.session.account.is_some() {
                                assert!(state.session.view.requires_account());
                            }
                            if state.print_ticket.is_some() {
                                assert_eq!(state.session.view, View::Receipt);
                            }
                        }
                    }
                }
            }
        }
    }
}
