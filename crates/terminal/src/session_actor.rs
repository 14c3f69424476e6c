//! Terminal actor: owns the TerminalState and processes inputs sequentially.
//!
//! Channel events and user intents are serialized through one tokio task.
//! Each input goes through `transition()`; the returned effects are executed
//! against the channel and the receipt presenter. Readers get lock-free
//! snapshots through `ArcSwap` and a revision `watch` for change wakeups.

use std::sync::Arc;

use arc_swap::ArcSwap;
use chrono::Utc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::channel::{ChannelEvent, ChannelHandle};
use crate::diagnostic_log::LogEntry;
use crate::receipt::ReceiptPresenter;
use crate::session_command::{TerminalCommand, UserIntent};
use crate::transition::{transition, Effect, Input, TerminalSnapshot, TerminalState};

/// Log entries carried in each published snapshot.
pub const SNAPSHOT_LOG_TAIL: usize = 20;

const COMMAND_BUFFER: usize = 256;

/// Handle to the running terminal actor (cheap to Clone).
#[derive(Clone)]
pub struct TerminalActorHandle {
    command_tx: mpsc::Sender<TerminalCommand>,
    snapshot: Arc<ArcSwap<TerminalSnapshot>>,
    revision_rx: watch::Receiver<u64>,
}

impl TerminalActorHandle {
    /// Spawn the actor. It runs until `Shutdown` is received.
    pub fn spawn(
        state: TerminalState,
        channel: ChannelHandle,
        events: mpsc::Receiver<ChannelEvent>,
        presenter: ReceiptPresenter,
    ) -> (TerminalActorHandle, JoinHandle<()>) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let snapshot = Arc::new(ArcSwap::from_pointee(state.snapshot(SNAPSHOT_LOG_TAIL)));
        let (revision_tx, revision_rx) = watch::channel(state.revision);

        let actor = TerminalActor {
            state,
            channel,
            presenter,
            command_tx: command_tx.clone(),
            snapshot: snapshot.clone(),
            revision_tx,
        };
        let task = tokio::spawn(actor.run(command_rx, events));

        let handle = TerminalActorHandle {
            command_tx,
            snapshot,
            revision_rx,
        };
        (handle, task)
    }

    /// Send a command to the actor (fire-and-forget).
    pub async fn send(&self, cmd: TerminalCommand) {
        if self.command_tx.send(cmd).await.is_err() {
            warn!(
                component = "session_actor",
                event = "actor.command.dropped",
                "Actor channel closed, command dropped"
            );
        }
    }

    pub async fn process(&self, input: Input) {
        self.send(TerminalCommand::Process { input }).await;
    }

    pub async fn intent(&self, intent: UserIntent) {
        self.process(intent.into()).await;
    }

    /// Lock-free snapshot read.
    pub fn snapshot(&self) -> Arc<TerminalSnapshot> {
        self.snapshot.load_full()
    }

    /// Full diagnostic log, oldest first. `None` once the actor has stopped.
    pub async fn full_log(&self) -> Option<Vec<LogEntry>> {
        let (reply, rx) = oneshot::channel();
        self.send(TerminalCommand::GetLog { reply }).await;
        rx.await.ok()
    }

    /// Revision counter, bumped every time the published snapshot changes.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision_rx.clone()
    }

    pub async fn shutdown(&self) {
        self.send(TerminalCommand::Shutdown).await;
    }
}

struct TerminalActor {
    state: TerminalState,
    channel: ChannelHandle,
    presenter: ReceiptPresenter,
    /// Handed to presenter tasks so timer and printer callbacks re-enter the queue.
    command_tx: mpsc::Sender<TerminalCommand>,
    snapshot: Arc<ArcSwap<TerminalSnapshot>>,
    revision_tx: watch::Sender<u64>,
}

impl TerminalActor {
    async fn run(
        mut self,
        mut command_rx: mpsc::Receiver<TerminalCommand>,
        mut events: mpsc::Receiver<ChannelEvent>,
    ) {
        info!(
            component = "session_actor",
            event = "actor.started",
            log_capacity = self.state.log.capacity(),
            "Terminal actor started"
        );

        let mut events_open = true;
        loop {
            tokio::select! {
                cmd = command_rx.recv() => match cmd {
                    Some(TerminalCommand::Process { input }) => self.apply(input),
                    Some(TerminalCommand::GetLog { reply }) => {
                        let _ = reply.send(self.state.log.entries().cloned().collect());
                    }
                    Some(TerminalCommand::Shutdown) | None => break,
                },
                event = events.recv(), if events_open => match event {
                    Some(event) => self.apply(event.into()),
                    None => {
                        debug!(
                            component = "session_actor",
                            event = "actor.channel.closed",
                            "Channel event stream ended"
                        );
                        events_open = false;
                    }
                },
            }
        }

        self.presenter.cancel_pending();
        info!(
            component = "session_actor",
            event = "actor.stopped",
            revision = self.state.revision,
            "Terminal actor stopped"
        );
    }

    fn apply(&mut self, input: Input) {
        let before = self.state.revision;
        let (next, effects) = transition(std::mem::take(&mut self.state), input, Utc::now());
        self.state = next;

        for effect in effects {
            self.execute(effect);
        }

        if self.state.revision != before {
            self.snapshot
                .store(Arc::new(self.state.snapshot(SNAPSHOT_LOG_TAIL)));
            self.revision_tx.send_replace(self.state.revision);
        }
    }

    fn execute(&mut self, effect: Effect) {
        match effect {
            Effect::Send(msg) => self.channel.send(msg),
            Effect::SchedulePrint { ticket } => {
                self.presenter.schedule(ticket, self.command_tx.clone());
            }
            Effect::CancelPrint { ticket } => self.presenter.cancel(ticket),
            Effect::Print { ticket, content } => {
                self.presenter
                    .print(ticket, content, self.command_tx.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use kiosk_protocol::{ClientMessage, ServerMessage};

    use super::*;
    use crate::receipt::{PrintError, ReceiptPrinter, DEFAULT_SETTLE_DELAY};
    use crate::session::View;

    #[derive(Default)]
    struct RecordingPrinter {
        printed: Mutex<Vec<String>>,
    }

    impl RecordingPrinter {
        fn count(&self) -> usize {
            self.printed.lock().unwrap().len()
        }
    }

    impl ReceiptPrinter for RecordingPrinter {
        fn print(&self, content: &str) -> Result<(), PrintError> {
            self.printed.lock().unwrap().push(content.to_string());
            Ok(())
        }
    }

    struct Harness {
        handle: TerminalActorHandle,
        events: mpsc::Sender<ChannelEvent>,
        outbound: mpsc::UnboundedReceiver<ClientMessage>,
        printer: Arc<RecordingPrinter>,
    }

    impl Harness {
        fn start() -> Self {
            let (channel, outbound) = ChannelHandle::loopback();
            let (events, events_rx) = mpsc::channel(32);
            let printer = Arc::new(RecordingPrinter::default());
            let presenter = ReceiptPresenter::new(DEFAULT_SETTLE_DELAY, printer.clone());
            let (handle, _task) =
                TerminalActorHandle::spawn(TerminalState::default(), channel, events_rx, presenter);
            Self {
                handle,
                events,
                outbound,
                printer,
            }
        }

        async fn server(&self, msg: ServerMessage) {
            self.events.send(ChannelEvent::Message(msg)).await.unwrap();
        }

        async fn wait_for_revision(&self, revision: u64) {
            let mut rx = self.handle.subscribe();
            rx.wait_for(|r| *r >= revision).await.unwrap();
        }

        /// Authenticate card ABCD1234; leaves the terminal at the action menu.
        async fn log_in(&self) {
            self.events.send(ChannelEvent::Connected).await.unwrap();
            self.server(ServerMessage::RequestPin {
                rfid_uid: "ABCD1234".to_string(),
            })
            .await;
            self.server(ServerMessage::AuthResult {
                success: true,
                message: None,
                rfid_uid: Some("ABCD1234".to_string()),
                holder_name: Some("John Doe".to_string()),
                account_number: Some("4000123412341234".to_string()),
            })
            .await;
            self.wait_for_revision(3).await;
            assert_eq!(self.handle.snapshot().session.view, View::ActionChoice);
        }

        async fn withdraw(&mut self, amount: &str) {
            self.handle.intent(UserIntent::ChooseWithdraw).await;
            self.handle
                .intent(UserIntent::SubmitWithdraw {
                    amount: amount.to_string(),
                })
                .await;
            self.handle.full_log().await.unwrap();
        }
    }

    fn approved(amount: f64, balance: f64) -> ServerMessage {
        ServerMessage::TransactionResult {
            success: Some(true),
            amount: Some(amount),
            balance: Some(balance),
            message: None,
        }
    }

    #[tokio::test]
    async fn initial_snapshot_is_welcome() {
        let harness = Harness::start();
        let snap = harness.handle.snapshot();
        assert_eq!(snap.revision, 0);
        assert_eq!(snap.session.view, View::Welcome);
        assert!(snap.recent_log.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn withdrawal_sends_request_and_prints_once() {
        let mut harness = Harness::start();
        harness.log_in().await;
        harness.withdraw("50").await;

        assert_eq!(
            harness.outbound.try_recv().unwrap(),
            ClientMessage::Withdraw {
                account_id: "ABCD1234".to_string(),
                amount: 50.0,
            }
        );

        harness.server(approved(50.0, 950.0)).await;
        harness.wait_for_revision(6).await;
        let snap = harness.handle.snapshot();
        assert_eq!(snap.session.view, View::Receipt);
        assert_eq!(harness.printer.count(), 0, "print waits for the settle delay");

        // "Printing receipt" and "Receipt printed" entries.
        tokio::time::sleep(DEFAULT_SETTLE_DELAY * 2).await;
        harness.wait_for_revision(8).await;
        assert_eq!(harness.printer.count(), 1);

        let log = harness.handle.full_log().await.unwrap();
        assert!(log.iter().any(|e| e.message.starts_with("Receipt printed")));
    }

    #[tokio::test(start_paused = true)]
    async fn noop_events_do_not_trigger_extra_prints() {
        let mut harness = Harness::start();
        harness.log_in().await;
        harness.withdraw("20").await;
        harness.server(approved(20.0, 80.0)).await;
        harness.wait_for_revision(6).await;

        harness
            .server(ServerMessage::PinUpdated {
                pin_length: 2,
                pin_buffer: None,
                rfid_uid: None,
            })
            .await;
        harness
            .server(ServerMessage::BalanceResponse {
                balance: Some(1.0),
            })
            .await;
        harness.handle.intent(UserIntent::ChooseBalance).await;
        harness.wait_for_revision(9).await;

        tokio::time::sleep(DEFAULT_SETTLE_DELAY * 3).await;
        harness.wait_for_revision(11).await;
        assert_eq!(harness.printer.count(), 1);
        assert_eq!(harness.handle.snapshot().session.view, View::Receipt);
    }

    #[tokio::test(start_paused = true)]
    async fn done_before_settle_cancels_print() {
        let mut harness = Harness::start();
        harness.log_in().await;
        harness.withdraw("20").await;
        harness.server(approved(20.0, 80.0)).await;
        harness.wait_for_revision(6).await;

        harness.handle.intent(UserIntent::Done).await;
        harness.handle.full_log().await.unwrap();
        assert_eq!(harness.handle.snapshot().session.view, View::Welcome);

        tokio::time::sleep(DEFAULT_SETTLE_DELAY * 4).await;
        let log = harness.handle.full_log().await.unwrap();
        assert_eq!(harness.printer.count(), 0);
        assert!(!log.iter().any(|e| e.message.starts_with("Printing")));
    }

    #[tokio::test]
    async fn disconnect_keeps_session() {
        let harness = Harness::start();
        harness.log_in().await;

        harness
            .events
            .send(ChannelEvent::Disconnected {
                reason: Some("backend restarted".to_string()),
            })
            .await
            .unwrap();
        harness.wait_for_revision(4).await;

        let snap = harness.handle.snapshot();
        assert_eq!(
            snap.connection_status,
            crate::session::ConnectionStatus::Disconnected
        );
        assert_eq!(snap.session.view, View::ActionChoice);
        assert!(snap.session.account.is_some());
    }

    #[tokio::test]
    async fn snapshot_log_tail_is_bounded() {
        let harness = Harness::start();
        for _ in 0..(SNAPSHOT_LOG_TAIL + 5) {
            harness.handle.intent(UserIntent::Back).await;
        }
        harness.handle.full_log().await.unwrap();

        let snap = harness.handle.snapshot();
        assert_eq!(snap.recent_log.len(), SNAPSHOT_LOG_TAIL);
        assert_eq!(snap.log_len, SNAPSHOT_LOG_TAIL + 5);
    }

    #[tokio::test]
    async fn shutdown_stops_actor() {
        let (channel, _outbound) = ChannelHandle::loopback();
        let (_events, events_rx) = mpsc::channel(1);
        let presenter = ReceiptPresenter::new(
            Duration::from_millis(10),
            Arc::new(RecordingPrinter::default()),
        );
        let (handle, task) =
            TerminalActorHandle::spawn(TerminalState::default(), channel, events_rx, presenter);

        handle.shutdown().await;
        task.await.unwrap();
        assert!(handle.full_log().await.is_none());
    }
}
