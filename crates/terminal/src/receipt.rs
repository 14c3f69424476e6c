//! Receipt presenter
//!
//! Renders receipts and drives the printer. A print is scheduled when the
//! session enters the receipt view; after the settle delay the timer feeds
//! `PrintDue` back into the actor queue, where the transition decides
//! whether the ticket is still current. Printing itself runs on the blocking
//! pool so the actor never waits on I/O.

use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::session::{Account, Receipt};
use crate::session_command::TerminalCommand;
use crate::transition::Input;

pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(300);

const SLIP_WIDTH: usize = 32;

/// Plain-text receipt slip.
pub fn render_receipt(receipt: &Receipt, account: Option<&Account>) -> String {
    let rule = "=".repeat(SLIP_WIDTH);
    let mut lines = vec![
        rule.clone(),
        format!("{:^width$}", receipt.title, width = SLIP_WIDTH),
        rule.clone(),
        format!("Date: {}", receipt.timestamp.format("%Y-%m-%d %H:%M:%S UTC")),
        format!("Ref: {}", receipt.transaction_id()),
    ];
    if let Some(account) = account {
        lines.push(format!("Account: {}", account.masked_account_number));
    }
    lines.push(format!("Amount: ${:.2}", receipt.amount));
    lines.push(format!("Balance: ${:.2}", receipt.resulting_balance));
    lines.push(rule);
    lines.push("Thank you for using".to_string());
    lines.push("Secure Banking Terminal.".to_string());

    let mut slip = lines.join("\n");
    slip.push('\n');
    slip
}

#[derive(Debug, Error)]
pub enum PrintError {
    #[error("failed to write receipt to {path}: {source}")]
    File {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write receipt to stdout: {0}")]
    Stdout(#[source] io::Error),

    #[error("printer task failed: {0}")]
    Task(String),
}

/// The external print/output collaborator
pub trait ReceiptPrinter: Send + Sync {
    fn print(&self, content: &str) -> Result<(), PrintError>;
}

/// Writes receipts to standard output
pub struct ConsolePrinter;

impl ReceiptPrinter for ConsolePrinter {
    fn print(&self, content: &str) -> Result<(), PrintError> {
        let mut out = io::stdout().lock();
        out.write_all(content.as_bytes())
            .and_then(|()| out.flush())
            .map_err(PrintError::Stdout)
    }
}

/// Writes each receipt to its own file in a spool directory
pub struct FilePrinter {
    dir: PathBuf,
    sequence: AtomicU64,
}

impl FilePrinter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            sequence: AtomicU64::new(0),
        }
    }
}

impl ReceiptPrinter for FilePrinter {
    fn print(&self, content: &str) -> Result<(), PrintError> {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let name = format!("receipt-{}-{seq}.txt", Utc::now().format("%Y%m%dT%H%M%S%3f"));
        let path = self.dir.join(name);
        fs::create_dir_all(&self.dir)
            .and_then(|()| fs::write(&path, content))
            .map_err(|source| PrintError::File {
                path: path.clone(),
                source,
            })?;
        debug!(
            component = "receipt",
            event = "receipt.file.written",
            path = %path.display(),
            "Receipt written"
        );
        Ok(())
    }
}

/// Accepts receipts and discards them (printer switched off)
pub struct DisabledPrinter;

impl ReceiptPrinter for DisabledPrinter {
    fn print(&self, _content: &str) -> Result<(), PrintError> {
        info!(
            component = "receipt",
            event = "receipt.print.disabled",
            "Printing disabled, receipt discarded"
        );
        Ok(())
    }
}

pub struct ReceiptPresenter {
    settle_delay: Duration,
    printer: Arc<dyn ReceiptPrinter>,
    pending: Option<(u64, CancellationToken)>,
}

impl ReceiptPresenter {
    pub fn new(settle_delay: Duration, printer: Arc<dyn ReceiptPrinter>) -> Self {
        Self {
            settle_delay,
            printer,
            pending: None,
        }
    }

    /// Start the settle timer for `ticket`, replacing any earlier one.
    pub fn schedule(&mut self, ticket: u64, command_tx: mpsc::Sender<TerminalCommand>) {
        self.cancel_pending();

        let token = CancellationToken::new();
        let cancelled = token.clone();
        let delay = self.settle_delay;
        tokio::spawn(async move {
            tokio::select! {
                _ = cancelled.cancelled() => {
                    debug!(
                        component = "receipt",
                        event = "receipt.print.cancelled",
                        ticket,
                        "Scheduled print cancelled"
                    );
                }
                _ = tokio::time::sleep(delay) => {
                    let _ = command_tx
                        .send(TerminalCommand::Process {
                            input: Input::PrintDue { ticket },
                        })
                        .await;
                }
            }
        });
        self.pending = Some((ticket, token));
    }

    pub fn cancel(&mut self, ticket: u64) {
        if matches!(self.pending, Some((pending, _)) if pending == ticket) {
            self.cancel_pending();
        }
    }

    pub fn cancel_pending(&mut self) {
        if let Some((_, token)) = self.pending.take() {
            token.cancel();
        }
    }

    #[cfg(test)]
    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Hand `content` to the printer; `PrintFinished` reports the outcome.
    pub fn print(&mut self, ticket: u64, content: String, command_tx: mpsc::Sender<TerminalCommand>) {
        if matches!(self.pending, Some((pending, _)) if pending == ticket) {
            self.pending = None;
        }

        let printer = self.printer.clone();
        tokio::spawn(async move {
            let result = match tokio::task::spawn_blocking(move || printer.print(&content)).await {
                Ok(result) => result,
                Err(e) => Err(PrintError::Task(e.to_string())),
            };
            if let Err(e) = &result {
                warn!(
                    component = "receipt",
                    event = "receipt.print.failed",
                    ticket,
                    error = %e,
                    "Receipt printing failed"
                );
            }
            let _ = command_tx
                .send(TerminalCommand::Process {
                    input: Input::PrintFinished {
                        ticket,
                        result: result.map_err(|e| e.to_string()),
                    },
                })
                .await;
        });
    }
}

impl Drop for ReceiptPresenter {
    fn drop(&mut self) {
        self.cancel_pending();
    }
}
