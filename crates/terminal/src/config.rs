use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{ensure, Context};
use clap::Parser;
use kiosk_protocol::DEFAULT_ENDPOINT;

use crate::channel::validate_endpoint;
use crate::diagnostic_log::DEFAULT_LOG_CAPACITY;
use crate::receipt::{ConsolePrinter, DisabledPrinter, FilePrinter, ReceiptPrinter};

/// Kiosk banking terminal: card, PIN and ledger session controller.
#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Backend WebSocket endpoint
    #[arg(long, env = "KIOSK_ENDPOINT", default_value = DEFAULT_ENDPOINT)]
    pub endpoint: String,

    /// Delay between showing a receipt and printing it, in milliseconds
    #[arg(long, env = "KIOSK_PRINT_SETTLE_MS", default_value_t = 300)]
    pub settle_ms: u64,

    /// Maximum number of diagnostic log entries kept in memory
    #[arg(long, env = "KIOSK_LOG_CAPACITY", default_value_t = DEFAULT_LOG_CAPACITY)]
    pub log_capacity: usize,

    /// Write receipts as files into this directory instead of stdout
    #[arg(long, env = "KIOSK_RECEIPT_DIR", value_name = "DIR")]
    pub receipt_dir: Option<PathBuf>,

    /// Discard receipts instead of printing them
    #[arg(long, env = "KIOSK_PRINTER_DISABLED", conflicts_with = "receipt_dir")]
    pub no_print: bool,

    /// Data directory for logs (defaults to ~/.kiosk-terminal)
    #[arg(long, env = "KIOSK_DATA_DIR", value_name = "DIR")]
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrinterMode {
    Console,
    Directory(PathBuf),
    Disabled,
}

impl PrinterMode {
    pub fn build(&self) -> Arc<dyn ReceiptPrinter> {
        match self {
            PrinterMode::Console => Arc::new(ConsolePrinter),
            PrinterMode::Directory(dir) => Arc::new(FilePrinter::new(dir.clone())),
            PrinterMode::Disabled => Arc::new(DisabledPrinter),
        }
    }
}

/// Validated runtime configuration
#[derive(Debug, Clone)]
pub struct TerminalConfig {
    pub endpoint: String,
    pub settle_delay: Duration,
    pub log_capacity: usize,
    pub printer: PrinterMode,
    pub data_dir: Option<PathBuf>,
}

impl Cli {
    pub fn into_config(self) -> anyhow::Result<TerminalConfig> {
        validate_endpoint(&self.endpoint).context("invalid --endpoint")?;
        ensure!(self.log_capacity > 0, "--log-capacity must be at least 1");

        let printer = match (self.no_print, self.receipt_dir) {
            (true, _) => PrinterMode::Disabled,
            (false, Some(dir)) => PrinterMode::Directory(dir),
            (false, None) => PrinterMode::Console,
        };

        Ok(TerminalConfig {
            endpoint: self.endpoint,
            settle_delay: Duration::from_millis(self.settle_ms),
            log_capacity: self.log_capacity,
            printer,
            data_dir: self.data_dir,
        })
    }
}
