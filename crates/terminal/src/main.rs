//! Kiosk Banking Terminal
//!
//! Session controller for a card-and-PIN banking kiosk. Talks to the
//! backend over a WebSocket channel and drives the screen flow from
//! card tap to receipt.

mod channel;
mod config;
mod console;
mod diagnostic_log;
mod logging;
mod paths;
mod receipt;
mod session;
mod session_actor;
mod session_command;
mod transition;
mod view;

use clap::Parser;
use tracing::{info, warn};

use crate::config::Cli;
use crate::receipt::ReceiptPresenter;
use crate::session_actor::TerminalActorHandle;
use crate::transition::TerminalState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Cli::parse().into_config()?;

    paths::init_data_dir(config.data_dir.as_deref());
    paths::ensure_dirs()?;
    let logging = logging::init_logging(&paths::log_dir())?;

    info!(
        component = "main",
        event = "terminal.starting",
        run_id = %logging.run_id,
        endpoint = %config.endpoint,
        settle_ms = config.settle_delay.as_millis() as u64,
        log_capacity = config.log_capacity,
        printer = ?config.printer,
        "Starting kiosk terminal"
    );

    let (channel, events) = channel::connect(config.endpoint.clone());
    let presenter = ReceiptPresenter::new(config.settle_delay, config.printer.build());
    let (actor, actor_task) = TerminalActorHandle::spawn(
        TerminalState::new(config.log_capacity),
        channel.clone(),
        events,
        presenter,
    );

    tokio::select! {
        result = console::run_console(actor.clone()) => {
            if let Err(e) = result {
                warn!(
                    component = "main",
                    event = "console.failed",
                    error = %e,
                    "Console stopped with an error"
                );
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!(component = "main", event = "terminal.interrupted", "Interrupted");
        }
    }

    actor.shutdown().await;
    channel.close();
    if let Err(e) = actor_task.await {
        warn!(
            component = "main",
            event = "actor.join_failed",
            error = %e,
            "Terminal actor did not stop cleanly"
        );
    }

    info!(component = "main", event = "terminal.stopped", "Kiosk terminal stopped");
    drop(logging);
    Ok(())
}
