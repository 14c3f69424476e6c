//! Commands sent to the terminal actor from the console and timers.

use tokio::sync::oneshot;

use crate::diagnostic_log::LogEntry;
use crate::transition::Input;

/// Something the person at the terminal asked for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserIntent {
    ChooseBalance,
    ChooseWithdraw,
    /// Raw text from the amount field; validated by the state machine.
    SubmitWithdraw {
        amount: String,
    },
    Back,
    Cancel,
    /// Done / Logout.
    Done,
    /// Single on-screen keypad key (legacy keypad emulation).
    PressKey(char),
    /// Whole PIN typed on screen, sent digit by digit (legacy).
    SubmitPin {
        digits: String,
    },
    Reprint,
}

/// A command that can be sent to the terminal actor.
pub enum TerminalCommand {
    /// Run an input through the transition function
    Process { input: Input },

    // -- Queries (use oneshot reply channels) --
    /// Full diagnostic log, oldest first
    GetLog {
        reply: oneshot::Sender<Vec<LogEntry>>,
    },

    /// Stop the actor, cancelling any pending print
    Shutdown,
}
