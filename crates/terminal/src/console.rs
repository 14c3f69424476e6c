//! Console front end
//!
//! Line-oriented stand-in for the touchscreen: each stdin line becomes a
//! user intent (or a local query), and the projected view is re-rendered
//! whenever the actor publishes a new revision.

use std::io::Write;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info};

use crate::session_actor::TerminalActorHandle;
use crate::session_command::UserIntent;
use crate::view::project;

pub const HELP: &str = "\
Commands:
  balance | b            check balance
  withdraw | w           open the withdraw form
  amount <value>         submit a withdrawal amount
  back                   return to the previous menu
  cancel                 cancel the session
  done | logout          finish and reset
  key <0-9|*|#>          press a keypad key
  pin <digits>           submit a whole PIN
  reprint | print        print the receipt again
  state                  dump the current snapshot as JSON
  log                    show the full diagnostic log
  help                   show this text
  quit | exit            leave";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Intent(UserIntent),
    State,
    Log,
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConsoleParseError {
    #[error("unknown command {0:?} (type `help`)")]
    Unknown(String),

    #[error("`{command}` needs an argument")]
    MissingArgument { command: &'static str },

    #[error("`key` takes a single character, got {0:?}")]
    InvalidKey(String),
}

/// Parse one input line. Blank lines yield `None`.
pub fn parse_command(line: &str) -> Result<Option<ConsoleCommand>, ConsoleParseError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };

    let intent = match word.to_ascii_lowercase().as_str() {
        "balance" | "b" => UserIntent::ChooseBalance,
        "withdraw" | "w" => UserIntent::ChooseWithdraw,
        "amount" | "submit" => {
            if rest.is_empty() {
                return Err(ConsoleParseError::MissingArgument { command: "amount" });
            }
            UserIntent::SubmitWithdraw {
                amount: rest.to_string(),
            }
        }
        "back" => UserIntent::Back,
        "cancel" => UserIntent::Cancel,
        "done" | "logout" => UserIntent::Done,
        "key" => {
            let mut chars = rest.chars();
            match (chars.next(), chars.next()) {
                (Some(key), None) => UserIntent::PressKey(key),
                (None, _) => return Err(ConsoleParseError::MissingArgument { command: "key" }),
                _ => return Err(ConsoleParseError::InvalidKey(rest.to_string())),
            }
        }
        "pin" => {
            if rest.is_empty() {
                return Err(ConsoleParseError::MissingArgument { command: "pin" });
            }
            UserIntent::SubmitPin {
                digits: rest.to_string(),
            }
        }
        "reprint" | "print" => UserIntent::Reprint,
        "state" => return Ok(Some(ConsoleCommand::State)),
        "log" => return Ok(Some(ConsoleCommand::Log)),
        "help" | "?" => return Ok(Some(ConsoleCommand::Help)),
        "quit" | "exit" | "q" => return Ok(Some(ConsoleCommand::Quit)),
        _ => return Err(ConsoleParseError::Unknown(word.to_string())),
    };
    Ok(Some(ConsoleCommand::Intent(intent)))
}

/// Drive the terminal from stdin until `quit`, end of input, or actor exit.
pub async fn run_console(handle: TerminalActorHandle) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut revisions = handle.subscribe();

    println!("{HELP}\n");
    render(&handle);

    loop {
        tokio::select! {
            changed = revisions.changed() => {
                if changed.is_err() {
                    debug!(
                        component = "console",
                        event = "console.actor_gone",
                        "Actor stopped, leaving console"
                    );
                    break;
                }
                render(&handle);
            }
            line = lines.next_line() => {
                let Some(line) = line? else {
                    info!(component = "console", event = "console.eof", "Input closed");
                    break;
                };
                match parse_command(&line) {
                    Ok(None) => {}
                    Ok(Some(ConsoleCommand::Quit)) => break,
                    Ok(Some(ConsoleCommand::Intent(intent))) => handle.intent(intent).await,
                    Ok(Some(ConsoleCommand::State)) => {
                        println!("{}", serde_json::to_string_pretty(&*handle.snapshot())?);
                    }
                    Ok(Some(ConsoleCommand::Log)) => {
                        for entry in handle.full_log().await.unwrap_or_default() {
                            println!("{entry}");
                        }
                    }
                    Ok(Some(ConsoleCommand::Help)) => println!("{HELP}"),
                    Err(e) => eprintln!("{e}"),
                }
            }
        }
    }
    Ok(())
}

fn render(handle: &TerminalActorHandle) {
    let model = project(&handle.snapshot());
    let mut out = std::io::stdout().lock();
    let _ = writeln!(out, "\n{model}");
    let _ = out.flush();
}
