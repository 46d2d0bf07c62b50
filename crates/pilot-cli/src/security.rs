//! Authorization hook consulted before running a model-issued command

use async_trait::async_trait;
use std::io::{self, IsTerminal, Write};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, warn};

/// Check if stdin is connected to a terminal
pub fn is_interactive() -> bool {
    io::stdin().is_terminal()
}

/// Decision for a single command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Authorization {
    Allow,
    /// Do not run; the reason is reported back to the model
    Deny(String),
}

/// Decides whether a command may run
#[async_trait]
pub trait CommandGuard: Send + Sync {
    async fn authorize(&self, command: &str) -> Authorization;
}

/// Lets every command through
pub struct AllowAll;

#[async_trait]
impl CommandGuard for AllowAll {
    async fn authorize(&self, _command: &str) -> Authorization {
        Authorization::Allow
    }
}

/// Asks on the terminal before each command
pub struct TerminalConfirmation;

#[async_trait]
impl CommandGuard for TerminalConfirmation {
    async fn authorize(&self, command: &str) -> Authorization {
        if !is_interactive() {
            warn!(command = %command, "Non-interactive mode: denying command that requires confirmation");
            return Authorization::Deny("confirmation required but stdin is not a terminal".to_string());
        }

        println!();
        println!("\x1b[91m[command]\x1b[0m \x1b[1m{}\x1b[0m", command);
        print!("Run this command? [y/N] ");
        if io::stdout().flush().is_err() {
            return Authorization::Deny("could not prompt for confirmation".to_string());
        }

        // Use async stdin to avoid blocking the runtime
        let mut reader = BufReader::new(tokio::io::stdin());
        let mut input = String::new();

        if reader.read_line(&mut input).await.is_err() {
            debug!("Failed to read stdin, denying");
            return Authorization::Deny("could not read confirmation".to_string());
        }

        let decision = parse_answer(&input);
        debug!(command = %command, decision = ?decision, "User confirmation response");
        decision
    }
}

fn parse_answer(input: &str) -> Authorization {
    match input.trim().to_lowercase().as_str() {
        "y" | "yes" => Authorization::Allow,
        _ => Authorization::Deny("the user declined to run this command".to_string()),
    }
}
