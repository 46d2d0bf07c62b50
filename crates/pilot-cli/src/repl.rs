//! Interactive REPL
//!
//! Reads one request per line and hands it to the agent loop. Turn failures
//! go to the log file only; the prompt comes straight back.

use anyhow::Result;
use chrono::Utc;
use pilot_core::config::app_data_dir;
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use rustyline::{DefaultEditor, Editor};
use std::ops::ControlFlow;
use std::path::PathBuf;
use tracing::{debug, error, info};

use crate::agent::{AgentLoop, TurnOutcome};
use crate::session::Session;

// ANSI colors
const GREEN: &str = "\x1b[92m";
const RESET: &str = "\x1b[0m";

/// Login name of the person at the terminal
pub fn current_user() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .ok()
        .filter(|u| !u.trim().is_empty())
        .unwrap_or_else(|| "user".to_string())
}

/// Host name of this machine
pub fn host_name() -> String {
    hostname::get().map_or_else(|_| "localhost".into(), |h| h.to_string_lossy().into_owned())
}

/// `user@host ~ % ` in green
fn prompt_for(user: &str, host: &str) -> String {
    format!("{}{}@{} ~ % {}", GREEN, user, host, RESET)
}

fn is_exit_command(line: &str) -> bool {
    matches!(line.trim().to_lowercase().as_str(), "exit" | "quit")
}

fn history_path() -> PathBuf {
    app_data_dir().join("history")
}

/// Handle one input line; `Break` ends the session
async fn handle_line(agent: &mut AgentLoop, session: &mut Session, line: &str) -> ControlFlow<()> {
    let line = line.trim();

    if line.is_empty() {
        return ControlFlow::Continue(());
    }

    if is_exit_command(line) {
        println!("Exiting the session.");
        return ControlFlow::Break(());
    }

    match agent.run_turn(session, line).await {
        Ok(report) => {
            debug!(
                outcome = ?report.outcome,
                commands = report.commands_executed,
                model_calls = report.model_calls,
                answered = report.last_response.is_some(),
                "Turn finished"
            );
            if report.outcome != TurnOutcome::Completed {
                info!(outcome = ?report.outcome, commands = report.commands_executed, "Turn ended early");
            }
        }
        Err(e) => error!(error = %format!("{:#}", e), "Error in processing command"),
    }

    ControlFlow::Continue(())
}

/// Run the interactive REPL until the user exits
pub async fn run(mut agent: AgentLoop, mut session: Session, user: &str, host: &str) -> Result<()> {
    let history = history_path();
    let mut rl: Editor<(), DefaultHistory> = DefaultEditor::new()?;
    let _ = rl.load_history(&history);

    let prompt = prompt_for(user, host);
    let mut turns = 0usize;

    loop {
        match rl.readline(&prompt) {
            Ok(line) => {
                if !line.trim().is_empty() {
                    let _ = rl.add_history_entry(line.trim());
                    turns += 1;
                }

                if handle_line(&mut agent, &mut session, &line).await.is_break() {
                    break;
                }
            }
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => {
                println!("Exiting the session.");
                break;
            }
            Err(e) => {
                error!(error = %e, "Failed to read input");
                break;
            }
        }
    }

    if let Some(parent) = history.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let _ = rl.save_history(&history);

    let elapsed = Utc::now() - session.started_at();
    info!(
        turns,
        messages = session.len(),
        minutes = elapsed.num_minutes(),
        "Session ended"
    );
    Ok(())
}
