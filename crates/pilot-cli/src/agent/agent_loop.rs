//! Agent loop implementation

use std::sync::Arc;

use anyhow::Result;
use pilot_core::RetryConfig;
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use crate::executor::{CommandResult, CommandRunner};
use crate::interpreter::{interpret, Reply};
use crate::memory::{MemoryEntry, MemoryKind, MemoryLog};
use crate::security::{AllowAll, Authorization, CommandGuard};
use crate::session::Session;

use super::state::{AgentConfig, TurnOutcome, TurnReport};

// ANSI colors
const BLUE: &str = "\x1b[94m";
const RESET: &str = "\x1b[0m";

/// Marker appended to every command result sent back to the model
const NEXT_STEP: &str = "Awaiting further instructions.";

/// The agent loop orchestrator
pub struct AgentLoop {
    config: AgentConfig,
    retry: RetryConfig,
    runner: Arc<dyn CommandRunner>,
    guard: Arc<dyn CommandGuard>,
    memory: Option<MemoryLog>,
}

impl AgentLoop {
    /// Create a new agent loop that runs every command it is given
    pub fn new(config: AgentConfig, retry: RetryConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            config,
            retry,
            runner,
            guard: Arc::new(AllowAll),
            memory: None,
        }
    }

    /// Consult `guard` before each command
    pub fn with_guard(mut self, guard: Arc<dyn CommandGuard>) -> Self {
        self.guard = guard;
        self
    }

    /// Append user input, replies and command results to `memory`
    pub fn with_memory(mut self, memory: MemoryLog) -> Self {
        self.memory = Some(memory);
        self
    }

    /// Drive one user request until the model stops issuing commands
    ///
    /// Fails only when the model cannot be reached after all retries.
    #[instrument(skip_all, fields(input_len = input.len()))]
    pub async fn run_turn(&mut self, session: &mut Session, input: &str) -> Result<TurnReport> {
        info!(max_chain_depth = self.config.max_chain_depth, "Starting turn");
        self.remember(MemoryKind::UserInput, json!(input));

        let mut report = TurnReport::new();
        let mut prompt = frame_user_prompt(&self.config.username, input);

        loop {
            let raw = session.send(prompt, &self.retry).await?;
            report.model_calls += 1;
            self.remember(MemoryKind::ModelReply, json!(raw));

            let reply = match interpret(&raw) {
                Reply::Structured(reply) => reply,
                Reply::Invalid => {
                    warn!(reply_len = raw.len(), "Failed to parse AI response as JSON");
                    return Ok(report.finish(TurnOutcome::Unparseable));
                }
            };

            if self.config.echo {
                println!("{}AI Response: {}{}", BLUE, reply.response, RESET);
            }
            report.last_response = Some(reply.response);

            let Some(command) = reply.command else {
                info!(
                    commands = report.commands_executed,
                    model_calls = report.model_calls,
                    "Task completed or no further commands to execute"
                );
                return Ok(report.finish(TurnOutcome::Completed));
            };

            if report.commands_executed >= self.config.max_chain_depth {
                warn!(
                    max_chain_depth = self.config.max_chain_depth,
                    command = %command,
                    "Command chain limit reached, ending turn"
                );
                return Ok(report.finish(TurnOutcome::ChainLimitReached));
            }

            let result = self.execute(&command).await;
            report.commands_executed += 1;

            if self.config.echo {
                println!("Command Result: {}", result.output);
            }
            self.remember(
                MemoryKind::Command,
                json!({
                    "command": command,
                    "status": result.status,
                    "output": result.output,
                }),
            );

            prompt = result_prompt(&command, &result);
        }
    }

    async fn execute(&self, command: &str) -> CommandResult {
        match self.guard.authorize(command).await {
            Authorization::Allow => {
                let result = self.runner.run(command).await;
                if result.is_success() {
                    debug!(command = %command, output_len = result.output.len(), "Command finished");
                } else {
                    info!(command = %command, output = %result.output, "Command failed");
                }
                result
            }
            Authorization::Deny(reason) => {
                info!(command = %command, reason = %reason, "Command denied");
                CommandResult::error(format!("Command was not executed: {}", reason))
            }
        }
    }

    fn remember(&mut self, kind: MemoryKind, content: serde_json::Value) {
        if let Some(memory) = self.memory.as_mut() {
            if let Err(e) = memory.record(MemoryEntry::new(kind, content)) {
                warn!(error = %e, "Failed to save memory");
            }
        }
    }
}

/// Prompt sent for a fresh user request
fn frame_user_prompt(username: &str, input: &str) -> String {
    format!(
        "Please respond to the following command or request from the user '{}':\n{}\n",
        username, input
    )
}

/// Prompt reporting a command result back to the model
fn result_prompt(command: &str, result: &CommandResult) -> String {
    json!({
        "response": format!("The result of the command was: {}", result.output),
        "command": command,
        "status": result.status,
        "next_step": NEXT_STEP,
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pilot_core::{Message, ModelClient, Role};
    use serde_json::Value;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Replies from a script; repeats `fallback` once the script runs out
    struct ScriptedModel {
        replies: Mutex<VecDeque<String>>,
        fallback: Option<String>,
        requests: Mutex<Vec<Vec<Message>>>,
    }

    impl ScriptedModel {
        fn new(replies: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
                fallback: None,
                requests: Mutex::new(Vec::new()),
            })
        }

        fn repeating(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(VecDeque::new()),
                fallback: Some(reply.to_string()),
                requests: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ModelClient for ScriptedModel {
        async fn generate(&self, transcript: &[Message]) -> Result<String> {
            self.requests.lock().unwrap().push(transcript.to_vec());
            let next = self.replies.lock().unwrap().pop_front();
            match next.or_else(|| self.fallback.clone()) {
                Some(reply) => Ok(reply),
                None => anyhow::bail!("connection reset by peer"),
            }
        }
    }

    struct FakeRunner {
        result: CommandResult,
        calls: Mutex<Vec<String>>,
    }

    impl FakeRunner {
        fn new(result: CommandResult) -> Arc<Self> {
            Arc::new(Self {
                result,
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CommandRunner for FakeRunner {
        async fn run(&self, command: &str) -> CommandResult {
            self.calls.lock().unwrap().push(command.to_string());
            self.result.clone()
        }
    }

    struct DenyAll;

    #[async_trait]
    impl CommandGuard for DenyAll {
        async fn authorize(&self, _command: &str) -> Authorization {
            Authorization::Deny("blocked by policy".to_string())
        }
    }

    fn agent(runner: Arc<FakeRunner>) -> AgentLoop {
        let config = AgentConfig::new("alice").with_echo(false);
        let retry = RetryConfig::new(2, Duration::from_millis(10), 2);
        AgentLoop::new(config, retry, runner)
    }

    fn parse(content: &str) -> Value {
        serde_json::from_str(content).unwrap()
    }

    #[tokio::test]
    async fn test_list_files_end_to_end() {
        let model = ScriptedModel::new(&[
            r#"{"response":"Listing files","command":"ls"}"#,
            r#"{"response":"You have two text files.","command":"none"}"#,
        ]);
        let runner = FakeRunner::new(CommandResult::success("a.txt\nb.txt"));
        let mut session = Session::start(model.clone(), "pilot prompt");
        let before = session.len();
        let mut agent = agent(runner.clone());

        let report = agent.run_turn(&mut session, "list files").await.unwrap();

        assert_eq!(report.outcome, TurnOutcome::Completed);
        assert_eq!(report.commands_executed, 1);
        assert_eq!(report.model_calls, 2);
        assert_eq!(report.last_response.as_deref(), Some("You have two text files."));
        assert_eq!(runner.calls(), vec!["ls".to_string()]);

        // user prompt, model reply, result prompt, model reply
        let transcript = session.transcript();
        assert_eq!(transcript.len(), before + 4);
        let roles: Vec<Role> = transcript[before..].iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Model, Role::User, Role::Model]);
        assert_eq!(
            transcript[before].content,
            "Please respond to the following command or request from the user 'alice':\nlist files\n"
        );

        let result = parse(&transcript[before + 2].content);
        assert_eq!(result["response"], "The result of the command was: a.txt\nb.txt");
        assert_eq!(result["command"], "ls");
        assert_eq!(result["status"], "success");
        assert_eq!(result["next_step"], "Awaiting further instructions.");

        // The follow-up request carried the whole transcript up to the result prompt
        let requests = model.requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].as_slice(), &transcript[..before + 3]);
    }

    #[tokio::test]
    async fn test_none_command_ends_turn() {
        let model = ScriptedModel::new(&[r#"{"response":"Hello alice!","command":"none"}"#]);
        let runner = FakeRunner::new(CommandResult::success(""));
        let mut session = Session::start(model, "pilot");
        let mut agent = agent(runner.clone());

        let report = agent.run_turn(&mut session, "hi").await.unwrap();

        assert_eq!(report.outcome, TurnOutcome::Completed);
        assert_eq!(report.commands_executed, 0);
        assert!(runner.calls().is_empty());
        assert_eq!(session.len(), 4);
    }

    #[tokio::test]
    async fn test_unparseable_reply_stops_chain() {
        let model = ScriptedModel::new(&["I'm sorry, I can't format that as JSON."]);
        let runner = FakeRunner::new(CommandResult::success(""));
        let mut session = Session::start(model.clone(), "pilot");
        let mut agent = agent(runner.clone());

        let report = agent.run_turn(&mut session, "do something").await.unwrap();

        assert_eq!(report.outcome, TurnOutcome::Unparseable);
        assert!(report.last_response.is_none());
        assert!(runner.calls().is_empty());
        assert_eq!(model.requests.lock().unwrap().len(), 1);
        // The malformed reply is still part of the transcript
        assert_eq!(
            session.transcript().last().unwrap().content,
            "I'm sorry, I can't format that as JSON."
        );
    }

    #[tokio::test]
    async fn test_error_status_reported_to_model() {
        let model = ScriptedModel::new(&[
            r#"{"response":"Reading","command":"cat missing.txt"}"#,
            r#"{"response":"That file does not exist.","command":"none"}"#,
        ]);
        let runner = FakeRunner::new(CommandResult::error(
            "cat: missing.txt: No such file or directory",
        ));
        let mut session = Session::start(model, "pilot");
        let mut agent = agent(runner);

        agent.run_turn(&mut session, "show missing.txt").await.unwrap();

        let transcript = session.transcript();
        let result = parse(&transcript[transcript.len() - 2].content);
        assert_eq!(result["status"], "error");
        assert_eq!(result["command"], "cat missing.txt");
        assert!(result["response"]
            .as_str()
            .unwrap()
            .ends_with("No such file or directory"));
    }

    #[tokio::test]
    async fn test_chain_limit() {
        let model = ScriptedModel::repeating(r#"{"response":"Again","command":"echo again"}"#);
        let runner = FakeRunner::new(CommandResult::success("again"));
        let mut session = Session::start(model.clone(), "pilot");
        let config = AgentConfig::new("alice").with_echo(false).with_max_chain_depth(3);
        let mut agent = AgentLoop::new(config, RetryConfig::default(), runner.clone());

        let report = agent.run_turn(&mut session, "loop forever").await.unwrap();

        assert_eq!(report.outcome, TurnOutcome::ChainLimitReached);
        assert_eq!(report.commands_executed, 3);
        assert_eq!(report.model_calls, 4);
        assert_eq!(runner.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_denied_command_is_reported() {
        let model = ScriptedModel::new(&[
            r#"{"response":"Cleaning up","command":"rm -rf build"}"#,
            r#"{"response":"Understood, leaving it.","command":"none"}"#,
        ]);
        let runner = FakeRunner::new(CommandResult::success(""));
        let mut session = Session::start(model, "pilot");
        let mut agent = agent(runner.clone()).with_guard(Arc::new(DenyAll));

        let report = agent.run_turn(&mut session, "clean the build").await.unwrap();

        assert_eq!(report.outcome, TurnOutcome::Completed);
        assert!(runner.calls().is_empty());
        let transcript = session.transcript();
        let result = parse(&transcript[transcript.len() - 2].content);
        assert_eq!(result["status"], "error");
        assert_eq!(
            result["response"],
            "The result of the command was: Command was not executed: blocked by policy"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_model_unreachable_fails_turn() {
        let model = ScriptedModel::new(&[]);
        let runner = FakeRunner::new(CommandResult::success(""));
        let mut session = Session::start(model.clone(), "pilot");
        let mut agent = agent(runner.clone());

        let err = agent.run_turn(&mut session, "hello").await.unwrap_err();

        assert!(format!("{:#}", err).contains("connection reset"));
        assert_eq!(model.requests.lock().unwrap().len(), 2);
        assert!(runner.calls().is_empty());
        assert_eq!(session.len(), 3);
    }

    #[tokio::test]
    async fn test_memory_records_turn() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("memory.json");
        let model = ScriptedModel::new(&[
            r#"{"response":"Listing","command":"ls"}"#,
            r#"{"response":"Done","command":"none"}"#,
        ]);
        let runner = FakeRunner::new(CommandResult::success("a.txt"));
        let mut session = Session::start(model, "pilot");
        let mut agent = agent(runner).with_memory(MemoryLog::load(&path).unwrap());

        agent.run_turn(&mut session, "list files").await.unwrap();

        let saved = MemoryLog::load(&path).unwrap();
        let kinds: Vec<&str> = saved
            .entries()
            .iter()
            .map(|e| e["kind"].as_str().unwrap())
            .collect();
        assert_eq!(kinds, vec!["user_input", "model_reply", "command", "model_reply"]);
        assert_eq!(saved.entries()[2]["content"]["output"], "a.txt");
    }

    #[test]
    fn test_frame_user_prompt() {
        assert_eq!(
            frame_user_prompt("bob", "what time is it"),
            "Please respond to the following command or request from the user 'bob':\nwhat time is it\n"
        );
    }
}
