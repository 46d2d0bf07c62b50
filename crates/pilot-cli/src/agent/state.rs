//! Agent configuration and per-turn bookkeeping

/// Configuration for the agent
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Name the user prompt is attributed to
    pub username: String,
    /// Maximum commands executed for one user request
    pub max_chain_depth: usize,
    /// Print model responses and command output to the terminal
    pub echo: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            username: "user".to_string(),
            max_chain_depth: 50,
            echo: true,
        }
    }
}

impl AgentConfig {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            ..Default::default()
        }
    }

    pub fn with_max_chain_depth(mut self, max: usize) -> Self {
        self.max_chain_depth = max;
        self
    }

    pub fn with_echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }
}

/// How a user turn ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The model replied without a command
    Completed,
    /// The model's reply could not be interpreted; the chain stopped there
    Unparseable,
    /// The model kept issuing commands past `max_chain_depth`
    ChainLimitReached,
}

/// Summary of one user turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnReport {
    pub outcome: TurnOutcome,
    /// Commands dispatched, including ones the guard denied
    pub commands_executed: usize,
    /// Model round trips made during the turn
    pub model_calls: usize,
    /// Last human-readable response from the model
    pub last_response: Option<String>,
}

impl TurnReport {
    pub(super) fn new() -> Self {
        Self {
            outcome: TurnOutcome::Completed,
            commands_executed: 0,
            model_calls: 0,
            last_response: None,
        }
    }

    pub(super) fn finish(mut self, outcome: TurnOutcome) -> Self {
        self.outcome = outcome;
        self
    }
}
