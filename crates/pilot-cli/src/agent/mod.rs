//! Agent loop: prompt, interpret, execute, report back
//!
//! Each user request is driven to completion before the next is read.

mod agent_loop;
mod state;

pub use agent_loop::AgentLoop;
pub use state::{AgentConfig, TurnOutcome, TurnReport};
