mod chain;
mod run;

pub use chain::{AgentDefault, ChainSpec, DirectSpawn, Step};
pub use run::{ChainResult, RunReason, RunResult, StepResult};
