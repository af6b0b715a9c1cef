use serde::{Deserialize, Serialize};

/// Why a step execution returned.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunReason {
    /// The completion marker was seen on the child's stdout.
    Marker,
    /// The loop ran its full iteration budget without seeing the marker.
    MaxIterations,
    /// The child could not be spawned or its streams could not be drained.
    Error,
    /// Non-loop step; completion is the child's exit status.
    SingleRun,
    /// SIGINT/SIGTERM was forwarded to the child and the run stopped.
    Signal,
}

impl RunReason {
    pub fn as_str(self) -> &'static str {
        match self {
            RunReason::Marker => "marker",
            RunReason::MaxIterations => "max_iterations",
            RunReason::Error => "error",
            RunReason::SingleRun => "single_run",
            RunReason::Signal => "signal",
        }
    }
}

/// Outcome of executing one step.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunResult {
    pub complete: bool,
    pub iterations: u32,
    pub exit_code: i32,
    pub reason: RunReason,
}

/// One step's slot in a chain outcome.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StepResult {
    pub index: usize,
    pub agent: String,
    pub run: RunResult,
}

/// Aggregate outcome of a chain execution.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChainResult {
    pub steps: Vec<StepResult>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<usize>,
}
