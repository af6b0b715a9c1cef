use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// One agent invocation request within a chain.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Step {
    pub agent: String,
    #[serde(rename = "loop")]
    pub loop_mode: bool,
    pub max_iterations: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_file: Option<PathBuf>,
}

impl Step {
    /// A step that runs its agent exactly once, ignoring the completion marker.
    pub fn single(agent: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            loop_mode: false,
            max_iterations: 1,
            args: Vec::new(),
            prompt: None,
            prompt_file: None,
        }
    }

    /// A step that re-invokes its agent until the marker is seen or
    /// `max_iterations` children have exited.
    pub fn looping(agent: impl Into<String>, max_iterations: u32) -> Self {
        Self {
            agent: agent.into(),
            loop_mode: true,
            max_iterations,
            args: Vec::new(),
            prompt: None,
            prompt_file: None,
        }
    }

    /// Render in chain-expression form, `agent` or `agent:N`.
    pub fn to_expr(&self) -> String {
        if self.loop_mode {
            format!("{}:{}", self.agent, self.max_iterations)
        } else {
            self.agent.clone()
        }
    }
}

/// An ordered sequence of steps plus chain-level prompt and args.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChainSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_file: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    pub steps: Vec<Step>,
}

impl ChainSpec {
    pub fn from_steps(steps: Vec<Step>) -> Self {
        Self {
            steps,
            ..Self::default()
        }
    }

    pub fn to_expr(&self) -> String {
        self.steps
            .iter()
            .map(Step::to_expr)
            .collect::<Vec<_>>()
            .join(" -> ")
    }
}

/// Invocation metadata for agents defined purely by configuration, with no
/// launcher executable of their own. All fields are opaque pass-throughs to
/// the backend.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DirectSpawn {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt_file: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_turns: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_tools: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub disallowed_tools: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settings_file: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mcp_config_file: Option<PathBuf>,
}

/// Per-agent defaults from the chain config's `agents` map.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AgentDefault {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_prompt_file: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spawn: Option<DirectSpawn>,
}
