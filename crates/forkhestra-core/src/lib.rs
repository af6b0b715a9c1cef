pub mod config;
pub mod dsl;
pub mod error;
pub mod executor;
pub mod marker;
pub mod prompt;
pub mod runner;
pub mod runtime;
pub mod signal;

pub use config::{
    is_variable_name, substitute, substitute_agent_default, substitute_chain, ChainConfig,
};
pub use dsl::parse_chain_expr;
pub use error::{ChainError, Result};
pub use executor::{ChainExecutor, ChainInputs};
pub use marker::{MarkerScanner, COMPLETION_MARKER, LEGACY_COMPLETION_MARKER};
pub use prompt::{read_prompt_file, PromptScopes, PromptSource};
pub use runner::Runner;
pub use runtime::{AgentBackend, CliBackend, Invocation, RunExit};
