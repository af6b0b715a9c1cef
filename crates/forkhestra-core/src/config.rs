//! Chain configuration: `forge/chains.json` loading, validation, and
//! `${NAME}` variable substitution.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use forkhestra_types::{AgentDefault, ChainSpec, DirectSpawn, Step};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{ChainError, Result};

pub const CONFIG_PATH: &str = "forge/chains.json";
pub const LEGACY_CONFIG_PATH: &str = "forge/orch/chains.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChainFile {
    chains: BTreeMap<String, ChainEntry>,
    #[serde(default)]
    agents: BTreeMap<String, AgentEntry>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChainEntry {
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    prompt: Option<String>,
    #[serde(default, alias = "promptFile")]
    prompt_file: Option<PathBuf>,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    steps: Vec<StepEntry>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StepEntry {
    #[serde(default)]
    agent: String,
    #[serde(default)]
    iterations: Option<u32>,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    prompt: Option<String>,
    #[serde(default, alias = "promptFile")]
    prompt_file: Option<PathBuf>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AgentEntry {
    #[serde(default, alias = "defaultPrompt")]
    default_prompt: Option<String>,
    #[serde(default, alias = "defaultPromptFile")]
    default_prompt_file: Option<PathBuf>,
    #[serde(default)]
    spawn: Option<SpawnEntry>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SpawnEntry {
    #[serde(default, alias = "systemPromptFile")]
    system_prompt_file: Option<PathBuf>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default, alias = "maxTurns")]
    max_turns: Option<u32>,
    #[serde(default, alias = "allowedTools")]
    allowed_tools: Vec<String>,
    #[serde(default, alias = "disallowedTools")]
    disallowed_tools: Vec<String>,
    #[serde(default, alias = "settingsFile")]
    settings_file: Option<PathBuf>,
    #[serde(default, alias = "mcpConfigFile")]
    mcp_config_file: Option<PathBuf>,
}

/// A loaded and validated chain configuration file.
#[derive(Debug)]
pub struct ChainConfig {
    path: PathBuf,
    file: ChainFile,
}

impl ChainConfig {
    /// Reads the canonical config path under `cwd`, falling back to the
    /// legacy location.
    pub fn load(cwd: &Path) -> Result<Self> {
        let canonical = cwd.join(CONFIG_PATH);
        let legacy = cwd.join(LEGACY_CONFIG_PATH);
        let path = if canonical.exists() {
            canonical
        } else if legacy.exists() {
            debug!(path = %legacy.display(), "using legacy chain config path");
            legacy
        } else {
            return Err(ChainError::ConfigNotFound(canonical));
        };
        let raw = fs::read_to_string(&path)?;
        Self::from_str(&raw, path)
    }

    pub fn from_str(raw: &str, path: PathBuf) -> Result<Self> {
        let file: ChainFile = serde_json::from_str(raw).map_err(|e| ChainError::InvalidConfig {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        let config = Self { path, file };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.file.chains.is_empty() {
            return Err(self.invalid("'chains' must contain at least one chain"));
        }
        for (name, chain) in &self.file.chains {
            if chain.steps.is_empty() {
                return Err(self.invalid(format!("chain '{name}' has no steps")));
            }
            for (index, step) in chain.steps.iter().enumerate() {
                if step.agent.trim().is_empty() {
                    return Err(
                        self.invalid(format!("chain '{name}' step {index} has no agent"))
                    );
                }
                if step.iterations == Some(0) {
                    return Err(self.invalid(format!(
                        "chain '{name}' step {index} has iterations < 1"
                    )));
                }
            }
        }
        Ok(())
    }

    fn invalid(&self, reason: impl Into<String>) -> ChainError {
        ChainError::InvalidConfig {
            path: self.path.clone(),
            reason: reason.into(),
        }
    }

    pub fn chain_names(&self) -> Vec<String> {
        self.file.chains.keys().cloned().collect()
    }

    pub fn get_chain(&self, name: &str) -> Result<ChainSpec> {
        let entry = self
            .file
            .chains
            .get(name)
            .ok_or_else(|| ChainError::UnknownChain {
                name: name.to_string(),
                available: self.chain_names(),
            })?;
        Ok(ChainSpec {
            description: entry.description.clone(),
            prompt: entry.prompt.clone(),
            prompt_file: entry.prompt_file.clone(),
            args: entry.args.clone(),
            steps: entry
                .steps
                .iter()
                .map(|step| Step {
                    agent: step.agent.trim().to_string(),
                    loop_mode: step.iterations.is_some(),
                    max_iterations: step.iterations.unwrap_or(1),
                    args: step.args.clone(),
                    prompt: step.prompt.clone(),
                    prompt_file: step.prompt_file.clone(),
                })
                .collect(),
        })
    }

    /// Defaults for one agent, if the config declares any.
    pub fn agent_default(&self, agent: &str) -> Option<AgentDefault> {
        self.file.agents.get(agent).map(|entry| AgentDefault {
            default_prompt: entry.default_prompt.clone(),
            default_prompt_file: entry.default_prompt_file.clone(),
            spawn: entry.spawn.as_ref().map(|spawn| DirectSpawn {
                system_prompt_file: spawn.system_prompt_file.clone(),
                model: spawn.model.clone(),
                max_turns: spawn.max_turns,
                allowed_tools: spawn.allowed_tools.clone(),
                disallowed_tools: spawn.disallowed_tools.clone(),
                settings_file: spawn.settings_file.clone(),
                mcp_config_file: spawn.mcp_config_file.clone(),
            }),
        })
    }
}

/// Replaces `${NAME}` tokens in a single pass. Unbound names error; bound
/// names that never appear are fine. Values are inserted literally, never
/// re-scanned.
pub fn substitute(input: &str, vars: &HashMap<String, String>) -> Result<String> {
    let bytes = input.as_bytes();
    let mut out = String::with_capacity(input.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' && i + 1 < bytes.len() && bytes[i + 1] == b'{' {
            if let Some(end) = input[i + 2..].find('}') {
                let name = &input[i + 2..i + 2 + end];
                if is_variable_name(name) {
                    let value = vars
                        .get(name)
                        .ok_or_else(|| ChainError::MissingVariable(name.to_string()))?;
                    out.push_str(value);
                    i += 2 + end + 1;
                    continue;
                }
            }
        }
        let ch = input[i..].chars().next().unwrap_or('\u{fffd}');
        out.push(ch);
        i += ch.len_utf8();
    }
    Ok(out)
}

/// `NAME` in a `${NAME}` token or a `NAME=value` CLI binding.
pub fn is_variable_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_uppercase() || first == '_' => {
            chars.all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
        }
        _ => false,
    }
}

fn substitute_opt(value: &mut Option<String>, vars: &HashMap<String, String>) -> Result<()> {
    if let Some(inner) = value {
        *inner = substitute(inner, vars)?;
    }
    Ok(())
}

fn substitute_path(value: &mut Option<PathBuf>, vars: &HashMap<String, String>) -> Result<()> {
    if let Some(inner) = value {
        let raw = inner.to_string_lossy().into_owned();
        *inner = PathBuf::from(substitute(&raw, vars)?);
    }
    Ok(())
}

/// Applies variable substitution to every substitutable field of a chain.
pub fn substitute_chain(spec: &mut ChainSpec, vars: &HashMap<String, String>) -> Result<()> {
    substitute_opt(&mut spec.prompt, vars)?;
    substitute_path(&mut spec.prompt_file, vars)?;
    for arg in &mut spec.args {
        *arg = substitute(arg, vars)?;
    }
    for step in &mut spec.steps {
        substitute_opt(&mut step.prompt, vars)?;
        substitute_path(&mut step.prompt_file, vars)?;
        for arg in &mut step.args {
            *arg = substitute(arg, vars)?;
        }
    }
    Ok(())
}

pub fn substitute_agent_default(
    default: &mut AgentDefault,
    vars: &HashMap<String, String>,
) -> Result<()> {
    substitute_opt(&mut default.default_prompt, vars)?;
    substitute_path(&mut default.default_prompt_file, vars)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn sample() -> ChainConfig {
        let raw = r#"{
            "chains": {
                "single-task": {
                    "description": "work one task",
                    "prompt": "chain prompt",
                    "steps": [
                        {"agent": "planner"},
                        {"agent": "worker", "iterations": 5,
                         "args": ["--task", "${TASK_ID}"], "promptFile": "prompts/worker.md"}
                    ]
                }
            },
            "agents": {
                "worker": {"defaultPrompt": "keep going", "spawn": {"model": "fast", "maxTurns": 30}}
            },
            "schemaVersion": 2
        }"#;
        ChainConfig::from_str(raw, PathBuf::from("forge/chains.json")).expect("config")
    }

    #[test]
    fn chains_parse_with_alternate_spellings_and_unknown_fields() {
        let config = sample();
        let chain = config.get_chain("single-task").expect("chain");
        assert_eq!(chain.steps.len(), 2);
        assert!(!chain.steps[0].loop_mode);
        assert!(chain.steps[1].loop_mode);
        assert_eq!(chain.steps[1].max_iterations, 5);
        assert_eq!(
            chain.steps[1].prompt_file.as_deref(),
            Some(Path::new("prompts/worker.md"))
        );
        assert_eq!(config.file.extra.get("schemaVersion"), Some(&Value::from(2)));
    }

    #[test]
    fn unknown_chain_lists_available_names() {
        let config = sample();
        match config.get_chain("nope").expect_err("unknown") {
            ChainError::UnknownChain { available, .. } => {
                assert_eq!(available, vec!["single-task"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn agent_defaults_carry_spawn_metadata() {
        let config = sample();
        let default = config.agent_default("worker").expect("default");
        assert_eq!(default.default_prompt.as_deref(), Some("keep going"));
        let spawn = default.spawn.expect("spawn");
        assert_eq!(spawn.model.as_deref(), Some("fast"));
        assert_eq!(spawn.max_turns, Some(30));
        assert!(config.agent_default("planner").is_none());
    }

    #[test]
    fn empty_or_invalid_configs_are_rejected() {
        for raw in [
            r#"{"chains": {}}"#,
            r#"{"chains": {"c": {"steps": []}}}"#,
            r#"{"chains": {"c": {"steps": [{"agent": ""}]}}}"#,
            r#"{"chains": {"c": {"steps": [{"agent": "a", "iterations": 0}]}}}"#,
        ] {
            let err = ChainConfig::from_str(raw, PathBuf::from("chains.json")).expect_err(raw);
            assert!(matches!(err, ChainError::InvalidConfig { .. }), "{raw}");
        }
    }

    #[test]
    fn substitution_replaces_bound_variables() {
        let bindings = vars(&[("TASK_ID", "TASK-001")]);
        let out = substitute("--task ${TASK_ID} done", &bindings).expect("substitute");
        assert_eq!(out, "--task TASK-001 done");
        // a second pass changes nothing
        assert_eq!(substitute(&out, &bindings).expect("substitute"), out);
    }

    #[test]
    fn unbound_variables_error_and_non_variables_pass_through() {
        let err = substitute("${MISSING}", &vars(&[])).expect_err("unbound");
        assert!(matches!(err, ChainError::MissingVariable(name) if name == "MISSING"));

        for literal in ["${lower}", "$TASK", "${}", "plain ${1BAD} text"] {
            assert_eq!(
                substitute(literal, &vars(&[])).expect("passthrough"),
                literal
            );
        }
    }

    #[test]
    fn chain_substitution_covers_args_and_prompts() {
        let config = sample();
        let mut chain = config.get_chain("single-task").expect("chain");
        let err = substitute_chain(&mut chain.clone(), &vars(&[])).expect_err("unbound");
        assert!(matches!(err, ChainError::MissingVariable(_)));

        substitute_chain(&mut chain, &vars(&[("TASK_ID", "TASK-7")])).expect("substitute");
        assert_eq!(chain.steps[1].args, vec!["--task", "TASK-7"]);
    }
}
