//! Sequential chain execution: one step at a time, stopping at the first
//! step that does not complete.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use forkhestra_types::{AgentDefault, ChainResult, ChainSpec, StepResult};
use tracing::info;

use crate::error::Result;
use crate::prompt::{self, PromptScopes};
use crate::runner::Runner;
use crate::runtime::AgentBackend;

/// Chain-wide inputs that apply to every step.
#[derive(Debug, Clone, Default)]
pub struct ChainInputs {
    pub cli_prompt: Option<String>,
    pub cli_prompt_file: Option<PathBuf>,
    pub agent_defaults: HashMap<String, AgentDefault>,
}

pub struct ChainExecutor<'a> {
    backend: &'a dyn AgentBackend,
    cwd: PathBuf,
}

impl<'a> ChainExecutor<'a> {
    pub fn new(backend: &'a dyn AgentBackend, cwd: impl AsRef<Path>) -> Self {
        Self {
            backend,
            cwd: cwd.as_ref().to_path_buf(),
        }
    }

    pub async fn run(&self, spec: &ChainSpec, inputs: &ChainInputs) -> Result<ChainResult> {
        let mut result = ChainResult::default();
        for (index, step) in spec.steps.iter().enumerate() {
            let agent_default = inputs.agent_defaults.get(&step.agent);
            let scopes = PromptScopes {
                cli_prompt: inputs.cli_prompt.as_deref(),
                cli_prompt_file: inputs.cli_prompt_file.as_deref(),
                step: Some(step),
                chain: Some(spec),
                agent_default,
            };
            let prompt = prompt::resolve_text(&scopes, &self.cwd)?;

            // chain-level args first so step args win when echoed
            let mut args = spec.args.clone();
            args.extend(step.args.iter().cloned());

            info!(step = index, agent = %step.agent, loop_mode = step.loop_mode, "running step");
            let run = Runner::new(self.backend, self.cwd.clone())
                .run_step(step, args, prompt, agent_default.cloned())
                .await?;
            let complete = run.complete;
            info!(
                step = index,
                agent = %step.agent,
                complete,
                iterations = run.iterations,
                reason = run.reason.as_str(),
                "step finished"
            );
            result.steps.push(StepResult {
                index,
                agent: step.agent.clone(),
                run,
            });
            if !complete {
                result.failed_at = Some(index);
                result.success = false;
                return Ok(result);
            }
        }
        result.success = true;
        Ok(result)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::runtime::CliBackend;
    use forkhestra_types::{RunReason, Step};
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn write_agent(dir: &TempDir, name: &str, body: &str) -> String {
        let path = dir.path().join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write");
        let mut perms = std::fs::metadata(&path).expect("metadata").permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).expect("chmod");
        path.to_string_lossy().into_owned()
    }

    #[tokio::test]
    async fn chain_of_clean_exits_succeeds() {
        let dir = TempDir::new().expect("tempdir");
        let planner = write_agent(&dir, "planner", "touch planned; exit 0");
        let builder = write_agent(&dir, "builder", "touch built; exit 0");
        let spec = ChainSpec::from_steps(vec![Step::single(&planner), Step::single(&builder)]);

        let backend = CliBackend;
        let result = ChainExecutor::new(&backend, dir.path())
            .run(&spec, &ChainInputs::default())
            .await
            .expect("run");
        assert!(result.success);
        assert_eq!(result.failed_at, None);
        assert_eq!(result.steps.len(), 2);
        assert!(result
            .steps
            .iter()
            .all(|s| s.run.reason == RunReason::SingleRun));
        assert!(dir.path().join("planned").exists());
        assert!(dir.path().join("built").exists());
    }

    #[tokio::test]
    async fn chain_stops_at_first_incomplete_step() {
        let dir = TempDir::new().expect("tempdir");
        let failing = write_agent(&dir, "failing", "exit 1");
        let after = write_agent(&dir, "after", "touch ran_anyway; exit 0");
        let spec = ChainSpec::from_steps(vec![Step::single(&failing), Step::single(&after)]);

        let backend = CliBackend;
        let result = ChainExecutor::new(&backend, dir.path())
            .run(&spec, &ChainInputs::default())
            .await
            .expect("run");
        assert!(!result.success);
        assert_eq!(result.failed_at, Some(0));
        assert_eq!(result.steps.len(), 1);
        assert!(!dir.path().join("ran_anyway").exists());
    }

    #[tokio::test]
    async fn chain_args_come_before_step_args() {
        let dir = TempDir::new().expect("tempdir");
        let recorder = write_agent(&dir, "recorder", r#"echo "$@" > argv.txt"#);
        let mut step = Step::single(&recorder);
        step.args = vec!["--step-arg".to_string()];
        let spec = ChainSpec {
            args: vec!["--chain-arg".to_string()],
            ..ChainSpec::from_steps(vec![step])
        };

        let backend = CliBackend;
        ChainExecutor::new(&backend, dir.path())
            .run(&spec, &ChainInputs::default())
            .await
            .expect("run");
        let argv = std::fs::read_to_string(dir.path().join("argv.txt")).expect("argv");
        let chain_at = argv.find("--chain-arg").expect("chain arg");
        let step_at = argv.find("--step-arg").expect("step arg");
        assert!(chain_at < step_at);
    }

    #[tokio::test]
    async fn cli_prompt_overrides_every_other_scope() {
        let dir = TempDir::new().expect("tempdir");
        let recorder = write_agent(&dir, "recorder", r#"printf '%s' "$3" > prompt.txt"#);
        let mut step = Step::single(&recorder);
        step.prompt = Some("step prompt".to_string());
        let spec = ChainSpec {
            prompt: Some("chain prompt".to_string()),
            ..ChainSpec::from_steps(vec![step])
        };
        let inputs = ChainInputs {
            cli_prompt: Some("cli prompt".to_string()),
            ..ChainInputs::default()
        };

        let backend = CliBackend;
        ChainExecutor::new(&backend, dir.path())
            .run(&spec, &inputs)
            .await
            .expect("run");
        let prompt = std::fs::read_to_string(dir.path().join("prompt.txt")).expect("prompt");
        assert_eq!(prompt, "cli prompt");
    }
}
