//! Executes one step: a single child run, or a marker-watched loop of fresh
//! child invocations.

use std::io::Write;
use std::path::PathBuf;

use forkhestra_types::{AgentDefault, RunReason, RunResult, Step};
use tracing::{debug, warn};

use crate::error::{ChainError, Result};
use crate::marker::MarkerScanner;
use crate::runtime::{AgentBackend, Invocation};
use crate::signal::SignalRelay;

pub struct Runner<'a> {
    backend: &'a dyn AgentBackend,
    cwd: PathBuf,
}

impl<'a> Runner<'a> {
    pub fn new(backend: &'a dyn AgentBackend, cwd: PathBuf) -> Self {
        Self { backend, cwd }
    }

    /// Runs `step` to a `RunResult`. `args` is the final argument list
    /// (chain-level args already merged in); `prompt` is the resolved prompt
    /// text, appended as the last positional argument.
    pub async fn run_step(
        &self,
        step: &Step,
        args: Vec<String>,
        prompt: Option<String>,
        agent_default: Option<AgentDefault>,
    ) -> Result<RunResult> {
        let invocation = Invocation {
            agent: step.agent.clone(),
            args,
            prompt,
            agent_default,
            cwd: self.cwd.clone(),
        };
        // handlers are registered here and dropped when the relay goes out
        // of scope at the end of the step
        let mut relay = SignalRelay::new()?;

        if !step.loop_mode {
            let exit = self.backend.spawn_once(&invocation, &mut relay).await?;
            return Ok(RunResult {
                complete: !exit.interrupted && exit.exit_code == 0,
                iterations: 1,
                exit_code: exit.exit_code,
                reason: if exit.interrupted {
                    RunReason::Signal
                } else {
                    RunReason::SingleRun
                },
            });
        }

        let mut scanner = MarkerScanner::new();
        let mut last_exit = 0;
        for iteration in 1..=step.max_iterations {
            debug!(
                agent = %step.agent,
                iteration,
                max = step.max_iterations,
                "starting loop iteration"
            );
            let mut on_chunk = |chunk: &str| {
                let mut stdout = std::io::stdout();
                let _ = stdout.write_all(chunk.as_bytes());
                let _ = stdout.flush();
                scanner.push(chunk);
            };
            let exit = match self
                .backend
                .spawn_streaming(&invocation, &mut on_chunk, &mut relay)
                .await
            {
                Ok(exit) => exit,
                Err(err @ ChainError::AgentUnavailable { .. }) => return Err(err),
                Err(err) => {
                    warn!(agent = %step.agent, iteration, error = %err, "iteration failed");
                    return Ok(RunResult {
                        complete: false,
                        iterations: iteration,
                        exit_code: -1,
                        reason: RunReason::Error,
                    });
                }
            };
            last_exit = exit.exit_code;

            if scanner.seen() {
                debug!(agent = %step.agent, iteration, "completion marker seen");
                return Ok(RunResult {
                    complete: true,
                    iterations: iteration,
                    exit_code: exit.exit_code,
                    reason: RunReason::Marker,
                });
            }
            if exit.interrupted {
                return Ok(RunResult {
                    complete: false,
                    iterations: iteration,
                    exit_code: exit.exit_code,
                    reason: RunReason::Signal,
                });
            }
            if exit.exit_code != 0 {
                // an unmarked crash is just another iteration; file state is
                // the real success signal
                debug!(
                    agent = %step.agent,
                    iteration,
                    exit_code = exit.exit_code,
                    "child exited nonzero without marker, continuing"
                );
            }
        }

        Ok(RunResult {
            complete: false,
            iterations: step.max_iterations,
            exit_code: last_exit,
            reason: RunReason::MaxIterations,
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::marker::COMPLETION_MARKER;
    use crate::runtime::CliBackend;
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

    async fn run(dir: &TempDir, step: Step) -> RunResult {
        let backend = CliBackend;
        Runner::new(&backend, dir.path().to_path_buf())
            .run_step(&step, vec![], None, None)
            .await
            .expect("run")
    }

    #[tokio::test]
    async fn single_run_completion_follows_exit_code() {
        let dir = TempDir::new().expect("tempdir");
        let ok = write_agent(&dir, "ok", "exit 0");
        let result = run(&dir, Step::single(&ok)).await;
        assert!(result.complete);
        assert_eq!(result.iterations, 1);
        assert_eq!(result.reason, RunReason::SingleRun);

        let failing = write_agent(&dir, "failing", "exit 3");
        let result = run(&dir, Step::single(&failing)).await;
        assert!(!result.complete);
        assert_eq!(result.exit_code, 3);
        assert_eq!(result.reason, RunReason::SingleRun);
    }

    #[tokio::test]
    async fn loop_completes_when_marker_appears() {
        let dir = TempDir::new().expect("tempdir");
        let agent = write_agent(
            &dir,
            "counter",
            &format!(
                r#"c=$(cat count 2>/dev/null || echo 0)
c=$((c+1))
echo "$c" > count
echo "iteration $c"
[ "$c" -ge 3 ] && echo {COMPLETION_MARKER}
exit 0"#
            ),
        );
        let result = run(&dir, Step::looping(&agent, 5)).await;
        assert!(result.complete);
        assert_eq!(result.iterations, 3);
        assert_eq!(result.reason, RunReason::Marker);
    }

    #[tokio::test]
    async fn loop_exhausts_without_marker() {
        let dir = TempDir::new().expect("tempdir");
        let agent = write_agent(&dir, "chatty", "echo still working");
        let result = run(&dir, Step::looping(&agent, 2)).await;
        assert!(!result.complete);
        assert_eq!(result.iterations, 2);
        assert_eq!(result.reason, RunReason::MaxIterations);
    }

    #[tokio::test]
    async fn marker_inside_a_larger_stream_counts() {
        let dir = TempDir::new().expect("tempdir");
        let agent = write_agent(
            &dir,
            "noisy",
            &format!("echo \"lots of output before {COMPLETION_MARKER} and after\""),
        );
        let result = run(&dir, Step::looping(&agent, 4)).await;
        assert!(result.complete);
        assert_eq!(result.iterations, 1);
    }

    #[tokio::test]
    async fn marker_prefix_does_not_count() {
        let dir = TempDir::new().expect("tempdir");
        let prefix = &COMPLETION_MARKER[..COMPLETION_MARKER.len() - 1];
        let agent = write_agent(&dir, "teaser", &format!("echo {prefix}"));
        let result = run(&dir, Step::looping(&agent, 2)).await;
        assert!(!result.complete);
        assert_eq!(result.reason, RunReason::MaxIterations);
    }

    #[tokio::test]
    async fn crashing_iterations_keep_looping() {
        let dir = TempDir::new().expect("tempdir");
        let agent = write_agent(
            &dir,
            "flaky",
            &format!(
                r#"c=$(cat count 2>/dev/null || echo 0)
c=$((c+1))
echo "$c" > count
[ "$c" -ge 2 ] && echo {COMPLETION_MARKER} && exit 0
exit 9"#
            ),
        );
        let result = run(&dir, Step::looping(&agent, 3)).await;
        assert!(result.complete);
        assert_eq!(result.iterations, 2);
        assert_eq!(result.reason, RunReason::Marker);
    }

    #[tokio::test]
    async fn missing_agent_is_a_launch_error() {
        let dir = TempDir::new().expect("tempdir");
        let backend = CliBackend;
        let step = Step::single("/definitely/not/an/agent");
        let err = Runner::new(&backend, dir.path().to_path_buf())
            .run_step(&step, vec![], None, None)
            .await
            .expect_err("spawn must fail");
        assert!(matches!(err, ChainError::AgentUnavailable { .. }));
    }

    #[tokio::test]
    async fn prompt_is_the_final_positional_argument() {
        let dir = TempDir::new().expect("tempdir");
        let agent = write_agent(&dir, "echoer", r#"for a in "$@"; do echo "arg: $a"; done > args.txt"#);
        let backend = CliBackend;
        let step = Step::single(&agent);
        Runner::new(&backend, dir.path().to_path_buf())
            .run_step(
                &step,
                vec!["--task".to_string(), "TASK-1".to_string()],
                Some("do the thing".to_string()),
                None,
            )
            .await
            .expect("run");
        let recorded = std::fs::read_to_string(dir.path().join("args.txt")).expect("args");
        let args: Vec<&str> = recorded.lines().collect();
        assert_eq!(
            args,
            vec![
                "arg: --print",
                "arg: --dangerously-skip-permissions",
                "arg: --task",
                "arg: TASK-1",
                "arg: do the thing",
            ]
        );
    }
}
