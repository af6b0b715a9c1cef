//! The backend seam between the orchestrator and the agent CLI it drives.
//! One concrete backend is provided; alternative agent CLIs plug in behind
//! the same trait.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use forkhestra_types::AgentDefault;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::error::{ChainError, Result};
use crate::signal::{forward_to, SignalRelay};

/// Flags prepended to every headless launch: non-interactive print mode and
/// no interactive permission prompts.
const HEADLESS_FLAGS: [&str; 2] = ["--print", "--dangerously-skip-permissions"];

/// Executable used for agents defined purely by config metadata.
const AGENT_CLI: &str = "claude";

/// Everything needed to launch one child process for a step iteration.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub agent: String,
    pub args: Vec<String>,
    pub prompt: Option<String>,
    pub agent_default: Option<AgentDefault>,
    pub cwd: PathBuf,
}

impl Invocation {
    /// Agents with a `spawn` block have no launcher of their own; the
    /// backend synthesizes the command.
    fn direct_spawn(&self) -> Option<&forkhestra_types::DirectSpawn> {
        self.agent_default.as_ref().and_then(|d| d.spawn.as_ref())
    }

    fn program(&self) -> &str {
        if self.direct_spawn().is_some() {
            AGENT_CLI
        } else {
            &self.agent
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RunExit {
    pub exit_code: i32,
    pub interrupted: bool,
}

#[async_trait]
pub trait AgentBackend: Send + Sync {
    /// Whether the invocation's executable can be found at all.
    fn is_available(&self, invocation: &Invocation) -> bool;

    /// Runs one child to completion with stdout inherited.
    async fn spawn_once(
        &self,
        invocation: &Invocation,
        relay: &mut SignalRelay,
    ) -> Result<RunExit>;

    /// Runs one child with stdout piped, feeding each decoded chunk to
    /// `on_chunk` in arrival order. Returns only after the child has exited
    /// and its stdout is fully drained.
    async fn spawn_streaming(
        &self,
        invocation: &Invocation,
        on_chunk: &mut (dyn for<'c> FnMut(&'c str) + Send),
        relay: &mut SignalRelay,
    ) -> Result<RunExit>;

    /// Runs one child with all stdio inherited and no headless flags.
    async fn spawn_interactive(&self, invocation: &Invocation) -> Result<RunExit>;
}

/// Default backend: the agent identifier is an executable on PATH (or an
/// absolute path), launched headless with the prompt as the final
/// positional argument.
#[derive(Debug, Default)]
pub struct CliBackend;

impl CliBackend {
    fn command(&self, invocation: &Invocation, headless: bool, stdout: Stdio) -> Command {
        let mut cmd = Command::new(invocation.program());
        if headless {
            cmd.args(HEADLESS_FLAGS);
        }
        if let Some(spawn) = invocation.direct_spawn() {
            if let Some(path) = &spawn.system_prompt_file {
                cmd.arg("--system-prompt-file").arg(path);
            }
            if let Some(model) = &spawn.model {
                cmd.arg("--model").arg(model);
            }
            if let Some(max_turns) = spawn.max_turns {
                cmd.arg("--max-turns").arg(max_turns.to_string());
            }
            if !spawn.allowed_tools.is_empty() {
                cmd.arg("--allowed-tools").arg(spawn.allowed_tools.join(","));
            }
            if !spawn.disallowed_tools.is_empty() {
                cmd.arg("--disallowed-tools")
                    .arg(spawn.disallowed_tools.join(","));
            }
            if let Some(path) = &spawn.settings_file {
                cmd.arg("--settings").arg(path);
            }
            if let Some(path) = &spawn.mcp_config_file {
                cmd.arg("--mcp-config").arg(path);
            }
        }
        cmd.args(&invocation.args);
        if let Some(prompt) = &invocation.prompt {
            cmd.arg(prompt);
        }
        cmd.current_dir(&invocation.cwd);
        // headless children must not contend for the terminal
        cmd.stdin(if headless {
            Stdio::null()
        } else {
            Stdio::inherit()
        });
        cmd.stderr(Stdio::inherit());
        cmd.stdout(stdout);
        cmd
    }

    fn spawn(&self, invocation: &Invocation, mut cmd: Command) -> Result<Child> {
        debug!(agent = %invocation.agent, "spawning agent child");
        cmd.spawn().map_err(|cause| ChainError::AgentUnavailable {
            agent: invocation.agent.clone(),
            cause,
        })
    }
}

#[async_trait]
impl AgentBackend for CliBackend {
    fn is_available(&self, invocation: &Invocation) -> bool {
        locate(invocation.program(), &invocation.cwd)
    }

    async fn spawn_once(
        &self,
        invocation: &Invocation,
        relay: &mut SignalRelay,
    ) -> Result<RunExit> {
        let cmd = self.command(invocation, true, Stdio::inherit());
        let child = self.spawn(invocation, cmd)?;
        wait_forwarding(child, invocation, relay, false).await
    }

    async fn spawn_streaming(
        &self,
        invocation: &Invocation,
        on_chunk: &mut (dyn for<'c> FnMut(&'c str) + Send),
        relay: &mut SignalRelay,
    ) -> Result<RunExit> {
        let cmd = self.command(invocation, true, Stdio::piped());
        let mut child = self.spawn(invocation, cmd)?;
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::Other, "child stdout unavailable")
            })?;

        let mut interrupted = false;
        let mut buf = vec![0u8; 4096];
        loop {
            tokio::select! {
                read = stdout.read(&mut buf) => {
                    let n = read?;
                    if n == 0 {
                        break;
                    }
                    let chunk = String::from_utf8_lossy(&buf[..n]);
                    on_chunk(&chunk);
                }
                signal = relay.recv() => {
                    warn!(agent = %invocation.agent, ?signal, "forwarding signal to child");
                    forward_to(&mut child, signal);
                    interrupted = true;
                }
            }
        }

        let exit = wait_forwarding(child, invocation, relay, interrupted).await?;
        Ok(exit)
    }

    async fn spawn_interactive(&self, invocation: &Invocation) -> Result<RunExit> {
        let cmd = self.command(invocation, false, Stdio::inherit());
        let mut child = self.spawn(invocation, cmd)?;
        let status = child.wait().await?;
        Ok(RunExit {
            exit_code: exit_code(&status),
            interrupted: false,
        })
    }
}

/// Awaits child exit while continuing to forward any signal that arrives.
async fn wait_forwarding(
    mut child: Child,
    invocation: &Invocation,
    relay: &mut SignalRelay,
    mut interrupted: bool,
) -> Result<RunExit> {
    loop {
        tokio::select! {
            status = child.wait() => {
                let status = status?;
                return Ok(RunExit {
                    exit_code: exit_code(&status),
                    interrupted,
                });
            }
            signal = relay.recv() => {
                warn!(agent = %invocation.agent, ?signal, "forwarding signal to child");
                forward_to(&mut child, signal);
                interrupted = true;
            }
        }
    }
}

fn exit_code(status: &std::process::ExitStatus) -> i32 {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    status.code().unwrap_or(-1)
}

/// PATH lookup for bare program names; direct existence check otherwise.
fn locate(program: &str, cwd: &Path) -> bool {
    let as_path = Path::new(program);
    if as_path.components().count() > 1 || as_path.is_absolute() {
        let resolved = if as_path.is_absolute() {
            as_path.to_path_buf()
        } else {
            cwd.join(as_path)
        };
        return resolved.exists();
    }
    let Some(path_var) = std::env::var_os("PATH") else {
        return false;
    };
    std::env::split_paths(&path_var).any(|dir| dir.join(program).is_file())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invocation(agent: &str) -> Invocation {
        Invocation {
            agent: agent.to_string(),
            args: vec![],
            prompt: None,
            agent_default: None,
            cwd: PathBuf::from("."),
        }
    }

    #[test]
    fn availability_checks_path_and_absolute_targets() {
        let backend = CliBackend;
        #[cfg(unix)]
        assert!(backend.is_available(&invocation("sh")));
        assert!(!backend.is_available(&invocation("definitely-not-an-agent-9x")));
        assert!(!backend.is_available(&invocation("/definitely/not/here")));
    }

    #[test]
    fn direct_spawn_switches_to_the_agent_cli() {
        let mut inv = invocation("review:security");
        assert_eq!(inv.program(), "review:security");
        inv.agent_default = Some(AgentDefault {
            spawn: Some(forkhestra_types::DirectSpawn {
                model: Some("fast".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        });
        assert_eq!(inv.program(), AGENT_CLI);
    }
}
