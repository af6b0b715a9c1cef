//! Signal relay for runner invocations: handlers live exactly as long as the
//! relay value, and received signals are forwarded to the live child.

use tokio::process::Child;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Interrupt,
    Terminate,
}

#[cfg(unix)]
pub use unix::SignalRelay;

#[cfg(unix)]
mod unix {
    use super::Signal;
    use tokio::signal::unix::{signal, SignalKind};

    pub struct SignalRelay {
        sigint: tokio::signal::unix::Signal,
        sigterm: tokio::signal::unix::Signal,
    }

    impl SignalRelay {
        pub fn new() -> std::io::Result<Self> {
            Ok(Self {
                sigint: signal(SignalKind::interrupt())?,
                sigterm: signal(SignalKind::terminate())?,
            })
        }

        pub async fn recv(&mut self) -> Signal {
            tokio::select! {
                _ = self.sigint.recv() => Signal::Interrupt,
                _ = self.sigterm.recv() => Signal::Terminate,
            }
        }
    }
}

#[cfg(not(unix))]
pub use fallback::SignalRelay;

#[cfg(not(unix))]
mod fallback {
    use super::Signal;

    /// Without unix signal streams only Ctrl-C is observable.
    pub struct SignalRelay;

    impl SignalRelay {
        pub fn new() -> std::io::Result<Self> {
            Ok(Self)
        }

        pub async fn recv(&mut self) -> Signal {
            let _ = tokio::signal::ctrl_c().await;
            Signal::Interrupt
        }
    }
}

/// Forwards `signal` to the child. On unix the same signal number is
/// delivered; elsewhere the closest available action is a hard kill.
pub fn forward_to(child: &mut Child, signal: Signal) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            let signo = match signal {
                Signal::Interrupt => libc::SIGINT,
                Signal::Terminate => libc::SIGTERM,
            };
            unsafe {
                libc::kill(pid as libc::pid_t, signo);
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = signal;
        let _ = child.start_kill();
    }
}
