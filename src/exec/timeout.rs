//! Execution Timeout Management
//!
//! Bounds how long a child process may run and owns the termination
//! sequence used when that bound is exceeded: a graceful signal first, then a
//! forceful kill if the child is still alive after the grace window. The child
//! is always reaped before control returns.

use std::io;
use std::process::ExitStatus;
use std::time::Duration;
use tokio::process::Child;
use tokio::time;
use tracing::{debug, warn};

/// Default grace window between the graceful signal and the forceful kill
pub const DEFAULT_KILL_GRACE: Duration = Duration::from_secs(2);

/// Execution timeout configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionTimeout {
    /// Maximum run time
    duration: Duration,

    /// Time allowed to exit after the graceful signal
    grace: Duration,
}

impl ExecutionTimeout {
    /// Create a new execution timeout with the default grace window
    ///
    /// # Example
    ///
    /// ```
    /// use std::time::Duration;
    /// use pmguard::exec::ExecutionTimeout;
    ///
    /// let timeout = ExecutionTimeout::new(Duration::from_secs(30));
    /// assert_eq!(timeout.duration(), Duration::from_secs(30));
    /// ```
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            grace: DEFAULT_KILL_GRACE,
        }
    }

    /// Override the grace window
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Get the timeout duration
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Get the grace window
    pub fn grace(&self) -> Duration {
        self.grace
    }

    /// Wait for the child to exit within the timeout
    ///
    /// Returns `Ok(None)` when the timeout elapsed; the child is still running
    /// at that point and must be passed to [`ExecutionTimeout::terminate`].
    pub async fn wait(&self, child: &mut Child) -> io::Result<Option<ExitStatus>> {
        match time::timeout(self.duration, child.wait()).await {
            Ok(status) => status.map(Some),
            Err(_) => Ok(None),
        }
    }

    /// Terminate and reap a child that overran its budget
    ///
    /// `pid` is the id captured at spawn time; on Unix it doubles as the
    /// process-group id because the runner starts every child in its own group.
    pub async fn terminate(&self, child: &mut Child, pid: Option<u32>) -> io::Result<ExitStatus> {
        debug!(?pid, grace = ?self.grace, "Sending graceful termination");
        send_terminate(child, pid)?;

        let status = match time::timeout(self.grace, child.wait()).await {
            Ok(status) => status?,
            Err(_) => {
                warn!(?pid, "Child ignored graceful termination, killing");
                child.kill().await?;
                child.wait().await?
            }
        };

        // Anything left in the group (grandchildren that ignored SIGTERM) goes too.
        #[cfg(unix)]
        if let Some(pid) = pid {
            signal_group(pid, nix::sys::signal::Signal::SIGKILL);
        }

        Ok(status)
    }
}

#[cfg(unix)]
fn send_terminate(_child: &mut Child, pid: Option<u32>) -> io::Result<()> {
    if let Some(pid) = pid {
        signal_group(pid, nix::sys::signal::Signal::SIGTERM);
    }
    Ok(())
}

#[cfg(not(unix))]
fn send_terminate(child: &mut Child, _pid: Option<u32>) -> io::Result<()> {
    // No graceful signal for console processes; the kill is the termination.
    child.start_kill()
}

#[cfg(unix)]
fn signal_group(pid: u32, signal: nix::sys::signal::Signal) {
    use nix::errno::Errno;
    use nix::sys::signal::killpg;
    use nix::unistd::Pid;

    match killpg(Pid::from_raw(pid as i32), signal) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => warn!(pid, ?signal, error = %e, "Failed to signal process group"),
    }
}
