//! Process Runner
//!
//! Spawns package-manager executables with an argument vector, a working
//! directory and a timeout, capturing stdout/stderr in full. Arguments are
//! passed verbatim; nothing goes through a shell unless a [`CommandSpec`] opts
//! into shell mode explicitly.

use super::timeout::ExecutionTimeout;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command as TokioCommand;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Exit code reported when the process was ended by a signal
pub const SIGNALLED_EXIT_CODE: i32 = -1;

/// A single command invocation
///
/// Built fresh per invocation and consumed by [`CommandRunner::execute`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Executable to launch
    pub program: PathBuf,

    /// Arguments, each passed as one token
    pub args: Vec<String>,

    /// Working directory for the child
    pub cwd: PathBuf,

    /// Wall-clock budget
    pub timeout: Duration,

    /// Run through the platform shell (`sh -c` / `cmd /C`) instead of argv
    pub shell: bool,
}

impl CommandSpec {
    /// Create a new argv-mode command
    pub fn new<I, S>(program: impl Into<PathBuf>, args: I, cwd: impl AsRef<Path>, timeout: Duration) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            cwd: cwd.as_ref().to_path_buf(),
            timeout,
            shell: false,
        }
    }

    /// Route the invocation through the platform shell
    ///
    /// Only for executables that cannot be launched directly, such as npm's
    /// `.cmd` wrapper on Windows. Arguments are quoted before joining.
    pub fn with_shell(mut self, shell: bool) -> Self {
        self.shell = shell;
        self
    }

    /// Program name without its directory, for messages and logs
    pub fn program_name(&self) -> String {
        self.program
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.program.to_string_lossy().into_owned())
    }

    /// Human-readable command line
    pub fn display(&self) -> String {
        let mut line = self.program.to_string_lossy().into_owned();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }

    fn to_command(&self) -> io::Result<TokioCommand> {
        if self.shell {
            let line = shell_line(&self.program.to_string_lossy(), &self.args)?;
            let mut command = shell_command();
            command.arg(line);
            Ok(command)
        } else {
            let mut command = TokioCommand::new(&self.program);
            command.args(&self.args);
            Ok(command)
        }
    }
}

#[cfg(windows)]
fn shell_command() -> TokioCommand {
    let mut command = TokioCommand::new("cmd");
    command.arg("/C");
    command
}

#[cfg(not(windows))]
fn shell_command() -> TokioCommand {
    let mut command = TokioCommand::new("sh");
    command.arg("-c");
    command
}

#[cfg(windows)]
fn shell_line(program: &str, args: &[String]) -> io::Result<String> {
    let quote = |arg: &str| {
        if arg.is_empty() || arg.contains(|c: char| c.is_whitespace() || c == '"') {
            format!("\"{}\"", arg.replace('"', "\\\""))
        } else {
            arg.to_string()
        }
    };
    let mut line = quote(program);
    for arg in args {
        line.push(' ');
        line.push_str(&quote(arg));
    }
    Ok(line)
}

/// POSIX-quoted command line for `sh -c`
///
/// Fails for arguments no shell word can carry (interior NUL bytes).
#[cfg(not(windows))]
fn shell_line(program: &str, args: &[String]) -> io::Result<String> {
    let words = std::iter::once(program).chain(args.iter().map(String::as_str));
    shlex::try_join(words).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))
}

/// Result of a completed (or terminated) execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Standard output, lossily decoded
    pub stdout: String,

    /// Standard error, lossily decoded
    pub stderr: String,

    /// Exit code ([`SIGNALLED_EXIT_CODE`] if ended by a signal)
    pub exit_code: i32,

    /// Whether the process was terminated for exceeding its timeout
    pub timed_out: bool,

    /// Wall-clock duration in milliseconds
    pub duration_ms: u64,
}

impl ExecutionResult {
    /// Exit code 0 is the only success indicator
    pub fn success(&self) -> bool {
        self.exit_code == 0 && !self.timed_out
    }

    /// Get a human-readable summary
    pub fn summary(&self) -> String {
        if self.timed_out {
            format!("Timeout after {}ms", self.duration_ms)
        } else if self.success() {
            format!(
                "Success (exit code: {}, {}ms, {} bytes output)",
                self.exit_code,
                self.duration_ms,
                self.stdout.len()
            )
        } else {
            format!(
                "Failed (exit code: {}, {}ms, {} bytes output)",
                self.exit_code,
                self.duration_ms,
                self.stdout.len() + self.stderr.len()
            )
        }
    }
}

/// Failures that prevent an [`ExecutionResult`] from being produced normally
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("Failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("Command '{program}' timed out after {}ms", .timeout.as_millis())]
    Timeout {
        program: String,
        timeout: Duration,
        /// Output captured before termination
        partial: Box<ExecutionResult>,
    },

    #[error("I/O error while running '{program}': {source}")]
    Io {
        program: String,
        #[source]
        source: io::Error,
    },
}

/// Seam between adapters and process execution
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run a command to completion or until its timeout
    async fn execute(&self, command: CommandSpec) -> Result<ExecutionResult, RunnerError>;
}

/// Subprocess runner backed by `tokio::process`
///
/// # Security
///
/// 1. Argument vectors are never interpreted by a shell unless requested
/// 2. stdin is closed so a prompting tool fails instead of hanging
/// 3. Every child runs in its own process group (Unix), so timeouts reach
///    the whole tree
/// 4. A timed-out child is terminated and reaped before `execute` returns
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    /// Grace window between graceful and forceful termination
    kill_grace: Duration,
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessRunner {
    /// Create a runner with the default grace window
    pub fn new() -> Self {
        Self {
            kill_grace: super::timeout::DEFAULT_KILL_GRACE,
        }
    }

    /// Create a runner with a custom grace window
    pub fn with_kill_grace(kill_grace: Duration) -> Self {
        Self { kill_grace }
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn execute(&self, spec: CommandSpec) -> Result<ExecutionResult, RunnerError> {
        let start = Instant::now();
        let program = spec.program_name();
        let timeout = ExecutionTimeout::new(spec.timeout).with_grace(self.kill_grace);

        info!(command = %spec.display(), cwd = %spec.cwd.display(), shell = spec.shell, "Executing");

        let mut command = spec.to_command().map_err(|source| RunnerError::Spawn {
            program: program.clone(),
            source,
        })?;
        command
            .current_dir(&spec.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn().map_err(|source| RunnerError::Spawn {
            program: program.clone(),
            source,
        })?;
        let pid = child.id();

        let stdout_task = spawn_reader(child.stdout.take());
        let stderr_task = spawn_reader(child.stderr.take());

        let waited = timeout.wait(&mut child).await;
        let (status, timed_out) = match waited {
            Ok(Some(status)) => (status, false),
            Ok(None) => {
                warn!(program = %program, timeout_ms = spec.timeout.as_millis() as u64, "Command timed out, terminating");
                let status = timeout
                    .terminate(&mut child, pid)
                    .await
                    .map_err(|source| RunnerError::Io {
                        program: program.clone(),
                        source,
                    })?;
                (status, true)
            }
            Err(source) => {
                let _ = child.kill().await;
                stdout_task.abort();
                stderr_task.abort();
                return Err(RunnerError::Io { program, source });
            }
        };

        // The pipes close once the group is gone; the grace bound covers
        // descendants that escaped it and still hold them open.
        let stdout = collect_output(stdout_task, self.kill_grace).await;
        let stderr = collect_output(stderr_task, self.kill_grace).await;

        let result = ExecutionResult {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            exit_code: status.code().unwrap_or(SIGNALLED_EXIT_CODE),
            timed_out,
            duration_ms: start.elapsed().as_millis() as u64,
        };

        debug!(
            program = %program,
            exit_code = result.exit_code,
            stdout = %result.stdout,
            stderr = %result.stderr,
            "Command output"
        );

        if timed_out {
            return Err(RunnerError::Timeout {
                program,
                timeout: spec.timeout,
                partial: Box::new(result),
            });
        }

        if result.success() {
            info!(program = %program, summary = %result.summary(), "Command succeeded");
        } else {
            warn!(program = %program, summary = %result.summary(), "Command failed");
        }
        Ok(result)
    }
}

fn spawn_reader<R>(stream: Option<R>) -> JoinHandle<Vec<u8>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut stream) = stream {
            if let Err(e) = stream.read_to_end(&mut buf).await {
                debug!(error = %e, "Output stream closed with error");
            }
        }
        buf
    })
}

async fn collect_output(task: JoinHandle<Vec<u8>>, bound: Duration) -> Vec<u8> {
    let abort = task.abort_handle();
    match tokio::time::timeout(bound, task).await {
        Ok(Ok(buf)) => buf,
        Ok(Err(e)) => {
            debug!(error = %e, "Output reader task failed");
            Vec::new()
        }
        Err(_) => {
            abort.abort();
            warn!("Output stream still open after process exit, discarding");
            Vec::new()
        }
    }
}

/// Truncate a string to a maximum byte length, adding ellipsis if truncated
///
/// Cuts on a character boundary so multi-byte output never splits.
pub fn truncate_string(mut s: String, max_len: usize) -> String {
    if s.len() > max_len {
        let mut cut = max_len.saturating_sub(3);
        while !s.is_char_boundary(cut) {
            cut -= 1;
        }
        s.truncate(cut);
        s.push_str("...");
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(program: &str, args: &[&str]) -> CommandSpec {
        CommandSpec::new(
            program,
            args.iter().copied(),
            std::env::temp_dir(),
            Duration::from_secs(10),
        )
    }

    #[test]
    fn test_command_spec_display() {
        let spec = spec("/usr/bin/npm", &["install", "typescript"]);
        assert_eq!(spec.display(), "/usr/bin/npm install typescript");
        assert_eq!(spec.program_name(), "npm");
        assert!(!spec.shell);
    }

    #[cfg(unix)]
    #[test]
    fn test_shell_line_splits_back_to_argv() {
        let args: Vec<String> = ["typescript@5.0", "hello world", "a;rm -rf /", "it's", "$HOME", ""]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let line = shell_line("/opt/node bin/npm", &args).unwrap();

        let mut expected = vec!["/opt/node bin/npm".to_string()];
        expected.extend(args);
        assert_eq!(shlex::split(&line), Some(expected));
    }

    #[cfg(unix)]
    #[test]
    fn test_shell_line_rejects_nul_byte() {
        let err = shell_line("npm", &["bad\0arg".to_string()]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn test_execution_result_summary() {
        let mut result = ExecutionResult {
            stdout: "output".to_string(),
            stderr: String::new(),
            exit_code: 0,
            timed_out: false,
            duration_ms: 100,
        };
        assert!(result.summary().contains("Success"));

        result.exit_code = 1;
        assert!(result.summary().contains("Failed"));
        assert!(!result.success());

        result.timed_out = true;
        assert!(result.summary().contains("Timeout"));
    }

    #[test]
    fn test_truncate_string() {
        assert_eq!(truncate_string("hello".to_string(), 10), "hello");
        assert_eq!(truncate_string("hello".to_string(), 5), "hello");
        assert_eq!(truncate_string("hello world".to_string(), 5), "he...");
        assert_eq!(truncate_string("".to_string(), 10), "");
    }

    #[test]
    fn test_truncate_string_multibyte() {
        // "é" is two bytes; a cut at byte 3 would split the second one.
        let truncated = truncate_string("éééé".to_string(), 6);
        assert_eq!(truncated, "é...");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_execute_echo() {
        let result = ProcessRunner::new()
            .execute(spec("echo", &["hello world"]))
            .await
            .unwrap();

        assert!(result.success());
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.stdout, "hello world\n");
        assert!(!result.timed_out);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_execute_failing_command() {
        let result = ProcessRunner::new()
            .execute(spec("sh", &["-c", "echo oops >&2; exit 3"]))
            .await
            .unwrap();

        assert!(!result.success());
        assert_eq!(result.exit_code, 3);
        assert_eq!(result.stderr, "oops\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_arguments_are_not_shell_interpreted() {
        let result = ProcessRunner::new()
            .execute(spec("echo", &["test; echo injected", "$HOME"]))
            .await
            .unwrap();

        assert_eq!(result.stdout, "test; echo injected $HOME\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_shell_mode_quotes_arguments() {
        let result = ProcessRunner::new()
            .execute(spec("echo", &["hello world", "a;b"]).with_shell(true))
            .await
            .unwrap();

        assert_eq!(result.stdout, "hello world a;b\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_shell_mode_metacharacters_stay_literal() {
        let result = ProcessRunner::new()
            .execute(spec("echo", &["it's", "$(id)", "`id`", "x|y"]).with_shell(true))
            .await
            .unwrap();

        assert_eq!(result.stdout, "it's $(id) `id` x|y\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_shell_mode_nul_byte_is_spawn_error() {
        let err = ProcessRunner::new()
            .execute(spec("echo", &["a\0b"]).with_shell(true))
            .await
            .unwrap_err();

        assert!(matches!(err, RunnerError::Spawn { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_invalid_utf8_is_replaced() {
        let result = ProcessRunner::new()
            .execute(spec("printf", &["\\377abc"]))
            .await
            .unwrap();

        assert!(result.stdout.contains('\u{FFFD}'));
        assert!(result.stdout.ends_with("abc"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_working_directory() {
        let dir = tempfile::tempdir().unwrap();
        let canonical = dir.path().canonicalize().unwrap();
        let command = CommandSpec::new("pwd", Vec::<String>::new(), &canonical, Duration::from_secs(5));

        let result = ProcessRunner::new().execute(command).await.unwrap();

        assert_eq!(result.stdout.trim(), canonical.to_string_lossy());
    }

    #[tokio::test]
    async fn test_nonexistent_command() {
        let err = ProcessRunner::new()
            .execute(spec("this-command-does-not-exist-12345", &[]))
            .await
            .unwrap_err();

        assert!(matches!(err, RunnerError::Spawn { .. }));
        assert!(err.to_string().contains("Failed to spawn"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_missing_working_directory_is_spawn_error() {
        let command = CommandSpec::new(
            "true",
            Vec::<String>::new(),
            "/definitely/not/a/real/dir",
            Duration::from_secs(5),
        );
        let err = ProcessRunner::new().execute(command).await.unwrap_err();
        assert!(matches!(err, RunnerError::Spawn { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_keeps_partial_output() {
        let runner = ProcessRunner::with_kill_grace(Duration::from_millis(200));
        let mut command = spec("sh", &["-c", "echo started; sleep 30"]);
        command.timeout = Duration::from_millis(300);

        let start = Instant::now();
        let err = runner.execute(command).await.unwrap_err();

        assert!(start.elapsed() < Duration::from_secs(5));
        match err {
            RunnerError::Timeout { partial, timeout, .. } => {
                assert_eq!(timeout, Duration::from_millis(300));
                assert!(partial.timed_out);
                assert_eq!(partial.stdout, "started\n");
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }
}
