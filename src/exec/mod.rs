//! Command Execution Subsystem
//!
//! Timeout-bounded subprocess execution for package-manager commands.
//!
//! # Security Features
//!
//! - **List Invocation**: Commands are executed as argument vectors, never through
//!   a shell unless a [`CommandSpec`] explicitly opts into shell mode
//! - **Timeout Enforcement**: Every command carries its own budget
//! - **Deterministic Cleanup**: Timed-out children are signalled, killed if
//!   unresponsive, and reaped before the call returns
//!
//! # Architecture
//!
//! - `runner.rs`: [`CommandSpec`], [`ExecutionResult`] and the [`ProcessRunner`]
//! - `timeout.rs`: Timeout bookkeeping and the terminate-then-reap sequence
//!
//! # Example
//!
//! ```no_run
//! use pmguard::exec::{CommandRunner, CommandSpec, ProcessRunner};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runner = ProcessRunner::new();
//!     let spec = CommandSpec::new("npm", ["--version"], ".", Duration::from_secs(10));
//!
//!     let output = runner.execute(spec).await?;
//!     println!("Exit code: {}", output.exit_code);
//!     println!("Stdout: {}", output.stdout);
//!
//!     Ok(())
//! }
//! ```

mod runner;
mod timeout;

pub use runner::{
    truncate_string, CommandRunner, CommandSpec, ExecutionResult, ProcessRunner, RunnerError,
    SIGNALLED_EXIT_CODE,
};
pub use timeout::{ExecutionTimeout, DEFAULT_KILL_GRACE};

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted runner for adapter and dispatcher tests

    use super::{CommandRunner, CommandSpec, ExecutionResult, RunnerError};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// A canned reply for one `execute` call
    pub enum Reply {
        Exit {
            code: i32,
            stdout: &'static str,
            stderr: &'static str,
        },
        SpawnFailure,
        Timeout,
    }

    impl Reply {
        pub fn ok(stdout: &'static str) -> Self {
            Reply::Exit {
                code: 0,
                stdout,
                stderr: "",
            }
        }

        pub fn fail(code: i32, stderr: &'static str) -> Self {
            Reply::Exit {
                code,
                stdout: "",
                stderr,
            }
        }
    }

    /// Records every command and answers from a queue (success when empty)
    #[derive(Default)]
    pub struct ScriptedRunner {
        replies: Mutex<VecDeque<Reply>>,
        calls: Mutex<Vec<CommandSpec>>,
    }

    impl ScriptedRunner {
        pub fn new(replies: Vec<Reply>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn calls(&self) -> Vec<CommandSpec> {
            self.calls.lock().unwrap().clone()
        }

        /// Argument vectors of recorded calls, program name first
        pub fn argv(&self) -> Vec<Vec<String>> {
            self.calls()
                .into_iter()
                .map(|spec| {
                    let mut argv = vec![spec.program_name()];
                    argv.extend(spec.args);
                    argv
                })
                .collect()
        }
    }

    #[async_trait]
    impl CommandRunner for ScriptedRunner {
        async fn execute(&self, command: CommandSpec) -> Result<ExecutionResult, RunnerError> {
            let program = command.program_name();
            let timeout = command.timeout;
            self.calls.lock().unwrap().push(command);

            let reply = self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Reply::ok(""));

            let finished = |code: i32, stdout: &str, stderr: &str, timed_out: bool| ExecutionResult {
                stdout: stdout.to_string(),
                stderr: stderr.to_string(),
                exit_code: code,
                timed_out,
                duration_ms: 1,
            };

            match reply {
                Reply::Exit {
                    code,
                    stdout,
                    stderr,
                } => Ok(finished(code, stdout, stderr, false)),
                Reply::SpawnFailure => Err(RunnerError::Spawn {
                    program,
                    source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
                }),
                Reply::Timeout => Err(RunnerError::Timeout {
                    program,
                    timeout,
                    partial: Box::new(finished(-1, "", "", true)),
                }),
            }
        }
    }
}
