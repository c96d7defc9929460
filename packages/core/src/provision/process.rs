//! External process invocation
//!
//! Backend CLIs are always spawned with an explicit argument vector, never
//! through a shell string. Stdout and stderr are captured separately so each
//! backend can apply its own success policy.

use std::env;
use std::fmt;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::HostError;

/// Captured result of a finished process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` if the process was killed by a signal
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

/// What counts as success for a wrapped tool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuccessPolicy {
    /// Zero exit status
    ExitStatus,
    /// Zero exit status and nothing written to stderr
    ExitStatusAndEmptyStderr,
    /// Zero exit status and no stdout line starting with "Error"
    ExitStatusAndNoErrorLine,
}

impl CommandOutput {
    /// Successful output with the given stdout
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            status: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Failed output with the given stderr and exit code
    pub fn failed(status: i32, stderr: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn exit_ok(&self) -> bool {
        self.status == Some(0)
    }

    /// Whether the output satisfies the policy
    pub fn succeeded(&self, policy: SuccessPolicy) -> bool {
        match policy {
            SuccessPolicy::ExitStatus => self.exit_ok(),
            SuccessPolicy::ExitStatusAndEmptyStderr => {
                self.exit_ok() && self.stderr.trim().is_empty()
            }
            SuccessPolicy::ExitStatusAndNoErrorLine => {
                self.exit_ok()
                    && !self
                        .stdout
                        .lines()
                        .any(|line| line.trim_start().starts_with("Error"))
            }
        }
    }

    /// Best diagnostic text for a failure
    pub fn diagnostic(&self) -> String {
        if !self.stderr.trim().is_empty() {
            return self.stderr.trim().to_string();
        }
        if !self.stdout.trim().is_empty() {
            return self.stdout.trim().to_string();
        }
        match self.status {
            Some(code) => format!("exit status {code}"),
            None => "terminated by signal".to_string(),
        }
    }

    /// Apply a success policy, mapping failure to `BackendOperationFailed`
    ///
    /// Returns the captured stdout on success.
    pub fn check(
        self,
        policy: SuccessPolicy,
        backend: &str,
        operation: &str,
        resource: &str,
    ) -> Result<String, HostError> {
        if self.succeeded(policy) {
            Ok(self.stdout)
        } else {
            Err(HostError::backend(
                backend,
                operation,
                resource,
                self.diagnostic(),
            ))
        }
    }
}

/// Spawns external programs and captures their output
///
/// Drivers hold a [`SharedRunner`] so tests can script backend responses
/// without the real tool installed.
#[async_trait]
pub trait CommandRunner: Send + Sync + fmt::Debug {
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput, HostError>;
}

/// Cloneable runner handle held by drivers, defaulting to [`SystemRunner`]
#[derive(Debug, Clone)]
pub struct SharedRunner(Arc<dyn CommandRunner>);

impl SharedRunner {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self(runner)
    }
}

impl Default for SharedRunner {
    fn default() -> Self {
        Self(Arc::new(SystemRunner))
    }
}

impl Deref for SharedRunner {
    type Target = dyn CommandRunner;

    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

/// Runs programs on the local machine
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput, HostError> {
        tracing::debug!("[executing ==>] {} {}", program, args.join(" "));

        let output = tokio::process::Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    HostError::Spawn {
                        program: program.to_string(),
                        message: "not found in PATH".to_string(),
                    }
                } else {
                    HostError::Spawn {
                        program: program.to_string(),
                        message: e.to_string(),
                    }
                }
            })?;

        let captured = CommandOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        };

        tracing::debug!("[stdout =====>] {}", captured.stdout.trim_end());
        tracing::debug!("[stderr =====>] {}", captured.stderr.trim_end());

        Ok(captured)
    }
}

/// Resolve a program name against `PATH`
pub fn find_in_path(program: &str) -> Option<PathBuf> {
    let path_var = env::var_os("PATH")?;
    env::split_paths(&path_var)
        .map(|dir| dir.join(program))
        .find(|candidate| is_executable(candidate))
}

/// Resolve a program from `PATH`, falling back to well-known install locations
pub fn resolve_program(program: &str, fallbacks: &[&str]) -> String {
    if let Some(found) = find_in_path(program) {
        return found.display().to_string();
    }
    fallbacks
        .iter()
        .find(|p| Path::new(p).exists())
        .map(|p| p.to_string())
        .unwrap_or_else(|| program.to_string())
}

fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Convert a borrowed argv into owned strings
pub fn argv<I, S>(args: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    args.into_iter().map(|a| a.as_ref().to_string()).collect()
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted command runner for driver tests

    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;

    /// Returns queued outputs in order and records every invocation
    #[derive(Debug, Default)]
    pub struct ScriptedRunner {
        responses: Mutex<VecDeque<CommandOutput>>,
        calls: Mutex<Vec<(String, Vec<String>)>>,
    }

    impl ScriptedRunner {
        pub fn new(responses: Vec<CommandOutput>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn calls(&self) -> Vec<(String, Vec<String>)> {
            self.calls.lock().unwrap().clone()
        }

        /// Flattened `program arg arg ...` of every call
        pub fn command_lines(&self) -> Vec<String> {
            self.calls()
                .into_iter()
                .map(|(program, args)| {
                    std::iter::once(program)
                        .chain(args)
                        .collect::<Vec<_>>()
                        .join(" ")
                })
                .collect()
        }
    }

    /// Scripted runner plus a driver-ready handle to it
    pub fn scripted(responses: Vec<CommandOutput>) -> (Arc<ScriptedRunner>, SharedRunner) {
        let runner = Arc::new(ScriptedRunner::new(responses));
        let shared = SharedRunner::new(runner.clone());
        (runner, shared)
    }

    #[async_trait]
    impl CommandRunner for ScriptedRunner {
        async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput, HostError> {
            self.calls
                .lock()
                .unwrap()
                .push((program.to_string(), args.to_vec()));
            Ok(self
                .responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| CommandOutput::failed(1, "no scripted response")))
        }
    }
}
