//! Hyper-V cmdlets invoked through `powershell.exe`

use crate::error::HostError;
use crate::provision::parse;
use crate::provision::process::{CommandRunner, SuccessPolicy, find_in_path};

const MACHINE_NOT_FOUND: &str = "unable to find a virtual machine";

/// Every invocation skips user profiles and never prompts
const SESSION_FLAGS: [&str; 2] = ["-NoProfile", "-NonInteractive"];

/// PowerShell binary, preferring the one on `PATH`
pub fn program() -> String {
    find_in_path("powershell.exe")
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "powershell".to_string())
}

/// Single-quoted PowerShell string literal
pub fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Runs cmdlets for one machine
pub struct PowerShell<'a> {
    runner: &'a dyn CommandRunner,
    machine: &'a str,
}

impl<'a> PowerShell<'a> {
    pub fn new(runner: &'a dyn CommandRunner, machine: &'a str) -> Self {
        Self { runner, machine }
    }

    /// Run a command, treating any stderr output as failure
    ///
    /// Hyper-V's "unable to find a virtual machine" becomes `NotFound`.
    pub async fn execute(&self, operation: &str, args: &[String]) -> Result<String, HostError> {
        let argv: Vec<String> = SESSION_FLAGS
            .iter()
            .map(|flag| flag.to_string())
            .chain(args.iter().cloned())
            .collect();
        let output = self.runner.run(&program(), &argv).await?;
        if output.stderr.to_lowercase().contains(MACHINE_NOT_FOUND) {
            return Err(HostError::NotFound(self.machine.to_string()));
        }
        output.check(
            SuccessPolicy::ExitStatusAndEmptyStderr,
            "hyperv",
            operation,
            self.machine,
        )
    }

    /// Run a command and return its output lines
    pub async fn lines(&self, operation: &str, args: &[String]) -> Result<Vec<String>, HostError> {
        let stdout = self.execute(operation, args).await?;
        Ok(parse::output_lines(&stdout)
            .into_iter()
            .map(str::to_string)
            .collect())
    }

    /// Fail unless the Hyper-V module is installed
    pub async fn ensure_available(&self) -> Result<(), HostError> {
        let args = vec!["@(Get-Command Get-VM).ModuleName".to_string()];
        let module = self.lines("check module", &args).await?;
        if module.first().map(String::as_str) == Some("Hyper-V") {
            return Ok(());
        }
        Err(HostError::backend(
            "hyperv",
            "check module",
            self.machine,
            "Hyper-V PowerShell module is not available, enable it from Windows Features",
        ))
    }

    /// First virtual switch on the host
    pub async fn first_switch(&self) -> Result<String, HostError> {
        let args = vec!["@(Get-VMSwitch).Name".to_string()];
        self.lines("list switches", &args)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| HostError::backend("hyperv", "list switches", self.machine, "no virtual switch found"))
    }
}

/// Argument vector from string slices
pub fn cmd(args: &[&str]) -> Vec<String> {
    args.iter().map(|a| a.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provision::process::CommandOutput;
    use crate::provision::process::testing::ScriptedRunner;

    #[test]
    fn quote_escapes_single_quotes() {
        assert_eq!(quote("docker-host-1"), "'docker-host-1'");
        assert_eq!(quote("C:\\it's"), "'C:\\it''s'");
    }

    #[tokio::test]
    async fn missing_machine_maps_to_not_found() {
        let runner = ScriptedRunner::new(vec![CommandOutput::failed(
            1,
            "Get-VM : Hyper-V was unable to find a virtual machine with name \"h1\".",
        )]);
        let ps = PowerShell::new(&runner, "h1");

        let err = ps.execute("state", &cmd(&["Get-VM"])).await.unwrap_err();
        assert!(matches!(err, HostError::NotFound(name) if name == "h1"));
    }

    #[tokio::test]
    async fn cmdlets_run_without_profile_or_prompts() {
        let runner = ScriptedRunner::new(vec![CommandOutput::ok("Running\n")]);
        let ps = PowerShell::new(&runner, "h1");

        ps.execute("state", &cmd(&["Get-VM", "-Name", "'h1'"])).await.unwrap();

        let calls = runner.calls();
        let (_, args) = &calls[0];
        assert_eq!(args, &cmd(&["-NoProfile", "-NonInteractive", "Get-VM", "-Name", "'h1'"]));
    }

    #[tokio::test]
    async fn any_stderr_is_failure() {
        let runner = ScriptedRunner::new(vec![CommandOutput {
            status: Some(0),
            stdout: "ok\n".to_string(),
            stderr: "WARNING: access denied\n".to_string(),
        }]);
        let ps = PowerShell::new(&runner, "h1");

        assert!(matches!(
            ps.execute("start", &cmd(&["Start-VM"])).await.unwrap_err(),
            HostError::BackendOperationFailed { .. }
        ));
    }

    #[tokio::test]
    async fn module_check_requires_hyperv() {
        let runner = ScriptedRunner::new(vec![CommandOutput::ok("\r\n")]);
        let ps = PowerShell::new(&runner, "h1");
        assert!(ps.ensure_available().await.is_err());

        let runner = ScriptedRunner::new(vec![CommandOutput::ok("Hyper-V\r\n")]);
        let ps = PowerShell::new(&runner, "h1");
        ps.ensure_available().await.unwrap();
    }

    #[tokio::test]
    async fn no_switch_is_an_error() {
        let runner = ScriptedRunner::new(vec![CommandOutput::ok("")]);
        let ps = PowerShell::new(&runner, "h1");
        assert!(ps.first_switch().await.is_err());
    }
}
