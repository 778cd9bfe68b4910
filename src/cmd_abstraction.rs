//! Command execution abstraction for testability.
//!
//! Firewall tools are always invoked with an argument vector, never through
//! a shell, so a range string cannot change the meaning of the command
//! line. The trait lets unit tests assert the exact vectors a backend
//! issues without touching the host firewall.

use std::io;
use std::process::{Command, Stdio};

#[cfg(test)]
use mockall::automock;

/// Output from command execution
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    /// Standard output from the command
    pub stdout: String,
    /// Standard error from the command
    pub stderr: String,
    /// Whether the command succeeded (exit code 0)
    pub success: bool,
    /// The exit code, if available
    pub code: Option<i32>,
}

impl CommandOutput {
    /// Best available failure reason: stderr, else stdout (netsh reports
    /// errors on stdout), else the exit code.
    pub fn reason(&self) -> String {
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            return stderr.to_string();
        }
        let stdout = self.stdout.trim();
        if !stdout.is_empty() {
            return stdout.to_string();
        }
        match self.code {
            Some(code) => format!("exit code {}", code),
            None => "terminated by signal".to_string(),
        }
    }
}

/// Trait for command execution, allowing dependency injection for testing.
#[cfg_attr(test, automock)]
pub trait CommandExecutor: Send + Sync {
    /// Execute `cmd` with `args` as discrete arguments.
    ///
    /// An `Err` means the process could not be started at all; a command
    /// that ran and failed is an `Ok` with `success == false`.
    fn execute(&self, cmd: &str, args: &[String]) -> io::Result<CommandOutput>;
}

/// Real implementation of CommandExecutor that runs actual system commands.
#[derive(Debug, Clone, Default)]
pub struct RealCommandExecutor;

impl RealCommandExecutor {
    pub fn new() -> Self {
        Self
    }
}

impl CommandExecutor for RealCommandExecutor {
    fn execute(&self, cmd: &str, args: &[String]) -> io::Result<CommandOutput> {
        let output = Command::new(cmd)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()?;

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            success: output.status.success(),
            code: output.status.code(),
        })
    }
}

/// Helper function to convert a slice of &str to Vec<String>.
///
/// mockall has issues with lifetimes in `&[&str]`, so the trait takes
/// `&[String]` instead.
pub fn args_to_strings(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_to_strings() {
        let args = args_to_strings(&["-I", "PPMV4", "-j", "ACCEPT"]);
        assert_eq!(args, vec!["-I", "PPMV4", "-j", "ACCEPT"]);
    }

    #[test]
    fn test_args_to_strings_empty() {
        assert!(args_to_strings(&[]).is_empty());
    }

    #[test]
    fn test_command_output_default() {
        let output = CommandOutput::default();
        assert!(output.stdout.is_empty());
        assert!(output.stderr.is_empty());
        assert!(!output.success);
        assert!(output.code.is_none());
    }

    #[test]
    fn test_reason_prefers_stderr() {
        let output = CommandOutput {
            stdout: "something".to_string(),
            stderr: "iptables: Bad rule.\n".to_string(),
            success: false,
            code: Some(1),
        };
        assert_eq!(output.reason(), "iptables: Bad rule.");
    }

    #[test]
    fn test_reason_falls_back_to_stdout_then_code() {
        let netsh = CommandOutput {
            stdout: "No rules match the specified criteria.\r\n".to_string(),
            stderr: String::new(),
            success: false,
            code: Some(1),
        };
        assert_eq!(netsh.reason(), "No rules match the specified criteria.");

        let silent = CommandOutput {
            code: Some(4),
            ..Default::default()
        };
        assert_eq!(silent.reason(), "exit code 4");
    }

    #[cfg(unix)]
    #[test]
    fn test_real_command_executor_execute_echo() {
        let executor = RealCommandExecutor::new();
        let args = args_to_strings(&["-n", "hello"]);
        let output = executor.execute("echo", &args).unwrap();
        assert!(output.success);
        assert_eq!(output.stdout, "hello");
    }

    #[cfg(unix)]
    #[test]
    fn test_real_command_executor_arguments_are_not_shell_parsed() {
        let executor = RealCommandExecutor::new();
        let args = args_to_strings(&["-n", "10.0.0.1; echo injected"]);
        let output = executor.execute("echo", &args).unwrap();
        assert_eq!(output.stdout, "10.0.0.1; echo injected");
    }

    #[cfg(unix)]
    #[test]
    fn test_real_command_executor_execute_failure() {
        let executor = RealCommandExecutor::new();
        let args = args_to_strings(&["--invalid-flag"]);
        let output = executor.execute("ls", &args).unwrap();
        assert!(!output.success);
        assert!(!output.stderr.is_empty());
    }

    #[test]
    fn test_real_command_executor_missing_binary() {
        let executor = RealCommandExecutor::new();
        let result = executor.execute("ppm-agent-no-such-tool", &[]);
        assert!(result.is_err());
    }

    #[test]
    fn test_mock_command_executor() {
        let mut mock = MockCommandExecutor::new();

        mock.expect_execute()
            .withf(|cmd, args| cmd == "iptables" && args == ["-L".to_string()])
            .times(1)
            .returning(|_, _| {
                Ok(CommandOutput {
                    stdout: "mocked output".to_string(),
                    stderr: String::new(),
                    success: true,
                    code: Some(0),
                })
            });

        let args = vec!["-L".to_string()];
        let output = mock.execute("iptables", &args).unwrap();
        assert_eq!(output.stdout, "mocked output");
        assert!(output.success);
    }
}
