//! External tool invocation.
//!
//! Resolvers never spawn processes directly; they go through a [`ToolRunner`]
//! so tests can substitute scripted output.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// Captured result of one tool invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    /// Exit code, or `-1` when the process was terminated by a signal.
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs external commands. Calls block until the command exits; there is no
/// timeout at this layer.
pub trait ToolRunner: Send + Sync {
    /// Run `command` with `args` in `working_dir`.
    ///
    /// Errors only when the process cannot be spawned; a non-zero exit is
    /// reported through [`ToolOutput::exit_code`].
    fn run(&self, working_dir: &Path, command: &str, args: &[&str]) -> std::io::Result<ToolOutput>;
}

/// Runs commands with `std::process::Command`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LiveToolRunner;

impl ToolRunner for LiveToolRunner {
    fn run(&self, working_dir: &Path, command: &str, args: &[&str]) -> std::io::Result<ToolOutput> {
        let program = locate_tool(command).unwrap_or_else(|| PathBuf::from(command));
        tracing::debug!("Running `{}` in {}", display_command(command, args), working_dir.display());

        let output = Command::new(program)
            .args(args)
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .output()?;

        Ok(ToolOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Find an executable in `PATH`.
pub fn locate_tool(command: &str) -> Option<PathBuf> {
    which::which(command).ok()
}

/// Render a command line for logs and error messages.
pub fn display_command(command: &str, args: &[&str]) -> String {
    let mut parts = vec![command];
    parts.extend_from_slice(args);
    parts.join(" ")
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;
    use std::path::Path;
    use std::sync::Mutex;

    use super::{display_command, ToolOutput, ToolRunner};

    type SideEffect = Box<dyn Fn(&Path) + Send + Sync>;

    struct Step {
        command_line: String,
        output: ToolOutput,
        effect: Option<SideEffect>,
    }

    /// Replays canned outputs for an expected sequence of command lines.
    #[derive(Default)]
    pub(crate) struct ScriptedRunner {
        steps: Mutex<VecDeque<Step>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedRunner {
        pub(crate) fn new() -> Self {
            Self::default()
        }

        /// Expect `command_line` next and answer with exit code 0 and `stdout`.
        pub(crate) fn expect(self, command_line: &str, stdout: &str) -> Self {
            self.expect_output(command_line, 0, stdout, "")
        }

        pub(crate) fn expect_output(
            self,
            command_line: &str,
            exit_code: i32,
            stdout: &str,
            stderr: &str,
        ) -> Self {
            self.push(command_line, exit_code, stdout, stderr, None)
        }

        /// Expect `command_line` next, apply `effect` to the working directory
        /// and answer with exit code 0.
        pub(crate) fn expect_with_effect(
            self,
            command_line: &str,
            effect: impl Fn(&Path) + Send + Sync + 'static,
        ) -> Self {
            self.push(command_line, 0, "", "", Some(Box::new(effect)))
        }

        fn push(
            self,
            command_line: &str,
            exit_code: i32,
            stdout: &str,
            stderr: &str,
            effect: Option<SideEffect>,
        ) -> Self {
            self.steps.lock().unwrap().push_back(Step {
                command_line: command_line.to_string(),
                output: ToolOutput {
                    exit_code,
                    stdout: stdout.to_string(),
                    stderr: stderr.to_string(),
                },
                effect,
            });
            self
        }

        pub(crate) fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl ToolRunner for ScriptedRunner {
        fn run(
            &self,
            working_dir: &Path,
            command: &str,
            args: &[&str],
        ) -> std::io::Result<ToolOutput> {
            let command_line = display_command(command, args);
            self.calls.lock().unwrap().push(command_line.clone());

            let step = self.steps.lock().unwrap().pop_front();
            match step {
                Some(step) if command_line.starts_with(&step.command_line) => {
                    if let Some(effect) = &step.effect {
                        effect(working_dir);
                    }
                    Ok(step.output)
                }
                Some(step) => panic!(
                    "expected `{}`, got `{}`",
                    step.command_line, command_line
                ),
                None => Err(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("unexpected command `{command_line}`"),
                )),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_command() {
        assert_eq!(
            display_command("cargo", &["metadata", "--format-version", "1"]),
            "cargo metadata --format-version 1"
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_live_runner_captures_output() {
        let dir = tempfile::tempdir().unwrap();
        let output = LiveToolRunner
            .run(dir.path(), "sh", &["-c", "echo hello; echo oops >&2; exit 3"])
            .unwrap();
        assert_eq!(output.exit_code, 3);
        assert_eq!(output.stdout.trim(), "hello");
        assert_eq!(output.stderr.trim(), "oops");
        assert!(!output.success());
    }

    #[test]
    fn test_missing_tool_is_not_located() {
        assert!(locate_tool("definitely-not-a-real-tool-4711").is_none());
    }
}
