//! Blocking subprocess executor (§4.1). Runs one command line as argv (never
//! a shell string, so branch/topic names that originate from review-server
//! data can't inject shell metacharacters), returning exit code plus
//! terminal-blank-stripped stdout/stderr lines. Every invocation is logged
//! at debug level through the caller's logger.

use anyhow::{Context, Result};
use slog::Logger;
use std::path::Path;
use std::process::Command;

/// Result of one subprocess invocation.
#[derive(Debug, Clone)]
pub struct ShellOutput {
    pub status: i32,
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
}

impl ShellOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }

    pub fn stdout_joined(&self) -> String {
        self.stdout.join("\n")
    }

    pub fn stderr_joined(&self) -> String {
        self.stderr.join("\n")
    }
}

/// Executes one command (program + argv), blocking until it exits.
///
/// Does not raise on a nonzero exit: callers inspect [`ShellOutput::status`]
/// and [`ShellOutput::stderr`] and decide for themselves whether that's a
/// failure (a `git merge` returning 1 is an expected outcome, not an error).
#[derive(Debug, Clone, Default)]
pub struct ShellExecutor;

impl ShellExecutor {
    pub fn new() -> Self {
        Self
    }

    /// Run `program argv...` with no working-directory change to the
    /// current process; callers pass repository context explicitly via
    /// `-C`/`--git-dir`/`--work-tree` style arguments rather than relying on
    /// an implicit cwd (see the "no chdir" design note).
    pub fn run(&self, logger: &Logger, program: &str, args: &[&str]) -> Result<ShellOutput> {
        slog::debug!(logger, "exec"; "command" => format!("{program} {}", args.join(" ")));

        let output = Command::new(program)
            .args(args)
            .output()
            .with_context(|| format!("failed to spawn `{program} {}`", args.join(" ")))?;

        let stdout = split_lines(&output.stdout);
        let stderr = split_lines(&output.stderr);
        let status = output.status.code().unwrap_or(-1);

        slog::debug!(logger, "exec result";
            "status" => status,
            "stdout" => stdout.join(" | "),
            "stderr" => stderr.join(" | "));

        Ok(ShellOutput { status, stdout, stderr })
    }

    /// Convenience for `run` against a directory, expressed as `git -C <dir>
    /// <args>` rather than a chdir — the adapter's callers always pass a
    /// concrete repository path.
    pub fn run_in(&self, logger: &Logger, dir: &Path, program: &str, args: &[&str]) -> Result<ShellOutput> {
        let dir_str = dir.to_string_lossy().to_string();
        let mut full_args = vec!["-C", dir_str.as_str()];
        full_args.extend_from_slice(args);
        self.run(logger, program, &full_args)
    }
}

fn split_lines(bytes: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(bytes)
        .lines()
        .map(|l| l.trim_end().to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::discard_logger;

    #[test]
    fn captures_stdout_lines_with_trailing_blanks_stripped() {
        let shell = ShellExecutor::new();
        let logger = discard_logger();
        let out = shell.run(&logger, "printf", &["line1\\nline2\\n\\n"]).unwrap();
        assert!(out.success());
        assert_eq!(out.stdout, vec!["line1", "line2"]);
    }

    #[test]
    fn nonzero_exit_is_reported_not_raised() {
        let shell = ShellExecutor::new();
        let logger = discard_logger();
        let out = shell.run(&logger, "sh", &["-c", "exit 7"]).unwrap();
        assert_eq!(out.status, 7);
        assert!(!out.success());
    }
}
