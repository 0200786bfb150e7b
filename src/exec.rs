use std::{
    ffi::OsString,
    path::{Path, PathBuf},
    process::{Command, Stdio},
};

use log::{debug, trace};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExecError {
    #[error("Failed to start `{program}`: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("`{program}` exited with status {status}{stderr}")]
    Failed {
        program: String,
        status: i32,
        stderr: String,
    },
}

/// One external command invocation. Every collaborator subprocess (build
/// tool, artifact fetcher, package installer, test runner) goes through this
/// so that the fatality policy lives in one place: `run_checked` and
/// `run_streaming` abort on any non-zero exit, `run` leaves the decision to
/// the caller.
#[derive(Debug)]
pub struct Tool {
    program: String,
    args: Vec<OsString>,
    cwd: Option<PathBuf>,
    envs: Vec<(OsString, OsString)>,
}

#[derive(Debug)]
pub struct ToolOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

impl Tool {
    pub fn new(program: impl Into<String>) -> Tool {
        Tool {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            envs: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Tool {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Tool
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Tool {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Tool {
        self.envs.push((key.into(), value.into()));
        self
    }

    /// Runs the command capturing its output. A non-zero exit is not an
    /// error here; callers that want abort-on-failure use `run_checked`.
    pub fn run(&self) -> Result<ToolOutput, ExecError> {
        trace!("Running {} {:?}", self.program, self.args);
        let output = self
            .command()
            .output()
            .map_err(|source| ExecError::Spawn {
                program: self.program.clone(),
                source,
            })?;
        Ok(ToolOutput {
            status: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    pub fn run_checked(&self) -> Result<ToolOutput, ExecError> {
        let output = self.run()?;
        if output.success() {
            Ok(output)
        } else {
            Err(ExecError::Failed {
                program: self.program.clone(),
                status: output.status,
                stderr: if output.stderr.is_empty() {
                    String::new()
                } else {
                    format!(": {}", output.stderr.trim_end())
                },
            })
        }
    }

    /// Runs the command with inherited stdio, for long build and test steps
    /// whose output should stream to the operator.
    pub fn run_streaming(&self) -> Result<(), ExecError> {
        debug!("Running {} {:?}", self.program, self.args);
        let status = self
            .command()
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .map_err(|source| ExecError::Spawn {
                program: self.program.clone(),
                source,
            })?;
        if status.success() {
            Ok(())
        } else {
            Err(ExecError::Failed {
                program: self.program.clone(),
                status: status.code().unwrap_or(-1),
                stderr: String::new(),
            })
        }
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        if let Some(cwd) = &self.cwd {
            command.current_dir(cwd);
        }
        for (key, value) in &self.envs {
            command.env(key, value);
        }
        command
    }
}

/// Prepends `dir` to a `:`-separated search path, preserving any
/// caller-supplied value.
pub fn prepend_search_path(dir: &Path, existing: Option<&str>) -> String {
    match existing {
        Some(existing) if !existing.is_empty() => {
            format!("{}:{}", dir.display(), existing)
        }
        _ => dir.display().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    #[test]
    fn run_captures_stdout() {
        let output = Tool::new("sh").args(["-c", "echo hello"]).run().unwrap();
        assert!(output.success());
        assert_eq!(output.stdout.trim(), "hello");
    }

    #[test]
    fn run_reports_nonzero_status_without_failing() {
        let output = Tool::new("sh").args(["-c", "exit 3"]).run().unwrap();
        assert!(!output.success());
        assert_eq!(output.status, 3);
    }

    #[test]
    fn run_checked_fails_on_nonzero_status() {
        let error = Tool::new("sh")
            .args(["-c", "echo boom >&2; exit 2"])
            .run_checked()
            .unwrap_err();
        match error {
            ExecError::Failed { status, stderr, .. } => {
                assert_eq!(status, 2);
                assert!(stderr.contains("boom"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn env_and_cwd_are_applied() {
        let dir = tempfile::tempdir().unwrap();
        let output = Tool::new("sh")
            .args(["-c", "echo $MARKER; pwd"])
            .env("MARKER", "set")
            .cwd(dir.path())
            .run_checked()
            .unwrap();
        let mut lines = output.stdout.lines();
        assert_eq!(lines.next(), Some("set"));
        let cwd = lines.next().unwrap();
        assert_eq!(
            Path::new(cwd).canonicalize().unwrap(),
            dir.path().canonicalize().unwrap()
        );
    }

    #[test]
    fn missing_program_is_a_spawn_error() {
        let error = Tool::new("definitely-not-a-real-program").run().unwrap_err();
        assert!(matches!(error, ExecError::Spawn { .. }));
    }

    #[test]
    fn prepend_keeps_existing_entries() {
        let dir = PathBuf::from("/opt/env/bin");
        assert_eq!(prepend_search_path(&dir, Some("/usr/bin")), "/opt/env/bin:/usr/bin");
        assert_eq!(prepend_search_path(&dir, Some("")), "/opt/env/bin");
        assert_eq!(prepend_search_path(&dir, None), "/opt/env/bin");
    }
}
