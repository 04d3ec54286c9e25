//! Studio backed by an external generator command.

use anyhow::{Context, Result, bail};
use std::io::Write;
use std::process::{Command, Stdio};
use tracing::debug;

use super::{Studio, StudioRequest};

/// Shells out to a configured command, writing the instruction to stdin and
/// capturing stdout as the generated document.
///
/// No timeout is applied here. The stage envelope decides how long to wait
/// and abandons the call past its budget; the child keeps whatever lifetime
/// the operating system gives it.
pub struct CommandStudio {
    program: String,
    args: Vec<String>,
}

impl CommandStudio {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Split a configured command line like `"claude --print"` into
    /// program and arguments.
    pub fn from_command_line(cmd: &str) -> Result<Self> {
        let mut parts = cmd.split_whitespace();
        let program = parts
            .next()
            .context("Studio command is empty")?
            .to_string();
        Ok(Self {
            program,
            args: parts.map(String::from).collect(),
        })
    }
}

impl Studio for CommandStudio {
    fn generate(&self, request: &StudioRequest) -> Result<String> {
        debug!(
            stage = %request.stage,
            label = %request.label,
            program = %self.program,
            "invoking studio command"
        );

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if request.artifact_dir.is_dir() {
            // Relative paths the generator writes land in the stage directory
            command.current_dir(&request.artifact_dir);
        }

        let mut child = command
            .spawn()
            .with_context(|| format!("Failed to spawn studio command '{}'", self.program))?;

        child
            .stdin
            .as_mut()
            .context("Studio command stdin unavailable")?
            .write_all(request.instruction.as_bytes())
            .context("Failed to write instruction to studio command")?;
        // Close stdin so the generator sees end of input
        drop(child.stdin.take());

        let output = child
            .wait_with_output()
            .context("Failed to collect studio command output")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "Studio command '{}' exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            );
        }

        let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if text.is_empty() {
            bail!(
                "Studio command produced no output for {}/{}",
                request.stage,
                request.label
            );
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_echoes_instruction_through_cat() {
        let studio = CommandStudio::new("cat");
        let request = StudioRequest::new("research", "market_report")
            .with_instruction("line one\nline two");
        let output = studio.generate(&request).unwrap();
        assert_eq!(output, "line one\nline two");
    }

    #[test]
    fn test_nonzero_exit_is_an_error() {
        let studio = CommandStudio::new("false");
        let request = StudioRequest::new("research", "market_report").with_instruction("x");
        let err = studio.generate(&request).unwrap_err();
        assert!(err.to_string().contains("exited with"));
    }

    #[test]
    fn test_missing_program_reports_spawn_failure() {
        let studio = CommandStudio::new("slotsmith-test-no-such-binary");
        let request = StudioRequest::new("research", "market_report").with_instruction("x");
        let err = studio.generate(&request).unwrap_err();
        assert!(err.to_string().contains("Failed to spawn"));
    }

    #[test]
    fn test_from_command_line_splits_args() {
        let studio = CommandStudio::from_command_line("generator --fast --model m1").unwrap();
        assert_eq!(studio.program, "generator");
        assert_eq!(studio.args, vec!["--fast", "--model", "m1"]);

        assert!(CommandStudio::from_command_line("   ").is_err());
    }

    #[test]
    fn test_empty_output_is_an_error() {
        let studio = CommandStudio::new("true");
        let request = StudioRequest::new("design", "gdd").with_instruction("x");
        let err = studio.generate(&request).unwrap_err();
        assert!(err.to_string().contains("no output"));
    }
}
