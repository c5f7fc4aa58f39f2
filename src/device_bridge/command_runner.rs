use crate::error_handling::types::BridgeError;
use log::debug;
use std::path::Path;
use std::process::{Command, Stdio};

/// Runs one external program to completion and hands back its stdout.
pub trait CommandRunner: Send + Sync {
    fn run(&self, program: &Path, args: &[String]) -> Result<String, BridgeError>;
}

/// Spawns the program with `std::process::Command`.
///
/// A non-zero exit status is not an error here: relay tools report problems on stdout and
/// callers read the text.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl CommandRunner for ProcessRunner {
    fn run(&self, program: &Path, args: &[String]) -> Result<String, BridgeError> {
        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()?;

        if !output.stderr.is_empty() {
            debug!(
                "STDERR from {}:\n{}",
                program.display(),
                String::from_utf8_lossy(&output.stderr)
            );
        }
        if !output.status.success() {
            debug!("{} exited with {}", program.display(), output.status);
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_captures_stdout() {
        let out = ProcessRunner
            .run(Path::new("echo"), &["relay".to_string(), "ok".to_string()])
            .unwrap();
        assert_eq!(out.trim(), "relay ok");
    }

    #[test]
    fn test_failing_program_still_returns_stdout() {
        let out = ProcessRunner
            .run(
                Path::new("sh"),
                &["-c".to_string(), "echo partial; exit 3".to_string()],
            )
            .unwrap();
        assert_eq!(out.trim(), "partial");
    }

    #[test]
    fn test_missing_program_is_spawn_error() {
        let result = ProcessRunner.run(Path::new("/nonexistent/relay-tool"), &[]);
        assert!(matches!(result, Err(BridgeError::SpawnFailed(_))));
    }
}
