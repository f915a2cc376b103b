//! Running external module executables.

use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};

use tracing::{debug, error, instrument};

use crate::error::{Result, RoutineError};

/// Bytes of stderr kept in a failure report.
const STDERR_TAIL: usize = 2048;

#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    /// Last bytes of stderr, lossily decoded.
    pub fn stderr_tail(&self) -> String {
        let start = self.stderr.len().saturating_sub(STDERR_TAIL);
        String::from_utf8_lossy(&self.stderr[start..]).trim().to_string()
    }
}

/// Run `program args... <input> <output>` in `cwd` and wait for it. There is
/// no timeout: a hung module blocks the routine.
#[instrument(skip_all, fields(program = %program))]
pub fn run_module_command(
    program: &str,
    args: &[String],
    input: &Path,
    output: &Path,
    cwd: &Path,
) -> Result<CommandOutput> {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .arg(input)
        .arg(output)
        .current_dir(cwd)
        .stdin(Stdio::null());

    debug!(cwd = %cwd.display(), "spawning module process");
    let out = match cmd.output() {
        Ok(out) => out,
        Err(e) => {
            error!(err = %e, "failed to spawn module");
            return Err(RoutineError::io(program, e));
        }
    };

    debug!(exit_code = ?out.status.code(), "module finished");
    Ok(CommandOutput {
        status: out.status,
        stdout: out.stdout,
        stderr: out.stderr,
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn captures_status_and_stderr() {
        let tmp = tempfile::tempdir().unwrap();
        let args = vec!["-c".to_string(), "echo boom >&2; exit 3".to_string()];
        let out = run_module_command(
            "sh",
            &args,
            &tmp.path().join("in.json"),
            &tmp.path().join("out.json"),
            tmp.path(),
        )
        .unwrap();
        assert_eq!(out.status.code(), Some(3));
        assert_eq!(out.stderr_tail(), "boom");
    }

    #[test]
    fn missing_program_is_io_error() {
        let tmp = tempfile::tempdir().unwrap();
        let err = run_module_command(
            "definitely-not-a-module-binary",
            &[],
            &tmp.path().join("in.json"),
            &tmp.path().join("out.json"),
            tmp.path(),
        )
        .unwrap_err();
        assert!(matches!(err, RoutineError::Io { .. }));
    }
}
