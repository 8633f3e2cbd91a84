//! Thin wrappers for running hook tools and system commands

use std::ffi::OsStr;
use std::io::Write;
use std::process::{Command, Stdio};

use crate::error::CharmError;

fn describe<S: AsRef<OsStr>>(cmd: &str, args: &[S]) -> String {
    format!(
        "{} {}",
        cmd,
        args.iter()
            .map(|a| a.as_ref().to_string_lossy())
            .collect::<Vec<_>>()
            .join(" ")
    )
}

/// Runs a command to completion, discarding its output
pub fn run<S: AsRef<OsStr>>(cmd: &str, args: &[S]) -> Result<(), CharmError> {
    get_output(cmd, args).map(|_| ())
}

/// Runs a command and returns its stdout
pub fn get_output<S: AsRef<OsStr>>(cmd: &str, args: &[S]) -> Result<Vec<u8>, CharmError> {
    let output = Command::new(cmd)
        .args(args)
        .env("DEBIAN_FRONTEND", "noninteractive")
        .output()
        .map_err(|err| CharmError::HookToolError(cmd.to_string(), err.to_string()))?;

    if output.status.success() {
        Ok(output.stdout)
    } else {
        Err(CharmError::HookToolError(
            describe(cmd, args),
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ))
    }
}

/// Runs a command, feeding `input` through its stdin, and returns its stdout
pub fn get_output_with_input<S: AsRef<OsStr>>(
    cmd: &str,
    args: &[S],
    input: &[u8],
) -> Result<Vec<u8>, CharmError> {
    let mut child = Command::new(cmd)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|err| CharmError::HookToolError(cmd.to_string(), err.to_string()))?;

    if let Some(stdin) = child.stdin.as_mut() {
        stdin
            .write_all(input)
            .map_err(|err| CharmError::HookToolError(cmd.to_string(), err.to_string()))?;
    }

    let output = child
        .wait_with_output()
        .map_err(|err| CharmError::HookToolError(cmd.to_string(), err.to_string()))?;

    if output.status.success() {
        Ok(output.stdout)
    } else {
        Err(CharmError::HookToolError(
            describe(cmd, args),
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ))
    }
}
