//! Locating and running the external tools the pipelines drive.
//!
//! Search order for a tool:
//! 1. An override variable (e.g. `VDJPREP_BLASTN`) naming the executable
//! 2. Every directory on `PATH`
//!
//! The override is taken verbatim so wrappers and scripts can stand in for
//! the real binary.

use log::{debug, info};
use std::ffi::OsString;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use crate::config::LookupSource;
use crate::error::{Error, Result};

pub const BLASTN_OVERRIDE: &str = "VDJPREP_BLASTN";
pub const TIGGER_OVERRIDE: &str = "VDJPREP_TIGGER";
pub const CREATE_GERMLINES_OVERRIDE: &str = "VDJPREP_CREATE_GERMLINES";
pub const IGBLAST_OVERRIDE: &str = "VDJPREP_IGBLAST";
pub const MAKEDB_OVERRIDE: &str = "VDJPREP_MAKEDB";

/// Find `name`, honouring `override_var` before `PATH`.
pub fn locate_tool(name: &str, override_var: &str, source: &dyn LookupSource) -> Result<PathBuf> {
    if let Some(path) = source.lookup(override_var) {
        debug!("[tools] {name} taken from {override_var}: {path}");
        return Ok(PathBuf::from(path));
    }

    if let Some(paths) = source.lookup("PATH") {
        for dir in std::env::split_paths(&OsString::from(paths)) {
            let candidate = dir.join(name);
            if is_executable(&candidate) {
                debug!("[tools] {name} found at {}", candidate.display());
                return Ok(candidate);
            }
        }
    }

    Err(Error::ToolNotFound {
        tool: name.to_string(),
    })
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Render a command for logs and error messages.
pub fn command_line(cmd: &Command) -> String {
    std::iter::once(cmd.get_program())
        .chain(cmd.get_args())
        .map(|s| s.to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}

fn spawn_error(tool: &str, cmd: &str, err: std::io::Error) -> Error {
    if err.kind() == std::io::ErrorKind::NotFound {
        Error::ToolNotFound {
            tool: tool.to_string(),
        }
    } else {
        Error::tool_failed(tool, cmd, Some(err.to_string()))
    }
}

fn check_status(tool: &str, cmd: &str, output: &Output) -> Result<()> {
    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    let detail = match output.status.code() {
        Some(code) => format!("exit status {code}: {}", stderr.trim()),
        None => format!("terminated by signal: {}", stderr.trim()),
    };
    Err(Error::tool_failed(tool, cmd, Some(detail)))
}

/// Run to completion, capturing stdout and stderr.
pub fn run_captured(tool: &str, mut cmd: Command) -> Result<Output> {
    let line = command_line(&cmd);
    info!("[{tool}] running: {line}");
    let output = cmd
        .stdin(Stdio::null())
        .output()
        .map_err(|e| spawn_error(tool, &line, e))?;
    check_status(tool, &line, &output)?;
    Ok(output)
}

/// Run to completion with stdout written to `stdout_path`.
pub fn run_to_file(tool: &str, mut cmd: Command, stdout_path: &Path) -> Result<()> {
    if let Some(dir) = stdout_path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    let out = File::create(stdout_path)?;

    let line = command_line(&cmd);
    info!("[{tool}] running: {line} > {}", stdout_path.display());
    let output = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::from(out))
        .stderr(Stdio::piped())
        .output()
        .map_err(|e| spawn_error(tool, &line, e))?;
    check_status(tool, &line, &output)
}
