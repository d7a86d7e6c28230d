//! Running the external PostgreSQL client tools

use std::ffi::OsStr;
use std::path::Path;
use tokio::process::Command;
use tracing::debug;

/// Exit status and combined output of one tool invocation.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub success: bool,
    pub code: Option<i32>,
    /// stdout followed by stderr
    pub output: String,
}

/// Runs `program` to completion and captures its combined output.
///
/// There is no timeout here; the hosting process decides how long a run may take.
/// An `Err` means the process could not be started at all.
pub async fn run_tool<I, S>(
    program: &Path,
    args: I,
    envs: &[(&str, &str)],
    working_dir: Option<&Path>,
) -> std::io::Result<ToolOutput>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut cmd = Command::new(program);
    cmd.args(args);
    for (key, value) in envs {
        cmd.env(key, value);
    }
    if let Some(dir) = working_dir {
        cmd.current_dir(dir);
    }

    debug!("Running {}", program.display());
    let output = cmd.output().await?;

    let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
    combined.push_str(&String::from_utf8_lossy(&output.stderr));

    Ok(ToolOutput {
        success: output.status.success(),
        code: output.status.code(),
        output: combined,
    })
}
