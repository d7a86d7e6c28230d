pub mod command;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use which::which;

pub use command::{run_tool, ToolOutput};

/// Resolves a PostgreSQL client tool. An explicitly configured path is used as-is,
/// otherwise the tool is looked up on PATH.
pub fn find_executable(configured: Option<&Path>, name: &str) -> Result<PathBuf> {
    if let Some(path) = configured {
        return Ok(path.to_path_buf());
    }
    which(name).with_context(|| {
        format!(
            "{} executable not found in PATH. Please ensure PostgreSQL client tools are installed and in your PATH.",
            name
        )
    })
}

/// Quotes a PostgreSQL identifier, doubling any embedded double quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Writes an executable shell script standing in for a PostgreSQL client tool.
#[cfg(all(test, unix))]
pub(crate) fn write_fake_tool(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}
