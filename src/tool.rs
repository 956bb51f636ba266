//! # Tool Location
//!
//! Resolves the configured tool path to exactly one executable file. The
//! configured value can be:
//!
//! - a bare name such as `molotov`, looked up on `PATH`
//! - a relative or absolute path to the executable
//! - a path whose last component contains `*` or `?` wildcards, e.g.
//!   `/opt/venv/bin/molotov*`, which must match exactly one executable
//!
//! The [`TOOL_PATH_ENV`] environment variable overrides the configured value.

use crate::error::{DriverError, Result};
use glob::Pattern;
use std::env;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Environment variable to override the configured tool path
pub const TOOL_PATH_ENV: &str = "LOADGEN_TOOL_PATH";

/// The tool path to use: the [`TOOL_PATH_ENV`] override if set, otherwise
/// `configured`.
pub fn effective_tool_path(configured: &str) -> Result<String> {
    match env::var(TOOL_PATH_ENV).ok().as_deref() {
        Some("") => Err(DriverError::Configuration(format!(
            "'{TOOL_PATH_ENV}' set to empty string"
        ))),
        Some(path) => {
            debug!("Tool path overridden with '{TOOL_PATH_ENV}={path}'");
            Ok(path.to_string())
        }
        None => Ok(configured.to_string()),
    }
}

/// Resolve `pattern` to a single executable
pub fn resolve_tool(pattern: &str) -> Result<PathBuf> {
    let not_found = |reason: String| DriverError::ToolNotFound {
        pattern: pattern.to_string(),
        reason,
    };

    if has_wildcard(pattern) {
        let mut candidates = glob_executables(pattern)?;
        return match candidates.len() {
            0 => Err(not_found("nothing matched".to_string())),
            1 => Ok(candidates.remove(0)),
            _ => Err(DriverError::AmbiguousTool {
                pattern: pattern.to_string(),
                candidates,
            }),
        };
    }

    let path = Path::new(pattern);
    if path.components().count() > 1 || path.is_absolute() {
        if !path.exists() {
            return Err(not_found("path does not exist".to_string()));
        }
        if !is_executable(path) {
            return Err(not_found("file is not executable".to_string()));
        }
        return Ok(path.to_path_buf());
    }

    which::which(pattern).map_err(|e| not_found(format!("not found in PATH ({})", e)))
}

fn has_wildcard(pattern: &str) -> bool {
    pattern.contains(['*', '?'])
}

/// Executables in the pattern's parent directory whose file name matches the
/// pattern's last component. Wildcards in parent components are not expanded.
fn glob_executables(pattern: &str) -> Result<Vec<PathBuf>> {
    let path = Path::new(pattern);
    let name_pattern = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    if has_wildcard(&dir.to_string_lossy()) {
        return Err(DriverError::ToolNotFound {
            pattern: pattern.to_string(),
            reason: "wildcards are only supported in the file name".to_string(),
        });
    }

    let matcher = Pattern::new(name_pattern).map_err(|e| DriverError::ToolNotFound {
        pattern: pattern.to_string(),
        reason: format!("invalid pattern ({})", e),
    })?;

    let entries = match std::fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(e) => {
            debug!("Cannot list {:?} while resolving tool: {}", dir, e);
            return Ok(Vec::new());
        }
    };

    let mut matches: Vec<PathBuf> = entries
        .flatten()
        .filter(|entry| {
            entry
                .file_name()
                .to_str()
                .map_or(false, |name| matcher.matches(name))
        })
        .map(|entry| entry.path())
        .filter(|p| is_executable(p))
        .collect();
    matches.sort();
    Ok(matches)
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
