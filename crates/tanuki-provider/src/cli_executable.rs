//! CLI executable discovery for provider adapters.
//!
//! The executor checks the configured binary before the version probe so a
//! missing CLI is reported as unavailable instead of a generic spawn error.

use std::path::Path;

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

fn is_executable_file(path: &Path) -> bool {
    let Ok(metadata) = std::fs::metadata(path) else {
        return false;
    };
    if !metadata.is_file() {
        return false;
    }
    #[cfg(unix)]
    {
        metadata.permissions().mode() & 0o111 != 0
    }
    #[cfg(not(unix))]
    {
        true
    }
}

/// Returns true when `executable` is an executable path or resolves on `search_path`.
pub fn is_executable_available_in(executable: &str, search_path: Option<&str>) -> bool {
    let trimmed = executable.trim();
    if trimmed.is_empty() {
        return false;
    }

    let candidate = Path::new(trimmed);
    if candidate.is_absolute() || trimmed.contains(std::path::MAIN_SEPARATOR) {
        return is_executable_file(candidate);
    }

    let Some(path_var) = search_path else {
        return false;
    };
    std::env::split_paths(path_var).any(|mut path| {
        path.push(trimmed);
        is_executable_file(&path)
    })
}
