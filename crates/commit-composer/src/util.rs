//! Small shared helpers: project naming, best-effort file cleanup, and the
//! eager prerequisite check.

use composer_core::process::command_exists;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
#[error("required executables are missing:\n{}\n\nPlease install the missing executables before running this tool.", missing.join("\n"))]
pub struct MissingExecutables {
    pub missing: Vec<String>,
}

/// Project name for notifications: the working directory's basename.
pub fn project_name(dir: &Path) -> String {
    dir.file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("project")
        .to_string()
}

/// Delete a file if it exists; failures are logged and swallowed.
pub fn cleanup_file(path: &Path) {
    if path.exists() {
        if let Err(err) = std::fs::remove_file(path) {
            debug!(path = %path.display(), error = %err, "cleanup failed");
        }
    }
}

/// Probe for the external tools the flow depends on, before any mutating
/// action.
pub fn check_required_executables() -> Result<(), MissingExecutables> {
    let mut missing = Vec::new();

    if !command_exists("git") {
        missing.push("  - git: Git is required for version control operations".to_string());
    }
    if !command_exists("tree") {
        missing.push("  - tree: tree is required for displaying project structure".to_string());
    }

    if missing.is_empty() {
        Ok(())
    } else {
        Err(MissingExecutables { missing })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn project_name_is_directory_basename() {
        assert_eq!(project_name(Path::new("/home/user/my-project")), "my-project");
        assert_eq!(project_name(Path::new("/")), "project");
    }

    #[test]
    fn cleanup_file_removes_existing_and_ignores_missing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("marker.txt");
        std::fs::write(&path, "x").unwrap();

        cleanup_file(&path);
        assert!(!path.exists());

        // Second call is a no-op, not a panic.
        cleanup_file(&path);
    }
}
