//! Untracked-file ledger.
//!
//! The assistant runs with a narrow tool surface but can still create
//! arbitrary files as a side effect of its one write capability. The ledger
//! bounds that blast radius: snapshot the untracked set before an invocation,
//! snapshot again after, and delete anything new that is not explicitly
//! allow-listed.

use std::path::Path;
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("failed to execute git: {0}")]
    Execution(#[from] std::io::Error),
    #[error("git ls-files failed: {0}")]
    CommandFailed(String),
}

pub type Result<T> = std::result::Result<T, LedgerError>;

/// Repository-relative paths untracked (and not ignored) at a point in time.
///
/// Invalidated the moment the working tree changes; only meaningful as a
/// before/after pair diffed by set difference.
pub type UntrackedFileSet = Vec<String>;

/// List all paths git considers untracked-and-not-ignored right now.
pub async fn snapshot(dir: &Path) -> Result<UntrackedFileSet> {
    let output = Command::new("git")
        .args(["ls-files", "--others", "--exclude-standard"])
        .current_dir(dir)
        .stdin(Stdio::null())
        .output()
        .await?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(LedgerError::CommandFailed(stderr.trim().to_string()));
    }

    Ok(String::from_utf8_lossy(&output.stdout)
        .lines()
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

/// Delete files created since `before` that are not on the allow-list.
///
/// Takes a fresh snapshot and removes every path in it that is neither in
/// `before` nor in `allow_list`, reporting each deletion. Best-effort
/// throughout: a failed re-snapshot or a failed deletion is logged and
/// skipped, never propagated. Returns the paths actually deleted.
pub async fn sweep(dir: &Path, before: &UntrackedFileSet, allow_list: &[&str]) -> Vec<String> {
    let after = match snapshot(dir).await {
        Ok(after) => after,
        Err(err) => {
            warn!(error = %err, "cleanup sweep could not re-list untracked files");
            return Vec::new();
        }
    };

    let mut deleted = Vec::new();
    for path in &after {
        if before.contains(path) || allow_list.contains(&path.as_str()) {
            continue;
        }
        eprintln!("Cleaning up created file: {path}");
        match std::fs::remove_file(dir.join(path)) {
            Ok(()) => deleted.push(path.clone()),
            Err(err) => {
                // Ignore and continue: cleanup is never fatal.
                debug!(path, error = %err, "failed to delete stray file");
            }
        }
    }
    deleted
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup_test_repo() -> TempDir {
        let dir = TempDir::new().unwrap();
        for args in [
            vec!["init"],
            vec!["config", "user.email", "test@test.com"],
            vec!["config", "user.name", "Test"],
        ] {
            std::process::Command::new("git")
                .args(&args)
                .current_dir(dir.path())
                .output()
                .unwrap();
        }
        dir
    }

    #[tokio::test]
    async fn snapshot_lists_untracked_files() {
        let dir = setup_test_repo();
        std::fs::write(dir.path().join("a.txt"), "a").unwrap();
        std::fs::write(dir.path().join("b.txt"), "b").unwrap();

        let files = snapshot(dir.path()).await.unwrap();
        assert_eq!(files, vec!["a.txt".to_string(), "b.txt".to_string()]);
    }

    #[tokio::test]
    async fn snapshot_skips_ignored_files() {
        let dir = setup_test_repo();
        std::fs::write(dir.path().join(".gitignore"), "*.log\n").unwrap();
        std::fs::write(dir.path().join("noise.log"), "x").unwrap();
        std::fs::write(dir.path().join("kept.txt"), "x").unwrap();

        let files = snapshot(dir.path()).await.unwrap();
        assert!(files.contains(&"kept.txt".to_string()));
        assert!(!files.contains(&"noise.log".to_string()));
    }

    #[tokio::test]
    async fn snapshot_fails_outside_a_repository() {
        let dir = TempDir::new().unwrap();
        assert!(snapshot(dir.path()).await.is_err());
    }

    #[tokio::test]
    async fn sweep_deletes_only_new_unlisted_files() {
        let dir = setup_test_repo();
        std::fs::write(dir.path().join("a"), "x").unwrap();
        std::fs::write(dir.path().join("b"), "x").unwrap();
        let before = snapshot(dir.path()).await.unwrap();

        std::fs::write(dir.path().join("c"), "x").unwrap();
        std::fs::write(dir.path().join("d"), "x").unwrap();

        let deleted = sweep(dir.path(), &before, &["d"]).await;
        assert_eq!(deleted, vec!["c".to_string()]);
        assert!(dir.path().join("a").exists());
        assert!(dir.path().join("b").exists());
        assert!(!dir.path().join("c").exists());
        assert!(dir.path().join("d").exists());
    }

    #[tokio::test]
    async fn sweep_with_empty_allow_list_scrubs_markers_too() {
        let dir = setup_test_repo();
        let before = snapshot(dir.path()).await.unwrap();
        std::fs::write(dir.path().join("SUCCEEDED-SECURITY-CHECK.txt"), "ok").unwrap();

        let deleted = sweep(dir.path(), &before, &[]).await;
        assert_eq!(deleted, vec!["SUCCEEDED-SECURITY-CHECK.txt".to_string()]);
    }

    #[tokio::test]
    async fn sweep_is_a_no_op_when_nothing_changed() {
        let dir = setup_test_repo();
        std::fs::write(dir.path().join("a"), "x").unwrap();
        let before = snapshot(dir.path()).await.unwrap();

        let deleted = sweep(dir.path(), &before, &[]).await;
        assert!(deleted.is_empty());
        assert!(dir.path().join("a").exists());
    }
}
