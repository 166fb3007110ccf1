//! Git operations for the commit flow.
//!
//! Git is driven as an opaque external tool through the shell runner; only
//! exit codes and captured output are interpreted. Commit and push use
//! argument vectors directly so commit messages are never re-quoted through
//! a shell.

use composer_core::process::{self, ProcessError};
use std::path::Path;
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;

#[derive(Debug, Error)]
pub enum GitError {
    #[error("not in a git repository")]
    NotARepo,
    #[error("failed to create commit: {0}")]
    CommitFailed(String),
    #[error("failed to push to origin: {stderr}\nCommit was created successfully but not pushed.")]
    PushFailed { stderr: String },
    #[error("{0}\nCommit was created successfully but not pushed.")]
    RemoteSetup(String),
    #[error(transparent)]
    Process(#[from] ProcessError),
    #[error("failed to execute git: {0}")]
    Execution(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, GitError>;

/// Run git with an argument vector (no shell interpretation).
async fn git(dir: &Path, args: &[&str]) -> Result<std::process::Output> {
    Ok(Command::new("git")
        .args(args)
        .current_dir(dir)
        .stdin(Stdio::null())
        .output()
        .await?)
}

/// Fail fast when the working directory is not inside a git repository.
pub async fn ensure_repository(dir: &Path) -> Result<()> {
    let result = process::run(dir, "git rev-parse --git-dir").await?;
    if result.success() {
        Ok(())
    } else {
        Err(GitError::NotARepo)
    }
}

/// Detect linked-worktree mode: `.git` is a file pointing at the real gitdir.
pub fn is_in_worktree(dir: &Path) -> bool {
    let git_path = dir.join(".git");
    match std::fs::metadata(&git_path) {
        Ok(meta) if meta.is_file() => std::fs::read_to_string(&git_path)
            .map(|content| content.contains("gitdir:"))
            .unwrap_or(false),
        _ => false,
    }
}

/// Paths with staged changes.
pub async fn staged_files(dir: &Path) -> Result<Vec<String>> {
    let result = process::run(dir, "git diff --cached --name-only").await?;
    Ok(result
        .stdout
        .lines()
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

/// Stage everything; returns false (after one stdout line) when nothing is
/// staged.
pub async fn stage_all_changes(dir: &Path) -> Result<bool> {
    eprintln!("Adding all files to git...");
    process::run(dir, "git add .").await?;

    if staged_files(dir).await?.is_empty() {
        println!("There is nothing to commit.");
        return Ok(false);
    }
    Ok(true)
}

/// Repository tree listing for prompt assembly. Falls back to a fixed note
/// when the tree command is unavailable or fails.
pub async fn tree_output(dir: &Path) -> String {
    match process::run(dir, "tree --gitignore").await {
        Ok(result) if result.success() => result.stdout,
        _ => "tree command failed".to_string(),
    }
}

/// Staged diff for prompt assembly.
pub async fn diff_cached(dir: &Path) -> String {
    match process::run(dir, "git --no-pager diff --cached").await {
        Ok(result) if result.success() => result.stdout,
        _ => "git diff failed".to_string(),
    }
}

/// Porcelain status for prompt assembly.
pub async fn status_porcelain(dir: &Path) -> String {
    match process::run(dir, "git status --porcelain").await {
        Ok(result) if result.success() => result.stdout,
        _ => "git status failed".to_string(),
    }
}

/// Commit staged changes with the given message.
pub async fn create_commit(dir: &Path, message: &str) -> Result<()> {
    let output = git(dir, &["commit", "-m", message]).await?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        return Err(GitError::CommitFailed(stderr));
    }
    eprintln!("Commit created successfully!");
    eprintln!();
    Ok(())
}

/// Stat summary of the last commit, for display.
pub async fn show_commit_summary(dir: &Path) -> Result<String> {
    let result = process::run(dir, "git --no-pager show --stat").await?;
    Ok(result.stdout)
}

pub async fn current_branch(dir: &Path) -> Result<String> {
    let result = process::run(dir, "git rev-parse --abbrev-ref HEAD").await?;
    Ok(result.stdout)
}

pub async fn has_remote_origin(dir: &Path) -> Result<bool> {
    let result = process::run(dir, "git remote get-url origin").await?;
    Ok(result.success())
}

/// Push the current branch to origin, setting upstream.
///
/// A failed push is distinct from a failed commit: the error says so, since
/// the commit already exists locally at this point.
pub async fn push_to_remote(dir: &Path) -> Result<()> {
    let branch = current_branch(dir).await?;
    eprintln!("Pushing to origin...");
    let output = git(dir, &["push", "-u", "origin", &branch]).await?;
    if !output.status.success() {
        return Err(GitError::PushFailed {
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    eprintln!("Pushed successfully!");
    Ok(())
}

/// Push to origin, creating a hosted repository first when none exists.
///
/// With no origin remote: create a private repository through the GitHub CLI
/// (`gh repo create --source=. --push`); if creation fails, fall back to
/// wiring up an existing repository under the authenticated user and pushing
/// (normal, then force). Missing `gh` is reported but not fatal since the
/// commit already exists locally.
pub async fn setup_remote_and_push(dir: &Path) -> Result<()> {
    if has_remote_origin(dir).await? {
        return push_to_remote(dir).await;
    }

    eprintln!("No origin remote found. Creating git repository...");

    let repo_name = dir
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("repo")
        .to_string();

    if !process::command_exists("gh") {
        eprintln!(
            "GitHub CLI (gh) is not installed. Please install it to create a remote repository."
        );
        eprintln!("Commit was created successfully but not pushed.");
        return Ok(());
    }

    let auth = process::run(dir, "gh auth status").await?;
    if !auth.success() {
        return Err(GitError::RemoteSetup(
            "GitHub CLI is not authenticated. Please run 'gh auth login' first.".to_string(),
        ));
    }

    eprintln!("Creating private git repository: {repo_name}");
    let create = Command::new("gh")
        .args([
            "repo",
            "create",
            &repo_name,
            "--private",
            "--source=.",
            "--remote=origin",
            "--push",
        ])
        .current_dir(dir)
        .stdin(Stdio::null())
        .output()
        .await?;

    if create.status.success() {
        eprintln!("Repository created and pushed successfully!");
        return Ok(());
    }

    eprintln!("Repository creation failed. Attempting to use existing repository...");

    let user = process::run(dir, "gh api user --jq .login").await?;
    if user.stdout.is_empty() {
        return Err(GitError::RemoteSetup(
            "Failed to determine GitHub username.".to_string(),
        ));
    }

    let remote_url = format!("https://github.com/{}/{}.git", user.stdout, repo_name);
    eprintln!("Setting up remote for existing repository: {remote_url}");
    git(dir, &["remote", "add", "origin", &remote_url]).await?;
    eprintln!("Remote added successfully");

    let branch = current_branch(dir).await?;
    eprintln!("Attempting to push to existing repository...");

    let push = git(dir, &["push", "-u", "origin", &branch]).await?;
    if push.status.success() {
        eprintln!("Pushed successfully to existing repository!");
        return Ok(());
    }

    let force = git(dir, &["push", "-u", "origin", &branch, "--force"]).await?;
    if force.status.success() {
        eprintln!("Force pushed successfully to existing repository!");
        return Ok(());
    }

    Err(GitError::RemoteSetup(
        "Failed to push to repository. The repository might not exist or you might not have access."
            .to_string(),
    ))
}
