//! Package-manager quality gates.
//!
//! When the repository carries a `package.json`, the declared `format`,
//! `lint`, `typecheck`, and `test` scripts are run through pnpm before any
//! commit is created. Script output streams to stderr as it arrives; a
//! non-zero exit fails the whole run.

use composer_core::process::{self, ProcessError};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("{0}")]
    GateFailed(&'static str),
    #[error(transparent)]
    Process(#[from] ProcessError),
}

pub type Result<T> = std::result::Result<T, ScriptError>;

#[derive(Debug, Deserialize)]
struct PackageJson {
    #[serde(default)]
    scripts: HashMap<String, String>,
}

/// True when `package.json` exists and declares the named script.
pub fn has_script(dir: &Path, name: &str) -> bool {
    let path = dir.join("package.json");
    let Ok(content) = std::fs::read_to_string(path) else {
        return false;
    };
    serde_json::from_str::<PackageJson>(&content)
        .map(|package| package.scripts.contains_key(name))
        .unwrap_or(false)
}

/// Run one pnpm script, streaming its output to stderr.
async fn run_script(dir: &Path, name: &str) -> Result<i32> {
    let args = vec!["run".to_string(), name.to_string()];
    let code = process::run_streaming(dir, "pnpm", &args, |chunk| eprint!("{chunk}"), None).await?;
    Ok(code)
}

/// Format, lint, and typecheck gates, each run only when declared.
pub async fn format_and_lint(dir: &Path) -> Result<()> {
    if !dir.join("package.json").exists() {
        eprintln!("No package.json found - skipping code quality checks");
        return Ok(());
    }

    let gates: [(&str, &'static str, &str); 3] = [
        ("format", "Code formatting failed", "Formatting with pnpm..."),
        ("lint", "Code linting failed", "Linting with pnpm..."),
        ("typecheck", "Type checking failed", "Type checking with pnpm..."),
    ];

    for (name, failure, banner) in gates {
        if has_script(dir, name) {
            eprintln!("{banner}");
            if run_script(dir, name).await? != 0 {
                return Err(ScriptError::GateFailed(failure));
            }
        } else {
            eprintln!("No {name} script found in package.json");
        }
    }
    Ok(())
}

/// Test gate, run only once there are staged changes worth committing.
pub async fn run_tests(dir: &Path) -> Result<()> {
    if !dir.join("package.json").exists() {
        eprintln!("No package.json found - skipping tests");
        return Ok(());
    }

    if has_script(dir, "test") {
        eprintln!("Running tests with pnpm test...");
        if run_script(dir, "test").await? != 0 {
            return Err(ScriptError::GateFailed("Tests failed"));
        }
    } else {
        eprintln!("No test script found in package.json");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn has_script_requires_declared_entry() {
        let dir = TempDir::new().unwrap();
        assert!(!has_script(dir.path(), "format"));

        std::fs::write(
            dir.path().join("package.json"),
            r#"{"name":"x","scripts":{"format":"prettier -w ."}}"#,
        )
        .unwrap();
        assert!(has_script(dir.path(), "format"));
        assert!(!has_script(dir.path(), "lint"));
    }

    #[test]
    fn has_script_tolerates_malformed_package_json() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("package.json"), "{ not json").unwrap();
        assert!(!has_script(dir.path(), "format"));
    }

    #[test]
    fn has_script_tolerates_missing_scripts_section() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("package.json"), r#"{"name":"x"}"#).unwrap();
        assert!(!has_script(dir.path(), "test"));
    }

    #[tokio::test]
    async fn gates_skip_without_package_json() {
        let dir = TempDir::new().unwrap();
        format_and_lint(dir.path()).await.unwrap();
        run_tests(dir.path()).await.unwrap();
    }

    #[tokio::test]
    async fn gates_skip_undeclared_scripts() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("package.json"), r#"{"name":"x"}"#).unwrap();
        // No scripts declared, so nothing is spawned and nothing fails.
        format_and_lint(dir.path()).await.unwrap();
        run_tests(dir.path()).await.unwrap();
    }
}
