//! Security review of staged changes.
//!
//! The assistant reviews the staged diff with only a write capability and
//! reports its verdict out-of-band through one of two fixed marker files.
//! The pipeline's sweep allow-lists exactly those two names for this flow;
//! both are read and deleted here so neither survives a run.

use crate::{git, util};
use composer_core::{Pipeline, RunOptions};
use eyre::bail;
use std::path::Path;

pub const SECURITY_CHECK_SUCCESS_FILE: &str = "SUCCEEDED-SECURITY-CHECK.txt";
pub const SECURITY_CHECK_FAILURE_FILE: &str = "FAILED-SECURITY-CHECK.txt";

/// Assemble the review prompt from repository state.
pub fn build_security_prompt(tree: &str, diff: &str, status: &str) -> String {
    format!(
        r"<Role>
You are a engineer who is an expert at performing software security checks.
</Role>

<Context>
<Command>
<CommandDescription>
A tree of all repository files and directories
</CommandDescription>
<CommandInput>
tree --gitignore
</CommandInput>
<CommandOutput>
{tree}
</CommandOutput>
</Command>

<Command>
<CommandDescription>
All staged changes
</CommandDescription>
<CommandInput>
git --no-pager diff --cached
</CommandInput>
<CommandOutput>
{diff}
</CommandOutput>
</Command>

<Command>
<CommandDescription>
Status of repo changes
</CommandDescription>
<CommandInput>
git status --porcelain
</CommandInput>
<CommandOutput>
{status}
</CommandOutput>
</Command>
</Context>

<Instructions>
All changes are in the working tree and all context to create a commit message are in the conversation.
Follow these instructions step-by-step:
- Perform a safety and security check of the current repo changes
- Look for the following unsafe scenarios:
  - Suspicious files or changes
  - Any credentials are present
  - Files are committed that should be ignored
  - Binaries are committed
  - Secrets accidentally embedded in code (e.g., API keys, tokens)
  - Executable scripts without shebang or unexpected permissions
  - Unexpected changes to configuration or dependency files (e.g., package-lock.json, requirements.txt)
- When complete save file with the contents of the security check
  - If no unsafe scenarios are present, save the summary as {SECURITY_CHECK_SUCCESS_FILE} in the current directory
  - If unsafe scenarios are present, save the summary as {SECURITY_CHECK_FAILURE_FILE} in the current directory
- If you need to save the commit message to a text file, use the /tmp directory (e.g., /tmp/commit_message.txt)
</Instructions>"
    )
}

/// Run the security review and interpret the marker-file verdict.
///
/// A failure marker rejects the run with the assistant's findings; a missing
/// success marker means the review never completed and is also terminal.
/// Both markers are removed before returning, on failure paths included.
pub async fn run_security_check(
    pipeline: &Pipeline,
    dir: &Path,
    show_prompt: bool,
) -> eyre::Result<()> {
    eprintln!("Running security check...");

    let tree = git::tree_output(dir).await;
    let diff = git::diff_cached(dir).await;
    let status = git::status_porcelain(dir).await;
    let prompt = build_security_prompt(&tree, &diff, &status);

    if show_prompt {
        eprintln!("-----");
        eprintln!("{prompt}");
        eprintln!("-----");
    }

    let opts = RunOptions {
        capture_result: false,
        validate_result: true,
        allowed_artifacts: vec![
            SECURITY_CHECK_SUCCESS_FILE.to_string(),
            SECURITY_CHECK_FAILURE_FILE.to_string(),
        ],
        ..RunOptions::default()
    };
    let failure_path = dir.join(SECURITY_CHECK_FAILURE_FILE);
    let success_path = dir.join(SECURITY_CHECK_SUCCESS_FILE);

    if let Err(err) = pipeline.run_prompt(&prompt, &opts).await {
        // The markers are allow-listed for this flow, so the pipeline's own
        // sweep leaves them behind; consume them before surfacing the failure.
        util::cleanup_file(&failure_path);
        util::cleanup_file(&success_path);
        return Err(err.into());
    }

    if failure_path.exists() {
        eprintln!("Error: Security check failed!");
        eprintln!("Security issues found:");
        if let Ok(content) = std::fs::read_to_string(&failure_path) {
            eprintln!("{content}");
        }
        util::cleanup_file(&failure_path);
        util::cleanup_file(&success_path);
        bail!("Security check failed! Check the security issues above.");
    }

    if !success_path.exists() {
        bail!(
            "Security check did not complete successfully! Missing ./{SECURITY_CHECK_SUCCESS_FILE} file"
        );
    }

    util::cleanup_file(&success_path);
    util::cleanup_file(&failure_path);
    eprintln!("Security check passed.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use composer_core::AssistantConfig;
    use std::path::PathBuf;
    use tempfile::TempDir;

    #[test]
    fn prompt_embeds_all_three_command_outputs() {
        let prompt = build_security_prompt("TREE-OUT", "DIFF-OUT", "STATUS-OUT");
        assert!(prompt.contains("TREE-OUT"));
        assert!(prompt.contains("DIFF-OUT"));
        assert!(prompt.contains("STATUS-OUT"));
        assert!(prompt.contains(SECURITY_CHECK_SUCCESS_FILE));
        assert!(prompt.contains(SECURITY_CHECK_FAILURE_FILE));
    }

    fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, body).unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = std::fs::metadata(&path).unwrap().permissions();
            perms.set_mode(0o755);
            std::fs::set_permissions(&path, perms).unwrap();
        }
        path
    }

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

    fn test_pipeline(workdir: &Path, assistant: &Path) -> Pipeline {
        let config = AssistantConfig {
            executable: assistant.to_path_buf(),
            add_dirs: Vec::new(),
            ..AssistantConfig::standard(workdir)
        };
        Pipeline::new(config, workdir)
    }

    #[tokio::test]
    async fn passing_review_consumes_success_marker() {
        let scripts = TempDir::new().unwrap();
        let repo = setup_test_repo();
        let assistant = write_script(
            scripts.path(),
            "assistant.sh",
            "#!/bin/sh\ncat >/dev/null\n\
             echo 'all clear' > SUCCEEDED-SECURITY-CHECK.txt\n\
             printf '{\"type\":\"result\",\"subtype\":\"success\",\"result\":\"done\"}\\n'\n",
        );

        let pipeline = test_pipeline(repo.path(), &assistant);
        run_security_check(&pipeline, repo.path(), false)
            .await
            .unwrap();

        assert!(!repo.path().join(SECURITY_CHECK_SUCCESS_FILE).exists());
        assert!(!repo.path().join(SECURITY_CHECK_FAILURE_FILE).exists());
    }

    #[tokio::test]
    async fn failing_review_rejects_and_consumes_marker() {
        let scripts = TempDir::new().unwrap();
        let repo = setup_test_repo();
        let assistant = write_script(
            scripts.path(),
            "assistant.sh",
            "#!/bin/sh\ncat >/dev/null\n\
             echo 'found an API key' > FAILED-SECURITY-CHECK.txt\n\
             printf '{\"type\":\"result\",\"subtype\":\"success\",\"result\":\"done\"}\\n'\n",
        );

        let pipeline = test_pipeline(repo.path(), &assistant);
        let err = run_security_check(&pipeline, repo.path(), false)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Security check failed"));
        assert!(!repo.path().join(SECURITY_CHECK_FAILURE_FILE).exists());
    }

    #[tokio::test]
    async fn error_result_still_consumes_markers() {
        let scripts = TempDir::new().unwrap();
        let repo = setup_test_repo();
        // Writes its verdict but ends with a terminal error record, so the
        // invocation itself fails validation.
        let assistant = write_script(
            scripts.path(),
            "assistant.sh",
            "#!/bin/sh\ncat >/dev/null\n\
             echo 'found an API key' > FAILED-SECURITY-CHECK.txt\n\
             printf '{\"type\":\"result\",\"subtype\":\"error\",\"result\":\"bad\"}\\n'\n",
        );

        let pipeline = test_pipeline(repo.path(), &assistant);
        run_security_check(&pipeline, repo.path(), false)
            .await
            .unwrap_err();

        assert!(!repo.path().join(SECURITY_CHECK_FAILURE_FILE).exists());
        assert!(!repo.path().join(SECURITY_CHECK_SUCCESS_FILE).exists());
    }

    #[tokio::test]
    async fn nonzero_exit_still_consumes_markers() {
        let scripts = TempDir::new().unwrap();
        let repo = setup_test_repo();
        let assistant = write_script(
            scripts.path(),
            "assistant.sh",
            "#!/bin/sh\ncat >/dev/null\n\
             echo 'all clear' > SUCCEEDED-SECURITY-CHECK.txt\n\
             exit 1\n",
        );

        let pipeline = test_pipeline(repo.path(), &assistant);
        run_security_check(&pipeline, repo.path(), false)
            .await
            .unwrap_err();

        assert!(!repo.path().join(SECURITY_CHECK_SUCCESS_FILE).exists());
        assert!(!repo.path().join(SECURITY_CHECK_FAILURE_FILE).exists());
    }

    #[tokio::test]
    async fn missing_success_marker_is_terminal() {
        let scripts = TempDir::new().unwrap();
        let repo = setup_test_repo();
        let assistant = write_script(
            scripts.path(),
            "assistant.sh",
            "#!/bin/sh\ncat >/dev/null\n\
             printf '{\"type\":\"result\",\"subtype\":\"success\",\"result\":\"forgot the file\"}\\n'\n",
        );

        let pipeline = test_pipeline(repo.path(), &assistant);
        let err = run_security_check(&pipeline, repo.path(), false)
            .await
            .unwrap_err();
        assert!(err
            .to_string()
            .contains("did not complete successfully"));
    }
}
