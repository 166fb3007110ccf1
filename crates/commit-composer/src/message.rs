//! Commit message generation and the content-policy loop.
//!
//! The assistant's captured text is cleaned, then checked against two rules:
//! a banned marker phrase triggers a silent regeneration, and the word
//! "commit" (a style concern, not a correctness one) escalates to an
//! interactive chooser. Regeneration is unbounded in both cases; only the
//! user can break the loop for the interactive rule.

use crate::notify;
use composer_core::{Pipeline, RunOptions};
use dialoguer::Select;
use eyre::bail;
use std::path::Path;

/// Prompt template consumed by the composer for message generation.
pub const COMMIT_MESSAGE_TEMPLATE: &str = "commit-message.md";

const INITIAL_COMMIT_PREFIX: &str = "Initial commit: ";

/// Phrases that force an automatic regeneration without asking.
const PROBLEMATIC_STRINGS: &[&str] = &["The commit message is:"];

/// What to do with a candidate message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessagePolicy {
    Accept,
    AutoRegenerate,
    NeedsReview,
}

/// Strip the literal leading prefix, nothing else.
pub fn clean_message(raw: &str) -> &str {
    raw.strip_prefix(INITIAL_COMMIT_PREFIX).unwrap_or(raw)
}

/// Classify a cleaned candidate message against the content rules.
pub fn classify_message(message: &str) -> MessagePolicy {
    if PROBLEMATIC_STRINGS
        .iter()
        .any(|phrase| message.contains(phrase))
    {
        return MessagePolicy::AutoRegenerate;
    }
    if message.to_lowercase().contains("commit") {
        return MessagePolicy::NeedsReview;
    }
    MessagePolicy::Accept
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReviewAction {
    Use,
    Regenerate,
    Cancel,
}

/// Ask the user what to do with a message that mentions "commit".
async fn review_message(message: &str) -> ReviewAction {
    eprintln!("\n⚠️  Generated message contains the word \"commit\":");
    eprintln!("\n{message}\n");

    notify::send(
        "Commit Composer",
        "Generated message contains the word 'commit'. Please review.",
    )
    .await;

    let choice = Select::new()
        .with_prompt("What would you like to do?")
        .items(&[
            "Use this message anyway",
            "Generate a new message",
            "Cancel",
        ])
        .default(0)
        .interact();

    match choice {
        Ok(0) => ReviewAction::Use,
        Ok(1) => ReviewAction::Regenerate,
        // Explicit cancel, or no usable terminal to ask on.
        _ => ReviewAction::Cancel,
    }
}

/// Generate a commit message, re-running the whole pipeline until a
/// candidate passes the content rules or the user accepts or cancels.
///
/// With `show_prompt` set, each attempt echoes the composer-expanded prompt
/// body to stderr.
pub async fn generate_commit_message(
    pipeline: &Pipeline,
    template: &Path,
    show_prompt: bool,
) -> eyre::Result<String> {
    let opts = RunOptions {
        capture_result: true,
        validate_result: true,
        echo_prompt: show_prompt,
        allowed_artifacts: Vec::new(),
    };

    loop {
        eprintln!("Generating commit message...");
        let outcome = pipeline.run_composer(template, &opts).await?;

        if outcome.captured_text.is_empty() {
            bail!("No commit message was generated!");
        }

        let cleaned = clean_message(&outcome.captured_text).to_string();
        match classify_message(&cleaned) {
            MessagePolicy::Accept => {
                eprintln!("Creating commit with message:");
                eprintln!("{cleaned}");
                return Ok(cleaned);
            }
            MessagePolicy::AutoRegenerate => {
                eprintln!("\n⚠️  Generated message contains problematic string, regenerating...");
            }
            MessagePolicy::NeedsReview => match review_message(&cleaned).await {
                ReviewAction::Use => {
                    eprintln!("\nUsing the generated message.");
                    return Ok(cleaned);
                }
                ReviewAction::Regenerate => {
                    eprintln!("\nRegenerating commit message...");
                }
                ReviewAction::Cancel => bail!("Commit cancelled by user."),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use composer_core::AssistantConfig;
    use std::path::PathBuf;
    use tempfile::TempDir;

    #[test]
    fn clean_message_strips_exactly_one_leading_prefix() {
        assert_eq!(clean_message("Initial commit: Add parser"), "Add parser");
        assert_eq!(clean_message("Add parser"), "Add parser");
        // Only the leading position counts, and nothing else is touched.
        assert_eq!(
            clean_message("Refactor Initial commit: handling"),
            "Refactor Initial commit: handling"
        );
        assert_eq!(
            clean_message("Initial commit: Initial commit: twice"),
            "Initial commit: twice"
        );
    }

    #[test]
    fn classify_accepts_ordinary_messages() {
        assert_eq!(classify_message("Add streaming parser"), MessagePolicy::Accept);
    }

    #[test]
    fn classify_flags_banned_phrase_for_auto_retry() {
        assert_eq!(
            classify_message("The commit message is: Add parser"),
            MessagePolicy::AutoRegenerate
        );
    }

    #[test]
    fn classify_flags_commit_word_case_insensitively() {
        assert_eq!(
            classify_message("Add pre-Commit hook support"),
            MessagePolicy::NeedsReview
        );
        assert_eq!(
            classify_message("COMMITTED to better errors"),
            MessagePolicy::NeedsReview
        );
    }

    #[test]
    fn banned_phrase_takes_precedence_over_review() {
        // The banned phrase itself contains "commit"; it must auto-retry,
        // never prompt.
        assert_eq!(
            classify_message("The commit message is: whatever"),
            MessagePolicy::AutoRegenerate
        );
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

    #[tokio::test]
    async fn generation_returns_cleaned_passing_message() {
        let scripts = TempDir::new().unwrap();
        let repo = setup_test_repo();
        let assistant = write_script(
            scripts.path(),
            "assistant.sh",
            "#!/bin/sh\ncat >/dev/null\n\
             printf '{\"type\":\"result\",\"subtype\":\"success\",\"result\":\"Initial commit: Add parser\"}\\n'\n",
        );
        let composer = write_script(scripts.path(), "composer.sh", "#!/bin/sh\necho prompt\n");
        let template = scripts.path().join("commit-message.md");
        std::fs::write(&template, "template").unwrap();

        let config = AssistantConfig {
            executable: assistant,
            add_dirs: Vec::new(),
            ..AssistantConfig::standard(repo.path())
        };
        let mut pipeline = Pipeline::new(config, repo.path());
        pipeline.composer_program = composer.to_string_lossy().to_string();

        let message = generate_commit_message(&pipeline, &template, false)
            .await
            .unwrap();
        assert_eq!(message, "Add parser");
    }

    #[tokio::test]
    async fn generation_fails_when_nothing_is_captured() {
        let scripts = TempDir::new().unwrap();
        let repo = setup_test_repo();
        let assistant = write_script(
            scripts.path(),
            "assistant.sh",
            "#!/bin/sh\ncat >/dev/null\n\
             printf '{\"type\":\"result\",\"subtype\":\"success\"}\\n'\n",
        );
        let composer = write_script(scripts.path(), "composer.sh", "#!/bin/sh\necho prompt\n");
        let template = scripts.path().join("commit-message.md");
        std::fs::write(&template, "template").unwrap();

        let config = AssistantConfig {
            executable: assistant,
            add_dirs: Vec::new(),
            ..AssistantConfig::standard(repo.path())
        };
        let mut pipeline = Pipeline::new(config, repo.path());
        pipeline.composer_program = composer.to_string_lossy().to_string();

        let err = generate_commit_message(&pipeline, &template, false)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("No commit message was generated"));
    }

    #[tokio::test]
    async fn generation_auto_retries_past_banned_phrase() {
        let scripts = TempDir::new().unwrap();
        let repo = setup_test_repo();
        // First run emits the banned phrase, second run a clean message.
        let counter = scripts.path().join("counter");
        std::fs::write(&counter, "0").unwrap();
        let assistant = write_script(
            scripts.path(),
            "assistant.sh",
            &format!(
                "#!/bin/sh\ncat >/dev/null\n\
                 count=$(cat \"{counter}\")\n\
                 count=$((count + 1))\n\
                 echo $count > \"{counter}\"\n\
                 if [ $count -eq 1 ]; then\n\
                   printf '{{\"type\":\"result\",\"subtype\":\"success\",\"result\":\"The commit message is: Add parser\"}}\\n'\n\
                 else\n\
                   printf '{{\"type\":\"result\",\"subtype\":\"success\",\"result\":\"Add parser\"}}\\n'\n\
                 fi\n",
                counter = counter.display(),
            ),
        );
        let composer = write_script(scripts.path(), "composer.sh", "#!/bin/sh\necho prompt\n");
        let template = scripts.path().join("commit-message.md");
        std::fs::write(&template, "template").unwrap();

        let config = AssistantConfig {
            executable: assistant,
            add_dirs: Vec::new(),
            ..AssistantConfig::standard(repo.path())
        };
        let mut pipeline = Pipeline::new(config, repo.path());
        pipeline.composer_program = composer.to_string_lossy().to_string();

        let message = generate_commit_message(&pipeline, &template, false)
            .await
            .unwrap();
        assert_eq!(message, "Add parser");
        assert_eq!(std::fs::read_to_string(&counter).unwrap().trim(), "2");
    }
}
