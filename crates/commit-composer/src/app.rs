//! Top-level commit flow.
//!
//! Wires the prerequisite checks, quality gates, security review, message
//! generation, and git operations into one sequential run. Exactly one
//! pipeline invocation is ever in flight; retries re-run the pipeline from
//! scratch.

use crate::{git, message, notify, scripts, security, util};
use composer_core::pipeline::resolve_prompt;
use composer_core::{AssistantConfig, Pipeline};
use std::path::Path;

/// CLI options, parsed in main.
#[derive(Debug, Clone, Copy, Default)]
pub struct Options {
    pub dangerously_skip_security_check: bool,
    pub verbose_claude_output: bool,
    pub verbose_prompt_output: bool,
}

/// Run the whole commit flow in `dir`.
pub async fn run(dir: &Path, options: &Options) -> eyre::Result<()> {
    let project = util::project_name(dir);

    // A crashed prior run can leave a stale success marker behind.
    util::cleanup_file(&dir.join(security::SECURITY_CHECK_SUCCESS_FILE));

    util::check_required_executables()?;

    let mut assistant = AssistantConfig::standard(dir);
    assistant.echo_events = options.verbose_claude_output;
    assistant.verify_executable()?;

    git::ensure_repository(dir).await?;
    let pipeline = Pipeline::new(assistant, dir);

    scripts::format_and_lint(dir).await?;

    if !git::stage_all_changes(dir).await? {
        eprintln!("No changes to commit. Ensuring repository is pushed to git repo...");
        if git::is_in_worktree(dir) {
            eprintln!("Skipping sync - detected git worktree");
        } else {
            git::setup_remote_and_push(dir).await?;
            notify::send(
                "📋 Repository Synced",
                &format!("Project: {project}\nRepository synced with git repo (no new changes)"),
            )
            .await;
        }
        return Ok(());
    }

    scripts::run_tests(dir).await?;

    if options.dangerously_skip_security_check {
        eprintln!(
            "⚠️  WARNING: Security check is being skipped! (--dangerously-skip-security-check flag is set)"
        );
        eprintln!(
            "⚠️  This is potentially dangerous - ensure you've reviewed all changes manually!"
        );
    } else {
        security::run_security_check(&pipeline, dir, options.verbose_prompt_output).await?;
    }

    let template = resolve_prompt(message::COMMIT_MESSAGE_TEMPLATE)?;
    let commit_message =
        message::generate_commit_message(&pipeline, &template, options.verbose_prompt_output)
            .await?;

    git::create_commit(dir, &commit_message).await?;

    let first_line = commit_message.lines().next().unwrap_or_default();
    if git::is_in_worktree(dir) {
        eprintln!("Skipping push - detected git worktree");
        notify::send(
            "✅ Commit Created (Worktree)",
            &format!("Project: {project}\n{first_line}"),
        )
        .await;
    } else {
        git::setup_remote_and_push(dir).await?;
        notify::send(
            "✅ Commit Created",
            &format!("Project: {project}\n{first_line}"),
        )
        .await;
    }

    // Summary display is cosmetic; its failure never fails the run.
    if let Ok(summary) = git::show_commit_summary(dir).await {
        println!("{summary}");
    }

    Ok(())
}
