//! Core library for commit-composer.
//!
//! Provides the subprocess plumbing the CLI is built on: a shell command
//! runner, the untracked-file ledger, and the composer/assistant pipeline
//! with its stream-json response validator.

pub mod ledger;
pub mod pipeline;
pub mod process;

pub use ledger::UntrackedFileSet;
pub use pipeline::{
    AssistantConfig, AssistantEvent, Pipeline, PipelineError, PipelineOutcome, RunOptions,
};
pub use process::ShellResult;
