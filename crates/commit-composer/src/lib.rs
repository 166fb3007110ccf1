//! commit-composer - AI-assisted commit automation.
//!
//! Orchestrates git, quality-gate scripts, and the assistant pipeline from
//! `composer-core` into one flow: stage changes, run gates, security-review
//! the diff, generate a commit message, commit, and push.

pub mod app;
pub mod git;
pub mod message;
pub mod notify;
pub mod scripts;
pub mod security;
pub mod util;

pub use app::{run, Options};
