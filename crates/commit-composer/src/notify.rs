//! Best-effort desktop notifications.
//!
//! Delivery is never load-bearing: a missing notify-send binary or a failed
//! send is logged at debug level and otherwise ignored, so a notification
//! failure can never mask the error it reports on.

use composer_core::process::command_exists;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Urgent notification that stays visible for 12 seconds.
pub async fn send(title: &str, message: &str) {
    if !command_exists("notify-send") {
        return;
    }

    let result = Command::new("notify-send")
        .args([title, message, "--urgency=critical", "--expire-time=12000"])
        .stdin(Stdio::null())
        .output()
        .await;

    if let Err(err) = result {
        debug!(error = %err, "failed to send notification");
    }
}
