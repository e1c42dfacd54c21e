//! Status publisher — derives the one-glance forwarding summary and pushes
//! it, together with user-facing alerts, to the notification surface.

use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use crate::settings::ForwardingPolicy;

/// Status shown when no channel is active.
pub const IDLE_STATUS: &str = "SMS forwarding is off";

/// The user-visible notification surface.
pub trait Notifier: Send + Sync {
    /// Replace the persistent status text.
    fn set_status(&self, status: &str);
    /// Show a one-off message (permanent failure, exhausted retries, warnings).
    fn alert(&self, message: &str);
}

/// Notifier that writes to stderr, for the command-line host.
pub struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn set_status(&self, status: &str) {
        eprintln!("ℹ️  {}", status.replace('\n', " | "));
    }

    fn alert(&self, message: &str) {
        eprintln!("⚠️  {}", message);
    }
}

/// Build the status summary for a policy.
pub fn status_summary(policy: &ForwardingPolicy) -> String {
    if !policy.is_forwarding() {
        return IDLE_STATUS.to_string();
    }
    let mut lines = Vec::with_capacity(2);
    if policy.relay_enabled {
        if policy.relay_target.is_empty() {
            lines.push("Relay active".to_string());
        } else {
            lines.push(format!("Relay active → {}", policy.relay_target));
        }
    }
    if policy.email_enabled {
        let count = policy.email_recipients.len();
        let noun = if count == 1 { "recipient" } else { "recipients" };
        lines.push(format!("Email active ({count} {noun})"));
    }
    lines.join("\n")
}

/// Pushes status and alerts, skipping repeats of the current status.
pub struct StatusPublisher {
    notifier: Arc<dyn Notifier>,
    last: Mutex<Option<String>>,
}

impl StatusPublisher {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self {
            notifier,
            last: Mutex::new(None),
        }
    }

    /// Recompute and push the status. Safe to call redundantly.
    pub fn publish(&self, policy: &ForwardingPolicy) {
        let summary = status_summary(policy);
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        if last.as_deref() == Some(summary.as_str()) {
            debug!("Status unchanged, not pushing");
            return;
        }
        self.notifier.set_status(&summary);
        *last = Some(summary);
    }

    /// Surface a message to the user.
    pub fn alert(&self, message: &str) {
        info!(alert = %message, "User notification");
        self.notifier.alert(message);
    }
}
