//! Message assembler — groups raw fragments of one receive event into
//! complete logical messages.
//!
//! Pure function of the input set: shuffling a batch never changes the
//! output. A group containing any fragment without sender or body is
//! dropped whole, and so is a group with fewer fragments than its declared
//! total, so an incomplete multi-part message is never forwarded.

use std::collections::HashMap;

use tracing::{debug, info, warn};

use crate::pipeline::types::{GroupKey, LogicalMessage, MessageFragment};

/// Result of assembling one receive batch.
#[derive(Debug, Default)]
pub struct AssemblyOutcome {
    /// Complete messages, ordered by first arrival.
    pub messages: Vec<LogicalMessage>,
    /// Fragments that did not make it into any message.
    pub skipped: usize,
}

/// Assemble one receive batch into logical messages. Never fails.
pub fn assemble(fragments: Vec<MessageFragment>) -> AssemblyOutcome {
    let total = fragments.len();
    let mut groups: HashMap<GroupKey, Vec<MessageFragment>> = HashMap::new();
    for fragment in fragments {
        groups.entry(fragment.group_key()).or_default().push(fragment);
    }

    let mut outcome = AssemblyOutcome::default();
    for (key, mut parts) in groups {
        let invalid = parts.iter().filter(|f| !f.is_valid()).count();
        if invalid > 0 {
            warn!(
                sender = key.sender.as_deref().unwrap_or("<missing>"),
                reference = key.reference,
                invalid,
                dropped = parts.len(),
                "Dropping message group with invalid fragments"
            );
            outcome.skipped += parts.len();
            continue;
        }

        let declared = parts.iter().map(|f| f.total_parts).max().unwrap_or(1) as usize;
        if parts.len() < declared {
            warn!(
                sender = key.sender.as_deref().unwrap_or("<missing>"),
                reference = key.reference,
                declared,
                received = parts.len(),
                "Dropping incomplete multi-part message"
            );
            outcome.skipped += parts.len();
            continue;
        }

        parts.sort_by(|a, b| {
            a.sequence_index
                .cmp(&b.sequence_index)
                .then(a.received_at.cmp(&b.received_at))
                .then_with(|| a.body.cmp(&b.body))
        });

        if let Some(message) = join_parts(key, parts) {
            outcome.messages.push(message);
        }
    }

    outcome.messages.sort_by(|a, b| {
        a.received_at
            .cmp(&b.received_at)
            .then_with(|| a.sender.cmp(&b.sender))
            .then(a.reference.cmp(&b.reference))
    });

    debug!(
        fragments = total,
        messages = outcome.messages.len(),
        skipped = outcome.skipped,
        "Receive batch assembled"
    );
    outcome
}

/// Concatenate already-ordered, already-validated, complete parts.
fn join_parts(key: GroupKey, parts: Vec<MessageFragment>) -> Option<LogicalMessage> {
    let sender = key.sender?;

    let received_at = parts.iter().map(|f| f.received_at).min()?;
    let inbound_route = parts.first().and_then(|f| f.source_route.clone());
    let body: String = parts.iter().filter_map(|f| f.body.as_deref()).collect();

    info!(
        sender = %sender,
        reference = key.reference,
        parts = parts.len(),
        chars = body.chars().count(),
        "Message group assembled"
    );

    Some(LogicalMessage {
        sender,
        reference: key.reference,
        body,
        received_at,
        inbound_route,
        parts: parts.len(),
    })
}
