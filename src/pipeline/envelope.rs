//! Forwarding envelopes — how a logical message looks on each channel.

use crate::pipeline::types::LogicalMessage;

/// Appended when a relayed text had to be cut to the length ceiling.
pub const TRUNCATION_NOTICE: &str = "… [truncated]";

fn header(message: &LogicalMessage) -> String {
    let mut header = format!(
        "From: {}\n{}\n",
        message.sender,
        message.received_at.format("%Y-%m-%d %H:%M UTC")
    );
    if let Some(route) = &message.inbound_route {
        header.push_str(&format!("Via: route {route}\n"));
    }
    header
}

/// Relay text, cut to `ceiling` characters with a notice when too long.
pub fn relay_text(message: &LogicalMessage, ceiling: usize) -> String {
    let full = format!("{}\n{}", header(message), message.body);
    truncate_with_notice(&full, ceiling)
}

pub fn email_subject(message: &LogicalMessage) -> String {
    format!("SMS from {}", message.sender)
}

/// Email body. Mail has no practical length limit, so nothing is cut.
pub fn email_body(message: &LogicalMessage) -> String {
    format!("{}\n{}", header(message), message.body)
}

/// Cut `text` to at most `ceiling` chars, ending in [`TRUNCATION_NOTICE`].
pub fn truncate_with_notice(text: &str, ceiling: usize) -> String {
    if text.chars().count() <= ceiling {
        return text.to_string();
    }
    let notice_len = TRUNCATION_NOTICE.chars().count();
    if ceiling <= notice_len {
        return text.chars().take(ceiling).collect();
    }
    let mut cut: String = text.chars().take(ceiling - notice_len).collect();
    cut.push_str(TRUNCATION_NOTICE);
    cut
}
