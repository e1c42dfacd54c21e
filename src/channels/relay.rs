//! Relay channel — device-to-device forwarding through an SMS gateway.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::SendError;
use crate::pipeline::types::OutboundRoute;

/// Longest text that fits a single SMS.
pub const SINGLE_SEGMENT_LEN: usize = 160;

/// Payload per segment once a text has to be concatenated (UDH overhead).
pub const CONCAT_SEGMENT_LEN: usize = 153;

/// Outbound send primitive for the relay channel.
///
/// Implementations split long payloads themselves.
#[async_trait]
pub trait RelaySender: Send + Sync {
    async fn send(&self, route: &OutboundRoute, target: &str, text: &str) -> Result<(), SendError>;
}

/// Split `text` into SMS-sized segments on char boundaries.
pub fn split_segments(text: &str) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= SINGLE_SEGMENT_LEN {
        return vec![text.to_string()];
    }
    chars
        .chunks(CONCAT_SEGMENT_LEN)
        .map(|chunk| chunk.iter().collect())
        .collect()
}

#[derive(Debug, Serialize)]
struct GatewayRequest<'a> {
    /// `None` lets the gateway use its default line.
    route: Option<&'a str>,
    to: &'a str,
    parts: Vec<String>,
}

/// Relay sender backed by an HTTP SMS gateway (`POST {base}/send`).
pub struct HttpRelaySender {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpRelaySender {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, SendError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SendError::Permanent(format!("HTTP client setup failed: {e}")))?;
        Ok(Self {
            client,
            endpoint: format!("{}/send", base_url.trim_end_matches('/')),
        })
    }

    /// Build from `SMS_RELAY_GATEWAY_URL`. Returns `None` when unset.
    pub fn from_env() -> Option<Result<Self, SendError>> {
        let url = std::env::var("SMS_RELAY_GATEWAY_URL").ok()?;
        let timeout_secs: u64 = std::env::var("SMS_RELAY_GATEWAY_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(20);
        Some(Self::new(&url, Duration::from_secs(timeout_secs)))
    }
}

/// Map a gateway HTTP status to a send outcome.
pub fn classify_status(status: reqwest::StatusCode) -> Result<(), SendError> {
    if status.is_success() {
        Ok(())
    } else if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        Err(SendError::Transient(format!("gateway returned {status}")))
    } else {
        Err(SendError::Permanent(format!("gateway rejected message: {status}")))
    }
}

#[async_trait]
impl RelaySender for HttpRelaySender {
    async fn send(&self, route: &OutboundRoute, target: &str, text: &str) -> Result<(), SendError> {
        let request = GatewayRequest {
            route: match route {
                OutboundRoute::Specific(id) => Some(id.as_str()),
                OutboundRoute::SystemDefault => None,
            },
            to: target,
            parts: split_segments(text),
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_builder() {
                    SendError::Permanent(format!("invalid gateway request: {e}"))
                } else {
                    SendError::Transient(format!("gateway unreachable: {e}"))
                }
            })?;

        classify_status(response.status())?;
        tracing::info!(to = %target, route = %route, parts = request.parts.len(), "Relay SMS handed to gateway");
        Ok(())
    }
}

/// Stand-in when no gateway is configured; every send fails permanently.
pub struct UnconfiguredRelay;

#[async_trait]
impl RelaySender for UnconfiguredRelay {
    async fn send(&self, _route: &OutboundRoute, _target: &str, _text: &str) -> Result<(), SendError> {
        Err(SendError::Permanent(
            "no SMS gateway configured (set SMS_RELAY_GATEWAY_URL)".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unconfigured_relay_fails_permanently() {
        let err = UnconfiguredRelay
            .send(&OutboundRoute::SystemDefault, "+43664", "hi")
            .await
            .unwrap_err();
        assert!(!err.is_transient());
    }

    #[test]
    fn short_text_is_one_segment() {
        assert_eq!(split_segments("hello"), vec!["hello"]);
        let exact = "x".repeat(SINGLE_SEGMENT_LEN);
        assert_eq!(split_segments(&exact).len(), 1);
    }

    #[test]
    fn long_text_uses_concat_segments() {
        let text = "y".repeat(SINGLE_SEGMENT_LEN + 1);
        let parts = split_segments(&text);
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].chars().count(), CONCAT_SEGMENT_LEN);
        assert_eq!(parts.concat(), text);
    }

    #[test]
    fn multibyte_text_splits_on_char_boundaries() {
        let text = "ü".repeat(200);
        let parts = split_segments(&text);
        assert_eq!(parts.concat(), text);
        assert!(parts.iter().all(|p| p.chars().count() <= CONCAT_SEGMENT_LEN));
    }

    #[test]
    fn status_classification() {
        assert!(classify_status(reqwest::StatusCode::OK).is_ok());
        assert!(classify_status(reqwest::StatusCode::BAD_GATEWAY).unwrap_err().is_transient());
        assert!(classify_status(reqwest::StatusCode::TOO_MANY_REQUESTS).unwrap_err().is_transient());
        assert!(!classify_status(reqwest::StatusCode::BAD_REQUEST).unwrap_err().is_transient());
    }

    #[test]
    fn endpoint_strips_trailing_slash() {
        let sender = HttpRelaySender::new("http://gateway.local:8080/", Duration::from_secs(5)).unwrap();
        assert_eq!(sender.endpoint, "http://gateway.local:8080/send");
    }
}
