//! Telephony side — available outbound routes and the inbound fragment feed.

use std::pin::Pin;

use futures::Stream;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

use crate::pipeline::types::{MessageFragment, RouteId};

/// Ordered list of outbound routes the device can currently send on.
pub trait RouteDirectory: Send + Sync {
    fn available_routes(&self) -> Vec<RouteId>;
}

/// Fixed route list, e.g. from `SMS_RELAY_ROUTES=1,2`.
pub struct StaticRoutes {
    routes: Vec<RouteId>,
}

impl StaticRoutes {
    pub fn new(routes: Vec<RouteId>) -> Self {
        Self { routes }
    }

    pub fn from_env() -> Self {
        let routes = std::env::var("SMS_RELAY_ROUTES")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(RouteId::new)
            .collect();
        Self { routes }
    }
}

impl RouteDirectory for StaticRoutes {
    fn available_routes(&self) -> Vec<RouteId> {
        self.routes.clone()
    }
}

/// Stream of receive events; each item is one batch of fragments.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Vec<MessageFragment>> + Send>>;

/// Parse one receive event: a JSON array of fragments, or a single fragment.
pub fn parse_batch(line: &str) -> Result<Vec<MessageFragment>, serde_json::Error> {
    let value: serde_json::Value = serde_json::from_str(line)?;
    if value.is_array() {
        serde_json::from_value(value)
    } else {
        serde_json::from_value(value).map(|frag: MessageFragment| vec![frag])
    }
}

/// Reads receive events as JSON lines.
pub struct FragmentReader;

impl FragmentReader {
    /// Read receive events from stdin.
    pub fn stdin() -> FragmentStream {
        Self::from_reader(tokio::io::stdin())
    }

    /// Read receive events from any async reader until EOF.
    pub fn from_reader<R>(reader: R) -> FragmentStream
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();

        tokio::spawn(async move {
            let mut lines = BufReader::new(reader).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        match parse_batch(line) {
                            Ok(batch) => {
                                if tx.send(batch).is_err() {
                                    break;
                                }
                            }
                            Err(e) => tracing::warn!("Ignoring malformed receive event: {}", e),
                        }
                    }
                    Ok(None) => break, // EOF
                    Err(e) => {
                        tracing::error!("Error reading receive events: {}", e);
                        break;
                    }
                }
            }
        });

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|batch| (batch, rx))
        });

        Box::pin(stream)
    }
}
