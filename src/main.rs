use std::sync::Arc;

use anyhow::Context;
use futures::StreamExt;

use sms_relay::channels::{
    FragmentReader, HttpRelaySender, RelaySender, SmtpMailSender, StaticRoutes, UnconfiguredRelay,
};
use sms_relay::config::PipelineConfig;
use sms_relay::lease::ProcessWakeLock;
use sms_relay::pipeline::loop_guard::LooseNumberMatcher;
use sms_relay::pipeline::{ForwardingPipeline, PipelineDeps};
use sms_relay::settings::{ForwardingPolicy, SharedPolicy};
use sms_relay::status::ConsoleNotifier;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = PipelineConfig::from_env();
    let policy = ForwardingPolicy::from_env().context("Invalid forwarding settings")?;

    eprintln!("📨 SMS Relay v{}", env!("CARGO_PKG_VERSION"));
    eprintln!(
        "   Lease: {}s (ceiling {}s), retry base {}s, max attempts {}",
        config.lease_duration.as_secs(),
        config.lease_ceiling.as_secs(),
        config.retry_base_delay.as_secs(),
        policy.max_attempts,
    );

    let relay: Arc<dyn RelaySender> = match HttpRelaySender::from_env() {
        Some(sender) => Arc::new(sender.context("Failed to set up SMS gateway client")?),
        None => {
            if policy.relay_enabled {
                tracing::warn!("Relay enabled but SMS_RELAY_GATEWAY_URL is not set; relay sends will fail");
            }
            Arc::new(UnconfiguredRelay)
        }
    };

    let routes = StaticRoutes::from_env();
    let pipeline = ForwardingPipeline::new(
        config.clone(),
        PipelineDeps {
            policy: Arc::new(SharedPolicy::new(policy)),
            routes: Arc::new(routes),
            numbers: Arc::new(LooseNumberMatcher::new()),
            relay,
            mail: Arc::new(SmtpMailSender::new()),
            notifier: Arc::new(ConsoleNotifier),
            wake_lock: Arc::new(ProcessWakeLock),
        },
    );
    pipeline.policy_changed();

    eprintln!("   Reading receive events from stdin (one JSON line per event)\n");

    let mut events = FragmentReader::stdin();
    loop {
        tokio::select! {
            batch = events.next() => {
                let Some(batch) = batch else { break };
                let summary = pipeline.on_receive(batch).await;
                tracing::info!(
                    assembled = summary.assembled,
                    skipped = summary.skipped_fragments,
                    "Receive event handled"
                );
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break;
            }
        }
    }

    // Give scheduled retries a bounded chance to finish before exit
    pipeline.drain(config.lease_ceiling).await;
    Ok(())
}
