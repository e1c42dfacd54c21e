//! Forwarding pipeline — one receive event from fragments to settled outcomes.
//!
//! Flow per receive event, all under one stay-awake lease:
//! 1. Assemble fragments into logical messages (synchronously, before any send)
//! 2. Fan out every message to its enabled channels
//! 3. Settle each branch: clear retry state, schedule a retry, or alert
//! 4. Republish the status summary
//!
//! Retries re-enter step 2 for the failed channel only, under their own lease.

use std::sync::Arc;
use std::time::Duration;

use futures::future::{join_all, BoxFuture};
use tracing::{info, warn};

use crate::channels::{MailSender, RelaySender, RouteDirectory};
use crate::config::PipelineConfig;
use crate::lease::{Lease, ResourceGuard, WakeLock};
use crate::pipeline::assembler::assemble;
use crate::pipeline::dispatch::{BranchOutcome, DispatchLedger, DispatchReport, Dispatcher};
use crate::pipeline::loop_guard::{LoopGuard, NumberMatcher};
use crate::pipeline::retry::{RetryDecision, RetryKey, RetryScheduler};
use crate::pipeline::types::{Channel, LogicalMessage, MessageFragment};
use crate::settings::{ForwardingPolicy, PolicySource};
use crate::status::{Notifier, StatusPublisher};

/// External collaborators, injected at construction.
pub struct PipelineDeps {
    pub policy: Arc<dyn PolicySource>,
    pub routes: Arc<dyn RouteDirectory>,
    pub numbers: Arc<dyn NumberMatcher>,
    pub relay: Arc<dyn RelaySender>,
    pub mail: Arc<dyn MailSender>,
    pub notifier: Arc<dyn Notifier>,
    pub wake_lock: Arc<dyn WakeLock>,
}

/// What happened to one receive event.
#[derive(Debug, Default)]
pub struct ReceiveSummary {
    pub assembled: usize,
    pub skipped_fragments: usize,
    /// One report per assembled message, in assembly order.
    pub reports: Vec<DispatchReport>,
}

/// The message-forwarding pipeline.
pub struct ForwardingPipeline {
    config: PipelineConfig,
    policy: Arc<dyn PolicySource>,
    dispatcher: Arc<Dispatcher>,
    retries: Arc<RetryScheduler>,
    guard: ResourceGuard,
    status: Arc<StatusPublisher>,
}

impl ForwardingPipeline {
    pub fn new(config: PipelineConfig, deps: PipelineDeps) -> Arc<Self> {
        let status = Arc::new(StatusPublisher::new(deps.notifier));
        let dispatcher = Arc::new(Dispatcher::new(
            deps.routes,
            LoopGuard::new(deps.numbers),
            deps.relay,
            deps.mail,
            Arc::clone(&status),
        ));
        let retries = RetryScheduler::new(config.retry_base_delay);
        let guard = ResourceGuard::new(deps.wake_lock, config.lease_ceiling);

        Arc::new(Self {
            config,
            policy: deps.policy,
            dispatcher,
            retries,
            guard,
            status,
        })
    }

    /// Handle one receive event from the telephony subsystem.
    pub async fn on_receive(self: &Arc<Self>, fragments: Vec<MessageFragment>) -> ReceiveSummary {
        let lease = self.guard.acquire(self.config.lease_duration);

        let assembled = assemble(fragments);
        let skipped_fragments = assembled.skipped;
        if assembled.messages.is_empty() {
            info!(skipped = skipped_fragments, "Receive event produced no forwardable message");
            return ReceiveSummary {
                skipped_fragments,
                ..ReceiveSummary::default()
            };
        }

        let messages: Vec<Arc<LogicalMessage>> =
            assembled.messages.into_iter().map(Arc::new).collect();
        let reports = self.run_dispatch(&lease, &messages, &Channel::ALL).await;

        ReceiveSummary {
            assembled: messages.len(),
            skipped_fragments,
            reports,
        }
    }

    /// Republish the status after a settings change.
    pub fn policy_changed(&self) {
        self.status.publish(&self.policy.snapshot());
    }

    pub fn retries(&self) -> &Arc<RetryScheduler> {
        &self.retries
    }

    /// Wait up to `max_wait` for scheduled retries to finish, then drop the rest.
    pub async fn drain(&self, max_wait: Duration) {
        let deadline = tokio::time::Instant::now() + max_wait;
        while self.retries.pending_count().await > 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        self.retries.clear_all().await;
    }

    /// Fan out `messages` on `channels` under `lease`, then settle every branch.
    async fn run_dispatch(
        self: &Arc<Self>,
        lease: &Lease,
        messages: &[Arc<LogicalMessage>],
        channels: &[Channel],
    ) -> Vec<DispatchReport> {
        // Re-read on every attempt; settings may change between retries.
        let policy = self.policy.snapshot();
        let ledgers: Vec<DispatchLedger> = messages.iter().map(|_| DispatchLedger::new()).collect();

        let work = join_all(messages.iter().zip(&ledgers).map(|(message, ledger)| {
            self.dispatcher.dispatch(
                Arc::clone(message),
                channels,
                Arc::clone(&policy),
                ledger.clone(),
            )
        }));
        let expired = lease.run(work).await.is_err();
        if expired {
            warn!(messages = messages.len(), "Dispatch cut short by lease expiry");
        }

        let mut reports = Vec::with_capacity(messages.len());
        for (message, ledger) in messages.iter().zip(&ledgers) {
            let report = ledger.finish(expired);
            self.settle(message, &report, &policy).await;
            reports.push(report);
        }

        self.status.publish(&policy);
        reports
    }

    /// Update retry state and notify the user according to each branch outcome.
    async fn settle(
        self: &Arc<Self>,
        message: &Arc<LogicalMessage>,
        report: &DispatchReport,
        policy: &ForwardingPolicy,
    ) {
        let message_key = message.key();
        for (channel, outcome) in &report.outcomes {
            let key = RetryKey::new(message_key.clone(), *channel);
            match outcome {
                BranchOutcome::Delivered | BranchOutcome::Skipped => {
                    self.retries.clear(&key).await;
                }
                BranchOutcome::Failed(err) if err.is_transient() => {
                    match self.retries.record_failure(&key, policy.max_attempts).await {
                        RetryDecision::Retry { .. } => {
                            let task = Arc::clone(self).retry_branch(Arc::clone(message), *channel);
                            self.retries.schedule(key, task);
                        }
                        RetryDecision::Exhausted { attempts } => {
                            self.status.alert(&format!(
                                "Could not forward SMS from {} via {} after {} attempts: {}",
                                message.sender, channel, attempts, err
                            ));
                        }
                    }
                }
                BranchOutcome::Failed(err) => {
                    self.retries.clear(&key).await;
                    self.status.alert(&format!(
                        "Could not forward SMS from {} via {}: {}",
                        message.sender, channel, err
                    ));
                }
            }
        }
    }

    /// Re-dispatch one channel of `message` under a fresh lease.
    fn retry_branch(self: Arc<Self>, message: Arc<LogicalMessage>, channel: Channel) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            info!(sender = %message.sender, channel = %channel, "Retrying branch");
            let lease = self.guard.acquire(self.config.lease_duration);
            self.run_dispatch(&lease, std::slice::from_ref(&message), &[channel])
                .await;
        })
    }
}
