//! Dispatch fan-out — drives the relay and email branches of one logical
//! message concurrently.
//!
//! Branches run as tasks in a `JoinSet` owned by the dispatch future. The
//! future returns only once every launched branch has finished; dropping it
//! (lease expiry) aborts whatever is still running. Outcomes are written to
//! a [`DispatchLedger`] as each branch finishes, so they survive a
//! cancelled parent.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::channels::{MailSender, RelaySender, RouteDirectory};
use crate::error::ForwardError;
use crate::pipeline::envelope;
use crate::pipeline::loop_guard::LoopGuard;
use crate::pipeline::route::resolve_route;
use crate::pipeline::types::{Channel, LogicalMessage};
use crate::settings::ForwardingPolicy;
use crate::status::StatusPublisher;

/// Final state of one branch.
#[derive(Debug)]
pub enum BranchOutcome {
    Delivered,
    /// Channel switched off in the policy snapshot; nothing was attempted.
    Skipped,
    Failed(ForwardError),
}

impl BranchOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered)
    }
}

impl From<Result<(), ForwardError>> for BranchOutcome {
    fn from(result: Result<(), ForwardError>) -> Self {
        match result {
            Ok(()) => Self::Delivered,
            Err(e) => Self::Failed(e),
        }
    }
}

#[derive(Debug, Default)]
struct LedgerState {
    launched: Vec<Channel>,
    outcomes: HashMap<Channel, BranchOutcome>,
}

/// Shared record of which branches were launched and how they ended.
#[derive(Debug, Clone, Default)]
pub struct DispatchLedger {
    state: Arc<Mutex<LedgerState>>,
}

impl DispatchLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn launch(&self, channel: Channel) {
        self.lock().launched.push(channel);
    }

    fn record(&self, channel: Channel, outcome: BranchOutcome) {
        self.lock().outcomes.insert(channel, outcome);
    }

    /// Drain the ledger into a report.
    ///
    /// Launched branches without an outcome were cancelled: by lease expiry
    /// when `lease_expired`, otherwise by a crash inside the branch.
    pub fn finish(&self, lease_expired: bool) -> DispatchReport {
        let mut state = self.lock();
        let launched = std::mem::take(&mut state.launched);
        let mut outcomes = std::mem::take(&mut state.outcomes);
        drop(state);

        for channel in launched {
            outcomes.entry(channel).or_insert_with(|| {
                BranchOutcome::Failed(if lease_expired {
                    ForwardError::LeaseExpired { channel }
                } else {
                    ForwardError::Aborted { channel }
                })
            });
        }

        let mut outcomes: Vec<_> = outcomes.into_iter().collect();
        outcomes.sort_by_key(|(channel, _)| *channel);
        DispatchReport { outcomes }
    }
}

/// Per-branch outcomes of one dispatch invocation.
#[derive(Debug, Default)]
pub struct DispatchReport {
    pub outcomes: Vec<(Channel, BranchOutcome)>,
}

impl DispatchReport {
    pub fn outcome(&self, channel: Channel) -> Option<&BranchOutcome> {
        self.outcomes
            .iter()
            .find(|(c, _)| *c == channel)
            .map(|(_, outcome)| outcome)
    }
}

/// Launches forwarding branches against the injected send primitives.
pub struct Dispatcher {
    routes: Arc<dyn RouteDirectory>,
    loop_guard: LoopGuard,
    relay: Arc<dyn RelaySender>,
    mail: Arc<dyn MailSender>,
    status: Arc<StatusPublisher>,
}

impl Dispatcher {
    pub fn new(
        routes: Arc<dyn RouteDirectory>,
        loop_guard: LoopGuard,
        relay: Arc<dyn RelaySender>,
        mail: Arc<dyn MailSender>,
        status: Arc<StatusPublisher>,
    ) -> Self {
        Self {
            routes,
            loop_guard,
            relay,
            mail,
            status,
        }
    }

    /// Run the requested branches of `message` and wait for all of them.
    pub async fn dispatch(
        self: &Arc<Self>,
        message: Arc<LogicalMessage>,
        channels: &[Channel],
        policy: Arc<ForwardingPolicy>,
        ledger: DispatchLedger,
    ) {
        let mut branches = JoinSet::new();

        for &channel in channels {
            let enabled = match channel {
                Channel::Relay => policy.relay_enabled,
                Channel::Email => policy.email_enabled,
            };
            if !enabled {
                debug!(channel = %channel, sender = %message.sender, "Channel disabled, branch skipped");
                ledger.record(channel, BranchOutcome::Skipped);
                continue;
            }

            ledger.launch(channel);
            info!(channel = %channel, sender = %message.sender, reference = message.reference, "Branch dispatched");

            let this = Arc::clone(self);
            let message = Arc::clone(&message);
            let policy = Arc::clone(&policy);
            let ledger = ledger.clone();
            branches.spawn(async move {
                let result = match channel {
                    Channel::Relay => this.relay_branch(&message, &policy).await,
                    Channel::Email => this.email_branch(&message, &policy).await,
                };
                match &result {
                    Ok(()) => info!(channel = %channel, sender = %message.sender, "Branch succeeded"),
                    Err(e) => warn!(
                        channel = %channel,
                        sender = %message.sender,
                        transient = e.is_transient(),
                        error = %e,
                        "Branch failed"
                    ),
                }
                ledger.record(channel, result.into());
            });
        }

        while let Some(joined) = branches.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Dispatch branch crashed");
            }
        }
    }

    async fn relay_branch(
        &self,
        message: &LogicalMessage,
        policy: &ForwardingPolicy,
    ) -> Result<(), ForwardError> {
        let target = policy.relay_target.trim();
        if target.is_empty() {
            return Err(ForwardError::MissingTarget);
        }
        if self.loop_guard.is_blocked(target, &policy.own_numbers) {
            return Err(ForwardError::LoopBlocked {
                target: target.to_string(),
            });
        }

        let available = self.routes.available_routes();
        let resolution = resolve_route(policy.route_mode, message.inbound_route.as_ref(), &available);
        if let Some(warning) = &resolution.warning {
            self.status.alert(warning);
        }

        let text = envelope::relay_text(message, policy.max_message_length);
        self.relay
            .send(&resolution.route, target, &text)
            .await
            .map_err(|source| ForwardError::Send {
                channel: Channel::Relay,
                source,
            })
    }

    async fn email_branch(
        &self,
        message: &LogicalMessage,
        policy: &ForwardingPolicy,
    ) -> Result<(), ForwardError> {
        if policy.email_recipients.is_empty() {
            return Err(ForwardError::NoRecipients);
        }
        let missing = policy.smtp.missing_fields();
        if !missing.is_empty() {
            return Err(ForwardError::MissingCredentials {
                missing: missing.join(", "),
            });
        }

        let subject = envelope::email_subject(message);
        let body = envelope::email_body(message);
        self.mail
            .send(&policy.smtp, &policy.email_recipients, &subject, &body)
            .await
            .map_err(|source| ForwardError::Send {
                channel: Channel::Email,
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unfinished_branches_become_lease_expiry() {
        let ledger = DispatchLedger::new();
        ledger.launch(Channel::Relay);
        ledger.launch(Channel::Email);
        ledger.record(Channel::Email, BranchOutcome::Delivered);

        let report = ledger.finish(true);
        assert!(report.outcome(Channel::Email).unwrap().is_delivered());
        assert!(matches!(
            report.outcome(Channel::Relay),
            Some(BranchOutcome::Failed(ForwardError::LeaseExpired { channel: Channel::Relay }))
        ));
    }

    #[test]
    fn unfinished_branch_without_expiry_is_aborted() {
        let ledger = DispatchLedger::new();
        ledger.launch(Channel::Relay);
        let report = ledger.finish(false);
        match report.outcome(Channel::Relay) {
            Some(BranchOutcome::Failed(e)) => {
                assert!(matches!(e, ForwardError::Aborted { .. }));
                assert!(e.is_transient());
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn report_is_sorted_by_channel() {
        let ledger = DispatchLedger::new();
        ledger.record(Channel::Email, BranchOutcome::Skipped);
        ledger.record(Channel::Relay, BranchOutcome::Delivered);
        let report = ledger.finish(false);
        let channels: Vec<_> = report.outcomes.iter().map(|(c, _)| *c).collect();
        assert_eq!(channels, vec![Channel::Relay, Channel::Email]);
    }

    #[test]
    fn result_converts_to_outcome() {
        assert!(BranchOutcome::from(Ok(())).is_delivered());
        assert!(matches!(
            BranchOutcome::from(Err(ForwardError::NoRecipients)),
            BranchOutcome::Failed(ForwardError::NoRecipients)
        ));
    }
}
