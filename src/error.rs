//! Error types for the SMS relay.

use std::time::Duration;

use crate::pipeline::types::Channel;

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Failure reported by an outbound send primitive.
///
/// The primitive decides the class: transport-level trouble is `Transient`,
/// anything a retry cannot fix is `Permanent`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    #[error("transient send failure: {0}")]
    Transient(String),

    #[error("permanent send failure: {0}")]
    Permanent(String),
}

impl SendError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Why a single forwarding branch did not deliver.
#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    #[error("relay to {target} blocked: target is one of this device's own numbers")]
    LoopBlocked { target: String },

    #[error("relay is enabled but no target number is configured")]
    MissingTarget,

    #[error("email is enabled but SMTP credentials are incomplete: {missing}")]
    MissingCredentials { missing: String },

    #[error("email is enabled but the recipient list is empty")]
    NoRecipients,

    #[error("{channel} send failed: {source}")]
    Send {
        channel: Channel,
        #[source]
        source: SendError,
    },

    #[error("{channel} branch cancelled: lease expired")]
    LeaseExpired { channel: Channel },

    #[error("{channel} branch ended without reporting an outcome")]
    Aborted { channel: Channel },
}

impl ForwardError {
    /// Transient failures feed the retry scheduler; everything else is terminal.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Send { source, .. } => source.is_transient(),
            Self::LeaseExpired { .. } | Self::Aborted { .. } => true,
            Self::LoopBlocked { .. }
            | Self::MissingTarget
            | Self::MissingCredentials { .. }
            | Self::NoRecipients => false,
        }
    }
}

/// Resource lease errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LeaseError {
    #[error("lease expired after {after:?}")]
    Expired { after: Duration },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_required_names_key_and_hint() {
        let err = ConfigError::MissingRequired {
            key: "SMS_RELAY_TARGET".into(),
            hint: "Set the number to relay to.".into(),
        };
        assert_eq!(
            err.to_string(),
            "Missing required configuration: SMS_RELAY_TARGET. Set the number to relay to."
        );
    }

    #[test]
    fn send_errors_classify_by_variant() {
        assert!(SendError::Transient("timeout".into()).is_transient());
        assert!(!SendError::Permanent("bad address".into()).is_transient());
    }

    #[test]
    fn policy_violations_are_not_transient() {
        assert!(!ForwardError::LoopBlocked { target: "+43".into() }.is_transient());
        assert!(!ForwardError::MissingTarget.is_transient());
        assert!(!ForwardError::NoRecipients.is_transient());
        assert!(
            !ForwardError::MissingCredentials {
                missing: "host".into()
            }
            .is_transient()
        );
    }

    #[test]
    fn lease_expiry_is_transient() {
        let err = ForwardError::LeaseExpired {
            channel: Channel::Relay,
        };
        assert!(err.is_transient());
    }

    #[test]
    fn send_failure_inherits_classification() {
        let transient = ForwardError::Send {
            channel: Channel::Email,
            source: SendError::Transient("connection reset".into()),
        };
        let permanent = ForwardError::Send {
            channel: Channel::Email,
            source: SendError::Permanent("550 mailbox unavailable".into()),
        };
        assert!(transient.is_transient());
        assert!(!permanent.is_transient());
        assert!(permanent.to_string().contains("email"));
    }
}
