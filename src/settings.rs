//! Forwarding policy — the settings snapshot read at every dispatch attempt.

use std::str::FromStr;
use std::sync::{Arc, RwLock};

use secrecy::{ExposeSecret, SecretString};

use crate::error::ConfigError;

/// Default ceiling for a single relayed text (ten concatenated segments).
pub const DEFAULT_MAX_MESSAGE_LENGTH: usize = 1600;

/// Default number of dispatch invocations per message and channel.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Which line the relay channel sends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RouteSelectionMode {
    /// Reply on the line the message arrived on.
    #[default]
    SameAsInbound,
    AlwaysRouteA,
    AlwaysRouteB,
}

impl FromStr for RouteSelectionMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "same" | "same_as_inbound" | "inbound" => Ok(Self::SameAsInbound),
            "a" | "route_a" | "sim1" => Ok(Self::AlwaysRouteA),
            "b" | "route_b" | "sim2" => Ok(Self::AlwaysRouteB),
            other => Err(ConfigError::InvalidValue {
                key: "SMS_RELAY_ROUTE_MODE".into(),
                message: format!("unknown route mode '{other}' (expected same_as_inbound, route_a or route_b)"),
            }),
        }
    }
}

/// SMTP account used by the email channel.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    pub from_address: String,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 587,
            username: String::new(),
            password: SecretString::from(String::new()),
            from_address: String::new(),
        }
    }
}

impl SmtpConfig {
    /// Names of required fields that are blank.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.host.trim().is_empty() {
            missing.push("host");
        }
        if self.username.trim().is_empty() {
            missing.push("username");
        }
        if self.password.expose_secret().is_empty() {
            missing.push("password");
        }
        if self.sender_address().trim().is_empty() {
            missing.push("from address");
        }
        missing
    }

    /// Address mail is sent from; falls back to the login name.
    pub fn sender_address(&self) -> &str {
        if self.from_address.trim().is_empty() {
            &self.username
        } else {
            &self.from_address
        }
    }
}

/// Snapshot of everything the pipeline reads from settings.
#[derive(Debug, Clone)]
pub struct ForwardingPolicy {
    pub relay_enabled: bool,
    pub relay_target: String,
    pub email_enabled: bool,
    pub email_recipients: Vec<String>,
    pub smtp: SmtpConfig,
    pub route_mode: RouteSelectionMode,
    /// Ceiling for one relayed text, in characters.
    pub max_message_length: usize,
    pub max_attempts: u32,
    /// This device's own numbers, for loop prevention.
    pub own_numbers: Vec<String>,
}

impl Default for ForwardingPolicy {
    fn default() -> Self {
        Self {
            relay_enabled: false,
            relay_target: String::new(),
            email_enabled: false,
            email_recipients: Vec::new(),
            smtp: SmtpConfig::default(),
            route_mode: RouteSelectionMode::default(),
            max_message_length: DEFAULT_MAX_MESSAGE_LENGTH,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            own_numbers: Vec::new(),
        }
    }
}

impl ForwardingPolicy {
    /// Build the policy from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the policy from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let flag = |key: &str| {
            lookup(key)
                .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
                .unwrap_or(false)
        };
        let list = |key: &str| -> Vec<String> {
            lookup(key)
                .unwrap_or_default()
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        };

        let route_mode: RouteSelectionMode = lookup("SMS_RELAY_ROUTE_MODE")
            .map(|v| v.parse::<RouteSelectionMode>())
            .transpose()?
            .unwrap_or_default();

        let max_attempts: u32 = lookup("SMS_RELAY_MAX_ATTEMPTS")
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(DEFAULT_MAX_ATTEMPTS);
        if max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                key: "SMS_RELAY_MAX_ATTEMPTS".into(),
                message: "must be at least 1".into(),
            });
        }

        let relay_enabled = flag("SMS_RELAY_ENABLED");
        let relay_target = lookup("SMS_RELAY_TARGET").unwrap_or_default().trim().to_string();
        if relay_enabled && relay_target.is_empty() {
            return Err(ConfigError::MissingRequired {
                key: "SMS_RELAY_TARGET".into(),
                hint: "Set the number to relay to, or unset SMS_RELAY_ENABLED.".into(),
            });
        }

        let email_enabled = flag("SMS_RELAY_EMAIL_ENABLED");
        let email_recipients = list("SMS_RELAY_EMAIL_RECIPIENTS");
        if email_enabled && email_recipients.is_empty() {
            return Err(ConfigError::MissingRequired {
                key: "SMS_RELAY_EMAIL_RECIPIENTS".into(),
                hint: "Give at least one address, or unset SMS_RELAY_EMAIL_ENABLED.".into(),
            });
        }

        let username = lookup("SMS_RELAY_SMTP_USERNAME").unwrap_or_default();
        let smtp = SmtpConfig {
            host: lookup("SMS_RELAY_SMTP_HOST").unwrap_or_default(),
            port: lookup("SMS_RELAY_SMTP_PORT")
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(587),
            from_address: lookup("SMS_RELAY_SMTP_FROM").unwrap_or_else(|| username.clone()),
            username,
            password: SecretString::from(lookup("SMS_RELAY_SMTP_PASSWORD").unwrap_or_default()),
        };

        Ok(Self {
            relay_enabled,
            relay_target,
            email_enabled,
            email_recipients,
            smtp,
            route_mode,
            max_message_length: lookup("SMS_RELAY_MAX_LENGTH")
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(DEFAULT_MAX_MESSAGE_LENGTH),
            max_attempts,
            own_numbers: list("SMS_RELAY_OWN_NUMBERS"),
        })
    }

    /// Whether any forwarding channel is switched on.
    pub fn is_forwarding(&self) -> bool {
        self.relay_enabled || self.email_enabled
    }
}

/// Read-only access to the current policy.
pub trait PolicySource: Send + Sync {
    fn snapshot(&self) -> Arc<ForwardingPolicy>;
}

/// In-memory policy that can be swapped at runtime.
pub struct SharedPolicy {
    current: RwLock<Arc<ForwardingPolicy>>,
}

impl SharedPolicy {
    pub fn new(policy: ForwardingPolicy) -> Self {
        Self {
            current: RwLock::new(Arc::new(policy)),
        }
    }

    /// Replace the policy. Attempts already in flight keep their snapshot.
    pub fn replace(&self, policy: ForwardingPolicy) {
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        *guard = Arc::new(policy);
    }
}

impl PolicySource for SharedPolicy {
    fn snapshot(&self) -> Arc<ForwardingPolicy> {
        let guard = self.current.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&*guard)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_environment_gives_defaults() {
        let policy = ForwardingPolicy::from_lookup(|_| None).unwrap();
        assert!(!policy.relay_enabled);
        assert!(!policy.email_enabled);
        assert_eq!(policy.route_mode, RouteSelectionMode::SameAsInbound);
        assert_eq!(policy.max_attempts, DEFAULT_MAX_ATTEMPTS);
        assert_eq!(policy.max_message_length, DEFAULT_MAX_MESSAGE_LENGTH);
        assert!(!policy.is_forwarding());
    }

    #[test]
    fn full_environment_is_parsed() {
        let policy = ForwardingPolicy::from_lookup(lookup_from(&[
            ("SMS_RELAY_ENABLED", "true"),
            ("SMS_RELAY_TARGET", " +436641234567 "),
            ("SMS_RELAY_EMAIL_ENABLED", "1"),
            ("SMS_RELAY_EMAIL_RECIPIENTS", "a@example.com, b@example.com,"),
            ("SMS_RELAY_SMTP_HOST", "smtp.example.com"),
            ("SMS_RELAY_SMTP_PORT", "465"),
            ("SMS_RELAY_SMTP_USERNAME", "relay@example.com"),
            ("SMS_RELAY_SMTP_PASSWORD", "hunter2"),
            ("SMS_RELAY_ROUTE_MODE", "route_b"),
            ("SMS_RELAY_MAX_ATTEMPTS", "5"),
            ("SMS_RELAY_OWN_NUMBERS", "+43664000001,+43664000002"),
        ]))
        .unwrap();

        assert!(policy.relay_enabled);
        assert_eq!(policy.relay_target, "+436641234567");
        assert_eq!(policy.email_recipients, vec!["a@example.com", "b@example.com"]);
        assert_eq!(policy.smtp.port, 465);
        assert_eq!(policy.smtp.sender_address(), "relay@example.com");
        assert!(policy.smtp.missing_fields().is_empty());
        assert_eq!(policy.route_mode, RouteSelectionMode::AlwaysRouteB);
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.own_numbers.len(), 2);
    }

    #[test]
    fn unknown_route_mode_is_rejected() {
        let err = ForwardingPolicy::from_lookup(lookup_from(&[("SMS_RELAY_ROUTE_MODE", "sim7")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn zero_attempts_is_rejected() {
        let err = ForwardingPolicy::from_lookup(lookup_from(&[("SMS_RELAY_MAX_ATTEMPTS", "0")]))
            .unwrap_err();
        assert!(err.to_string().contains("SMS_RELAY_MAX_ATTEMPTS"));
    }

    #[test]
    fn enabled_relay_without_target_is_rejected() {
        let err = ForwardingPolicy::from_lookup(lookup_from(&[
            ("SMS_RELAY_ENABLED", "yes"),
            ("SMS_RELAY_TARGET", "  "),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::MissingRequired { ref key, .. } if key == "SMS_RELAY_TARGET"));
    }

    #[test]
    fn enabled_email_without_recipients_is_rejected() {
        let err = ForwardingPolicy::from_lookup(lookup_from(&[("SMS_RELAY_EMAIL_ENABLED", "on")]))
            .unwrap_err();
        assert!(err.to_string().contains("SMS_RELAY_EMAIL_RECIPIENTS"));
    }

    #[test]
    fn disabled_channels_need_no_details() {
        let policy =
            ForwardingPolicy::from_lookup(lookup_from(&[("SMS_RELAY_ENABLED", "false")])).unwrap();
        assert!(!policy.is_forwarding());
    }

    #[test]
    fn route_mode_aliases() {
        assert_eq!("SIM1".parse::<RouteSelectionMode>().unwrap(), RouteSelectionMode::AlwaysRouteA);
        assert_eq!("b".parse::<RouteSelectionMode>().unwrap(), RouteSelectionMode::AlwaysRouteB);
        assert_eq!("same".parse::<RouteSelectionMode>().unwrap(), RouteSelectionMode::SameAsInbound);
    }

    #[test]
    fn missing_smtp_fields_are_named() {
        let smtp = SmtpConfig {
            host: "smtp.example.com".into(),
            ..SmtpConfig::default()
        };
        assert_eq!(smtp.missing_fields(), vec!["username", "password", "from address"]);
    }

    #[test]
    fn smtp_password_is_redacted_in_debug() {
        let smtp = SmtpConfig {
            password: SecretString::from("hunter2".to_string()),
            ..SmtpConfig::default()
        };
        assert!(!format!("{smtp:?}").contains("hunter2"));
    }

    #[test]
    fn shared_policy_replace_is_visible_to_next_snapshot() {
        let shared = SharedPolicy::new(ForwardingPolicy::default());
        let before = shared.snapshot();
        shared.replace(ForwardingPolicy {
            relay_enabled: true,
            ..ForwardingPolicy::default()
        });
        assert!(!before.relay_enabled);
        assert!(shared.snapshot().relay_enabled);
    }
}
