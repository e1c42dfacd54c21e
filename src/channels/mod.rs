//! Channel adapters — outbound send primitives and the inbound telephony feed.

pub mod email;
pub mod relay;
pub mod telephony;

pub use email::{MailSender, SmtpMailSender};
pub use relay::{HttpRelaySender, RelaySender, UnconfiguredRelay};
pub use telephony::{FragmentReader, FragmentStream, RouteDirectory, StaticRoutes};
