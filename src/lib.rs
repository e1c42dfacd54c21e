//! SMS Relay — forwards received SMS to another phone and to email.

pub mod channels;
pub mod config;
pub mod error;
pub mod lease;
pub mod pipeline;
pub mod settings;
pub mod status;
