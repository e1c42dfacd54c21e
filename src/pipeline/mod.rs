//! SMS forwarding pipeline.
//!
//! Every receive event from the telephony subsystem flows through:
//! 1. `assembler::assemble()` — fragments to logical messages
//! 2. `Dispatcher::dispatch()` — concurrent relay and email branches
//! 3. `RetryScheduler` — bounded re-dispatch of transiently failed branches
//!
//! The whole event runs under one lease from `crate::lease::ResourceGuard`.
//! Relay branches pass `loop_guard` and `route` before anything is sent.

pub mod assembler;
pub mod dispatch;
pub mod envelope;
pub mod loop_guard;
pub mod processor;
pub mod retry;
pub mod route;
pub mod types;

pub use processor::{ForwardingPipeline, PipelineDeps, ReceiveSummary};
