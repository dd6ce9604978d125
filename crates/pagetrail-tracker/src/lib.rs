//! Client-side visit lifecycle tracking.
//!
//! [`machine::SessionTracker`] is the state machine of one browsing context.
//! [`driver::run_tracker`] gives it a clock and a transport.

pub mod client;
pub mod driver;
pub mod machine;

pub use client::{HttpIngestClient, IngestClient};
pub use driver::{run_tracker, TrackerHandle, TrackerInput};
pub use machine::{CloseTrigger, SessionTracker, TrackerCommand, TrackerConfig, TrackerState};
