//! Resilience utilities shared by the validator and the data sources
//!
//! - Retry policy with exponentially doubling backoff
//! - Fetch gate bounding concurrent requests to a rate-limited upstream

pub mod fetch_gate;
pub mod retry;

pub use fetch_gate::FetchGate;
pub use retry::{RetryOutcome, RetryPolicy};
