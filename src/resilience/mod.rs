//! Resilience helpers.
//!
//! Connection establishment retries with exponential backoff. Runtime
//! operations deliberately do not retry here: the client surfaces store
//! errors to its caller, and the synchronizer's own loop is already an
//! infinite retry with pacing hooks.

pub mod retry;

pub use retry::{retry, RetryConfig};
