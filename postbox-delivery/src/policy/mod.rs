//! Policies applied by the delivery engine.
//!
//! - [`RetryPolicy`]: backoff between attempts and the dead-letter ceiling

pub mod retry;

pub use retry::RetryPolicy;
