//! Batch delivery of queued mail.
//!
//! A [`DeliveryEngine`] run selects the due records, groups them by the SMTP
//! settings they are sent with, opens one relay session per group and hands
//! each record off. Every failure is classified into a [`DeliveryError`] and
//! remediated per record: retried later with backoff, stripped of a broken
//! override, left alone, or dead-lettered once the retry ceiling is passed.
//! Sent records are archived and removed from the queue.

pub mod classifier;
mod config;
mod engine;
mod error;
pub mod grouper;
pub mod policy;
mod report;
pub mod session;

pub use config::DeliveryConfig;
pub use engine::{DeliveryEngine, RunState};
pub use error::{DeliveryError, EngineError, ErrorKind};
pub use policy::RetryPolicy;
pub use report::RunReport;
pub use session::SmtpSession;
