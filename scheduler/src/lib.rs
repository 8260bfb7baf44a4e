//! Request scheduling for crawlq.
//!
//! [`QueueScheduler`] combines a [`DupeFilter`] with one of the queue
//! backends from `crawlq_queue`, chosen through [`SchedulerConfig`].

pub mod backends;
pub mod dupefilter;
pub mod fingerprint;
pub mod queue_scheduler;
pub mod scheduler_trait;
pub mod types;

pub use dupefilter::{DupeFilter, RequestFingerprintFilter};
pub use fingerprint::{canonicalize_url, request_fingerprint, RequestFingerprinter};
pub use queue_scheduler::QueueScheduler;
pub use scheduler_trait::Scheduler;
pub use types::{QueueKind, SchedulerConfig, DEFAULT_BROKER_URL};

#[cfg(test)]
mod tests;
