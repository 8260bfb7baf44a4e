//! # crawlq
//!
//! crawlq schedules crawl requests. It decides which request runs next,
//! drops requests that were already scheduled, and keeps pending work in
//! memory, in a job directory on disk, or on a message broker shared by
//! several worker processes.
//!
//! ## Components
//!
//! - **Core**: the `Request` entity, deferred callbacks and the record format.
//! - **Queue**: memory, disk and broker queue backends.
//! - **Scheduler**: fingerprinting, duplicate filtering and the scheduler itself.
//! - **Settings**: configuration files and their mapping to scheduler options.
//!
//! ## Example
//!
//! ```rust,no_run
//! use crawlq::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     env_logger::init();
//!
//!     let settings = Settings::from_python("JOBDIR = 'jobs/news'").map_err(|e| Error::config(e.to_string()))?;
//!     let scheduler = QueueScheduler::new(scheduler_config_from_settings(&settings)?);
//!     scheduler.open(CrawlContext::new("news")).await?;
//!
//!     scheduler.enqueue(Request::get("https://example.com/")?).await?;
//!     while let Some(request) = scheduler.dequeue().await? {
//!         println!("{}", request);
//!     }
//!
//!     scheduler.close("finished").await
//! }
//! ```

pub use crawlq_core as core;
pub use crawlq_queue as queue;
pub use crawlq_scheduler as scheduler;

// Settings module for configuration management
pub mod settings;

// Config adapters module
pub mod config_adapters;

/// Prelude module that re-exports commonly used types
pub mod prelude {
    pub use crawlq_core::callback::{Callback, CallbackRef, CallbackRegistry, Component, ComponentId};
    pub use crawlq_core::context::CrawlContext;
    pub use crawlq_core::error::{Error, Result};
    pub use crawlq_core::record::{JsonSerializer, RecordSerializer};
    pub use crawlq_core::request::{Method, Request};
    pub use crawlq_core::response::{Item, ParseOutput, Response};
    pub use crawlq_core::stats::{MemoryStatsCollector, StatsCollector};
    pub use crawlq_queue::{Broker, MemoryBroker, QueueBackend, RedisBroker};
    pub use crawlq_scheduler::{
        request_fingerprint, DupeFilter, QueueKind, QueueScheduler, RequestFingerprinter,
        Scheduler, SchedulerConfig,
    };

    pub use crate::config_adapters::{crawl_context_from_settings, scheduler_config_from_settings};
    pub use crate::settings::{Settings, SettingsError, SettingsFormat};
}
