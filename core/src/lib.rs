pub mod callback;
pub mod context;
pub mod error;
pub mod headers;
pub mod record;
pub mod request;
pub mod response;
pub mod stats;

pub use callback::{Callback, CallbackRef, CallbackRegistry, Component, ComponentId};
pub use context::CrawlContext;
pub use error::{Error, ErrorContext, Result};
pub use headers::Headers;
pub use record::{JsonSerializer, RecordSerializer, RequestRecord};
pub use request::{Cookie, Cookies, Meta, Method, Request, RequestBuilder};
pub use response::{Item, ParseOutput, Response};
pub use stats::{DummyStatsCollector, MemoryStatsCollector, StatsCollector};

/// Re-export commonly used crates
pub use async_trait::async_trait;
pub use serde;
pub use serde_json;
pub use url;
