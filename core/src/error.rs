use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;
use url::ParseError;
use serde::{Deserialize, Serialize};

/// Error context information
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorContext {
    /// URL associated with the error
    pub url: Option<String>,

    /// Spider name
    pub spider_name: Option<String>,

    /// Component where the error occurred
    pub component: Option<String>,

    /// Additional metadata
    pub metadata: BTreeMap<String, String>,
}

impl ErrorContext {
    /// Create a new error context
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the URL
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Set the spider name
    pub fn with_spider_name(mut self, spider_name: impl Into<String>) -> Self {
        self.spider_name = Some(spider_name.into());
        self
    }

    /// Set the component
    pub fn with_component(mut self, component: impl Into<String>) -> Self {
        self.component = Some(component.into());
        self
    }

    /// Add metadata
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    fn is_empty(&self) -> bool {
        self.url.is_none()
            && self.spider_name.is_none()
            && self.component.is_none()
            && self.metadata.is_empty()
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return Ok(());
        }

        let mut parts = Vec::new();

        if let Some(ref url) = self.url {
            parts.push(format!("url={}", url));
        }

        if let Some(ref spider_name) = self.spider_name {
            parts.push(format!("spider={}", spider_name));
        }

        if let Some(ref component) = self.component {
            parts.push(format!("component={}", component));
        }

        for (key, value) in &self.metadata {
            parts.push(format!("{}={}", key, value));
        }

        write!(f, "({})", parts.join(", "))
    }
}

/// Error types for the crawl scheduler
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// Error when parsing a URL
    #[error("URL parse error: {0}")]
    UrlParseError(#[from] ParseError),

    /// A request was built from malformed input
    #[error("Invalid request: {message}")]
    InvalidRequest {
        /// Error message
        message: String,
    },

    /// Invalid configuration, unknown backend, unusable job directory
    #[error("Configuration error: {message}")]
    Config {
        /// Error message
        message: String,
    },

    /// A record could not be encoded or decoded
    #[error("Serialization error: {message} {context}")]
    Serialization {
        /// Error message
        message: String,
        /// Error context
        context: ErrorContext,
    },

    /// A callback reference could not be bound to a live handler
    #[error("Cannot resolve callback {reference}: {message}")]
    Resolution {
        /// The reference that failed, as `path::Type.method`
        reference: String,
        /// Error message
        message: String,
    },

    /// Error talking to the message broker
    #[error("Broker error: {message}")]
    Broker {
        /// Error message
        message: String,
    },

    /// Error in the scheduler
    #[error("Scheduler error: {message} {context}")]
    Scheduler {
        /// Error message
        message: String,
        /// Error context
        context: ErrorContext,
    },

    /// IO error
    #[error("IO error: {0}")]
    IoError(String),

    /// Generic error
    #[error("{message} {context}")]
    Other {
        /// Error message
        message: String,
        /// Error context
        context: ErrorContext,
    },
}

impl Error {
    /// Create a new malformed-input error
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Create a new configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a new serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
            context: ErrorContext::new(),
        }
    }

    /// Create a new callback resolution error
    pub fn resolution(reference: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Resolution {
            reference: reference.into(),
            message: message.into(),
        }
    }

    /// Create a new broker error
    pub fn broker(message: impl Into<String>) -> Self {
        Self::Broker {
            message: message.into(),
        }
    }

    /// Create a new scheduler error
    pub fn scheduler(message: impl Into<String>) -> Self {
        Self::Scheduler {
            message: message.into(),
            context: ErrorContext::new(),
        }
    }

    /// Create a new generic error
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other {
            message: message.into(),
            context: ErrorContext::new(),
        }
    }

    /// Get the error context
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Self::Serialization { context, .. } => Some(context),
            Self::Scheduler { context, .. } => Some(context),
            Self::Other { context, .. } => Some(context),
            _ => None,
        }
    }

    /// Get a mutable reference to the error context
    pub fn context_mut(&mut self) -> Option<&mut ErrorContext> {
        match self {
            Self::Serialization { context, .. } => Some(context),
            Self::Scheduler { context, .. } => Some(context),
            Self::Other { context, .. } => Some(context),
            _ => None,
        }
    }

    /// Set the error context
    pub fn with_context(mut self, context: ErrorContext) -> Self {
        if let Some(ctx) = self.context_mut() {
            *ctx = context;
        }
        self
    }

    /// Set the URL in the error context
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        if let Some(ctx) = self.context_mut() {
            ctx.url = Some(url.into());
        }
        self
    }

    /// Set the spider name in the error context
    pub fn with_spider_name(mut self, spider_name: impl Into<String>) -> Self {
        if let Some(ctx) = self.context_mut() {
            ctx.spider_name = Some(spider_name.into());
        }
        self
    }

    /// Set the component in the error context
    pub fn with_component(mut self, component: impl Into<String>) -> Self {
        if let Some(ctx) = self.context_mut() {
            ctx.component = Some(component.into());
        }
        self
    }

    /// Add metadata to the error context
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        if let Some(ctx) = self.context_mut() {
            ctx.metadata.insert(key.into(), value.into());
        }
        self
    }

    /// Whether this error concerns a single record only.
    ///
    /// Corrupt records and unresolvable callbacks are dropped and counted by
    /// the scheduler; everything else aborts the current operation.
    pub fn is_item_failure(&self) -> bool {
        matches!(self, Self::Serialization { .. } | Self::Resolution { .. })
    }
}

/// Result type for scheduler operations
pub type Result<T> = std::result::Result<T, Error>;

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Error::IoError(error.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Error::serialization(error.to_string())
    }
}
