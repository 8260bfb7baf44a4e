use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use url::Url;

use crate::error::{Error, Result};
use crate::headers::Headers;
use crate::request::Request;

/// An HTTP response handed to a request's callback.
///
/// Responses are produced by the download engine; the scheduler only needs
/// them as the argument type of deferred handlers.
#[derive(Debug, Clone)]
pub struct Response {
    /// The URL of the response
    pub url: Url,

    /// The HTTP status code
    pub status: u16,

    /// HTTP headers received
    pub headers: Headers,

    /// Response body
    pub body: Vec<u8>,

    /// The request that generated this response
    pub request: Request,
}

impl Response {
    /// Create a new response
    pub fn new(request: Request, status: u16, headers: Headers, body: Vec<u8>) -> Self {
        Self {
            url: request.url().clone(),
            status,
            headers,
            body,
            request,
        }
    }

    /// Get the response body as a string
    pub fn text(&self) -> Result<String> {
        String::from_utf8(self.body.clone())
            .map_err(|e| Error::other(format!("Failed to decode UTF-8: {}", e)).with_url(self.url.as_str()))
    }

    /// Parse the response body as JSON
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Check if the response was successful (status code 200-299)
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Resolve a possibly relative link against the response URL
    pub fn urljoin(&self, link: &str) -> Result<Url> {
        Ok(self.url.join(link)?)
    }
}

/// A scraped item: an open mapping of field name to value
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Item {
    /// Field values
    #[serde(flatten)]
    pub fields: BTreeMap<String, serde_json::Value>,
}

impl Item {
    /// Create an empty item
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a field value
    pub fn set<K: Into<String>, V: Into<serde_json::Value>>(mut self, key: K, value: V) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Get a field value
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.fields.get(key)
    }
}

/// Output from a callback: items and/or follow-up requests
#[derive(Debug, Default)]
pub struct ParseOutput {
    /// Items extracted from the response
    pub items: Vec<Item>,

    /// Requests to follow
    pub requests: Vec<Request>,
}

impl ParseOutput {
    /// Create a new empty parse output
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an item to the output
    pub fn add_item(&mut self, item: Item) -> &mut Self {
        self.items.push(item);
        self
    }

    /// Add a request to the output
    pub fn add_request(&mut self, request: Request) -> &mut Self {
        self.requests.push(request);
        self
    }

    /// Create a parse output with a single item
    pub fn item(item: Item) -> Self {
        let mut output = Self::new();
        output.add_item(item);
        output
    }

    /// Create a parse output with a single request
    pub fn request(request: Request) -> Self {
        let mut output = Self::new();
        output.add_request(request);
        output
    }
}
