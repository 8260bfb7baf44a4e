use serde::{Deserialize, Serialize};
use serde_with::{DeserializeFromStr, SerializeDisplay};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use url::Url;

use crate::callback::Callback;
use crate::error::{Error, Result};
use crate::headers::Headers;

/// Encoding used for text input when none is given
pub const DEFAULT_ENCODING: &str = "utf-8";

/// HTTP methods
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, SerializeDisplay, DeserializeFromStr)]
pub enum Method {
    #[default]
    GET,
    POST,
    PUT,
    DELETE,
    HEAD,
    OPTIONS,
    PATCH,
    /// Any other (uppercase) token, e.g. `PURGE`
    Other(String),
}

impl Method {
    /// The uppercase verb
    pub fn as_str(&self) -> &str {
        match self {
            Method::GET => "GET",
            Method::POST => "POST",
            Method::PUT => "PUT",
            Method::DELETE => "DELETE",
            Method::HEAD => "HEAD",
            Method::OPTIONS => "OPTIONS",
            Method::PATCH => "PATCH",
            Method::Other(verb) => verb,
        }
    }
}

impl FromStr for Method {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let verb = s.trim().to_ascii_uppercase();
        if verb.is_empty() || !verb.bytes().all(|b| b.is_ascii_alphabetic() || b == b'-' || b == b'_') {
            return Err(Error::invalid_request(format!("Invalid HTTP method: {:?}", s)));
        }
        Ok(match verb.as_str() {
            "GET" => Method::GET,
            "POST" => Method::POST,
            "PUT" => Method::PUT,
            "DELETE" => Method::DELETE,
            "HEAD" => Method::HEAD,
            "OPTIONS" => Method::OPTIONS,
            "PATCH" => Method::PATCH,
            _ => Method::Other(verb),
        })
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A cookie in structured form
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// Cookies to send: either a plain name/value mapping or a list of cookies
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cookies {
    Map(BTreeMap<String, String>),
    List(Vec<Cookie>),
}

impl Default for Cookies {
    fn default() -> Self {
        Cookies::Map(BTreeMap::new())
    }
}

impl Cookies {
    /// Add a cookie, keeping the current form
    pub fn insert<K: Into<String>, V: Into<String>>(&mut self, name: K, value: V) {
        match self {
            Cookies::Map(map) => {
                map.insert(name.into(), value.into());
            }
            Cookies::List(list) => list.push(Cookie {
                name: name.into(),
                value: value.into(),
                domain: None,
                path: None,
            }),
        }
    }

    /// Get the value of a cookie by name
    pub fn get(&self, name: &str) -> Option<&str> {
        match self {
            Cookies::Map(map) => map.get(name).map(String::as_str),
            Cookies::List(list) => list
                .iter()
                .rev()
                .find(|cookie| cookie.name == name)
                .map(|cookie| cookie.value.as_str()),
        }
    }

    /// Number of cookies
    pub fn len(&self) -> usize {
        match self {
            Cookies::Map(map) => map.len(),
            Cookies::List(list) => list.len(),
        }
    }

    /// Whether there are no cookies
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Request-scoped context carried through the pipeline
pub type Meta = BTreeMap<String, serde_json::Value>;

/// Represents one unit of crawl work.
///
/// A request is not modified once built. Use [`Request::replace`] to derive
/// a new request with some fields overridden. `meta` is the only mutable
/// part, as it carries pipeline context rather than request identity.
#[derive(Debug, Clone)]
pub struct Request {
    url: Url,
    method: Method,
    headers: Headers,
    body: Vec<u8>,
    cookies: Cookies,
    meta: Meta,
    encoding: Option<String>,
    priority: i32,
    dont_filter: bool,
    callback: Option<Callback>,
    errback: Option<Callback>,
}

impl Request {
    /// Start building a request for `url`
    pub fn builder<U: Into<String>>(url: U) -> RequestBuilder {
        RequestBuilder::new(url)
    }

    /// Create a new GET request
    pub fn get<U: Into<String>>(url: U) -> Result<Self> {
        Self::builder(url).build()
    }

    /// Create a new POST request
    pub fn post<U: Into<String>, B: Into<Vec<u8>>>(url: U, body: B) -> Result<Self> {
        Self::builder(url).method("POST").body(body).build()
    }

    /// The request URL
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// The HTTP method
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The request headers
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// The request body (empty when none was given)
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// The request cookies
    pub fn cookies(&self) -> &Cookies {
        &self.cookies
    }

    /// Request metadata
    pub fn meta(&self) -> &Meta {
        &self.meta
    }

    /// The encoding used for text input
    pub fn encoding(&self) -> Option<&str> {
        self.encoding.as_deref()
    }

    /// Priority of this request (higher values dequeue first)
    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// Whether duplicate filtering is bypassed for this request
    pub fn dont_filter(&self) -> bool {
        self.dont_filter
    }

    /// The handler for the response
    pub fn callback(&self) -> Option<&Callback> {
        self.callback.as_ref()
    }

    /// The handler for download failures
    pub fn errback(&self) -> Option<&Callback> {
        self.errback.as_ref()
    }

    /// A builder seeded with every field of this request
    pub fn replace(&self) -> RequestBuilder {
        RequestBuilder {
            url: self.url.to_string(),
            method: self.method.to_string(),
            headers: self.headers.clone(),
            body: BodyInput::Bytes(self.body.clone()),
            cookies: self.cookies.clone(),
            meta: self.meta.clone(),
            encoding: self.encoding.clone(),
            priority: self.priority,
            dont_filter: self.dont_filter,
            callback: self.callback.clone(),
            errback: self.errback.clone(),
        }
    }

    /// Return a copy of this request
    pub fn copy(&self) -> Result<Self> {
        self.replace().build()
    }
}

impl PartialEq for Request {
    fn eq(&self, other: &Self) -> bool {
        self.url == other.url
            && self.method == other.method
            && self.headers == other.headers
            && self.body == other.body
            && self.cookies == other.cookies
            && self.meta == other.meta
            && self.encoding == other.encoding
            && self.priority == other.priority
            && self.dont_filter == other.dont_filter
            && self.callback == other.callback
            && self.errback == other.errback
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{} {}>", self.method, self.url)
    }
}

#[derive(Debug, Clone)]
enum BodyInput {
    Bytes(Vec<u8>),
    Text(String),
}

/// Builder for [`Request`]; validation happens in [`RequestBuilder::build`]
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    url: String,
    method: String,
    headers: Headers,
    body: BodyInput,
    cookies: Cookies,
    meta: Meta,
    encoding: Option<String>,
    priority: i32,
    dont_filter: bool,
    callback: Option<Callback>,
    errback: Option<Callback>,
}

impl RequestBuilder {
    fn new<U: Into<String>>(url: U) -> Self {
        Self {
            url: url.into(),
            method: Method::GET.to_string(),
            headers: Headers::new(),
            body: BodyInput::Bytes(Vec::new()),
            cookies: Cookies::default(),
            meta: Meta::new(),
            encoding: Some(DEFAULT_ENCODING.to_string()),
            priority: 0,
            dont_filter: false,
            callback: None,
            errback: None,
        }
    }

    /// Set the URL
    pub fn url<U: Into<String>>(mut self, url: U) -> Self {
        self.url = url.into();
        self
    }

    /// Set the HTTP method (case-insensitive)
    pub fn method<M: Into<String>>(mut self, method: M) -> Self {
        self.method = method.into();
        self
    }

    /// Set a header, replacing earlier values
    pub fn header<K: AsRef<str>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.headers.insert(key, value);
        self
    }

    /// Replace all headers
    pub fn headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    /// Set a raw byte body
    pub fn body<B: Into<Vec<u8>>>(mut self, body: B) -> Self {
        self.body = BodyInput::Bytes(body.into());
        self
    }

    /// Set a text body, encoded with the request encoding at build time
    pub fn text_body<S: Into<String>>(mut self, body: S) -> Self {
        self.body = BodyInput::Text(body.into());
        self
    }

    /// Add a cookie
    pub fn cookie<K: Into<String>, V: Into<String>>(mut self, name: K, value: V) -> Self {
        self.cookies.insert(name, value);
        self
    }

    /// Replace all cookies
    pub fn cookies(mut self, cookies: Cookies) -> Self {
        self.cookies = cookies;
        self
    }

    /// Set a metadata entry
    pub fn meta<K: Into<String>, V: Into<serde_json::Value>>(mut self, key: K, value: V) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }

    /// Replace all metadata
    pub fn meta_map(mut self, meta: Meta) -> Self {
        self.meta = meta;
        self
    }

    /// Set the text encoding
    pub fn encoding<E: Into<String>>(mut self, encoding: E) -> Self {
        self.encoding = Some(encoding.into());
        self
    }

    /// Clear the text encoding; text bodies are then rejected
    pub fn no_encoding(mut self) -> Self {
        self.encoding = None;
        self
    }

    /// Set the priority
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Bypass duplicate filtering
    pub fn dont_filter(mut self, dont_filter: bool) -> Self {
        self.dont_filter = dont_filter;
        self
    }

    /// Set the response handler
    pub fn callback(mut self, callback: Callback) -> Self {
        self.callback = Some(callback);
        self
    }

    /// Set the failure handler; requires a callback
    pub fn errback(mut self, errback: Callback) -> Self {
        self.errback = Some(errback);
        self
    }

    /// Validate the input and build the request
    pub fn build(self) -> Result<Request> {
        let url = parse_request_url(&self.url)?;
        let method = self.method.parse::<Method>()?;

        let body = match self.body {
            BodyInput::Bytes(bytes) => bytes,
            BodyInput::Text(text) => {
                let encoding = self.encoding.as_deref().ok_or_else(|| {
                    Error::invalid_request("Cannot encode text body: request has no encoding")
                })?;
                encode_text(&text, encoding)?
            }
        };

        if self.errback.is_some() && self.callback.is_none() {
            return Err(Error::invalid_request("Cannot use errback without a callback"));
        }

        Ok(Request {
            url,
            method,
            headers: self.headers,
            body,
            cookies: self.cookies,
            meta: self.meta,
            encoding: self.encoding,
            priority: self.priority,
            dont_filter: self.dont_filter,
            callback: self.callback,
            errback: self.errback,
        })
    }
}

/// Parse an absolute URL, escaping `#!` AJAX fragments
fn parse_request_url(raw: &str) -> Result<Url> {
    let mut url = Url::parse(raw.trim())?;
    if let Some(fragment) = url.fragment().and_then(|f| f.strip_prefix('!')) {
        let fragment = fragment.to_string();
        url.set_fragment(None);
        url.query_pairs_mut()
            .append_pair("_escaped_fragment_", &fragment);
    }
    Ok(url)
}

/// Encode text with one of the supported encodings
pub fn encode_text(text: &str, encoding: &str) -> Result<Vec<u8>> {
    let label = encoding.trim().to_ascii_lowercase().replace('_', "-");
    match label.as_str() {
        "utf-8" | "utf8" => Ok(text.as_bytes().to_vec()),
        "ascii" | "us-ascii" => {
            if text.is_ascii() {
                Ok(text.as_bytes().to_vec())
            } else {
                Err(Error::invalid_request("Text is not representable in ascii"))
            }
        }
        "latin-1" | "latin1" | "iso-8859-1" => text
            .chars()
            .map(|c| {
                u8::try_from(u32::from(c)).map_err(|_| {
                    Error::invalid_request(format!("Character {:?} is not representable in {}", c, encoding))
                })
            })
            .collect(),
        _ => Err(Error::invalid_request(format!("Unsupported encoding: {}", encoding))),
    }
}
