//! Transport-neutral request records.
//!
//! Disk and broker queues store requests as [`RequestRecord`]s encoded by a
//! [`RecordSerializer`]. Callbacks are written as three strings (module path,
//! type name, handler name) and re-bound through the context's registry when
//! the record is read back.

use serde::{Deserialize, Serialize};
use serde_with::serde_as;

use crate::callback::{Callback, CallbackRef, ComponentId};
use crate::context::CrawlContext;
use crate::error::{Error, ErrorContext, Result};
use crate::headers::Headers;
use crate::request::{Cookies, Meta, Request};

fn default_method() -> String {
    "GET".to_string()
}

/// The flat, serializable form of a [`Request`]
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestRecord {
    pub url: String,

    #[serde(default = "default_method")]
    pub method: String,

    #[serde(default)]
    pub headers: Headers,

    #[serde_as(as = "serde_with::hex::Hex")]
    #[serde(default)]
    pub body: Vec<u8>,

    #[serde(default)]
    pub cookies: Cookies,

    #[serde(default)]
    pub meta: Meta,

    #[serde(default)]
    pub encoding: Option<String>,

    #[serde(default)]
    pub priority: i32,

    #[serde(default)]
    pub dont_filter: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_classpath: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_classname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_funcname: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errback_classpath: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errback_classname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errback_funcname: Option<String>,
}

type RefParts = (Option<String>, Option<String>, Option<String>);

fn split_ref(callback: Option<&Callback>) -> RefParts {
    match callback {
        Some(callback) => {
            let reference = callback.reference();
            (
                Some(reference.component.path.clone()),
                Some(reference.component.name.clone()),
                Some(reference.handler.clone()),
            )
        }
        None => (None, None, None),
    }
}

fn join_ref(kind: &str, parts: RefParts) -> Result<Option<CallbackRef>> {
    match parts {
        (None, None, None) => Ok(None),
        (Some(path), Some(name), Some(handler)) => {
            Ok(Some(CallbackRef::new(ComponentId::new(path, name), handler)))
        }
        _ => Err(Error::serialization(format!(
            "Incomplete {} reference in record",
            kind
        ))),
    }
}

impl RequestRecord {
    /// Flatten a request into a record
    pub fn from_request(request: &Request) -> Self {
        let (callback_classpath, callback_classname, callback_funcname) =
            split_ref(request.callback());
        let (errback_classpath, errback_classname, errback_funcname) =
            split_ref(request.errback());

        Self {
            url: request.url().to_string(),
            method: request.method().to_string(),
            headers: request.headers().clone(),
            body: request.body().to_vec(),
            cookies: request.cookies().clone(),
            meta: request.meta().clone(),
            encoding: request.encoding().map(str::to_string),
            priority: request.priority(),
            dont_filter: request.dont_filter(),
            callback_classpath,
            callback_classname,
            callback_funcname,
            errback_classpath,
            errback_classname,
            errback_funcname,
        }
    }

    /// The callback reference carried by this record, if any
    pub fn callback_ref(&self) -> Result<Option<CallbackRef>> {
        join_ref(
            "callback",
            (
                self.callback_classpath.clone(),
                self.callback_classname.clone(),
                self.callback_funcname.clone(),
            ),
        )
    }

    /// The errback reference carried by this record, if any
    pub fn errback_ref(&self) -> Result<Option<CallbackRef>> {
        join_ref(
            "errback",
            (
                self.errback_classpath.clone(),
                self.errback_classname.clone(),
                self.errback_funcname.clone(),
            ),
        )
    }

    /// Rebuild the request, resolving callbacks through `context`
    pub fn into_request(self, context: &CrawlContext) -> Result<Request> {
        let callback = self
            .callback_ref()?
            .map(|reference| context.registry().resolve(&reference))
            .transpose()?;
        let errback = self
            .errback_ref()?
            .map(|reference| context.registry().resolve(&reference))
            .transpose()?;

        let mut builder = Request::builder(self.url.clone())
            .method(self.method)
            .headers(self.headers)
            .body(self.body)
            .cookies(self.cookies)
            .meta_map(self.meta)
            .priority(self.priority)
            .dont_filter(self.dont_filter);
        builder = match self.encoding {
            Some(encoding) => builder.encoding(encoding),
            None => builder.no_encoding(),
        };
        if let Some(callback) = callback {
            builder = builder.callback(callback);
        }
        if let Some(errback) = errback {
            builder = builder.errback(errback);
        }

        builder.build().map_err(|e| match e {
            // A record that no longer makes a valid request is corrupt, not malformed input
            Error::UrlParseError(_) | Error::InvalidRequest { .. } => Error::Serialization {
                message: e.to_string(),
                context: ErrorContext::new().with_url(self.url),
            },
            other => other,
        })
    }
}

/// Encodes requests to bytes and back
pub trait RecordSerializer: Send + Sync + 'static {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Encode a request; must be deterministic for identical input
    fn serialize(&self, request: &Request) -> Result<Vec<u8>>;

    /// Decode a request, resolving its callbacks through `context`
    fn deserialize(&self, bytes: &[u8], context: &CrawlContext) -> Result<Request>;
}

/// JSON record encoding
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl RecordSerializer for JsonSerializer {
    fn name(&self) -> &'static str {
        "json"
    }

    fn serialize(&self, request: &Request) -> Result<Vec<u8>> {
        serde_json::to_vec(&RequestRecord::from_request(request))
            .map_err(|e| Error::serialization(e.to_string()).with_url(request.url().as_str()))
    }

    fn deserialize(&self, bytes: &[u8], context: &CrawlContext) -> Result<Request> {
        let record: RequestRecord = serde_json::from_slice(bytes)?;
        record.into_request(context)
    }
}

/// Best-effort URL of an encoded record, for log messages about bad records
pub fn peek_url(bytes: &[u8]) -> Option<String> {
    #[derive(Deserialize)]
    struct UrlOnly {
        url: String,
    }

    serde_json::from_slice::<UrlOnly>(bytes).ok().map(|r| r.url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::async_trait;
    use crate::callback::{CallbackRegistry, Component};
    use crate::response::{Item, ParseOutput, Response};
    use std::sync::Arc;

    struct ProductSpider {
        currency: String,
    }

    #[async_trait]
    impl Component for ProductSpider {
        fn component_id(&self) -> ComponentId {
            ComponentId::of::<Self>()
        }

        fn has_handler(&self, handler: &str) -> bool {
            matches!(handler, "parse_product" | "product_failed")
        }

        async fn invoke(&self, handler: &str, response: Response) -> Result<ParseOutput> {
            Ok(ParseOutput::item(
                Item::new()
                    .set("handler", handler)
                    .set("url", response.url.as_str())
                    .set("currency", self.currency.as_str()),
            ))
        }
    }

    fn registry() -> CallbackRegistry {
        let mut registry = CallbackRegistry::new();
        registry.register(|| ProductSpider {
            currency: "EUR".to_string(),
        });
        registry
    }

    fn sample_request() -> Request {
        Request::builder("https://shop.example.com/items?id=7")
            .method("POST")
            .header("Content-Type", "application/json")
            .header("X-Trace", "abc")
            .body(vec![0u8, 159, 146, 150])
            .cookie("session", "s1")
            .meta("depth", 3)
            .priority(-2)
            .dont_filter(true)
            .build()
            .unwrap()
    }

    #[test]
    fn test_round_trip_without_callback() {
        let serializer = JsonSerializer;
        let context = CrawlContext::new("shop");
        let request = sample_request();

        let bytes = serializer.serialize(&request).unwrap();
        let restored = serializer.deserialize(&bytes, &context).unwrap();

        assert_eq!(restored.url(), request.url());
        assert_eq!(restored.method(), request.method());
        assert_eq!(restored.headers(), request.headers());
        assert_eq!(restored.body(), request.body());
        assert_eq!(restored.cookies(), request.cookies());
        assert_eq!(restored.priority(), request.priority());
        assert_eq!(restored.dont_filter(), request.dont_filter());
        assert_eq!(restored, request);
    }

    #[test]
    fn test_serialize_is_deterministic() {
        let serializer = JsonSerializer;
        let request = sample_request()
            .replace()
            .meta("b", 1)
            .meta("a", serde_json::json!({"z": 1, "y": 2}))
            .build()
            .unwrap();
        let first = serializer.serialize(&request).unwrap();
        let second = serializer.serialize(&request.copy().unwrap()).unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_round_trip_with_callback() {
        let serializer = JsonSerializer;
        let spider: Arc<dyn Component> = Arc::new(ProductSpider {
            currency: "EUR".to_string(),
        });
        let request = Request::builder("https://shop.example.com/p/1")
            .callback(Callback::new(spider.clone(), "parse_product").unwrap())
            .errback(Callback::new(spider, "product_failed").unwrap())
            .build()
            .unwrap();

        let bytes = serializer.serialize(&request).unwrap();
        let record: RequestRecord = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(record.callback_classname.as_deref(), Some("ProductSpider"));
        assert_eq!(record.callback_funcname.as_deref(), Some("parse_product"));
        assert_eq!(record.errback_funcname.as_deref(), Some("product_failed"));

        let context = CrawlContext::new("shop").with_registry(registry());
        let restored = serializer.deserialize(&bytes, &context).unwrap();

        let response = |r: &Request| Response::new(r.clone(), 200, Headers::new(), Vec::new());
        let original_out = request.callback().unwrap().call(response(&request)).await.unwrap();
        let restored_out = restored.callback().unwrap().call(response(&restored)).await.unwrap();
        assert_eq!(original_out.items, restored_out.items);
        assert_eq!(restored.errback().unwrap().reference().handler, "product_failed");
    }

    #[test]
    fn test_unresolvable_callback() {
        let serializer = JsonSerializer;
        let spider: Arc<dyn Component> = Arc::new(ProductSpider {
            currency: "EUR".to_string(),
        });
        let request = Request::builder("https://shop.example.com/p/1")
            .callback(Callback::new(spider, "parse_product").unwrap())
            .build()
            .unwrap();
        let bytes = serializer.serialize(&request).unwrap();

        let err = serializer
            .deserialize(&bytes, &CrawlContext::new("shop"))
            .unwrap_err();
        assert!(matches!(err, Error::Resolution { .. }));
        assert!(err.is_item_failure());
    }

    #[test]
    fn test_minimal_record_defaults() {
        let record: RequestRecord =
            serde_json::from_str(r#"{"url": "https://example.com/"}"#).unwrap();
        assert_eq!(record.method, "GET");
        assert_eq!(record.priority, 0);
        assert!(!record.dont_filter);
        assert!(record.body.is_empty());

        let request = record.into_request(&CrawlContext::new("x")).unwrap();
        assert_eq!(request.url().as_str(), "https://example.com/");
    }

    #[test]
    fn test_priority_must_be_integer() {
        for bad in [
            r#"{"url": "https://example.com/", "priority": 1.5}"#,
            r#"{"url": "https://example.com/", "priority": "1"}"#,
        ] {
            let err = JsonSerializer
                .deserialize(bad.as_bytes(), &CrawlContext::new("x"))
                .unwrap_err();
            assert!(matches!(err, Error::Serialization { .. }));
        }
    }

    #[test]
    fn test_corrupt_records() {
        let context = CrawlContext::new("x");
        let records: [&[u8]; 3] = [
            b"\x00\x01garbage",
            br#"{"url": "not a url"}"#,
            br#"{"url": "https://example.com/", "callback_classpath": "a"}"#,
        ];
        for bad in records {
            let err = JsonSerializer.deserialize(bad, &context).unwrap_err();
            assert!(err.is_item_failure(), "{:?}", err);
        }
    }

    #[test]
    fn test_peek_url() {
        let bytes = JsonSerializer.serialize(&sample_request()).unwrap();
        assert_eq!(
            peek_url(&bytes).as_deref(),
            Some("https://shop.example.com/items?id=7")
        );
        assert_eq!(peek_url(b"junk"), None);
    }
}
