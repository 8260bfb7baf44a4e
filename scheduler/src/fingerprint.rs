//! Request fingerprints.
//!
//! A fingerprint is the lowercase hex SHA-256 of the uppercase method, the
//! canonical URL, the body and, optionally, a chosen set of headers. Meta,
//! priority, callbacks and header order never change it.

use crawlq_core::request::Request;
use sha2::{Digest, Sha256};
use url::Url;

/// Canonical form of a URL used for fingerprinting.
///
/// Query parameters are sorted, the fragment is dropped, default ports are
/// removed and percent-escapes are normalised: escapes of unreserved
/// characters are decoded and the remaining ones are uppercased.
pub fn canonicalize_url(url: &Url) -> String {
    let mut url = url.clone();
    url.set_fragment(None);

    let path = normalize_percent_encoding(url.path());
    url.set_path(&path);

    let mut pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
    if pairs.is_empty() {
        url.set_query(None);
    } else {
        pairs.sort();
        url.query_pairs_mut().clear().extend_pairs(pairs);
    }

    url.to_string()
}

fn is_unreserved(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'.' | b'_' | b'~')
}

fn hex_value(byte: u8) -> Option<u8> {
    (byte as char).to_digit(16).map(|d| d as u8)
}

fn normalize_percent_encoding(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = String::with_capacity(input.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let (Some(hi), Some(lo)) = (hex_value(bytes[i + 1]), hex_value(bytes[i + 2])) {
                let decoded = hi * 16 + lo;
                if is_unreserved(decoded) {
                    out.push(decoded as char);
                } else {
                    out.push('%');
                    out.push_str(&format!("{:02X}", decoded));
                }
                i += 3;
                continue;
            }
        }
        out.push(bytes[i] as char);
        i += 1;
    }

    out
}

/// Computes request fingerprints
#[derive(Debug, Clone, Default)]
pub struct RequestFingerprinter {
    include_headers: Vec<String>,
}

impl RequestFingerprinter {
    /// Fingerprint method, URL and body only
    pub fn new() -> Self {
        Self::default()
    }

    /// Also fingerprint the named headers
    pub fn with_headers<I, S>(headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut include_headers: Vec<String> = headers
            .into_iter()
            .map(|h| h.as_ref().trim().to_ascii_lowercase())
            .filter(|h| !h.is_empty())
            .collect();
        include_headers.sort();
        include_headers.dedup();
        Self { include_headers }
    }

    /// Header names taking part in fingerprints, lowercase and sorted
    pub fn include_headers(&self) -> &[String] {
        &self.include_headers
    }

    /// Fingerprint of a request
    pub fn fingerprint(&self, request: &Request) -> String {
        let mut hasher = Sha256::new();
        hasher.update(request.method().as_str().as_bytes());
        hasher.update(b"\n");
        hasher.update(canonicalize_url(request.url()).as_bytes());
        hasher.update(b"\n");
        hasher.update(request.body());

        for name in &self.include_headers {
            let values = request.headers().get_all(name);
            if values.is_empty() {
                continue;
            }
            hasher.update(b"\n");
            hasher.update(name.as_bytes());
            for value in values {
                hasher.update(b"\0");
                hasher.update(value.as_bytes());
            }
        }

        hex::encode(hasher.finalize())
    }
}

/// Fingerprint of a request ignoring headers
pub fn request_fingerprint(request: &Request) -> String {
    RequestFingerprinter::new().fingerprint(request)
}
