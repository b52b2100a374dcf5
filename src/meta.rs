// Copyright 2026 larder Project Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

/// Metadata record of one cached response.
///
/// The cache serializes and restores this record as a black box. It never
/// interprets HTTP semantics (freshness, revalidation); the only fields it
/// consults itself are the identifier, the persist flag, and the
/// `Content-Length` / `Content-Type` headers for sizing and compression
/// eligibility.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheMetadata {
    /// Resource identifier. Credentials and fragment are ignored for cache
    /// addressing.
    pub url: Url,
    /// Ordered response header pairs. Names compare case-insensitively.
    pub headers: Vec<(String, String)>,
    /// Last modification timestamp of the resource.
    pub last_modified: Option<DateTime<Utc>>,
    /// Expiration timestamp of the resource, if any.
    pub expiration: Option<DateTime<Utc>>,
    /// Whether the entry may be persisted to disk at all.
    pub save_to_disk: bool,
}

impl CacheMetadata {
    /// Creates a metadata record for `url` with no headers, persistable by
    /// default.
    pub fn new(url: Url) -> Self {
        Self {
            url,
            headers: Vec::new(),
            last_modified: None,
            expiration: None,
            save_to_disk: true,
        }
    }

    /// Returns the first header value whose name matches `name`
    /// case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Declared content length, if present and parseable.
    pub fn content_length(&self) -> Option<u64> {
        self.header("content-length")?.trim().parse().ok()
    }

    /// Declared content type, if present.
    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    /// A restored record is well-formed only if it carries at least one
    /// header.
    pub fn is_valid(&self) -> bool {
        !self.headers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> CacheMetadata {
        let mut meta = CacheMetadata::new(Url::parse("http://example.com/a").unwrap());
        meta.headers = vec![
            ("Content-Type".to_string(), "text/plain".to_string()),
            ("Content-Length".to_string(), "42".to_string()),
        ];
        meta
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let meta = meta();
        assert_eq!(meta.header("content-type"), Some("text/plain"));
        assert_eq!(meta.header("CONTENT-LENGTH"), Some("42"));
        assert_eq!(meta.header("etag"), None);
    }

    #[test]
    fn test_content_length() {
        let mut meta = meta();
        assert_eq!(meta.content_length(), Some(42));
        meta.headers[1].1 = "not a number".to_string();
        assert_eq!(meta.content_length(), None);
    }

    #[test]
    fn test_validity_requires_headers() {
        assert!(meta().is_valid());
        assert!(!CacheMetadata::new(Url::parse("http://example.com/a").unwrap()).is_valid());
    }
}
