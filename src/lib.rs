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

//! larder - a bounded, crash-safe on-disk cache for HTTP-style responses.
//!
//! Each entry stores a byte payload together with a structured metadata
//! record, keyed by its URL, in one file inside a sharded directory tree.
//! Commits are atomic, the on-disk format is versioned, and an age-based
//! eviction pass keeps the occupied bytes under a configurable budget.
//!
//! ```
//! use std::io::{Read, Write};
//!
//! use larder::{CacheMetadata, DiskCache};
//! use url::Url;
//!
//! let dir = tempfile::tempdir().unwrap();
//! let mut cache = DiskCache::new();
//! cache.set_cache_directory(dir.path());
//!
//! let url = Url::parse("http://example.com/greeting").unwrap();
//! let mut metadata = CacheMetadata::new(url.clone());
//! metadata
//!     .headers
//!     .push(("Content-Type".to_string(), "text/plain".to_string()));
//!
//! let mut writer = cache.prepare(metadata).unwrap();
//! writer.write_all(b"hello").unwrap();
//! cache.insert(writer);
//!
//! let mut payload = Vec::new();
//! cache.data(&url).unwrap().read_to_end(&mut payload).unwrap();
//! assert_eq!(payload, b"hello");
//! ```
//!
//! The cache stays out of HTTP semantics: freshness and revalidation belong
//! to the transport layer that owns it.

mod codec;
mod error;
mod eviction;
mod key;
mod layout;
mod meta;
mod slot;
mod store;

pub use error::{Error, Result};
pub use key::ENTRY_SUFFIX;
pub use meta::CacheMetadata;
pub use store::{CacheReader, CacheWriter, DiskCache, DEFAULT_MAXIMUM_CACHE_SIZE};

/// Commonly used types and traits.
pub mod prelude {
    pub use crate::{CacheMetadata, CacheReader, CacheWriter, DiskCache, Error, Result};
}
