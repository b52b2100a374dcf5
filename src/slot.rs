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

use url::Url;

use crate::{key, meta::CacheMetadata};

/// Single-slot cache over the most recently read or written entry.
///
/// Saves re-reading the same file in back-to-back calls. The payload is held
/// only when it was materialized in memory anyway (compressed entries,
/// metadata rewrites); streamed bodies are never buffered just to warm the
/// slot. Must be invalidated whenever the held identifier is rewritten or
/// removed.
#[derive(Debug, Default)]
pub(crate) struct LastEntry {
    slot: Option<Slot>,
}

#[derive(Debug)]
struct Slot {
    canonical: Url,
    metadata: CacheMetadata,
    payload: Option<Vec<u8>>,
}

impl LastEntry {
    pub fn store(&mut self, metadata: CacheMetadata, payload: Option<Vec<u8>>) {
        self.slot = Some(Slot {
            canonical: key::canonical(&metadata.url),
            metadata,
            payload,
        });
    }

    pub fn metadata(&self, url: &Url) -> Option<&CacheMetadata> {
        self.hit(url).map(|slot| &slot.metadata)
    }

    pub fn payload(&self, url: &Url) -> Option<&[u8]> {
        self.hit(url)?.payload.as_deref()
    }

    /// Drops the slot if it holds `url`.
    pub fn invalidate(&mut self, url: &Url) {
        if self.hit(url).is_some() {
            self.slot = None;
        }
    }

    /// Drops the slot unconditionally.
    pub fn reset(&mut self) {
        self.slot = None;
    }

    fn hit(&self, url: &Url) -> Option<&Slot> {
        self.slot
            .as_ref()
            .filter(|slot| slot.canonical == key::canonical(url))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(url: &str) -> CacheMetadata {
        let mut meta = CacheMetadata::new(Url::parse(url).unwrap());
        meta.headers
            .push(("Content-Type".to_string(), "text/plain".to_string()));
        meta
    }

    #[test]
    fn test_hit_ignores_credentials_and_fragment() {
        let mut last = LastEntry::default();
        last.store(metadata("http://example.com/a"), Some(b"abc".to_vec()));

        let decorated = Url::parse("http://user:pw@example.com/a#frag").unwrap();
        assert_eq!(last.payload(&decorated), Some(b"abc".as_slice()));

        let other = Url::parse("http://example.com/b").unwrap();
        assert!(last.metadata(&other).is_none());
    }

    #[test]
    fn test_invalidate_only_drops_the_held_identifier() {
        let mut last = LastEntry::default();
        last.store(metadata("http://example.com/a"), None);

        last.invalidate(&Url::parse("http://example.com/b").unwrap());
        assert!(last.metadata(&Url::parse("http://example.com/a").unwrap()).is_some());

        last.invalidate(&Url::parse("http://example.com/a").unwrap());
        assert!(last.metadata(&Url::parse("http://example.com/a").unwrap()).is_none());
    }
}
