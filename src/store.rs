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

use std::{
    collections::HashMap,
    fs::{self, File},
    io::{self, BufReader, Cursor, Read, Write},
    path::{Path, PathBuf},
};

use tempfile::NamedTempFile;
use url::Url;

use crate::{
    codec,
    error::{Error, Result},
    eviction, key,
    layout::CacheLayout,
    meta::CacheMetadata,
    slot::LastEntry,
};

/// Default byte budget, 50 MiB.
pub const DEFAULT_MAXIMUM_CACHE_SIZE: u64 = 50 * 1024 * 1024;

/// Bounded on-disk cache for response payloads and their metadata records.
///
/// Entries are populated through [`prepare`](DiskCache::prepare) /
/// [`insert`](DiskCache::insert) and retrieved through
/// [`data`](DiskCache::data) / [`metadata`](DiskCache::metadata). Commits are
/// atomic (write-to-temp in the destination shard, then rename), so a reader
/// never observes a half-written entry. An age-based eviction pass keeps the
/// occupied bytes under the configured maximum.
///
/// The cache is meant to be owned and driven by a single thread. Every
/// operation is synchronous and blocking; callers needing concurrent access
/// must serialize externally or use one instance per thread. Processes
/// sharing one directory race with last-commit-wins and no locking.
///
/// A cache may always say no: every failure below this API surfaces as a
/// miss, a `None`, or a `false`, never as a panic or a caller-visible error.
#[derive(Debug)]
pub struct DiskCache {
    layout: Option<CacheLayout>,
    maximum_cache_size: u64,
    /// `None` means unknown and is recomputed by the next scan.
    current_cache_size: Option<u64>,
    pending: HashMap<u64, PendingEntry>,
    next_token: u64,
    last: LastEntry,
}

#[derive(Debug)]
struct PendingEntry {
    metadata: CacheMetadata,
}

impl Default for DiskCache {
    fn default() -> Self {
        Self {
            layout: None,
            maximum_cache_size: DEFAULT_MAXIMUM_CACHE_SIZE,
            current_cache_size: None,
            pending: HashMap::new(),
            next_token: 0,
            last: LastEntry::default(),
        }
    }
}

impl DiskCache {
    /// Creates a cache with no directory configured and the default maximum
    /// size. Operations are no-ops until a directory is set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configured cache root, if any.
    pub fn cache_directory(&self) -> Option<&Path> {
        self.layout.as_ref().map(|layout| layout.root())
    }

    /// Sets the cache root and eagerly creates the versioned shard tree
    /// under it. Resets the size accounting to unknown.
    pub fn set_cache_directory(&mut self, dir: impl Into<PathBuf>) {
        let layout = CacheLayout::new(dir);
        if let Err(e) = layout.prepare() {
            tracing::warn!(
                "[store]: failed to prepare cache directory {}: {e}",
                layout.root().display()
            );
        }
        self.layout = Some(layout);
        self.current_cache_size = None;
        self.last.reset();
    }

    /// Configured byte budget.
    pub fn maximum_cache_size(&self) -> u64 {
        self.maximum_cache_size
    }

    /// Sets the byte budget. Shrinking it below the previous value runs an
    /// eviction pass immediately.
    pub fn set_maximum_cache_size(&mut self, bytes: u64) {
        let shrink = bytes < self.maximum_cache_size;
        self.maximum_cache_size = bytes;
        if shrink {
            self.expire();
        }
    }

    /// Currently occupied bytes, scanning the directory tree if the total is
    /// unknown.
    pub fn cache_size(&mut self) -> u64 {
        if self.layout.is_none() {
            return 0;
        }
        match self.current_cache_size {
            Some(current) => current,
            None => self.expire(),
        }
    }

    /// Starts populating an entry for `metadata` and returns its write sink.
    ///
    /// Returns `None` if the identifier is not cacheable: persist flag unset,
    /// identifier invalid, cache directory unset, or a declared content
    /// length above three quarters of the maximum cache size.
    ///
    /// Compressible entries buffer in memory until
    /// [`insert`](DiskCache::insert); everything else streams straight into a
    /// temp file behind a pre-written header.
    pub fn prepare(&mut self, metadata: CacheMetadata) -> Option<CacheWriter> {
        if !metadata.save_to_disk || metadata.url.cannot_be_a_base() {
            return None;
        }
        let Some(layout) = self.layout.clone() else {
            tracing::warn!(
                "[store]: cache directory is not set, {} is not cacheable",
                metadata.url
            );
            return None;
        };
        if let Some(len) = metadata.content_length() {
            if len > self.maximum_cache_size / 4 * 3 {
                return None;
            }
        }

        let sink = if codec::should_compress(&metadata) {
            WriterSink::Buffer(Vec::new())
        } else {
            let path = layout.entry_path(&metadata.url);
            match Self::streamed_sink(&path, &metadata) {
                Ok(sink) => sink,
                Err(e) => {
                    tracing::warn!("[store]: failed to open a sink for {}: {e}", metadata.url);
                    return None;
                }
            }
        };

        // A second prepare for an identifier already in flight orphans the
        // earlier pending entry; its insert lands as a logged no-op.
        let canonical = key::canonical(&metadata.url);
        if let Some(token) = self
            .pending
            .iter()
            .find(|(_, pending)| key::canonical(&pending.metadata.url) == canonical)
            .map(|(token, _)| *token)
        {
            tracing::warn!(
                "[store]: a newer prepare orphaned the pending write for {}",
                metadata.url
            );
            self.pending.remove(&token);
        }

        let token = self.next_token;
        self.next_token += 1;
        self.pending.insert(token, PendingEntry { metadata });
        Some(CacheWriter { token, sink })
    }

    /// Commits a populated entry.
    ///
    /// An unknown or canceled writer is a logged no-op. Eviction runs to the
    /// 90% goal before the entry is accounted for, and the commit itself is
    /// a temp-file rename, so the target path flips from old to new content
    /// in one step.
    pub fn insert(&mut self, writer: CacheWriter) {
        let Some(pending) = self.pending.remove(&writer.token) else {
            tracing::warn!("[store]: insert called with an unknown or canceled writer");
            return;
        };
        let Some(layout) = self.layout.clone() else {
            tracing::warn!("[store]: cache directory is not set");
            return;
        };
        let path = layout.entry_path(&pending.metadata.url);

        if path.exists() {
            self.remove_file(&path);
        }
        self.expire();

        let payload = match writer.sink {
            WriterSink::Buffer(buffer) => {
                if let Err(e) = Self::commit_compressed(&pending.metadata, &buffer, &path) {
                    tracing::warn!(
                        "[store]: failed to commit entry for {}: {e}",
                        pending.metadata.url
                    );
                    return;
                }
                Some(buffer)
            }
            WriterSink::File(file) => match file.persist(&path) {
                Ok(_) => None,
                Err(e) => {
                    tracing::warn!(
                        "[store]: failed to commit entry for {}: {}",
                        pending.metadata.url,
                        e.error
                    );
                    return;
                }
            },
        };

        match fs::metadata(&path) {
            Ok(md) => {
                let current = self.current_cache_size.unwrap_or(0);
                self.current_cache_size = Some(current + md.len());
            }
            // The running total only reflects completed, observable work.
            Err(_) => self.current_cache_size = None,
        }

        self.last.invalidate(&pending.metadata.url);
        if let Some(payload) = payload {
            self.last.store(pending.metadata, Some(payload));
        }
    }

    /// Returns a reader over the payload stored for `url`, or `None` on a
    /// miss. Compressed payloads are transparently decompressed; a corrupt
    /// or stale file is deleted and reported as a miss.
    pub fn data(&mut self, url: &Url) -> Option<CacheReader> {
        if let Some(bytes) = self.last.payload(url) {
            return Some(CacheReader::from_bytes(bytes.to_vec()));
        }

        let (metadata, body) = self.open_entry(url, true)?;
        match body {
            EntryBody::Inline(payload) => {
                self.last.store(metadata, Some(payload.clone()));
                Some(CacheReader::from_bytes(payload))
            }
            EntryBody::Stream(reader) => {
                self.last.store(metadata, None);
                Some(CacheReader::from_file(reader))
            }
            EntryBody::None => unreachable!("payload was requested"),
        }
    }

    /// Returns the metadata record stored for `url`, or `None` on a miss.
    /// Only the header portion of the file is decoded; payloads are never
    /// decompressed on this path.
    pub fn metadata(&mut self, url: &Url) -> Option<CacheMetadata> {
        if let Some(metadata) = self.last.metadata(url) {
            return Some(metadata.clone());
        }

        let (metadata, _) = self.open_entry(url, false)?;
        self.last.store(metadata.clone(), None);
        Some(metadata)
    }

    /// Replaces the metadata record of the entry for `metadata.url`,
    /// carrying the payload over unchanged. A full rewrite: metadata and
    /// payload share one file. Does nothing if no such entry exists.
    pub fn update_metadata(&mut self, metadata: CacheMetadata) {
        let url = metadata.url.clone();
        let Some(mut old) = self.data(&url) else {
            return;
        };
        let Some(mut writer) = self.prepare(metadata) else {
            return;
        };
        if let Err(e) = io::copy(&mut old, &mut writer) {
            tracing::warn!("[store]: failed to rewrite entry for {url}: {e}");
            self.pending.remove(&writer.token);
            return;
        }
        self.insert(writer);
    }

    /// Removes the entry for `url`, reporting whether anything was removed.
    ///
    /// A pending write for `url` is canceled instead; no file ever appears
    /// at the derived path in that case. Only files carrying the recognized
    /// entry suffix are ever deleted.
    pub fn remove(&mut self, url: &Url) -> bool {
        let canonical = key::canonical(url);
        if let Some(token) = self
            .pending
            .iter()
            .find(|(_, pending)| key::canonical(&pending.metadata.url) == canonical)
            .map(|(token, _)| *token)
        {
            self.pending.remove(&token);
            tracing::trace!("[store]: canceled the pending write for {url}");
            return true;
        }

        self.last.invalidate(url);

        let Some(layout) = self.layout.clone() else {
            tracing::warn!("[store]: cache directory is not set");
            return false;
        };
        self.remove_file(&layout.entry_path(url))
    }

    /// Deletes every entry. The byte budget is untouched.
    pub fn clear(&mut self) {
        let maximum = self.maximum_cache_size;
        self.maximum_cache_size = 0;
        self.expire();
        self.maximum_cache_size = maximum;
        self.current_cache_size = Some(0);
    }

    /// Runs the eviction pass and returns the occupied bytes.
    ///
    /// Cheap when the total is already known to fit the budget; otherwise
    /// the directory tree is scanned and trimmed oldest-first down to 90% of
    /// the maximum.
    pub fn expire(&mut self) -> u64 {
        if let Some(current) = self.current_cache_size {
            if current < self.maximum_cache_size {
                return current;
            }
        }
        let Some(layout) = self.layout.clone() else {
            tracing::warn!("[eviction]: cache directory is not set");
            return 0;
        };

        // The pass may delete the file backing the slot.
        self.last.reset();

        let total = eviction::expire(&layout.data_root(), self.maximum_cache_size);
        self.current_cache_size = Some(total);
        total
    }

    fn streamed_sink(path: &Path, metadata: &CacheMetadata) -> Result<WriterSink> {
        let dir = path.parent().expect("entry path has a shard parent");
        let mut file = tempfile::Builder::new()
            .prefix(".inflight-")
            .tempfile_in(dir)?;
        codec::write_header(&mut file, metadata, false)?;
        Ok(WriterSink::File(file))
    }

    fn commit_compressed(metadata: &CacheMetadata, payload: &[u8], path: &Path) -> Result<()> {
        let dir = path.parent().expect("entry path has a shard parent");
        let mut file = tempfile::Builder::new()
            .prefix(".inflight-")
            .tempfile_in(dir)?;
        codec::write_header(&mut file, metadata, true)?;
        codec::write_compressed_payload(&mut file, payload)?;
        file.persist(path).map_err(|e| Error::Io(e.error))?;
        Ok(())
    }

    /// Opens and decodes the entry file for `url`, applying the corruption
    /// policy: stale, unreadable or mismatched files are deleted and report
    /// as absent; files the cache did not write are left alone.
    fn open_entry(&mut self, url: &Url, need_payload: bool) -> Option<(CacheMetadata, EntryBody)> {
        let Some(layout) = self.layout.clone() else {
            tracing::warn!("[store]: cache directory is not set");
            return None;
        };
        let path = layout.entry_path(url);

        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!("[store]: failed to open {}: {e}", path.display());
                return None;
            }
        };
        let mut reader = BufReader::new(file);

        let decoded = codec::read_header(&mut reader).and_then(|(metadata, compressed)| {
            // A decoded identifier that does not map back to this file means
            // a digest collision or a moved file.
            let expected = key::entry_file_name(&metadata.url);
            if path.file_name().and_then(|name| name.to_str()) != Some(expected.as_str()) {
                return Err(Error::KeyMismatch);
            }
            Ok((metadata, compressed))
        });
        let (metadata, compressed) = match decoded {
            Ok(decoded) => decoded,
            Err(Error::NotCacheFile { magic }) => {
                tracing::warn!(
                    "[store]: {} was not written by this cache (magic {magic:#010x}), leaving it alone",
                    path.display()
                );
                return None;
            }
            Err(e) => {
                tracing::warn!("[store]: dropping unreadable entry {}: {e}", path.display());
                self.remove_file(&path);
                return None;
            }
        };

        if !need_payload {
            return Some((metadata, EntryBody::None));
        }

        if compressed {
            match codec::read_compressed_payload(&mut reader) {
                Ok(payload) => Some((metadata, EntryBody::Inline(payload))),
                Err(e) => {
                    tracing::warn!("[store]: dropping unreadable entry {}: {e}", path.display());
                    self.remove_file(&path);
                    None
                }
            }
        } else {
            Some((metadata, EntryBody::Stream(reader)))
        }
    }

    /// Deletes `path` if it carries the entry suffix, keeping the running
    /// total in step. Reports whether a file was removed.
    fn remove_file(&mut self, path: &Path) -> bool {
        if !key::has_entry_suffix(path) {
            return false;
        }
        let Ok(size) = fs::metadata(path).map(|md| md.len()) else {
            return false;
        };
        match fs::remove_file(path) {
            Ok(()) => {
                if let Some(current) = self.current_cache_size.as_mut() {
                    *current = current.saturating_sub(size);
                }
                true
            }
            Err(e) => {
                tracing::warn!("[store]: failed to remove {}: {e}", path.display());
                false
            }
        }
    }
}

#[derive(Debug)]
enum EntryBody {
    None,
    Inline(Vec<u8>),
    Stream(BufReader<File>),
}

/// Write sink for an entry being populated, handed out by
/// [`DiskCache::prepare`] and consumed by [`DiskCache::insert`].
///
/// Dropping the writer without inserting it abandons the entry; any temp
/// file it streamed into is cleaned up with it.
#[derive(Debug)]
pub struct CacheWriter {
    token: u64,
    sink: WriterSink,
}

#[derive(Debug)]
enum WriterSink {
    Buffer(Vec<u8>),
    File(NamedTempFile),
}

impl Write for CacheWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &mut self.sink {
            WriterSink::Buffer(buffer) => {
                buffer.extend_from_slice(buf);
                Ok(buf.len())
            }
            WriterSink::File(file) => file.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.sink {
            WriterSink::Buffer(_) => Ok(()),
            WriterSink::File(file) => file.flush(),
        }
    }
}

/// Read source over a retrieved payload.
///
/// Backed either by in-memory bytes (slot hits and decompressed entries) or
/// by the tail of the entry file (streamed entries).
#[derive(Debug)]
pub struct CacheReader {
    inner: ReaderInner,
}

#[derive(Debug)]
enum ReaderInner {
    Memory(Cursor<Vec<u8>>),
    File(BufReader<File>),
}

impl CacheReader {
    fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            inner: ReaderInner::Memory(Cursor::new(bytes)),
        }
    }

    fn from_file(reader: BufReader<File>) -> Self {
        Self {
            inner: ReaderInner::File(reader),
        }
    }
}

impl Read for CacheReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.inner {
            ReaderInner::Memory(cursor) => cursor.read(buf),
            ReaderInner::File(file) => file.read(buf),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(url: &str) -> CacheMetadata {
        let mut meta = CacheMetadata::new(Url::parse(url).unwrap());
        meta.headers.push((
            "Content-Type".to_string(),
            "application/octet-stream".to_string(),
        ));
        meta
    }

    #[test]
    fn test_unset_directory_makes_operations_no_ops() {
        let mut cache = DiskCache::new();
        let url = Url::parse("http://example.com/a").unwrap();

        assert!(cache.prepare(metadata("http://example.com/a")).is_none());
        assert!(cache.data(&url).is_none());
        assert!(cache.metadata(&url).is_none());
        assert!(!cache.remove(&url));
        assert_eq!(cache.expire(), 0);
        assert_eq!(cache.cache_size(), 0);
    }

    #[test]
    fn test_persist_flag_and_oversized_entries_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = DiskCache::new();
        cache.set_cache_directory(dir.path());
        cache.set_maximum_cache_size(1000);

        let mut meta = metadata("http://example.com/a");
        meta.save_to_disk = false;
        assert!(cache.prepare(meta).is_none());

        let mut meta = metadata("http://example.com/a");
        meta.headers
            .push(("Content-Length".to_string(), "800".to_string()));
        assert!(cache.prepare(meta).is_none());

        let mut meta = metadata("http://example.com/a");
        meta.headers
            .push(("Content-Length".to_string(), "700".to_string()));
        assert!(cache.prepare(meta).is_some());
    }

    #[test]
    fn test_second_prepare_orphans_the_first_pending_entry() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = DiskCache::new();
        cache.set_cache_directory(dir.path());
        let url = Url::parse("http://example.com/a").unwrap();

        let mut first = cache.prepare(metadata("http://example.com/a")).unwrap();
        let mut second = cache.prepare(metadata("http://example.com/a")).unwrap();

        first.write_all(b"first").unwrap();
        cache.insert(first);
        assert!(cache.data(&url).is_none(), "orphaned insert must be a no-op");

        second.write_all(b"second").unwrap();
        cache.insert(second);
        let mut buf = Vec::new();
        cache.data(&url).unwrap().read_to_end(&mut buf).unwrap();
        assert_eq!(buf, b"second");
    }

    #[test]
    fn test_insert_with_foreign_writer_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = DiskCache::new();
        cache.set_cache_directory(dir.path());
        let url = Url::parse("http://example.com/a").unwrap();

        let writer = cache.prepare(metadata("http://example.com/a")).unwrap();
        assert!(cache.remove(&url), "cancel must report success");
        cache.insert(writer);

        assert!(cache.data(&url).is_none());
        assert_eq!(cache.cache_size(), 0);
    }
}
