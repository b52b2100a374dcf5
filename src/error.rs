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

/// Error type of this crate.
///
/// Corruption variants never escape the public cache operations. The store
/// translates them into a miss after deleting the offending file, except
/// [`Error::NotCacheFile`], which leaves the file untouched.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Metadata record codec error.
    #[error("metadata codec error: {0}")]
    Metadata(#[from] bincode::Error),
    /// The file was not written by this cache. Must not be deleted.
    #[error("not a cache file, magic: {magic:#010x}")]
    NotCacheFile {
        /// Magic number found in the file.
        magic: i32,
    },
    /// The file carries a different cache format version and is stale.
    #[error("cache format version mismatch, expected: {expected}, get: {get}")]
    VersionMismatch {
        /// Format version this build reads and writes.
        expected: i32,
        /// Format version found in the file.
        get: i32,
    },
    /// The metadata record was encoded by a newer serialization protocol.
    #[error("serialization protocol too new, supported: {supported}, get: {get}")]
    ProtocolTooNew {
        /// Highest protocol version this build understands.
        supported: i32,
        /// Protocol version found in the file.
        get: i32,
    },
    /// The decoded identifier does not map back to the file it was read from.
    #[error("entry file name does not match its identifier")]
    KeyMismatch,
    /// The decoded metadata record is malformed.
    #[error("invalid metadata record")]
    InvalidMetadata,
}

/// Result type of this crate.
pub type Result<T> = core::result::Result<T, Error>;
