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

//! Versioned binary codec for one cache entry.
//!
//! On-disk order: `i32` magic, `i32` cache format version, `i32`
//! serialization protocol version, bincode-encoded metadata record, `u8`
//! compressed flag, then either a length-prefixed zstd block (compressed) or
//! the raw payload bytes streamed by the caller (uncompressed). The raw tail
//! is deliberately not length-prefixed so large payloads can be appended to
//! the file as they arrive without buffering.

use std::io::{Read, Write};

use bytes::{Buf, BufMut};

use crate::{
    error::{Error, Result},
    meta::CacheMetadata,
};

/// Identifies files written by this cache. Anything else is left untouched.
pub(crate) const CACHE_MAGIC: i32 = 0x6c61_7264;

/// Version of the overall file format and directory layout.
pub(crate) const CACHE_VERSION: i32 = 1;

/// Version of the metadata record encoding, bumped independently of the file
/// format. Writers cap the stored value at their own maximum.
pub(crate) const PROTOCOL_VERSION: i32 = 1;

/// Entries with a declared content length above this are never compressed.
pub(crate) const MAX_COMPRESSIBLE_LEN: u64 = 2 * 1024 * 1024;

const HEADER_LEN: usize = 12;

/// Whether an entry with `metadata` should be buffered in memory and
/// compressed at commit time, as opposed to streamed raw to its file.
///
/// Only bodies that declare a textual or script content type and fit under
/// [`MAX_COMPRESSIBLE_LEN`] qualify; an undeclared length counts as small.
pub(crate) fn should_compress(metadata: &CacheMetadata) -> bool {
    if metadata
        .content_length()
        .is_some_and(|len| len > MAX_COMPRESSIBLE_LEN)
    {
        return false;
    }
    match metadata.content_type() {
        Some(ct) => {
            ct.starts_with("text/") || ct.contains("javascript") || ct.contains("ecmascript")
        }
        None => false,
    }
}

/// Writes the fixed header, the metadata record and the compressed flag.
///
/// For uncompressed entries this happens when the sink is handed out, so
/// payload bytes can be streamed straight behind it.
pub(crate) fn write_header(
    writer: &mut impl Write,
    metadata: &CacheMetadata,
    compressed: bool,
) -> Result<()> {
    let mut header = [0u8; HEADER_LEN];
    let mut buf = &mut header[..];
    buf.put_i32(CACHE_MAGIC);
    buf.put_i32(CACHE_VERSION);
    buf.put_i32(PROTOCOL_VERSION);
    writer.write_all(&header)?;

    bincode::serialize_into(&mut *writer, metadata)?;
    writer.write_all(&[compressed as u8])?;
    Ok(())
}

/// Compresses `payload` and appends it as one length-prefixed block.
pub(crate) fn write_compressed_payload(writer: &mut impl Write, payload: &[u8]) -> Result<()> {
    let block = zstd::encode_all(payload, 0)?;
    let mut len = [0u8; 4];
    (&mut len[..]).put_u32(block.len() as u32);
    writer.write_all(&len)?;
    writer.write_all(&block)?;
    Ok(())
}

/// Reads and validates the header, returning the metadata record and the
/// compressed flag. The reader is left positioned at the start of the
/// payload.
pub(crate) fn read_header(reader: &mut impl Read) -> Result<(CacheMetadata, bool)> {
    let mut header = [0u8; HEADER_LEN];
    reader.read_exact(&mut header)?;
    let mut buf = &header[..];

    let magic = buf.get_i32();
    if magic != CACHE_MAGIC {
        return Err(Error::NotCacheFile { magic });
    }
    let version = buf.get_i32();
    if version != CACHE_VERSION {
        return Err(Error::VersionMismatch {
            expected: CACHE_VERSION,
            get: version,
        });
    }
    let protocol = buf.get_i32();
    if protocol > PROTOCOL_VERSION {
        return Err(Error::ProtocolTooNew {
            supported: PROTOCOL_VERSION,
            get: protocol,
        });
    }

    let metadata: CacheMetadata = bincode::deserialize_from(&mut *reader)?;
    if !metadata.is_valid() {
        return Err(Error::InvalidMetadata);
    }

    let mut flag = [0u8; 1];
    reader.read_exact(&mut flag)?;
    tracing::trace!(
        "[codec]: read entry header, url: {}, compressed: {}",
        metadata.url,
        flag[0] != 0
    );
    Ok((metadata, flag[0] != 0))
}

/// Reads and decompresses the length-prefixed payload block.
pub(crate) fn read_compressed_payload(reader: &mut impl Read) -> Result<Vec<u8>> {
    let mut len = [0u8; 4];
    reader.read_exact(&mut len)?;
    let len = (&len[..]).get_u32() as usize;
    let mut block = vec![0u8; len];
    reader.read_exact(&mut block)?;
    let payload = zstd::decode_all(&block[..])?;
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use url::Url;

    use super::*;

    fn metadata(content_type: &str, content_length: Option<&str>) -> CacheMetadata {
        let mut meta = CacheMetadata::new(Url::parse("http://example.com/a").unwrap());
        meta.headers
            .push(("Content-Type".to_string(), content_type.to_string()));
        if let Some(len) = content_length {
            meta.headers
                .push(("Content-Length".to_string(), len.to_string()));
        }
        meta
    }

    #[test]
    fn test_header_round_trip() {
        let meta = metadata("text/html", Some("128"));
        let mut buf = Vec::new();
        write_header(&mut buf, &meta, true).unwrap();

        let (restored, compressed) = read_header(&mut &buf[..]).unwrap();
        assert_eq!(restored, meta);
        assert!(compressed);
    }

    #[test]
    fn test_foreign_file_is_not_a_cache_file() {
        let buf = b"PNG\r\n\x1a\nsomething that is clearly not ours".to_vec();
        let err = read_header(&mut &buf[..]).unwrap_err();
        assert!(matches!(err, Error::NotCacheFile { .. }));
    }

    #[test]
    fn test_version_mismatch_is_detected() {
        let meta = metadata("text/html", None);
        let mut buf = Vec::new();
        write_header(&mut buf, &meta, false).unwrap();
        (&mut buf[4..8]).put_i32(CACHE_VERSION + 1);

        let err = read_header(&mut &buf[..]).unwrap_err();
        assert!(matches!(
            err,
            Error::VersionMismatch { expected: CACHE_VERSION, get } if get == CACHE_VERSION + 1
        ));
    }

    #[test]
    fn test_newer_protocol_is_unreadable() {
        let meta = metadata("text/html", None);
        let mut buf = Vec::new();
        write_header(&mut buf, &meta, false).unwrap();
        (&mut buf[8..12]).put_i32(PROTOCOL_VERSION + 1);

        let err = read_header(&mut &buf[..]).unwrap_err();
        assert!(matches!(err, Error::ProtocolTooNew { .. }));
    }

    #[test]
    fn test_headerless_metadata_is_invalid() {
        let meta = CacheMetadata::new(Url::parse("http://example.com/a").unwrap());
        let mut buf = Vec::new();
        write_header(&mut buf, &meta, false).unwrap();

        let err = read_header(&mut &buf[..]).unwrap_err();
        assert!(matches!(err, Error::InvalidMetadata));
    }

    #[test]
    fn test_compressed_payload_round_trip() {
        let payload = b"fn main() { println!(\"hello\"); }".repeat(64);
        let mut buf = Vec::new();
        write_compressed_payload(&mut buf, &payload).unwrap();
        assert!(buf.len() < payload.len());

        let restored = read_compressed_payload(&mut &buf[..]).unwrap();
        assert_eq!(restored, payload);
    }

    #[test]
    fn test_compression_eligibility() {
        assert!(should_compress(&metadata("text/plain", Some("50"))));
        assert!(should_compress(&metadata("text/html; charset=utf-8", None)));
        assert!(should_compress(&metadata("application/javascript", None)));
        assert!(!should_compress(&metadata("application/octet-stream", None)));
        assert!(!should_compress(&metadata("text/plain", Some("3145728"))));
        assert!(!should_compress(&CacheMetadata::new(
            Url::parse("http://example.com/a").unwrap()
        )));
    }
}
