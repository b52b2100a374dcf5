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

//! Age-based eviction over the sharded entry tree.
//!
//! Write time is used as a proxy for usefulness, trading accuracy against
//! never touching file metadata on the read path. Trimming targets 90% of
//! the configured maximum; the 10% slack keeps inserts from re-scanning the
//! tree every time.

use std::{
    fs,
    path::{Path, PathBuf},
    time::SystemTime,
};

use crate::key;

/// Fraction of the maximum size the engine trims down to, in percent.
const GOAL_PERCENT: u64 = 90;

fn goal(maximum: u64) -> u64 {
    maximum / 100 * GOAL_PERCENT
}

/// Scans `data_root`, deletes entries oldest-first while the occupied total
/// exceeds the 90% goal, and returns the remaining total.
///
/// Only files carrying the entry suffix are inspected or deleted; anything
/// else under the tree (including in-flight temp files) is left alone.
pub(crate) fn expire(data_root: &Path, maximum: u64) -> u64 {
    let mut files = Vec::new();
    let mut total = 0u64;
    collect(data_root, &mut files, &mut total);

    let goal = goal(maximum);
    if total <= goal {
        return total;
    }

    // Oldest first. Creation time falls back to mtime on filesystems
    // without birth timestamps.
    files.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));

    for file in files {
        match fs::remove_file(&file.path) {
            Ok(()) => {
                total = total.saturating_sub(file.size);
                tracing::trace!(
                    "[eviction]: evicted {}, {} bytes, total now {total}",
                    file.path.display(),
                    file.size
                );
            }
            Err(e) => {
                tracing::warn!("[eviction]: failed to evict {}: {e}", file.path.display());
            }
        }
        if total <= goal {
            break;
        }
    }

    total
}

struct EntryFile {
    timestamp: SystemTime,
    path: PathBuf,
    size: u64,
}

fn collect(dir: &Path, files: &mut Vec<EntryFile>, total: &mut u64) {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!("[eviction]: cannot enumerate {}: {e}", dir.display());
            return;
        }
    };

    for entry in entries {
        let Ok(entry) = entry else { continue };
        let path = entry.path();
        if path.is_dir() {
            collect(&path, files, total);
            continue;
        }
        if !key::has_entry_suffix(&path) {
            continue;
        }
        let Ok(metadata) = entry.metadata() else { continue };
        let timestamp = metadata
            .created()
            .or_else(|_| metadata.modified())
            .unwrap_or(SystemTime::UNIX_EPOCH);
        let size = metadata.len();
        *total += size;
        files.push(EntryFile {
            timestamp,
            path,
            size,
        });
    }
}
