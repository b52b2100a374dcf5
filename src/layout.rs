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
    fs::create_dir_all,
    path::{Path, PathBuf},
};

use url::Url;

use crate::{codec::CACHE_VERSION, error::Result, key};

/// Sharded directory tree under the cache root.
///
/// Entries live at `<root>/data<CACHE_VERSION>/<shard>/<id>.d` with 16
/// hex-named shard directories, so no single directory accumulates an
/// unbounded number of files. Bumping [`CACHE_VERSION`] moves the whole tree
/// to a fresh data root, leaving stale trees to be cleaned up out of band.
#[derive(Debug, Clone)]
pub(crate) struct CacheLayout {
    root: PathBuf,
}

impl CacheLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Versioned directory that holds the shard tree.
    pub fn data_root(&self) -> PathBuf {
        self.root.join(format!("data{CACHE_VERSION}"))
    }

    /// Creates the data root and all shard directories eagerly.
    pub fn prepare(&self) -> Result<()> {
        let data_root = self.data_root();
        for shard in 0..key::SHARDS {
            create_dir_all(data_root.join(format!("{shard:x}")))?;
        }
        Ok(())
    }

    /// Absolute path of the entry file for `url`.
    pub fn entry_path(&self, url: &Url) -> PathBuf {
        self.data_root().join(key::relative_entry_path(url))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prepare_creates_all_shards() {
        let dir = tempfile::tempdir().unwrap();
        let layout = CacheLayout::new(dir.path());
        layout.prepare().unwrap();

        for shard in 0..key::SHARDS {
            assert!(layout.data_root().join(format!("{shard:x}")).is_dir());
        }
    }

    #[test]
    fn test_entry_path_is_under_its_shard() {
        let layout = CacheLayout::new("/cache");
        let url = Url::parse("http://example.com/a").unwrap();
        let path = layout.entry_path(&url);
        assert!(path.starts_with(layout.data_root()));
        assert!(key::has_entry_suffix(&path));
    }
}
