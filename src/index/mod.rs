pub mod bucket;
pub mod persist;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub use bucket::Posting;
pub use persist::IndexHeader;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::hash::Landmark;

/// Default shard boundary: once a save's estimated byte size would exceed
/// this, the document is split into numbered `<name>.<k>.json` parts.
pub const DEFAULT_SHARD_BYTES: usize = 64 * 1024 * 1024;

/// A mapping from landmark key to a bucket of `(track_id, anchor_time)`
/// postings, plus a `meta` list of track names. Owns all buckets; the
/// matcher only ever borrows a read-only view (spec.md 3, "Ownership").
pub struct Index {
    path: PathBuf,
    header: IndexHeader,
    meta: Vec<String>,
    name_to_id: HashMap<String, u32>,
    buckets: HashMap<u64, Vec<Posting>>,
    bucket_cap: usize,
    finalized: bool,
    overflow_count: u64,
    /// `false` when nothing existed at `path` before this open.
    resumed: bool,
}

impl Index {
    /// Loads an existing index (tolerant of a missing or partial-tail file)
    /// or creates an empty one, under the grid fixed by `cfg`.
    pub fn open(path: &Path, cfg: &Config) -> Result<Self> {
        let loaded = persist::load(path)?;
        let header = if loaded.loaded {
            if !loaded.header.matches_config(cfg) {
                return Err(Error::BadParams(format!(
                    "index at {} was built with a different analysis grid",
                    path.display()
                )));
            }
            loaded.header
        } else {
            IndexHeader::from_config(cfg)
        };

        let name_to_id = loaded
            .meta
            .iter()
            .enumerate()
            .map(|(id, name)| (name.clone(), id as u32))
            .collect();

        Ok(Index {
            path: path.to_path_buf(),
            header,
            meta: loaded.meta,
            name_to_id,
            buckets: loaded.buckets,
            bucket_cap: cfg.bucket_cap,
            finalized: loaded.finalized && loaded.loaded,
            overflow_count: 0,
            resumed: loaded.loaded,
        })
    }

    /// Opens strictly: a missing or unparseable index is `INDEX_UNREADABLE`,
    /// as required of the `query` and `duplicates` commands (spec.md 7).
    pub fn open_for_read(path: &Path, cfg: &Config) -> Result<Self> {
        let index = Self::open(path, cfg)?;
        if !index.resumed {
            return Err(Error::IndexUnreadable(format!(
                "no index found at {}",
                path.display()
            )));
        }
        Ok(index)
    }

    pub fn was_resumed(&self) -> bool {
        self.resumed
    }

    pub fn track_count(&self) -> usize {
        self.meta.len()
    }

    pub fn track_name(&self, track_id: u32) -> Option<&str> {
        self.meta.get(track_id as usize).map(|s| s.as_str())
    }

    pub fn has_track(&self, name: &str) -> bool {
        self.name_to_id.contains_key(name)
    }

    pub fn header(&self) -> &IndexHeader {
        &self.header
    }

    /// Assigns a dense id for `name`, rejecting duplicates. `track_id`
    /// assignment order follows acceptance order (spec.md 5, "Ordering
    /// guarantees").
    pub fn begin_track(&mut self, name: &str) -> Result<u32> {
        if self.name_to_id.contains_key(name) {
            return Err(Error::DuplicateTrack(name.to_string()));
        }
        let id = self.meta.len() as u32;
        self.meta.push(name.to_string());
        self.name_to_id.insert(name.to_string(), id);
        self.finalized = false;
        Ok(id)
    }

    /// Pushes each landmark's posting into its bucket, subject to the
    /// bucket-cap policy. Overflow is silently discarded and counted.
    pub fn append<I: IntoIterator<Item = Landmark>>(&mut self, track_id: u32, landmarks: I) {
        for lm in landmarks {
            let bucket = self.buckets.entry(lm.key).or_default();
            let posting = Posting {
                track: track_id,
                t: lm.anchor_time,
            };
            if !bucket::try_append(bucket, posting, self.bucket_cap) {
                self.overflow_count += 1;
                log::debug!(
                    "bucket {} at cap {}, dropping posting for track {}",
                    lm.key,
                    self.bucket_cap,
                    track_id
                );
            }
        }
    }

    pub fn overflow_count(&self) -> u64 {
        self.overflow_count
    }

    pub fn bucket_len(&self, key: u64) -> usize {
        self.buckets.get(&key).map(|b| b.len()).unwrap_or(0)
    }

    pub fn buckets(&self) -> impl Iterator<Item = (&u64, &Vec<Posting>)> {
        self.buckets.iter()
    }

    pub fn get_bucket(&self, key: u64) -> Option<&Vec<Posting>> {
        self.buckets.get(&key)
    }

    /// Persists the in-memory state atomically. May be called between
    /// tracks as a checkpoint.
    pub fn flush(&self) -> Result<()> {
        persist::save(
            &self.path,
            &self.header,
            &self.meta,
            &self.buckets,
            self.finalized,
            DEFAULT_SHARD_BYTES,
        )
    }

    /// Alias kept for call sites that read more naturally as a mid-build
    /// checkpoint than a terminal flush.
    pub fn checkpoint(&self) -> Result<()> {
        self.flush()
    }

    /// Regroups every bucket's postings by track and sorts per-track times
    /// ascending, then persists. After this, `append`/`begin_track` would
    /// un-finalize the index again.
    pub fn finalize(&mut self) -> Result<()> {
        for bucket in self.buckets.values_mut() {
            bucket::normalize(bucket);
        }
        self.finalized = true;
        self.flush()
    }

    pub fn close(self) -> Result<()> {
        self.flush()
    }
}
