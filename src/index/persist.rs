use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::index::bucket::Posting;

/// The subset of `Config` that must agree between the index that built a
/// file and any query against it (spec.md Open Question 3).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct IndexHeader {
    pub version: u32,
    pub sr: u32,
    pub win: usize,
    pub hop: usize,
    pub fq: u32,
    pub dtq: u32,
    pub parabolic_refine: bool,
    pub whiten: bool,
    /// Always "frame" — spec.md Open Question 1 freezes the persisted time
    /// unit as frame index, never seconds.
    pub frame_unit: String,
}

pub const INDEX_VERSION: u32 = 1;

impl IndexHeader {
    pub fn from_config(cfg: &Config) -> Self {
        IndexHeader {
            version: INDEX_VERSION,
            sr: cfg.sr,
            win: cfg.win,
            hop: cfg.hop,
            fq: cfg.fq,
            dtq: cfg.dtq,
            parabolic_refine: cfg.parabolic_refine,
            whiten: cfg.whiten,
            frame_unit: "frame".to_string(),
        }
    }

    pub fn matches_config(&self, cfg: &Config) -> bool {
        self.sr == cfg.sr
            && self.win == cfg.win
            && self.hop == cfg.hop
            && self.fq == cfg.fq
            && self.dtq == cfg.dtq
            && self.parabolic_refine == cfg.parabolic_refine
            && self.whiten == cfg.whiten
            && self.frame_unit == "frame"
    }
}

/// Two shapes coexist on disk: flat `(track_id, t)` pairs before
/// finalization, and per-track `(track_id, [t0, dt1, dt2, ...])` delta lists
/// after. `serde(untagged)` lets a single field hold either, and all shape
/// handling is confined to this module (spec.md Design Notes).
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum PersistedBucket {
    Raw(Vec<(u32, u32)>),
    Grouped(Vec<(u32, Vec<u32>)>),
}

#[derive(Serialize, Deserialize)]
struct PersistedPart {
    header: IndexHeader,
    meta: Vec<String>,
    finalized: bool,
    index: HashMap<String, PersistedBucket>,
}

pub struct LoadedIndex {
    pub header: IndexHeader,
    pub meta: Vec<String>,
    pub buckets: HashMap<u64, Vec<Posting>>,
    pub finalized: bool,
    /// `false` if nothing was found at `path` at all (a fresh, empty start).
    pub loaded: bool,
}

fn flatten(key: u64, bucket: &PersistedBucket, out: &mut Vec<Posting>) {
    let _ = key;
    match bucket {
        PersistedBucket::Raw(pairs) => {
            out.extend(pairs.iter().map(|&(track, t)| Posting { track, t }));
        }
        PersistedBucket::Grouped(groups) => {
            for (track, deltas) in groups {
                let mut t = 0u32;
                for (i, &d) in deltas.iter().enumerate() {
                    t = if i == 0 { d } else { t + d };
                    out.push(Posting { track: *track, t });
                }
            }
        }
    }
}

fn to_persisted(bucket: &[Posting], finalized: bool) -> PersistedBucket {
    if !finalized {
        return PersistedBucket::Raw(bucket.iter().map(|p| (p.track, p.t)).collect());
    }
    let mut groups: Vec<(u32, Vec<u32>)> = Vec::new();
    for posting in bucket {
        match groups.last_mut() {
            Some((track, times)) if *track == posting.track => times.push(posting.t),
            _ => groups.push((posting.track, vec![posting.t])),
        }
    }
    let groups = groups
        .into_iter()
        .map(|(track, times)| {
            let mut deltas = Vec::with_capacity(times.len());
            let mut prev = 0u32;
            for (i, &t) in times.iter().enumerate() {
                deltas.push(if i == 0 { t } else { t - prev });
                prev = t;
            }
            (track, deltas)
        })
        .collect();
    PersistedBucket::Grouped(groups)
}

/// Writes `path`'s temporary sibling, then renames it into place. On any
/// error the temporary is removed and the previous good file (if any) is
/// left untouched (spec.md 4.5 atomic write discipline).
fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
    let file_name = format!(
        "{}.tmp-{}-{}",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("index"),
        std::process::id(),
        seq
    );
    let tmp = path.with_file_name(file_name);
    let write_result = fs::write(&tmp, bytes);
    if write_result.is_err() {
        let _ = fs::remove_file(&tmp);
        return write_result.map_err(|e| Error::WriteFailed(e.to_string()));
    }
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(Error::WriteFailed(e.to_string()));
    }
    Ok(())
}

fn shard_path(base: &Path, k: usize) -> PathBuf {
    let stem = base
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("index");
    let ext = base.extension().and_then(|s| s.to_str()).unwrap_or("json");
    let name = format!("{stem}.{k}.{ext}");
    base.with_file_name(name)
}

/// Saves `buckets`, splitting into numbered `<name>.<k>.json` parts (each
/// carrying its own copy of `meta`) once the serialized document would
/// exceed `shard_bytes_limit`.
pub fn save(
    path: &Path,
    header: &IndexHeader,
    meta: &[String],
    buckets: &HashMap<u64, Vec<Posting>>,
    finalized: bool,
    shard_bytes_limit: usize,
) -> Result<()> {
    let entries: Vec<(String, PersistedBucket)> = buckets
        .iter()
        .map(|(k, v)| (k.to_string(), to_persisted(v, finalized)))
        .collect();

    let full_bytes_estimate: usize = entries
        .iter()
        .map(|(k, v)| k.len() + estimate_bucket_bytes(v))
        .sum();

    if full_bytes_estimate <= shard_bytes_limit {
        let part = PersistedPart {
            header: header.clone(),
            meta: meta.to_vec(),
            finalized,
            index: entries.into_iter().collect(),
        };
        let bytes = serde_json::to_vec(&part)?;
        atomic_write(path, &bytes)?;
        // Remove any stale shard files from a previous, larger save.
        for k in 0.. {
            let shard = shard_path(path, k);
            if shard.exists() {
                let _ = fs::remove_file(&shard);
            } else {
                break;
            }
        }
        return Ok(());
    }

    let mut shard_idx = 0usize;
    let mut current: HashMap<String, PersistedBucket> = HashMap::new();
    let mut current_bytes = 0usize;
    let mut written_shards = Vec::new();

    for (k, v) in entries {
        let entry_bytes = k.len() + estimate_bucket_bytes(&v);
        if !current.is_empty() && current_bytes + entry_bytes > shard_bytes_limit {
            let part = PersistedPart {
                header: header.clone(),
                meta: meta.to_vec(),
                finalized,
                index: std::mem::take(&mut current),
            };
            let bytes = serde_json::to_vec(&part)?;
            let shard = shard_path(path, shard_idx);
            atomic_write(&shard, &bytes)?;
            written_shards.push(shard);
            shard_idx += 1;
            current_bytes = 0;
        }
        current_bytes += entry_bytes;
        current.insert(k, v);
    }
    if !current.is_empty() {
        let part = PersistedPart {
            header: header.clone(),
            meta: meta.to_vec(),
            finalized,
            index: current,
        };
        let bytes = serde_json::to_vec(&part)?;
        let shard = shard_path(path, shard_idx);
        atomic_write(&shard, &bytes)?;
        written_shards.push(shard);
        shard_idx += 1;
    }

    // Clean up a stale unsharded file and any extra trailing shards.
    let _ = fs::remove_file(path);
    for k in shard_idx.. {
        let shard = shard_path(path, k);
        if shard.exists() {
            let _ = fs::remove_file(&shard);
        } else {
            break;
        }
    }
    Ok(())
}

fn estimate_bucket_bytes(bucket: &PersistedBucket) -> usize {
    match bucket {
        PersistedBucket::Raw(pairs) => pairs.len() * 16,
        PersistedBucket::Grouped(groups) => {
            groups.iter().map(|(_, d)| 8 + d.len() * 8).sum()
        }
    }
}

fn parse_part(bytes: &[u8]) -> Result<PersistedPart> {
    serde_json::from_slice(bytes).map_err(Error::Json)
}

/// Loads `path`, tolerating a missing file (a fresh start) and a partial
/// shard tail (resumes from the last shard that parsed cleanly — spec.md
/// 7, `INDEX_TRUNCATED`).
pub fn load(path: &Path) -> Result<LoadedIndex> {
    if path.exists() {
        let bytes = fs::read(path).map_err(Error::Io)?;
        return match parse_part(&bytes) {
            Ok(part) => {
                let mut buckets = HashMap::new();
                for (k, v) in &part.index {
                    let key: u64 = k
                        .parse()
                        .map_err(|_| Error::IndexUnreadable(format!("bad key {k}")))?;
                    let mut flat = Vec::new();
                    flatten(key, v, &mut flat);
                    buckets.insert(key, flat);
                }
                Ok(LoadedIndex {
                    header: part.header,
                    meta: part.meta,
                    buckets,
                    finalized: part.finalized,
                    loaded: true,
                })
            }
            Err(_) => Ok(LoadedIndex {
                header: IndexHeader {
                    version: INDEX_VERSION,
                    sr: 0,
                    win: 0,
                    hop: 0,
                    fq: 0,
                    dtq: 0,
                    parabolic_refine: false,
                    whiten: false,
                    frame_unit: "frame".to_string(),
                },
                meta: Vec::new(),
                buckets: HashMap::new(),
                finalized: false,
                loaded: false,
            }),
        };
    }

    // No unsharded file; look for a shard sequence.
    let mut header = None;
    let mut meta = Vec::new();
    let mut buckets: HashMap<u64, Vec<Posting>> = HashMap::new();
    let mut finalized = true;
    let mut any_loaded = false;

    for k in 0.. {
        let shard = shard_path(path, k);
        if !shard.exists() {
            break;
        }
        let bytes = match fs::read(&shard) {
            Ok(b) => b,
            Err(_) => break,
        };
        match parse_part(&bytes) {
            Ok(part) => {
                if header.is_none() {
                    header = Some(part.header.clone());
                    meta = part.meta.clone();
                }
                finalized = finalized && part.finalized;
                for (key_str, v) in &part.index {
                    let key: u64 = match key_str.parse() {
                        Ok(k) => k,
                        Err(_) => continue,
                    };
                    let entry = buckets.entry(key).or_default();
                    flatten(key, v, entry);
                }
                any_loaded = true;
            }
            Err(_) => {
                log::warn!(
                    "index shard {} failed to parse, resuming from last good shard",
                    shard.display()
                );
                break;
            }
        }
    }

    match header {
        Some(header) => Ok(LoadedIndex {
            header,
            meta,
            buckets,
            finalized,
            loaded: any_loaded,
        }),
        None => Ok(LoadedIndex {
            header: IndexHeader {
                version: INDEX_VERSION,
                sr: 0,
                win: 0,
                hop: 0,
                fq: 0,
                dtq: 0,
                parabolic_refine: false,
                whiten: false,
                frame_unit: "frame".to_string(),
            },
            meta: Vec::new(),
            buckets: HashMap::new(),
            finalized: false,
            loaded: false,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as Map;

    fn header() -> IndexHeader {
        IndexHeader::from_config(&Config::default())
    }

    #[test]
    fn roundtrip_raw_buckets() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");

        let mut buckets: Map<u64, Vec<Posting>> = Map::new();
        buckets.insert(42, vec![Posting { track: 0, t: 1 }, Posting { track: 1, t: 2 }]);

        save(&path, &header(), &["a.wav".into(), "b.wav".into()], &buckets, false, 1 << 20).unwrap();
        let loaded = load(&path).unwrap();
        assert!(loaded.loaded);
        assert_eq!(loaded.meta, vec!["a.wav", "b.wav"]);
        assert_eq!(loaded.buckets[&42].len(), 2);
    }

    #[test]
    fn roundtrip_finalized_buckets_via_deltas() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");

        let mut buckets: Map<u64, Vec<Posting>> = Map::new();
        buckets.insert(
            7,
            vec![
                Posting { track: 0, t: 3 },
                Posting { track: 0, t: 10 },
                Posting { track: 1, t: 1 },
            ],
        );

        save(&path, &header(), &["a.wav".into()], &buckets, true, 1 << 20).unwrap();
        let loaded = load(&path).unwrap();
        let mut got = loaded.buckets[&7].clone();
        got.sort_by_key(|p| (p.track, p.t));
        let mut want = buckets[&7].clone();
        want.sort_by_key(|p| (p.track, p.t));
        assert_eq!(got, want);
    }

    #[test]
    fn missing_file_is_a_fresh_start() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.json");
        let loaded = load(&path).unwrap();
        assert!(!loaded.loaded);
        assert!(loaded.buckets.is_empty());
    }

    #[test]
    fn sharding_splits_large_indexes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.json");

        let mut buckets: Map<u64, Vec<Posting>> = Map::new();
        for k in 0..200u64 {
            buckets.insert(k, vec![Posting { track: 0, t: k as u32 }; 20]);
        }

        save(&path, &header(), &["a.wav".into()], &buckets, false, 2048).unwrap();
        assert!(!path.exists());
        assert!(shard_path(&path, 0).exists());

        let loaded = load(&path).unwrap();
        assert!(loaded.loaded);
        assert_eq!(loaded.buckets.len(), 200);
    }

    #[test]
    fn truncated_shard_tail_resumes_from_last_good() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("res.json");

        let part0 = PersistedPart {
            header: header(),
            meta: vec!["a.wav".into()],
            finalized: false,
            index: {
                let mut m = HashMap::new();
                m.insert("1".to_string(), PersistedBucket::Raw(vec![(0, 1)]));
                m
            },
        };
        fs::write(shard_path(&path, 0), serde_json::to_vec(&part0).unwrap()).unwrap();
        fs::write(shard_path(&path, 1), b"{not valid json").unwrap();

        let loaded = load(&path).unwrap();
        assert!(loaded.loaded);
        assert_eq!(loaded.meta, vec!["a.wav"]);
        assert_eq!(loaded.buckets.len(), 1);
    }
}
