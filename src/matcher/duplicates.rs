use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use crate::config::Config;
use crate::index::{Index, Posting};

/// One duplicate/near-duplicate pair found by the offset-histogram pass.
#[derive(Clone, Debug, PartialEq)]
pub struct DuplicatePair {
    pub track_a: u32,
    pub track_b: u32,
    /// `t_a(track_a) - t_a(track_b)` at the histogram mode, in frame units.
    pub best_offset: i64,
    pub best_count: usize,
    pub total_pairs: usize,
    pub score: f32,
}

/// Runs the duplicate pass over an already-built index (spec.md 4.6).
///
/// Never mutates the index; `index.buckets()` already gives the canonical
/// flat `(track, t)` shape regardless of whether the on-disk file was raw
/// or finalized-and-delta-encoded.
pub fn find_duplicates(index: &Index, cfg: &Config) -> Vec<DuplicatePair> {
    let mut pair_count: HashMap<(u32, u32), usize> = HashMap::new();
    let mut surviving: Vec<Vec<Posting>> = Vec::new();

    for (_, bucket) in index.buckets() {
        if cfg.drop_above > 0 && bucket.len() > cfg.drop_above {
            continue;
        }

        let mut b = bucket.clone();
        b.sort_by_key(|p| (p.track, p.t));
        b.dedup();
        if cfg.max_bucket > 0 && b.len() > cfg.max_bucket {
            b.truncate(cfg.max_bucket);
        }
        if b.len() < 2 {
            continue;
        }

        let mut ids: Vec<u32> = b.iter().map(|p| p.track).collect();
        ids.sort_unstable();
        ids.dedup();
        for i in 0..ids.len() {
            for j in (i + 1)..ids.len() {
                *pair_count.entry((ids[i], ids[j])).or_insert(0) += 1;
            }
        }
        surviving.push(b);
    }

    let candidates: HashSet<(u32, u32)> = pair_count
        .into_iter()
        .filter(|&(_, c)| c >= cfg.min_matches)
        .map(|(pair, _)| pair)
        .collect();

    if candidates.is_empty() {
        return Vec::new();
    }

    let mut offsets: HashMap<(u32, u32), HashMap<i64, usize>> = HashMap::new();
    let mut totals: HashMap<(u32, u32), usize> = HashMap::new();

    for bucket in &surviving {
        let mut by_track: HashMap<u32, Vec<u32>> = HashMap::new();
        for p in bucket {
            by_track.entry(p.track).or_default().push(p.t);
        }
        let mut ids: Vec<u32> = by_track.keys().copied().collect();
        ids.sort_unstable();

        for i in 0..ids.len() {
            for j in (i + 1)..ids.len() {
                let pair = (ids[i], ids[j]);
                if !candidates.contains(&pair) {
                    continue;
                }
                let times_a = &by_track[&ids[i]];
                let times_b = &by_track[&ids[j]];
                let hist = offsets.entry(pair).or_default();
                for &ta in times_a {
                    for &tb in times_b {
                        let offset = ta as i64 - tb as i64;
                        *hist.entry(offset).or_insert(0) += 1;
                        *totals.entry(pair).or_insert(0) += 1;
                    }
                }
            }
        }
    }

    let mut results = Vec::new();
    for (pair, hist) in offsets {
        let total = totals[&pair];
        let (best_offset, best_count) = histogram_mode(&hist);
        let score = best_count as f32 / total as f32;
        if best_count >= cfg.min_matches && score >= cfg.min_ratio {
            results.push(DuplicatePair {
                track_a: pair.0,
                track_b: pair.1,
                best_offset,
                best_count,
                total_pairs: total,
                score,
            });
        }
    }

    results.sort_by(|x, y| {
        y.best_count
            .cmp(&x.best_count)
            .then_with(|| y.score.partial_cmp(&x.score).unwrap_or(Ordering::Equal))
            .then_with(|| (x.track_a, x.track_b).cmp(&(y.track_a, y.track_b)))
    });
    results
}

/// The histogram's mode, with a deterministic tie-break (smallest absolute
/// offset, then smallest signed offset) so results are bit-identical across
/// runs regardless of hash-map iteration order.
fn histogram_mode(hist: &HashMap<i64, usize>) -> (i64, usize) {
    let mut entries: Vec<(i64, usize)> = hist.iter().map(|(&o, &c)| (o, c)).collect();
    entries.sort_by(|a, b| a.0.abs().cmp(&b.0.abs()).then(a.0.cmp(&b.0)));
    entries
        .into_iter()
        .max_by_key(|&(offset, count)| (count, std::cmp::Reverse(offset.abs())))
        .unwrap_or((0, 0))
}
