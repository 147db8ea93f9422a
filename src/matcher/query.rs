use std::collections::HashMap;

use crate::config::Config;
use crate::index::Index;
use crate::pipeline::Pipeline;

/// One candidate track for a query clip, ordered by vote count (spec.md 4.7).
#[derive(Clone, Debug, PartialEq)]
pub struct QueryMatch {
    pub track: u32,
    pub track_name: String,
    /// `anchor_time(index) - anchor_time(query)` at the best-supported offset.
    pub offset: i64,
    pub votes: usize,
}

/// Fingerprints `clip_samples` with the same grid the index was built under
/// and returns the top `top_n` tracks by offset-histogram vote count.
///
/// `pipeline` must have been constructed from a `Config` whose grid matches
/// `index.header()` — callers build both from the same `Config`.
pub fn query(
    index: &Index,
    pipeline: &mut Pipeline,
    clip_samples: &[f32],
    cfg: &Config,
    top_n: usize,
) -> Vec<QueryMatch> {
    let landmarks = pipeline.fingerprint_vec(clip_samples);

    let mut offsets: HashMap<u32, HashMap<i64, usize>> = HashMap::new();

    for lm in &landmarks {
        let Some(bucket) = index.get_bucket(lm.key) else {
            continue;
        };
        if cfg.drop_above > 0 && bucket.len() > cfg.drop_above {
            continue;
        }
        for posting in bucket {
            let offset = posting.t as i64 - lm.anchor_time as i64;
            *offsets
                .entry(posting.track)
                .or_default()
                .entry(offset)
                .or_insert(0) += 1;
        }
    }

    let mut results: Vec<QueryMatch> = offsets
        .into_iter()
        .filter_map(|(track, hist)| {
            let (offset, votes) = best_offset(&hist);
            if votes == 0 {
                return None;
            }
            let track_name = index.track_name(track)?.to_string();
            Some(QueryMatch {
                track,
                track_name,
                offset,
                votes,
            })
        })
        .collect();

    results.sort_by(|a, b| {
        b.votes
            .cmp(&a.votes)
            .then_with(|| a.track.cmp(&b.track))
    });
    results.truncate(top_n);
    results
}

fn best_offset(hist: &HashMap<i64, usize>) -> (i64, usize) {
    let mut entries: Vec<(i64, usize)> = hist.iter().map(|(&o, &c)| (o, c)).collect();
    entries.sort_by(|a, b| a.0.abs().cmp(&b.0.abs()).then(a.0.cmp(&b.0)));
    entries
        .into_iter()
        .max_by_key(|&(offset, count)| (count, std::cmp::Reverse(offset.abs())))
        .unwrap_or((0, 0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::Index;

    fn tone(freq: f32, sr: u32, seconds: f32) -> Vec<f32> {
        let n = (sr as f32 * seconds) as usize;
        (0..n)
            .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / sr as f32).sin())
            .collect()
    }

    fn small_cfg() -> Config {
        let mut c = Config::default();
        c.sr = 8_000;
        c.win = 512;
        c.hop = 128;
        c.zone = 8;
        c.fan = 3;
        c.pairs = 3;
        c
    }

    #[test]
    fn self_match_dominates() {
        let cfg = small_cfg();
        let dir = tempfile::tempdir().unwrap();
        let mut idx = Index::open(&dir.path().join("i.json"), &cfg).unwrap();
        let mut build_pipeline = Pipeline::new(&cfg);

        let track_a = tone(440.0, cfg.sr, 3.0);
        let track_b = tone(660.0, cfg.sr, 3.0);

        let id_a = idx.begin_track("a.wav").unwrap();
        idx.append(id_a, build_pipeline.fingerprint_vec(&track_a));
        let mut build_pipeline_b = Pipeline::new(&cfg);
        let id_b = idx.begin_track("b.wav").unwrap();
        idx.append(id_b, build_pipeline_b.fingerprint_vec(&track_b));

        let clip_start = 1.0;
        let clip_samples = &track_a[(clip_start * cfg.sr as f32) as usize..];
        let mut query_pipeline = Pipeline::new(&cfg);
        let results = query(&idx, &mut query_pipeline, clip_samples, &cfg, 5);

        assert!(!results.is_empty());
        assert_eq!(results[0].track, id_a);
        assert_eq!(results[0].track_name, "a.wav");
    }

    #[test]
    fn unrelated_clip_yields_no_strong_match() {
        let cfg = small_cfg();
        let dir = tempfile::tempdir().unwrap();
        let mut idx = Index::open(&dir.path().join("i.json"), &cfg).unwrap();
        let mut build_pipeline = Pipeline::new(&cfg);
        let track_a = tone(440.0, cfg.sr, 3.0);
        let id_a = idx.begin_track("a.wav").unwrap();
        idx.append(id_a, build_pipeline.fingerprint_vec(&track_a));

        let noise: Vec<f32> = (0..cfg.sr * 2)
            .map(|i| ((i * 2654435761u32) % 2000) as f32 / 1000.0 - 1.0)
            .collect();
        let mut query_pipeline = Pipeline::new(&cfg);
        let results = query(&idx, &mut query_pipeline, &noise, &cfg, 5);

        if let Some(top) = results.first() {
            assert!(top.votes < 20);
        }
    }
}
