use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Every tunable the core recognizes (spec.md "Configuration recognized by the core").
///
/// The subset that must agree between `build` and `query` is mirrored into
/// [`crate::index::IndexHeader`] and checked on load.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Analysis sample rate in Hz. Fixed across build and query.
    pub sr: u32,
    /// Channel count after downmix (always 1; kept for header bookkeeping).
    pub ch: u16,
    /// Analysis window length in samples. Must be a power of two.
    pub win: usize,
    /// Hop size in samples between successive frames.
    pub hop: usize,
    /// Max peaks retained per frame.
    pub top: usize,
    /// Noise floor a bin's log-magnitude must clear to be a peak candidate.
    pub min: f32,
    /// Max target peaks considered per future frame when pairing.
    pub fan: usize,
    /// Only anchor every `anchor_every`-th frame.
    pub anchor_every: usize,
    /// Max forward frame distance to a target peak.
    pub zone: usize,
    /// Max retained targets per anchor.
    pub pairs: usize,
    /// Bin quantization divisor for landmark keys.
    pub fq: u32,
    /// Frame-delta quantization divisor for landmark keys.
    pub dtq: u32,
    /// Max postings retained per bucket before overflow is silently dropped.
    pub bucket_cap: usize,
    /// Optional hard cap on decoded seconds per file (0 = unlimited).
    pub sec: u32,
    /// Worker pool size for `build`.
    pub threads: usize,
    /// Whether peak bins are parabolically refined to sub-bin precision.
    pub parabolic_refine: bool,
    /// Whether a per-frame median is subtracted before peak picking.
    pub whiten: bool,

    /// Absolute minimum votes on the best offset for a duplicate pair.
    pub min_matches: usize,
    /// Minimum `best_count / total_pairs` consistency ratio.
    pub min_ratio: f32,
    /// Cap applied to a bucket at match time after stop-key filtering (0 = unlimited).
    pub max_bucket: usize,
    /// Buckets whose raw size exceeds this are dropped at match time as stop keys.
    pub drop_above: usize,
}

impl Default for Config {
    fn default() -> Self {
        let win = 4096;
        let bucket_cap = 250;
        Config {
            sr: 11_025,
            ch: 1,
            win,
            hop: win / 8,
            top: 16,
            min: 1.0,
            fan: 3,
            anchor_every: 1,
            zone: 32,
            pairs: 3,
            fq: 1,
            dtq: 1,
            bucket_cap,
            sec: 0,
            threads: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            parabolic_refine: false,
            whiten: false,
            min_matches: 5,
            min_ratio: 0.18,
            max_bucket: 0,
            drop_above: bucket_cap * 2,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if !self.win.is_power_of_two() {
            return Err(Error::BadParams(format!(
                "win must be a power of two, got {}",
                self.win
            )));
        }
        if self.hop == 0 || self.hop > self.win {
            return Err(Error::BadParams(format!(
                "hop must be in (0, win], got hop={} win={}",
                self.hop, self.win
            )));
        }
        if self.zone == 0 {
            return Err(Error::BadParams("zone must be >= 1".into()));
        }
        if self.pairs == 0 {
            return Err(Error::BadParams("pairs must be >= 1".into()));
        }
        if self.top == 0 {
            return Err(Error::BadParams("top must be >= 1".into()));
        }
        if self.fan == 0 {
            return Err(Error::BadParams("fan must be >= 1".into()));
        }
        if self.anchor_every == 0 {
            return Err(Error::BadParams("anchor_every must be >= 1".into()));
        }
        if self.fq == 0 || self.dtq == 0 {
            return Err(Error::BadParams("fq and dtq must be >= 1".into()));
        }
        if self.threads == 0 {
            return Err(Error::BadParams("threads must be >= 1".into()));
        }
        Ok(())
    }

    /// The subset that must match between the index that built a file and the
    /// query that reads it back.
    pub fn grid_matches(&self, other: &Config) -> bool {
        self.sr == other.sr
            && self.win == other.win
            && self.hop == other.hop
            && self.fq == other.fq
            && self.dtq == other.dtq
            && self.parabolic_refine == other.parabolic_refine
            && self.whiten == other.whiten
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn non_power_of_two_win_rejected() {
        let mut cfg = Config::default();
        cfg.win = 4000;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn hop_larger_than_win_rejected() {
        let mut cfg = Config::default();
        cfg.hop = cfg.win + 1;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn grid_mismatch_detected() {
        let a = Config::default();
        let mut b = Config::default();
        b.sr = 22_050;
        assert!(!a.grid_matches(&b));
    }
}
