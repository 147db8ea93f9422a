use std::cmp::Ordering;
use std::collections::VecDeque;

use crate::dsp::Peak;

/// Bits allotted to each quantized bin in a packed landmark key. 12 bits
/// comfortably covers `win/2` for any realistic window size (up to 8192).
const F_BITS: u32 = 12;
/// Bits allotted to the quantized frame delta.
const DT_BITS: u32 = 10;
const F_MASK: u64 = (1 << F_BITS) - 1;
const DT_MASK: u64 = (1 << DT_BITS) - 1;

/// `(hash, anchor_time)`: a single landmark streamed to the indexer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Landmark {
    pub key: u64,
    pub anchor_time: u32,
}

/// Packs `(f1_q, f2_q, dt_q)` into a 34-bit key stored in a `u64`.
pub fn pack_key(f1_q: u32, f2_q: u32, dt_q: u32) -> u64 {
    ((f1_q as u64 & F_MASK) << (F_BITS + DT_BITS))
        | ((f2_q as u64 & F_MASK) << DT_BITS)
        | (dt_q as u64 & DT_MASK)
}

pub fn unpack_key(key: u64) -> (u32, u32, u32) {
    let f1 = ((key >> (F_BITS + DT_BITS)) & F_MASK) as u32;
    let f2 = ((key >> DT_BITS) & F_MASK) as u32;
    let dt = (key & DT_MASK) as u32;
    (f1, f2, dt)
}

fn quantize(bin: f32, q: u32) -> u32 {
    (bin / q as f32).round().max(0.0) as u32
}

/// Pairs anchor peaks with future target peaks within a `zone`-frame window
/// and packs each retained pair into a landmark key (spec.md 4.4).
///
/// Owns a ring buffer of the last `zone + 1` frames' peak sets, so memory is
/// `O(zone * top)` regardless of track length.
pub struct LandmarkHasher {
    zone: usize,
    fan: usize,
    pairs: usize,
    anchor_every: usize,
    fq: u32,
    dtq: u32,
    ring: VecDeque<(usize, Vec<Peak>)>,
}

impl LandmarkHasher {
    pub fn new(zone: usize, fan: usize, pairs: usize, anchor_every: usize, fq: u32, dtq: u32) -> Self {
        LandmarkHasher {
            zone,
            fan,
            pairs,
            anchor_every,
            fq,
            dtq,
            ring: VecDeque::with_capacity(zone + 1),
        }
    }

    /// Feeds one frame's peak set (already sorted by descending magnitude,
    /// as [`crate::dsp::PeakPicker::pick`] returns them) and emits any
    /// landmarks whose anchor frame has now seen its full forward window.
    pub fn push_frame<F: FnMut(Landmark)>(&mut self, t: usize, peaks: Vec<Peak>, mut emit: F) {
        self.ring.push_back((t, peaks));
        if self.ring.len() > self.zone + 1 {
            self.ring.pop_front();
        }
        if self.ring.len() < self.zone + 1 {
            return;
        }

        let (t_a, anchor_peaks) = &self.ring[0];
        let t_a = *t_a;
        if t_a % self.anchor_every != 0 {
            return;
        }

        for f1 in anchor_peaks {
            let mut candidates: Vec<(f32, usize, f32)> = Vec::new(); // (f2_bin, dt, score)
            for dt in 1..=self.zone {
                let (_, future_peaks) = &self.ring[dt];
                for f2 in future_peaks.iter().take(self.fan) {
                    let score = f1.mag * f2.mag;
                    candidates.push((f2.bin, dt, score));
                }
            }

            candidates.sort_by(|a, b| {
                b.2.partial_cmp(&a.2)
                    .unwrap_or(Ordering::Equal)
                    .then_with(|| a.1.cmp(&b.1))
                    .then_with(|| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal))
            });
            candidates.truncate(self.pairs);

            for (f2_bin, dt, _) in candidates {
                let f1_q = quantize(f1.bin, self.fq);
                let f2_q = quantize(f2_bin, self.fq);
                let dt_q = quantize(dt as f32, self.dtq);
                emit(Landmark {
                    key: pack_key(f1_q, f2_q, dt_q),
                    anchor_time: t_a as u32,
                });
            }
        }
    }
}
