/// A peak found in a frame's magnitude spectrum.
///
/// `bin` is fractional when parabolic refinement is enabled; consumers that
/// need an index into `mag[]` round it to the nearest integer.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Peak {
    pub bin: f32,
    pub mag: f32,
}

/// Per-frame peak selection: local maxima over a noise floor, optionally
/// whitened and parabolically refined.
pub struct PeakPicker {
    top: usize,
    min: f32,
    whiten: bool,
    parabolic: bool,
}

impl PeakPicker {
    pub fn new(top: usize, min: f32, whiten: bool, parabolic: bool) -> Self {
        PeakPicker {
            top,
            min,
            whiten,
            parabolic,
        }
    }

    /// Returns up to `top` peaks, ordered by descending magnitude with a
    /// stable tie-break (lower bin index wins exact ties).
    pub fn pick(&self, mag: &[f32]) -> Vec<Peak> {
        if mag.len() < 5 {
            return Vec::new();
        }

        let whitened;
        let spectrum: &[f32] = if self.whiten {
            whitened = subtract_median(mag);
            &whitened
        } else {
            mag
        };

        let mut candidates: Vec<(usize, f32)> = Vec::new();
        for k in 2..spectrum.len() - 2 {
            let v = spectrum[k];
            if v < self.min {
                continue;
            }
            let is_local_max = v >= spectrum[k - 2]
                && v >= spectrum[k - 1]
                && v >= spectrum[k + 1]
                && v >= spectrum[k + 2];
            if is_local_max {
                candidates.push((k, v));
            }
        }

        candidates.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        candidates.truncate(self.top);

        candidates
            .into_iter()
            .map(|(k, v)| {
                let bin = if self.parabolic {
                    refine(spectrum, k)
                } else {
                    k as f32
                };
                Peak { bin, mag: v }
            })
            .collect()
    }
}

/// Subtracts a coarse per-frame median, sampled every ~0.5% of bins.
fn subtract_median(mag: &[f32]) -> Vec<f32> {
    let stride = (mag.len() / 200).max(1);
    let mut samples: Vec<f32> = mag.iter().step_by(stride).copied().collect();
    samples.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let median = samples[samples.len() / 2];
    mag.iter().map(|&v| (v - median).max(0.0)).collect()
}

/// Parabolic interpolation vertex from a bin and its immediate neighbors.
fn refine(spectrum: &[f32], k: usize) -> f32 {
    let l = spectrum[k - 1];
    let c = spectrum[k];
    let r = spectrum[k + 1];
    let denom = l - 2.0 * c + r;
    if denom.abs() < 1e-9 {
        return k as f32;
    }
    k as f32 + 0.5 * (l - r) / denom
}
