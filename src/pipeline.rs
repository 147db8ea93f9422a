use crate::config::Config;
use crate::dsp::{PeakPicker, Stft};
use crate::hash::{Landmark, LandmarkHasher};

/// One DSP pipeline instance: owns the FFT plan, the Hann window, and every
/// scratch buffer the frame/peak/hash stages need. Workers are stateless
/// between files but each owns exactly one `Pipeline` (spec.md 5).
pub struct Pipeline {
    stft: Stft,
    picker: PeakPicker,
    hasher: LandmarkHasher,
}

impl Pipeline {
    pub fn new(cfg: &Config) -> Self {
        Pipeline {
            stft: Stft::new(cfg.win, cfg.hop),
            picker: PeakPicker::new(cfg.top, cfg.min, cfg.whiten, cfg.parabolic_refine),
            hasher: LandmarkHasher::new(
                cfg.zone,
                cfg.fan,
                cfg.pairs,
                cfg.anchor_every,
                cfg.fq,
                cfg.dtq,
            ),
        }
    }

    /// Turns a sample buffer into its landmark stream, in anchor-time order,
    /// via `emit`. No suspension happens inside this call; it is the DSP
    /// steady state spec.md 5 describes.
    pub fn fingerprint<F: FnMut(Landmark)>(&mut self, samples: &[f32], mut emit: F) {
        let picker = &self.picker;
        let hasher = &mut self.hasher;
        self.stft.process(samples, |t, mag| {
            let peaks = picker.pick(mag);
            hasher.push_frame(t, peaks, &mut emit);
        });
    }

    /// Convenience wrapper collecting the landmark stream into a `Vec`.
    pub fn fingerprint_vec(&mut self, samples: &[f32]) -> Vec<Landmark> {
        let mut out = Vec::new();
        self.fingerprint(samples, |lm| out.push(lm));
        out
    }
}
