use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::sync::Arc;

use crate::dsp::window::hann;

/// Slides a Hann-windowed analysis frame over a sample buffer and emits
/// half-spectra in log-magnitude domain.
///
/// One FFT plan and one set of scratch buffers are owned per pipeline
/// instance (spec.md 4.2): no allocation happens per frame in the steady
/// state, and two `Stft` instances can run on separate threads without
/// sharing state.
pub struct Stft {
    win: usize,
    hop: usize,
    window: Vec<f32>,
    fft: Arc<dyn Fft<f32>>,
    scratch: Vec<Complex<f32>>,
    mag: Vec<f32>,
}

impl Stft {
    pub fn new(win: usize, hop: usize) -> Self {
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(win);
        Stft {
            win,
            hop,
            window: hann(win),
            fft,
            scratch: vec![Complex::new(0.0, 0.0); win],
            mag: vec![0.0; win / 2],
        }
    }

    pub fn win(&self) -> usize {
        self.win
    }

    pub fn hop(&self) -> usize {
        self.hop
    }

    /// Frame count that `process` would emit for a buffer of `len` samples.
    pub fn frame_count(&self, len: usize) -> usize {
        if len < self.win {
            0
        } else {
            (len - self.win) / self.hop + 1
        }
    }

    /// Slides across `samples`, invoking `on_frame(t, magnitudes)` for every
    /// complete frame. `magnitudes` is a reused scratch slice of length
    /// `win/2`, valid only for the duration of the call.
    pub fn process<F: FnMut(usize, &[f32])>(&mut self, samples: &[f32], mut on_frame: F) {
        let mut t = 0;
        while t * self.hop + self.win <= samples.len() {
            let start = t * self.hop;
            let chunk = &samples[start..start + self.win];

            for (i, &s) in chunk.iter().enumerate() {
                self.scratch[i] = Complex::new(s * self.window[i], 0.0);
            }

            self.fft.process(&mut self.scratch);

            for k in 0..self.win / 2 {
                self.mag[k] = self.scratch[k].norm().ln_1p();
            }

            on_frame(t, &self.mag);
            t += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_count_matches_process() {
        let mut stft = Stft::new(64, 16);
        let samples = vec![0.0f32; 256];
        let mut count = 0;
        stft.process(&samples, |_, _| count += 1);
        assert_eq!(count, stft.frame_count(samples.len()));
    }

    #[test]
    fn pure_tone_has_a_dominant_bin() {
        let win = 1024;
        let sr = 44_100.0f32;
        let freq = 2000.0f32;
        let samples: Vec<f32> = (0..win * 4)
            .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / sr).sin())
            .collect();
        let mut stft = Stft::new(win, win / 2);
        let expected_bin = (freq / (sr / win as f32)).round() as usize;
        stft.process(&samples, |_, mag| {
            let (peak_bin, _) = mag
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
                .unwrap();
            assert!((peak_bin as i64 - expected_bin as i64).abs() <= 1);
        });
    }
}
