pub mod peaks;
pub mod stft;
pub mod window;

pub use peaks::{Peak, PeakPicker};
pub use stft::Stft;
