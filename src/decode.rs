use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::{Error, Result};

/// Extensions the orchestrator recognizes as candidate audio files
/// (spec.md 6, "Inputs").
pub const RECOGNIZED_EXTENSIONS: &[&str] = &["mp3", "wav", "flac", "ogg", "opus", "m4a"];

pub fn has_recognized_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            RECOGNIZED_EXTENSIONS
                .iter()
                .any(|ext| ext.eq_ignore_ascii_case(e))
        })
        .unwrap_or(false)
}

/// Mono float32 PCM at a fixed sample rate, owned for the duration of one
/// file's fingerprinting pass.
pub struct SampleBuffer {
    pub samples: Vec<f32>,
    pub sr: u32,
}

/// Invokes the external decoder (an `ffmpeg`-compatible binary on `PATH`)
/// and returns a contiguous mono float32 LE buffer at `sr`.
///
/// The decoder's diagnostic stream is ignored (redirected to `/dev/null`);
/// any nonzero exit is surfaced as `DECODER_FAILED`; a soft wall-clock
/// `timeout` terminates the subprocess and the file is marked failed. No
/// retries are attempted here — callers decide whether to retry.
pub fn decode(
    path: &Path,
    sr: u32,
    max_seconds: u32,
    timeout: Option<Duration>,
) -> Result<SampleBuffer> {
    let display = path.display().to_string();

    let mut cmd = Command::new("ffmpeg");
    cmd.arg("-nostdin")
        .arg("-hide_banner")
        .arg("-i")
        .arg(path)
        .arg("-ac")
        .arg("1")
        .arg("-ar")
        .arg(sr.to_string());
    if max_seconds > 0 {
        cmd.arg("-t").arg(max_seconds.to_string());
    }
    cmd.arg("-f")
        .arg("f32le")
        .arg("-")
        .stdout(Stdio::piped())
        .stderr(Stdio::null());

    let child = cmd.spawn().map_err(|e| Error::DecoderFailed {
        path: display.clone(),
        reason: e.to_string(),
    })?;
    let child = Arc::new(Mutex::new(child));

    let killer = timeout.map(|dur| {
        let child = Arc::clone(&child);
        let done = Arc::new(Mutex::new(false));
        let done_watcher = Arc::clone(&done);
        let handle = std::thread::spawn(move || {
            std::thread::sleep(dur);
            if !*done_watcher.lock().unwrap() {
                let _ = child.lock().unwrap().kill();
            }
        });
        (handle, done)
    });

    let mut stdout = child
        .lock()
        .unwrap()
        .stdout
        .take()
        .expect("stdout was piped");
    let mut buf = Vec::new();
    let read_result = stdout.read_to_end(&mut buf);
    drop(stdout);

    let status = child.lock().unwrap().wait();

    if let Some((handle, done)) = killer {
        *done.lock().unwrap() = true;
        let _ = handle.join();
    }

    read_result.map_err(|e| Error::DecoderFailed {
        path: display.clone(),
        reason: e.to_string(),
    })?;

    let status = status.map_err(|e| Error::DecoderFailed {
        path: display.clone(),
        reason: e.to_string(),
    })?;
    if !status.success() {
        return Err(Error::DecoderFailed {
            path: display,
            reason: format!("decoder exited with {status}"),
        });
    }

    if buf.len() % 4 != 0 {
        return Err(Error::DecoderFailed {
            path: display,
            reason: format!("stream length {} is not a multiple of 4", buf.len()),
        });
    }

    let samples = buf
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();

    Ok(SampleBuffer { samples, sr })
}

/// Used by tests and the clip-lookup path when a caller already has raw
/// f32 LE bytes (e.g. a query clip sliced out of a larger decode) and
/// wants the same length/alignment validation `decode` performs.
pub fn samples_from_f32le(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(Error::DecoderFailed {
            path: "<buffer>".into(),
            reason: format!("stream length {} is not a multiple of 4", bytes.len()),
        });
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_known_extensions() {
        assert!(has_recognized_extension(Path::new("song.MP3")));
        assert!(has_recognized_extension(Path::new("song.flac")));
        assert!(!has_recognized_extension(Path::new("song.txt")));
    }

    #[test]
    fn rejects_misaligned_byte_length() {
        let bytes = vec![0u8; 7];
        assert!(samples_from_f32le(&bytes).is_err());
    }

    #[test]
    fn decodes_aligned_bytes() {
        let mut bytes = Vec::new();
        for v in [0.0f32, 0.5, -0.5, 1.0] {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        let samples = samples_from_f32le(&bytes).unwrap();
        assert_eq!(samples, vec![0.0, 0.5, -0.5, 1.0]);
    }
}
