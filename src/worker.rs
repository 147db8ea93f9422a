use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};

use crate::config::Config;
use crate::decode;
use crate::error::Error;
use crate::hash::Landmark;
use crate::index::Index;
use crate::pipeline::Pipeline;

/// What `build` did with one file.
pub struct BuildOutcome {
    pub processed: usize,
    pub failed: Vec<(PathBuf, Error)>,
}

struct Job {
    path: PathBuf,
    rescheduled: bool,
}

enum WorkerMsg {
    Done {
        path: PathBuf,
        landmarks: Vec<Landmark>,
    },
    Failed {
        path: PathBuf,
        rescheduled: bool,
        error: Error,
    },
}

/// Decodes and fingerprints every recognized file in `dir`-relative `files`,
/// feeding the result into `index`, using the scheduling model of spec.md 5:
/// one DSP `Pipeline` per worker thread, a single indexer-owner thread
/// (this one) serializing all bucket mutations, and a bounded queue between
/// them for backpressure.
///
/// Files whose basename is already present in `index` are skipped, so a
/// `build` over the same directory resumes rather than reprocessing.
pub fn build(
    index: &mut Index,
    cfg: &Config,
    files: Vec<PathBuf>,
    cancel: Arc<AtomicBool>,
    per_file_timeout: Option<Duration>,
) -> crate::error::Result<BuildOutcome> {
    let decode_and_fingerprint = move |path: &Path, cfg: &Config| -> crate::error::Result<Vec<Landmark>> {
        let buf = decode::decode(path, cfg.sr, cfg.sec, per_file_timeout)?;
        let mut pipeline = Pipeline::new(cfg);
        Ok(pipeline.fingerprint_vec(&buf.samples))
    };
    build_with(index, cfg, files, cancel, decode_and_fingerprint)
}

/// The worker-pool core, parameterized over the decode+fingerprint step so
/// it can be exercised without shelling out to a real decoder.
fn build_with<F>(
    index: &mut Index,
    cfg: &Config,
    files: Vec<PathBuf>,
    cancel: Arc<AtomicBool>,
    decode_and_fingerprint: F,
) -> crate::error::Result<BuildOutcome>
where
    F: Fn(&Path, &Config) -> crate::error::Result<Vec<Landmark>> + Send + Sync + Clone + 'static,
{
    let pending: Vec<PathBuf> = files
        .into_iter()
        .filter(|path| {
            let name = track_name(path);
            !index.has_track(&name)
        })
        .collect();

    let total = pending.len();
    if total == 0 {
        return Ok(BuildOutcome {
            processed: 0,
            failed: Vec::new(),
        });
    }

    let (job_tx, job_rx): (Sender<Job>, Receiver<Job>) = unbounded();
    let (result_tx, result_rx): (Sender<WorkerMsg>, Receiver<WorkerMsg>) =
        bounded(cfg.threads.max(1) * 2);

    for path in &pending {
        job_tx
            .send(Job {
                path: path.clone(),
                rescheduled: false,
            })
            .expect("job channel has a live receiver");
    }

    let mut handles = Vec::with_capacity(cfg.threads);
    for _ in 0..cfg.threads.max(1) {
        let job_rx = job_rx.clone();
        let result_tx = result_tx.clone();
        let cancel = Arc::clone(&cancel);
        let cfg = cfg.clone();
        let decode_and_fingerprint = decode_and_fingerprint.clone();

        handles.push(std::thread::spawn(move || {
            while let Ok(job) = job_rx.recv() {
                if cancel.load(Ordering::Relaxed) {
                    break;
                }
                let path = job.path.clone();
                let result = catch_unwind(AssertUnwindSafe(|| {
                    decode_and_fingerprint(&job.path, &cfg)
                }));
                let msg = match result {
                    Ok(Ok(landmarks)) => WorkerMsg::Done { path, landmarks },
                    Ok(Err(error)) => WorkerMsg::Failed {
                        path,
                        rescheduled: job.rescheduled,
                        error,
                    },
                    Err(_) => WorkerMsg::Failed {
                        path,
                        rescheduled: job.rescheduled,
                        error: Error::WorkerLost {
                            path: job.path.display().to_string(),
                        },
                    },
                };
                if result_tx.send(msg).is_err() {
                    break;
                }
            }
        }));
    }
    drop(job_rx);
    drop(result_tx);

    let mut processed = 0usize;
    let mut failed = Vec::new();
    let mut completed = 0usize;
    let checkpoint_every = 200usize;

    while completed < total {
        let msg = match result_rx.recv() {
            Ok(msg) => msg,
            Err(_) => break,
        };
        match msg {
            WorkerMsg::Done { path, landmarks } => {
                let name = track_name(&path);
                if !index.has_track(&name) {
                    if let Ok(track_id) = index.begin_track(&name) {
                        index.append(track_id, landmarks);
                        processed += 1;
                    }
                }
                completed += 1;
            }
            WorkerMsg::Failed {
                path,
                rescheduled,
                error,
            } => {
                let retry = matches!(error, Error::WorkerLost { .. })
                    && !rescheduled
                    && !cancel.load(Ordering::Relaxed);
                if retry {
                    let _ = job_tx.send(Job {
                        path,
                        rescheduled: true,
                    });
                } else {
                    failed.push((path, error));
                    completed += 1;
                }
            }
        }
        if completed % checkpoint_every == 0 {
            index.checkpoint()?;
        }
    }

    drop(job_tx);
    for handle in handles {
        let _ = handle.join();
    }

    index.checkpoint()?;

    Ok(BuildOutcome { processed, failed })
}

fn track_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
