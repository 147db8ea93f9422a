use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use soundmark::decode::has_recognized_extension;
use soundmark::{find_duplicates, query, worker, Config, Index};

#[derive(Parser, Debug)]
#[command(name = "soundmark")]
#[command(about = "Content-based audio fingerprint index", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable verbose (debug-level) logging.
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fingerprint every recognized file under a directory into an index.
    Build {
        /// Directory to scan for audio files.
        input_dir: PathBuf,
        /// Path to the index file to create or resume (default: index.json).
        #[arg(default_value = "index.json")]
        out: PathBuf,
        /// Worker thread count (default: available parallelism).
        #[arg(long)]
        threads: Option<usize>,
        /// Per-file decode cap in seconds (0 = unlimited).
        #[arg(long, default_value_t = 0)]
        sec: u32,
        /// Soft per-file decode timeout in seconds (0 = unlimited).
        #[arg(long, default_value_t = 0)]
        timeout_secs: u64,
        /// Regroup and delta-encode buckets after the build completes.
        #[arg(long)]
        finalize: bool,
    },
    /// Look up a short clip against a built index.
    Query {
        /// Path to the index file.
        index_path: PathBuf,
        /// Path to the query clip (an audio file, decoded the same way as `build`).
        clip_path: PathBuf,
        /// Max number of candidate tracks to print.
        #[arg(long, default_value_t = 5)]
        top_n: usize,
    },
    /// Run the duplicate pass over a built index.
    Duplicates {
        /// Path to the index file.
        index_path: PathBuf,
        /// Where to write the duplicate pairs as JSON (default: stdout only).
        out: Option<PathBuf>,
        /// Override the minimum vote count for a reported pair.
        min_matches: Option<usize>,
        /// Override the minimum score ratio for a reported pair.
        min_ratio: Option<f32>,
        /// Override the per-bucket cap applied at match time (0 = unbounded).
        max_bucket: Option<usize>,
        /// Override the stop-key threshold above which a bucket is dropped.
        drop_above: Option<usize>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .init();

    match cli.command {
        Command::Build {
            input_dir,
            out,
            threads,
            sec,
            timeout_secs,
            finalize,
        } => run_build(&input_dir, &out, threads, sec, timeout_secs, finalize),
        Command::Query {
            index_path,
            clip_path,
            top_n,
        } => run_query(&index_path, &clip_path, top_n),
        Command::Duplicates {
            index_path,
            out,
            min_matches,
            min_ratio,
            max_bucket,
            drop_above,
        } => run_duplicates(
            &index_path,
            out.as_deref(),
            min_matches,
            min_ratio,
            max_bucket,
            drop_above,
        ),
    }
}

fn run_build(
    input_dir: &Path,
    index_path: &Path,
    threads: Option<usize>,
    sec: u32,
    timeout_secs: u64,
    finalize: bool,
) -> Result<()> {
    if !input_dir.is_dir() {
        bail!("{} is not a directory", input_dir.display());
    }

    let mut cfg = Config::default();
    if let Some(threads) = threads {
        cfg.threads = threads;
    }
    cfg.sec = sec;
    cfg.validate().context("invalid configuration")?;

    let files = discover_files(input_dir)?;
    log::info!("found {} candidate file(s) in {}", files.len(), input_dir.display());

    let mut index = Index::open(index_path, &cfg).context("opening index")?;
    if index.was_resumed() {
        log::info!(
            "resuming index with {} track(s) already present",
            index.track_count()
        );
    }

    let cancel = Arc::new(AtomicBool::new(false));
    let timeout = if timeout_secs > 0 {
        Some(Duration::from_secs(timeout_secs))
    } else {
        None
    };

    let outcome = worker::build(&mut index, &cfg, files, cancel, timeout)?;

    for (path, error) in &outcome.failed {
        log::warn!("failed to fingerprint {}: {}", path.display(), error);
    }
    println!(
        "processed {} file(s), {} failure(s), {} posting(s) dropped by bucket-cap overflow",
        outcome.processed,
        outcome.failed.len(),
        index.overflow_count()
    );

    if finalize {
        index.finalize().context("finalizing index")?;
    } else {
        index.checkpoint().context("checkpointing index")?;
    }

    Ok(())
}

fn run_query(index_path: &Path, clip_path: &Path, top_n: usize) -> Result<()> {
    let cfg = Config::default();
    let index = Index::open_for_read(index_path, &cfg).context("opening index")?;

    let buf = soundmark::decode::decode(clip_path, cfg.sr, 0, None)
        .with_context(|| format!("decoding clip {}", clip_path.display()))?;

    let mut pipeline = soundmark::Pipeline::new(&cfg);
    let results = query(&index, &mut pipeline, &buf.samples, &cfg, top_n);

    if results.is_empty() {
        println!("no matches found");
    } else {
        for (rank, m) in results.iter().enumerate() {
            println!(
                "{}. {} (offset {} frames, {} votes)",
                rank + 1,
                m.track_name,
                m.offset,
                m.votes
            );
        }
    }
    Ok(())
}

fn run_duplicates(
    index_path: &Path,
    out: Option<&Path>,
    min_matches: Option<usize>,
    min_ratio: Option<f32>,
    max_bucket: Option<usize>,
    drop_above: Option<usize>,
) -> Result<()> {
    let mut cfg = Config::default();
    if let Some(v) = min_matches {
        cfg.min_matches = v;
    }
    if let Some(v) = min_ratio {
        cfg.min_ratio = v;
    }
    if let Some(v) = max_bucket {
        cfg.max_bucket = v;
    }
    if let Some(v) = drop_above {
        cfg.drop_above = v;
    }

    let index = Index::open_for_read(index_path, &cfg).context("opening index")?;
    let pairs = find_duplicates(&index, &cfg);

    if pairs.is_empty() {
        println!("no duplicate pairs found");
    } else {
        for pair in &pairs {
            let name_a = index.track_name(pair.track_a).unwrap_or("?");
            let name_b = index.track_name(pair.track_b).unwrap_or("?");
            println!(
                "{} ~ {} (offset {}, {}/{} votes, score {:.3})",
                name_a, name_b, pair.best_offset, pair.best_count, pair.total_pairs, pair.score
            );
        }
    }

    if let Some(out) = out {
        let report: Vec<_> = pairs
            .iter()
            .map(|p| {
                serde_json::json!({
                    "track_a": index.track_name(p.track_a),
                    "track_b": index.track_name(p.track_b),
                    "best_offset": p.best_offset,
                    "best_count": p.best_count,
                    "total_pairs": p.total_pairs,
                    "score": p.score,
                })
            })
            .collect();
        std::fs::write(out, serde_json::to_vec_pretty(&report)?)
            .with_context(|| format!("writing {}", out.display()))?;
    }

    Ok(())
}

fn discover_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).with_context(|| format!("reading {}", dir.display()))? {
        let entry = entry?;
        let path = entry.path();
        if path.is_file() && has_recognized_extension(&path) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}
