use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;

use itertools::Itertools;
use serde::Serialize;
use tracing::{debug, warn};

use crate::analysis::{analyze_file, AnalysisConfig, FileSummary};
use crate::discovery::discover_traces;
use crate::error::AnalysisError;

#[derive(Clone, Debug)]
pub struct BatchOptions {
    /// Upper bound on traces analyzed at once.
    pub jobs: usize,
    /// Cleared to stop scheduling new traces. Traces already running finish.
    pub running: Arc<AtomicBool>,
}

impl Default for BatchOptions {
    fn default() -> Self {
        BatchOptions {
            jobs: thread::available_parallelism().map_or(1, |n| n.get()),
            running: Arc::new(AtomicBool::new(true)),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TraceFailure {
    /// Position in the discovery order.
    pub index: usize,
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BatchSummary {
    pub source_directory: PathBuf,
    /// Successful analyses, in discovery order.
    pub files: Vec<FileSummary>,
    pub failures: Vec<TraceFailure>,
    /// Traces never started because the batch was cancelled.
    pub skipped: Vec<PathBuf>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BatchTotals {
    pub files: usize,
    pub failures: usize,
    pub frames: u64,
    pub deauth: u64,
    pub disassoc: u64,
    pub eapol: u64,
    pub attacked_files: usize,
}

impl BatchSummary {
    /// Totals over the successful traces only.
    pub fn totals(&self) -> BatchTotals {
        self.files.iter().fold(
            BatchTotals {
                failures: self.failures.len(),
                ..Default::default()
            },
            |mut totals, file| {
                totals.files += 1;
                totals.frames += file.total_frames;
                totals.deauth += file.total_deauth;
                totals.disassoc += file.total_disassoc;
                totals.eapol += file.total_eapol;
                totals.attacked_files += usize::from(file.attack_detected);
                totals
            },
        )
    }

    /// The `n` traces with the most deauth frames; ties keep discovery order.
    pub fn leaderboard(&self, n: usize) -> Vec<&FileSummary> {
        self.files
            .iter()
            .sorted_by(|a, b| b.total_deauth.cmp(&a.total_deauth))
            .take(n)
            .collect()
    }

    pub fn attacked_files(&self) -> impl Iterator<Item = &FileSummary> {
        self.files.iter().filter(|file| file.attack_detected)
    }
}

/// Fan `analyze` out over `traces` on a bounded pool and fold the results
/// back in input order. A failing trace becomes a [`TraceFailure`].
pub fn run_batch<F>(
    source_directory: &Path,
    traces: &[PathBuf],
    options: &BatchOptions,
    analyze: F,
) -> BatchSummary
where
    F: Fn(&Path) -> Result<FileSummary, AnalysisError> + Sync,
{
    let jobs = options.jobs.clamp(1, traces.len().max(1));
    let cursor = AtomicUsize::new(0);
    let mut slots: Vec<Option<Result<FileSummary, AnalysisError>>> =
        traces.iter().map(|_| None).collect();

    thread::scope(|scope| {
        let (tx, rx) = mpsc::channel();
        for worker in 0..jobs {
            let tx = tx.clone();
            let cursor = &cursor;
            let analyze = &analyze;
            let running = &options.running;
            scope.spawn(move || {
                while running.load(Ordering::SeqCst) {
                    let index = cursor.fetch_add(1, Ordering::SeqCst);
                    let Some(path) = traces.get(index) else {
                        break;
                    };
                    debug!(worker, "analyzing {}", path.display());
                    if tx.send((index, analyze(path))).is_err() {
                        break;
                    }
                }
            });
        }
        drop(tx);

        for (index, outcome) in rx {
            slots[index] = Some(outcome);
        }
    });

    let mut summary = BatchSummary {
        source_directory: source_directory.to_path_buf(),
        files: Vec::new(),
        failures: Vec::new(),
        skipped: Vec::new(),
    };
    for (index, (path, slot)) in traces.iter().zip(slots).enumerate() {
        match slot {
            Some(Ok(file)) => summary.files.push(file),
            Some(Err(err)) => {
                warn!("{}", err);
                summary.failures.push(TraceFailure {
                    index,
                    path: path.clone(),
                    reason: err.to_string(),
                });
            }
            None => summary.skipped.push(path.clone()),
        }
    }
    summary
}

/// Analyze a list of capture files. Only a bad configuration fails the
/// whole batch.
pub fn analyze_batch(
    source_directory: &Path,
    traces: &[PathBuf],
    config: &AnalysisConfig,
    options: &BatchOptions,
) -> Result<BatchSummary, AnalysisError> {
    config.validate()?;
    Ok(run_batch(source_directory, traces, options, |path| {
        analyze_file(path, config)
    }))
}

/// Discover every capture under `dir` and analyze them as one batch.
pub fn analyze_directory(
    dir: &Path,
    config: &AnalysisConfig,
    options: &BatchOptions,
) -> Result<BatchSummary, AnalysisError> {
    config.validate()?;
    let traces = discover_traces(dir)?;
    let source_directory = dir.canonicalize().unwrap_or_else(|_| dir.to_path_buf());
    analyze_batch(&source_directory, &traces, config, options)
}
