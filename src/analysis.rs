use std::path::{Path, PathBuf};

use derive_setters::Setters;
use serde::Serialize;
use strum_macros::Display;
use tracing::{debug, info, instrument, trace};

use crate::alert::evaluate;
use crate::bins::{validate_bin_width, BinAggregator, TimeBin};
use crate::capture::{CaptureReader, FrameRecord};
use crate::classify::{classify, frame_timestamp, EventKind};
use crate::error::AnalysisError;

/// What to do with EAPOL frames once they are counted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Display, Serialize)]
pub enum EapolPolicy {
    /// Count them in `total_eapol` and nowhere else.
    #[default]
    TotalOnly,
    /// Also bin them, so handshake bursts can raise alerts.
    Binned,
}

#[derive(Clone, Debug, PartialEq, Setters)]
pub struct AnalysisConfig {
    /// Bin width in seconds.
    pub bin_width: f64,
    /// Events per bin at which the bin alerts.
    pub threshold: i64,
    pub eapol_policy: EapolPolicy,
    /// Whether frames with no transmitter address compete for `top_sources`.
    pub rank_unknown_sources: bool,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        AnalysisConfig {
            bin_width: 1.0,
            threshold: 50,
            eapol_policy: EapolPolicy::TotalOnly,
            rank_unknown_sources: true,
        }
    }
}

impl AnalysisConfig {
    pub fn validate(&self) -> Result<(), AnalysisError> {
        validate_bin_width(self.bin_width)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FileSummary {
    pub file_path: PathBuf,
    /// Seconds between the first and last frame.
    pub duration: f64,
    pub total_frames: u64,
    pub total_deauth: u64,
    pub total_disassoc: u64,
    pub total_eapol: u64,
    pub bins: Vec<TimeBin>,
    pub bin_width: f64,
    pub threshold: i64,
    pub attack_detected: bool,
    pub first_alert_bin: Option<f64>,
    pub last_alert_bin: Option<f64>,
}

impl FileSummary {
    pub fn alert_bins(&self) -> impl Iterator<Item = &TimeBin> {
        self.bins.iter().filter(|bin| bin.alert)
    }

    pub fn peak_bin(&self) -> Option<&TimeBin> {
        self.bins
            .iter()
            .reduce(|best, bin| if bin.count > best.count { bin } else { best })
    }
}

#[derive(Default)]
struct Counters {
    frames: u64,
    skipped: u64,
    deauth: u64,
    disassoc: u64,
    eapol: u64,
}

/// Run one decoded trace through classification, binning and alerting.
///
/// Frames that cannot be placed on the timeline are dropped. A decoder
/// error ends the analysis with that error.
#[instrument(skip_all, fields(path = %file_path.display()))]
pub fn analyze_trace<I>(
    frames: I,
    file_path: &Path,
    config: &AnalysisConfig,
) -> Result<FileSummary, AnalysisError>
where
    I: IntoIterator<Item = Result<FrameRecord, AnalysisError>>,
{
    let mut aggregator = BinAggregator::new(config.bin_width)?;
    let mut counters = Counters::default();
    let mut span: Option<(f64, f64)> = None;

    for frame in frames {
        let frame = frame?;
        let timestamp = match frame_timestamp(&frame) {
            Ok(timestamp) => timestamp,
            Err(anomaly) => {
                trace!("skipping frame: {anomaly}");
                counters.skipped += 1;
                continue;
            }
        };

        counters.frames += 1;
        span = Some(match span {
            Some((first, last)) => (first.min(timestamp), last.max(timestamp)),
            None => (timestamp, timestamp),
        });

        let Some(event) = classify(&frame) else {
            continue;
        };
        trace!("{} from {} at {timestamp}", event.kind, event.source);
        match event.kind {
            EventKind::Deauth => counters.deauth += 1,
            EventKind::Disassoc => counters.disassoc += 1,
            EventKind::EapolObserved => {
                counters.eapol += 1;
                if config.eapol_policy == EapolPolicy::TotalOnly {
                    continue;
                }
            }
        }
        aggregator.push(&event);
    }

    if counters.skipped > 0 {
        debug!("{} frames had no usable timestamp", counters.skipped);
    }

    let evaluation = evaluate(
        aggregator.finish(config.rank_unknown_sources),
        config.threshold,
    );

    Ok(FileSummary {
        file_path: file_path.to_path_buf(),
        duration: span.map_or(0.0, |(first, last)| last - first),
        total_frames: counters.frames,
        total_deauth: counters.deauth,
        total_disassoc: counters.disassoc,
        total_eapol: counters.eapol,
        bins: evaluation.bins,
        bin_width: config.bin_width,
        threshold: config.threshold,
        attack_detected: evaluation.attack_detected,
        first_alert_bin: evaluation.first_alert_bin,
        last_alert_bin: evaluation.last_alert_bin,
    })
}

/// Open a capture file and analyze it.
pub fn analyze_file(path: &Path, config: &AnalysisConfig) -> Result<FileSummary, AnalysisError> {
    config.validate()?;
    let reader = CaptureReader::open(path)?;
    let file_path = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());

    let summary = analyze_trace(reader, &file_path, config)?;
    info!(
        "{}: {} frames, {} deauth, {} disassoc, {} eapol, {} bins, attack={}",
        file_path.display(),
        summary.total_frames,
        summary.total_deauth,
        summary.total_disassoc,
        summary.total_eapol,
        summary.bins.len(),
        summary.attack_detected
    );
    Ok(summary)
}
