use std::fmt::Write;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{TimeZone, Utc};
use itertools::Itertools;
use serde::Serialize;

use crate::analysis::FileSummary;
use crate::batch::BatchSummary;
use crate::classify::SourceId;

const LEADERBOARD_SIZE: usize = 5;

/// RFC 3339 UTC rendering of an epoch timestamp.
pub fn human_ts(ts: f64) -> String {
    let secs = ts.floor();
    let nanos = (((ts - secs) * 1e9).round() as u32).min(999_999_999);
    Utc.timestamp_opt(secs as i64, nanos)
        .single()
        .map_or_else(|| ts.to_string(), |time| time.to_rfc3339())
}

fn optional_ts(ts: Option<f64>) -> String {
    ts.map(human_ts).unwrap_or_default()
}

pub fn format_top_sources(top: &[(SourceId, u64)]) -> String {
    top.iter()
        .map(|(source, count)| format!("{source}:{count}"))
        .join(";")
}

#[derive(Serialize)]
struct BinRow {
    time_iso: String,
    time_epoch: f64,
    count: u64,
    unique_srcs: u64,
    top_sources: String,
    alert: u8,
}

#[derive(Serialize)]
struct FileRow<'a> {
    file_path: &'a Path,
    duration: f64,
    total_frames: u64,
    total_deauth: u64,
    total_disassoc: u64,
    total_eapol: u64,
    attack_detected: u8,
    first_alert_iso: String,
    last_alert_iso: String,
    bin_width: f64,
    threshold: i64,
}

pub fn write_bins_csv(summary: &FileSummary, path: &Path) -> anyhow::Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    for bin in &summary.bins {
        writer.serialize(BinRow {
            time_iso: human_ts(bin.start),
            time_epoch: bin.start,
            count: bin.count,
            unique_srcs: bin.unique_sources,
            top_sources: format_top_sources(&bin.top_sources),
            alert: u8::from(bin.alert),
        })?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_batch_csv(batch: &BatchSummary, path: &Path) -> anyhow::Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    for file in &batch.files {
        writer.serialize(FileRow {
            file_path: &file.file_path,
            duration: file.duration,
            total_frames: file.total_frames,
            total_deauth: file.total_deauth,
            total_disassoc: file.total_disassoc,
            total_eapol: file.total_eapol,
            attack_detected: u8::from(file.attack_detected),
            first_alert_iso: optional_ts(file.first_alert_bin),
            last_alert_iso: optional_ts(file.last_alert_bin),
            bin_width: file.bin_width,
            threshold: file.threshold,
        })?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_json<T: Serialize>(value: &T, path: &Path) -> anyhow::Result<()> {
    let file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    serde_json::to_writer_pretty(BufWriter::new(file), value)?;
    Ok(())
}

pub fn file_report(summary: &FileSummary) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "Deauth Sentinel - File Report");
    let _ = writeln!(output, "File: {}", summary.file_path.display());
    let _ = writeln!(output, "Duration: {:.2} s", summary.duration);
    let _ = writeln!(output, "Total frames: {}", summary.total_frames);
    let _ = writeln!(output, "Total deauth: {}", summary.total_deauth);
    let _ = writeln!(output, "Total disassoc: {}", summary.total_disassoc);
    let _ = writeln!(output, "Total EAPOL: {}", summary.total_eapol);
    let _ = writeln!(output, "Bin size: {} s", summary.bin_width);
    let _ = writeln!(output, "Threshold: {}", summary.threshold);
    let _ = writeln!(output, "Attack detected: {}", summary.attack_detected);
    if let Some(first) = summary.first_alert_bin {
        let _ = writeln!(output, "First attack bin: {}", human_ts(first));
    }
    if let Some(last) = summary.last_alert_bin {
        let _ = writeln!(output, "Last attack bin: {}", human_ts(last));
    }
    if let Some(peak) = summary.peak_bin() {
        let _ = writeln!(
            output,
            "Busiest bin: {} ({} events)",
            human_ts(peak.start),
            peak.count
        );
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "Alert bins:");
    let mut alerts = summary.alert_bins().peekable();
    if alerts.peek().is_none() {
        let _ = writeln!(output, "None.");
    }
    for bin in alerts {
        let _ = writeln!(
            output,
            "- {} | count={} | unique_srcs={} | top={}",
            human_ts(bin.start),
            bin.count,
            bin.unique_sources,
            format_top_sources(&bin.top_sources)
        );
    }

    output
}

pub fn batch_report(batch: &BatchSummary) -> String {
    let totals = batch.totals();
    let mut output = String::new();

    let _ = writeln!(output, "Deauth Sentinel - Batch Report");
    let _ = writeln!(output, "Input dir: {}", batch.source_directory.display());
    let _ = writeln!(output, "Files analyzed: {}", totals.files);
    let _ = writeln!(output, "Files failed: {}", totals.failures);
    if !batch.skipped.is_empty() {
        let _ = writeln!(output, "Files skipped: {}", batch.skipped.len());
    }
    let _ = writeln!(output);
    let _ = writeln!(output, "Total frames (all files): {}", totals.frames);
    let _ = writeln!(output, "Total deauth (all files): {}", totals.deauth);
    let _ = writeln!(output, "Total disassoc (all files): {}", totals.disassoc);
    let _ = writeln!(output, "Total EAPOL (all files): {}", totals.eapol);

    let _ = writeln!(output);
    let _ = writeln!(output, "Files with detected attacks:");
    for file in batch.attacked_files() {
        let _ = writeln!(
            output,
            "- {} | deauth={} | disassoc={} | first={} | last={}",
            file.file_path.display(),
            file.total_deauth,
            file.total_disassoc,
            optional_ts(file.first_alert_bin),
            optional_ts(file.last_alert_bin)
        );
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "Top {} files by deauth count:", LEADERBOARD_SIZE);
    for file in batch.leaderboard(LEADERBOARD_SIZE) {
        let _ = writeln!(
            output,
            "- {} | deauth={} | disassoc={}",
            file.file_path.display(),
            file.total_deauth,
            file.total_disassoc
        );
    }

    if !batch.failures.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(output, "Failed files:");
        for failure in &batch.failures {
            let _ = writeln!(output, "- {} | {}", failure.path.display(), failure.reason);
        }
    }

    if !batch.skipped.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(output, "Skipped files (cancelled):");
        for path in &batch.skipped {
            let _ = writeln!(output, "- {}", path.display());
        }
    }

    output
}

/// `captures/flood.pcap.gz` -> `flood`
fn artefact_stem(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "trace".to_owned());
    let name = name.strip_suffix(".gz").unwrap_or(&name);
    match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem.to_owned(),
        _ => name.to_owned(),
    }
}

/// Write the CSV, text and JSON artefacts for one trace into `out_dir`.
pub fn export_file(summary: &FileSummary, out_dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    fs::create_dir_all(out_dir)
        .with_context(|| format!("failed to create {}", out_dir.display()))?;
    let stem = artefact_stem(&summary.file_path);

    let bins_csv = out_dir.join(format!("{stem}_bins.csv"));
    write_bins_csv(summary, &bins_csv)?;

    let report_txt = out_dir.join(format!("{stem}_report.txt"));
    fs::write(&report_txt, file_report(summary))
        .with_context(|| format!("failed to write {}", report_txt.display()))?;

    let summary_json = out_dir.join(format!("{stem}_summary.json"));
    write_json(summary, &summary_json)?;

    Ok(vec![bins_csv, report_txt, summary_json])
}

/// Write the batch-level artefacts plus a bin table per analyzed trace.
pub fn export_batch(batch: &BatchSummary, out_dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    fs::create_dir_all(out_dir)
        .with_context(|| format!("failed to create {}", out_dir.display()))?;

    let batch_csv = out_dir.join("batch_summary.csv");
    write_batch_csv(batch, &batch_csv)?;

    let report_txt = out_dir.join("batch_report.txt");
    fs::write(&report_txt, batch_report(batch))
        .with_context(|| format!("failed to write {}", report_txt.display()))?;

    let summary_json = out_dir.join("batch_summary.json");
    write_json(batch, &summary_json)?;

    let mut output_files = vec![batch_csv, report_txt, summary_json];
    for (index, file) in batch.files.iter().enumerate() {
        // Same file name can live in different sub-directories.
        let bins_csv = out_dir.join(format!(
            "{:03}_{}_bins.csv",
            index,
            artefact_stem(&file.file_path)
        ));
        write_bins_csv(file, &bins_csv)?;
        output_files.push(bins_csv);
    }

    Ok(output_files)
}
