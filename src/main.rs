use std::path::{Path, PathBuf};
use std::process::exit;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use deauth_sentinel::report::{export_batch, export_file, human_ts};
use deauth_sentinel::{
    analyze_directory, analyze_file, AnalysisConfig, BatchOptions, EapolPolicy, FileSummary,
};

#[derive(Parser)]
#[command(name = "DeauthSentinel")]
#[command(author = "Ryan Butler (Ragnt)")]
#[command(about = "Finds deauth floods and handshake hunting... in your pcaps.", long_about = None)]
#[command(version)]
struct Arguments {
    #[command(subcommand)]
    command: Command,

    #[arg(long, global = true)]
    /// Verbose logging (overrides RUST_LOG).
    debug: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Analyze a single capture file.
    Analyze {
        #[arg(short, long)]
        /// Path to a pcap/pcapng file (optionally gzipped).
        input: PathBuf,

        #[command(flatten)]
        analysis: AnalysisArgs,
    },
    /// Analyze every capture file under a directory.
    Batch {
        #[arg(short = 'd', long)]
        /// Directory containing capture files.
        input_dir: PathBuf,

        #[arg(short, long)]
        /// Optional - Number of captures analyzed in parallel (defaults to CPU count).
        jobs: Option<usize>,

        #[command(flatten)]
        analysis: AnalysisArgs,
    },
}

#[derive(Args)]
struct AnalysisArgs {
    #[arg(short = 'b', long = "bin", default_value_t = 1.0)]
    /// Bin size in seconds for event aggregation.
    bin_width: f64,

    #[arg(short, long, default_value_t = 50, allow_negative_numbers = true)]
    /// Event count threshold per bin for alerting.
    threshold: i64,

    #[arg(short, long, default_value = "sentinel_reports")]
    /// Output directory for reports.
    output: PathBuf,

    #[arg(long)]
    /// Also bin EAPOL frames so handshake bursts can raise alerts.
    eapol_binned: bool,

    #[arg(long)]
    /// Leave frames without a transmitter address out of the top-sources ranking.
    exclude_unknown: bool,
}

impl AnalysisArgs {
    fn config(&self) -> AnalysisConfig {
        let eapol_policy = if self.eapol_binned {
            EapolPolicy::Binned
        } else {
            EapolPolicy::TotalOnly
        };
        AnalysisConfig::default()
            .bin_width(self.bin_width)
            .threshold(self.threshold)
            .eapol_policy(eapol_policy)
            .rank_unknown_sources(!self.exclude_unknown)
    }
}

fn print_summary(summary: &FileSummary) {
    println!("💲 {}", summary.file_path.display());
    println!(
        "   Frames: {} | Deauth: {} | Disassoc: {} | EAPOL: {} | Duration: {:.2}s",
        summary.total_frames,
        summary.total_deauth,
        summary.total_disassoc,
        summary.total_eapol,
        summary.duration
    );
    match (summary.first_alert_bin, summary.last_alert_bin) {
        (Some(first), Some(last)) => println!(
            "   😈 Attack detected: {} alert bins between {} and {}",
            summary.alert_bins().count(),
            human_ts(first),
            human_ts(last)
        ),
        _ => println!("   No bin reached {} events.", summary.threshold),
    }
}

fn print_output_files(output_files: &[PathBuf]) {
    println!();
    println!("💲 Reports:");
    for path in output_files {
        println!("   {}", path.display());
    }
}

fn run_analyze(input: &Path, args: &AnalysisArgs) -> Result<()> {
    let config = args.config();
    println!(
        "💲 Analyzing {} (bin {}s, threshold {})",
        input.display(),
        config.bin_width,
        config.threshold
    );

    let summary = analyze_file(input, &config)?;
    print_summary(&summary);

    let output_files = export_file(&summary, &args.output)?;
    print_output_files(&output_files);
    Ok(())
}

fn run_batch(input_dir: &Path, jobs: Option<usize>, args: &AnalysisArgs) -> Result<()> {
    let config = args.config();

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })
    .context("Error setting Ctrl-C handler")?;

    let mut options = BatchOptions {
        running,
        ..Default::default()
    };
    if let Some(jobs) = jobs {
        options.jobs = jobs;
    }

    println!(
        "💲 Scanning {} with {} workers (bin {}s, threshold {})",
        input_dir.display(),
        options.jobs,
        config.bin_width,
        config.threshold
    );
    let batch = analyze_directory(input_dir, &config, &options)?;

    println!();
    for summary in &batch.files {
        print_summary(summary);
    }
    for failure in &batch.failures {
        println!("💲 Failed: {} ({})", failure.path.display(), failure.reason);
    }
    if !batch.skipped.is_empty() {
        println!("💲 Cancelled before {} captures were analyzed.", batch.skipped.len());
    }

    let totals = batch.totals();
    println!();
    println!(
        "💲 {} analyzed, {} failed, {} with attacks | Deauth: {} | Disassoc: {} | EAPOL: {}",
        totals.files,
        totals.failures,
        totals.attacked_files,
        totals.deauth,
        totals.disassoc,
        totals.eapol
    );

    let output_files = export_batch(&batch, &args.output)?;
    print_output_files(&output_files);
    Ok(())
}

fn main() {
    let cli = Arguments::parse();

    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();

    let result = match &cli.command {
        Command::Analyze { input, analysis } => run_analyze(input, analysis),
        Command::Batch {
            input_dir,
            jobs,
            analysis,
        } => run_batch(input_dir, *jobs, analysis),
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        exit(1);
    }
}
