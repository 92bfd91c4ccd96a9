//! autobatch CLI - find the largest batch size that stays under latency ceilings
//!
//! # Modes
//!
//! - `monitor` - Watch a benchmark log and track the best batch per scenario
//! - `binary` - Drive the benchmark harness with a binary search over batch size

use std::fmt::Write as _;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use autobatch_core::config::{Config, LogFormat};
use autobatch_core::error::{ConfigError, Error};
use autobatch_core::logging::{LogConfig, init_logging};
use autobatch_core::monitor::{MonitorLoop, MonitorSummary};
use autobatch_core::record::TestRecord;
use autobatch_core::search::{CommandTemplate, SearchLoop, SearchOutcome, ShellProbe};
use autobatch_core::shutdown::Shutdown;
use autobatch_core::signal::SignalChannel;
use autobatch_core::store::BestStore;
use autobatch_core::tail::LogTailReader;
use autobatch_core::threshold::Threshold;
use clap::{Parser, ValueEnum};
use serde::Serialize;
use tracing::{info, warn};

/// autobatch - largest batch size under latency ceilings
///
/// Examples:
///   autobatch --log-file results.jsonl --threshold "ttft:100 tpot:50" --output best.jsonl
///   autobatch --mode binary --log-file results.jsonl --threshold ttft:100 \
///     --output best.jsonl --bench-cmd-template "./bench.sh --concurrency {batch}"
#[derive(Parser, Debug)]
#[command(name = "autobatch")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Passive monitoring or active binary search
    #[arg(long, value_enum, default_value_t = Mode::Monitor, env = "AUTOBATCH_MODE")]
    mode: Mode,

    /// JSON-lines log written by the benchmark harness
    #[arg(long, value_name = "PATH", env = "AUTOBATCH_LOG_FILE")]
    log_file: PathBuf,

    /// Latency ceilings, e.g. "ttft:100 tpot:50 e2el:500"
    #[arg(long, env = "AUTOBATCH_THRESHOLD")]
    threshold: String,

    /// Best-records file (one JSON line per scenario)
    #[arg(long, value_name = "PATH", env = "AUTOBATCH_OUTPUT")]
    output: PathBuf,

    /// Benchmark command; `{batch}` is replaced by the probed batch size
    #[arg(long, value_name = "CMD", env = "AUTOBATCH_BENCH_CMD_TEMPLATE")]
    bench_cmd_template: Option<String>,

    /// Smallest batch size probed [default: 1]
    #[arg(long)]
    min_batch: Option<u32>,

    /// Largest batch size probed [default: 128]
    #[arg(long)]
    max_batch: Option<u32>,

    /// Dedup window cap [default: 10000]
    #[arg(long)]
    max_seen_size: Option<usize>,

    /// Confirmed-best notifier file [default: best_signal.json]
    #[arg(long, value_name = "PATH")]
    signal_file: Option<PathBuf>,

    /// TOML configuration file
    #[arg(long, value_name = "PATH", env = "AUTOBATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Log format (pretty or json)
    #[arg(long)]
    log_format: Option<LogFormat>,

    /// Format of the final report on stdout
    #[arg(long, value_enum, default_value_t = SummaryFormat::Plain)]
    summary_format: SummaryFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    Monitor,
    Binary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SummaryFormat {
    Plain,
    Json,
}

/// What a run produced, printed once at exit.
#[derive(Debug, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
enum Report {
    Monitor(MonitorSummary),
    Binary(SearchOutcome),
    /// Stopped while waiting for the log file
    Cancelled { reason: String },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            report_error(&err);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(&cli)?;
    let template = match cli.mode {
        Mode::Binary => {
            config.search.validate()?;
            let raw = cli
                .bench_cmd_template
                .as_deref()
                .ok_or(ConfigError::MissingCommandTemplate)?;
            Some(CommandTemplate::parse(raw)?)
        }
        Mode::Monitor => None,
    };

    init_logging(&LogConfig::from(&config.general)).context("failed to initialize logging")?;

    let threshold = Threshold::parse(&cli.threshold);
    if threshold.is_empty() {
        warn!("no latency ceilings configured; every record will satisfy the threshold");
    }
    info!(
        version = autobatch_core::VERSION,
        mode = ?cli.mode,
        threshold = %threshold,
        "autobatch starting"
    );

    let shutdown = Shutdown::new();
    let signal_task = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            match wait_for_shutdown_signal().await {
                Ok(()) => {
                    info!("shutdown requested, finishing current step");
                    shutdown.request();
                }
                Err(err) => warn!(error = %err, "signal handling unavailable"),
            }
        })
    };

    let log_file = cli.log_file.clone();
    let output = cli.output.clone();
    let worker_shutdown = shutdown.clone();
    let report = tokio::task::spawn_blocking(move || match template {
        Some(template) => run_binary(
            log_file,
            output,
            threshold,
            &config,
            template,
            worker_shutdown,
        ),
        None => run_monitor(log_file, output, threshold, &config, worker_shutdown),
    })
    .await
    .context("worker thread panicked")??;
    signal_task.abort();

    print_report(&report, cli.summary_format)?;
    Ok(())
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::default(),
    };

    if let Some(level) = &cli.log_level {
        config.general.log_level.clone_from(level);
    }
    if let Some(format) = cli.log_format {
        config.general.log_format = format;
    }
    if let Some(min) = cli.min_batch {
        config.search.min_batch = min;
    }
    if let Some(max) = cli.max_batch {
        config.search.max_batch = max;
    }
    if let Some(size) = cli.max_seen_size {
        config.monitor.max_seen_size = size;
    }
    if let Some(path) = &cli.signal_file {
        config.monitor.signal_file.clone_from(path);
    }
    Ok(config)
}

fn run_monitor(
    log_file: PathBuf,
    output: PathBuf,
    threshold: Threshold,
    config: &Config,
    shutdown: Shutdown,
) -> Result<Report, Error> {
    let store = BestStore::open(output)?;
    let signal = SignalChannel::new(&config.monitor.signal_file)?;
    let reader = match LogTailReader::wait_for(log_file, &config.tail, &shutdown) {
        Ok(reader) => reader,
        Err(err) if err.is_cancelled() => {
            return Ok(Report::Cancelled {
                reason: err.to_string(),
            });
        }
        Err(err) => return Err(err),
    };

    let mut monitor = MonitorLoop::new(
        reader,
        store,
        signal,
        threshold,
        config.monitor.clone(),
        shutdown,
    );
    Ok(Report::Monitor(monitor.run()?))
}

fn run_binary(
    log_file: PathBuf,
    output: PathBuf,
    threshold: Threshold,
    config: &Config,
    template: CommandTemplate,
    shutdown: Shutdown,
) -> Result<Report, Error> {
    let store = BestStore::open(output)?;
    let mut search = SearchLoop::new(
        LogTailReader::new(log_file),
        store,
        threshold,
        config.search.clone(),
        ShellProbe::new(template),
        shutdown,
    );
    Ok(Report::Binary(search.run()?))
}

fn print_report(report: &Report, format: SummaryFormat) -> anyhow::Result<()> {
    match format {
        SummaryFormat::Json => println!("{}", serde_json::to_string_pretty(report)?),
        SummaryFormat::Plain => print!("{}", render_plain(report)),
    }
    Ok(())
}

fn render_plain(report: &Report) -> String {
    let mut out = String::new();
    match report {
        Report::Monitor(summary) => {
            let c = &summary.counters;
            let _ = writeln!(out, "Monitor stopped after {} poll cycles", c.cycles);
            let _ = writeln!(
                out,
                "  records: {} read, {} duplicate, {} rejected",
                c.records_read, c.duplicates, c.rejected
            );
            let _ = writeln!(
                out,
                "  bests: {} new, {} confirmed",
                c.new_bests, c.confirmations
            );
            render_bests(&mut out, &summary.bests);
            let _ = writeln!(out, "  output: {}", summary.output.display());
            let _ = writeln!(out, "  signal: {}", summary.signal_file.display());
        }
        Report::Binary(outcome) => {
            let status = if outcome.interrupted {
                "interrupted"
            } else {
                "finished"
            };
            let _ = writeln!(
                out,
                "Binary search {status} after {} probes in [{}, {}]",
                outcome.probes.len(),
                outcome.min_batch,
                outcome.max_batch
            );
            for probe in &outcome.probes {
                let _ = writeln!(out, "  batch {:>5}: {:?}", probe.batch, probe.verdict);
            }
            match &outcome.best {
                Some(best) => render_bests(&mut out, std::slice::from_ref(best)),
                None => {
                    let _ = writeln!(out, "  no batch size satisfied the threshold");
                }
            }
        }
        Report::Cancelled { reason } => {
            let _ = writeln!(out, "Stopped before any records were read: {reason}");
        }
    }
    out
}

fn render_bests(out: &mut String, bests: &[TestRecord]) {
    if bests.is_empty() {
        let _ = writeln!(out, "  no scenario has a satisfying record yet");
        return;
    }
    let _ = writeln!(out, "  best batch per scenario:");
    for best in bests {
        let _ = writeln!(
            out,
            "    {:<12} batch {:>5}  ttft {}  tpot {}  e2el {}",
            best.scenario().to_string(),
            best.concurrency,
            fmt_ms(best.ttft_ms),
            fmt_ms(best.tpot_ms),
            fmt_ms(best.e2el_ms)
        );
    }
}

fn fmt_ms(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |ms| format!("{ms:.1}ms"))
}

fn report_error(err: &anyhow::Error) {
    eprintln!("error: {err:#}");
    let remediation = err
        .downcast_ref::<Error>()
        .and_then(Error::remediation)
        .or_else(|| err.downcast_ref::<ConfigError>().map(ConfigError::remediation));
    if let Some(remediation) = remediation {
        eprint!("{}", remediation.render_plain());
    }
}

async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut term = signal(SignalKind::terminate())?;

        tokio::select! {
            result = tokio::signal::ctrl_c() => result,
            _ = term.recv() => Ok(()),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await
    }
}
