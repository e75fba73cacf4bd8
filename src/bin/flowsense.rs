//! flowsense CLI
//!
//! Commands:
//! - classify: Classify a single (noise, heart rate, interval) reading
//! - forecast: Forecast flow windows from an exported telemetry feed
//! - simulate: Drive a sensing node with synthetic waveforms
//! - doctor: Diagnose configuration and environment

use clap::{Parser, Subcommand};
use std::f64::consts::PI;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use chrono::{DateTime, Duration, Utc};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use flowsense::config::FlowConfig;
use flowsense::node::{NodeScheduler, SampleSource, SensingNode};
use flowsense::service::{ForecastService, RunOutcome, SnapshotStatus};
use flowsense::telemetry::{MemoryTelemetryStore, StaticFeed};
use flowsense::{classify, ClassifiedState, FlowError, FLOWSENSE_VERSION, PRODUCER_NAME};

/// flowsense - Study-environment sensing and flow-state forecasting
#[derive(Parser)]
#[command(name = "flowsense")]
#[command(author = "Synheart AI Inc")]
#[command(version = FLOWSENSE_VERSION)]
#[command(about = "Classify study sessions and forecast flow windows", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify a single reading
    Classify {
        /// Ambient noise level (dB)
        #[arg(long)]
        noise_db: f64,

        /// Heart rate (bpm)
        #[arg(long)]
        bpm: f64,

        /// Inter-beat interval (ms)
        #[arg(long, default_value = "0")]
        rr_ms: f64,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Forecast flow windows from a telemetry feed
    Forecast {
        /// Feed file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Forecast reference time (RFC 3339); defaults to the latest feed entry
        #[arg(long)]
        now: Option<String>,

        /// Configuration file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Output file path (use - for stdout)
        #[arg(short, long, default_value = "-")]
        output: PathBuf,

        /// Pretty-print the snapshot
        #[arg(long)]
        pretty: bool,
    },

    /// Run a sensing node against synthetic waveforms
    Simulate {
        /// Simulated duration (seconds)
        #[arg(long, default_value = "30")]
        seconds: u64,

        /// Pulse rate of the synthetic optical waveform (bpm)
        #[arg(long, default_value = "70")]
        bpm: f64,

        /// Peak-to-peak swing of the synthetic microphone signal
        #[arg(long, default_value = "40")]
        noise_raw: u16,

        /// Configuration file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Write the uploaded telemetry as a feed file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Diagnose configuration and environment
    Doctor {
        /// Configuration file to check
        #[arg(long)]
        config: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).with_writer(io::stderr).init();
}

fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e)).unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), FlowCliError> {
    match cli.command {
        Commands::Classify {
            noise_db,
            bpm,
            rr_ms,
            json,
        } => cmd_classify(noise_db, bpm, rr_ms, json),
        Commands::Forecast {
            input,
            now,
            config,
            output,
            pretty,
        } => cmd_forecast(&input, now.as_deref(), config.as_deref(), &output, pretty),
        Commands::Simulate {
            seconds,
            bpm,
            noise_raw,
            config,
            output,
        } => cmd_simulate(seconds, bpm, noise_raw, config.as_deref(), output.as_deref()),
        Commands::Doctor { config, json } => cmd_doctor(config.as_deref(), json),
    }
}

fn load_config(path: Option<&Path>) -> Result<FlowConfig, FlowCliError> {
    match path {
        Some(path) => Ok(FlowConfig::from_file(path)?),
        None => Ok(FlowConfig::default()),
    }
}

fn cmd_classify(noise_db: f64, bpm: f64, rr_ms: f64, json: bool) -> Result<(), FlowCliError> {
    let state = classify(noise_db, bpm, rr_ms);
    if json {
        let report = ClassifyReport {
            noise_db,
            bpm,
            rr_interval_ms: rr_ms,
            state,
            label: state.label().to_string(),
        };
        println!("{}", serde_json::to_string(&report)?);
    } else {
        println!("{}", state.label());
    }
    Ok(())
}

fn cmd_forecast(
    input: &Path,
    now: Option<&str>,
    config: Option<&Path>,
    output: &Path,
    pretty: bool,
) -> Result<(), FlowCliError> {
    let config = load_config(config)?;

    let input_data = if input.to_string_lossy() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        buffer
    } else {
        fs::read_to_string(input)?
    };
    let feed = StaticFeed::from_json(&input_data)?;

    let now = match now {
        Some(s) => DateTime::parse_from_rfc3339(s)
            .map_err(|e| FlowCliError::InvalidTime(format!("{s}: {e}")))?
            .with_timezone(&Utc),
        None => feed.latest().unwrap_or_else(Utc::now),
    };
    info!(entries = feed.len(), %now, "forecasting from feed");

    let service = ForecastService::new(config.forecast)?;
    let snapshot = match service.run(&feed, now) {
        RunOutcome::Completed(snapshot) => snapshot,
        RunOutcome::Skipped => service.snapshot(),
    };

    let mut output_data = if pretty {
        snapshot.to_json_pretty()?
    } else {
        snapshot.to_json()?
    };
    output_data.push('\n');

    if output.to_string_lossy() == "-" {
        print!("{}", output_data);
    } else {
        fs::write(output, output_data)?;
    }

    match &snapshot.status {
        SnapshotStatus::Error { message } => Err(FlowCliError::ForecastFailed(message.clone())),
        _ => Ok(()),
    }
}

/// Sine pulse on the optical channel, square wave on the microphone
struct SyntheticSource {
    period_ms: f64,
    noise_swing: u16,
}

impl SampleSource for SyntheticSource {
    fn read_noise(&mut self, now_ms: u64) -> Result<u16, FlowError> {
        let half = self.noise_swing / 2;
        Ok(if now_ms % 4 < 2 { 2048 + half } else { 2048 - half })
    }

    fn read_optical(&mut self, now_ms: u64) -> Result<u32, FlowError> {
        let phase = 2.0 * PI * (now_ms as f64 % self.period_ms) / self.period_ms;
        Ok((60_000.0 + 2000.0 * phase.sin()).round() as u32)
    }
}

fn cmd_simulate(
    seconds: u64,
    bpm: f64,
    noise_raw: u16,
    config: Option<&Path>,
    output: Option<&Path>,
) -> Result<(), FlowCliError> {
    if !(bpm > 0.0 && bpm.is_finite()) {
        return Err(FlowCliError::InvalidArgument(format!("bpm must be positive, got {bpm}")));
    }
    let config = load_config(config)?;

    let mut node = SensingNode::new(&config.node);
    let mut scheduler = NodeScheduler::new(&config.node);
    let mut source = SyntheticSource {
        period_ms: 60_000.0 / bpm,
        noise_swing: noise_raw.min(4095),
    };
    let store = MemoryTelemetryStore::new();

    let start = Utc::now();
    let step = config.node.noise_sample_period_ms;
    let mut now_ms = 0;
    let end_ms = seconds.saturating_mul(1000);
    while now_ms <= end_ms {
        let wall_clock = start + Duration::milliseconds(now_ms as i64);
        scheduler.poll(&mut node, &mut source, &store, now_ms, wall_clock);
        now_ms += step;
    }

    info!(
        uploads = store.len(),
        beats = node.detector().beat_count(),
        "simulation finished"
    );
    println!("{}", serde_json::to_string_pretty(&node.status_report())?);

    if let Some(path) = output {
        fs::write(path, store.to_feed_json()?)?;
    }
    Ok(())
}

fn cmd_doctor(config: Option<&Path>, json: bool) -> Result<(), FlowCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck {
        name: "flowsense_version".to_string(),
        status: CheckStatus::Ok,
        message: format!("flowsense version {}", FLOWSENSE_VERSION),
    });

    // Known reading must land in the flow quadrant
    let probe = classify(45.0, 70.0, 850.0);
    checks.push(DoctorCheck {
        name: "classifier".to_string(),
        status: if probe == ClassifiedState::FlowState {
            CheckStatus::Ok
        } else {
            CheckStatus::Error
        },
        message: format!("45 dB / 70 bpm / 850 ms classified as {}", probe.as_str()),
    });

    if let Some(config_path) = config {
        if config_path.exists() {
            match FlowConfig::from_file(config_path) {
                Ok(config) => {
                    checks.push(DoctorCheck {
                        name: "config".to_string(),
                        status: CheckStatus::Ok,
                        message: format!(
                            "Config valid (upload every {} ms, {} days of history)",
                            config.node.upload_period_ms, config.forecast.history_days
                        ),
                    });
                }
                Err(e) => {
                    checks.push(DoctorCheck {
                        name: "config".to_string(),
                        status: CheckStatus::Error,
                        message: format!("Invalid config: {}", e),
                    });
                }
            }
        } else {
            checks.push(DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Warning,
                message: "Config file does not exist, defaults will be used".to_string(),
            });
        }
    }

    let stdin_check = if atty::is(atty::Stream::Stdin) {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a TTY (pass a feed file with --input)".to_string(),
        }
    } else {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a pipe (forecast --input - ready)".to_string(),
        }
    };
    checks.push(stdin_check);

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: FLOWSENSE_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("flowsense Doctor Report");
        println!("=======================");
        println!("Producer: {}", report.producer);
        println!("Version:  {}", report.version);
        println!("\nChecks:");

        for check in &report.checks {
            let status_icon = match check.status {
                CheckStatus::Ok => "[OK]",
                CheckStatus::Warning => "[WARN]",
                CheckStatus::Error => "[ERR]",
            };
            println!("  {} {}: {}", status_icon, check.name, check.message);
        }
    }

    let has_errors = report.checks.iter().any(|c| matches!(c.status, CheckStatus::Error));
    if has_errors {
        Err(FlowCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

// Error types

#[derive(Debug)]
enum FlowCliError {
    Io(io::Error),
    Flow(FlowError),
    Json(serde_json::Error),
    InvalidTime(String),
    InvalidArgument(String),
    ForecastFailed(String),
    DoctorFailed,
}

impl From<io::Error> for FlowCliError {
    fn from(e: io::Error) -> Self {
        FlowCliError::Io(e)
    }
}

impl From<FlowError> for FlowCliError {
    fn from(e: FlowError) -> Self {
        FlowCliError::Flow(e)
    }
}

impl From<serde_json::Error> for FlowCliError {
    fn from(e: serde_json::Error) -> Self {
        FlowCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<FlowCliError> for CliError {
    fn from(e: FlowCliError) -> Self {
        match e {
            FlowCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            FlowCliError::Flow(FlowError::Config(msg)) => CliError {
                code: "CONFIG_ERROR".to_string(),
                message: msg,
                hint: Some("Run 'flowsense doctor --config <file>' for details".to_string()),
            },
            FlowCliError::Flow(FlowError::MalformedTelemetry(msg)) => CliError {
                code: "MALFORMED_FEED".to_string(),
                message: msg,
                hint: Some("Expected {\"feeds\": [...]} or a JSON array of entries".to_string()),
            },
            FlowCliError::Flow(e) => CliError {
                code: "FLOW_ERROR".to_string(),
                message: e.to_string(),
                hint: None,
            },
            FlowCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            FlowCliError::InvalidTime(msg) => CliError {
                code: "INVALID_TIME".to_string(),
                message: msg,
                hint: Some("Use RFC 3339, e.g. 2024-01-15T08:20:00Z".to_string()),
            },
            FlowCliError::InvalidArgument(msg) => CliError {
                code: "INVALID_ARGUMENT".to_string(),
                message: msg,
                hint: None,
            },
            FlowCliError::ForecastFailed(msg) => CliError {
                code: "FORECAST_FAILED".to_string(),
                message: msg,
                hint: Some("Check the feed contents and retry".to_string()),
            },
            FlowCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
        }
    }
}

// Report types

#[derive(serde::Serialize)]
struct ClassifyReport {
    noise_db: f64,
    bpm: f64,
    rr_interval_ms: f64,
    state: ClassifiedState,
    label: String,
}

#[derive(serde::Serialize)]
struct DoctorReport {
    producer: String,
    version: String,
    checks: Vec<DoctorCheck>,
}

#[derive(serde::Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

#[derive(serde::Serialize)]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}
