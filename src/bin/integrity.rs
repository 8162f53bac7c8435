//! Integrity CLI - Command-line interface for Integrity Flux
//!
//! Commands:
//! - replay: Replay a recorded session log into a SessionReport (batch mode)
//! - run: Monitor a live session fed as NDJSON on stdin (streaming mode)
//! - validate: Validate session log records
//! - score: Compute an integrity score from severity counts
//! - config: Print the effective configuration
//! - doctor: Diagnose configuration and environment

use clap::{Parser, Subcommand};
use std::collections::VecDeque;
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use integrity_flux::assessment::{FrameSnapshot, VisionAssessor};
use integrity_flux::config::MonitorConfig;
use integrity_flux::monitor::{IntegrityMonitor, MonitorSources};
use integrity_flux::pipeline::{parse_input, replay_session, MonitorInput, DEFAULT_SUBJECT_ID};
use integrity_flux::report::score_band;
use integrity_flux::scorer::{integrity_score, SeverityCounts};
use integrity_flux::sources::{ChannelBrowserSource, ChannelFrameSource};
use integrity_flux::types::{Session, Violation};
use integrity_flux::{MonitorError, MonitorResult, ENGINE_VERSION, PRODUCER_NAME};

/// Integrity - behavior monitoring engine for remote assessment sessions
#[derive(Parser)]
#[command(name = "integrity")]
#[command(author = "Synheart AI Inc")]
#[command(version = ENGINE_VERSION)]
#[command(about = "Turn camera landmarks and browser events into an integrity report", long_about = None)]
struct Cli {
    /// Monitor configuration file (JSON); defaults are used when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a recorded session log into a SessionReport (batch mode)
    Replay {
        /// Input file path (use - for stdin)
        #[arg(short, long, default_value = "-")]
        input: PathBuf,

        /// Output file path (use - for stdout)
        #[arg(short, long, default_value = "-")]
        output: PathBuf,

        /// Emit single-line JSON
        #[arg(long)]
        compact: bool,
    },

    /// Monitor a live session fed as NDJSON on stdin (streaming mode)
    Run {
        /// Subject id when the stream has no session header
        #[arg(long, default_value = DEFAULT_SUBJECT_ID)]
        subject: String,

        /// Flush output after each violation
        #[arg(long, default_value = "true")]
        flush: bool,
    },

    /// Validate session log records
    Validate {
        /// Input file path (use - for stdin)
        #[arg(short, long, default_value = "-")]
        input: PathBuf,

        /// Output validation report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Compute an integrity score from severity counts
    Score {
        #[arg(long, default_value = "0")]
        high: u32,

        #[arg(long, default_value = "0")]
        medium: u32,

        #[arg(long, default_value = "0")]
        low: u32,
    },

    /// Print the effective configuration
    Config,

    /// Diagnose configuration and environment
    Doctor {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

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

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<(), IntegrityCliError> {
    match cli.command {
        Commands::Replay {
            input,
            output,
            compact,
        } => cmd_replay(&input, &output, cli.config.as_deref(), compact),

        Commands::Run { subject, flush } => {
            let config = load_config(cli.config.as_deref())?;
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?;
            runtime.block_on(cmd_run(config, subject, flush))
        }

        Commands::Validate { input, json } => cmd_validate(&input, json),

        Commands::Score { high, medium, low } => cmd_score(high, medium, low),

        Commands::Config => {
            let config = load_config(cli.config.as_deref())?;
            println!("{}", config.to_json()?);
            Ok(())
        }

        Commands::Doctor { json } => cmd_doctor(cli.config.as_deref(), json),
    }
}

fn load_config(path: Option<&Path>) -> Result<MonitorConfig, IntegrityCliError> {
    match path {
        Some(path) => Ok(MonitorConfig::from_json(&fs::read_to_string(path)?)?),
        None => Ok(MonitorConfig::default()),
    }
}

fn read_input(input: &Path) -> Result<String, IntegrityCliError> {
    if input.to_string_lossy() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    } else {
        Ok(fs::read_to_string(input)?)
    }
}

fn cmd_replay(
    input: &Path,
    output: &Path,
    config: Option<&Path>,
    compact: bool,
) -> Result<(), IntegrityCliError> {
    let config = load_config(config)?;
    let log = read_input(input)?;

    let report = replay_session(&log, &config)?;
    let json = if compact {
        report.to_json_compact()?
    } else {
        report.to_json()?
    };

    if output.to_string_lossy() == "-" {
        println!("{}", json);
    } else {
        fs::write(output, json)?;
    }

    Ok(())
}

/// Hands recorded collaborator answers to the assessment collector, oldest first
#[derive(Default, Clone)]
struct RecordedAssessor {
    responses: Arc<Mutex<VecDeque<String>>>,
}

impl RecordedAssessor {
    fn push(&self, response: String) {
        if let Ok(mut queue) = self.responses.lock() {
            queue.push_back(response);
        }
    }
}

#[async_trait]
impl VisionAssessor for RecordedAssessor {
    async fn assess(&self, _snapshot: &FrameSnapshot) -> MonitorResult<String> {
        self.responses
            .lock()
            .ok()
            .and_then(|mut queue| queue.pop_front())
            .ok_or_else(|| MonitorError::AssessmentFailed("no recorded response".to_string()))
    }
}

async fn cmd_run(config: MonitorConfig, subject: String, flush: bool) -> Result<(), IntegrityCliError> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    // The first record may name the session
    let mut pending = None;
    let mut session = None;
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        match parse_input(&line)? {
            MonitorInput::Session(header) => {
                session = Some(Session::new(
                    header.session_id,
                    header.subject_id,
                    header.started_at.unwrap_or_else(chrono::Utc::now),
                ));
            }
            other => pending = Some(other),
        }
        break;
    }

    let (frame_tx, frames) = ChannelFrameSource::channel(config.channels.frame_capacity);
    let (browser_tx, browser) = ChannelBrowserSource::channel(config.channels.priority_capacity);
    let (prevent_tx, mut prevent_rx) = mpsc::unbounded_channel();
    let assessor = RecordedAssessor::default();

    let sources = MonitorSources::new()
        .with_frames(frames)
        .with_browser(browser.with_prevent_default(prevent_tx))
        .with_assessor(Arc::new(assessor.clone()));

    let monitor = match session {
        Some(session) => IntegrityMonitor::start_session(config, session, sources)?,
        None => IntegrityMonitor::start(config, subject, sources)?,
    };
    info!(session_id = monitor.session_id(), "Monitoring started");

    let printer = tokio::spawn(print_violations(monitor.subscribe(), flush));
    let prevented = tokio::spawn(async move {
        let mut count = 0u64;
        while let Some(event) = prevent_rx.recv().await {
            count += 1;
            info!(kind = ?event.kind, "Default action suppressed");
        }
        count
    });

    let mut next = pending;
    loop {
        let input = match next.take() {
            Some(input) => input,
            None => match lines.next_line().await? {
                Some(line) if line.trim().is_empty() => continue,
                Some(line) => parse_input(&line)?,
                None => break,
            },
        };

        match input {
            MonitorInput::Frame(frame) => {
                if frame_tx.send(frame).await.is_err() {
                    break;
                }
            }
            MonitorInput::Browser(event) => {
                if browser_tx.send(event).await.is_err() {
                    break;
                }
            }
            MonitorInput::Assessment(record) => {
                let response = match (record.response, record.assessment) {
                    (Some(text), _) => text,
                    (None, Some(value)) => value.to_string(),
                    (None, None) => String::new(),
                };
                assessor.push(response);
                monitor.trigger_assessment();
            }
            MonitorInput::Session(_) => {
                warn!("Ignoring session header after the first record");
            }
            MonitorInput::Signal(_) => {
                warn!("Pre-computed signals are only accepted by replay");
            }
        }
    }

    drop(frame_tx);
    drop(browser_tx);
    let report = monitor.drain().await?;

    // Both tasks end once every sender is gone
    let _ = printer.await;
    if let Ok(count) = prevented.await {
        info!(count, "Suppressed default actions");
    }

    println!("{}", report.to_json_compact()?);
    io::stdout().flush()?;
    Ok(())
}

async fn print_violations(mut rx: broadcast::Receiver<Violation>, flush: bool) {
    let mut stdout = io::stdout();
    loop {
        match rx.recv().await {
            Ok(violation) => {
                if let Ok(json) = serde_json::to_string(&violation) {
                    let _ = writeln!(stdout, "{}", json);
                    if flush {
                        let _ = stdout.flush();
                    }
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Violation output fell behind");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn cmd_validate(input: &Path, json: bool) -> Result<(), IntegrityCliError> {
    let log = read_input(input)?;

    let mut total_records = 0;
    let mut errors = Vec::new();
    for (index, line) in log.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        total_records += 1;
        if let Err(e) = parse_input(line) {
            errors.push(ValidationErrorDetail {
                line: index + 1,
                error: e.to_string(),
            });
        }
    }

    let report = ValidationReport {
        total_records,
        valid_records: total_records - errors.len(),
        invalid_records: errors.len(),
        errors,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Validation Report");
        println!("=================");
        println!("Total records:   {}", report.total_records);
        println!("Valid records:   {}", report.valid_records);
        println!("Invalid records: {}", report.invalid_records);

        if !report.errors.is_empty() {
            println!("\nErrors:");
            for err in &report.errors {
                println!("  - Line {}: {}", err.line, err.error);
            }
        }
    }

    if report.invalid_records > 0 {
        Err(IntegrityCliError::ValidationFailed(report.invalid_records))
    } else {
        Ok(())
    }
}

fn cmd_score(high: u32, medium: u32, low: u32) -> Result<(), IntegrityCliError> {
    let counts = SeverityCounts {
        high,
        medium,
        low,
        ..SeverityCounts::default()
    };
    let score = integrity_score(&counts);
    let output = ScoreOutput {
        score,
        band: score_band(score).to_string(),
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn cmd_doctor(config: Option<&Path>, json: bool) -> Result<(), IntegrityCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck {
        name: "engine_version".to_string(),
        status: CheckStatus::Ok,
        message: format!("Integrity Flux version {}", ENGINE_VERSION),
    });

    match config {
        Some(path) => match load_config(Some(path)) {
            Ok(_) => checks.push(DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Ok,
                message: format!("Config file {} is valid", path.display()),
            }),
            Err(e) => checks.push(DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Error,
                message: CliError::from(e).message,
            }),
        },
        None => checks.push(DoctorCheck {
            name: "config".to_string(),
            status: CheckStatus::Warning,
            message: "No config file given, using defaults".to_string(),
        }),
    }

    // Streaming mode expects piped input
    let stdin_check = if atty::is(atty::Stream::Stdin) {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a TTY (interactive mode)".to_string(),
        }
    } else {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a pipe (streaming mode ready)".to_string(),
        }
    };
    checks.push(stdin_check);

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: ENGINE_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Integrity Doctor Report");
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
        Err(IntegrityCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

// Error types

#[derive(Debug)]
enum IntegrityCliError {
    Io(io::Error),
    Monitor(MonitorError),
    Json(serde_json::Error),
    ValidationFailed(usize),
    DoctorFailed,
}

impl From<io::Error> for IntegrityCliError {
    fn from(e: io::Error) -> Self {
        IntegrityCliError::Io(e)
    }
}

impl From<MonitorError> for IntegrityCliError {
    fn from(e: MonitorError) -> Self {
        IntegrityCliError::Monitor(e)
    }
}

impl From<serde_json::Error> for IntegrityCliError {
    fn from(e: serde_json::Error) -> Self {
        IntegrityCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<IntegrityCliError> for CliError {
    fn from(e: IntegrityCliError) -> Self {
        match e {
            IntegrityCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            IntegrityCliError::Monitor(e @ MonitorError::InvalidConfig(_)) => CliError {
                code: "CONFIG_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Run 'integrity config' to see the expected layout".to_string()),
            },
            IntegrityCliError::Monitor(e @ (MonitorError::ParseError(_) | MonitorError::InvalidInput(_))) => {
                CliError {
                    code: "PARSE_ERROR".to_string(),
                    message: e.to_string(),
                    hint: Some("Run 'integrity validate' for details".to_string()),
                }
            }
            IntegrityCliError::Monitor(e) => CliError {
                code: "MONITOR_ERROR".to_string(),
                message: e.to_string(),
                hint: None,
            },
            IntegrityCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            IntegrityCliError::ValidationFailed(count) => CliError {
                code: "VALIDATION_FAILED".to_string(),
                message: format!("{} records failed validation", count),
                hint: Some("Fix validation errors and retry".to_string()),
            },
            IntegrityCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
        }
    }
}

// Report types

#[derive(serde::Serialize)]
struct ValidationReport {
    total_records: usize,
    valid_records: usize,
    invalid_records: usize,
    errors: Vec<ValidationErrorDetail>,
}

#[derive(serde::Serialize)]
struct ValidationErrorDetail {
    line: usize,
    error: String,
}

#[derive(serde::Serialize)]
struct ScoreOutput {
    score: u32,
    band: String,
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_doctor_fails_on_invalid_config() {
        let path = std::env::temp_dir().join(format!("integrity-doctor-{}.json", std::process::id()));
        fs::write(&path, r#"{"distance": {"min_area": 0.9, "max_area": 0.5}}"#).unwrap();
        let result = cmd_doctor(Some(&path), true);
        fs::remove_file(&path).unwrap();
        assert!(matches!(result, Err(IntegrityCliError::DoctorFailed)));
    }

    #[test]
    fn test_doctor_passes_with_valid_or_missing_config() {
        let path = std::env::temp_dir().join(format!("integrity-doctor-ok-{}.json", std::process::id()));
        fs::write(&path, MonitorConfig::default().to_json().unwrap()).unwrap();
        let result = cmd_doctor(Some(&path), true);
        fs::remove_file(&path).unwrap();
        assert!(result.is_ok());

        assert!(cmd_doctor(None, true).is_ok());
    }

    #[test]
    fn test_config_errors_map_to_config_code() {
        let error = CliError::from(IntegrityCliError::Monitor(MonitorError::InvalidConfig(
            "bad".to_string(),
        )));
        assert_eq!(error.code, "CONFIG_ERROR");
    }
}
