//! `permanence` – host binary for the object-permanence tracker.
//!
//! Wires the tracker to a simulated body and to the process's standard
//! streams:
//!
//! - **stdin**: newline-delimited JSON [`IntakeMessage`]s.
//! - **stdout**: one JSON [`OutputEvent`][permanence_types::OutputEvent] per
//!   newly anchored object.
//! - **stderr**: logs, the banner and the final registry summary.
//!
//! The run ends at end of input or on **Ctrl-C**.
//!
//! ```text
//! $ echo '{"event":{"source":"asr","payload":{"kind":"speech","data":{"text":"explore"}}}}' | permanence run
//! ```

mod config;

use std::io::IsTerminal;
use std::process::ExitCode;
use std::sync::Arc;

use colored::Colorize;
use permanence_hal::SimActuation;
use permanence_memory::ObjectRegistry;
use permanence_runtime::{TrackerService, init_tracing};
use permanence_types::{IntakeMessage, PermanenceError};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

// ─────────────────────────────────────────────────────────────────────────────
// Commands
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Run,
    Schema,
    Init,
    Help,
    Unknown(String),
}

impl Command {
    fn parse(arg: Option<&str>) -> Self {
        match arg {
            None | Some("run") => Command::Run,
            Some("schema") => Command::Schema,
            Some("init") => Command::Init,
            Some("help" | "--help" | "-h") => Command::Help,
            Some(other) => Command::Unknown(other.to_string()),
        }
    }
}

fn main() -> ExitCode {
    // Hold the guard until exit so buffered spans are flushed.
    let _telemetry = init_tracing("permanence");

    let arg = std::env::args().nth(1);
    let result = match Command::parse(arg.as_deref()) {
        Command::Run => run(),
        Command::Schema => print_schema(),
        Command::Init => init_config(),
        Command::Help => {
            print_help();
            Ok(())
        }
        Command::Unknown(other) => {
            eprintln!("{} unknown command `{}`\n", "error:".red().bold(), other);
            print_help();
            return ExitCode::from(2);
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", "error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// run
// ─────────────────────────────────────────────────────────────────────────────

fn run() -> Result<(), PermanenceError> {
    let cfg = config::load()?;
    debug!(?cfg, "configuration loaded");
    if std::io::stderr().is_terminal() {
        print_banner();
    }

    let runtime = tokio::runtime::Runtime::new()
        .map_err(|e| PermanenceError::Config(format!("failed to start Tokio runtime: {e}")))?;
    let result = runtime.block_on(serve(cfg));
    // A stdin read interrupted by Ctrl-C cannot be cancelled; don't wait on it.
    runtime.shutdown_background();
    print_summary(&result?);
    Ok(())
}

async fn serve(cfg: config::Config) -> Result<ObjectRegistry, PermanenceError> {
    let sim = Arc::new(
        SimActuation::builder()
            .with_focal_length(cfg.sim.focal_length_x, cfg.sim.focal_length_y)
            .build(),
    );
    let mut service = TrackerService::new(&cfg.tracker_config(), sim);
    let mut outputs = service.subscribe();
    service.prepare_run()?;

    let trigger = service.shutdown_trigger();
    let ctrlc_trigger = trigger.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        eprintln!();
        eprintln!("{}", "⚠  Ctrl-C received – shutting down …".yellow().bold());
        ctrlc_trigger.trigger();
    }) {
        warn!(error = %e, "failed to install Ctrl-C handler; only end of input stops the run");
    }

    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(event) = outputs.recv().await {
            let line = match serde_json::to_string(&event) {
                Ok(line) => line,
                Err(e) => {
                    warn!(error = %e, "failed to encode output event");
                    continue;
                }
            };
            if stdout.write_all(format!("{line}\n").as_bytes()).await.is_err()
                || stdout.flush().await.is_err()
            {
                warn!("stdout closed; output events are no longer written");
                break;
            }
        }
    });

    let intake = service.intake();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut accepted = 0u64;
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line,
            _ = trigger.wait() => break,
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => {
                info!(accepted, "end of input");
                break;
            }
            Err(e) => {
                warn!(error = %e, "failed to read stdin");
                break;
            }
        };
        match parse_line(&line) {
            Ok(Some(msg)) => {
                if service.process_update(msg.update, msg.event) {
                    accepted += 1;
                }
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "skipping malformed input line"),
        }
    }

    // Let the loop finish what is already queued unless told to stop now.
    tokio::select! {
        _ = intake.drained() => {}
        _ = trigger.wait() => {}
    }

    // Dropping the loop and the service releases the output bus, which ends
    // the writer once it has drained.
    let registry = service.shutdown().await?.into_registry();
    drop(service);
    if writer.await.is_err() {
        warn!("output writer task panicked");
    }
    Ok(registry)
}

/// One stdin line: `None` for blank lines.
fn parse_line(line: &str) -> Result<Option<IntakeMessage>, serde_json::Error> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(line).map(Some)
}

// ─────────────────────────────────────────────────────────────────────────────
// schema / init / help
// ─────────────────────────────────────────────────────────────────────────────

fn print_schema() -> Result<(), PermanenceError> {
    let schema = schemars::schema_for!(IntakeMessage);
    let json = serde_json::to_string_pretty(&schema)
        .map_err(|e| PermanenceError::Config(format!("failed to encode schema: {e}")))?;
    println!("{json}");
    Ok(())
}

fn init_config() -> Result<(), PermanenceError> {
    let path = config::config_path();
    if path.exists() {
        eprintln!("  Config already exists at {}", path.display().to_string().bold());
        return Ok(());
    }
    let path = config::save(&config::Config::default())?;
    eprintln!(
        "  {} Default config written to {}",
        "✓".green().bold(),
        path.display().to_string().bold()
    );
    Ok(())
}

fn print_help() {
    eprintln!("{}", "Usage: permanence [COMMAND]".bold());
    eprintln!();
    eprintln!("  {}     Track objects from NDJSON on stdin (default)", "run".cyan());
    eprintln!("  {}  Print the JSON schema of one input line", "schema".cyan());
    eprintln!("  {}    Write a default ~/.permanence/config.toml", "init".cyan());
    eprintln!("  {}    Show this help", "help".cyan());
    eprintln!();
    eprintln!("  Env: RUST_LOG, PERMANENCE_LOG_FORMAT=json, OTEL_EXPORTER_OTLP_ENDPOINT,");
    eprintln!("       PERMANENCE_ACTUATION_TIMEOUT_MS, PERMANENCE_QUEUE_CAPACITY,");
    eprintln!("       PERMANENCE_KNOWN_WIDTH_MM, PERMANENCE_FOCAL_LENGTH");
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner / summary
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    eprintln!();
    eprintln!(
        "  {} {}",
        "permanence".bold().cyan(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    eprintln!("  Object permanence tracker – reading perception events from stdin");
    eprintln!();
}

fn print_summary(registry: &ObjectRegistry) {
    eprintln!();
    if registry.is_empty() {
        eprintln!("  {}", "No objects tracked.".dimmed());
        return;
    }
    eprintln!("  {} object(s) tracked:", registry.len().to_string().bold());
    for label in registry.labels() {
        if let Some(record) = registry.resolve(label) {
            let p = record.anchored_pose.position;
            eprintln!(
                "    • {} {} at ({:.0}, {:.0}, {:.0})",
                label.bold(),
                record.anchor_id.to_string().dimmed(),
                p.x,
                p.y,
                p.z
            );
        }
    }
}
