//! Synheart Vitals CLI
//!
//! Wearable vitals ingestion, rollups and health-event detection.

use anyhow::Context;
use chrono::{DurationRound, Utc};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use synheart_vitals_pipeline::{
    config::Config,
    stats::PipelineStats,
    store::{EventQuery, HistoryRange},
    Clock, IntervalType, ManualClock, MemoryKv, MemoryStore, Pipeline, SensorPayload,
    SystemClock, TickOutcome, Vector3, VERSION,
};
use tokio::sync::{watch, Notify};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "synheart-vitals")]
#[command(author = "Synheart")]
#[command(version = VERSION)]
#[command(about = "Wearable vitals ingestion and health-event detection", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline: HTTP ingestion plus periodic aggregation
    Serve {
        /// Port for the HTTP server (overrides config)
        #[arg(long)]
        port: Option<u16>,

        /// Run the scheduler only, without the HTTP server
        #[arg(long)]
        no_http: bool,
    },

    /// Feed a synthetic sample stream through an in-memory pipeline
    Simulate {
        /// Number of simulated subjects
        #[arg(long, default_value = "3")]
        subjects: usize,

        /// Minutes of 1 Hz data per subject
        #[arg(long, default_value = "5")]
        minutes: usize,

        /// Give the last subject a rising temperature
        #[arg(long)]
        fever: bool,
    },

    /// Show cumulative pipeline statistics
    Status,

    /// Show configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { port, no_http } => cmd_serve(port, no_http).await,
        Commands::Simulate {
            subjects,
            minutes,
            fever,
        } => cmd_simulate(subjects, minutes, fever).await,
        Commands::Status => {
            cmd_status();
            Ok(())
        }
        Commands::Config => {
            cmd_config();
            Ok(())
        }
    }
}

fn load_config() -> Config {
    match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Warning: Could not load config ({e}), using defaults");
            Config::with_default_paths()
        }
    }
}

async fn cmd_serve(port: Option<u16>, no_http: bool) -> anyhow::Result<()> {
    println!("Synheart Vitals Pipeline v{VERSION}");
    println!();

    let mut config = load_config();
    if let Some(port) = port {
        config.server.port = port;
    }
    if let Err(e) = config.ensure_directories() {
        eprintln!("Warning: Could not create directories: {e}");
    }

    println!("Starting pipeline...");
    println!(
        "  Buffer: {} samples / {}s per subject",
        config.buffer.capacity,
        config.buffer.retention.as_secs()
    );
    println!(
        "  Rate limit: {} requests / {}s per subject",
        config.rate_limit.max_requests,
        config.rate_limit.window.as_secs()
    );
    println!("  Aggregation interval: {}s", config.scheduler.interval.as_secs());
    println!("  Event cooldown: {}s", config.dedup.cooldown.as_secs());

    let clock = Arc::new(SystemClock);
    let store = Arc::new(MemoryStore::with_persistence(config.store_path()));
    let stats = Arc::new(PipelineStats::with_persistence(config.stats_path()));
    let pipeline = Arc::new(Pipeline::new(
        config.clone(),
        Arc::new(MemoryKv::new(clock.clone())),
        store.clone(),
        clock,
        stats.clone(),
    ));

    // Set up Ctrl+C handler
    let stop = Arc::new(Notify::new());
    let notify = stop.clone();
    ctrlc::set_handler(move || notify.notify_one()).context("Error setting Ctrl+C handler")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler_handle = pipeline.scheduler().clone().spawn(shutdown_rx);

    #[cfg(feature = "server")]
    let server_shutdown = if no_http {
        println!("  HTTP server: disabled");
        None
    } else {
        let server_config = synheart_vitals_pipeline::server::ServerConfig::new(config.server.port);
        let (addr, tx) =
            synheart_vitals_pipeline::server::run(server_config, pipeline.clone()).await?;
        println!("  HTTP server: http://{addr}");
        Some(tx)
    };

    #[cfg(not(feature = "server"))]
    if !no_http {
        eprintln!(
            "Warning: HTTP server not available (server feature not enabled at compile time)"
        );
    }

    println!();
    println!("Press Ctrl+C to stop");
    println!();

    stop.notified().await;

    println!();
    println!("Stopping pipeline...");
    let _ = shutdown_tx.send(true);
    let _ = scheduler_handle.await;

    #[cfg(feature = "server")]
    if let Some(tx) = server_shutdown {
        let _ = tx.send(());
    }

    if let Err(e) = store.save() {
        eprintln!("Warning: Could not save store snapshot: {e}");
    }
    if let Err(e) = stats.save() {
        eprintln!("Warning: Could not save pipeline stats: {e}");
    }

    println!();
    println!("{}", stats.summary());
    Ok(())
}

async fn cmd_simulate(subjects: usize, minutes: usize, fever: bool) -> anyhow::Result<()> {
    let start = Utc::now()
        .duration_trunc(chrono::Duration::minutes(1))
        .context("Could not align simulation start")?;
    let clock = Arc::new(ManualClock::new(start));
    let pipeline = Pipeline::in_memory_with_clock(Config::default(), clock.clone());

    let subject_ids: Vec<String> = (1..=subjects).map(|i| format!("subject-{i}")).collect();
    println!(
        "Simulating {} subject(s) for {} minute(s) at 1 Hz",
        subject_ids.len(),
        minutes
    );
    println!();

    for minute in 0..minutes {
        for second in 0..60 {
            let step = minute * 60 + second;
            for (index, subject_id) in subject_ids.iter().enumerate() {
                let feverish = fever && index + 1 == subject_ids.len();
                let payload = synthetic_payload(step, index, minute, feverish);
                let reading = payload.validate()?;
                if let Err(e) = pipeline.ingest().ingest(subject_id, reading).await {
                    eprintln!("[{subject_id}] ingest failed: {e}");
                }
            }
            clock.advance(chrono::Duration::seconds(1));
        }

        match pipeline.scheduler().tick().await {
            TickOutcome::Completed(report) => println!(
                "[{}] Tick: {} subjects, {} rollups, {} events ({} suppressed)",
                clock.now().format("%H:%M:%S"),
                report.subjects,
                report.rollups_written,
                report.events_written,
                report.events_suppressed
            ),
            TickOutcome::Skipped => println!("Tick skipped"),
            TickOutcome::Failed(e) => eprintln!("Tick failed: {e}"),
        }
    }

    println!();
    for subject_id in &subject_ids {
        let rollups = pipeline
            .history(subject_id, HistoryRange::Day, IntervalType::Minute)
            .await?;
        let events = pipeline.events(EventQuery::new(subject_id.as_str())).await?;

        println!("{subject_id}:");
        for rollup in rollups.iter().rev() {
            println!(
                "  {} HR {:.2} ({}-{}) SpO2 {:.2} Temp {:.2} {:?} n={}",
                rollup.interval_start.format("%H:%M"),
                rollup.avg_heart_rate,
                rollup.min_heart_rate,
                rollup.max_heart_rate,
                rollup.avg_spo2,
                rollup.avg_temperature_c,
                rollup.activity_level,
                rollup.sample_count
            );
        }
        for event in events.iter().rev() {
            println!(
                "  ! {} {} {:?} value={:.2}",
                event.timestamp.format("%H:%M:%S"),
                event.event_type,
                event.severity,
                event.value
            );
        }
    }

    println!();
    println!("{}", pipeline.stats().summary());
    Ok(())
}

/// Deterministic resting vitals with a little variation per step.
fn synthetic_payload(step: usize, subject: usize, minute: usize, feverish: bool) -> SensorPayload {
    let wobble = (step % 7) as f64 - 3.0;
    let temperature = if feverish {
        (36.8 + minute as f64 * 0.6).min(40.0)
    } else {
        36.6 + (step % 5) as f64 * 0.02
    };

    SensorPayload {
        heart_rate: Some(68.0 + subject as f64 * 4.0 + wobble),
        spo2: Some(97.0 + (step % 3) as f64 * 0.5),
        temperature: Some(temperature),
        accel: Some(Vector3::new(0.05, 0.1, 0.98 + (step % 4) as f64 * 0.01)),
        gyro: Some(Vector3::default()),
        timestamp: None,
    }
}

fn cmd_status() {
    let config = load_config();

    println!("Synheart Vitals Pipeline Status");
    println!("===============================");
    println!();

    println!("Configuration:");
    println!("  Buffer capacity: {}", config.buffer.capacity);
    println!("  Aggregation interval: {}s", config.scheduler.interval.as_secs());
    println!("  HTTP port: {}", config.server.port);
    println!();

    match PipelineStats::read_persisted(&config.stats_path()) {
        Ok(Some(stats)) => {
            println!("Cumulative Statistics:");
            println!("  Samples ingested: {}", stats.samples_ingested);
            println!("  Samples rejected: {}", stats.samples_rejected);
            println!(
                "  Aggregation ticks: {} completed, {} skipped",
                stats.ticks_completed, stats.ticks_skipped
            );
            println!("  Rollups written: {}", stats.rollups_written);
            println!(
                "  Health events: {} written, {} suppressed",
                stats.events_written, stats.events_suppressed
            );
            println!("  Subject failures: {}", stats.subject_failures);
            println!("  Last updated: {}", stats.last_updated);
        }
        Ok(None) => println!("No previous session data found."),
        Err(e) => eprintln!("Error reading stats: {e}"),
    }
}

fn cmd_config() {
    let config = load_config();

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!();
    println!(
        "{}",
        serde_json::to_string_pretty(&config).unwrap_or_else(|_| "Error".to_string())
    );
}
