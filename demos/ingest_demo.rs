//! Demonstration of the Synheart vitals pipeline.
//!
//! This example shows how to:
//! 1. Build an in-memory pipeline on a manual clock
//! 2. Validate and ingest device payloads
//! 3. Read live vitals, including the holdover fallback
//! 4. Run aggregation ticks and inspect rollups and health events
//!
//! Run with: cargo run --example ingest_demo

use std::sync::Arc;

use chrono::{Duration, Utc};
use synheart_vitals_pipeline::{
    config::Config,
    store::{EventQuery, HistoryRange},
    Clock, IntervalType, LiveReading, ManualClock, Pipeline, SensorPayload, Vector3,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    println!("Synheart Vitals Pipeline - Ingest Demo");
    println!("======================================");
    println!();

    let clock = Arc::new(ManualClock::new(Utc::now()));
    let pipeline = Pipeline::in_memory_with_clock(Config::default(), clock.clone());

    // A payload that fails validation never reaches the pipeline.
    let bad = SensorPayload {
        heart_rate: Some(320.0),
        spo2: Some(97.0),
        temperature: Some(36.5),
        accel: Some(Vector3::new(0.0, 0.0, 1.0)),
        ..Default::default()
    };
    if let Err(e) = bad.validate() {
        println!("Rejected payload: {e}");
    }
    println!();

    // Two minutes of 1 Hz data; SpO₂ dips in the second minute.
    for second in 0..120 {
        let spo2 = if second < 60 { 97.5 } else { 89.5 };
        let payload = SensorPayload {
            heart_rate: Some(72.0 + (second % 5) as f64),
            spo2: Some(spo2),
            temperature: Some(36.7),
            accel: Some(Vector3::new(0.02, 0.05, 1.0)),
            ..Default::default()
        };
        pipeline.ingest().ingest("demo-subject", payload.validate()?).await?;
        clock.advance(Duration::seconds(1));

        if second % 60 == 59 {
            let outcome = pipeline.scheduler().tick().await;
            if let Some(report) = outcome.report() {
                println!(
                    "Tick at {}: {} rollup(s), {} event(s)",
                    clock.now().format("%H:%M:%S"),
                    report.rollups_written,
                    report.events_written
                );
            }
        }
    }
    println!();

    match pipeline.ingest().live("demo-subject").await? {
        LiveReading::Fresh(sample) => println!(
            "Live: HR {:.0} SpO2 {:.1} (fresh)",
            sample.heart_rate, sample.spo2
        ),
        LiveReading::Held(snapshot) => println!("Live (held): {snapshot:?}"),
        LiveReading::Unavailable => println!("Live: unavailable"),
    }

    clock.advance(Duration::seconds(45));
    println!(
        "Live after 45s of silence: {:?}",
        pipeline.ingest().live("demo-subject").await?
    );
    println!();

    let rollups = pipeline
        .history("demo-subject", HistoryRange::Hour, IntervalType::Minute)
        .await?;
    println!("Rollups ({}):", rollups.len());
    for rollup in rollups.iter().rev() {
        println!(
            "  {} HR avg {:.2} min {} max {} | SpO2 {:.2} | {:?}",
            rollup.interval_start.format("%H:%M"),
            rollup.avg_heart_rate,
            rollup.min_heart_rate,
            rollup.max_heart_rate,
            rollup.avg_spo2,
            rollup.activity_level
        );
    }

    let events = pipeline.events(EventQuery::new("demo-subject")).await?;
    println!();
    println!("Health events ({}):", events.len());
    for event in &events {
        println!(
            "  {} {:?} value {:.1}",
            event.event_type, event.severity, event.value
        );
    }

    println!();
    println!("{}", pipeline.stats().summary());
    Ok(())
}
