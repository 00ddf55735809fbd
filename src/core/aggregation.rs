//! Rollups and health-event detection from buffered samples.
//!
//! [`aggregate`] summarises a newest-first slice of samples into one
//! [`RollupRecord`]; [`detect_events`] checks the newest sample against fixed
//! clinical thresholds.

use crate::ingest::types::RawSample;
use chrono::{DateTime, DurationRound, Timelike, Utc};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use uuid::Uuid;

/// Mean accelerometer magnitude (g) below which a subject is resting.
pub const RESTING_MAX_MAGNITUDE: f64 = 1.2;

/// Mean accelerometer magnitude (g) below which a subject is walking.
pub const WALKING_MAX_MAGNITUDE: f64 = 2.5;

pub const SPO2_CRITICAL_BELOW: f64 = 90.0;
pub const SPO2_WARNING_BELOW: f64 = 92.0;
pub const HR_HIGH_CRITICAL_ABOVE: f64 = 140.0;
pub const HR_HIGH_WARNING_ABOVE: f64 = 120.0;
pub const HR_LOW_CRITICAL_BELOW: f64 = 40.0;
pub const HR_LOW_WARNING_BELOW: f64 = 50.0;
pub const FEVER_CRITICAL_ABOVE: f64 = 39.0;
pub const FEVER_WARNING_ABOVE: f64 = 37.5;
pub const HYPOTHERMIA_CRITICAL_BELOW: f64 = 35.0;
pub const FALL_ACCEL_ABOVE: f64 = 3.5;

/// Rollup granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IntervalType {
    #[serde(rename = "1min")]
    Minute,
    #[serde(rename = "5min")]
    FiveMinutes,
    #[serde(rename = "hour")]
    Hour,
}

impl IntervalType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntervalType::Minute => "1min",
            IntervalType::FiveMinutes => "5min",
            IntervalType::Hour => "hour",
        }
    }

    /// Parse the wire name (`1min`, `5min`, `hour`).
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "1min" => Some(IntervalType::Minute),
            "5min" => Some(IntervalType::FiveMinutes),
            "hour" => Some(IntervalType::Hour),
            _ => None,
        }
    }

    /// Floor `timestamp` to the start of its interval.
    pub fn align(&self, timestamp: DateTime<Utc>) -> DateTime<Utc> {
        let minute = timestamp
            .duration_trunc(chrono::Duration::minutes(1))
            .unwrap_or(timestamp);
        match self {
            IntervalType::Minute => minute,
            IntervalType::FiveMinutes => {
                let back = (minute.minute() % 5) as i64;
                minute - chrono::Duration::minutes(back)
            }
            IntervalType::Hour => timestamp
                .duration_trunc(chrono::Duration::hours(1))
                .unwrap_or(minute),
        }
    }
}

impl std::fmt::Display for IntervalType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse motion classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityLevel {
    Resting,
    Walking,
    Active,
}

impl ActivityLevel {
    pub fn from_magnitude(magnitude: f64) -> Self {
        if magnitude < RESTING_MAX_MAGNITUDE {
            ActivityLevel::Resting
        } else if magnitude < WALKING_MAX_MAGNITUDE {
            ActivityLevel::Walking
        } else {
            ActivityLevel::Active
        }
    }
}

/// One aggregated interval for one subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollupRecord {
    pub subject_id: String,
    pub interval_type: IntervalType,
    pub interval_start: DateTime<Utc>,
    pub avg_heart_rate: f64,
    pub min_heart_rate: f64,
    pub max_heart_rate: f64,
    pub avg_spo2: f64,
    pub avg_temperature_c: f64,
    pub activity_level: ActivityLevel,
    pub avg_accel_magnitude: f64,
    pub sample_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "LOW_SPO2")]
    LowSpo2,
    #[serde(rename = "HIGH_HR")]
    HighHeartRate,
    #[serde(rename = "LOW_HR")]
    LowHeartRate,
    #[serde(rename = "FEVER")]
    Fever,
    #[serde(rename = "HYPOTHERMIA")]
    Hypothermia,
    #[serde(rename = "FALL_SUSPECTED")]
    FallSuspected,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::LowSpo2 => "LOW_SPO2",
            EventType::HighHeartRate => "HIGH_HR",
            EventType::LowHeartRate => "LOW_HR",
            EventType::Fever => "FEVER",
            EventType::Hypothermia => "HYPOTHERMIA",
            EventType::FallSuspected => "FALL_SUSPECTED",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// The threshold a health event crossed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMetadata {
    pub threshold: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accel_magnitude: Option<f64>,
}

/// A detected anomaly.
///
/// Only `acknowledged`/`acknowledged_at` ever change after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthEvent {
    pub id: Uuid,
    pub subject_id: String,
    pub event_type: EventType,
    pub value: f64,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<EventMetadata>,
    pub acknowledged: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acknowledged_at: Option<DateTime<Utc>>,
}

impl HealthEvent {
    fn candidate(
        sample: &RawSample,
        event_type: EventType,
        value: f64,
        severity: Severity,
        threshold: f64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            subject_id: sample.subject_id.clone(),
            event_type,
            value,
            severity,
            timestamp: sample.server_timestamp,
            metadata: Some(EventMetadata {
                threshold,
                accel_magnitude: None,
            }),
            acknowledged: false,
            acknowledged_at: None,
        }
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Summarise a newest-first slice of samples.
///
/// Returns `None` for an empty slice. The interval start is taken from the
/// newest sample.
pub fn aggregate(samples: &[RawSample], interval_type: IntervalType) -> Option<RollupRecord> {
    let newest = samples.first()?;

    let heart_rates: Vec<f64> = samples.iter().map(|s| s.heart_rate).collect();
    let spo2: Vec<f64> = samples.iter().map(|s| s.spo2).collect();
    let temperatures: Vec<f64> = samples.iter().map(|s| s.temperature_c).collect();
    let magnitudes: Vec<f64> = samples.iter().map(RawSample::accel_magnitude).collect();

    let avg_accel_magnitude = magnitudes.iter().mean();

    // floor/ceil keep min <= avg <= max after rounding.
    Some(RollupRecord {
        subject_id: newest.subject_id.clone(),
        interval_type,
        interval_start: interval_type.align(newest.server_timestamp),
        avg_heart_rate: round2(heart_rates.iter().mean()),
        min_heart_rate: Statistics::min(heart_rates.iter()).floor(),
        max_heart_rate: Statistics::max(heart_rates.iter()).ceil(),
        avg_spo2: round2(spo2.iter().mean()),
        avg_temperature_c: round2(temperatures.iter().mean()),
        activity_level: ActivityLevel::from_magnitude(avg_accel_magnitude),
        avg_accel_magnitude: round2(avg_accel_magnitude),
        sample_count: samples.len(),
    })
}

/// Check the newest sample against clinical thresholds.
///
/// Each metric yields at most one event; the critical tier is checked first.
pub fn detect_events(samples: &[RawSample]) -> Vec<HealthEvent> {
    let Some(latest) = samples.first() else {
        return Vec::new();
    };
    let mut events = Vec::new();

    // SpO₂
    if latest.spo2 < SPO2_CRITICAL_BELOW {
        events.push(HealthEvent::candidate(
            latest,
            EventType::LowSpo2,
            latest.spo2,
            Severity::Critical,
            SPO2_CRITICAL_BELOW,
        ));
    } else if latest.spo2 < SPO2_WARNING_BELOW {
        events.push(HealthEvent::candidate(
            latest,
            EventType::LowSpo2,
            latest.spo2,
            Severity::Warning,
            SPO2_WARNING_BELOW,
        ));
    }

    // Heart rate, high and low
    if latest.heart_rate > HR_HIGH_CRITICAL_ABOVE {
        events.push(HealthEvent::candidate(
            latest,
            EventType::HighHeartRate,
            latest.heart_rate,
            Severity::Critical,
            HR_HIGH_CRITICAL_ABOVE,
        ));
    } else if latest.heart_rate > HR_HIGH_WARNING_ABOVE {
        events.push(HealthEvent::candidate(
            latest,
            EventType::HighHeartRate,
            latest.heart_rate,
            Severity::Warning,
            HR_HIGH_WARNING_ABOVE,
        ));
    }

    if latest.heart_rate < HR_LOW_CRITICAL_BELOW {
        events.push(HealthEvent::candidate(
            latest,
            EventType::LowHeartRate,
            latest.heart_rate,
            Severity::Critical,
            HR_LOW_CRITICAL_BELOW,
        ));
    } else if latest.heart_rate < HR_LOW_WARNING_BELOW {
        events.push(HealthEvent::candidate(
            latest,
            EventType::LowHeartRate,
            latest.heart_rate,
            Severity::Warning,
            HR_LOW_WARNING_BELOW,
        ));
    }

    // Temperature
    if latest.temperature_c > FEVER_CRITICAL_ABOVE {
        events.push(HealthEvent::candidate(
            latest,
            EventType::Fever,
            latest.temperature_c,
            Severity::Critical,
            FEVER_CRITICAL_ABOVE,
        ));
    } else if latest.temperature_c > FEVER_WARNING_ABOVE {
        events.push(HealthEvent::candidate(
            latest,
            EventType::Fever,
            latest.temperature_c,
            Severity::Warning,
            FEVER_WARNING_ABOVE,
        ));
    }

    if latest.temperature_c < HYPOTHERMIA_CRITICAL_BELOW {
        events.push(HealthEvent::candidate(
            latest,
            EventType::Hypothermia,
            latest.temperature_c,
            Severity::Critical,
            HYPOTHERMIA_CRITICAL_BELOW,
        ));
    }

    // Fall: sudden acceleration spike
    let magnitude = latest.accel_magnitude();
    if magnitude > FALL_ACCEL_ABOVE {
        let mut event = HealthEvent::candidate(
            latest,
            EventType::FallSuspected,
            magnitude,
            Severity::Critical,
            FALL_ACCEL_ABOVE,
        );
        event.metadata = Some(EventMetadata {
            threshold: FALL_ACCEL_ABOVE,
            accel_magnitude: Some(magnitude),
        });
        events.push(event);
    }

    events
}
