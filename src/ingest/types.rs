//! Telemetry types for the vitals pipeline.
//!
//! A [`SensorPayload`] is what a device sends; only a validated
//! [`VitalReading`] can be turned into a buffered [`RawSample`].

use crate::error::ValidationError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Accepted heart rate range (bpm).
pub const HEART_RATE_RANGE: (f64, f64) = (0.0, 300.0);

/// Accepted SpO₂ range (%).
pub const SPO2_RANGE: (f64, f64) = (0.0, 100.0);

/// Accepted body temperature range (°C).
pub const TEMPERATURE_RANGE: (f64, f64) = (20.0, 50.0);

/// A three-axis IMU reading.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vector3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Euclidean norm, `sqrt(x² + y² + z²)`.
    pub fn magnitude(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }
}

/// One buffered device reading.
///
/// Immutable once written. `server_timestamp` is authoritative;
/// `device_timestamp` is whatever the wearable claimed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSample {
    pub subject_id: String,
    pub heart_rate: f64,
    pub spo2: f64,
    pub temperature_c: f64,
    pub accel: Vector3,
    pub gyro: Vector3,
    pub device_timestamp: DateTime<Utc>,
    pub server_timestamp: DateTime<Utc>,
}

impl RawSample {
    pub fn accel_magnitude(&self) -> f64 {
        self.accel.magnitude()
    }
}

/// Telemetry as pushed by the wearable.
///
/// Field names follow the device firmware's camelCase JSON.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorPayload {
    pub heart_rate: Option<f64>,
    pub spo2: Option<f64>,
    pub temperature: Option<f64>,
    pub accel: Option<Vector3>,
    pub gyro: Option<Vector3>,
    pub timestamp: Option<DateTime<Utc>>,
}

/// A payload that passed presence and range checks.
///
/// Fields are private so the only way to obtain one is
/// [`SensorPayload::validate`].
#[derive(Debug, Clone, PartialEq)]
pub struct VitalReading {
    heart_rate: f64,
    spo2: f64,
    temperature_c: f64,
    accel: Vector3,
    gyro: Vector3,
    device_timestamp: Option<DateTime<Utc>>,
}

impl VitalReading {
    pub fn heart_rate(&self) -> f64 {
        self.heart_rate
    }

    pub fn spo2(&self) -> f64 {
        self.spo2
    }

    pub fn temperature_c(&self) -> f64 {
        self.temperature_c
    }

    pub fn accel(&self) -> Vector3 {
        self.accel
    }

    pub fn gyro(&self) -> Vector3 {
        self.gyro
    }

    pub fn device_timestamp(&self) -> Option<DateTime<Utc>> {
        self.device_timestamp
    }

    /// Stamp the reading for `subject_id` at server time `now`.
    pub fn into_sample(self, subject_id: &str, now: DateTime<Utc>) -> RawSample {
        RawSample {
            subject_id: subject_id.to_string(),
            heart_rate: self.heart_rate,
            spo2: self.spo2,
            temperature_c: self.temperature_c,
            accel: self.accel,
            gyro: self.gyro,
            device_timestamp: self.device_timestamp.unwrap_or(now),
            server_timestamp: now,
        }
    }
}

impl SensorPayload {
    /// Check field presence and physiological ranges.
    ///
    /// A missing gyroscope defaults to zeros; a missing device timestamp is
    /// filled with server time at ingestion.
    pub fn validate(self) -> Result<VitalReading, ValidationError> {
        let heart_rate = self
            .heart_rate
            .ok_or(ValidationError::MissingField("heartRate"))?;
        let spo2 = self.spo2.ok_or(ValidationError::MissingField("spo2"))?;
        let temperature_c = self
            .temperature
            .ok_or(ValidationError::MissingField("temperature"))?;
        let accel = self.accel.ok_or(ValidationError::MissingField("accel"))?;

        check_range("heartRate", heart_rate, HEART_RATE_RANGE)?;
        check_range("spo2", spo2, SPO2_RANGE)?;
        check_range("temperature", temperature_c, TEMPERATURE_RANGE)?;

        Ok(VitalReading {
            heart_rate,
            spo2,
            temperature_c,
            accel,
            gyro: self.gyro.unwrap_or_default(),
            device_timestamp: self.timestamp,
        })
    }
}

fn check_range(
    field: &'static str,
    value: f64,
    (min, max): (f64, f64),
) -> Result<(), ValidationError> {
    // NaN is never contained.
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(ValidationError::OutOfRange {
            field,
            value,
            min,
            max,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload() -> SensorPayload {
        SensorPayload {
            heart_rate: Some(72.0),
            spo2: Some(98.0),
            temperature: Some(36.6),
            accel: Some(Vector3::new(0.0, 0.0, 1.0)),
            gyro: None,
            timestamp: None,
        }
    }

    #[test]
    fn test_accel_magnitude() {
        assert!((Vector3::new(3.0, 4.0, 0.0).magnitude() - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_valid_payload_defaults_gyro() {
        let reading = payload().validate().unwrap();
        assert_eq!(reading.gyro(), Vector3::default());
        assert_eq!(reading.heart_rate(), 72.0);
    }

    #[test]
    fn test_missing_field() {
        let mut p = payload();
        p.accel = None;
        assert_eq!(p.validate(), Err(ValidationError::MissingField("accel")));
    }

    #[test]
    fn test_out_of_range_fields() {
        let mut p = payload();
        p.heart_rate = Some(301.0);
        assert!(matches!(
            p.validate(),
            Err(ValidationError::OutOfRange { field: "heartRate", .. })
        ));

        let mut p = payload();
        p.temperature = Some(19.9);
        assert!(matches!(
            p.validate(),
            Err(ValidationError::OutOfRange { field: "temperature", .. })
        ));

        let mut p = payload();
        p.spo2 = Some(f64::NAN);
        assert!(p.validate().is_err());
    }

    #[test]
    fn test_payload_parses_device_json() {
        let json = r#"{"heartRate":80,"spo2":97.5,"temperature":36.9,
                       "accel":{"x":0.1,"y":0.2,"z":0.98}}"#;
        let p: SensorPayload = serde_json::from_str(json).unwrap();
        assert_eq!(p.heart_rate, Some(80.0));
        assert!(p.validate().is_ok());
    }

    #[test]
    fn test_into_sample_uses_server_time_when_device_time_missing() {
        let now = Utc::now();
        let sample = payload().validate().unwrap().into_sample("subject-1", now);
        assert_eq!(sample.device_timestamp, now);
        assert_eq!(sample.server_timestamp, now);
        assert_eq!(sample.subject_id, "subject-1");
    }
}
