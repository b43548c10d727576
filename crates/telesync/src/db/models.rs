//! Models shared by the ledger, the sync state table and the remote store

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Local, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};

/// A periodic background feature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Feature {
    Steps,
    Location,
}

impl Feature {
    pub const ALL: [Feature; 2] = [Feature::Steps, Feature::Location];

    pub fn as_str(self) -> &'static str {
        match self {
            Feature::Steps => "steps",
            Feature::Location => "location",
        }
    }

    /// Name of the per-user data node in the remote store
    pub fn data_node(self) -> &'static str {
        match self {
            Feature::Steps => "steps_data",
            Feature::Location => "location_data",
        }
    }

    /// Name of the settings collection in the remote store
    pub fn settings_node(self) -> String {
        format!("{}_settings", self.as_str())
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Feature {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "steps" | "step" => Ok(Feature::Steps),
            "location" | "loc" => Ok(Feature::Location),
            other => Err(SyncError::invalid_param(format!(
                "Unknown feature '{}'. Expected 'steps' or 'location'",
                other
            ))),
        }
    }
}

/// Calendar day in the device's local time zone, rendered as `YYYY-MM-DD`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DayKey(NaiveDate);

impl DayKey {
    pub fn today() -> Self {
        Self(Local::now().date_naive())
    }

    /// Day a UTC instant falls on in local time
    pub fn for_instant(at: DateTime<Utc>) -> Self {
        Self(at.with_timezone(&Local).date_naive())
    }

    pub fn parse(s: &str) -> Result<Self> {
        NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
            .map(Self)
            .map_err(|_| SyncError::InvalidDateFormat(s.to_string()))
    }
}

impl fmt::Display for DayKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d"))
    }
}

impl TryFrom<String> for DayKey {
    type Error = SyncError;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<DayKey> for String {
    fn from(day: DayKey) -> Self {
        day.to_string()
    }
}

/// A location fix
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: f64,
}

impl Location {
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
            && self.accuracy.is_finite()
            && self.accuracy >= 0.0
    }
}

/// One raw value delivered by a provider
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Reading {
    /// Cumulative hardware step counter (steps since the sensor last reset)
    StepCounter { raw: i64 },
    /// Steps taken since the previous reading
    StepDelta { delta: i64 },
    Location(Location),
}

impl Reading {
    pub fn feature(&self) -> Feature {
        match self {
            Reading::StepCounter { .. } | Reading::StepDelta { .. } => Feature::Steps,
            Reading::Location(_) => Feature::Location,
        }
    }

    /// Whether the value is usable at all. Invalid readings are skipped by the sampler.
    pub fn is_valid(&self) -> bool {
        match self {
            Reading::StepCounter { raw } => *raw >= 0,
            // Negative deltas are valid: the ledger treats them as a sensor reset
            Reading::StepDelta { .. } => true,
            Reading::Location(loc) => loc.is_valid(),
        }
    }
}

/// A captured reading. Immutable once taken.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub reading: Reading,
    pub captured_at: DateTime<Utc>,
}

impl Sample {
    pub fn new(reading: Reading, captured_at: DateTime<Utc>) -> Self {
        Self {
            reading,
            captured_at,
        }
    }

    pub fn now(reading: Reading) -> Self {
        Self::new(reading, Utc::now())
    }

    pub fn day_key(&self) -> DayKey {
        DayKey::for_instant(self.captured_at)
    }
}

/// Accumulated value stored under a day key
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LedgerValue {
    Counter { total: i64 },
    /// Most recent fix of the day and when it was taken
    Latest {
        location: Location,
        captured_at: DateTime<Utc>,
    },
}

/// Ledger row for one feature and day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub feature: Feature,
    pub day_key: DayKey,
    pub value: LedgerValue,
    pub updated_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// Body written to the remote store
    pub fn remote_value(&self) -> serde_json::Value {
        match self.value {
            LedgerValue::Counter { total } => serde_json::json!(total),
            LedgerValue::Latest {
                location,
                captured_at,
            } => serde_json::json!({
                "latitude": location.latitude,
                "longitude": location.longitude,
                "accuracy": location.accuracy,
                "timestamp": captured_at.timestamp_millis(),
            }),
        }
    }
}

/// Lifecycle state of a feature's sync cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CycleState {
    Idle,
    Starting,
    Running,
    Retrying,
}

impl fmt::Display for CycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CycleState::Idle => write!(f, "idle"),
            CycleState::Starting => write!(f, "starting"),
            CycleState::Running => write!(f, "running"),
            CycleState::Retrying => write!(f, "retrying"),
        }
    }
}

impl FromStr for CycleState {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "idle" => Ok(CycleState::Idle),
            "starting" => Ok(CycleState::Starting),
            "running" => Ok(CycleState::Running),
            "retrying" => Ok(CycleState::Retrying),
            other => Err(SyncError::database(format!("Unknown cycle state '{}'", other))),
        }
    }
}

/// Enabled flag and interval, as mirrored to `{feature}_settings/{uid}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSettings {
    pub enabled: bool,
    /// Interval in minutes
    pub interval: u64,
}

/// Persisted per-feature sync state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureState {
    pub feature: Feature,
    pub enabled: bool,
    pub interval_secs: u64,
    pub pending: bool,
    pub cycle_state: CycleState,
    pub auth_required: bool,
    pub last_error: Option<String>,
    pub last_synced_at: Option<DateTime<Utc>>,
}

impl FeatureState {
    pub fn new(feature: Feature, interval: Duration) -> Self {
        Self {
            feature,
            enabled: false,
            interval_secs: interval.as_secs(),
            pending: false,
            cycle_state: CycleState::Idle,
            auth_required: false,
            last_error: None,
            last_synced_at: None,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn settings(&self) -> FeatureSettings {
        FeatureSettings {
            enabled: self.enabled,
            interval: self.interval_secs / 60,
        }
    }
}
