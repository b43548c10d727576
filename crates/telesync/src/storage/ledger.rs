//! Day-keyed local ledger
//!
//! Every sample is merged here before anything goes over the network, so a
//! failed push never loses data: the next successful push carries the
//! accumulated value.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::db::models::{DayKey, Feature, LedgerEntry, LedgerValue, Location, Reading, Sample};
use crate::error::Result;

use super::{SharedDb, SyncDb};

/// Key under which the last raw step-counter reading is kept
const STEP_BASELINE_KEY: &str = "steps.baseline";

/// Local accumulator of samples, keyed by feature and day
#[derive(Clone)]
pub struct Ledger {
    db: SharedDb,
}

impl Ledger {
    pub fn new(db: SharedDb) -> Self {
        Self { db }
    }

    /// Merge a sample into the entry for `day`.
    ///
    /// Returns the entry as stored after the merge, or `None` when the day
    /// has no entry yet and the sample only moved the step baseline.
    pub fn merge(&self, day: DayKey, sample: &Sample) -> Result<Option<LedgerEntry>> {
        let db = self.db.lock().map_err(super::poisoned)?;

        db.in_transaction(|db| match sample.reading {
            Reading::StepDelta { delta } => add_delta(db, day, delta),
            Reading::StepCounter { raw } => {
                let baseline = read_baseline(db)?;
                db.set_kv(STEP_BASELINE_KEY, &raw.to_string())?;

                match baseline {
                    Some(baseline) if raw >= baseline => add_delta(db, day, raw - baseline),
                    Some(baseline) => {
                        debug!(raw, baseline, "step counter went backwards, re-baselining");
                        db.get_ledger_entry(Feature::Steps, day)
                    }
                    None => {
                        debug!(raw, "first step counter reading, establishing baseline");
                        db.get_ledger_entry(Feature::Steps, day)
                    }
                }
            }
            Reading::Location(location) => {
                replace_location(db, day, location, sample.captured_at).map(Some)
            }
        })
    }

    /// Entry for a feature and day
    pub fn get(&self, feature: Feature, day: DayKey) -> Result<Option<LedgerEntry>> {
        let db = self.db.lock().map_err(super::poisoned)?;
        db.get_ledger_entry(feature, day)
    }

    /// Most recent entries for a feature, newest first
    pub fn history(&self, feature: Feature, days: u32) -> Result<Vec<LedgerEntry>> {
        let db = self.db.lock().map_err(super::poisoned)?;
        db.list_ledger_entries(feature, days)
    }

    /// Delete entries for a feature (all of them, or only days before `before`).
    ///
    /// This is the only way ledger entries are removed.
    pub fn clear_history(&self, feature: Feature, before: Option<DayKey>) -> Result<u32> {
        let db = self.db.lock().map_err(super::poisoned)?;
        db.in_transaction(|db| {
            let removed = db.delete_ledger_entries(feature, before)?;
            if feature == Feature::Steps && before.is_none() {
                db.delete_kv(STEP_BASELINE_KEY)?;
            }
            Ok(removed)
        })
    }
}

fn read_baseline(db: &SyncDb) -> Result<Option<i64>> {
    Ok(db
        .get_kv(STEP_BASELINE_KEY)?
        .and_then(|v| v.parse::<i64>().ok()))
}

fn add_delta(db: &SyncDb, day: DayKey, delta: i64) -> Result<Option<LedgerEntry>> {
    let previous = db.get_ledger_entry(Feature::Steps, day)?;

    // A negative delta means the sensor restarted; the stored value stays as is
    if delta < 0 {
        debug!(delta, %day, "negative step delta treated as sensor reset");
        return Ok(previous);
    }

    let total = match previous.map(|e| e.value) {
        Some(LedgerValue::Counter { total }) => total,
        _ => 0,
    };

    let entry = LedgerEntry {
        feature: Feature::Steps,
        day_key: day,
        value: LedgerValue::Counter {
            total: total.saturating_add(delta),
        },
        updated_at: Utc::now(),
    };
    db.upsert_ledger_entry(&entry)?;
    Ok(Some(entry))
}

fn replace_location(
    db: &SyncDb,
    day: DayKey,
    location: Location,
    captured_at: DateTime<Utc>,
) -> Result<LedgerEntry> {
    let entry = LedgerEntry {
        feature: Feature::Location,
        day_key: day,
        value: LedgerValue::Latest {
            location,
            captured_at,
        },
        updated_at: Utc::now(),
    };
    db.upsert_ledger_entry(&entry)?;
    Ok(entry)
}
