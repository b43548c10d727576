//! Local ledger inspection

use std::path::PathBuf;

use crate::cli::AppContext;
use crate::db::models::{DayKey, Feature, LedgerEntry, LedgerValue};
use crate::error::Result;

/// Human-readable ledger value
pub fn format_value(entry: &LedgerEntry) -> String {
    match entry.value {
        LedgerValue::Counter { total } => format!("{} steps", total),
        LedgerValue::Latest { location, .. } => format!(
            "{:.5}, {:.5} (±{:.0} m)",
            location.latitude, location.longitude, location.accuracy
        ),
    }
}

/// Show recent entries, newest first
pub async fn show(
    feature: Feature,
    days: u32,
    profile: Option<String>,
    config: Option<PathBuf>,
) -> Result<()> {
    let ctx = AppContext::load(profile, config)?;
    let entries = ctx.storage.ledger().history(feature, days)?;

    if entries.is_empty() {
        println!("No {} entries recorded.", feature);
        return Ok(());
    }

    println!("{:<12} {:<36} {}", "Day", "Value", "Updated");
    println!("{}", "-".repeat(72));
    for entry in &entries {
        println!(
            "{:<12} {:<36} {}",
            entry.day_key.to_string(),
            format_value(entry),
            entry.updated_at.format("%H:%M:%S UTC")
        );
    }

    Ok(())
}

/// Delete entries, all of them or only days before `before`
pub async fn clear(
    feature: Feature,
    before: Option<String>,
    profile: Option<String>,
    config: Option<PathBuf>,
) -> Result<()> {
    let before = before.as_deref().map(DayKey::parse).transpose()?;
    let ctx = AppContext::load(profile, config)?;

    let removed = ctx.storage.ledger().clear_history(feature, before)?;
    match before {
        Some(day) => println!("Removed {} {} entries before {}", removed, feature, day),
        None => println!("Removed {} {} entries", removed, feature),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::Location;
    use chrono::Utc;

    #[test]
    fn test_format_value() {
        let day = DayKey::parse("2024-06-01").unwrap();
        let steps = LedgerEntry {
            feature: Feature::Steps,
            day_key: day,
            value: LedgerValue::Counter { total: 8412 },
            updated_at: Utc::now(),
        };
        assert_eq!(format_value(&steps), "8412 steps");

        let fix = LedgerEntry {
            feature: Feature::Location,
            day_key: day,
            value: LedgerValue::Latest {
                location: Location {
                    latitude: 41.38879,
                    longitude: 2.15899,
                    accuracy: 9.6,
                },
                captured_at: Utc::now(),
            },
            updated_at: Utc::now(),
        };
        assert_eq!(format_value(&fix), "41.38879, 2.15899 (±10 m)");
    }
}
