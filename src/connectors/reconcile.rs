//! Fetch-window and upsert bookkeeping shared by every connector.
//!
//! A connector reads its window from settings, fetches external records,
//! upserts each one by natural key and feeds every [`UpsertOutcome`] into a
//! [`SyncTally`]. The tally becomes the [`SyncOutcome`] of the run.

use chrono::{Days, NaiveDate};
use serde_json::Value as JsonValue;
use tracing::warn;

use crate::audit::ChangeSet;
use crate::connectors::trait_::{Settings, SyncOutcome};

/// Setting key connectors use for the start of their fetch window.
pub const SINCE_DATE_SETTING: &str = "since_date";

/// What an upsert did with one external record.
#[derive(Debug, Clone, PartialEq)]
pub enum UpsertOutcome {
    /// No local record had the natural key.
    Created,
    /// A local record existed and these fields changed.
    Updated(ChangeSet),
    /// A local record existed with identical values.
    Unchanged,
}

/// Running counts for one sync. `processed` always advances.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncTally {
    pub processed: u32,
    pub created: u32,
    pub updated: u32,
}

impl SyncTally {
    pub fn record(&mut self, outcome: &UpsertOutcome) {
        self.processed += 1;
        match outcome {
            UpsertOutcome::Created => self.created += 1,
            UpsertOutcome::Updated(_) => self.updated += 1,
            UpsertOutcome::Unchanged => {}
        }
    }

    pub fn into_outcome(self, data: Option<JsonValue>) -> SyncOutcome {
        SyncOutcome {
            success: true,
            records_processed: self.processed,
            records_created: self.created,
            records_updated: self.updated,
            data,
        }
    }
}

/// Start of the fetch window.
///
/// Reads `since_date` (YYYY-MM-DD) from settings. A missing, malformed or
/// future value falls back to `today - lookback_days` instead of failing the sync.
pub fn fetch_window_start(settings: &Settings, today: NaiveDate, lookback_days: u32) -> NaiveDate {
    let fallback = today
        .checked_sub_days(Days::new(u64::from(lookback_days)))
        .unwrap_or(today);

    match settings.get(SINCE_DATE_SETTING).map(|v| v.trim()) {
        None | Some("") => fallback,
        Some(raw) => match NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
            Ok(date) if date <= today => date,
            Ok(date) => {
                warn!(since_date = %date, "since_date lies in the future, using default lookback");
                fallback
            }
            Err(err) => {
                warn!(since_date = raw, error = %err, "Unparsable since_date, using default lookback");
                fallback
            }
        },
    }
}
