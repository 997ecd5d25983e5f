//! Auto-update settings and run bookkeeping
//!
//! Nothing here triggers a cycle. Callers (a request hook, a cron job, the
//! CLI) ask [`UpdateSchedule::is_due`] and invoke the updater themselves.

use crate::config::{
    AUTO_UPDATING_ENABLED_KEY, AUTO_UPDATING_INTERVAL_KEY, AutoUpdateSettings, LAST_RUN_KEY,
    default_interval_secs,
};
use crate::error::Result;
use crate::traits::{ConfigStore, read_json};
use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use std::sync::Arc;

/// Auto-update settings and last-run timestamp stored in the config store
#[derive(Clone)]
pub struct UpdateSchedule {
    store: Arc<dyn ConfigStore>,
}

impl UpdateSchedule {
    /// Create a schedule view over `store`
    pub fn new(store: Arc<dyn ConfigStore>) -> Self {
        Self { store }
    }

    /// Current auto-update settings (defaults for missing keys)
    pub async fn settings(&self) -> Result<AutoUpdateSettings> {
        let enabled = read_json::<bool>(self.store.as_ref(), AUTO_UPDATING_ENABLED_KEY)
            .await?
            .unwrap_or(false);
        let interval_secs = read_json::<u64>(self.store.as_ref(), AUTO_UPDATING_INTERVAL_KEY)
            .await?
            .unwrap_or_else(default_interval_secs);

        Ok(AutoUpdateSettings {
            enabled,
            interval_secs,
        })
    }

    /// Enable or disable automatic updates
    pub async fn set_enabled(&self, enabled: bool) -> Result<()> {
        self.store
            .set(AUTO_UPDATING_ENABLED_KEY, json!(enabled))
            .await
    }

    /// Change the interval between automatic updates
    pub async fn set_interval(&self, interval_secs: u64) -> Result<()> {
        AutoUpdateSettings {
            enabled: false,
            interval_secs,
        }
        .validate()?;

        self.store
            .set(AUTO_UPDATING_INTERVAL_KEY, json!(interval_secs))
            .await
    }

    /// When the last cycle ran, `None` if never
    pub async fn last_run(&self) -> Result<Option<DateTime<Utc>>> {
        let timestamp = read_json::<i64>(self.store.as_ref(), LAST_RUN_KEY)
            .await?
            .unwrap_or(0);

        if timestamp == 0 {
            return Ok(None);
        }
        Ok(DateTime::from_timestamp(timestamp, 0))
    }

    /// Record that a cycle ran at `at`
    pub async fn record_run(&self, at: DateTime<Utc>) -> Result<()> {
        self.store.set(LAST_RUN_KEY, json!(at.timestamp())).await
    }

    /// Next automatic run, for display
    ///
    /// `None` when auto-updating is disabled; `now` when no cycle ever ran.
    pub async fn next_run(&self, now: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
        let settings = self.settings().await?;
        if !settings.enabled {
            return Ok(None);
        }

        Ok(Some(match self.last_run().await? {
            Some(last_run) => last_run
                .checked_add_signed(interval(&settings))
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
            None => now,
        }))
    }

    /// Whether an automatic cycle should run now
    pub async fn is_due(&self, now: DateTime<Utc>) -> Result<bool> {
        let settings = self.settings().await?;
        if !settings.enabled {
            return Ok(false);
        }

        Ok(match self.last_run().await? {
            Some(last_run) => now.signed_duration_since(last_run) >= interval(&settings),
            None => true,
        })
    }
}

fn interval(settings: &AutoUpdateSettings) -> Duration {
    // Duration::seconds panics beyond i64::MAX milliseconds
    let secs = settings.interval_secs.min(i64::MAX as u64 / 1_000) as i64;
    Duration::seconds(secs)
}
