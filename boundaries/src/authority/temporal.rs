//! Validity windows for boundary sources.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Documented extension of a closed validity window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GracePeriod {
    /// Why the source stays usable, e.g. "post-redistricting transition"
    pub reason: String,
    pub until: DateTime<Utc>,
}

/// Half-open interval `[effective, expires)` during which a source is
/// authoritative. An absent `expires` means open-ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidityWindow {
    pub effective: DateTime<Utc>,
    #[serde(default)]
    pub expires: Option<DateTime<Utc>>,
    #[serde(default)]
    pub grace: Option<GracePeriod>,
}

/// Where an instant falls relative to a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TemporalStatus {
    NotYetEffective,
    InWindow,
    /// Expired, but inside the documented grace period
    Grace,
    Expired,
}

impl ValidityWindow {
    pub fn open_ended(effective: DateTime<Utc>) -> Self {
        Self {
            effective,
            expires: None,
            grace: None,
        }
    }

    pub fn bounded(effective: DateTime<Utc>, expires: DateTime<Utc>) -> Self {
        Self {
            effective,
            expires: Some(expires),
            grace: None,
        }
    }

    /// Extend an expiring window by the post-redistricting grace period.
    ///
    /// No-op for open-ended windows.
    pub fn with_redistricting_grace(mut self, days: i64) -> Self {
        if let Some(expires) = self.expires {
            self.grace = Some(GracePeriod {
                reason: "post-redistricting transition".to_string(),
                until: expires + Duration::days(days),
            });
        }
        self
    }

    pub fn status_at(&self, at: DateTime<Utc>) -> TemporalStatus {
        if at < self.effective {
            return TemporalStatus::NotYetEffective;
        }
        match self.expires {
            None => TemporalStatus::InWindow,
            Some(expires) if at < expires => TemporalStatus::InWindow,
            Some(_) => match &self.grace {
                Some(grace) if at < grace.until => TemporalStatus::Grace,
                _ => TemporalStatus::Expired,
            },
        }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.status_at(at) == TemporalStatus::InWindow
    }
}
