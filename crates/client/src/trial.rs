//! Trial state machine
//!
//! Pure derivation from a snapshot and the wall clock. No I/O: the only
//! outside input is whether a warning was already shown today, which the
//! caller reads from [`crate::dismissal::WarningDeduplicator`].

use jobproof_shared::{EntitlementSnapshot, Feature};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

const MILLIS_PER_HOUR: i128 = 60 * 60 * 1000;
const MILLIS_PER_DAY: i128 = 24 * MILLIS_PER_HOUR;

/// Escalating trial warnings, least urgent first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WarningLevel {
    Info,
    Warning,
    Critical,
    Expired,
}

impl WarningLevel {
    fn for_remaining(is_expired: bool, days_left: i64) -> Option<Self> {
        if is_expired {
            Some(Self::Expired)
        } else if days_left <= 1 {
            Some(Self::Critical)
        } else if days_left <= 3 {
            Some(Self::Warning)
        } else if days_left <= 7 {
            Some(Self::Info)
        } else {
            None
        }
    }
}

impl std::fmt::Display for WarningLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Critical => write!(f, "critical"),
            Self::Expired => write!(f, "expired"),
        }
    }
}

/// Derived trial view. Recomputed on every refresh, never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrialState {
    pub is_expired: bool,
    pub days_left: i64,
    pub hours_left: i64,
    pub warning_level: Option<WarningLevel>,
    pub should_show_warning: bool,
    pub has_active_access: bool,
}

fn ceil_units(millis: i128, unit: i128) -> i64 {
    if millis <= 0 {
        return 0;
    }
    let units = (millis + unit - 1) / unit;
    i64::try_from(units).unwrap_or(i64::MAX)
}

impl TrialState {
    pub fn derive(snapshot: &EntitlementSnapshot, now: OffsetDateTime, has_shown_today: bool) -> Self {
        let remaining = snapshot
            .trial_end
            .map(|end| (end - now).whole_milliseconds())
            .unwrap_or(0);
        let days_left = ceil_units(remaining, MILLIS_PER_DAY);
        let hours_left = ceil_units(remaining, MILLIS_PER_HOUR);

        if snapshot.subscribed {
            return Self {
                is_expired: false,
                days_left,
                hours_left,
                warning_level: None,
                should_show_warning: false,
                has_active_access: true,
            };
        }

        // The server could not tell: grant nothing, but do not claim the
        // trial is over either.
        if snapshot.degraded {
            return Self {
                is_expired: false,
                days_left,
                hours_left,
                warning_level: None,
                should_show_warning: false,
                has_active_access: false,
            };
        }

        let is_expired = remaining <= 0;
        let warning_level = WarningLevel::for_remaining(is_expired, days_left);

        Self {
            is_expired,
            days_left,
            hours_left,
            warning_level,
            should_show_warning: warning_level.is_some() && !has_shown_today,
            has_active_access: snapshot.has_full_access(now),
        }
    }

    pub fn can_access(&self, feature: Feature) -> bool {
        jobproof_shared::can_access_feature(self.has_active_access, feature)
    }
}

/// Gate a feature straight from a snapshot
pub fn can_access_feature(snapshot: &EntitlementSnapshot, now: OffsetDateTime, feature: Feature) -> bool {
    jobproof_shared::can_access_feature(snapshot.has_full_access(now), feature)
}
