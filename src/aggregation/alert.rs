use serde::{Deserialize, Serialize};

pub const WARNING_RATIO: f64 = 0.6;
pub const HIGH_RATIO: f64 = 0.75;
pub const CRITICAL_RATIO: f64 = 0.9;

/// Occupancy band of a single zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Normal,
    Warning,
    High,
    Critical,
}

impl AlertLevel {
    /// Band for `count / capacity`; lower bounds are inclusive.
    ///
    /// A zero capacity is treated as an occupancy ratio of 0.
    pub fn from_occupancy(count: usize, capacity: u32) -> Self {
        Self::from_ratio(occupancy_ratio(count, capacity))
    }

    pub fn from_ratio(ratio: f64) -> Self {
        if ratio >= CRITICAL_RATIO {
            AlertLevel::Critical
        } else if ratio >= HIGH_RATIO {
            AlertLevel::High
        } else if ratio >= WARNING_RATIO {
            AlertLevel::Warning
        } else {
            AlertLevel::Normal
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AlertLevel::Normal => "normal",
            AlertLevel::Warning => "warning",
            AlertLevel::High => "high",
            AlertLevel::Critical => "critical",
        }
    }
}

pub fn occupancy_ratio(count: usize, capacity: u32) -> f64 {
    if capacity == 0 {
        return 0.0;
    }
    count as f64 / capacity as f64
}

/// Venue-wide status derived from the worst zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RushStatus {
    Normal,
    Moderate,
    High,
    Critical,
}

impl RushStatus {
    pub fn from_levels(levels: impl IntoIterator<Item = AlertLevel>) -> Self {
        match levels.into_iter().max() {
            Some(AlertLevel::Critical) => RushStatus::Critical,
            Some(AlertLevel::High) => RushStatus::High,
            Some(AlertLevel::Warning) => RushStatus::Moderate,
            Some(AlertLevel::Normal) | None => RushStatus::Normal,
        }
    }
}
