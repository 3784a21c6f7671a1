//! Maturity bands and aggregation configuration

use serde::{Deserialize, Serialize};

/// Canonical maturity band
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MaturityBand {
    /// ~3-month tenor
    Short,
    /// ~6-month tenor
    Medium,
    /// ~12-month tenor
    Long,
}

impl MaturityBand {
    pub const ALL: [MaturityBand; 3] = [MaturityBand::Short, MaturityBand::Medium, MaturityBand::Long];

    /// Band index, 0..=2
    pub fn index(&self) -> usize {
        match self {
            MaturityBand::Short => 0,
            MaturityBand::Medium => 1,
            MaturityBand::Long => 2,
        }
    }

    /// Label for display
    pub fn label(&self) -> &'static str {
        match self {
            MaturityBand::Short => "3M",
            MaturityBand::Medium => "6M",
            MaturityBand::Long => "12M",
        }
    }
}

/// Option side of an aggregated series
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Put,
    Call,
    Combined,
}

impl Side {
    pub const ALL: [Side; 3] = [Side::Put, Side::Call, Side::Combined];

    pub fn index(&self) -> usize {
        match self {
            Side::Put => 0,
            Side::Call => 1,
            Side::Combined => 2,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Side::Put => "put",
            Side::Call => "call",
            Side::Combined => "combined",
        }
    }
}

/// Tenor window of one band, inclusive on both ends
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BandRange {
    /// Target tenor in years
    pub target: f64,
    /// Lower tenor bound, inclusive
    pub lower: f64,
    /// Upper tenor bound, inclusive
    pub upper: f64,
}

impl BandRange {
    pub fn contains(&self, tau_years: f64) -> bool {
        tau_years >= self.lower && tau_years <= self.upper
    }
}

/// Aggregator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatorConfig {
    /// Tenor windows, one per band
    /// Default: 0.25 in [0.15, 0.35], 0.5 in [0.35, 0.65], 1.0 in [0.75, 1.25]
    pub bands: [BandRange; 3],

    /// Trailing rolling-window length in trading dates
    /// Default: 63
    pub window: usize,

    /// Confidence level of the rolling bounds
    /// Default: 0.95
    pub confidence: f64,

    /// A per-date band standard error above this carries the previous
    /// date's value forward instead
    /// Default: 1000.0
    pub se_cap: f64,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            bands: [
                BandRange {
                    target: 0.25,
                    lower: 0.15,
                    upper: 0.35,
                },
                BandRange {
                    target: 0.5,
                    lower: 0.35,
                    upper: 0.65,
                },
                BandRange {
                    target: 1.0,
                    lower: 0.75,
                    upper: 1.25,
                },
            ],
            window: 63,
            confidence: 0.95,
            se_cap: 1000.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_band_membership_inclusive() {
        let cfg = AggregatorConfig::default();
        let short = &cfg.bands[MaturityBand::Short.index()];
        assert!(short.contains(0.15));
        assert!(short.contains(0.35));
        assert!(short.contains(0.25));
        assert!(!short.contains(0.36));
        assert!(!short.contains(0.149));
    }

    #[test]
    fn test_indices_cover_all() {
        for (i, b) in MaturityBand::ALL.iter().enumerate() {
            assert_eq!(b.index(), i);
        }
        for (i, s) in Side::ALL.iter().enumerate() {
            assert_eq!(s.index(), i);
        }
    }
}
