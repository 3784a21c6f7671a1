//! Tau buckets
//!
//! A tau bucket collects the quotes of one trading date that share one
//! time-to-expiry value present on *both* the put and the call side.
//! Buckets are the unit of work for calibration: each one yields an
//! independent CDF estimate.

use serde::{Deserialize, Serialize};

use super::error::{BubbleError, BubbleResult};
use super::quote::{OptionQuote, OptionType};

/// One side (put or call) of a tau bucket, sorted by strike
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SideQuotes {
    /// Strikes, ascending
    pub strikes: Vec<f64>,
    /// Mid prices matching `strikes`
    pub prices: Vec<f64>,
    /// Volumes matching `strikes`
    pub volumes: Vec<f64>,
}

impl SideQuotes {
    /// Number of observations
    pub fn len(&self) -> usize {
        self.strikes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strikes.is_empty()
    }

    /// Mean strike spacing, 0 for fewer than two strikes
    pub fn mean_spacing(&self) -> f64 {
        if self.strikes.len() < 2 {
            return 0.0;
        }
        let span = self.strikes[self.strikes.len() - 1] - self.strikes[0];
        span / (self.strikes.len() - 1) as f64
    }

    /// Check the preconditions for shape-constrained regression:
    /// at least 3 strikes, strictly increasing.
    pub fn validate(&self) -> BubbleResult<()> {
        if self.strikes.len() < 3 {
            return Err(BubbleError::invalid_input(format!(
                "{} strikes, need at least 3",
                self.strikes.len()
            )));
        }
        for w in self.strikes.windows(2) {
            if w[1] <= w[0] {
                return Err(BubbleError::invalid_input(format!(
                    "strikes not strictly increasing at {}",
                    w[0]
                )));
            }
        }
        Ok(())
    }

    fn push(&mut self, q: &OptionQuote) {
        self.strikes.push(q.strike);
        self.prices.push(q.mid);
        self.volumes.push(q.volume);
    }

    fn sort_by_strike(&mut self) {
        let mut idx: Vec<usize> = (0..self.strikes.len()).collect();
        idx.sort_by(|&a, &b| self.strikes[a].partial_cmp(&self.strikes[b]).unwrap());
        self.strikes = idx.iter().map(|&i| self.strikes[i]).collect();
        self.prices = idx.iter().map(|&i| self.prices[i]).collect();
        self.volumes = idx.iter().map(|&i| self.volumes[i]).collect();
    }
}

/// Quotes of one date sharing one tau, present on both sides
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TauBucket {
    /// Days to expiry
    pub tau_days: f64,
    /// Years to expiry (365-day convention)
    pub tau_years: f64,
    /// Put side, sorted by strike
    pub put: SideQuotes,
    /// Call side, sorted by strike
    pub call: SideQuotes,
}

/// Partition one date's quotes into tau buckets.
///
/// Only tau values present on both sides form a bucket; one-sided expiries
/// are dropped. Buckets come back sorted by tau ascending.
pub fn extract_buckets(day: &[OptionQuote]) -> Vec<TauBucket> {
    // Group by the tau-days bit pattern; values originate from one source
    // column so exact equality is the grouping the data defines.
    let mut taus: Vec<f64> = Vec::new();
    for q in day {
        if !taus.iter().any(|&t| t == q.tau_days) {
            taus.push(q.tau_days);
        }
    }
    taus.sort_by(|a, b| a.partial_cmp(b).unwrap());

    let mut buckets = Vec::new();
    for &tau_days in &taus {
        let mut put = SideQuotes::default();
        let mut call = SideQuotes::default();
        for q in day.iter().filter(|q| q.tau_days == tau_days) {
            match q.option_type {
                OptionType::Put => put.push(q),
                OptionType::Call => call.push(q),
            }
        }
        if put.is_empty() || call.is_empty() {
            continue;
        }
        put.sort_by_strike();
        call.sort_by_strike();
        buckets.push(TauBucket {
            tau_days,
            tau_years: tau_days / 365.0,
            put,
            call,
        });
    }
    buckets
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn quote(option_type: OptionType, strike: f64, mid: f64, tau_days: f64) -> OptionQuote {
        let date = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        OptionQuote {
            date,
            expiry: date + chrono::Duration::days(tau_days as i64),
            option_type,
            strike,
            mid,
            volume: 10.0,
            implied_vol: 0.2,
            moneyness: 0.0,
            tau_days,
        }
    }

    #[test]
    fn test_extract_common_taus() {
        let day = vec![
            quote(OptionType::Put, 100.0, 5.0, 30.0),
            quote(OptionType::Put, 90.0, 8.0, 30.0),
            quote(OptionType::Call, 110.0, 4.0, 30.0),
            // 60-day expiry has no calls, must be dropped
            quote(OptionType::Put, 95.0, 6.0, 60.0),
        ];

        let buckets = extract_buckets(&day);
        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0].tau_days, 30.0);
        // Put side sorted ascending by strike
        assert_eq!(buckets[0].put.strikes, vec![90.0, 100.0]);
        assert_eq!(buckets[0].put.prices, vec![8.0, 5.0]);
        assert_eq!(buckets[0].call.len(), 1);
    }

    #[test]
    fn test_side_validation() {
        let mut side = SideQuotes {
            strikes: vec![90.0, 100.0],
            prices: vec![8.0, 5.0],
            volumes: vec![1.0, 1.0],
        };
        assert!(side.validate().is_err()); // too few

        side.strikes = vec![90.0, 100.0, 100.0];
        side.prices = vec![8.0, 5.0, 5.0];
        side.volumes = vec![1.0, 1.0, 1.0];
        assert!(side.validate().is_err()); // duplicate strike

        side.strikes = vec![90.0, 100.0, 110.0];
        assert!(side.validate().is_ok());
    }
}
