//! Option quote data
//!
//! Flat, offset-indexed quote storage: one contiguous row vector plus a
//! per-date offset table, so that each trading date maps to a slice and
//! parallel consumers can read disjoint blocks without copying.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::error::{BubbleError, BubbleResult};

/// Option side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OptionType {
    Put,
    Call,
}

impl OptionType {
    /// Short label for display
    pub fn label(&self) -> &'static str {
        match self {
            OptionType::Put => "P",
            OptionType::Call => "C",
        }
    }
}

/// A single option market quote, immutable once ingested
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionQuote {
    /// Trading date
    pub date: NaiveDate,
    /// Expiry date
    pub expiry: NaiveDate,
    /// Put or call
    pub option_type: OptionType,
    /// Strike price
    pub strike: f64,
    /// Mid price
    pub mid: f64,
    /// Trading volume
    pub volume: f64,
    /// Implied volatility as reported by the data provider
    pub implied_vol: f64,
    /// Log ratio of discounted strike to spot
    pub moneyness: f64,
    /// Days to expiry
    pub tau_days: f64,
}

impl OptionQuote {
    /// Time to expiry in years (365-day convention)
    pub fn tau_years(&self) -> f64 {
        self.tau_days / 365.0
    }
}

/// Per-date quote panel: contiguous rows plus an offset table.
///
/// Row blocks are stored in date order; `day(t)` returns the block for the
/// t-th date. Spot and short rate are per-date scalars, forward-filled
/// across missing dates by the ingestion collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotePanel {
    /// Trading dates, ascending
    pub dates: Vec<NaiveDate>,
    /// Spot price per date
    pub spots: Vec<f64>,
    /// Short risk-free rate per date
    pub rates: Vec<f64>,
    /// All quote rows, grouped into contiguous per-date blocks
    pub quotes: Vec<OptionQuote>,
    /// Block start offsets; offsets[t]..offsets[t+1] is date t's block
    pub offsets: Vec<usize>,
}

impl QuotePanel {
    /// Build a panel from contiguous per-date blocks and a count vector.
    ///
    /// The counts must sum to the row total, every block must be non-empty,
    /// and each block's rows must carry the block's trading date.
    pub fn from_blocks(
        dates: Vec<NaiveDate>,
        spots: Vec<f64>,
        rates: Vec<f64>,
        quotes: Vec<OptionQuote>,
        counts: &[usize],
    ) -> BubbleResult<Self> {
        let nperiod = dates.len();
        if spots.len() != nperiod || rates.len() != nperiod || counts.len() != nperiod {
            return Err(BubbleError::ingestion(format!(
                "panel vectors disagree: {} dates, {} spots, {} rates, {} counts",
                nperiod,
                spots.len(),
                rates.len(),
                counts.len()
            )));
        }

        let total: usize = counts.iter().sum();
        if total != quotes.len() {
            return Err(BubbleError::ingestion(format!(
                "sum(counts)={} but found {} quote rows",
                total,
                quotes.len()
            )));
        }

        let mut offsets = Vec::with_capacity(nperiod + 1);
        let mut start = 0usize;
        for (t, &nt) in counts.iter().enumerate() {
            if nt == 0 {
                return Err(BubbleError::ingestion(format!(
                    "empty quote block for {}",
                    dates[t]
                )));
            }
            offsets.push(start);
            for q in &quotes[start..start + nt] {
                if q.date != dates[t] {
                    return Err(BubbleError::ingestion(format!(
                        "row dated {} inside block for {}",
                        q.date, dates[t]
                    )));
                }
            }
            start += nt;
        }
        offsets.push(total);

        Ok(Self {
            dates,
            spots,
            rates,
            quotes,
            offsets,
        })
    }

    /// Number of trading dates
    pub fn n_dates(&self) -> usize {
        self.dates.len()
    }

    /// Quote block for date index t
    pub fn day(&self, t: usize) -> &[OptionQuote] {
        &self.quotes[self.offsets[t]..self.offsets[t + 1]]
    }

    /// Total number of quote rows
    pub fn total_quotes(&self) -> usize {
        self.quotes.len()
    }
}
