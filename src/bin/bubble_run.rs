//! Bubble estimation from a JSON quote panel
//!
//! Loads a quote panel prepared by an ingestion script, runs the full
//! calibration and aggregation pipeline, and prints the rolling series.

use std::fs::File;
use std::io::BufReader;

use serde::Deserialize;

use bubble_options::prelude::*;

#[derive(Debug, Deserialize)]
struct PanelFile {
    dates: Vec<chrono::NaiveDate>,
    spots: Vec<f64>,
    rates: Vec<f64>,
    counts: Vec<usize>,
    quotes: Vec<OptionQuote>,
}

fn main() {
    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "data/quote_panel.json".to_string());

    println!("Bubble Estimation");
    println!("=================\n");

    let file = match File::open(&path) {
        Ok(f) => f,
        Err(e) => {
            println!("Error: could not open {}: {}", path, e);
            println!("Pass a quote panel JSON as the first argument.");
            return;
        }
    };

    let reader = BufReader::new(file);
    let raw: PanelFile = match serde_json::from_reader(reader) {
        Ok(d) => d,
        Err(e) => {
            println!("Error parsing JSON: {}", e);
            return;
        }
    };

    let panel = match QuotePanel::from_blocks(raw.dates, raw.spots, raw.rates, raw.quotes, &raw.counts)
    {
        Ok(p) => p,
        Err(e) => {
            println!("Error building panel: {}", e);
            return;
        }
    };

    println!("Loaded panel");
    println!("  Dates:  {}", panel.n_dates());
    println!("  Quotes: {}", panel.total_quotes());

    let params = CalibrationParams::default();
    println!("\n--- Calibration ---");
    println!(
        "  nstep={}, order={}, bandwidth={:?}, hnumsd={}",
        params.nstep, params.order, params.bandwidth, params.hnumsd
    );

    let output = calibrate_panel(&panel, &params);
    let total_buckets: usize = output.buckets.iter().map(|b| b.len()).sum();
    println!("  Calibrated {} buckets", total_buckets);

    let cfg = AggregatorConfig::default();
    let series = aggregate(&output, &cfg);

    println!("\n--- Rolling bubble series (combined) ---\n");
    println!("{:>12} | {:>9} {:>9} {:>9}", "date", "3M", "6M", "12M");
    println!("-------------+------------------------------");
    for t in 0..series.len() {
        let row: Vec<String> = MaturityBand::ALL
            .iter()
            .map(|&band| {
                let e = series.get(t, band, Side::Combined);
                if e.mean.is_finite() {
                    format!("{:>9.3}", e.mean)
                } else {
                    format!("{:>9}", "-")
                }
            })
            .collect();
        println!("{:>12} | {}", series.dates[t], row.join(" "));
    }

    println!("\n--- Done ---");
}
