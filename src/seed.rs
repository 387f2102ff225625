//! Sample data for development and tests
//!
//! A small built-in portfolio document that can be ingested to exercise the
//! full pipeline without any uploads.

use crate::models::Holding;
use serde_json::json;

pub const SAMPLE_PORTFOLIO_DOC_ID: &str = "sample-portfolio";

pub fn sample_holdings() -> Vec<Holding> {
    vec![
        Holding {
            name: "Apple".to_string(),
            symbol: "AAPL".to_string(),
            shares: 100.0,
            avg_price: 150.0,
            sector: "Technology".to_string(),
            region: "US".to_string(),
        },
        Holding {
            name: "Microsoft".to_string(),
            symbol: "MSFT".to_string(),
            shares: 50.0,
            avg_price: 280.0,
            sector: "Technology".to_string(),
            region: "US".to_string(),
        },
        Holding {
            name: "Taiwan Semiconductor".to_string(),
            symbol: "TSM".to_string(),
            shares: 200.0,
            avg_price: 80.0,
            sector: "Technology".to_string(),
            region: "Asia".to_string(),
        },
        Holding {
            name: "JPMorgan Chase".to_string(),
            symbol: "JPM".to_string(),
            shares: 75.0,
            avg_price: 120.0,
            sector: "Financial".to_string(),
            region: "US".to_string(),
        },
        Holding {
            name: "Johnson & Johnson".to_string(),
            symbol: "JNJ".to_string(),
            shares: 200.0,
            avg_price: 160.0,
            sector: "Healthcare".to_string(),
            region: "US".to_string(),
        },
    ]
}

/// The portfolio rendered as the JSON document the indexer ingests.
pub fn sample_portfolio_json() -> String {
    json!({
        "portfolio": {
            "holdings": sample_holdings(),
            "cash": 50000.0,
        }
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_portfolio_round_trips() {
        let raw = sample_portfolio_json();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["portfolio"]["holdings"].as_array().unwrap().len(), 5);
        assert!(raw.contains("AAPL"));
    }
}
