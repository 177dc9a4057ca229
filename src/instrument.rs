use chrono::{DateTime, Utc};
use colored::Colorize;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt::Display;

use crate::error::{Result, Validator};

/// A tradable symbol with a live simulated price.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Instrument {
    pub id: u64,
    pub symbol: String,
    pub name: String,
    pub sector: String,
    pub current_price: Decimal,
    pub change: Decimal,
    pub change_percent: Decimal,
    pub last_updated: DateTime<Utc>,
}

#[derive(Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct NewInstrument {
    pub symbol: String,
    pub name: String,
    #[serde(default)]
    pub sector: String,
    pub current_price: Decimal,
}

impl NewInstrument {
    pub fn new(symbol: &str, name: &str, sector: &str, current_price: Decimal) -> Self {
        Self {
            symbol: symbol.to_string(),
            name: name.to_string(),
            sector: sector.to_string(),
            current_price,
        }
    }

    pub fn validate(&self) -> Result<()> {
        Validator::default()
            .check(!self.symbol.trim().is_empty(), "symbol", "must not be empty")
            .check(!self.name.trim().is_empty(), "name", "must not be empty")
            .check(
                self.current_price > Decimal::ZERO,
                "currentPrice",
                "must be positive",
            )
            .finish()
    }
}

#[derive(Deserialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct InstrumentPatch {
    pub name: Option<String>,
    pub sector: Option<String>,
    pub current_price: Option<Decimal>,
    pub change: Option<Decimal>,
    pub change_percent: Option<Decimal>,
}

impl InstrumentPatch {
    pub fn validate(&self) -> Result<()> {
        Validator::default()
            .check(
                self.current_price.is_none_or(|p| p > Decimal::ZERO),
                "currentPrice",
                "must be positive",
            )
            .finish()
    }
}

/// One row of a `price_update` message.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PriceQuote {
    pub symbol: String,
    pub price: Decimal,
    pub change: Decimal,
    pub change_percent: Decimal,
    pub timestamp: DateTime<Utc>,
}

impl From<&Instrument> for PriceQuote {
    fn from(instrument: &Instrument) -> Self {
        Self {
            symbol: instrument.symbol.clone(),
            price: instrument.current_price,
            change: instrument.change,
            change_percent: instrument.change_percent,
            timestamp: instrument.last_updated,
        }
    }
}

impl Display for PriceQuote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let change = format!("{} ({}%)", self.change, self.change_percent);
        let change = if self.change.is_sign_negative() {
            change.red()
        } else {
            change.green()
        };
        write!(f, "{:<12} {:>10} {}", self.symbol, self.price, change)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_validate_new_instrument() {
        assert!(NewInstrument::new("TCS", "Tata Consultancy", "IT", dec!(3245.00))
            .validate()
            .is_ok());
        assert!(NewInstrument::new(" ", "Tata Consultancy", "IT", dec!(3245.00))
            .validate()
            .is_err());
        assert!(NewInstrument::new("TCS", "Tata Consultancy", "IT", dec!(0))
            .validate()
            .is_err());
    }

    #[test]
    fn test_quote_serializes_camel_case() {
        let quote = PriceQuote {
            symbol: "TCS".to_string(),
            price: dec!(3245.00),
            change: dec!(-12.50),
            change_percent: dec!(-0.38),
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&quote).unwrap();
        assert_eq!(json["price"], "3245.00");
        assert_eq!(json["changePercent"], "-0.38");
    }
}
