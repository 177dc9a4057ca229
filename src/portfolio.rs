use chrono::{DateTime, Utc};
use colored::Colorize;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use strum_macros::{Display as StrumDisplay, EnumString};

use crate::error::{Result, Validator};

#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, StrumDisplay, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AssetClass {
    Stocks,
    Gold,
    Cash,
}

/// Percentages by asset class.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub struct Allocation {
    pub stocks: Decimal,
    pub gold: Decimal,
    pub cash: Decimal,
}

impl Allocation {
    pub fn new(stocks: Decimal, gold: Decimal, cash: Decimal) -> Self {
        Self { stocks, gold, cash }
    }

    pub fn total(&self) -> Decimal {
        self.stocks + self.gold + self.cash
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Portfolio {
    pub id: u64,
    pub user_id: u64,
    pub name: String,
    /// Cached projection of holdings × live prices, refreshed by revaluation.
    pub total_value: Decimal,
    pub expected_return: Decimal,
    pub risk_score: Decimal,
    pub sharpe_ratio: Decimal,
    pub allocation: Allocation,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct NewPortfolio {
    pub user_id: u64,
    pub name: String,
    #[serde(default)]
    pub total_value: Decimal,
    #[serde(default)]
    pub expected_return: Decimal,
    #[serde(default)]
    pub risk_score: Decimal,
    #[serde(default)]
    pub sharpe_ratio: Decimal,
    #[serde(default)]
    pub allocation: Allocation,
}

impl NewPortfolio {
    pub fn new(user_id: u64, name: &str) -> Self {
        Self {
            user_id,
            name: name.to_string(),
            total_value: Decimal::ZERO,
            expected_return: Decimal::ZERO,
            risk_score: Decimal::ZERO,
            sharpe_ratio: Decimal::ZERO,
            allocation: Allocation::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        Validator::default()
            .check(!self.name.trim().is_empty(), "name", "must not be empty")
            .check(
                self.total_value >= Decimal::ZERO,
                "totalValue",
                "must not be negative",
            )
            .finish()
    }
}

#[derive(Deserialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioPatch {
    pub name: Option<String>,
    pub total_value: Option<Decimal>,
    pub expected_return: Option<Decimal>,
    pub risk_score: Option<Decimal>,
    pub sharpe_ratio: Option<Decimal>,
    pub allocation: Option<Allocation>,
}

impl PortfolioPatch {
    pub fn validate(&self) -> Result<()> {
        Validator::default()
            .check(
                self.name.as_ref().is_none_or(|n| !n.trim().is_empty()),
                "name",
                "must not be empty",
            )
            .finish()
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Holding {
    pub id: u64,
    pub portfolio_id: u64,
    /// Weak reference, the instrument may be missing.
    pub symbol: String,
    pub asset_class: AssetClass,
    pub quantity: Decimal,
    pub average_price: Decimal,
    pub current_value: Decimal,
    pub allocation: Decimal,
}

#[derive(Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct NewHolding {
    pub symbol: String,
    pub asset_class: AssetClass,
    pub quantity: Decimal,
    pub average_price: Decimal,
    #[serde(default)]
    pub current_value: Decimal,
    #[serde(default)]
    pub allocation: Decimal,
}

impl NewHolding {
    pub fn new(symbol: &str, asset_class: AssetClass, quantity: Decimal, average_price: Decimal) -> Self {
        Self {
            symbol: symbol.to_string(),
            asset_class,
            quantity,
            average_price,
            current_value: quantity.checked_mul(average_price).unwrap_or_default(),
            allocation: Decimal::ZERO,
        }
    }

    pub fn validate(&self) -> Result<()> {
        Validator::default()
            .check(!self.symbol.trim().is_empty(), "symbol", "must not be empty")
            .check(self.quantity > Decimal::ZERO, "quantity", "must be positive")
            .check(
                self.average_price >= Decimal::ZERO,
                "averagePrice",
                "must not be negative",
            )
            .check(
                self.allocation >= Decimal::ZERO && self.allocation <= dec!(100),
                "allocation",
                "must be between 0 and 100",
            )
            .finish()
    }
}

/// A portfolio as pushed to clients, with the day change of the last revaluation.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioView {
    #[serde(flatten)]
    pub portfolio: Portfolio,
    pub day_change: Decimal,
    pub day_change_percent: Decimal,
}

impl Display for PortfolioView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let change = format!("{} ({}%)", self.day_change, self.day_change_percent);
        let change = if self.day_change.is_sign_negative() {
            change.red()
        } else {
            change.green()
        };
        write!(
            f,
            "{} ~{} : {} / stocks {}% gold {}% cash {}%",
            self.portfolio.name.purple(),
            self.portfolio.total_value.to_string().yellow(),
            change,
            self.portfolio.allocation.stocks,
            self.portfolio.allocation.gold,
            self.portfolio.allocation.cash,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_asset_class_strings() {
        assert_eq!(AssetClass::from_str("gold").unwrap(), AssetClass::Gold);
        assert_eq!(AssetClass::Stocks.to_string(), "stocks");
        assert_eq!(
            serde_json::to_value(AssetClass::Cash).unwrap(),
            serde_json::json!("cash")
        );
    }

    #[test]
    fn test_validate_holding() {
        let holding = NewHolding::new("TCS", AssetClass::Stocks, dec!(10), dec!(3100));
        assert!(holding.validate().is_ok());
        assert_eq!(holding.current_value, dec!(31000));

        let holding = NewHolding::new("TCS", AssetClass::Stocks, dec!(0), dec!(3100));
        assert!(holding.validate().is_err());
    }

    #[test]
    fn test_view_flattens_portfolio() {
        let now = Utc::now();
        let view = PortfolioView {
            portfolio: Portfolio {
                id: 1,
                user_id: 1,
                name: "Growth".to_string(),
                total_value: dec!(1000.00),
                expected_return: dec!(12.80),
                risk_score: dec!(6.80),
                sharpe_ratio: dec!(1.34),
                allocation: Allocation::new(dec!(60), dec!(25), dec!(15)),
                created_at: now,
                updated_at: now,
            },
            day_change: dec!(5.00),
            day_change_percent: dec!(0.50),
        };
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["totalValue"], "1000.00");
        assert_eq!(json["dayChangePercent"], "0.50");
        assert_eq!(json["userId"], 1);

        let back: PortfolioView = serde_json::from_value(json).unwrap();
        assert_eq!(back, view);
    }
}
