use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strum_macros::{Display, EnumString};

use crate::error::{Result, Validator};
use crate::portfolio::Allocation;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RiskMetrics {
    pub id: u64,
    pub portfolio_id: u64,
    pub var95: Decimal,
    pub beta: Decimal,
    pub max_drawdown: Decimal,
    pub volatility: Decimal,
    pub computed_at: DateTime<Utc>,
}

#[derive(Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct NewRiskMetrics {
    pub var95: Decimal,
    pub beta: Decimal,
    pub max_drawdown: Decimal,
    pub volatility: Decimal,
}

impl NewRiskMetrics {
    pub fn validate(&self) -> Result<()> {
        Validator::default()
            .check(
                self.volatility >= Decimal::ZERO,
                "volatility",
                "must not be negative",
            )
            .finish()
    }
}

#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RiskTolerance {
    Conservative,
    #[default]
    Moderate,
    Aggressive,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OptimizationOutcome {
    pub allocation: Allocation,
    pub expected_return: Decimal,
    pub risk_score: Decimal,
    pub sharpe_ratio: Decimal,
}

impl RiskTolerance {
    pub fn outcome(&self) -> OptimizationOutcome {
        let (allocation, expected_return, risk_score, sharpe_ratio) = match self {
            RiskTolerance::Conservative => (
                Allocation::new(dec!(40), dec!(30), dec!(30)),
                dec!(9.20),
                dec!(4.50),
                dec!(1.12),
            ),
            RiskTolerance::Moderate => (
                Allocation::new(dec!(60), dec!(25), dec!(15)),
                dec!(12.80),
                dec!(6.80),
                dec!(1.34),
            ),
            RiskTolerance::Aggressive => (
                Allocation::new(dec!(80), dec!(15), dec!(5)),
                dec!(16.50),
                dec!(8.90),
                dec!(1.28),
            ),
        };
        OptimizationOutcome {
            allocation,
            expected_return,
            risk_score,
            sharpe_ratio,
        }
    }
}

fn default_algorithm() -> String {
    "MPT".to_string()
}

fn default_investment_amount() -> Decimal {
    dec!(1000000)
}

fn default_time_horizon() -> String {
    "5years".to_string()
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OptimizationParameters {
    #[serde(default)]
    pub risk_tolerance: RiskTolerance,
    #[serde(default = "default_investment_amount")]
    pub investment_amount: Decimal,
    #[serde(default = "default_time_horizon")]
    pub time_horizon: String,
}

#[derive(Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct OptimizationRequest {
    /// Records the outcome against this portfolio when set.
    pub portfolio_id: Option<u64>,
    #[serde(default = "default_algorithm")]
    pub algorithm: String,
    #[serde(flatten)]
    pub parameters: OptimizationParameters,
}

impl OptimizationRequest {
    pub fn validate(&self) -> Result<()> {
        Validator::default()
            .check(
                !self.algorithm.trim().is_empty(),
                "algorithm",
                "must not be empty",
            )
            .check(
                self.parameters.investment_amount > Decimal::ZERO,
                "investmentAmount",
                "must be positive",
            )
            .finish()
    }
}

/// Append-only log entry of an optimisation run.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OptimizationResult {
    pub id: u64,
    pub portfolio_id: u64,
    pub algorithm: String,
    pub parameters: OptimizationParameters,
    pub allocation: Allocation,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModelPerformance {
    pub id: u64,
    pub model_name: String,
    pub accuracy: Decimal,
    pub mse: Decimal,
    pub r_squared: Decimal,
    pub training_date: DateTime<Utc>,
}

#[derive(Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct NewModelPerformance {
    pub model_name: String,
    pub accuracy: Decimal,
    pub mse: Decimal,
    pub r_squared: Decimal,
}

/// Published figures of the three illustrative models.
pub fn model_performance_table() -> Vec<NewModelPerformance> {
    [
        ("XGBoost", dec!(94.20), dec!(0.000245), dec!(0.9542)),
        ("LSTM", dec!(91.80), dec!(0.000389), dec!(0.9301)),
        ("Random Forest", dec!(89.50), dec!(0.000456), dec!(0.9156)),
    ]
    .into_iter()
    .map(|(model_name, accuracy, mse, r_squared)| NewModelPerformance {
        model_name: model_name.to_string(),
        accuracy,
        mse,
        r_squared,
    })
    .collect()
}

#[derive(Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct TrainingRequest {
    #[serde(default = "default_training_symbols")]
    pub symbols: Vec<String>,
}

impl TrainingRequest {
    pub fn validate(&self) -> Result<()> {
        Validator::default()
            .check(!self.symbols.is_empty(), "symbols", "must not be empty")
            .finish()
    }
}

fn default_training_symbols() -> Vec<String> {
    ["TCS", "RIL", "INFY", "HDFCBANK", "GOLD", "CASH"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// Result of a training run: the records appended to the performance log.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TrainingResponse {
    pub status: String,
    pub results: Vec<ModelPerformance>,
    pub timestamp: DateTime<Utc>,
}

fn model_factor(model: &str) -> Decimal {
    match model {
        "XGBoost" => dec!(1.1),
        "LSTM" => dec!(1.05),
        "Random Forest" => dec!(0.95),
        _ => dec!(1.0),
    }
}

fn annual_drift(symbol: &str) -> Option<Decimal> {
    match symbol {
        "TCS" => Some(dec!(0.12)),
        "RIL" => Some(dec!(0.10)),
        "INFY" => Some(dec!(0.14)),
        "HDFCBANK" => Some(dec!(0.08)),
        "WIPRO" => Some(dec!(0.10)),
        "ICICIBANK" => Some(dec!(0.09)),
        "GOLD" | "GOLDBEES" | "CASH" | "LIQUIDBEES" => Some(dec!(0.06)),
        _ => None,
    }
}

const TRADING_DAYS: Decimal = dec!(252);

fn default_model() -> String {
    "XGBoost".to_string()
}

fn default_symbols() -> Vec<String> {
    vec!["TCS".to_string(), "RIL".to_string(), "INFY".to_string()]
}

fn default_days_ahead() -> u32 {
    30
}

#[derive(Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct PredictionRequest {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,
    #[serde(default = "default_days_ahead")]
    pub days_ahead: u32,
}

impl PredictionRequest {
    pub fn validate(&self) -> Result<()> {
        Validator::default()
            .check(!self.symbols.is_empty(), "symbols", "must not be empty")
            .check(self.days_ahead > 0, "daysAhead", "must be positive")
            .finish()
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Prediction {
    pub predicted_return: Decimal,
    pub confidence: Decimal,
    pub forecast_period: u32,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PredictionResponse {
    pub predictions: BTreeMap<String, Prediction>,
    pub model_used: String,
    pub timestamp: DateTime<Utc>,
}

pub fn predict_returns(request: &PredictionRequest) -> PredictionResponse {
    let factor = model_factor(&request.model);
    let predictions = request
        .symbols
        .iter()
        .map(|symbol| {
            let daily = annual_drift(symbol)
                .map(|drift| drift / TRADING_DAYS)
                .unwrap_or(dec!(0.001));
            let predicted_return =
                (daily * factor * Decimal::from(request.days_ahead)).round_dp(6);
            (
                symbol.clone(),
                Prediction {
                    predicted_return,
                    confidence: dec!(0.85),
                    forecast_period: request.days_ahead,
                },
            )
        })
        .collect();

    PredictionResponse {
        predictions,
        model_used: request.model.clone(),
        timestamp: Utc::now(),
    }
}
