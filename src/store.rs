use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::analytics::{
    ModelPerformance, NewModelPerformance, NewRiskMetrics, OptimizationParameters,
    OptimizationResult, RiskMetrics,
};
use crate::error::{Error, Result};
use crate::instrument::{Instrument, InstrumentPatch, NewInstrument};
use crate::portfolio::{
    Allocation, Holding, NewHolding, NewPortfolio, Portfolio, PortfolioPatch, PortfolioView,
};
use crate::user::{NewUser, User};
use crate::utils::{money, percent_change};
use crate::valuation::compute_portfolio_valuation;

pub type SharedStore = Arc<RwLock<Store>>;

/// Portfolio state after a revaluation, as sent in `portfolio_update`.
#[derive(Clone, Debug, PartialEq)]
pub struct PortfolioSnapshot {
    pub portfolio: PortfolioView,
    pub holdings: Vec<Holding>,
    pub risk_metrics: Option<RiskMetrics>,
}

#[derive(Debug, Default)]
struct Ids {
    user: u64,
    instrument: u64,
    portfolio: u64,
    holding: u64,
    risk_metrics: u64,
    optimization: u64,
    model: u64,
}

fn next(counter: &mut u64) -> u64 {
    *counter += 1;
    *counter
}

#[derive(Debug, Default)]
pub struct Store {
    ids: Ids,
    users: BTreeMap<u64, User>,
    instruments: BTreeMap<u64, Instrument>,
    portfolios: BTreeMap<u64, Portfolio>,
    holdings: BTreeMap<u64, Holding>,
    risk_metrics: BTreeMap<u64, RiskMetrics>,
    optimizations: BTreeMap<u64, OptimizationResult>,
    models: BTreeMap<u64, ModelPerformance>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared(self) -> SharedStore {
        Arc::new(RwLock::new(self))
    }

    // users

    pub fn insert_user(&mut self, user: NewUser) -> User {
        let id = next(&mut self.ids.user);
        let user = User {
            id,
            username: user.username,
            display_name: user.display_name,
            created_at: Utc::now(),
        };
        self.users.insert(id, user.clone());
        user
    }

    pub fn get_user(&self, id: u64) -> Option<User> {
        self.users.get(&id).cloned()
    }

    // instruments

    pub fn insert_instrument(&mut self, instrument: NewInstrument) -> Result<Instrument> {
        instrument.validate()?;
        if self.get_instrument(&instrument.symbol).is_some() {
            return Err(Error::invalid("symbol", "already exists"));
        }
        let id = next(&mut self.ids.instrument);
        let instrument = Instrument {
            id,
            symbol: instrument.symbol,
            name: instrument.name,
            sector: instrument.sector,
            current_price: instrument.current_price,
            change: dec!(0.00),
            change_percent: dec!(0.00),
            last_updated: Utc::now(),
        };
        self.instruments.insert(id, instrument.clone());
        Ok(instrument)
    }

    pub fn get_instrument(&self, symbol: &str) -> Option<Instrument> {
        self.instruments
            .values()
            .find(|instrument| instrument.symbol == symbol)
            .cloned()
    }

    pub fn list_instruments(&self) -> Vec<Instrument> {
        self.instruments.values().cloned().collect()
    }

    fn instrument_mut(&mut self, symbol: &str) -> Result<&mut Instrument> {
        self.instruments
            .values_mut()
            .find(|instrument| instrument.symbol == symbol)
            .ok_or_else(|| Error::not_found("instrument", symbol))
    }

    pub fn update_instrument(&mut self, symbol: &str, patch: InstrumentPatch) -> Result<Instrument> {
        let instrument = self.instrument_mut(symbol)?;
        if let Some(name) = patch.name {
            instrument.name = name;
        }
        if let Some(sector) = patch.sector {
            instrument.sector = sector;
        }
        if let Some(price) = patch.current_price {
            instrument.current_price = price;
        }
        if let Some(change) = patch.change {
            instrument.change = change;
        }
        if let Some(change_percent) = patch.change_percent {
            instrument.change_percent = change_percent;
        }
        instrument.last_updated = Utc::now();
        Ok(instrument.clone())
    }

    /// Writes a new price and derives `change`/`changePercent` from the previous one.
    pub fn apply_price(&mut self, symbol: &str, price: Decimal) -> Result<Instrument> {
        let instrument = self.instrument_mut(symbol)?;
        let old = instrument.current_price;
        instrument.current_price = price;
        instrument.change = money(price - old);
        instrument.change_percent = percent_change(old, price);
        instrument.last_updated = Utc::now();
        Ok(instrument.clone())
    }

    // portfolios

    pub fn insert_portfolio(&mut self, portfolio: NewPortfolio) -> Result<Portfolio> {
        portfolio.validate()?;
        if self.get_user(portfolio.user_id).is_none() {
            return Err(Error::not_found("user", portfolio.user_id));
        }
        let id = next(&mut self.ids.portfolio);
        let now = Utc::now();
        let portfolio = Portfolio {
            id,
            user_id: portfolio.user_id,
            name: portfolio.name,
            total_value: money(portfolio.total_value),
            expected_return: portfolio.expected_return,
            risk_score: portfolio.risk_score,
            sharpe_ratio: portfolio.sharpe_ratio,
            allocation: portfolio.allocation,
            created_at: now,
            updated_at: now,
        };
        self.portfolios.insert(id, portfolio.clone());
        Ok(portfolio)
    }

    pub fn get_portfolio(&self, id: u64) -> Option<Portfolio> {
        self.portfolios.get(&id).cloned()
    }

    pub fn portfolios_by_user(&self, user_id: u64) -> Vec<Portfolio> {
        self.portfolios
            .values()
            .filter(|portfolio| portfolio.user_id == user_id)
            .cloned()
            .collect()
    }

    pub fn update_portfolio(&mut self, id: u64, patch: PortfolioPatch) -> Result<Portfolio> {
        let portfolio = self
            .portfolios
            .get_mut(&id)
            .ok_or_else(|| Error::not_found("portfolio", id))?;
        if let Some(name) = patch.name {
            portfolio.name = name;
        }
        if let Some(total_value) = patch.total_value {
            portfolio.total_value = money(total_value);
        }
        if let Some(expected_return) = patch.expected_return {
            portfolio.expected_return = expected_return;
        }
        if let Some(risk_score) = patch.risk_score {
            portfolio.risk_score = risk_score;
        }
        if let Some(sharpe_ratio) = patch.sharpe_ratio {
            portfolio.sharpe_ratio = sharpe_ratio;
        }
        if let Some(allocation) = patch.allocation {
            portfolio.allocation = allocation;
        }
        portfolio.updated_at = Utc::now();
        Ok(portfolio.clone())
    }

    /// Removes the portfolio together with its holdings and risk metrics.
    pub fn delete_portfolio(&mut self, id: u64) -> Result<Portfolio> {
        let portfolio = self
            .portfolios
            .remove(&id)
            .ok_or_else(|| Error::not_found("portfolio", id))?;
        self.holdings.retain(|_, holding| holding.portfolio_id != id);
        self.risk_metrics.retain(|_, metrics| metrics.portfolio_id != id);
        Ok(portfolio)
    }

    // holdings

    pub fn insert_holding(&mut self, portfolio_id: u64, holding: NewHolding) -> Result<Holding> {
        holding.validate()?;
        if !self.portfolios.contains_key(&portfolio_id) {
            return Err(Error::not_found("portfolio", portfolio_id));
        }
        let id = next(&mut self.ids.holding);
        let holding = Holding {
            id,
            portfolio_id,
            symbol: holding.symbol,
            asset_class: holding.asset_class,
            quantity: holding.quantity,
            average_price: holding.average_price,
            current_value: money(holding.current_value),
            allocation: holding.allocation,
        };
        self.holdings.insert(id, holding.clone());
        Ok(holding)
    }

    pub fn get_holding(&self, id: u64) -> Option<Holding> {
        self.holdings.get(&id).cloned()
    }

    pub fn holdings_of(&self, portfolio_id: u64) -> Vec<Holding> {
        self.holdings
            .values()
            .filter(|holding| holding.portfolio_id == portfolio_id)
            .cloned()
            .collect()
    }

    // risk metrics

    /// Replaces the portfolio's metrics record, keeping its id if one exists.
    pub fn upsert_risk_metrics(
        &mut self,
        portfolio_id: u64,
        metrics: NewRiskMetrics,
    ) -> Result<RiskMetrics> {
        metrics.validate()?;
        if !self.portfolios.contains_key(&portfolio_id) {
            return Err(Error::not_found("portfolio", portfolio_id));
        }
        let id = match self.risk_metrics_of(portfolio_id) {
            Some(existing) => existing.id,
            None => next(&mut self.ids.risk_metrics),
        };
        let metrics = RiskMetrics {
            id,
            portfolio_id,
            var95: metrics.var95,
            beta: metrics.beta,
            max_drawdown: metrics.max_drawdown,
            volatility: metrics.volatility,
            computed_at: Utc::now(),
        };
        self.risk_metrics.insert(id, metrics.clone());
        Ok(metrics)
    }

    pub fn risk_metrics_of(&self, portfolio_id: u64) -> Option<RiskMetrics> {
        self.risk_metrics
            .values()
            .find(|metrics| metrics.portfolio_id == portfolio_id)
            .cloned()
    }

    // optimization log

    pub fn record_optimization(
        &mut self,
        portfolio_id: u64,
        algorithm: &str,
        parameters: OptimizationParameters,
        allocation: Allocation,
    ) -> Result<OptimizationResult> {
        if !self.portfolios.contains_key(&portfolio_id) {
            return Err(Error::not_found("portfolio", portfolio_id));
        }
        let id = next(&mut self.ids.optimization);
        let result = OptimizationResult {
            id,
            portfolio_id,
            algorithm: algorithm.to_string(),
            parameters,
            allocation,
            created_at: Utc::now(),
        };
        self.optimizations.insert(id, result.clone());
        Ok(result)
    }

    pub fn optimizations_of(&self, portfolio_id: u64) -> Vec<OptimizationResult> {
        self.optimizations
            .values()
            .filter(|result| result.portfolio_id == portfolio_id)
            .cloned()
            .collect()
    }

    // model performance

    pub fn record_model_performance(&mut self, record: NewModelPerformance) -> ModelPerformance {
        let id = next(&mut self.ids.model);
        let record = ModelPerformance {
            id,
            model_name: record.model_name,
            accuracy: record.accuracy,
            mse: record.mse,
            r_squared: record.r_squared,
            training_date: Utc::now(),
        };
        self.models.insert(id, record.clone());
        record
    }

    pub fn list_model_performance(&self) -> Vec<ModelPerformance> {
        self.models.values().cloned().collect()
    }

    // valuation

    /// Values the portfolio against current prices and writes the results
    /// back into the cached `totalValue` and each holding's `currentValue`.
    pub fn revalue_portfolio(&mut self, id: u64) -> Option<PortfolioSnapshot> {
        let holdings = self.holdings_of(id);
        let valuation = compute_portfolio_valuation(&holdings, &self.list_instruments());

        let portfolio = self.portfolios.get_mut(&id)?;
        portfolio.total_value = valuation.total_value;
        portfolio.updated_at = Utc::now();
        let portfolio = portfolio.clone();

        for value in &valuation.holdings {
            if let Some(holding) = self.holdings.get_mut(&value.holding_id) {
                holding.current_value = value.current_value;
            }
        }

        Some(PortfolioSnapshot {
            portfolio: PortfolioView {
                portfolio,
                day_change: valuation.day_change,
                day_change_percent: valuation.day_change_percent,
            },
            holdings: self.holdings_of(id),
            risk_metrics: self.risk_metrics_of(id),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::portfolio::AssetClass;

    fn store_with_portfolio() -> (Store, Portfolio) {
        let mut store = Store::new();
        let user = store.insert_user(NewUser::new("demo", "Demo"));
        let portfolio = store
            .insert_portfolio(NewPortfolio::new(user.id, "Growth"))
            .unwrap();
        (store, portfolio)
    }

    #[test]
    fn test_ids_are_monotonic_and_not_reused() {
        let (mut store, first) = store_with_portfolio();
        let second = store
            .insert_portfolio(NewPortfolio::new(first.user_id, "Income"))
            .unwrap();
        assert_eq!((first.id, second.id), (1, 2));

        store.delete_portfolio(second.id).unwrap();
        let third = store
            .insert_portfolio(NewPortfolio::new(first.user_id, "Again"))
            .unwrap();
        assert_eq!(third.id, 3);
    }

    #[test]
    fn test_get_absent_is_none() {
        let store = Store::new();
        assert!(store.get_portfolio(42).is_none());
        assert!(store.get_instrument("TCS").is_none());
        assert!(store.risk_metrics_of(42).is_none());
    }

    #[test]
    fn test_update_merges_fields() {
        let (mut store, portfolio) = store_with_portfolio();
        let updated = store
            .update_portfolio(
                portfolio.id,
                PortfolioPatch {
                    sharpe_ratio: Some(dec!(1.34)),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated.name, "Growth");
        assert_eq!(updated.sharpe_ratio, dec!(1.34));
        assert!(updated.updated_at >= portfolio.updated_at);
    }

    #[test]
    fn test_update_absent_is_not_found() {
        let mut store = Store::new();
        let err = store
            .update_portfolio(9, PortfolioPatch::default())
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { entity: "portfolio", .. }));

        let err = store
            .update_instrument("NOPE", InstrumentPatch::default())
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { entity: "instrument", .. }));
    }

    #[test]
    fn test_delete_cascades_holdings_and_metrics() {
        let (mut store, portfolio) = store_with_portfolio();
        let other = store
            .insert_portfolio(NewPortfolio::new(portfolio.user_id, "Other"))
            .unwrap();
        let holding = NewHolding::new("TCS", AssetClass::Stocks, dec!(1), dec!(3000));
        store.insert_holding(portfolio.id, holding.clone()).unwrap();
        store.insert_holding(portfolio.id, holding.clone()).unwrap();
        let kept = store.insert_holding(other.id, holding).unwrap();
        store
            .upsert_risk_metrics(
                portfolio.id,
                NewRiskMetrics {
                    var95: dec!(-2.34),
                    beta: dec!(0.87),
                    max_drawdown: dec!(-12.5),
                    volatility: dec!(14.2),
                },
            )
            .unwrap();

        store.delete_portfolio(portfolio.id).unwrap();

        assert!(store.holdings_of(portfolio.id).is_empty());
        assert!(store.risk_metrics_of(portfolio.id).is_none());
        assert_eq!(store.holdings_of(other.id), vec![kept]);
        assert!(store.delete_portfolio(portfolio.id).is_err());
    }

    #[test]
    fn test_duplicate_symbol_rejected() {
        let mut store = Store::new();
        store
            .insert_instrument(NewInstrument::new("TCS", "Tata", "IT", dec!(3245.00)))
            .unwrap();
        let err = store
            .insert_instrument(NewInstrument::new("TCS", "Tata", "IT", dec!(1)))
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_apply_price_derives_change() {
        let mut store = Store::new();
        store
            .insert_instrument(NewInstrument::new("TCS", "Tata", "IT", dec!(3245.00)))
            .unwrap();
        let instrument = store.apply_price("TCS", dec!(3290.43)).unwrap();
        assert_eq!(instrument.change, dec!(45.43));
        assert_eq!(instrument.change_percent, dec!(1.40));
        assert!(store.apply_price("NOPE", dec!(1)).is_err());
    }

    #[test]
    fn test_upsert_risk_metrics_keeps_one_record() {
        let (mut store, portfolio) = store_with_portfolio();
        let metrics = NewRiskMetrics {
            var95: dec!(-2.34),
            beta: dec!(0.87),
            max_drawdown: dec!(-12.5),
            volatility: dec!(14.2),
        };
        let first = store.upsert_risk_metrics(portfolio.id, metrics.clone()).unwrap();
        let second = store
            .upsert_risk_metrics(
                portfolio.id,
                NewRiskMetrics {
                    beta: dec!(1.05),
                    ..metrics
                },
            )
            .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(store.risk_metrics_of(portfolio.id).unwrap().beta, dec!(1.05));
    }

    #[test]
    fn test_revalue_writes_back() {
        let (mut store, portfolio) = store_with_portfolio();
        store
            .insert_instrument(NewInstrument::new("ABC", "Abc", "IT", dec!(100.00)))
            .unwrap();
        let holding = store
            .insert_holding(
                portfolio.id,
                NewHolding::new("ABC", AssetClass::Stocks, dec!(10), dec!(90)),
            )
            .unwrap();

        let snapshot = store.revalue_portfolio(portfolio.id).unwrap();
        assert_eq!(snapshot.portfolio.portfolio.total_value.to_string(), "1000.00");
        assert_eq!(snapshot.portfolio.day_change_percent, dec!(0));
        assert_eq!(
            store.get_portfolio(portfolio.id).unwrap().total_value,
            dec!(1000.00)
        );
        assert_eq!(
            store.get_holding(holding.id).unwrap().current_value,
            dec!(1000.00)
        );
        assert!(store.revalue_portfolio(99).is_none());
    }

    #[test]
    fn test_portfolio_requires_user() {
        let mut store = Store::new();
        let err = store
            .insert_portfolio(NewPortfolio::new(5, "Orphan"))
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { entity: "user", .. }));
    }
}
