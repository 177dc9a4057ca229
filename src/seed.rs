use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::info;

use crate::analytics::{model_performance_table, NewRiskMetrics, RiskTolerance};
use crate::error::Result;
use crate::instrument::NewInstrument;
use crate::portfolio::{AssetClass, NewHolding, NewPortfolio};
use crate::store::Store;
use crate::user::NewUser;
use crate::utils::percent_of;

/// Fills an empty store with a demo user, NSE instruments and one portfolio.
pub fn seed_demo_data(store: &mut Store) -> Result<()> {
    let user = store.insert_user(NewUser::new("demo", "Demo Investor"));

    let instruments = [
        ("TCS", "Tata Consultancy Services", "IT", dec!(3245.00)),
        ("RIL", "Reliance Industries", "Energy", dec!(2456.75)),
        ("INFY", "Infosys", "IT", dec!(1456.30)),
        ("HDFCBANK", "HDFC Bank", "Banking", dec!(1589.45)),
        ("GOLDBEES", "Nippon India Gold ETF", "Commodity", dec!(52.40)),
        ("LIQUIDBEES", "Nippon India Liquid ETF", "Cash", dec!(1000.00)),
    ];
    for (symbol, name, sector, price) in instruments {
        store.insert_instrument(NewInstrument::new(symbol, name, sector, price))?;
    }

    let outcome = RiskTolerance::Moderate.outcome();
    let mut portfolio = NewPortfolio::new(user.id, "Growth Portfolio");
    portfolio.expected_return = outcome.expected_return;
    portfolio.risk_score = outcome.risk_score;
    portfolio.sharpe_ratio = outcome.sharpe_ratio;
    portfolio.allocation = outcome.allocation;
    let portfolio = store.insert_portfolio(portfolio)?;

    let holdings = [
        ("TCS", AssetClass::Stocks, dec!(50), dec!(3100.00)),
        ("RIL", AssetClass::Stocks, dec!(40), dec!(2380.00)),
        ("INFY", AssetClass::Stocks, dec!(80), dec!(1420.00)),
        ("HDFCBANK", AssetClass::Stocks, dec!(60), dec!(1550.00)),
        ("GOLDBEES", AssetClass::Gold, dec!(2500), dec!(50.10)),
        ("LIQUIDBEES", AssetClass::Cash, dec!(60), dec!(1000.00)),
    ];
    let market_values: Vec<Decimal> = holdings
        .iter()
        .map(|(symbol, _, quantity, _)| {
            store
                .get_instrument(symbol)
                .map(|instrument| instrument.current_price * quantity)
                .unwrap_or_default()
        })
        .collect();
    let total: Decimal = market_values.iter().sum();

    for ((symbol, asset_class, quantity, average_price), value) in
        holdings.into_iter().zip(market_values)
    {
        let mut holding = NewHolding::new(symbol, asset_class, quantity, average_price);
        holding.current_value = value;
        holding.allocation = percent_of(value, total);
        store.insert_holding(portfolio.id, holding)?;
    }

    store.upsert_risk_metrics(
        portfolio.id,
        NewRiskMetrics {
            var95: dec!(-2.34),
            beta: dec!(0.87),
            max_drawdown: dec!(-12.50),
            volatility: dec!(14.20),
        },
    )?;

    for record in model_performance_table() {
        store.record_model_performance(record);
    }

    store.revalue_portfolio(portfolio.id);

    info!(
        "Seeded demo data : user {} portfolio {} ({} instruments)",
        user.id,
        portfolio.id,
        store.list_instruments().len()
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seed_demo_data() {
        let mut store = Store::new();
        seed_demo_data(&mut store).unwrap();

        assert_eq!(store.list_instruments().len(), 6);
        assert_eq!(store.get_instrument("TCS").unwrap().current_price, dec!(3245.00));

        let portfolio = store.get_portfolio(1).unwrap();
        assert_eq!(portfolio.user_id, 1);
        let holdings = store.holdings_of(portfolio.id);
        assert_eq!(holdings.len(), 6);

        let total: Decimal = holdings.iter().map(|h| h.current_value).sum();
        assert_eq!(portfolio.total_value, total);

        // drift from rounding is tolerated
        let allocated: Decimal = holdings.iter().map(|h| h.allocation).sum();
        assert!((allocated - dec!(100)).abs() <= dec!(0.05));

        assert!(store.risk_metrics_of(portfolio.id).is_some());
        assert_eq!(store.list_model_performance().len(), 3);
    }
}
