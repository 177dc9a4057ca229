use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use tracing::warn;

use crate::instrument::Instrument;
use crate::portfolio::Holding;
use crate::utils::{money, percent_of};

#[derive(Clone, Debug, PartialEq)]
pub struct HoldingValue {
    pub holding_id: u64,
    pub current_value: Decimal,
    pub day_change: Decimal,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Valuation {
    pub total_value: Decimal,
    pub day_change: Decimal,
    pub day_change_percent: Decimal,
    pub holdings: Vec<HoldingValue>,
}

/// Values holdings against an instrument snapshot.
///
/// `currentValue = quantity * price` and `dayChange = currentValue * changePercent / 100`,
/// summed over holdings. A holding whose symbol has no instrument, or whose
/// value does not fit in a `Decimal`, keeps its last computed value and
/// contributes no day change.
pub fn compute_portfolio_valuation(holdings: &[Holding], instruments: &[Instrument]) -> Valuation {
    let prices: HashMap<&str, &Instrument> = instruments
        .iter()
        .map(|instrument| (instrument.symbol.as_str(), instrument))
        .collect();

    let mut total_value = Decimal::ZERO;
    let mut total_day_change = Decimal::ZERO;

    let holdings = holdings
        .iter()
        .map(|holding| {
            let (current_value, day_change) = prices
                .get(holding.symbol.as_str())
                .and_then(|instrument| value_of(holding, instrument))
                .unwrap_or((holding.current_value, Decimal::ZERO));

            match (
                total_value.checked_add(current_value),
                total_day_change.checked_add(day_change),
            ) {
                (Some(value), Some(change)) => {
                    total_value = value;
                    total_day_change = change;
                }
                _ => warn!(
                    "Portfolio {} total overflows, skipping holding {}",
                    holding.portfolio_id, holding.id
                ),
            }

            HoldingValue {
                holding_id: holding.id,
                current_value: money(current_value),
                day_change: money(day_change),
            }
        })
        .collect();

    Valuation {
        total_value: money(total_value),
        day_change: money(total_day_change),
        day_change_percent: percent_of(total_day_change, total_value),
        holdings,
    }
}

fn value_of(holding: &Holding, instrument: &Instrument) -> Option<(Decimal, Decimal)> {
    let value = holding
        .quantity
        .checked_mul(instrument.current_price)
        .and_then(|value| {
            let change = value.checked_mul(instrument.change_percent)? / dec!(100);
            Some((value, change))
        });
    if value.is_none() {
        warn!(
            "Value of holding {} ({} x {}) overflows",
            holding.id, holding.quantity, instrument.current_price
        );
    }
    value
}
