use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{debug, error, warn};

use crate::store::Store;

pub const DEFAULT_VOLATILITY: Decimal = dec!(0.02);

/// Lowest price a random walk can reach.
pub const PRICE_FLOOR: Decimal = dec!(0.01);

/// Bounded symmetric random walk over every instrument in the store.
#[derive(Debug)]
pub struct PriceGenerator {
    volatility: HashMap<String, Decimal>,
    default_volatility: Decimal,
    rng: Mutex<StdRng>,
}

impl PriceGenerator {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_os_rng())
    }

    pub fn seeded(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        let volatility = [
            ("TCS", dec!(0.015)),
            ("RIL", dec!(0.02)),
            ("INFY", dec!(0.018)),
            ("HDFCBANK", dec!(0.012)),
            ("GOLDBEES", dec!(0.008)),
            ("LIQUIDBEES", dec!(0.001)),
        ]
        .into_iter()
        .map(|(symbol, v)| (symbol.to_string(), v))
        .collect();

        Self {
            volatility,
            default_volatility: DEFAULT_VOLATILITY,
            rng: Mutex::new(rng),
        }
    }

    pub fn with_volatility(mut self, symbol: &str, volatility: Decimal) -> Self {
        self.volatility.insert(symbol.to_string(), volatility.abs());
        self
    }

    pub fn volatility(&self, symbol: &str) -> Decimal {
        self.volatility
            .get(symbol)
            .copied()
            .unwrap_or(self.default_volatility)
    }

    /// `max(old + old * u, floor)` with `u ~ U(-v, v)`.
    ///
    /// The move is rounded to cents toward zero, so `|new - old| <= old * v`
    /// holds after rounding too.
    pub fn next_price(&self, old: Decimal, volatility: Decimal) -> Decimal {
        let bound = volatility.to_f64().unwrap_or(0.0);
        let u = if bound > 0.0 {
            let sample = match self.rng.lock() {
                Ok(mut rng) => rng.random_range(-bound..=bound),
                Err(poisoned) => poisoned.into_inner().random_range(-bound..=bound),
            };
            Decimal::from_f64(sample)
                .unwrap_or(Decimal::ZERO)
                .clamp(-volatility, volatility)
        } else {
            Decimal::ZERO
        };

        let delta = old
            .checked_mul(u)
            .map(|delta| delta.round_dp_with_strategy(2, RoundingStrategy::ToZero))
            .unwrap_or(Decimal::ZERO);
        match old.checked_add(delta) {
            Some(new) => new.max(PRICE_FLOOR),
            None => {
                warn!("Price move {delta} from {old} overflows, keeping price");
                old
            }
        }
    }

    /// Moves every instrument once. A failed write is logged and skipped.
    pub fn tick(&self, store: &mut Store) -> usize {
        let mut updated = 0;
        for instrument in store.list_instruments() {
            let price = self.next_price(
                instrument.current_price,
                self.volatility(&instrument.symbol),
            );
            match store.apply_price(&instrument.symbol, price) {
                Ok(instrument) => {
                    debug!(
                        "{} {} ({}%)",
                        instrument.symbol, instrument.current_price, instrument.change_percent
                    );
                    updated += 1;
                }
                Err(err) => {
                    error!("Failed to update price of {} : {}", instrument.symbol, err);
                }
            }
        }
        updated
    }
}

impl Default for PriceGenerator {
    fn default() -> Self {
        Self::new()
    }
}
