//! Demand forecast and pricing arithmetic.
//!
//! Pure functions over decimal values; the same inputs always give the
//! same outputs, independent of locale or float rounding.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use thiserror::Error;

use crate::models::Product;

/// Weight of units already sold in the forecast
const SOLD_WEIGHT: Decimal = dec!(1.2);
/// Weight of current stock in the forecast
const STOCK_WEIGHT: Decimal = dec!(0.1);
/// Stock weight used by the comparison view when no forecast is stored
const COMPARISON_STOCK_WEIGHT: Decimal = dec!(1.0);

/// Sell-through ratio above which the price is raised
const HIGH_DEMAND_RATIO: Decimal = dec!(0.8);
const PRICE_RAISE: Decimal = dec!(1.05);
const PRICE_CUT: Decimal = dec!(0.95);
/// Lowest optimized price as a fraction of the selling price
const PRICE_FLOOR: Decimal = dec!(0.8);

/// Products needed for a comparison
pub const MIN_COMPARISON_PRODUCTS: usize = 2;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MetricsError {
    #[error("Please select at least {required} products for demand forecast (got {found})")]
    NotEnoughProducts { required: usize, found: usize },
}

/// `ceil(sold × 1.2 + stock × 0.1)`
pub fn demand_forecast(stock: u32, sold: u32) -> u64 {
    weighted_demand(stock, sold, STOCK_WEIGHT)
}

/// Nudge the selling price by sell-through: +5% when `sold / (stock + 1)`
/// exceeds 0.8, otherwise -5%, never below 80% of the selling price.
/// Rounded half away from zero to cents.
pub fn optimized_price(stock: u32, sold: u32, selling_price: Decimal) -> Decimal {
    let ratio = Decimal::from(sold) / (Decimal::from(stock) + Decimal::ONE);
    let adjusted = if ratio > HIGH_DEMAND_RATIO {
        selling_price * PRICE_RAISE
    } else {
        selling_price * PRICE_CUT
    };
    adjusted
        .max(selling_price * PRICE_FLOOR)
        .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Margin over cost in percent; zero when cost is not positive.
pub fn profit_margin(cost_price: Decimal, selling_price: Decimal) -> Decimal {
    if cost_price <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    (selling_price - cost_price) / cost_price * dec!(100)
}

/// Demand shown when comparing products: the stored forecast, or
/// `ceil(sold × 1.2 + stock)` when none was saved.
pub fn comparison_demand(product: &Product) -> u64 {
    match product.demand_forecast {
        Some(forecast) if forecast > 0 => forecast,
        _ => weighted_demand(
            product.stock_available,
            product.units_sold,
            COMPARISON_STOCK_WEIGHT,
        ),
    }
}

/// One bar of a product comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForecastPoint {
    pub name: String,
    pub demand: u64,
    pub price: Decimal,
}

pub fn compare_products(products: &[Product]) -> Result<Vec<ForecastPoint>, MetricsError> {
    if products.len() < MIN_COMPARISON_PRODUCTS {
        return Err(MetricsError::NotEnoughProducts {
            required: MIN_COMPARISON_PRODUCTS,
            found: products.len(),
        });
    }
    Ok(products
        .iter()
        .map(|p| ForecastPoint {
            name: p.name.clone(),
            demand: comparison_demand(p),
            price: p.selling_price,
        })
        .collect())
}

fn weighted_demand(stock: u32, sold: u32, stock_weight: Decimal) -> u64 {
    let demand = Decimal::from(sold) * SOLD_WEIGHT + Decimal::from(stock) * stock_weight;
    // u32 inputs keep this far below u64::MAX
    demand.ceil().to_u64().unwrap_or(u64::MAX)
}
