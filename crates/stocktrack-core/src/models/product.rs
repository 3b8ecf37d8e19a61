//! Inventory product records and the payloads that create or change them.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::api::ApiError;
use crate::cache::Filters;
use crate::metrics;

const VALIDATION_FAILED: &str = "Validation failed.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Stationary,
    Electronics,
    Clothing,
    Books,
    Home,
    Sports,
    #[default]
    Other,
}

impl Category {
    pub const ALL: [Category; 7] = [
        Category::Stationary,
        Category::Electronics,
        Category::Clothing,
        Category::Books,
        Category::Home,
        Category::Sports,
        Category::Other,
    ];

    /// Wire value, as used in filters and payloads
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Stationary => "stationary",
            Category::Electronics => "electronics",
            Category::Clothing => "clothing",
            Category::Books => "books",
            Category::Home => "home",
            Category::Sports => "sports",
            Category::Other => "other",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Category::Stationary => "Stationary",
            Category::Electronics => "Electronics",
            Category::Clothing => "Clothing",
            Category::Books => "Books",
            Category::Home => "Home & Garden",
            Category::Sports => "Sports",
            Category::Other => "Other",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Wire value or display label
        let wanted = s.trim();
        Category::ALL
            .into_iter()
            .find(|c| {
                c.as_str().eq_ignore_ascii_case(wanted) || c.label().eq_ignore_ascii_case(wanted)
            })
            .ok_or_else(|| format!("Unknown category: {}", s))
    }
}

/// A product as the server returns it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Product {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub cost_price: Decimal,
    pub selling_price: Decimal,
    pub category: Category,
    pub stock_available: u32,
    pub units_sold: u32,
    pub customer_rating: Option<Decimal>,
    pub demand_forecast: Option<u64>,
    pub optimized_price: Option<Decimal>,
    pub profit_margin: Option<Decimal>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Product {
    /// Server-computed margin, or computed locally when absent.
    pub fn margin(&self) -> Decimal {
        self.profit_margin
            .unwrap_or_else(|| metrics::profit_margin(self.cost_price, self.selling_price))
    }

    /// Stored forecast, or the forecast formula over current stock and sales.
    pub fn forecast(&self) -> u64 {
        self.demand_forecast
            .unwrap_or_else(|| metrics::demand_forecast(self.stock_available, self.units_sold))
    }

    pub fn description(&self) -> &str {
        self.description.as_deref().unwrap_or("")
    }
}

/// Fields for a new product.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProductDraft {
    pub name: String,
    pub description: Option<String>,
    pub cost_price: Decimal,
    pub selling_price: Decimal,
    pub category: Category,
    pub stock_available: u32,
    pub units_sold: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_rating: Option<Decimal>,
    pub demand_forecast: Option<u64>,
    pub optimized_price: Option<Decimal>,
}

impl ProductDraft {
    pub fn new(name: impl Into<String>, cost_price: Decimal, selling_price: Decimal) -> Self {
        Self {
            name: name.into(),
            description: None,
            cost_price,
            selling_price,
            category: Category::default(),
            stock_available: 0,
            units_sold: 0,
            customer_rating: None,
            demand_forecast: None,
            optimized_price: None,
        }
    }

    pub fn with_category(mut self, category: Category) -> Self {
        self.category = category;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_stock(mut self, stock_available: u32, units_sold: u32) -> Self {
        self.stock_available = stock_available;
        self.units_sold = units_sold;
        self
    }

    /// Fill in the forecast and optimized price from stock, sales and price.
    pub fn with_forecast(mut self) -> Self {
        self.demand_forecast = Some(metrics::demand_forecast(self.stock_available, self.units_sold));
        self.optimized_price = Some(metrics::optimized_price(
            self.stock_available,
            self.units_sold,
            self.selling_price,
        ));
        self
    }

    pub fn validate(&self) -> Result<(), ApiError> {
        let mut errors = FieldErrors::default();
        if self.name.trim().is_empty() {
            errors.add("name", "Product name is required");
        }
        check_prices(&mut errors, Some(self.cost_price), Some(self.selling_price));
        errors.into_result()
    }
}

/// Fields to change on an existing product; `None` leaves a field alone.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProductPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost_price: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selling_price: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stock_available: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub units_sold: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_rating: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub demand_forecast: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub optimized_price: Option<Decimal>,
}

impl ProductPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Recompute forecast and optimized price for `current` with this patch applied.
    pub fn with_forecast(mut self, current: &Product) -> Self {
        let stock = self.stock_available.unwrap_or(current.stock_available);
        let sold = self.units_sold.unwrap_or(current.units_sold);
        let selling = self.selling_price.unwrap_or(current.selling_price);
        self.demand_forecast = Some(metrics::demand_forecast(stock, sold));
        self.optimized_price = Some(metrics::optimized_price(stock, sold, selling));
        self
    }

    /// Same rules as a draft, applied to the fields being changed.
    /// Price ordering is only checked when both prices are present.
    pub fn validate(&self) -> Result<(), ApiError> {
        let mut errors = FieldErrors::default();
        if matches!(&self.name, Some(name) if name.trim().is_empty()) {
            errors.add("name", "Product name is required");
        }
        check_prices(&mut errors, self.cost_price, self.selling_price);
        errors.into_result()
    }
}

/// Query filters for the product list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProductFilters {
    pub category: Option<Category>,
    pub search: Option<String>,
}

impl ProductFilters {
    pub fn category(mut self, category: Category) -> Self {
        self.category = Some(category);
        self
    }

    pub fn search(mut self, search: impl Into<String>) -> Self {
        self.search = Some(search.into());
        self
    }

    /// Parse a category filter where `all` means no filter.
    pub fn parse_category(value: &str) -> Result<Option<Category>, String> {
        if value.trim().eq_ignore_ascii_case("all") {
            Ok(None)
        } else {
            value.parse().map(Some)
        }
    }

    pub fn to_filters(&self) -> Filters {
        let mut filters = Filters::new();
        if let Some(category) = self.category {
            filters.insert("category".to_string(), category.as_str().to_string());
        }
        if let Some(search) = self.search.as_deref().map(str::trim) {
            if !search.is_empty() {
                filters.insert("search".to_string(), search.to_string());
            }
        }
        filters
    }
}

/// Field messages in the server's `{field: [message]}` shape.
#[derive(Default)]
struct FieldErrors(Map<String, Value>);

impl FieldErrors {
    /// Later messages for a field replace earlier ones.
    fn add(&mut self, field: &str, message: &str) {
        self.0
            .insert(field.to_string(), Value::Array(vec![Value::from(message)]));
    }

    fn into_result(self) -> Result<(), ApiError> {
        if self.0.is_empty() {
            return Ok(());
        }
        Err(ApiError::ValidationError {
            status: None,
            message: VALIDATION_FAILED.to_string(),
            fields: Some(Value::Object(self.0)),
        })
    }
}

fn check_prices(errors: &mut FieldErrors, cost: Option<Decimal>, selling: Option<Decimal>) {
    if matches!(cost, Some(c) if c <= Decimal::ZERO) {
        errors.add("cost_price", "Valid cost price is required");
    }
    if matches!(selling, Some(s) if s <= Decimal::ZERO) {
        errors.add("selling_price", "Valid selling price is required");
    }
    if let (Some(c), Some(s)) = (cost, selling) {
        if s <= c {
            errors.add("selling_price", "Selling price must be greater than cost price");
        }
    }
}
