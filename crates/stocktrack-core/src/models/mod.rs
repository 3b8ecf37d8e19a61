//! Data models for the inventory API.
//!
//! - `Product`, `ProductDraft`, `ProductPatch`: the product collection's
//!   record and its create/update payloads
//! - `Category`, `ProductFilters`: list filtering
//! - Auth payloads: `LoginRequest`, `LoginResponse`, `RefreshRequest`, ...

pub mod auth;
pub mod product;

pub use auth::{LoginRequest, LoginResponse, RefreshRequest, RefreshResponse, RegisterRequest};
pub use product::{Category, Product, ProductDraft, ProductFilters, ProductPatch};
