//! Marketplace Seller API: one client per cabinet, paginated fetchers for
//! the finance, product and pricing endpoints, and the price-push call.

pub mod client;
pub mod finance;
pub mod products;

pub use client::{SellerAccount, SellerClient};
