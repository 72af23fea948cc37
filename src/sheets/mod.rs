//! Spreadsheet access: service-account auth plus a thin values client.

pub mod auth;
pub mod client;

pub use auth::TokenProvider;
pub use client::{a1, SheetsClient};
