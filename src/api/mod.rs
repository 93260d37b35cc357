//! HTTP surface: webhook intake, result reporting, bulk uploads.

pub mod endpoints;
pub mod error;
pub mod router;
pub mod types;

pub use router::api_router;
pub use types::ApiContext;
