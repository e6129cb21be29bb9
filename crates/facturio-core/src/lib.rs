//! # Facturio Core
//!
//! Shared foundation for the Facturio billing service: configuration,
//! the error type, the domain model (contracts, invoices, reminder
//! templates, reminder history), and the trait seams behind which the
//! document store, document renderer, and mail transport live.

pub mod config;
pub mod error;
pub mod model;
pub mod repo;

pub use config::FacturioConfig;
pub use error::{FacturioError, Result};
