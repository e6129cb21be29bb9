//! # Facturio Store
//!
//! SQLite persistence for contracts, invoices, reminder templates, and
//! the reminder history. One [`BillingDb`] handle implements every
//! repository trait of facturio-core, so callers wire a single
//! `Arc<BillingDb>` into the engine.

pub mod sqlite;

pub use sqlite::BillingDb;
