//! # Facturio Gateway
//!
//! The HTTP trigger surface: a daily-run endpoint for the external
//! scheduler plus manual generation, reminder, send, and cancel
//! operations. Everything except the health probe sits behind the
//! configured bearer secret.

pub mod routes;
pub mod server;

pub use server::{build_router, start, AppState};
