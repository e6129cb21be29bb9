//! # Facturio Engine
//!
//! The stateful heart of the billing service, leaves first:
//!
//! ```text
//! calendar   — pure date arithmetic (next occurrence, clamping)
//! escalation — pure (days overdue, settings) → stage mapping
//! billing    — invoice generation with the (contract, period)
//!              idempotency guard
//! reminders  — overdue scan → reminder records, duplicate-stage guard
//! dispatch   — send/cancel of one reminder, state transitions
//! run        — the daily entry point: gate → generate → escalate →
//!              dispatch → summary
//! ```
//!
//! All storage access goes through the facturio-core repository traits,
//! so the engine is testable against any store.

pub mod billing;
pub mod calendar;
pub mod dispatch;
pub mod escalation;
pub mod reminders;
pub mod run;
#[cfg(test)]
pub(crate) mod testkit;

pub use billing::{BillingCycleGenerator, GenerationOutcome, GenerationRequest};
pub use dispatch::{DispatchReceipt, DispatchWorker};
pub use escalation::{auto_sendable, stage_for, EscalationSettings};
pub use reminders::{ReminderBatch, ReminderOrchestrator};
pub use run::{DailyRunner, RunFailure, RunSettings, RunSummary};
