//! Trait seams — per-entity repositories over the document store, plus
//! the mail transport and document renderer boundaries.
//!
//! The core logic never sees the store's native query shape; each entity
//! gets the narrow operations the engine needs and nothing else.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use crate::error::Result;
use crate::model::{
    Contract, EscalationStage, Invoice, InvoiceStatus, ReminderRecord, ReminderTemplate,
};

/// Contracts: point reads, active listing, billing-date advance.
pub trait ContractRepository: Send + Sync {
    fn get(&self, id: &str) -> Result<Option<Contract>>;
    fn list_active(&self) -> Result<Vec<Contract>>;
    fn insert(&self, contract: &Contract) -> Result<()>;
    /// Persist the post-generation date advance. Kept as a field-level
    /// update so a failure here leaves the rest of the contract intact
    /// and the contract retryable.
    fn advance_billing_dates(&self, id: &str, last: NaiveDate, next: NaiveDate) -> Result<()>;
}

/// Invoices: point reads, the idempotency-key existence check, the
/// outstanding-balance scan, and the status transitions the dispatch
/// worker owns.
pub trait InvoiceRepository: Send + Sync {
    fn get(&self, id: &str) -> Result<Option<Invoice>>;
    /// True when a generated invoice already exists for the
    /// (contract, billing period) idempotency key.
    fn exists_for_period(&self, contract_id: &str, period: NaiveDate) -> Result<bool>;
    fn insert(&self, invoice: &Invoice) -> Result<()>;
    /// Invoices with outstanding balance > 0, any status but Paid.
    fn list_outstanding(&self) -> Result<Vec<Invoice>>;
    fn set_status(&self, id: &str, status: InvoiceStatus) -> Result<()>;
}

/// Reminder templates: stage lookup and the usage counter.
pub trait TemplateRepository: Send + Sync {
    fn get(&self, id: &str) -> Result<Option<ReminderTemplate>>;
    fn get_for_stage(&self, stage: EscalationStage) -> Result<Option<ReminderTemplate>>;
    fn upsert(&self, template: &ReminderTemplate) -> Result<()>;
    fn increment_usage(&self, id: &str) -> Result<()>;
}

/// Reminder history: creation, the non-terminal uniqueness check, the
/// dispatchable scan, and the transitions owned by the dispatch worker.
pub trait ReminderRepository: Send + Sync {
    fn get(&self, id: &str) -> Result<Option<ReminderRecord>>;
    fn insert(&self, record: &ReminderRecord) -> Result<()>;
    /// True when a non-terminal record exists for (invoice, stage) —
    /// the duplicate-escalation guard.
    fn has_open_for(&self, invoice_id: &str, stage: EscalationStage) -> Result<bool>;
    /// Auto-sendable records awaiting dispatch: status Pending or a
    /// retryable Failed below `max_attempts`, auto_send set. Includes
    /// records from prior runs; capped records drop out of the queue.
    fn list_dispatchable(&self, max_attempts: u32) -> Result<Vec<ReminderRecord>>;
    fn mark_sent(&self, id: &str, at: DateTime<Utc>, validated_by: &str) -> Result<()>;
    fn mark_failed(&self, id: &str, error: &str) -> Result<()>;
    fn mark_cancelled(
        &self,
        id: &str,
        at: DateTime<Utc>,
        reason: &str,
        cancelled_by: &str,
    ) -> Result<()>;
}

/// An addressed outbound message with an optional attachment.
#[derive(Debug, Clone)]
pub struct OutboundEmail {
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
    pub attachment: Option<EmailAttachment>,
}

/// Binary attachment produced by the document renderer.
#[derive(Debug, Clone)]
pub struct EmailAttachment {
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Mail transport boundary. Returns a delivery identifier on success.
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, message: &OutboundEmail) -> Result<String>;
}

/// Document renderer boundary — opaque to the core: given an invoice
/// model, returns attachment bytes.
pub trait DocumentRenderer: Send + Sync {
    fn render_invoice(&self, invoice: &Invoice) -> Result<EmailAttachment>;
}
