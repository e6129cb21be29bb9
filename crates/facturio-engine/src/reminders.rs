//! Reminder orchestrator — scans outstanding invoices and materializes
//! the reminder records the escalation policy calls for.
//!
//! One invoice failing (missing template, storage error) never aborts
//! the batch; the failure lands in the batch report and the scan moves
//! on.

use std::sync::Arc;

use chrono::NaiveDate;

use facturio_core::error::{FacturioError, Result};
use facturio_core::model::{Invoice, ReminderRecord, ReminderStatus};
use facturio_core::repo::{InvoiceRepository, ReminderRepository, TemplateRepository};

use crate::escalation::{auto_sendable, stage_for, EscalationSettings};

/// Outcome of one orchestration pass.
#[derive(Debug, Clone, Default)]
pub struct ReminderBatch {
    /// Records created this pass, auto-sendable and manual alike.
    pub created: Vec<ReminderRecord>,
    /// Ids of created records awaiting manual validation.
    pub pending_validation: Vec<String>,
    /// Invoices skipped: below threshold or already escalated at stage.
    pub skipped: usize,
    /// Per-invoice failures (invoice id, error text).
    pub failures: Vec<(String, String)>,
}

/// Creates reminder records for overdue invoices, one non-terminal
/// record per (invoice, stage).
pub struct ReminderOrchestrator {
    invoices: Arc<dyn InvoiceRepository>,
    templates: Arc<dyn TemplateRepository>,
    reminders: Arc<dyn ReminderRepository>,
}

impl ReminderOrchestrator {
    pub fn new(
        invoices: Arc<dyn InvoiceRepository>,
        templates: Arc<dyn TemplateRepository>,
        reminders: Arc<dyn ReminderRepository>,
    ) -> Self {
        Self {
            invoices,
            templates,
            reminders,
        }
    }

    /// Scan every invoice with an outstanding balance and create the
    /// stage-appropriate reminder for each one strictly past due.
    pub fn generate(&self, today: NaiveDate, settings: &EscalationSettings) -> Result<ReminderBatch> {
        let mut batch = ReminderBatch::default();

        for invoice in self.invoices.list_outstanding()? {
            if invoice.due_date >= today {
                batch.skipped += 1;
                continue;
            }
            match self.escalate(&invoice, today, settings) {
                Ok(Some(record)) => {
                    if record.status == ReminderStatus::Planned {
                        batch.pending_validation.push(record.id.clone());
                    }
                    batch.created.push(record);
                }
                Ok(None) => batch.skipped += 1,
                Err(e) => {
                    tracing::warn!("⚠️ Reminder creation failed for invoice {}: {e}", invoice.id);
                    batch.failures.push((invoice.id.clone(), e.to_string()));
                }
            }
        }

        tracing::info!(
            "📋 Reminder pass: {} created ({} manual), {} skipped, {} failed",
            batch.created.len(),
            batch.pending_validation.len(),
            batch.skipped,
            batch.failures.len()
        );
        Ok(batch)
    }

    /// One invoice: resolve the stage, apply the duplicate guard, render
    /// and persist. None means nothing to do (no threshold crossed, or an
    /// open record already covers the stage).
    fn escalate(
        &self,
        invoice: &Invoice,
        today: NaiveDate,
        settings: &EscalationSettings,
    ) -> Result<Option<ReminderRecord>> {
        let days_overdue = invoice.days_overdue(today);
        let stage = match stage_for(days_overdue, settings) {
            Some(s) => s,
            None => return Ok(None),
        };
        if self.reminders.has_open_for(&invoice.id, stage)? {
            return Ok(None);
        }

        let template = self.templates.get_for_stage(stage)?.ok_or_else(|| {
            FacturioError::NotFound(format!("no template for stage {}", stage.as_str()))
        })?;
        let record = ReminderRecord::new(
            invoice,
            stage,
            &template,
            days_overdue,
            auto_sendable(stage, settings),
        );
        self.reminders.insert(&record)?;
        tracing::info!(
            "📨 Reminder {} ({}) created for invoice {} ({days_overdue} days overdue)",
            record.id,
            stage.as_str(),
            invoice.number
        );
        Ok(Some(record))
    }
}
