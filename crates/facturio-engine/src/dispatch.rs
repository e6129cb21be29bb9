//! Dispatch worker — owns the send and cancel transitions of reminder
//! records, and the reused send path for freshly generated invoices.
//!
//! Attachment rendering is best-effort: a renderer failure is logged and
//! the send proceeds without the document. A transport failure leaves the
//! record in `Failed`, which is retryable until the attempt cap.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use facturio_core::error::{FacturioError, Result};
use facturio_core::model::{Invoice, InvoiceStatus, ReminderStatus};
use facturio_core::repo::{
    DocumentRenderer, InvoiceRepository, MailTransport, OutboundEmail, ReminderRepository,
    TemplateRepository,
};

/// Outcome of a successful send.
#[derive(Debug, Clone)]
pub struct DispatchReceipt {
    pub delivery_id: String,
    /// Attempt count after this send (reminder sends only; 1 for
    /// invoice sends).
    pub attempts: u32,
}

/// Sends one reminder or invoice email and records the state transition.
pub struct DispatchWorker {
    reminders: Arc<dyn ReminderRepository>,
    invoices: Arc<dyn InvoiceRepository>,
    templates: Arc<dyn TemplateRepository>,
    transport: Arc<dyn MailTransport>,
    renderer: Arc<dyn DocumentRenderer>,
    max_attempts: u32,
    send_timeout: Duration,
}

impl DispatchWorker {
    pub fn new(
        reminders: Arc<dyn ReminderRepository>,
        invoices: Arc<dyn InvoiceRepository>,
        templates: Arc<dyn TemplateRepository>,
        transport: Arc<dyn MailTransport>,
        renderer: Arc<dyn DocumentRenderer>,
        max_attempts: u32,
        send_timeout: Duration,
    ) -> Self {
        Self {
            reminders,
            invoices,
            templates,
            transport,
            renderer,
            max_attempts,
            send_timeout,
        }
    }

    /// Attempt cap this worker enforces.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Send one reminder. Preconditions checked in order, each a distinct
    /// rejection: not found, already sent, cancelled, attempt cap.
    pub async fn send(&self, reminder_id: &str, acting_user: &str) -> Result<DispatchReceipt> {
        let record = self
            .reminders
            .get(reminder_id)?
            .ok_or_else(|| FacturioError::NotFound(format!("reminder {reminder_id}")))?;

        match record.status {
            ReminderStatus::Sent => {
                return Err(FacturioError::Rejected("already sent".into()));
            }
            ReminderStatus::Cancelled => {
                return Err(FacturioError::Rejected("cancelled".into()));
            }
            _ => {}
        }
        if record.attempts >= self.max_attempts {
            return Err(FacturioError::Rejected(format!(
                "attempt limit reached ({} of {})",
                record.attempts, self.max_attempts
            )));
        }

        // Attach the source invoice document, best-effort.
        let invoice = self.invoices.get(&record.invoice_id)?;
        let attachment = invoice.as_ref().and_then(|inv| {
            match self.renderer.render_invoice(inv) {
                Ok(att) => Some(att),
                Err(e) => {
                    tracing::warn!(
                        "⚠️ Attachment render failed for invoice {} — sending without it: {e}",
                        inv.id
                    );
                    None
                }
            }
        });

        let email = OutboundEmail {
            to: record.recipients.clone(),
            subject: record.subject.clone(),
            body: record.body.clone(),
            attachment,
        };

        match self.deliver(&email).await {
            Ok(delivery_id) => {
                let now = Utc::now();
                self.reminders.mark_sent(reminder_id, now, acting_user)?;
                if let Some(template_id) = &record.template_id {
                    self.templates.increment_usage(template_id)?;
                }
                // First successful send flips a draft invoice to sent.
                if let Some(inv) = invoice {
                    if inv.status == InvoiceStatus::Draft {
                        self.invoices.set_status(&inv.id, InvoiceStatus::Sent)?;
                    }
                }
                tracing::info!(
                    "📤 Reminder {reminder_id} ({}) sent, delivery {delivery_id}",
                    record.stage.as_str()
                );
                Ok(DispatchReceipt {
                    delivery_id,
                    attempts: record.attempts + 1,
                })
            }
            Err(e) => {
                let reason = e.to_string();
                self.reminders.mark_failed(reminder_id, &reason)?;
                tracing::warn!("⚠️ Reminder {reminder_id} send failed: {reason}");
                Err(e)
            }
        }
    }

    /// Email a generated invoice to its client — the generator's optional
    /// post-step reuses this path instead of duplicating it. Flips a
    /// draft invoice to sent on success.
    pub async fn send_invoice(&self, invoice_id: &str, _acting_user: &str) -> Result<DispatchReceipt> {
        let invoice = self
            .invoices
            .get(invoice_id)?
            .ok_or_else(|| FacturioError::NotFound(format!("invoice {invoice_id}")))?;

        let attachment = match self.renderer.render_invoice(&invoice) {
            Ok(att) => Some(att),
            Err(e) => {
                tracing::warn!(
                    "⚠️ Attachment render failed for invoice {invoice_id} — sending without it: {e}"
                );
                None
            }
        };

        let email = OutboundEmail {
            to: vec![invoice.client_email.clone()],
            subject: format!("Facture {}", invoice.number),
            body: invoice_email_body(&invoice),
            attachment,
        };

        let delivery_id = self.deliver(&email).await?;
        if invoice.status == InvoiceStatus::Draft {
            self.invoices.set_status(invoice_id, InvoiceStatus::Sent)?;
        }
        tracing::info!("📤 Invoice {} emailed, delivery {delivery_id}", invoice.number);
        Ok(DispatchReceipt { delivery_id, attempts: 1 })
    }

    /// Cancel a planned/pending reminder. Idempotent: cancelling an
    /// already-cancelled record is a no-op. Records that have been
    /// dispatched (sent or failed) are rejected.
    pub fn cancel(&self, reminder_id: &str, reason: &str, acting_user: &str) -> Result<()> {
        let record = self
            .reminders
            .get(reminder_id)?
            .ok_or_else(|| FacturioError::NotFound(format!("reminder {reminder_id}")))?;

        match record.status {
            ReminderStatus::Cancelled => Ok(()),
            ReminderStatus::Planned | ReminderStatus::Pending => {
                self.reminders
                    .mark_cancelled(reminder_id, Utc::now(), reason, acting_user)?;
                tracing::info!("🚫 Reminder {reminder_id} cancelled by {acting_user}: {reason}");
                Ok(())
            }
            ReminderStatus::Sent => Err(FacturioError::Rejected("already sent".into())),
            ReminderStatus::Failed => Err(FacturioError::Rejected("already dispatched".into())),
        }
    }

    /// Transport call with the per-send timeout. A hung transport blocks
    /// this one dispatch only, never the rest of the batch.
    async fn deliver(&self, email: &OutboundEmail) -> Result<String> {
        match tokio::time::timeout(self.send_timeout, self.transport.send(email)).await {
            Ok(result) => result,
            Err(_) => Err(FacturioError::Transport(format!(
                "transport call timed out after {}s",
                self.send_timeout.as_secs()
            ))),
        }
    }
}

fn invoice_email_body(invoice: &Invoice) -> String {
    format!(
        "Bonjour {},\n\nVeuillez trouver ci-joint la facture {} d'un montant de {:.2}, \
         émise le {} et payable avant le {}.\n\nCordialement",
        invoice.client_name,
        invoice.number,
        facturio_core::model::round2(invoice.total),
        invoice.issue_date.format("%Y-%m-%d"),
        invoice.due_date.format("%Y-%m-%d"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{
        db_fixture, get_invoice, get_reminder, get_template_for, seed_invoice, seed_reminder,
        MockRenderer, MockTransport,
    };
    use facturio_core::model::EscalationStage;

    #[tokio::test]
    async fn test_send_then_flip_draft_invoice() {
        let (db, _dir) = db_fixture("dispatch-send");
        let invoice = seed_invoice(&db, InvoiceStatus::Draft, 500.0, "2025-01-01");
        let record = seed_reminder(&db, &invoice, EscalationStage::RelanceFerme, true);

        let transport = Arc::new(MockTransport::new(0));
        let worker = DispatchWorker::new(
            db.clone(),
            db.clone(),
            db.clone(),
            transport.clone(),
            Arc::new(MockRenderer::ok()),
            5,
            Duration::from_secs(5),
        );

        let receipt = worker.send(&record.id, "alice").await.unwrap();
        assert_eq!(receipt.attempts, 1);
        assert!(!receipt.delivery_id.is_empty());

        let sent = get_reminder(&db, &record.id);
        assert_eq!(sent.status, ReminderStatus::Sent);
        assert_eq!(sent.attempts, 1);
        assert_eq!(sent.validated_by.as_deref(), Some("alice"));

        // Draft invoice flipped to sent on first successful send.
        let inv = get_invoice(&db, &invoice.id);
        assert_eq!(inv.status, InvoiceStatus::Sent);

        // Template usage counter incremented.
        let tpl = get_template_for(&db, EscalationStage::RelanceFerme);
        assert_eq!(tpl.usage_count, 1);

        assert_eq!(transport.sent_count(), 1);
    }

    #[tokio::test]
    async fn test_failure_then_retry_succeeds() {
        // Scenario: transport fails once → record failed, attempts 1;
        // re-invoking the same id succeeds → sent, attempts 2.
        let (db, _dir) = db_fixture("dispatch-retry");
        let invoice = seed_invoice(&db, InvoiceStatus::Sent, 500.0, "2025-01-01");
        let record = seed_reminder(&db, &invoice, EscalationStage::RappelAmiable, true);

        let transport = Arc::new(MockTransport::new(1));
        let worker = DispatchWorker::new(
            db.clone(),
            db.clone(),
            db.clone(),
            transport,
            Arc::new(MockRenderer::ok()),
            5,
            Duration::from_secs(5),
        );

        let err = worker.send(&record.id, "scheduler").await.unwrap_err();
        assert!(matches!(err, FacturioError::Transport(_)));
        let failed = get_reminder(&db, &record.id);
        assert_eq!(failed.status, ReminderStatus::Failed);
        assert_eq!(failed.attempts, 1);
        assert!(failed.last_error.is_some());

        let receipt = worker.send(&record.id, "scheduler").await.unwrap();
        assert_eq!(receipt.attempts, 2);
        let sent = get_reminder(&db, &record.id);
        assert_eq!(sent.status, ReminderStatus::Sent);
        assert_eq!(sent.attempts, 2);
    }

    #[tokio::test]
    async fn test_precondition_rejections_in_order() {
        let (db, _dir) = db_fixture("dispatch-precond");
        let invoice = seed_invoice(&db, InvoiceStatus::Sent, 500.0, "2025-01-01");
        let worker = DispatchWorker::new(
            db.clone(),
            db.clone(),
            db.clone(),
            Arc::new(MockTransport::new(0)),
            Arc::new(MockRenderer::ok()),
            5,
            Duration::from_secs(5),
        );

        assert!(matches!(
            worker.send("no-such-id", "x").await.unwrap_err(),
            FacturioError::NotFound(_)
        ));

        let record = seed_reminder(&db, &invoice, EscalationStage::RappelAmiable, true);
        worker.send(&record.id, "x").await.unwrap();
        match worker.send(&record.id, "x").await.unwrap_err() {
            FacturioError::Rejected(reason) => assert_eq!(reason, "already sent"),
            other => panic!("unexpected: {other}"),
        }

        let record2 = seed_reminder(&db, &invoice, EscalationStage::RelanceFerme, true);
        worker.cancel(&record2.id, "client paid", "bob").unwrap();
        match worker.send(&record2.id, "x").await.unwrap_err() {
            FacturioError::Rejected(reason) => assert_eq!(reason, "cancelled"),
            other => panic!("unexpected: {other}"),
        }
    }

    #[tokio::test]
    async fn test_attempt_cap() {
        let (db, _dir) = db_fixture("dispatch-cap");
        let invoice = seed_invoice(&db, InvoiceStatus::Sent, 500.0, "2025-01-01");
        let record = seed_reminder(&db, &invoice, EscalationStage::RappelAmiable, true);

        let worker = DispatchWorker::new(
            db.clone(),
            db.clone(),
            db.clone(),
            Arc::new(MockTransport::new(u32::MAX)),
            Arc::new(MockRenderer::ok()),
            2,
            Duration::from_secs(5),
        );

        assert!(worker.send(&record.id, "x").await.is_err());
        assert!(worker.send(&record.id, "x").await.is_err());
        // Third call hits the cap before touching the transport.
        match worker.send(&record.id, "x").await.unwrap_err() {
            FacturioError::Rejected(reason) => assert!(reason.contains("attempt limit")),
            other => panic!("unexpected: {other}"),
        }
        let rec = get_reminder(&db, &record.id);
        assert_eq!(rec.attempts, 2);
    }

    #[tokio::test]
    async fn test_render_failure_is_best_effort() {
        let (db, _dir) = db_fixture("dispatch-render");
        let invoice = seed_invoice(&db, InvoiceStatus::Sent, 500.0, "2025-01-01");
        let record = seed_reminder(&db, &invoice, EscalationStage::RappelAmiable, true);

        let transport = Arc::new(MockTransport::new(0));
        let worker = DispatchWorker::new(
            db.clone(),
            db.clone(),
            db.clone(),
            transport.clone(),
            Arc::new(MockRenderer::failing()),
            5,
            Duration::from_secs(5),
        );

        worker.send(&record.id, "x").await.unwrap();
        assert_eq!(transport.sent_count(), 1);
        assert!(transport.last_had_attachment() == Some(false));
    }

    #[tokio::test]
    async fn test_cancel_idempotent() {
        let (db, _dir) = db_fixture("dispatch-cancel");
        let invoice = seed_invoice(&db, InvoiceStatus::Sent, 500.0, "2025-01-01");
        let record = seed_reminder(&db, &invoice, EscalationStage::MiseEnDemeure, false);

        let worker = DispatchWorker::new(
            db.clone(),
            db.clone(),
            db.clone(),
            Arc::new(MockTransport::new(0)),
            Arc::new(MockRenderer::ok()),
            5,
            Duration::from_secs(5),
        );

        worker.cancel(&record.id, "disputed", "carol").unwrap();
        let rec = get_reminder(&db, &record.id);
        assert_eq!(rec.status, ReminderStatus::Cancelled);
        assert_eq!(rec.cancel_reason.as_deref(), Some("disputed"));

        // Second cancel is a no-op, not an error.
        worker.cancel(&record.id, "again", "carol").unwrap();
        let rec = get_reminder(&db, &record.id);
        assert_eq!(rec.cancel_reason.as_deref(), Some("disputed"));
    }
}
