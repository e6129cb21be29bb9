//! Billing cycle generator — turns a due contract into a persisted
//! invoice and advances the contract's billing dates.
//!
//! The (contract, billing period) pair is the idempotency key: a second
//! generation for the same period is reported as `AlreadyGenerated`, not
//! an error and not a duplicate. The invoice is committed before the
//! date advance, so a failed advance leaves the contract retryable
//! without ever producing a second invoice for the period.

use std::sync::Arc;

use chrono::{Duration, NaiveDate, Utc};

use facturio_core::error::{FacturioError, Result};
use facturio_core::model::{round2, Contract, Invoice, InvoiceLine, InvoiceStatus};
use facturio_core::repo::{ContractRepository, InvoiceRepository};

use crate::calendar::next_occurrence;
use crate::dispatch::DispatchWorker;

/// One generation attempt for one contract.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub contract_id: String,
    /// Issue date of the generated invoice; "today" for scheduled runs.
    pub reference_date: NaiveDate,
    /// Override of the period key (manual generation only).
    pub billing_date: Option<NaiveDate>,
    /// Bypass the not-due and already-generated guards.
    pub force: bool,
    /// One-off extra line added alongside the recurring line.
    pub adjustment: Option<InvoiceLine>,
    /// Email the invoice document to the client after persisting.
    pub send_email: bool,
    /// Flip the invoice Draft → Sent without emailing.
    pub auto_validate: bool,
}

impl GenerationRequest {
    /// Plain scheduled generation: no overrides, no post-steps.
    pub fn scheduled(contract_id: &str, reference_date: NaiveDate) -> Self {
        Self {
            contract_id: contract_id.to_string(),
            reference_date,
            billing_date: None,
            force: false,
            adjustment: None,
            send_email: false,
            auto_validate: false,
        }
    }
}

/// What one generation attempt produced.
#[derive(Debug, Clone)]
pub enum GenerationOutcome {
    Generated(GeneratedInvoice),
    /// An invoice for this (contract, period) already exists.
    AlreadyGenerated {
        contract_id: String,
        period: NaiveDate,
    },
    /// The contract's next billing date is still in the future.
    NotDue {
        contract_id: String,
        next_due: NaiveDate,
    },
}

#[derive(Debug, Clone)]
pub struct GeneratedInvoice {
    pub invoice_id: String,
    pub number: String,
    pub total: f64,
    /// None when the date advance failed (contract left retryable).
    pub next_billing_date: Option<NaiveDate>,
    /// Audit trail of the side steps taken (or skipped) on the way.
    pub actions: Vec<String>,
}

/// Generates invoices from contracts. Post-steps (emailing, validation)
/// reuse the dispatch worker when one is wired in.
pub struct BillingCycleGenerator {
    contracts: Arc<dyn ContractRepository>,
    invoices: Arc<dyn InvoiceRepository>,
    dispatch: Option<Arc<DispatchWorker>>,
    due_days: i64,
    invoice_prefix: String,
}

impl BillingCycleGenerator {
    pub fn new(
        contracts: Arc<dyn ContractRepository>,
        invoices: Arc<dyn InvoiceRepository>,
        dispatch: Option<Arc<DispatchWorker>>,
        due_days: i64,
        invoice_prefix: &str,
    ) -> Self {
        Self {
            contracts,
            invoices,
            dispatch,
            due_days,
            invoice_prefix: invoice_prefix.to_string(),
        }
    }

    /// Run one generation attempt. Guards are reported outcomes, never
    /// errors; only validation and storage problems surface as `Err`.
    pub async fn generate(&self, request: &GenerationRequest) -> Result<GenerationOutcome> {
        let contract = self
            .contracts
            .get(&request.contract_id)?
            .ok_or_else(|| FacturioError::NotFound(format!("contract {}", request.contract_id)))?;
        if !contract.active {
            return Err(FacturioError::Rejected(format!(
                "contract {} is inactive",
                contract.id
            )));
        }

        let period = match request.billing_date.or(contract.next_billing_date) {
            Some(d) => d,
            None => {
                return Err(FacturioError::Validation(format!(
                    "contract {} has no next billing date",
                    contract.id
                )));
            }
        };

        // A forced duplicate of an already-invoiced period is stored
        // without the period key, keeping one schedule-generated invoice
        // per period.
        let mut period_key = Some(period);
        if !request.force {
            if period > request.reference_date {
                return Ok(GenerationOutcome::NotDue {
                    contract_id: contract.id,
                    next_due: period,
                });
            }
            if self.invoices.exists_for_period(&contract.id, period)? {
                tracing::info!(
                    "📅 Contract {} already invoiced for period {period}, skipping",
                    contract.id
                );
                return Ok(GenerationOutcome::AlreadyGenerated {
                    contract_id: contract.id,
                    period,
                });
            }
        } else if self.invoices.exists_for_period(&contract.id, period)? {
            period_key = None;
        }

        let invoice = self.build_invoice(&contract, period_key, request);
        self.invoices.insert(&invoice)?;
        let mut actions = vec![format!("invoice {} persisted", invoice.number)];
        tracing::info!(
            "✅ Invoice {} generated for contract {} (period {period}, total {:.2})",
            invoice.number,
            contract.id,
            invoice.total
        );

        // Advance after the invoice is committed. A failure here leaves
        // the contract pointing at the same period; the idempotency
        // guard absorbs the retry.
        let next_billing_date = match self.advance_contract(&contract, period) {
            Ok(next) => {
                actions.push(format!("next billing date advanced to {next}"));
                Some(next)
            }
            Err(e) => {
                tracing::warn!(
                    "⚠️ Date advance failed for contract {} — invoice {} stays committed, \
                     contract retryable: {e}",
                    contract.id,
                    invoice.number
                );
                actions.push(format!("date advance failed: {e}"));
                None
            }
        };

        if request.send_email {
            match &self.dispatch {
                Some(worker) => match worker.send_invoice(&invoice.id, "generator").await {
                    Ok(receipt) => {
                        actions.push(format!("invoice emailed, delivery {}", receipt.delivery_id));
                    }
                    Err(e) => actions.push(format!("invoice email failed: {e}")),
                },
                None => actions.push("invoice email skipped: no transport configured".into()),
            }
        } else if request.auto_validate {
            self.invoices.set_status(&invoice.id, InvoiceStatus::Sent)?;
            actions.push("invoice validated (draft → sent)".into());
        }

        Ok(GenerationOutcome::Generated(GeneratedInvoice {
            invoice_id: invoice.id,
            number: invoice.number,
            total: invoice.total,
            next_billing_date,
            actions,
        }))
    }

    fn build_invoice(
        &self,
        contract: &Contract,
        period_key: Option<NaiveDate>,
        request: &GenerationRequest,
    ) -> Invoice {
        let mut lines = vec![InvoiceLine {
            description: contract.label.clone(),
            quantity: 1.0,
            unit_price: contract.amount,
        }];
        if let Some(extra) = &request.adjustment {
            lines.push(extra.clone());
        }
        let total = round2(lines.iter().map(InvoiceLine::amount).sum());

        let id = uuid::Uuid::new_v4().to_string();
        let number = format!(
            "{}-{}-{}",
            self.invoice_prefix,
            request.reference_date.format("%Y"),
            &id[..8].to_uppercase()
        );
        Invoice {
            id,
            number,
            contract_id: Some(contract.id.clone()),
            client_name: contract.client_name.clone(),
            client_email: contract.client_email.clone(),
            issue_date: request.reference_date,
            due_date: request.reference_date + Duration::days(self.due_days),
            lines,
            total,
            outstanding: total,
            status: InvoiceStatus::Draft,
            billing_period: period_key,
            created_at: Utc::now(),
        }
    }

    fn advance_contract(&self, contract: &Contract, period: NaiveDate) -> Result<NaiveDate> {
        let next = next_occurrence(
            period,
            contract.frequency,
            contract.billing_day,
            contract.custom_cycle.as_ref(),
        )?;
        self.contracts
            .advance_billing_dates(&contract.id, period, next)?;
        Ok(next)
    }
}
