//! Domain model — contracts, invoices, reminder templates, and the
//! reminder history, as closed enumerations and serde structs.
//!
//! Stage, frequency, and status values are tagged enums rather than the
//! free-form strings of the original system, so invalid-string states do
//! not exist and the escalation policy / calendar engine can match
//! exhaustively.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{FacturioError, Result};

/// Round to two decimals — applied at boundaries (totals, JSON output)
/// only; intermediate arithmetic stays unrounded.
pub fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

// ─── Contracts ──────────────────────────────────────────────

/// Billing cadence of a contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingFrequency {
    Weekly,
    BiWeekly,
    Monthly,
    BiMonthly,
    Quarterly,
    FourMonthly,
    SemiAnnual,
    Annual,
    /// Cadence given by an explicit [`CustomCycle`] on the contract.
    Custom,
}

impl BillingFrequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Weekly => "weekly",
            Self::BiWeekly => "bi_weekly",
            Self::Monthly => "monthly",
            Self::BiMonthly => "bi_monthly",
            Self::Quarterly => "quarterly",
            Self::FourMonthly => "four_monthly",
            Self::SemiAnnual => "semi_annual",
            Self::Annual => "annual",
            Self::Custom => "custom",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "weekly" => Ok(Self::Weekly),
            "bi_weekly" => Ok(Self::BiWeekly),
            "monthly" => Ok(Self::Monthly),
            "bi_monthly" => Ok(Self::BiMonthly),
            "quarterly" => Ok(Self::Quarterly),
            "four_monthly" => Ok(Self::FourMonthly),
            "semi_annual" => Ok(Self::SemiAnnual),
            "annual" => Ok(Self::Annual),
            "custom" => Ok(Self::Custom),
            other => Err(FacturioError::Validation(format!(
                "unknown billing frequency '{other}'"
            ))),
        }
    }
}

/// Cycle definition for `BillingFrequency::Custom`.
/// Exactly one of `months` / `days` must be set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct CustomCycle {
    #[serde(default)]
    pub months: Option<u32>,
    #[serde(default)]
    pub days: Option<u32>,
}

/// A recurring service contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contract {
    pub id: String,
    pub client_name: String,
    pub client_email: String,
    /// Description of the recurring line on generated invoices.
    pub label: String,
    pub frequency: BillingFrequency,
    #[serde(default)]
    pub custom_cycle: Option<CustomCycle>,
    /// Day-of-month the billing anchors to (month-unit frequencies).
    pub billing_day: u32,
    /// Recurring line amount, decimal currency units.
    pub amount: f64,
    pub currency: String,
    #[serde(default)]
    pub last_billing_date: Option<NaiveDate>,
    /// Next scheduled generation date. Never None while `active`.
    #[serde(default)]
    pub next_billing_date: Option<NaiveDate>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

// ─── Invoices ───────────────────────────────────────────────

/// Invoice lifecycle status. `Paid` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Draft,
    Sent,
    Paid,
    PartiallyPaid,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Sent => "sent",
            Self::Paid => "paid",
            Self::PartiallyPaid => "partially_paid",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "draft" => Ok(Self::Draft),
            "sent" => Ok(Self::Sent),
            "paid" => Ok(Self::Paid),
            "partially_paid" => Ok(Self::PartiallyPaid),
            other => Err(FacturioError::Validation(format!(
                "unknown invoice status '{other}'"
            ))),
        }
    }
}

/// One invoice line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceLine {
    pub description: String,
    pub quantity: f64,
    pub unit_price: f64,
}

impl InvoiceLine {
    pub fn amount(&self) -> f64 {
        self.quantity * self.unit_price
    }
}

/// An invoice, generated from a contract or created ad hoc.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invoice {
    pub id: String,
    pub number: String,
    /// None for ad-hoc invoices.
    #[serde(default)]
    pub contract_id: Option<String>,
    pub client_name: String,
    pub client_email: String,
    pub issue_date: NaiveDate,
    pub due_date: NaiveDate,
    pub lines: Vec<InvoiceLine>,
    pub total: f64,
    /// Amount minus recorded payments; drives escalation eligibility.
    pub outstanding: f64,
    pub status: InvoiceStatus,
    /// Scheduled billing date this invoice covers — half of the
    /// (contract, period) idempotency key. None for ad-hoc invoices.
    #[serde(default)]
    pub billing_period: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
}

impl Invoice {
    /// Days overdue relative to `today` (negative when not yet due).
    pub fn days_overdue(&self, today: NaiveDate) -> i64 {
        (today - self.due_date).num_days()
    }
}

// ─── Escalation stages & templates ──────────────────────────

/// Collection-reminder stage, ordered by severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationStage {
    RappelAmiable,
    RelanceFerme,
    MiseEnDemeure,
    Contentieux,
}

impl EscalationStage {
    pub const ALL: [EscalationStage; 4] = [
        Self::RappelAmiable,
        Self::RelanceFerme,
        Self::MiseEnDemeure,
        Self::Contentieux,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RappelAmiable => "rappel_amiable",
            Self::RelanceFerme => "relance_ferme",
            Self::MiseEnDemeure => "mise_en_demeure",
            Self::Contentieux => "contentieux",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "rappel_amiable" => Ok(Self::RappelAmiable),
            "relance_ferme" => Ok(Self::RelanceFerme),
            "mise_en_demeure" => Ok(Self::MiseEnDemeure),
            "contentieux" => Ok(Self::Contentieux),
            other => Err(FacturioError::Validation(format!(
                "unknown escalation stage '{other}'"
            ))),
        }
    }
}

/// Reminder body template for one stage. Immutable except for
/// `usage_count`, which only the dispatch worker increments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReminderTemplate {
    pub id: String,
    pub stage: EscalationStage,
    pub subject: String,
    pub body: String,
    pub usage_count: u32,
}

impl ReminderTemplate {
    /// Substitute `{{placeholder}}` markers with invoice values.
    /// Supported: client, invoice_number, amount, due_date, days_overdue.
    pub fn render(&self, invoice: &Invoice, days_overdue: i64) -> (String, String) {
        let fill = |text: &str| {
            text.replace("{{client}}", &invoice.client_name)
                .replace("{{invoice_number}}", &invoice.number)
                .replace("{{amount}}", &format!("{:.2}", round2(invoice.outstanding)))
                .replace("{{due_date}}", &invoice.due_date.format("%Y-%m-%d").to_string())
                .replace("{{days_overdue}}", &days_overdue.to_string())
        };
        (fill(&self.subject), fill(&self.body))
    }
}

// ─── Reminder history ───────────────────────────────────────

/// Reminder record status. Terminal: `Sent`, `Cancelled`.
/// `Failed` stays retryable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReminderStatus {
    /// Created, requires manual validation before sending.
    Planned,
    /// Created and auto-sendable; awaiting dispatch.
    Pending,
    Sent,
    Cancelled,
    Failed,
}

impl ReminderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Sent | Self::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Planned => "planned",
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "planned" => Ok(Self::Planned),
            "pending" => Ok(Self::Pending),
            "sent" => Ok(Self::Sent),
            "cancelled" => Ok(Self::Cancelled),
            "failed" => Ok(Self::Failed),
            other => Err(FacturioError::Validation(format!(
                "unknown reminder status '{other}'"
            ))),
        }
    }
}

/// One entry of the reminder history. Created by the orchestrator;
/// state transitions owned by the dispatch worker (send path) or the
/// explicit cancel operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReminderRecord {
    pub id: String,
    pub invoice_id: String,
    pub recipients: Vec<String>,
    pub stage: EscalationStage,
    pub template_id: Option<String>,
    pub subject: String,
    pub body: String,
    pub status: ReminderStatus,
    pub attempts: u32,
    #[serde(default)]
    pub last_error: Option<String>,
    /// Eligible for dispatch without human validation.
    pub auto_send: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub sent_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub cancelled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub cancel_reason: Option<String>,
    /// User who validated/triggered the send, or "scheduler".
    #[serde(default)]
    pub validated_by: Option<String>,
}

impl ReminderRecord {
    /// New record for an invoice/stage pair, rendered from a template.
    pub fn new(
        invoice: &Invoice,
        stage: EscalationStage,
        template: &ReminderTemplate,
        days_overdue: i64,
        auto_send: bool,
    ) -> Self {
        let (subject, body) = template.render(invoice, days_overdue);
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            invoice_id: invoice.id.clone(),
            recipients: vec![invoice.client_email.clone()],
            stage,
            template_id: Some(template.id.clone()),
            subject,
            body,
            status: if auto_send {
                ReminderStatus::Pending
            } else {
                ReminderStatus::Planned
            },
            attempts: 0,
            last_error: None,
            auto_send,
            created_at: Utc::now(),
            sent_at: None,
            cancelled_at: None,
            cancel_reason: None,
            validated_by: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn invoice() -> Invoice {
        Invoice {
            id: "inv-1".into(),
            number: "FAC-2025-0001".into(),
            contract_id: None,
            client_name: "Acme".into(),
            client_email: "billing@acme.test".into(),
            issue_date: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            due_date: NaiveDate::from_ymd_opt(2025, 1, 31).unwrap(),
            lines: vec![],
            total: 1000.0,
            outstanding: 500.505,
            status: InvoiceStatus::Sent,
            billing_period: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_template_render() {
        let tpl = ReminderTemplate {
            id: "tpl-1".into(),
            stage: EscalationStage::RappelAmiable,
            subject: "Reminder {{invoice_number}}".into(),
            body: "{{client}}: {{amount}} due since {{due_date}} ({{days_overdue}} days)".into(),
            usage_count: 0,
        };
        let (subject, body) = tpl.render(&invoice(), 12);
        assert_eq!(subject, "Reminder FAC-2025-0001");
        assert_eq!(body, "Acme: 500.51 due since 2025-01-31 (12 days)");
    }

    #[test]
    fn test_stage_severity_order() {
        assert!(EscalationStage::RappelAmiable < EscalationStage::RelanceFerme);
        assert!(EscalationStage::RelanceFerme < EscalationStage::MiseEnDemeure);
        assert!(EscalationStage::MiseEnDemeure < EscalationStage::Contentieux);
    }

    #[test]
    fn test_status_terminality() {
        assert!(ReminderStatus::Sent.is_terminal());
        assert!(ReminderStatus::Cancelled.is_terminal());
        assert!(!ReminderStatus::Failed.is_terminal());
        assert!(!ReminderStatus::Planned.is_terminal());
    }

    #[test]
    fn test_enum_string_roundtrip() {
        for stage in EscalationStage::ALL {
            assert_eq!(EscalationStage::parse(stage.as_str()).unwrap(), stage);
        }
        assert!(EscalationStage::parse("friendly_nudge").is_err());
        assert_eq!(
            BillingFrequency::parse("four_monthly").unwrap(),
            BillingFrequency::FourMonthly
        );
    }
}
