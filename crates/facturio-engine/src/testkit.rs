//! Shared fixtures for engine tests: a temp-dir SQLite store, seed
//! helpers, and mock transport/renderer implementations.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};

use facturio_core::error::{FacturioError, Result};
use facturio_core::model::{
    BillingFrequency, Contract, EscalationStage, Invoice, InvoiceLine, InvoiceStatus,
    ReminderRecord, ReminderTemplate,
};
use facturio_core::repo::{
    ContractRepository, DocumentRenderer, EmailAttachment, InvoiceRepository, MailTransport,
    OutboundEmail, ReminderRepository, TemplateRepository,
};
use facturio_store::BillingDb;

/// Temp directory removed on drop.
pub struct TestDir(pub PathBuf);

impl Drop for TestDir {
    fn drop(&mut self) {
        std::fs::remove_dir_all(&self.0).ok();
    }
}

/// Open a fresh store under a unique temp directory.
pub fn db_fixture(tag: &str) -> (Arc<BillingDb>, TestDir) {
    let dir = std::env::temp_dir().join(format!(
        "facturio-test-{tag}-{}",
        uuid::Uuid::new_v4().simple()
    ));
    std::fs::create_dir_all(&dir).unwrap();
    let db = BillingDb::open(&dir.join("billing.db")).unwrap();
    (Arc::new(db), TestDir(dir))
}

pub fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

pub fn seed_contract(
    db: &BillingDb,
    frequency: BillingFrequency,
    billing_day: u32,
    amount: f64,
    last_billed: Option<&str>,
    next_billing: &str,
) -> Contract {
    let contract = Contract {
        id: uuid::Uuid::new_v4().to_string(),
        client_name: "Acme SARL".into(),
        client_email: "compta@acme.test".into(),
        label: "Maintenance mensuelle".into(),
        frequency,
        custom_cycle: None,
        billing_day,
        amount,
        currency: "EUR".into(),
        last_billing_date: last_billed.map(date),
        next_billing_date: Some(date(next_billing)),
        active: true,
        created_at: Utc::now(),
    };
    ContractRepository::insert(db, &contract).unwrap();
    contract
}

pub fn seed_invoice(
    db: &BillingDb,
    status: InvoiceStatus,
    outstanding: f64,
    due_date: &str,
) -> Invoice {
    let invoice = Invoice {
        id: uuid::Uuid::new_v4().to_string(),
        number: format!("FAC-TEST-{}", uuid::Uuid::new_v4().simple()),
        contract_id: None,
        client_name: "Acme SARL".into(),
        client_email: "compta@acme.test".into(),
        issue_date: date(due_date),
        due_date: date(due_date),
        lines: vec![InvoiceLine {
            description: "Prestation".into(),
            quantity: 1.0,
            unit_price: outstanding,
        }],
        total: outstanding,
        outstanding,
        status,
        billing_period: None,
        created_at: Utc::now(),
    };
    InvoiceRepository::insert(db, &invoice).unwrap();
    invoice
}

pub fn seed_reminder(
    db: &BillingDb,
    invoice: &Invoice,
    stage: EscalationStage,
    auto_send: bool,
) -> ReminderRecord {
    let template = db.get_for_stage(stage).unwrap().expect("seeded template");
    let record = ReminderRecord::new(invoice, stage, &template, 10, auto_send);
    ReminderRepository::insert(db, &record).unwrap();
    record
}

pub fn get_reminder(db: &BillingDb, id: &str) -> ReminderRecord {
    ReminderRepository::get(db, id).unwrap().expect("reminder exists")
}

pub fn get_invoice(db: &BillingDb, id: &str) -> Invoice {
    InvoiceRepository::get(db, id).unwrap().expect("invoice exists")
}

pub fn get_contract(db: &BillingDb, id: &str) -> Contract {
    ContractRepository::get(db, id).unwrap().expect("contract exists")
}

pub fn get_template_for(db: &BillingDb, stage: EscalationStage) -> ReminderTemplate {
    db.get_for_stage(stage).unwrap().expect("seeded template")
}

/// Mail transport mock: fails the first `failures` sends, then succeeds
/// with sequential delivery ids.
pub struct MockTransport {
    failures: AtomicU32,
    counter: AtomicU32,
    sent: Mutex<Vec<OutboundEmail>>,
}

impl MockTransport {
    pub fn new(failures: u32) -> Self {
        Self {
            failures: AtomicU32::new(failures),
            counter: AtomicU32::new(0),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn last_had_attachment(&self) -> Option<bool> {
        self.sent.lock().unwrap().last().map(|m| m.attachment.is_some())
    }
}

#[async_trait]
impl MailTransport for MockTransport {
    async fn send(&self, message: &OutboundEmail) -> Result<String> {
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            if remaining != u32::MAX {
                self.failures.fetch_sub(1, Ordering::SeqCst);
            }
            return Err(FacturioError::Transport("mock transport failure".into()));
        }
        self.sent.lock().unwrap().push(message.clone());
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("mock-delivery-{n}"))
    }
}

/// Renderer mock: either a fixed plain-text document or a render error.
pub struct MockRenderer {
    fail: bool,
}

impl MockRenderer {
    pub fn ok() -> Self {
        Self { fail: false }
    }

    pub fn failing() -> Self {
        Self { fail: true }
    }
}

impl DocumentRenderer for MockRenderer {
    fn render_invoice(&self, invoice: &Invoice) -> Result<EmailAttachment> {
        if self.fail {
            return Err(FacturioError::Render("mock render failure".into()));
        }
        Ok(EmailAttachment {
            filename: format!("{}.txt", invoice.number),
            content_type: "text/plain".into(),
            bytes: format!("invoice {}", invoice.number).into_bytes(),
        })
    }
}
