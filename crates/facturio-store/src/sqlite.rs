//! SQLite-backed store for all billing data. Business dates persist as
//! `YYYY-MM-DD` TEXT, timestamps as RFC 3339 TEXT, and nested values
//! (invoice lines, recipients, custom cycles) as JSON TEXT columns.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{Connection, OptionalExtension, Row};

use facturio_core::error::{FacturioError, Result};
use facturio_core::model::{
    Contract, CustomCycle, EscalationStage, Invoice, InvoiceLine, InvoiceStatus, ReminderRecord,
    ReminderStatus, ReminderTemplate,
};
use facturio_core::repo::{
    ContractRepository, InvoiceRepository, ReminderRepository, TemplateRepository,
};

/// The billing database. One handle implements every repository trait.
pub struct BillingDb {
    conn: Mutex<Connection>,
}

impl BillingDb {
    /// Open or create the database, run migrations, seed the default
    /// reminder templates.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(storage("open database"))?;
        let db = Self { conn: Mutex::new(conn) };
        db.migrate()?;
        db.ensure_default_templates()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<()> {
        self.lock()?
            .execute_batch(
                "
            CREATE TABLE IF NOT EXISTS contracts (
                id TEXT PRIMARY KEY,
                client_name TEXT NOT NULL,
                client_email TEXT NOT NULL,
                label TEXT NOT NULL,
                frequency TEXT NOT NULL,
                custom_cycle TEXT,               -- JSON, custom frequency only
                billing_day INTEGER NOT NULL DEFAULT 0,
                amount REAL NOT NULL,
                currency TEXT NOT NULL DEFAULT 'EUR',
                last_billing_date TEXT,
                next_billing_date TEXT,
                active INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS invoices (
                id TEXT PRIMARY KEY,
                number TEXT NOT NULL,
                contract_id TEXT,                -- NULL for ad-hoc invoices
                client_name TEXT NOT NULL,
                client_email TEXT NOT NULL,
                issue_date TEXT NOT NULL,
                due_date TEXT NOT NULL,
                lines TEXT NOT NULL,             -- JSON array
                total REAL NOT NULL,
                outstanding REAL NOT NULL,
                status TEXT NOT NULL DEFAULT 'draft',
                billing_period TEXT,             -- idempotency key with contract_id
                created_at TEXT NOT NULL
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_invoices_contract_period
                ON invoices(contract_id, billing_period);

            CREATE TABLE IF NOT EXISTS reminder_templates (
                id TEXT PRIMARY KEY,
                stage TEXT NOT NULL,
                subject TEXT NOT NULL,
                body TEXT NOT NULL,
                usage_count INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS reminder_records (
                id TEXT PRIMARY KEY,
                invoice_id TEXT NOT NULL,
                recipients TEXT NOT NULL,        -- JSON array
                stage TEXT NOT NULL,
                template_id TEXT,
                subject TEXT NOT NULL,
                body TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'planned',
                attempts INTEGER NOT NULL DEFAULT 0,
                last_error TEXT,
                auto_send INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                sent_at TEXT,
                cancelled_at TEXT,
                cancel_reason TEXT,
                validated_by TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_reminders_invoice_stage
                ON reminder_records(invoice_id, stage);
         ",
            )
            .map_err(storage("migration"))?;
        Ok(())
    }

    /// Seed one template per stage so the orchestrator always resolves
    /// one. Existing templates (seeded or edited) are left alone.
    fn ensure_default_templates(&self) -> Result<()> {
        for (stage, subject, body) in DEFAULT_TEMPLATES {
            let conn = self.lock()?;
            let existing: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM reminder_templates WHERE stage = ?1",
                    [stage.as_str()],
                    |row| row.get(0),
                )
                .map_err(storage("count templates"))?;
            if existing > 0 {
                continue;
            }
            conn.execute(
                "INSERT INTO reminder_templates (id, stage, subject, body, usage_count)
                 VALUES (?1, ?2, ?3, ?4, 0)",
                rusqlite::params![uuid::Uuid::new_v4().to_string(), stage.as_str(), subject, body],
            )
            .map_err(storage("seed template"))?;
            tracing::info!("📝 Seeded default template for stage {}", stage.as_str());
        }
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| FacturioError::Storage(format!("connection lock: {e}")))
    }
}

// ─── Contracts ──────────────────────────────────────────────

const CONTRACT_COLS: &str = "id, client_name, client_email, label, frequency, custom_cycle, \
     billing_day, amount, currency, last_billing_date, next_billing_date, active, created_at";

fn contract_from_row(row: &Row<'_>) -> rusqlite::Result<Contract> {
    Ok(Contract {
        id: row.get(0)?,
        client_name: row.get(1)?,
        client_email: row.get(2)?,
        label: row.get(3)?,
        frequency: decode(4, facturio_core::model::BillingFrequency::parse(
            &row.get::<_, String>(4)?,
        ))?,
        custom_cycle: decode(5, parse_opt_json::<CustomCycle>(row.get(5)?))?,
        billing_day: row.get(6)?,
        amount: row.get(7)?,
        currency: row.get(8)?,
        last_billing_date: decode(9, parse_opt_day(row.get(9)?))?,
        next_billing_date: decode(10, parse_opt_day(row.get(10)?))?,
        active: row.get::<_, i64>(11)? != 0,
        created_at: decode(12, parse_ts(&row.get::<_, String>(12)?))?,
    })
}

impl ContractRepository for BillingDb {
    fn get(&self, id: &str) -> Result<Option<Contract>> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {CONTRACT_COLS} FROM contracts WHERE id = ?1"),
            [id],
            contract_from_row,
        )
        .optional()
        .map_err(storage("get contract"))
    }

    fn list_active(&self) -> Result<Vec<Contract>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {CONTRACT_COLS} FROM contracts WHERE active = 1 ORDER BY created_at"
            ))
            .map_err(storage("list contracts"))?;
        let rows = stmt
            .query_map([], contract_from_row)
            .map_err(storage("list contracts"))?;
        collect(rows, "list contracts")
    }

    fn insert(&self, contract: &Contract) -> Result<()> {
        let custom_cycle = contract
            .custom_cycle
            .as_ref()
            .map(to_json)
            .transpose()?;
        self.lock()?
            .execute(
                &format!(
                    "INSERT INTO contracts ({CONTRACT_COLS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"
                ),
                rusqlite::params![
                    contract.id,
                    contract.client_name,
                    contract.client_email,
                    contract.label,
                    contract.frequency.as_str(),
                    custom_cycle,
                    contract.billing_day,
                    contract.amount,
                    contract.currency,
                    contract.last_billing_date.map(day_to_sql),
                    contract.next_billing_date.map(day_to_sql),
                    contract.active as i64,
                    contract.created_at.to_rfc3339(),
                ],
            )
            .map_err(storage("insert contract"))?;
        Ok(())
    }

    fn advance_billing_dates(&self, id: &str, last: NaiveDate, next: NaiveDate) -> Result<()> {
        let changed = self
            .lock()?
            .execute(
                "UPDATE contracts SET last_billing_date = ?1, next_billing_date = ?2 WHERE id = ?3",
                rusqlite::params![day_to_sql(last), day_to_sql(next), id],
            )
            .map_err(storage("advance billing dates"))?;
        if changed == 0 {
            return Err(FacturioError::NotFound(format!("contract {id}")));
        }
        Ok(())
    }
}

// ─── Invoices ───────────────────────────────────────────────

const INVOICE_COLS: &str = "id, number, contract_id, client_name, client_email, issue_date, \
     due_date, lines, total, outstanding, status, billing_period, created_at";

fn invoice_from_row(row: &Row<'_>) -> rusqlite::Result<Invoice> {
    Ok(Invoice {
        id: row.get(0)?,
        number: row.get(1)?,
        contract_id: row.get(2)?,
        client_name: row.get(3)?,
        client_email: row.get(4)?,
        issue_date: decode(5, parse_day(&row.get::<_, String>(5)?))?,
        due_date: decode(6, parse_day(&row.get::<_, String>(6)?))?,
        lines: decode(7, parse_json::<Vec<InvoiceLine>>(&row.get::<_, String>(7)?))?,
        total: row.get(8)?,
        outstanding: row.get(9)?,
        status: decode(10, InvoiceStatus::parse(&row.get::<_, String>(10)?))?,
        billing_period: decode(11, parse_opt_day(row.get(11)?))?,
        created_at: decode(12, parse_ts(&row.get::<_, String>(12)?))?,
    })
}

impl InvoiceRepository for BillingDb {
    fn get(&self, id: &str) -> Result<Option<Invoice>> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {INVOICE_COLS} FROM invoices WHERE id = ?1"),
            [id],
            invoice_from_row,
        )
        .optional()
        .map_err(storage("get invoice"))
    }

    fn exists_for_period(&self, contract_id: &str, period: NaiveDate) -> Result<bool> {
        let count: i64 = self
            .lock()?
            .query_row(
                "SELECT COUNT(*) FROM invoices WHERE contract_id = ?1 AND billing_period = ?2",
                rusqlite::params![contract_id, day_to_sql(period)],
                |row| row.get(0),
            )
            .map_err(storage("check invoice period"))?;
        Ok(count > 0)
    }

    fn insert(&self, invoice: &Invoice) -> Result<()> {
        self.lock()?
            .execute(
                &format!(
                    "INSERT INTO invoices ({INVOICE_COLS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"
                ),
                rusqlite::params![
                    invoice.id,
                    invoice.number,
                    invoice.contract_id,
                    invoice.client_name,
                    invoice.client_email,
                    day_to_sql(invoice.issue_date),
                    day_to_sql(invoice.due_date),
                    to_json(&invoice.lines)?,
                    invoice.total,
                    invoice.outstanding,
                    invoice.status.as_str(),
                    invoice.billing_period.map(day_to_sql),
                    invoice.created_at.to_rfc3339(),
                ],
            )
            .map_err(storage("insert invoice"))?;
        Ok(())
    }

    fn list_outstanding(&self) -> Result<Vec<Invoice>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {INVOICE_COLS} FROM invoices
                 WHERE outstanding > 0 AND status != 'paid' ORDER BY due_date"
            ))
            .map_err(storage("list outstanding"))?;
        let rows = stmt
            .query_map([], invoice_from_row)
            .map_err(storage("list outstanding"))?;
        collect(rows, "list outstanding")
    }

    fn set_status(&self, id: &str, status: InvoiceStatus) -> Result<()> {
        self.lock()?
            .execute(
                "UPDATE invoices SET status = ?1 WHERE id = ?2",
                rusqlite::params![status.as_str(), id],
            )
            .map_err(storage("set invoice status"))?;
        Ok(())
    }
}

// ─── Reminder templates ─────────────────────────────────────

fn template_from_row(row: &Row<'_>) -> rusqlite::Result<ReminderTemplate> {
    Ok(ReminderTemplate {
        id: row.get(0)?,
        stage: decode(1, EscalationStage::parse(&row.get::<_, String>(1)?))?,
        subject: row.get(2)?,
        body: row.get(3)?,
        usage_count: row.get(4)?,
    })
}

impl TemplateRepository for BillingDb {
    fn get(&self, id: &str) -> Result<Option<ReminderTemplate>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT id, stage, subject, body, usage_count FROM reminder_templates WHERE id = ?1",
            [id],
            template_from_row,
        )
        .optional()
        .map_err(storage("get template"))
    }

    fn get_for_stage(&self, stage: EscalationStage) -> Result<Option<ReminderTemplate>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT id, stage, subject, body, usage_count FROM reminder_templates
             WHERE stage = ?1 ORDER BY usage_count DESC LIMIT 1",
            [stage.as_str()],
            template_from_row,
        )
        .optional()
        .map_err(storage("get template for stage"))
    }

    fn upsert(&self, template: &ReminderTemplate) -> Result<()> {
        self.lock()?
            .execute(
                "INSERT OR REPLACE INTO reminder_templates (id, stage, subject, body, usage_count)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    template.id,
                    template.stage.as_str(),
                    template.subject,
                    template.body,
                    template.usage_count,
                ],
            )
            .map_err(storage("upsert template"))?;
        Ok(())
    }

    fn increment_usage(&self, id: &str) -> Result<()> {
        self.lock()?
            .execute(
                "UPDATE reminder_templates SET usage_count = usage_count + 1 WHERE id = ?1",
                [id],
            )
            .map_err(storage("increment template usage"))?;
        Ok(())
    }
}

// ─── Reminder history ───────────────────────────────────────

const REMINDER_COLS: &str = "id, invoice_id, recipients, stage, template_id, subject, body, \
     status, attempts, last_error, auto_send, created_at, sent_at, cancelled_at, cancel_reason, \
     validated_by";

fn reminder_from_row(row: &Row<'_>) -> rusqlite::Result<ReminderRecord> {
    Ok(ReminderRecord {
        id: row.get(0)?,
        invoice_id: row.get(1)?,
        recipients: decode(2, parse_json::<Vec<String>>(&row.get::<_, String>(2)?))?,
        stage: decode(3, EscalationStage::parse(&row.get::<_, String>(3)?))?,
        template_id: row.get(4)?,
        subject: row.get(5)?,
        body: row.get(6)?,
        status: decode(7, ReminderStatus::parse(&row.get::<_, String>(7)?))?,
        attempts: row.get(8)?,
        last_error: row.get(9)?,
        auto_send: row.get::<_, i64>(10)? != 0,
        created_at: decode(11, parse_ts(&row.get::<_, String>(11)?))?,
        sent_at: decode(12, parse_opt_ts(row.get(12)?))?,
        cancelled_at: decode(13, parse_opt_ts(row.get(13)?))?,
        cancel_reason: row.get(14)?,
        validated_by: row.get(15)?,
    })
}

impl ReminderRepository for BillingDb {
    fn get(&self, id: &str) -> Result<Option<ReminderRecord>> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {REMINDER_COLS} FROM reminder_records WHERE id = ?1"),
            [id],
            reminder_from_row,
        )
        .optional()
        .map_err(storage("get reminder"))
    }

    fn insert(&self, record: &ReminderRecord) -> Result<()> {
        self.lock()?
            .execute(
                &format!(
                    "INSERT INTO reminder_records ({REMINDER_COLS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)"
                ),
                rusqlite::params![
                    record.id,
                    record.invoice_id,
                    to_json(&record.recipients)?,
                    record.stage.as_str(),
                    record.template_id,
                    record.subject,
                    record.body,
                    record.status.as_str(),
                    record.attempts,
                    record.last_error,
                    record.auto_send as i64,
                    record.created_at.to_rfc3339(),
                    record.sent_at.map(|t| t.to_rfc3339()),
                    record.cancelled_at.map(|t| t.to_rfc3339()),
                    record.cancel_reason,
                    record.validated_by,
                ],
            )
            .map_err(storage("insert reminder"))?;
        Ok(())
    }

    fn has_open_for(&self, invoice_id: &str, stage: EscalationStage) -> Result<bool> {
        let count: i64 = self
            .lock()?
            .query_row(
                "SELECT COUNT(*) FROM reminder_records
                 WHERE invoice_id = ?1 AND stage = ?2 AND status NOT IN ('sent', 'cancelled')",
                rusqlite::params![invoice_id, stage.as_str()],
                |row| row.get(0),
            )
            .map_err(storage("check open reminder"))?;
        Ok(count > 0)
    }

    fn list_dispatchable(&self, max_attempts: u32) -> Result<Vec<ReminderRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {REMINDER_COLS} FROM reminder_records
                 WHERE auto_send = 1 AND status IN ('pending', 'failed')
                   AND attempts < ?1 ORDER BY created_at"
            ))
            .map_err(storage("list dispatchable"))?;
        let rows = stmt
            .query_map([max_attempts], reminder_from_row)
            .map_err(storage("list dispatchable"))?;
        collect(rows, "list dispatchable")
    }

    fn mark_sent(&self, id: &str, at: DateTime<Utc>, validated_by: &str) -> Result<()> {
        self.lock()?
            .execute(
                "UPDATE reminder_records
                 SET status = 'sent', sent_at = ?1, attempts = attempts + 1,
                     validated_by = ?2, last_error = NULL
                 WHERE id = ?3",
                rusqlite::params![at.to_rfc3339(), validated_by, id],
            )
            .map_err(storage("mark reminder sent"))?;
        Ok(())
    }

    fn mark_failed(&self, id: &str, error: &str) -> Result<()> {
        self.lock()?
            .execute(
                "UPDATE reminder_records
                 SET status = 'failed', attempts = attempts + 1, last_error = ?1
                 WHERE id = ?2",
                rusqlite::params![error, id],
            )
            .map_err(storage("mark reminder failed"))?;
        Ok(())
    }

    fn mark_cancelled(
        &self,
        id: &str,
        at: DateTime<Utc>,
        reason: &str,
        cancelled_by: &str,
    ) -> Result<()> {
        self.lock()?
            .execute(
                "UPDATE reminder_records
                 SET status = 'cancelled', cancelled_at = ?1, cancel_reason = ?2, validated_by = ?3
                 WHERE id = ?4",
                rusqlite::params![at.to_rfc3339(), reason, cancelled_by, id],
            )
            .map_err(storage("mark reminder cancelled"))?;
        Ok(())
    }
}

// ─── Default templates ──────────────────────────────────────

const DEFAULT_TEMPLATES: [(EscalationStage, &str, &str); 4] = [
    (
        EscalationStage::RappelAmiable,
        "Rappel — facture {{invoice_number}}",
        "Bonjour {{client}},\n\nSauf erreur de notre part, la facture {{invoice_number}} d'un \
         montant de {{amount}}, échue le {{due_date}}, reste impayée à ce jour \
         ({{days_overdue}} jours). Il s'agit sans doute d'un oubli : merci de régulariser \
         à votre convenance.\n\nCordialement",
    ),
    (
        EscalationStage::RelanceFerme,
        "Relance — facture {{invoice_number}} impayée",
        "Bonjour {{client}},\n\nMalgré notre précédent rappel, la facture {{invoice_number}} \
         d'un montant de {{amount}}, échue le {{due_date}}, demeure impayée depuis \
         {{days_overdue}} jours. Nous vous demandons de procéder au règlement sous huitaine.\n\n\
         Cordialement",
    ),
    (
        EscalationStage::MiseEnDemeure,
        "Mise en demeure — facture {{invoice_number}}",
        "{{client}},\n\nNous vous mettons en demeure de régler la facture {{invoice_number}} \
         d'un montant de {{amount}}, échue le {{due_date}} ({{days_overdue}} jours de retard), \
         sous huit jours à compter de la présente. À défaut, nous nous réservons le droit \
         d'engager toute procédure de recouvrement.\n\nVeuillez agréer nos salutations.",
    ),
    (
        EscalationStage::Contentieux,
        "Transmission au contentieux — facture {{invoice_number}}",
        "{{client}},\n\nLa facture {{invoice_number}} d'un montant de {{amount}}, échue le \
         {{due_date}}, reste impayée après {{days_overdue}} jours et nos relances successives. \
         Le dossier est transmis à notre service contentieux pour recouvrement.\n\n\
         Salutations.",
    ),
];

// ─── Row helpers ────────────────────────────────────────────

fn storage(ctx: &'static str) -> impl Fn(rusqlite::Error) -> FacturioError {
    move |e| FacturioError::Storage(format!("{ctx}: {e}"))
}

/// Map a domain parse failure back into the rusqlite error channel so
/// row-mapping closures stay fallible end to end.
fn decode<T>(idx: usize, parsed: Result<T>) -> rusqlite::Result<T> {
    parsed.map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn collect<T>(
    rows: impl Iterator<Item = rusqlite::Result<T>>,
    ctx: &'static str,
) -> Result<Vec<T>> {
    rows.collect::<rusqlite::Result<Vec<T>>>().map_err(storage(ctx))
}

fn day_to_sql(d: NaiveDate) -> String {
    d.format("%Y-%m-%d").to_string()
}

fn parse_day(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|e| FacturioError::Storage(format!("bad date '{s}': {e}")))
}

fn parse_opt_day(s: Option<String>) -> Result<Option<NaiveDate>> {
    s.as_deref().map(parse_day).transpose()
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| FacturioError::Storage(format!("bad timestamp '{s}': {e}")))
}

fn parse_opt_ts(s: Option<String>) -> Result<Option<DateTime<Utc>>> {
    s.as_deref().map(parse_ts).transpose()
}

fn parse_json<T: serde::de::DeserializeOwned>(s: &str) -> Result<T> {
    serde_json::from_str(s).map_err(|e| FacturioError::Storage(format!("bad JSON column: {e}")))
}

fn parse_opt_json<T: serde::de::DeserializeOwned>(s: Option<String>) -> Result<Option<T>> {
    s.as_deref().map(parse_json).transpose()
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value)
        .map_err(|e| FacturioError::Storage(format!("encode JSON column: {e}")))
}
