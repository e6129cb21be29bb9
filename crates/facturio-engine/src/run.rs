//! Daily orchestration entry point: eligibility gate, invoice
//! generation, reminder orchestration, sequential dispatch, summary.
//!
//! Every phase continues past per-entity failures; only the gate stops
//! a run, and a gated run has zero side effects. Re-running on the same
//! day is safe: generation re-derives due contracts from the store and
//! the (contract, period) guard absorbs the repeats.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{Datelike, NaiveDate, Weekday};

use facturio_core::config::FacturioConfig;
use facturio_core::error::{FacturioError, Result};
use facturio_core::repo::{ContractRepository, ReminderRepository};

use crate::billing::{BillingCycleGenerator, GenerationOutcome, GenerationRequest};
use crate::dispatch::DispatchWorker;
use crate::escalation::EscalationSettings;
use crate::reminders::ReminderOrchestrator;

/// Immutable per-run snapshot of everything the run reads from config.
/// Built once at the start of a run; a config edit mid-run is invisible.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub non_working_weekdays: Vec<Weekday>,
    pub holidays: Vec<NaiveDate>,
    pub escalation: EscalationSettings,
    pub send_pause: Duration,
}

impl RunSettings {
    pub fn from_config(cfg: &FacturioConfig) -> Result<Self> {
        let mut non_working_weekdays = Vec::new();
        for name in &cfg.calendar.non_working_weekdays {
            let day: Weekday = name.parse().map_err(|_| {
                FacturioError::Config(format!("unknown weekday '{name}' in calendar config"))
            })?;
            non_working_weekdays.push(day);
        }
        let mut holidays = Vec::new();
        for s in &cfg.calendar.holidays {
            let day = NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|_| {
                FacturioError::Config(format!("invalid holiday date '{s}' (want YYYY-MM-DD)"))
            })?;
            holidays.push(day);
        }
        Ok(Self {
            non_working_weekdays,
            holidays,
            escalation: EscalationSettings::from_config(&cfg.escalation)?,
            send_pause: Duration::from_millis(cfg.dispatch.send_pause_ms),
        })
    }

    /// True when the run should be skipped entirely.
    pub fn is_non_working(&self, day: NaiveDate) -> bool {
        self.non_working_weekdays.contains(&day.weekday()) || self.holidays.contains(&day)
    }
}

/// One per-entity failure surfaced in the run summary.
#[derive(Debug, Clone)]
pub struct RunFailure {
    /// Entity kind: "contract", "invoice" or "reminder".
    pub entity: &'static str,
    pub id: String,
    pub error: String,
}

/// What one daily run did.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    /// Gate fired: non-working day, nothing executed.
    pub skipped: bool,
    pub generated: usize,
    pub already_generated: usize,
    pub sent: usize,
    pub failed: usize,
    pub pending_manual: usize,
    pub duration_seconds: f64,
    pub failures: Vec<RunFailure>,
}

/// Runs one billing day end to end.
pub struct DailyRunner {
    contracts: Arc<dyn ContractRepository>,
    reminders: Arc<dyn ReminderRepository>,
    generator: Arc<BillingCycleGenerator>,
    orchestrator: Arc<ReminderOrchestrator>,
    worker: Arc<DispatchWorker>,
}

impl DailyRunner {
    pub fn new(
        contracts: Arc<dyn ContractRepository>,
        reminders: Arc<dyn ReminderRepository>,
        generator: Arc<BillingCycleGenerator>,
        orchestrator: Arc<ReminderOrchestrator>,
        worker: Arc<DispatchWorker>,
    ) -> Self {
        Self {
            contracts,
            reminders,
            generator,
            orchestrator,
            worker,
        }
    }

    pub async fn run(&self, today: NaiveDate, settings: &RunSettings) -> Result<RunSummary> {
        let started = Instant::now();
        let mut summary = RunSummary::default();

        if settings.is_non_working(today) {
            tracing::info!("📅 {today} is a non-working day, run skipped");
            summary.skipped = true;
            summary.duration_seconds = started.elapsed().as_secs_f64();
            return Ok(summary);
        }
        tracing::info!("▶️ Daily run starting for {today}");

        self.generate_due_invoices(today, &mut summary).await?;

        match self.orchestrator.generate(today, &settings.escalation) {
            Ok(batch) => {
                summary.pending_manual = batch.pending_validation.len();
                for (invoice_id, error) in batch.failures {
                    summary.failed += 1;
                    summary.failures.push(RunFailure {
                        entity: "invoice",
                        id: invoice_id,
                        error,
                    });
                }
            }
            Err(e) => {
                summary.failed += 1;
                summary.failures.push(RunFailure {
                    entity: "invoice",
                    id: "reminder-scan".into(),
                    error: e.to_string(),
                });
            }
        }

        self.dispatch_pending(settings, &mut summary).await?;

        summary.duration_seconds = started.elapsed().as_secs_f64();
        tracing::info!(
            "✅ Daily run done in {:.2}s: {} generated, {} already generated, \
             {} sent, {} failed, {} awaiting validation",
            summary.duration_seconds,
            summary.generated,
            summary.already_generated,
            summary.sent,
            summary.failed,
            summary.pending_manual
        );
        Ok(summary)
    }

    /// Phase 2: one generation attempt per active due contract.
    async fn generate_due_invoices(&self, today: NaiveDate, summary: &mut RunSummary) -> Result<()> {
        for contract in self.contracts.list_active()? {
            let due = matches!(contract.next_billing_date, Some(next) if next <= today);
            if !due {
                continue;
            }
            let request = GenerationRequest::scheduled(&contract.id, today);
            match self.generator.generate(&request).await {
                Ok(GenerationOutcome::Generated(_)) => summary.generated += 1,
                Ok(GenerationOutcome::AlreadyGenerated { .. }) => summary.already_generated += 1,
                Ok(GenerationOutcome::NotDue { .. }) => {}
                Err(e) => {
                    tracing::warn!("⚠️ Generation failed for contract {}: {e}", contract.id);
                    summary.failed += 1;
                    summary.failures.push(RunFailure {
                        entity: "contract",
                        id: contract.id.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Phase 4: sequential dispatch of every auto-sendable record below
    /// the attempt cap, prior runs' leftovers included, pausing between
    /// sends. Capped records never re-enter the queue.
    async fn dispatch_pending(&self, settings: &RunSettings, summary: &mut RunSummary) -> Result<()> {
        let queue = self.reminders.list_dispatchable(self.worker.max_attempts())?;
        for (i, record) in queue.iter().enumerate() {
            if i > 0 && !settings.send_pause.is_zero() {
                tokio::time::sleep(settings.send_pause).await;
            }
            match self.worker.send(&record.id, "scheduler").await {
                Ok(_) => summary.sent += 1,
                Err(e) => {
                    summary.failed += 1;
                    summary.failures.push(RunFailure {
                        entity: "reminder",
                        id: record.id.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{date, db_fixture, get_contract, seed_contract, seed_invoice, MockRenderer, MockTransport};
    use facturio_core::model::{BillingFrequency, InvoiceStatus};
    use facturio_core::repo::InvoiceRepository;
    use facturio_store::BillingDb;

    fn runner(db: &Arc<BillingDb>, transport: Arc<MockTransport>) -> DailyRunner {
        let worker = Arc::new(DispatchWorker::new(
            db.clone(),
            db.clone(),
            db.clone(),
            transport,
            Arc::new(MockRenderer::ok()),
            5,
            Duration::from_secs(5),
        ));
        let generator = Arc::new(BillingCycleGenerator::new(
            db.clone(),
            db.clone(),
            None,
            30,
            "FAC",
        ));
        let orchestrator = Arc::new(ReminderOrchestrator::new(
            db.clone(),
            db.clone(),
            db.clone(),
        ));
        DailyRunner::new(db.clone(), db.clone(), generator, orchestrator, worker)
    }

    fn settings() -> RunSettings {
        let mut settings = RunSettings::from_config(&FacturioConfig::default()).unwrap();
        settings.send_pause = Duration::ZERO;
        settings
    }

    #[tokio::test]
    async fn test_holiday_gates_the_whole_run() {
        // A due contract on a holiday: the run reports skipped and
        // leaves the store untouched.
        let (db, _dir) = db_fixture("run-holiday");
        let contract = seed_contract(
            &db,
            BillingFrequency::Monthly,
            1,
            1000.0,
            None,
            "2025-05-01",
        );

        let mut settings = settings();
        settings.holidays.push(date("2025-05-01"));
        let transport = Arc::new(MockTransport::new(0));
        let summary = runner(&db, transport.clone())
            .run(date("2025-05-01"), &settings)
            .await
            .unwrap();

        assert!(summary.skipped);
        assert_eq!(summary.generated, 0);
        assert_eq!(summary.sent, 0);
        assert_eq!(transport.sent_count(), 0);
        assert!(!db.exists_for_period(&contract.id, date("2025-05-01")).unwrap());
        // Contract dates untouched.
        assert_eq!(
            get_contract(&db, &contract.id).next_billing_date,
            Some(date("2025-05-01"))
        );
    }

    #[tokio::test]
    async fn test_non_working_weekday_gates_the_run() {
        let (db, _dir) = db_fixture("run-weekend");
        // 2025-02-01 is a Saturday; the default config skips it.
        let summary = runner(&db, Arc::new(MockTransport::new(0)))
            .run(date("2025-02-01"), &settings())
            .await
            .unwrap();
        assert!(summary.skipped);
    }

    #[tokio::test]
    async fn test_full_run_generates_escalates_and_sends() {
        // 2025-01-20 (a Monday): one due contract, one invoice 19 days
        // overdue. The run generates the invoice, creates the firm
        // reminder and dispatches it.
        let (db, _dir) = db_fixture("run-full");
        let contract = seed_contract(
            &db,
            BillingFrequency::Monthly,
            20,
            1000.0,
            None,
            "2025-01-20",
        );
        seed_invoice(&db, InvoiceStatus::Sent, 500.0, "2025-01-01");

        let transport = Arc::new(MockTransport::new(0));
        let summary = runner(&db, transport.clone())
            .run(date("2025-01-20"), &settings())
            .await
            .unwrap();

        assert!(!summary.skipped);
        assert_eq!(summary.generated, 1);
        assert_eq!(summary.sent, 1);
        assert_eq!(summary.failed, 0);
        assert_eq!(summary.pending_manual, 0);
        assert_eq!(transport.sent_count(), 1);
        assert!(db.exists_for_period(&contract.id, date("2025-01-20")).unwrap());
    }

    #[tokio::test]
    async fn test_second_run_same_day_is_reentrant() {
        let (db, _dir) = db_fixture("run-reentrant");
        seed_contract(
            &db,
            BillingFrequency::Monthly,
            20,
            1000.0,
            None,
            "2025-01-20",
        );

        let transport = Arc::new(MockTransport::new(0));
        let r = runner(&db, transport);
        let first = r.run(date("2025-01-20"), &settings()).await.unwrap();
        assert_eq!(first.generated, 1);

        // The advance moved the contract to 2025-02-20, so the second
        // run finds nothing due and nothing dispatchable.
        let second = r.run(date("2025-01-20"), &settings()).await.unwrap();
        assert_eq!(second.generated, 0);
        assert_eq!(second.already_generated, 0);
        assert_eq!(second.sent, 0);
        assert_eq!(second.failed, 0);
    }

    #[tokio::test]
    async fn test_transport_failure_recorded_run_continues() {
        let (db, _dir) = db_fixture("run-failure");
        seed_invoice(&db, InvoiceStatus::Sent, 500.0, "2025-01-01");

        // Transport always fails: the reminder lands in Failed, the run
        // still completes with the failure detail.
        let summary = runner(&db, Arc::new(MockTransport::new(u32::MAX)))
            .run(date("2025-01-20"), &settings())
            .await
            .unwrap();

        assert_eq!(summary.sent, 0);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.failures[0].entity, "reminder");
    }

    #[tokio::test]
    async fn test_capped_record_leaves_the_dispatch_queue() {
        // max_send_attempts 1: the first run burns the only attempt;
        // later runs neither re-attempt the record nor report it as a
        // failure again.
        let (db, _dir) = db_fixture("run-capped");
        seed_invoice(&db, InvoiceStatus::Sent, 500.0, "2025-01-01");

        let worker = Arc::new(DispatchWorker::new(
            db.clone(),
            db.clone(),
            db.clone(),
            Arc::new(MockTransport::new(u32::MAX)),
            Arc::new(MockRenderer::ok()),
            1,
            Duration::from_secs(5),
        ));
        let generator = Arc::new(BillingCycleGenerator::new(
            db.clone(),
            db.clone(),
            None,
            30,
            "FAC",
        ));
        let orchestrator = Arc::new(ReminderOrchestrator::new(
            db.clone(),
            db.clone(),
            db.clone(),
        ));
        let r = DailyRunner::new(db.clone(), db.clone(), generator, orchestrator, worker);

        let first = r.run(date("2025-01-20"), &settings()).await.unwrap();
        assert_eq!(first.failed, 1);

        let second = r.run(date("2025-01-20"), &settings()).await.unwrap();
        assert_eq!(second.sent, 0);
        assert_eq!(second.failed, 0);
        assert!(second.failures.is_empty());
    }

    #[test]
    fn test_settings_reject_bad_calendar_config() {
        let mut cfg = FacturioConfig::default();
        cfg.calendar.non_working_weekdays = vec!["caturday".into()];
        assert!(matches!(
            RunSettings::from_config(&cfg).unwrap_err(),
            FacturioError::Config(_)
        ));

        let mut cfg = FacturioConfig::default();
        cfg.calendar.holidays = vec!["01/05/2025".into()];
        assert!(RunSettings::from_config(&cfg).is_err());
    }
}
