//! API route handlers for the gateway.
//!
//! Every handler returns a JSON body. Partial failures inside a run are
//! reported in the body's details, never as an HTTP error; only
//! unauthorized and malformed requests fail outright.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Json,
};
use chrono::{NaiveDate, Utc};
use serde_json::{json, Value};

use facturio_core::model::{round2, InvoiceLine};
use facturio_engine::{GenerationOutcome, GenerationRequest, RunSettings};
use facturio_engine::escalation::EscalationSettings;

use super::server::AppState;

/// Public liveness probe.
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "ok": true,
        "status": "healthy",
        "uptime_secs": state.start_time.elapsed().as_secs(),
    }))
}

/// Trigger one daily run. Optional body: `{"date": "YYYY-MM-DD"}` to run
/// as of a specific day instead of today.
pub async fn run_daily(
    State(state): State<Arc<AppState>>,
    body: Option<Json<Value>>,
) -> Json<Value> {
    let body = body.map(|Json(v)| v).unwrap_or_default();
    let today = match parse_day_field(&body, "date") {
        Ok(Some(d)) => d,
        Ok(None) => Utc::now().date_naive(),
        Err(e) => return Json(json!({"success": false, "error": e})),
    };

    let settings = match RunSettings::from_config(&state.config) {
        Ok(s) => s,
        Err(e) => return Json(json!({"success": false, "error": e.to_string()})),
    };

    match state.runner.run(today, &settings).await {
        Ok(summary) => {
            let details: Vec<Value> = summary
                .failures
                .iter()
                .map(|f| json!({"entity": f.entity, "id": f.id, "error": f.error}))
                .collect();
            Json(json!({
                "success": true,
                "skipped": summary.skipped,
                "stats": {
                    "generated": summary.generated,
                    "alreadyGenerated": summary.already_generated,
                    "sent": summary.sent,
                    "failed": summary.failed,
                    "pendingManualValidation": summary.pending_manual,
                    "durationSeconds": summary.duration_seconds,
                },
                "details": details,
            }))
        }
        Err(e) => Json(json!({"success": false, "error": e.to_string()})),
    }
}

/// Manual invoice generation with overrides.
pub async fn generate_invoice(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> Json<Value> {
    let Some(contract_id) = body["contract_id"].as_str() else {
        return Json(json!({"ok": false, "error": "contract_id is required"}));
    };
    let reference_date = match parse_day_field(&body, "reference_date") {
        Ok(d) => d.unwrap_or_else(|| Utc::now().date_naive()),
        Err(e) => return Json(json!({"ok": false, "error": e})),
    };
    let billing_date = match parse_day_field(&body, "billing_date") {
        Ok(d) => d,
        Err(e) => return Json(json!({"ok": false, "error": e})),
    };
    let adjustment = body.get("adjustment").filter(|v| !v.is_null()).map(|v| InvoiceLine {
        description: v["description"].as_str().unwrap_or("Ajustement").to_string(),
        quantity: v["quantity"].as_f64().unwrap_or(1.0),
        unit_price: v["unit_price"].as_f64().unwrap_or(0.0),
    });

    let request = GenerationRequest {
        contract_id: contract_id.to_string(),
        reference_date,
        billing_date,
        force: body["force"].as_bool().unwrap_or(false),
        adjustment,
        send_email: body["send_email"].as_bool().unwrap_or(false),
        auto_validate: body["auto_validate"].as_bool().unwrap_or(false),
    };

    match state.generator.generate(&request).await {
        Ok(GenerationOutcome::Generated(g)) => Json(json!({
            "ok": true,
            "outcome": "generated",
            "invoice": {
                "id": g.invoice_id,
                "number": g.number,
                "total": round2(g.total),
                "nextBillingDate": g.next_billing_date.map(|d| d.to_string()),
            },
            "actions": g.actions,
        })),
        Ok(GenerationOutcome::AlreadyGenerated { contract_id, period }) => Json(json!({
            "ok": true,
            "outcome": "already_generated",
            "contractId": contract_id,
            "period": period.to_string(),
        })),
        Ok(GenerationOutcome::NotDue { contract_id, next_due }) => Json(json!({
            "ok": true,
            "outcome": "not_due",
            "contractId": contract_id,
            "nextDue": next_due.to_string(),
        })),
        Err(e) => Json(json!({"ok": false, "error": e.to_string(), "kind": e.kind()})),
    }
}

/// Run the reminder orchestrator on demand.
pub async fn generate_reminders(
    State(state): State<Arc<AppState>>,
    body: Option<Json<Value>>,
) -> Json<Value> {
    let body = body.map(|Json(v)| v).unwrap_or_default();
    let today = match parse_day_field(&body, "date") {
        Ok(Some(d)) => d,
        Ok(None) => Utc::now().date_naive(),
        Err(e) => return Json(json!({"ok": false, "error": e})),
    };
    let settings = match EscalationSettings::from_config(&state.config.escalation) {
        Ok(s) => s,
        Err(e) => return Json(json!({"ok": false, "error": e.to_string()})),
    };

    match state.orchestrator.generate(today, &settings) {
        Ok(batch) => {
            let created: Vec<Value> = batch
                .created
                .iter()
                .map(|r| {
                    json!({
                        "id": r.id,
                        "invoiceId": r.invoice_id,
                        "stage": r.stage.as_str(),
                        "status": r.status.as_str(),
                    })
                })
                .collect();
            let failures: Vec<Value> = batch
                .failures
                .iter()
                .map(|(id, error)| json!({"invoiceId": id, "error": error}))
                .collect();
            Json(json!({
                "ok": true,
                "created": created,
                "pendingValidation": batch.pending_validation,
                "skipped": batch.skipped,
                "failures": failures,
            }))
        }
        Err(e) => Json(json!({"ok": false, "error": e.to_string(), "kind": e.kind()})),
    }
}

/// Dispatch one reminder now (manual validation path included).
pub async fn send_reminder(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Option<Json<Value>>,
) -> Json<Value> {
    let body = body.map(|Json(v)| v).unwrap_or_default();
    let user = body["user"].as_str().unwrap_or("api");

    match state.worker.send(&id, user).await {
        Ok(receipt) => Json(json!({
            "ok": true,
            "deliveryId": receipt.delivery_id,
            "attempts": receipt.attempts,
        })),
        Err(e) => Json(json!({"ok": false, "error": e.to_string(), "kind": e.kind()})),
    }
}

/// Cancel a planned or pending reminder.
pub async fn cancel_reminder(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Option<Json<Value>>,
) -> Json<Value> {
    let body = body.map(|Json(v)| v).unwrap_or_default();
    let reason = body["reason"].as_str().unwrap_or("cancelled via API");
    let user = body["user"].as_str().unwrap_or("api");

    match state.worker.cancel(&id, reason, user) {
        Ok(()) => Json(json!({"ok": true})),
        Err(e) => Json(json!({"ok": false, "error": e.to_string(), "kind": e.kind()})),
    }
}

/// Read an optional `YYYY-MM-DD` field; a present-but-invalid value is
/// a request error. Callers wrap the message in their route's body shape.
fn parse_day_field(body: &Value, key: &str) -> Result<Option<NaiveDate>, String> {
    match body.get(key).and_then(Value::as_str) {
        None => Ok(None),
        Some(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .map(Some)
            .map_err(|_| format!("invalid {key} '{s}' (want YYYY-MM-DD)")),
    }
}
