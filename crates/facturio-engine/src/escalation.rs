//! Escalation policy — pure mapping from days overdue to the applicable
//! reminder stage.
//!
//! Thresholds are strictly increasing; `stage_for` returns the highest
//! threshold crossed. Contentieux is never auto-sendable — a fixed policy
//! invariant, not a configurable toggle.

use facturio_core::config::EscalationConfig;
use facturio_core::error::{FacturioError, Result};
use facturio_core::model::EscalationStage;

/// Validated per-run snapshot of the escalation configuration.
#[derive(Debug, Clone)]
pub struct EscalationSettings {
    pub amiable_after_days: i64,
    pub ferme_after_days: i64,
    pub mise_en_demeure_after_days: i64,
    pub contentieux_after_days: i64,
    pub auto_send_amiable: bool,
    pub auto_send_ferme: bool,
    pub auto_send_mise_en_demeure: bool,
}

impl EscalationSettings {
    /// Build from config, rejecting non-monotonic thresholds.
    pub fn from_config(cfg: &EscalationConfig) -> Result<Self> {
        let t = [
            cfg.amiable_after_days,
            cfg.ferme_after_days,
            cfg.mise_en_demeure_after_days,
            cfg.contentieux_after_days,
        ];
        if t[0] < 1 || t.windows(2).any(|w| w[0] >= w[1]) {
            return Err(FacturioError::Validation(format!(
                "escalation thresholds must be strictly increasing and >= 1 (got {t:?})"
            )));
        }
        Ok(Self {
            amiable_after_days: cfg.amiable_after_days,
            ferme_after_days: cfg.ferme_after_days,
            mise_en_demeure_after_days: cfg.mise_en_demeure_after_days,
            contentieux_after_days: cfg.contentieux_after_days,
            auto_send_amiable: cfg.auto_send_amiable,
            auto_send_ferme: cfg.auto_send_ferme,
            auto_send_mise_en_demeure: cfg.auto_send_mise_en_demeure,
        })
    }
}

/// The applicable stage for an invoice `days_overdue` days past due,
/// or None when no threshold is crossed yet.
pub fn stage_for(days_overdue: i64, settings: &EscalationSettings) -> Option<EscalationStage> {
    if days_overdue >= settings.contentieux_after_days {
        Some(EscalationStage::Contentieux)
    } else if days_overdue >= settings.mise_en_demeure_after_days {
        Some(EscalationStage::MiseEnDemeure)
    } else if days_overdue >= settings.ferme_after_days {
        Some(EscalationStage::RelanceFerme)
    } else if days_overdue >= settings.amiable_after_days {
        Some(EscalationStage::RappelAmiable)
    } else {
        None
    }
}

/// Whether a stage may be dispatched without human validation.
/// Contentieux is hard-excluded regardless of configuration.
pub fn auto_sendable(stage: EscalationStage, settings: &EscalationSettings) -> bool {
    match stage {
        EscalationStage::RappelAmiable => settings.auto_send_amiable,
        EscalationStage::RelanceFerme => settings.auto_send_ferme,
        EscalationStage::MiseEnDemeure => settings.auto_send_mise_en_demeure,
        EscalationStage::Contentieux => false,
    }
}
