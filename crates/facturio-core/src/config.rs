//! Facturio configuration system.
//!
//! One TOML file (`~/.facturio/config.toml`) read once at startup.
//! The daily runner takes an immutable snapshot of the escalation and
//! calendar sections per run, so a mid-run edit never produces a run
//! that saw two different configurations.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{FacturioError, Result};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FacturioConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub billing: BillingConfig,
    #[serde(default)]
    pub escalation: EscalationConfig,
    #[serde(default)]
    pub calendar: CalendarConfig,
    #[serde(default)]
    pub smtp: SmtpConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

impl FacturioConfig {
    /// Load config from the default path, falling back to defaults when
    /// the file does not exist yet.
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| FacturioError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| FacturioError::Config(format!("Failed to parse config: {e}")))?;
        Ok(config)
    }

    /// Save config to the default path.
    pub fn save(&self) -> Result<()> {
        let path = Self::default_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| FacturioError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the Facturio home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".facturio")
    }
}

/// HTTP gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Bearer secret for the trigger/manual endpoints. Empty = open
    /// (local development only).
    #[serde(default)]
    pub trigger_secret: String,
}

fn default_host() -> String { "0.0.0.0".into() }
fn default_port() -> u16 { 8742 }

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            trigger_secret: String::new(),
        }
    }
}

/// Invoice generation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingConfig {
    /// Days between issue date and due date on generated invoices.
    #[serde(default = "default_due_days")]
    pub due_days: u32,
    #[serde(default = "default_invoice_prefix")]
    pub invoice_prefix: String,
    #[serde(default = "default_currency")]
    pub currency: String,
}

fn default_due_days() -> u32 { 30 }
fn default_invoice_prefix() -> String { "FAC".into() }
fn default_currency() -> String { "EUR".into() }

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            due_days: default_due_days(),
            invoice_prefix: default_invoice_prefix(),
            currency: default_currency(),
        }
    }
}

/// Collection-escalation configuration: stage thresholds (days overdue)
/// and per-stage auto-send flags. Thresholds must be strictly increasing;
/// the engine validates that when it builds its settings snapshot.
/// Contentieux is never auto-sent regardless of flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationConfig {
    #[serde(default = "default_amiable_days")]
    pub amiable_after_days: i64,
    #[serde(default = "default_ferme_days")]
    pub ferme_after_days: i64,
    #[serde(default = "default_mise_en_demeure_days")]
    pub mise_en_demeure_after_days: i64,
    #[serde(default = "default_contentieux_days")]
    pub contentieux_after_days: i64,
    #[serde(default = "bool_true")]
    pub auto_send_amiable: bool,
    #[serde(default = "bool_true")]
    pub auto_send_ferme: bool,
    #[serde(default)]
    pub auto_send_mise_en_demeure: bool,
}

fn default_amiable_days() -> i64 { 7 }
fn default_ferme_days() -> i64 { 15 }
fn default_mise_en_demeure_days() -> i64 { 30 }
fn default_contentieux_days() -> i64 { 60 }
fn bool_true() -> bool { true }

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            amiable_after_days: default_amiable_days(),
            ferme_after_days: default_ferme_days(),
            mise_en_demeure_after_days: default_mise_en_demeure_days(),
            contentieux_after_days: default_contentieux_days(),
            auto_send_amiable: true,
            auto_send_ferme: true,
            auto_send_mise_en_demeure: false,
        }
    }
}

/// Business-day calendar: weekdays the daily run skips, plus explicit
/// holiday dates as ISO `YYYY-MM-DD` strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarConfig {
    #[serde(default = "default_non_working")]
    pub non_working_weekdays: Vec<String>,
    #[serde(default)]
    pub holidays: Vec<String>,
}

fn default_non_working() -> Vec<String> {
    vec!["sat".into(), "sun".into()]
}

impl Default for CalendarConfig {
    fn default() -> Self {
        Self {
            non_working_weekdays: default_non_working(),
            holidays: Vec::new(),
        }
    }
}

/// SMTP transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    #[serde(default = "default_smtp_host")]
    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub from_email: String,
    #[serde(default = "default_from_name")]
    pub from_name: String,
}

fn default_smtp_host() -> String { "smtp.gmail.com".into() }
fn default_smtp_port() -> u16 { 587 }
fn default_from_name() -> String { "Facturio".into() }

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: default_smtp_host(),
            port: default_smtp_port(),
            user: String::new(),
            password: String::new(),
            from_email: String::new(),
            from_name: default_from_name(),
        }
    }
}

/// Dispatch worker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Pause between consecutive sends in the daily run (transport-side
    /// rate-limit courtesy).
    #[serde(default = "default_pause_ms")]
    pub send_pause_ms: u64,
    /// Per-send timeout on the transport call.
    #[serde(default = "default_send_timeout")]
    pub send_timeout_secs: u64,
    /// A record is no longer dispatchable past this many attempts.
    #[serde(default = "default_max_attempts")]
    pub max_send_attempts: u32,
}

fn default_pause_ms() -> u64 { 2000 }
fn default_send_timeout() -> u64 { 30 }
fn default_max_attempts() -> u32 { 5 }

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            send_pause_ms: default_pause_ms(),
            send_timeout_secs: default_send_timeout(),
            max_send_attempts: default_max_attempts(),
        }
    }
}

/// Document store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite database path. Empty = `~/.facturio/billing.db`.
    #[serde(default)]
    pub db_path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { db_path: String::new() }
    }
}

impl StoreConfig {
    /// Resolve the database path, falling back to the Facturio home dir.
    pub fn resolved_db_path(&self) -> PathBuf {
        if self.db_path.is_empty() {
            FacturioConfig::home_dir().join("billing.db")
        } else {
            PathBuf::from(&self.db_path)
        }
    }
}
