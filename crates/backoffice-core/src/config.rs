use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Result, VaultError};

/// Top-level configuration for the back-office agents.
///
/// Loaded from `~/.backoffice/config.toml` by default. Environment
/// variables are applied on top with [`apply_env_overrides`](Self::apply_env_overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackofficeConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub approval: ApprovalConfig,
    #[serde(default)]
    pub rate_limits: RateLimitConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub agent: AgentConfig,
}

impl BackofficeConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: BackofficeConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration, falling back to defaults if the file does not
    /// exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| VaultError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Apply overrides from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from `lookup`, which maps a variable name to its value.
    ///
    /// Recognised: `VAULT_PATH`, `DRY_RUN`, and
    /// `RATE_LIMIT_{EMAILS,PAYMENTS,SOCIAL,WHATSAPP}_PER_HOUR`. Unparseable
    /// values are ignored with a warning.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(path) = lookup("VAULT_PATH") {
            self.general.vault_path = path;
        }
        if let Some(value) = lookup("DRY_RUN") {
            self.general.dry_run = value.trim().eq_ignore_ascii_case("true");
        }
        for (var, category) in [
            ("RATE_LIMIT_EMAILS_PER_HOUR", "email"),
            ("RATE_LIMIT_PAYMENTS_PER_HOUR", "payment"),
            ("RATE_LIMIT_SOCIAL_PER_HOUR", "social"),
            ("RATE_LIMIT_WHATSAPP_PER_HOUR", "whatsapp"),
        ] {
            if let Some(value) = lookup(var) {
                match value.trim().parse::<u32>() {
                    Ok(limit) => {
                        self.rate_limits.limits.insert(category.to_string(), limit);
                    }
                    Err(_) => warn!(var, value = %value, "Ignoring non-numeric rate limit"),
                }
            }
        }
    }

    /// Vault root with a leading `~` expanded to the home directory.
    pub fn vault_root(&self) -> PathBuf {
        expand_home(&self.general.vault_path)
    }
}

/// Expand `~/` to `$HOME` (or `%USERPROFILE%` on Windows).
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/").or_else(|| path.strip_prefix("~\\")) {
        #[cfg(target_os = "windows")]
        let home = std::env::var("USERPROFILE").unwrap_or_else(|_| ".".to_string());
        #[cfg(not(target_os = "windows"))]
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(rest)
    } else {
        PathBuf::from(path)
    }
}

/// General settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Root directory of the shared vault.
    pub vault_path: String,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
    /// Log sends instead of calling providers.
    pub dry_run: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            vault_path: "~/AI_Employee_Vault".to_string(),
            log_level: "info".to_string(),
            dry_run: true,
        }
    }
}

/// Approval lifecycle settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApprovalConfig {
    /// TTL when neither the handbook nor an action override applies.
    pub default_ttl_hours: u32,
    /// Interval of the expiry sweep.
    pub expiry_sweep_secs: u64,
    /// Policy document, relative to the vault root.
    pub handbook_file: String,
    /// Actions that skip human approval (e.g. pre-scheduled posts).
    pub auto_approve: Vec<String>,
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            default_ttl_hours: 24,
            expiry_sweep_secs: 300,
            handbook_file: "Company_Handbook.md".to_string(),
            auto_approve: vec![],
        }
    }
}

/// Per-category sliding-window limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub window_secs: u64,
    /// Category name to maximum events per window.
    pub limits: BTreeMap<String, u32>,
    /// Action name to the category it counts against.
    pub categories: BTreeMap<String, String>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        let limits = [("email", 10), ("payment", 3), ("social", 5), ("whatsapp", 20)]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        let categories = [
            ("email_send", "email"),
            ("email_reply", "email"),
            ("payment", "payment"),
            ("invoice", "payment"),
            ("social_post", "social"),
            ("whatsapp_reply", "whatsapp"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        Self {
            window_secs: 3600,
            limits,
            categories,
        }
    }
}

/// Dispatch settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Poll interval of the polling dispatcher.
    pub poll_interval_secs: u64,
    /// Rescan interval of the approval watcher.
    pub watcher_poll_secs: u64,
    /// Actions owned by the polling dispatcher. The watcher skips these.
    pub polled_actions: Vec<String>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 30,
            watcher_poll_secs: 5,
            polled_actions: vec!["whatsapp_reply".to_string()],
        }
    }
}

/// Audit log settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub retention_days: u32,
    /// "minute hour [day_of_week]".
    pub cleanup_cron: String,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            retention_days: 90,
            cleanup_cron: "0 2 *".to_string(),
        }
    }
}

/// Agent process settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Claim namespace under `In_Progress/`.
    pub name: String,
    pub needs_action_poll_secs: u64,
    /// Reasoning program and arguments. The task filename is appended.
    pub reasoning_command: Vec<String>,
    pub reasoning_timeout_secs: u64,
    /// Interval of the cloud agent's `Updates/` status file.
    pub status_update_secs: u64,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: "local".to_string(),
            needs_action_poll_secs: 15,
            reasoning_command: vec![],
            reasoning_timeout_secs: 300,
            status_update_secs: 600,
            retry: RetryConfig::default(),
        }
    }
}

/// Exponential backoff settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 60_000,
        }
    }
}
