//! Configuration Module
//!
//! Handles application configuration loading, saving, and defaults.
//! Configuration is stored in TOML format, same as the teacher's ambient
//! config layer, trimmed to what this engine actually reads: general
//! logging settings, the rate-limit/backup knobs that aren't already fixed
//! spec constants, and nothing UI- or password-generator-specific.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

const CONFIG_FILE: &str = "pass-cli-core.toml";

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub backup: BackupConfig,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Default vault file path.
    #[serde(default = "default_vault_file")]
    pub default_vault: String,

    /// Enable logging.
    #[serde(default = "default_true")]
    pub enable_logging: bool,

    /// Log level (error, warn, info, debug, trace).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Security settings. PBKDF2 iteration count and AES/HMAC choices are not
/// here: they're spec-mandated constants in [`crate::crypto`], not
/// user-tunable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Maximum failed unlock attempts inside the rolling window before
    /// cooldown (mirrors [`crate::policy::MAX_FAILURES`] as the
    /// configurable override point).
    #[serde(default = "default_max_attempts")]
    pub max_failed_attempts: u32,

    /// Minimum master password length override. Never allowed to go
    /// below [`crate::policy::MIN_LENGTH`]; see [`Config::validate_master_password`].
    #[serde(default = "default_min_password_length")]
    pub min_password_length: usize,
}

/// Backup settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Create a manual backup copy before destructive operations like
    /// restore or password change.
    #[serde(default = "default_true")]
    pub backup_before_restore: bool,

    /// Maximum number of manual backups to retain (oldest pruned first).
    #[serde(default = "default_max_backups")]
    pub max_backups: usize,
}

fn default_vault_file() -> String {
    "vault.enc".to_string()
}
fn default_true() -> bool {
    true
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_max_attempts() -> u32 {
    crate::policy::MAX_FAILURES
}
fn default_min_password_length() -> usize {
    crate::policy::MIN_LENGTH
}
fn default_max_backups() -> usize {
    10
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            default_vault: default_vault_file(),
            enable_logging: true,
            log_level: default_log_level(),
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            max_failed_attempts: default_max_attempts(),
            min_password_length: default_min_password_length(),
        }
    }
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            backup_before_restore: true,
            max_backups: default_max_backups(),
        }
    }
}

impl Config {
    pub fn load() -> Self {
        Self::load_from(Self::config_path())
    }

    pub fn load_from(path: PathBuf) -> Self {
        if path.exists() {
            match fs::read_to_string(&path) {
                Ok(contents) => match toml::from_str(&contents) {
                    Ok(config) => {
                        log::info!("configuration loaded from {:?}", path);
                        return config;
                    }
                    Err(e) => {
                        log::warn!("failed to parse config file: {}. using defaults.", e);
                    }
                },
                Err(e) => {
                    log::warn!("failed to read config file: {}. using defaults.", e);
                }
            }
        } else {
            log::info!("no config file found. using defaults.");
        }
        Self::default()
    }

    pub fn save(&self) -> Result<(), String> {
        self.save_to(Self::config_path())
    }

    pub fn save_to(&self, path: PathBuf) -> Result<(), String> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| format!("failed to serialize config: {}", e))?;
        fs::write(&path, contents).map_err(|e| format!("failed to write config file: {}", e))?;
        log::info!("configuration saved to {:?}", path);
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            let app_dir = config_dir.join("pass-cli-core");
            if !app_dir.exists() {
                let _ = fs::create_dir_all(&app_dir);
            }
            app_dir.join(CONFIG_FILE)
        } else {
            PathBuf::from(CONFIG_FILE)
        }
    }

    /// Validate a master password against both this config's minimum
    /// length and the hard floor in [`crate::policy`]. The effective
    /// minimum is whichever is larger: configs may only raise the bar.
    pub fn validate_master_password(&self, password: &str) -> Result<(), crate::error::PolicyError> {
        let effective_min = self.security.min_password_length.max(crate::policy::MIN_LENGTH);
        let len = password.chars().count();
        if len < effective_min {
            return Err(crate::error::PolicyError::Violation {
                rule: "length".into(),
                message: format!("password has {} characters, needs at least {}", len, effective_min),
            });
        }
        crate::policy::validate(password)
    }
}

static CONFIG: std::sync::OnceLock<std::sync::RwLock<Config>> = std::sync::OnceLock::new();

pub fn get_config() -> std::sync::RwLockReadGuard<'static, Config> {
    CONFIG
        .get_or_init(|| std::sync::RwLock::new(Config::load()))
        .read()
        .expect("config lock poisoned")
}

pub fn get_config_mut() -> std::sync::RwLockWriteGuard<'static, Config> {
    CONFIG
        .get_or_init(|| std::sync::RwLock::new(Config::load()))
        .write()
        .expect("config lock poisoned")
}

pub fn reload_config() {
    let mut config = get_config_mut();
    *config = Config::load();
}

pub fn save_config() -> Result<(), String> {
    get_config().save()
}
