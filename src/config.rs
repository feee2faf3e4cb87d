//! Simulator configuration: numeric precision, auto-normalization and the
//! "cheat" permission that gates introspection.
//!
//! - `SimConfig::default()` → built-in values
//! - `SimConfig::from_toml_file(path)` → user values, missing keys fall back
//! - `SimConfig::from_user_default_or_builtin()` → ~/.titan/qstate.toml if present
//! - `init_global(cfg)` / `global()` → process-wide default, settable once

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use once_cell::sync::OnceCell;
use serde::Deserialize;

use crate::core::error::QError;

/// `f64` complex numbers carry 15 significant decimals; keep one as guard.
pub const DEFAULT_PRECISION: u32 = 14;
pub const DEFAULT_DISPLAY_DIGITS: usize = 5;

static GLOBAL: OnceCell<SimConfig> = OnceCell::new();

#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimConfig {
    /// Decimal digits that must agree for two scalars to compare equal.
    pub precision: u32,
    /// Normalize non-unit vectors at construction instead of rejecting them.
    pub auto_normalize: bool,
    /// Allow peeking at amplitudes (raw state, marginals, printing).
    pub cheat: bool,
    /// Decimals shown when formatting amplitudes.
    pub display_digits: usize,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            precision: DEFAULT_PRECISION,
            auto_normalize: false,
            cheat: true,
            display_digits: DEFAULT_DISPLAY_DIGITS,
        }
    }
}

impl SimConfig {
    pub fn with_precision(mut self, precision: u32) -> Self {
        self.precision = precision;
        self
    }

    pub fn with_auto_normalize(mut self, on: bool) -> Self {
        self.auto_normalize = on;
        self
    }

    pub fn with_cheat(mut self, on: bool) -> Self {
        self.cheat = on;
        self
    }

    pub fn with_display_digits(mut self, digits: usize) -> Self {
        self.display_digits = digits;
        self
    }

    /// Absolute tolerance implied by `precision`.
    pub fn tolerance(&self) -> f64 {
        10f64.powi(-(self.precision as i32))
    }

    pub fn validate(&self) -> std::result::Result<(), QError> {
        if !(1..=15).contains(&self.precision) {
            return Err(QError::init(format!(
                "precision must be between 1 and 15 (got {})",
                self.precision
            )));
        }
        if self.display_digits < 1 {
            return Err(QError::init("display_digits must be at least 1"));
        }
        Ok(())
    }

    /// Fails with `NotAllowed` when introspection is switched off.
    pub fn ensure_cheat(&self) -> std::result::Result<(), QError> {
        if self.cheat {
            Ok(())
        } else {
            Err(QError::cheating())
        }
    }

    pub fn from_toml_str(txt: &str) -> Result<Self> {
        let cfg: SimConfig = toml::from_str(txt).context("parsing simulator config")?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load from TOML file.
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let txt = fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_toml_str(&txt).with_context(|| format!("loading {}", path.display()))
    }

    /// Use ~/.titan/qstate.toml if present; otherwise built-in.
    pub fn from_user_default_or_builtin() -> Self {
        if let Some(p) = default_config_path() {
            if p.exists() {
                match Self::from_toml_file(&p) {
                    Ok(cfg) => return cfg,
                    Err(e) => tracing::warn!("failed loading {}, using builtin config: {e:#}", p.display()),
                }
            }
        }
        Self::default()
    }
}

/// ~/.titan/qstate.toml
pub fn default_config_path() -> Option<PathBuf> {
    dirs_next::home_dir().map(|h| h.join(".titan").join("qstate.toml"))
}

/// Install the process-wide default. Succeeds at most once, and only before
/// anything has read `global()`.
pub fn init_global(cfg: SimConfig) -> std::result::Result<(), QError> {
    cfg.validate()?;
    GLOBAL
        .set(cfg)
        .map_err(|_| QError::illegal("global simulator config already initialized"))?;
    tracing::debug!(?cfg, "global simulator config installed");
    Ok(())
}

/// The installed process-wide config, or the defaults.
pub fn global() -> SimConfig {
    *GLOBAL.get_or_init(SimConfig::default)
}
