// Copyright (c) 2025 SOLARE S.R.O.
//
// This file is part of SolION.
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// (CC BY-NC-ND 4.0). You may use and share this file for non-commercial purposes only and you may not
// create derivatives. See <https://creativecommons.org/licenses/by-nc-nd/4.0/>.
//
// This software is provided "AS IS", without warranty of any kind.
//
// For commercial licensing, please contact: info@solare.cz

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

use solion_types::PlanConfig;

/// Main application configuration - SolION
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// Planning cascade parameters
    #[serde(default)]
    pub plan: PlanConfig,

    /// System configuration
    #[serde(default)]
    pub system: SystemConfig,
}

/// System configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemConfig {
    /// Seconds between planning cycles
    #[serde(default = "default_update_interval")]
    pub update_interval_secs: u64,

    /// Path of the execution history CSV
    #[serde(default = "default_history_file")]
    pub history_file: String,

    /// Battery SOC reported by the simulated inverter
    #[serde(default = "default_sim_soc")]
    pub simulated_battery_soc: u32,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            update_interval_secs: default_update_interval(),
            history_file: default_history_file(),
            simulated_battery_soc: default_sim_soc(),
        }
    }
}

fn default_update_interval() -> u64 {
    300
}

fn default_history_file() -> String {
    "solion-history.csv".to_owned()
}

fn default_sim_soc() -> u32 {
    50
}

/// Load configuration from `path`. A missing file runs on defaults; a present
/// but invalid file is a hard error so a typo cannot silently fall back.
pub fn load_config(path: &Path) -> Result<AppConfig> {
    if !path.exists() {
        warn!(path = %path.display(), "no config file, running with defaults");
        return Ok(AppConfig::default());
    }

    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config file {}", path.display()))?;
    let config: AppConfig =
        toml::from_str(&raw).with_context(|| format!("parsing config file {}", path.display()))?;

    if !config.plan.is_valid() {
        bail!("invalid planning parameters in {}", path.display());
    }
    if config.system.update_interval_secs == 0 {
        bail!("update_interval_secs must be positive in {}", path.display());
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(&dir.path().join("missing.toml")).unwrap();
        assert_eq!(config.system.update_interval_secs, 300);
        assert!(config.plan.is_valid());
    }

    #[test]
    fn test_partial_config_parses() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[plan]
full_charge_slot_count = 10
simulate_only = true

[system]
update_interval_secs = 60
"#,
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.plan.full_charge_slot_count, 10);
        assert!(config.plan.simulate_only);
        assert_eq!(config.system.update_interval_secs, 60);
        // Unspecified fields keep their defaults
        assert_eq!(config.plan.max_charge_amps, 50);
    }

    #[test]
    fn test_invalid_plan_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[plan]\nfull_charge_slot_count = 0\n").unwrap();
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn test_garbage_toml_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "not toml at all [[").unwrap();
        assert!(load_config(&path).is_err());
    }
}
