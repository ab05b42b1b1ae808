// src/config.rs - Device alarm configuration with YAML support

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use tracing::debug;

use crate::alarms::{AlarmBase, AlarmPriorityMatrix};
use crate::error::{Result, VigilError};
use crate::registry::RegistryConfig;
use crate::search::SearchConfig;

// ============================================================================
// MAIN CONFIGURATION
// ============================================================================

/// Alarm configuration of one device
///
/// # Examples
///
/// ```rust
/// use vigil::Config;
///
/// let config = Config::from_yaml(r#"
/// device: "DEVICE_A"
/// alarms:
///   - criticality: HIGH
///     event:
///       type: threshold
///       tag: "A3"
///       persistence: 30
///       description: "A3 out of range"
///       lower_threshold: 0.0
///       upper_threshold: 100.0
/// "#)?;
///
/// assert_eq!(config.alarms.len(), 1);
/// assert_eq!(config.registry.new_alarm_capacity, 3);
/// # Ok::<(), vigil::VigilError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Device the telemetry belongs to
    pub device: String,

    /// Alarm bases to evaluate
    #[serde(default)]
    pub alarms: Vec<AlarmBase>,

    /// Priority escalation checkpoints, the 0/5/15/30 minute matrix if absent
    #[serde(default)]
    pub priority_matrix: AlarmPriorityMatrix,

    #[serde(default)]
    pub registry: RegistryConfig,

    #[serde(default)]
    pub search: SearchConfig,
}

impl Config {
    /// Load and validate a YAML configuration file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let config = Self::from_yaml(&content)?;
        debug!("Loaded configuration for '{}' from {}", config.device, path.display());
        Ok(config)
    }

    /// Parse and validate a YAML configuration
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize back to YAML
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Check every alarm base and the registry settings
    pub fn validate(&self) -> Result<()> {
        if self.device.trim().is_empty() {
            return Err(VigilError::Config("device name must not be empty".into()));
        }

        let mut descriptions = HashSet::new();
        for alarm in &self.alarms {
            alarm
                .event
                .validate()
                .map_err(|e| VigilError::Config(format!("alarm '{}': {}", alarm.event.description, e)))?;
            if !descriptions.insert(alarm.event.description.as_str()) {
                return Err(VigilError::Config(format!(
                    "duplicate alarm description '{}'",
                    alarm.event.description
                )));
            }
        }

        if self.registry.new_alarm_capacity == 0 {
            return Err(VigilError::Config("registry.new_alarm_capacity must be at least 1".into()));
        }
        if self.registry.event_channel_capacity == 0 {
            return Err(VigilError::Config("registry.event_channel_capacity must be at least 1".into()));
        }

        Ok(())
    }
}
