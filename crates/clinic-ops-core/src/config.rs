//! Engine configuration.
//!
//! Loaded once at startup from TOML and passed by reference to the handlers.
//!
//! ```toml
//! practitioner_roles = ["veterinarian", "veterinary_technician"]
//! triage_roles = ["veterinarian", "veterinary_technician", "assistant", "receptionist"]
//!
//! [scheduling]
//! min_slot_minutes = 5
//! max_slot_minutes = 480
//!
//! [coordination]
//! max_attempts = 5
//! retry_batch_size = 50
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::ClinicRole;

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cannot parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Roles allowed to own appointments and consultations
    pub practitioner_roles: Vec<ClinicRole>,
    /// Roles allowed to call and serve waiting-room entries
    pub triage_roles: Vec<ClinicRole>,
    pub scheduling: SchedulingConfig,
    pub coordination: CoordinationConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            practitioner_roles: vec![ClinicRole::Veterinarian, ClinicRole::VeterinaryTechnician],
            triage_roles: vec![
                ClinicRole::Veterinarian,
                ClinicRole::VeterinaryTechnician,
                ClinicRole::Assistant,
                ClinicRole::Receptionist,
            ],
            scheduling: SchedulingConfig::default(),
            coordination: CoordinationConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulingConfig {
    pub min_slot_minutes: u32,
    pub max_slot_minutes: u32,
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            min_slot_minutes: 5,
            max_slot_minutes: 480,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinationConfig {
    /// Attempts (including the original call) before a failure is abandoned
    pub max_attempts: u32,
    pub retry_batch_size: u32,
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            retry_batch_size: 50,
        }
    }
}

impl EngineConfig {
    /// Parse and validate a TOML document. Missing keys take defaults.
    pub fn from_toml_str(source: &str) -> ConfigResult<Self> {
        let config: EngineConfig = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.practitioner_roles.is_empty() {
            return Err(ConfigError::Invalid("practitioner_roles cannot be empty".into()));
        }
        if self.triage_roles.is_empty() {
            return Err(ConfigError::Invalid("triage_roles cannot be empty".into()));
        }
        let scheduling = &self.scheduling;
        if scheduling.min_slot_minutes == 0 || scheduling.min_slot_minutes > scheduling.max_slot_minutes {
            return Err(ConfigError::Invalid(format!(
                "slot bounds must satisfy 0 < min ({}) <= max ({})",
                scheduling.min_slot_minutes, scheduling.max_slot_minutes
            )));
        }
        if self.coordination.max_attempts == 0 {
            return Err(ConfigError::Invalid("coordination.max_attempts must be at least 1".into()));
        }
        if self.coordination.retry_batch_size == 0 {
            return Err(ConfigError::Invalid(
                "coordination.retry_batch_size must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_partial_document_takes_defaults() {
        let config = EngineConfig::from_toml_str(
            r#"
            practitioner_roles = ["veterinarian"]

            [coordination]
            max_attempts = 3
            "#,
        )
        .unwrap();

        assert_eq!(config.practitioner_roles, vec![ClinicRole::Veterinarian]);
        assert_eq!(config.coordination.max_attempts, 3);
        assert_eq!(config.coordination.retry_batch_size, 50);
        assert_eq!(config.scheduling, SchedulingConfig::default());
    }

    #[test]
    fn test_unknown_role_rejected() {
        let result = EngineConfig::from_toml_str(r#"practitioner_roles = ["surgeon"]"#);
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_inverted_slot_bounds_rejected() {
        let result = EngineConfig::from_toml_str(
            r#"
            [scheduling]
            min_slot_minutes = 60
            max_slot_minutes = 30
            "#,
        );
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_empty_roles_rejected() {
        let result = EngineConfig::from_toml_str("triage_roles = []");
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[scheduling]\nmax_slot_minutes = 120").unwrap();

        let config = EngineConfig::load(file.path()).unwrap();
        assert_eq!(config.scheduling.max_slot_minutes, 120);
        assert_eq!(config.scheduling.min_slot_minutes, 5);
    }
}
