//! Configuration settings for casegate.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::acl::{CaseAccessLevel, Permission};
use crate::error::{AccessError, CasegateError, ConfigError, Result};

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub logging: LoggingConfig,
    pub access: AccessConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(ConfigError::ReadFile)?;
        Self::from_str(&content)
    }

    /// Parse configuration from a TOML string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from default locations or use defaults.
    pub fn load() -> Result<Self> {
        let config_paths = [
            PathBuf::from("casegate.toml"),
            PathBuf::from("config.toml"),
            dirs::config_dir()
                .map(|p| p.join("casegate/config.toml"))
                .unwrap_or_default(),
        ];

        for path in &config_paths {
            if !path.as_os_str().is_empty() && path.exists() {
                tracing::info!("Loading config from: {}", path.display());
                return Self::from_file(path);
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Config::default())
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<()> {
        let creator = self.access.creator_level()?;
        if creator.is_empty() {
            return Err(ConfigError::Invalid(
                "access.creator_access_level must not be empty".to_string(),
            )
            .into());
        }
        if creator.is_denied() {
            return Err(ConfigError::Invalid(
                "access.creator_access_level must not contain deny_all".to_string(),
            )
            .into());
        }
        if self.access.organisation_level()?.is_denied() {
            return Err(ConfigError::Invalid(
                "access.organisation_access_level must not contain deny_all".to_string(),
            )
            .into());
        }

        let mut names = HashSet::new();
        for group in &self.access.default_groups {
            if group.name.trim().is_empty() {
                return Err(
                    ConfigError::Invalid("default group with empty name".to_string()).into(),
                );
            }
            if !names.insert(group.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate default group: {}",
                    group.name
                ))
                .into());
            }
            group.permission_mask()?;
            if group.auto_follow && group.auto_follow_level()?.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "default group {} auto-follows without a level",
                    group.name
                ))
                .into());
            }
        }

        Ok(())
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    pub level: String,
    /// Emit JSON log lines
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Access-control configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessConfig {
    /// Level granted to a case's creator
    pub creator_access_level: Vec<String>,
    /// Level granted to the organisation a case is opened for (empty: none)
    pub organisation_access_level: Vec<String>,
    /// Rebuild the effective-access cache at bootstrap
    pub sync_on_startup: bool,
    /// Groups created at bootstrap when missing
    pub default_groups: Vec<DefaultGroupConfig>,
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            creator_access_level: vec!["full_access".to_string()],
            organisation_access_level: vec!["full_access".to_string()],
            sync_on_startup: true,
            default_groups: vec![
                DefaultGroupConfig {
                    name: "Administrators".to_string(),
                    permissions: vec!["all".to_string()],
                    auto_follow: false,
                    auto_follow_access_level: Vec::new(),
                },
                DefaultGroupConfig {
                    name: "Analysts".to_string(),
                    permissions: Permission::ANALYSTS
                        .names()
                        .into_iter()
                        .map(String::from)
                        .collect(),
                    auto_follow: false,
                    auto_follow_access_level: Vec::new(),
                },
            ],
        }
    }
}

impl AccessConfig {
    /// Level granted to a case's creator.
    pub fn creator_level(&self) -> Result<CaseAccessLevel> {
        parse_levels("access.creator_access_level", &self.creator_access_level)
    }

    /// Level granted to a case's organisation.
    pub fn organisation_level(&self) -> Result<CaseAccessLevel> {
        parse_levels("access.organisation_access_level", &self.organisation_access_level)
    }
}

/// A group created at bootstrap.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultGroupConfig {
    pub name: String,
    /// Permission names; `"all"` selects every permission
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default)]
    pub auto_follow: bool,
    #[serde(default)]
    pub auto_follow_access_level: Vec<String>,
}

impl DefaultGroupConfig {
    /// Combined permission mask.
    pub fn permission_mask(&self) -> Result<Permission> {
        Permission::from_names(&self.permissions).map_err(|err| match err {
            AccessError::UnknownPermission(name) => CasegateError::from(ConfigError::UnknownName {
                field: format!("default group {} permissions", self.name),
                name,
            }),
            other => CasegateError::from(other),
        })
    }

    /// Auto-follow level.
    pub fn auto_follow_level(&self) -> Result<CaseAccessLevel> {
        parse_levels(
            &format!("default group {} auto_follow_access_level", self.name),
            &self.auto_follow_access_level,
        )
    }
}

fn parse_levels(field: &str, names: &[String]) -> Result<CaseAccessLevel> {
    CaseAccessLevel::from_names(names).map_err(|err| match err {
        AccessError::UnknownAccessLevel(name) => CasegateError::from(ConfigError::UnknownName {
            field: field.to_string(),
            name,
        }),
        other => CasegateError::from(other),
    })
}
