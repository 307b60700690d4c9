//! Error types for the casegate access-control engine.

use thiserror::Error;

use crate::acl::{OrganisationId, UserId};

/// Main error type for casegate operations.
#[derive(Error, Debug)]
pub enum CasegateError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Access error: {0}")]
    Access(#[from] AccessError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Configuration-related errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadFile(#[source] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Unknown name in {field}: {name}")]
    UnknownName { field: String, name: String },
}

/// Authorization and grant-mutation errors.
#[derive(Error, Debug)]
pub enum AccessError {
    /// The subject or the case referenced by a grant does not exist.
    #[error("Invalid grant target: {0}")]
    InvalidGrantTarget(String),

    #[error("Empty access level: {0}")]
    EmptyAccessLevel(String),

    /// The mutation would remove the acting user's own administrative access.
    #[error("Self-lockout rejected: {0}")]
    SelfLockoutRejected(String),

    #[error("Organisation {organisation_id} is the primary organisation of user {user_id}")]
    PrimaryOrganisation {
        user_id: UserId,
        organisation_id: OrganisationId,
    },

    #[error("Access denied [{correlation_id}]: {reason}")]
    Denied {
        correlation_id: String,
        reason: String,
    },

    #[error("Unknown case access level: {0}")]
    UnknownAccessLevel(String),

    #[error("Unknown permission: {0}")]
    UnknownPermission(String),
}

/// Storage-related errors.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),
}

/// Result type alias for casegate operations.
pub type Result<T> = std::result::Result<T, CasegateError>;
