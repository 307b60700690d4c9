//! Configuration loading.

mod settings;

pub use settings::{AccessConfig, Config, DefaultGroupConfig, LoggingConfig};
