//! Shared helpers for the confmap crates: path handling, the application
//! configuration file and the JSON sync consumer.

pub mod config;
pub mod path_processing;
pub mod sync;

pub use config::{AppConfig, ConfigError, ReloadPolicy, SyncTarget, default_config_path, load_config, load_config_from_path, validate_config};
pub use path_processing::{expand_tilde, is_rule_file, resolve_relative};
pub use sync::{SyncError, SyncMode, SyncOutcome, sync_json_file};
