//! Shared types, error model, and configuration for castlefinder.
//!
//! This crate is the foundation depended on by all other castlefinder crates.
//! It provides:
//! - [`CastleFinderError`]: the unified error type
//! - The castle model ([`Castle`], [`Country`], [`PropertyCondition`], [`Source`])
//! - Name normalization and noise-word filtering ([`text`])
//! - Configuration ([`AppConfig`], [`PipelineConfig`], config loading)

pub mod config;
pub mod error;
pub mod text;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, HttpConfig, PipelineConfig, PipelineSettings, StorageConfig, config_dir,
    config_file_path, init_config, load_config, load_config_from, resolve_db_path,
    validate_config,
};
pub use error::{CastleFinderError, Result};
pub use types::{Castle, Contact, Country, Facilities, PropertyCondition, Source, VisitingInfo};
