//! Configuration module for the harvest engine
//!
//! This module handles loading, parsing, and validating TOML configuration files
//! for the `harvest` binary, and defines [`EngineConfig`], the value the engine
//! itself is constructed with.
//!
//! # Example
//!
//! ```no_run
//! use harvest_engine::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("harvest.toml")).unwrap();
//! println!("Batch size: {}", config.engine.batch_size);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    Config, EngineConfig, MalformedPolicy, OutputConfig, SourceConfig, UserAgentConfig,
};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash, parse_config};

pub use validation::validate_engine_config;
