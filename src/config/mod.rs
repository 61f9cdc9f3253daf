//! Configuration module: environment-driven settings loaded and validated
//! once at startup. Missing required variables are fatal at bootstrap.

pub mod settings;

pub use settings::{ConfigError, Settings};
