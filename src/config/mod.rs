//! Configuration module for doc-history
//!
//! This module provides configuration management including:
//! - Path resolution for file-backed history collections
//! - Serializable history settings
//! - The full option set of a tracked collection

pub mod options;
pub mod paths;
pub mod settings;

pub use options::HistoryOptions;
pub use paths::HistoryPaths;
pub use settings::{HistorySettings, DEFAULT_SUFFIX};
