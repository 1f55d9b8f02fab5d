//! # Configuration Modules
//!
//! Bundled endpoint, header and dummy-data tables plus the settings layer
//! (`nepse.settings.json`, `.env`, `NEPSE_*` environment variables).

/// Provides the client configuration and its loaders.
pub mod nepse_config;
