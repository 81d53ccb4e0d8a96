//! Process-wide configuration for the Outlook assistant.
//!
//! Loaded once at startup (defaults, then an optional TOML file, then
//! environment overrides) and shared immutably afterwards.

pub mod loader;
pub mod schema;

pub use {
    loader::{default_config_path, load},
    schema::{AuthConfig, GraphConfig, OutlookConfig, RedirectTarget, RetryConfig},
};
