use std::path::{Path, PathBuf};

use {anyhow::Context, secrecy::Secret};

use crate::schema::OutlookConfig;

/// `<config dir>/outlook-mcp/config.toml`, if a config directory can be determined.
pub fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "outlook-mcp").map(|d| d.config_dir().join("config.toml"))
}

/// Load configuration: defaults, then the TOML file, then environment overrides.
///
/// An explicitly requested file must exist; the default location is optional.
pub fn load(explicit: Option<&Path>) -> anyhow::Result<OutlookConfig> {
    let mut config = match explicit {
        Some(path) => read_file(path)?,
        None => match default_config_path() {
            Some(path) if path.is_file() => read_file(&path)?,
            _ => OutlookConfig::default(),
        },
    };
    apply_env(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

fn read_file(path: &Path) -> anyhow::Result<OutlookConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let config: OutlookConfig =
        toml::from_str(&raw).with_context(|| format!("invalid config file {}", path.display()))?;
    tracing::debug!(path = %path.display(), "loaded config file");
    Ok(config)
}

/// Apply environment overrides. Empty values are ignored.
pub(crate) fn apply_env(config: &mut OutlookConfig, lookup: impl Fn(&str) -> Option<String>) {
    let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(v) = get("MS_CLIENT_ID") {
        config.auth.client_id = v;
    }
    if let Some(v) = get("MS_CLIENT_SECRET") {
        config.auth.client_secret = Secret::new(v);
    }
    if let Some(v) = get("MS_TENANT_ID") {
        config.auth.tenant = v;
    }
    if let Some(v) = get("OUTLOOK_MCP_TOKEN_PATH") {
        config.auth.token_store_path = PathBuf::from(v);
    }
    if let Some(v) = get("OUTLOOK_MCP_GRAPH_ENDPOINT") {
        config.graph.endpoint = v;
    }
}
