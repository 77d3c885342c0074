//! Layered configuration: built-in defaults, an optional TOML file, then
//! `AGENCY_HUB__*` environment variables.

use crate::error::{Error, Result};

use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Environment variable prefix. Nested keys use `__`, e.g.
/// `AGENCY_HUB__DATABASE__URL`.
pub const ENV_PREFIX: &str = "AGENCY_HUB";

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub google: GoogleConfig,
    pub debrief: DebriefConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    /// Allowed CORS origins. Empty allows any origin.
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GoogleConfig {
    /// Pre-issued access token. Takes precedence over the refresh flow.
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
    pub token_uri: String,
    /// Drive folder that holds meeting note documents.
    #[serde(default)]
    pub drive_folder_id: Option<String>,
    pub api_base: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DebriefConfig {
    /// Owner recorded for documents whose Drive metadata has no owner email.
    pub default_owner_email: String,
    pub default_limit: u32,
    /// Upper bound on the simplified text handed to extraction.
    pub max_chars: usize,
    /// Bytes of context kept before the located heading.
    pub context_before: usize,
    /// Fire topic processing for pending notes after each sync.
    pub auto_process: bool,
    /// Notes left `processing` longer than this are queued again.
    pub stale_processing_minutes: i64,
    /// Shared secret accepted in `x-sync-secret` for unattended sync calls.
    #[serde(default)]
    pub sync_secret: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub filter: String,
    pub json: bool,
    /// Write a daily-rolling log file here in addition to stderr.
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

impl AppConfig {
    /// Load configuration. An explicit `path` must exist; the default path
    /// is optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file_source = match path {
            Some(path) => {
                if !path.exists() {
                    return Err(Error::Config(format!(
                        "config file not found: {}",
                        path.display()
                    )));
                }
                config::File::from(path).required(true)
            }
            None => config::File::from(default_config_path()).required(false),
        };

        let settings = Self::builder()?
            .add_source(file_source)
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: AppConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults only, no file or environment lookups.
    pub fn defaults() -> Result<Self> {
        let config: AppConfig = Self::builder()?.build()?.try_deserialize()?;
        Ok(config)
    }

    fn builder() -> Result<config::ConfigBuilder<config::builder::DefaultState>> {
        Ok(config::Config::builder()
            .set_default("server.bind", "127.0.0.1:19880")?
            .set_default("server.allowed_origins", Vec::<String>::new())?
            .set_default("database.url", "sqlite://agency-hub.db")?
            .set_default("database.max_connections", 5)?
            .set_default("google.token_uri", "https://oauth2.googleapis.com/token")?
            .set_default("google.api_base", "https://www.googleapis.com")?
            .set_default("debrief.default_owner_email", "debrief@agency.local")?
            .set_default("debrief.default_limit", 20)?
            .set_default("debrief.max_chars", 12_000)?
            .set_default("debrief.context_before", 400)?
            .set_default("debrief.auto_process", true)?
            .set_default("debrief.stale_processing_minutes", 30)?
            .set_default("logging.filter", "info")?
            .set_default("logging.json", false)?)
    }

    fn validate(&self) -> Result<()> {
        if self.database.max_connections == 0 {
            return Err(Error::Config(
                "database.max_connections must be at least 1".into(),
            ));
        }
        if self.debrief.max_chars == 0 {
            return Err(Error::Config("debrief.max_chars must be positive".into()));
        }
        if self.debrief.stale_processing_minutes < 1 {
            return Err(Error::Config(
                "debrief.stale_processing_minutes must be at least 1".into(),
            ));
        }
        if !self.debrief.default_owner_email.contains('@') {
            return Err(Error::Config(format!(
                "debrief.default_owner_email is not an email: {}",
                self.debrief.default_owner_email
            )));
        }
        Ok(())
    }
}

/// `$XDG_CONFIG_HOME/agency-hub/config.toml` or platform equivalent.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("agency-hub")
        .join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn test_defaults() {
        let config = AppConfig::defaults().expect("defaults");
        assert_eq!(config.server.bind.port(), 19880);
        assert_eq!(config.database.max_connections, 5);
        assert_eq!(config.debrief.default_limit, 20);
        assert_eq!(config.debrief.max_chars, 12_000);
        assert!(config.debrief.auto_process);
        assert_eq!(config.debrief.stale_processing_minutes, 30);
        assert!(config.google.drive_folder_id.is_none());
        assert!(config.logging.directory.is_none());
    }

    #[test]
    fn test_file_overrides_defaults() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .expect("tempfile");
        write!(
            file,
            r#"
[server]
bind = "0.0.0.0:8080"

[google]
drive_folder_id = "folder-123"

[debrief]
default_owner_email = "ops@example.com"
auto_process = false
"#
        )
        .expect("write config");

        let config = AppConfig::load(Some(file.path())).expect("load");
        assert_eq!(config.server.bind.port(), 8080);
        assert_eq!(config.google.drive_folder_id.as_deref(), Some("folder-123"));
        assert_eq!(config.debrief.default_owner_email, "ops@example.com");
        assert!(!config.debrief.auto_process);
        // untouched keys keep their defaults
        assert_eq!(config.debrief.default_limit, 20);
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let result = AppConfig::load(Some(Path::new("/nonexistent/agency-hub.toml")));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_rejects_bad_owner_email() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .expect("tempfile");
        write!(file, "[debrief]\ndefault_owner_email = \"nobody\"\n").expect("write");

        let result = AppConfig::load(Some(file.path()));
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
