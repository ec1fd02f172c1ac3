// Configuration module for sitcom-shuffle
// Handles XDG-compliant directory paths and TOML configuration file

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::models::ShufflePolicy;

const APP_NAME: &str = "sitcom-shuffle";
const CONFIG_FILENAME: &str = "config.toml";

/// TOML configuration file structure
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    /// Server configuration
    pub server: ServerConfig,

    /// Directory paths (overrides XDG defaults)
    pub paths: PathsConfig,

    /// Trakt upstream configuration
    pub trakt: TraktConfig,

    /// Catalog aggregation and cache configuration
    pub catalog: CatalogConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server port (default: 7000)
    pub port: u16,

    /// Bind address (default: 0.0.0.0)
    pub bind_address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 7000,
            bind_address: "0.0.0.0".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Override data directory (database and snapshot blobs)
    pub data_dir: Option<PathBuf>,

    /// Override config directory
    pub config_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TraktConfig {
    /// Trakt API application client id
    pub client_id: Option<String>,

    /// Trakt API application client secret (needed for token refresh)
    pub client_secret: Option<String>,

    /// OAuth access token for the user's account
    pub access_token: Option<String>,

    /// OAuth refresh token, rotated on refresh
    pub refresh_token: Option<String>,

    /// Trakt username owning the list (default: "me")
    pub username: Option<String>,

    /// List id or slug to aggregate (default: "default-list")
    pub list_id: Option<String>,

    /// Override the API base URL (used by integration setups)
    pub api_base: Option<String>,

    /// Per-request timeout in seconds (default: 15)
    pub request_timeout_secs: Option<u64>,
}

/// Catalog aggregation and cache tunables
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// Snapshot TTL in minutes (default: 60). This is a slowly-changing
    /// catalog; minutes, not seconds.
    pub ttl_minutes: u64,

    /// Number of shows fetched concurrently per batch (default: 5).
    /// A load-shaping tunable, not a correctness knob.
    pub batch_size: usize,

    /// Ordering policy: "fair" (default) or "uniform"
    pub shuffle_policy: ShufflePolicy,

    /// Keep season 0 (specials) episodes (default: false)
    pub include_specials: bool,

    /// Drop shows without an IMDb id (default: true)
    pub require_imdb_ids: bool,

    /// Serve a stale snapshot while refreshing in the background
    /// (default: true). When false, stale reads block on the refresh.
    pub serve_stale: bool,

    /// Publish a snapshot even when aggregation yielded zero episodes from
    /// a non-empty show list (default: false)
    pub publish_empty: bool,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            ttl_minutes: 60,
            batch_size: 5,
            shuffle_policy: ShufflePolicy::Fair,
            include_specials: false,
            require_imdb_ids: true,
            serve_stale: true,
            publish_empty: false,
        }
    }
}

/// Application paths following XDG Base Directory Specification on Unix
#[derive(Debug, Clone)]
pub struct AppPaths {
    /// Directory for configuration files (config.toml)
    pub config_dir: PathBuf,

    /// Directory for persistent data (database, snapshot blobs)
    pub data_dir: PathBuf,
}

impl AppPaths {
    pub fn new(overrides: &PathsConfig) -> Self {
        Self {
            config_dir: Self::resolve_config_dir(&overrides.config_dir),
            data_dir: Self::resolve_data_dir(&overrides.data_dir),
        }
    }

    /// Current-directory paths for portable/development mode
    pub fn current_dir() -> Self {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self {
            config_dir: cwd.clone(),
            data_dir: cwd,
        }
    }

    fn resolve_config_dir(config_override: &Option<PathBuf>) -> PathBuf {
        if let Ok(path) = std::env::var("SITCOM_SHUFFLE_CONFIG_DIR") {
            return PathBuf::from(path);
        }
        if let Some(ref path) = config_override {
            return path.clone();
        }
        if let Some(dir) = dirs::config_dir() {
            return dir.join(APP_NAME);
        }
        std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
    }

    fn resolve_data_dir(config_override: &Option<PathBuf>) -> PathBuf {
        if let Ok(path) = std::env::var("SITCOM_SHUFFLE_DATA_DIR") {
            return PathBuf::from(path);
        }
        if let Some(ref path) = config_override {
            return path.clone();
        }
        if let Some(dir) = dirs::data_dir() {
            return dir.join(APP_NAME);
        }
        std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
    }

    /// Get the database file path
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("catalog.db")
    }

    /// Get the database URL for SQLite
    pub fn database_url(&self) -> String {
        format!("sqlite:{}?mode=rwc", self.database_path().display())
    }

    /// Directory holding serialized snapshot blobs
    pub fn snapshot_dir(&self) -> PathBuf {
        self.data_dir.join("snapshots")
    }

    /// Ensure all directories exist
    pub async fn ensure_dirs(&self) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.config_dir).await?;
        tokio::fs::create_dir_all(&self.data_dir).await?;
        tokio::fs::create_dir_all(self.snapshot_dir()).await?;
        Ok(())
    }
}

impl Default for AppPaths {
    fn default() -> Self {
        Self::new(&PathsConfig::default())
    }
}

/// Application configuration - combines TOML file with environment overrides
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub paths: AppPaths,
    pub port: u16,
    pub bind_address: String,
    pub trakt: TraktConfig,
    pub catalog: CatalogConfig,
}

impl AppConfig {
    /// Load configuration from TOML file and environment
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables
    /// 2. TOML config file
    /// 3. Default values
    pub fn load() -> Self {
        let portable_mode = std::env::var("SITCOM_SHUFFLE_PORTABLE")
            .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
            .unwrap_or(false);

        if portable_mode {
            tracing::info!("Running in portable mode (using current directory)");
            let mut config = Self::build(ConfigFile::default());
            config.paths = AppPaths::current_dir();
            return config;
        }

        let config_dir = Self::find_config_dir();
        let config_file = Self::load_config_file(&config_dir);
        Self::build(config_file)
    }

    fn find_config_dir() -> PathBuf {
        if let Ok(path) = std::env::var("SITCOM_SHUFFLE_CONFIG_DIR") {
            return PathBuf::from(path);
        }
        if let Some(dir) = dirs::config_dir() {
            return dir.join(APP_NAME);
        }
        std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
    }

    fn load_config_file(config_dir: &std::path::Path) -> ConfigFile {
        let config_path = config_dir.join(CONFIG_FILENAME);

        if !config_path.exists() {
            tracing::debug!(
                "No config file found at {}, using defaults",
                config_path.display()
            );
            return ConfigFile::default();
        }

        match std::fs::read_to_string(&config_path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => {
                    tracing::info!("Loaded configuration from {}", config_path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!(
                        "Failed to parse config file {}: {}. Using defaults.",
                        config_path.display(),
                        e
                    );
                    ConfigFile::default()
                }
            },
            Err(e) => {
                tracing::warn!(
                    "Failed to read config file {}: {}. Using defaults.",
                    config_path.display(),
                    e
                );
                ConfigFile::default()
            }
        }
    }

    /// Build configuration from config file with environment overrides.
    /// Trakt env var names match the original addon's deployment variables.
    fn build(config_file: ConfigFile) -> Self {
        let paths = AppPaths::new(&config_file.paths);

        let port = std::env::var("SITCOM_SHUFFLE_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(config_file.server.port);

        let bind_address = std::env::var("SITCOM_SHUFFLE_BIND_ADDRESS")
            .unwrap_or(config_file.server.bind_address);

        let trakt = TraktConfig {
            client_id: env_or("TRAKT_CLIENT_ID", config_file.trakt.client_id),
            client_secret: env_or("TRAKT_CLIENT_SECRET", config_file.trakt.client_secret),
            access_token: env_or("TRAKT_ACCESS_TOKEN", config_file.trakt.access_token),
            refresh_token: env_or("TRAKT_REFRESH_TOKEN", config_file.trakt.refresh_token),
            username: env_or("TRAKT_USERNAME", config_file.trakt.username),
            list_id: env_or("TRAKT_LIST_ID", config_file.trakt.list_id),
            api_base: env_or("TRAKT_API_BASE", config_file.trakt.api_base),
            request_timeout_secs: config_file.trakt.request_timeout_secs,
        };

        Self {
            paths,
            port,
            bind_address,
            trakt,
            catalog: config_file.catalog,
        }
    }

    /// Get the database URL, with override from DATABASE_URL env var
    pub fn database_url(&self) -> String {
        std::env::var("DATABASE_URL").unwrap_or_else(|_| self.paths.database_url())
    }

    pub fn trakt_username(&self) -> String {
        self.trakt
            .username
            .clone()
            .unwrap_or_else(|| "me".to_string())
    }

    pub fn trakt_list_id(&self) -> String {
        self.trakt
            .list_id
            .clone()
            .unwrap_or_else(|| "default-list".to_string())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.trakt.request_timeout_secs.unwrap_or(15))
    }

    pub fn snapshot_ttl(&self) -> Duration {
        Duration::from_secs(self.catalog.ttl_minutes * 60)
    }

    /// Whether the upstream credentials needed for aggregation are present
    pub fn trakt_configured(&self) -> bool {
        self.trakt.client_id.is_some() && self.trakt.access_token.is_some()
    }

    /// Log configuration status
    pub fn log_config(&self) {
        tracing::info!("Configuration directory: {}", self.paths.config_dir.display());
        tracing::info!("Data directory: {}", self.paths.data_dir.display());
        tracing::info!("Server listening on {}:{}", self.bind_address, self.port);
        tracing::info!(
            "Catalog: list '{}' for user '{}', {:?} shuffle, TTL {} min, batch {}",
            self.trakt_list_id(),
            self.trakt_username(),
            self.catalog.shuffle_policy,
            self.catalog.ttl_minutes,
            self.catalog.batch_size
        );

        if !self.trakt_configured() {
            tracing::warn!(
                "Trakt is not configured; the catalog will stay empty. \
                 Set TRAKT_CLIENT_ID and TRAKT_ACCESS_TOKEN or fill the [trakt] config section."
            );
        }
    }
}

fn env_or(name: &str, fallback: Option<String>) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty()).or(fallback)
}
