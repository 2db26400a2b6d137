use serde::Deserialize;

/// Complete growthd configuration
#[derive(Debug, Clone, Deserialize)]
pub struct GrowthConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub oauth: OAuthConfig,
    #[serde(default)]
    pub refresh: RefreshConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Public base URL used to build OAuth redirect URIs.
    #[serde(default = "default_public_url")]
    pub public_url: String,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_public_url() -> String {
    "http://localhost:8080".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            public_url: default_public_url(),
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String {
    "growthd.db".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// OAuth flow configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthConfig {
    /// How long a pending PKCE state remains valid (seconds)
    #[serde(default = "default_state_expiry")]
    pub state_expiry_seconds: i64,
    /// How often expired states are swept (seconds)
    #[serde(default = "default_state_cleanup_interval")]
    pub state_cleanup_interval_seconds: u64,
}

fn default_state_expiry() -> i64 {
    600
}

fn default_state_cleanup_interval() -> u64 {
    60
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            state_expiry_seconds: default_state_expiry(),
            state_cleanup_interval_seconds: default_state_cleanup_interval(),
        }
    }
}

/// Background token refresh configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RefreshConfig {
    /// Sweep interval (seconds); the first sweep runs at startup
    #[serde(default = "default_refresh_interval")]
    pub interval_seconds: u64,
}

fn default_refresh_interval() -> u64 {
    12 * 60 * 60
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            interval_seconds: default_refresh_interval(),
        }
    }
}

impl Default for GrowthConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            oauth: OAuthConfig::default(),
            refresh: RefreshConfig::default(),
        }
    }
}

/// Load configuration from TOML file
pub fn load_config(path: &str) -> Result<GrowthConfig, Box<dyn std::error::Error>> {
    let contents = std::fs::read_to_string(path)?;
    let config: GrowthConfig = toml::from_str(&contents)?;
    Ok(config)
}

/// Secrets are never read from the config file, only the environment.
#[derive(Clone)]
pub struct Secrets {
    pub encryption_secret: String,
    pub payment_secret_key: String,
    pub ai_api_key: String,
}

impl Secrets {
    pub fn from_env() -> anyhow::Result<Self> {
        let encryption_secret = std::env::var("GROWTHD_ENCRYPTION_SECRET")
            .map_err(|_| anyhow::anyhow!("GROWTHD_ENCRYPTION_SECRET must be set"))?;
        let payment_secret_key =
            std::env::var("GROWTHD_PAYMENT_SECRET_KEY").unwrap_or_default();
        let ai_api_key = std::env::var("GROWTHD_AI_API_KEY").unwrap_or_default();
        Ok(Self {
            encryption_secret,
            payment_secret_key,
            ai_api_key,
        })
    }
}
