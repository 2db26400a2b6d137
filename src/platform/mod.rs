//! Social platform adapters.
//!
//! Each supported platform implements [`SocialPlatformAdapter`], so the OAuth
//! orchestrator is written once against the trait instead of per-platform
//! route duplication. Adapters are stateless: credentials and connection
//! records are managed by the connection store.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

mod facebook;
mod http;
mod instagram;
mod linkedin;
mod tiktok;
mod youtube;

pub use facebook::FacebookAdapter;
pub use instagram::InstagramAdapter;
pub use linkedin::LinkedInAdapter;
pub use tiktok::{generate_pkce, TikTokAdapter};
pub use youtube::YouTubeAdapter;

/// Supported social platforms.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Facebook,
    Instagram,
    Linkedin,
    Youtube,
    Tiktok,
}

impl Platform {
    pub const ALL: [Platform; 5] = [
        Platform::Facebook,
        Platform::Instagram,
        Platform::Linkedin,
        Platform::Youtube,
        Platform::Tiktok,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Facebook => "facebook",
            Platform::Instagram => "instagram",
            Platform::Linkedin => "linkedin",
            Platform::Youtube => "youtube",
            Platform::Tiktok => "tiktok",
        }
    }

    pub fn parse(s: &str) -> Option<Platform> {
        match s {
            "facebook" => Some(Platform::Facebook),
            "instagram" => Some(Platform::Instagram),
            "linkedin" => Some(Platform::Linkedin),
            "youtube" => Some(Platform::Youtube),
            "tiktok" => Some(Platform::Tiktok),
            _ => None,
        }
    }

    /// Human-readable name for HTML pages and messages.
    pub fn display_name(&self) -> &'static str {
        match self {
            Platform::Facebook => "Facebook",
            Platform::Instagram => "Instagram",
            Platform::Linkedin => "LinkedIn",
            Platform::Youtube => "YouTube",
            Platform::Tiktok => "TikTok",
        }
    }

    /// What the platform's postable resource is called in user-facing errors.
    pub fn resource_noun(&self) -> &'static str {
        match self {
            Platform::Facebook => "Facebook Page",
            Platform::Instagram => "Instagram Business Account",
            Platform::Linkedin => "LinkedIn organization",
            Platform::Youtube => "YouTube channel",
            Platform::Tiktok => "TikTok account",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// OAuth client credentials for one platform, loaded from environment.
#[derive(Clone, Debug)]
pub struct OAuthKeys {
    pub client_id: String,
    pub client_secret: String,
}

impl OAuthKeys {
    /// Reads `GROWTHD_OAUTH_<PLATFORM>_CLIENT_ID` / `_CLIENT_SECRET`.
    ///
    /// Returns `None` when either variable is unset; the platform is then
    /// simply not available for connection.
    pub fn from_env(platform: Platform) -> Option<Self> {
        let prefix = platform.as_str().to_uppercase();
        let client_id = std::env::var(format!("GROWTHD_OAUTH_{}_CLIENT_ID", prefix)).ok()?;
        let client_secret = std::env::var(format!("GROWTHD_OAUTH_{}_CLIENT_SECRET", prefix)).ok()?;
        Some(Self {
            client_id,
            client_secret,
        })
    }
}

/// Raw token set returned by a platform's token endpoint.
#[derive(Clone, Debug)]
pub struct TokenSet {
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Seconds until the access token expires, when the platform reports it.
    pub expires_in: Option<i64>,
    /// TikTok's stable user identifier, returned alongside the tokens.
    pub open_id: Option<String>,
}

/// A postable entity discovered on the platform (Page, channel, org, user).
#[derive(Clone, Debug, Serialize)]
pub struct Resource {
    pub id: String,
    pub name: String,
    /// Extra identity fields to persist (e.g. `username`, `subscriber_count`).
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub meta: Map<String, Value>,
}

impl Resource {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            meta: Map::new(),
        }
    }
}

/// Plaintext connection record an adapter produces for persistence.
///
/// The connection store encrypts the tokens before they touch disk.
#[derive(Clone, Debug)]
pub struct ConnectionData {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    /// Platform-specific identity fields (`page_id`, `channel_name`, ...).
    pub identity: Map<String, Value>,
}

/// Computes the absolute expiry from a relative `expires_in`.
pub fn expires_at_from(expires_in: Option<i64>) -> Option<DateTime<Utc>> {
    expires_in.map(|secs| Utc::now() + Duration::seconds(secs))
}

/// Per-platform OAuth and resource-discovery API surface.
///
/// # Lifecycle
/// 1. Orchestrator redirects the popup to `auth_url(...)`
/// 2. Platform redirects back; orchestrator calls `exchange_code(...)`
/// 3. `resources(...)` enumerates what the business can post through
/// 4. `connection_data(...)` maps the chosen resource into the persisted shape
/// 5. Later: `test_connection(...)` probes, `refresh(...)` rotates tokens
///    where the platform supports it
#[async_trait]
pub trait SocialPlatformAdapter: Send + Sync {
    fn platform(&self) -> Platform;

    /// Builds the platform's authorization URL.
    ///
    /// `state` is the business id for most platforms; TikTok passes an opaque
    /// state token bound server-side to the business id and PKCE verifier,
    /// with the hashed challenge embedded in the URL (never the verifier).
    fn auth_url(&self, redirect_uri: &str, state: &str, pkce_challenge: Option<&str>) -> String;

    /// Whether the authorize flow requires PKCE (TikTok).
    fn uses_pkce(&self) -> bool {
        false
    }

    /// Exchanges an authorization code for tokens.
    ///
    /// `code_verifier` is only set for PKCE platforms (TikTok). A response
    /// without an access token is an error carrying the platform's own
    /// description.
    async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
        code_verifier: Option<&str>,
    ) -> Result<TokenSet>;

    /// Enumerates the resources the token can post through.
    ///
    /// An empty list is a user-facing "create one first" condition, surfaced
    /// by the orchestrator — not a retry.
    async fn resources(&self, access_token: &str) -> Result<Vec<Resource>>;

    /// Lightweight authenticated probe for the UI "test connection" action.
    ///
    /// `identity` is the stored identity map; TikTok matches the stored
    /// `open_id` against the probe result rather than trusting a 200 alone.
    async fn test_connection(
        &self,
        access_token: &str,
        identity: &Map<String, Value>,
    ) -> Result<bool>;

    /// Whether the platform supports the OAuth refresh-token grant.
    fn supports_refresh(&self) -> bool {
        false
    }

    /// Rotates tokens via the refresh grant (YouTube, TikTok).
    async fn refresh(&self, _refresh_token: &str) -> Result<TokenSet> {
        Err(anyhow::anyhow!(
            "{} does not support token refresh; reconnect instead",
            self.platform().display_name()
        ))
    }

    /// Maps raw tokens plus the chosen resource into the persisted shape.
    fn connection_data(&self, tokens: &TokenSet, resource: &Resource) -> ConnectionData;
}

/// Adapter lookup table, built once at startup from environment credentials.
pub struct PlatformRegistry {
    adapters: HashMap<Platform, Arc<dyn SocialPlatformAdapter>>,
}

impl PlatformRegistry {
    /// Builds adapters for every platform whose OAuth keys are configured.
    pub fn from_env() -> Self {
        let mut adapters: HashMap<Platform, Arc<dyn SocialPlatformAdapter>> = HashMap::new();
        for platform in Platform::ALL {
            let Some(keys) = OAuthKeys::from_env(platform) else {
                tracing::warn!(platform = %platform, "OAuth keys not configured, platform disabled");
                continue;
            };
            let adapter: Arc<dyn SocialPlatformAdapter> = match platform {
                Platform::Facebook => Arc::new(FacebookAdapter::new(keys)),
                Platform::Instagram => Arc::new(InstagramAdapter::new(keys)),
                Platform::Linkedin => Arc::new(LinkedInAdapter::new(keys)),
                Platform::Youtube => Arc::new(YouTubeAdapter::new(keys)),
                Platform::Tiktok => Arc::new(TikTokAdapter::new(keys)),
            };
            adapters.insert(platform, adapter);
        }
        Self { adapters }
    }

    /// Empty registry; adapters are added with [`PlatformRegistry::insert`].
    pub fn empty() -> Self {
        Self {
            adapters: HashMap::new(),
        }
    }

    pub fn insert(&mut self, adapter: Arc<dyn SocialPlatformAdapter>) {
        self.adapters.insert(adapter.platform(), adapter);
    }

    pub fn get(&self, platform: Platform) -> Option<Arc<dyn SocialPlatformAdapter>> {
        self.adapters.get(&platform).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_parse_roundtrip() {
        for platform in Platform::ALL {
            assert_eq!(Platform::parse(platform.as_str()), Some(platform));
        }
        assert_eq!(Platform::parse("myspace"), None);
        assert_eq!(Platform::parse(""), None);
    }

    #[test]
    fn test_platform_serde_lowercase() {
        let json = serde_json::to_string(&Platform::Tiktok).unwrap();
        assert_eq!(json, "\"tiktok\"");
        let parsed: Platform = serde_json::from_str("\"facebook\"").unwrap();
        assert_eq!(parsed, Platform::Facebook);
    }

    #[test]
    fn test_expires_at_from() {
        assert!(expires_at_from(None).is_none());

        let at = expires_at_from(Some(3600)).unwrap();
        let delta = at - Utc::now();
        assert!(delta.num_seconds() > 3590 && delta.num_seconds() <= 3600);
    }
}
