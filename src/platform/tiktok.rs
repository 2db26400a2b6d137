//! TikTok adapter.
//!
//! TikTok requires PKCE: the orchestrator generates a verifier/challenge pair
//! with [`generate_pkce`], keeps the verifier server-side keyed by an opaque
//! state token, and only the hashed challenge appears in the authorize URL.
//! TikTok identifies the client as `client_key` rather than `client_id`.

use super::http;
use super::{
    expires_at_from, ConnectionData, OAuthKeys, Platform, Resource, SocialPlatformAdapter,
    TokenSet,
};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rand::RngCore;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

const AUTH_BASE: &str = "https://www.tiktok.com";
const API_BASE: &str = "https://open.tiktokapis.com";

const SCOPES: &str = "user.info.basic,video.publish";

/// Generates a PKCE verifier and its challenge.
///
/// The verifier is 32 random bytes hex-encoded; the challenge is the
/// hex-encoded SHA-256 of the verifier (TikTok's documented S256 variant).
pub fn generate_pkce() -> (String, String) {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    let verifier = hex_encode(&bytes);
    let challenge = hex_encode(&Sha256::digest(verifier.as_bytes()));
    (verifier, challenge)
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

pub struct TikTokAdapter {
    keys: OAuthKeys,
    http: reqwest::Client,
    auth_base: String,
    api_base: String,
}

impl TikTokAdapter {
    pub fn new(keys: OAuthKeys) -> Self {
        Self {
            keys,
            http: http::client(),
            auth_base: AUTH_BASE.to_string(),
            api_base: API_BASE.to_string(),
        }
    }

    pub fn with_base_urls(mut self, auth_base: &str, api_base: &str) -> Self {
        self.auth_base = auth_base.trim_end_matches('/').to_string();
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    async fn user_info(&self, access_token: &str) -> Result<Value> {
        let url = format!(
            "{}/v2/user/info/?fields=open_id,display_name,avatar_url",
            self.api_base
        );
        let value = http::get_json(&self.http, &url, Some(access_token)).await?;
        value
            .get("data")
            .and_then(|d| d.get("user"))
            .cloned()
            .ok_or_else(|| anyhow!("Unexpected TikTok user info response shape"))
    }
}

#[async_trait]
impl SocialPlatformAdapter for TikTokAdapter {
    fn platform(&self) -> Platform {
        Platform::Tiktok
    }

    fn uses_pkce(&self) -> bool {
        true
    }

    fn auth_url(&self, redirect_uri: &str, state: &str, pkce_challenge: Option<&str>) -> String {
        let mut url = format!(
            "{}/v2/auth/authorize/?client_key={}&response_type=code&scope={}&redirect_uri={}&state={}",
            self.auth_base,
            urlencoding::encode(&self.keys.client_id),
            urlencoding::encode(SCOPES),
            urlencoding::encode(redirect_uri),
            urlencoding::encode(state),
        );
        if let Some(challenge) = pkce_challenge {
            url.push_str(&format!(
                "&code_challenge={}&code_challenge_method=S256",
                urlencoding::encode(challenge)
            ));
        }
        url
    }

    async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
        code_verifier: Option<&str>,
    ) -> Result<TokenSet> {
        let verifier =
            code_verifier.ok_or_else(|| anyhow!("TikTok code exchange requires a PKCE verifier"))?;

        let token_url = format!("{}/v2/oauth/token/", self.api_base);
        let response = http::post_token_form(
            &self.http,
            &token_url,
            &[
                ("client_key", &self.keys.client_id),
                ("client_secret", &self.keys.client_secret),
                ("code", code),
                ("grant_type", "authorization_code"),
                ("redirect_uri", redirect_uri),
                ("code_verifier", verifier),
            ],
        )
        .await?;
        response.into_tokens()
    }

    /// The single authenticated TikTok user.
    async fn resources(&self, access_token: &str) -> Result<Vec<Resource>> {
        let user = self.user_info(access_token).await?;
        let Some(open_id) = user["open_id"].as_str() else {
            return Ok(Vec::new());
        };
        let display_name = user["display_name"].as_str().unwrap_or(open_id);

        let mut resource = Resource::new(open_id, display_name);
        if let Some(avatar) = user["avatar_url"].as_str() {
            resource
                .meta
                .insert("avatar_url".to_string(), Value::String(avatar.to_string()));
        }
        Ok(vec![resource])
    }

    /// Probe must confirm the token still belongs to the stored account, not
    /// merely that it returns a 200.
    async fn test_connection(
        &self,
        access_token: &str,
        identity: &Map<String, Value>,
    ) -> Result<bool> {
        let user = self.user_info(access_token).await?;
        let probed = user["open_id"].as_str().unwrap_or_default();
        let stored = identity
            .get("open_id")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        Ok(!probed.is_empty() && probed == stored)
    }

    fn supports_refresh(&self) -> bool {
        true
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenSet> {
        let token_url = format!("{}/v2/oauth/token/", self.api_base);
        let response = http::post_token_form(
            &self.http,
            &token_url,
            &[
                ("client_key", &self.keys.client_id),
                ("client_secret", &self.keys.client_secret),
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
            ],
        )
        .await?;
        response.into_tokens()
    }

    fn connection_data(&self, tokens: &TokenSet, resource: &Resource) -> ConnectionData {
        let mut identity = Map::new();
        // Prefer the open_id reported by the token endpoint itself
        let open_id = tokens.open_id.clone().unwrap_or_else(|| resource.id.clone());
        identity.insert("open_id".to_string(), Value::String(open_id));
        identity.insert(
            "display_name".to_string(),
            Value::String(resource.name.clone()),
        );
        for (key, value) in &resource.meta {
            identity.insert(key.clone(), value.clone());
        }

        ConnectionData {
            access_token: tokens.access_token.clone(),
            refresh_token: tokens.refresh_token.clone(),
            expires_at: expires_at_from(tokens.expires_in),
            identity,
        }
    }
}
