//! YouTube adapter: channels via the Google OAuth + Data API.
//!
//! Requests offline access so Google issues a refresh token; this is one of
//! the two platforms (with TikTok) where the refresh grant is implemented.

use super::http;
use super::{
    expires_at_from, ConnectionData, OAuthKeys, Platform, Resource, SocialPlatformAdapter,
    TokenSet,
};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};

const AUTH_BASE: &str = "https://accounts.google.com";
const TOKEN_BASE: &str = "https://oauth2.googleapis.com";
const API_BASE: &str = "https://www.googleapis.com";

const SCOPES: &str =
    "https://www.googleapis.com/auth/youtube.upload https://www.googleapis.com/auth/youtube.readonly";

pub struct YouTubeAdapter {
    keys: OAuthKeys,
    http: reqwest::Client,
    auth_base: String,
    token_base: String,
    api_base: String,
}

impl YouTubeAdapter {
    pub fn new(keys: OAuthKeys) -> Self {
        Self {
            keys,
            http: http::client(),
            auth_base: AUTH_BASE.to_string(),
            token_base: TOKEN_BASE.to_string(),
            api_base: API_BASE.to_string(),
        }
    }

    pub fn with_base_urls(mut self, auth_base: &str, token_base: &str, api_base: &str) -> Self {
        self.auth_base = auth_base.trim_end_matches('/').to_string();
        self.token_base = token_base.trim_end_matches('/').to_string();
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl SocialPlatformAdapter for YouTubeAdapter {
    fn platform(&self) -> Platform {
        Platform::Youtube
    }

    fn auth_url(&self, redirect_uri: &str, state: &str, _pkce_challenge: Option<&str>) -> String {
        // access_type=offline + prompt=consent forces a refresh token grant
        format!(
            "{}/o/oauth2/v2/auth?client_id={}&redirect_uri={}&state={}&scope={}&response_type=code&access_type=offline&prompt=consent",
            self.auth_base,
            urlencoding::encode(&self.keys.client_id),
            urlencoding::encode(redirect_uri),
            urlencoding::encode(state),
            urlencoding::encode(SCOPES),
        )
    }

    async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
        _code_verifier: Option<&str>,
    ) -> Result<TokenSet> {
        let token_url = format!("{}/token", self.token_base);
        let response = http::post_token_form(
            &self.http,
            &token_url,
            &[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", redirect_uri),
                ("client_id", &self.keys.client_id),
                ("client_secret", &self.keys.client_secret),
            ],
        )
        .await?;
        response.into_tokens()
    }

    async fn resources(&self, access_token: &str) -> Result<Vec<Resource>> {
        let url = format!(
            "{}/youtube/v3/channels?part=snippet,statistics&mine=true",
            self.api_base
        );
        let value = http::get_json(&self.http, &url, Some(access_token)).await?;

        let items = match value["items"].as_array() {
            Some(items) => items,
            // The API omits `items` entirely for accounts with no channel
            None => return Ok(Vec::new()),
        };

        Ok(items
            .iter()
            .filter_map(|item| {
                let id = item["id"].as_str()?;
                let name = item["snippet"]["title"].as_str().unwrap_or(id);

                let mut resource = Resource::new(id, name);
                let stats = &item["statistics"];
                if let Some(subs) = stats["subscriberCount"].as_str() {
                    resource
                        .meta
                        .insert("subscriber_count".to_string(), Value::String(subs.to_string()));
                }
                if let Some(videos) = stats["videoCount"].as_str() {
                    resource
                        .meta
                        .insert("video_count".to_string(), Value::String(videos.to_string()));
                }
                Some(resource)
            })
            .collect())
    }

    async fn test_connection(
        &self,
        access_token: &str,
        _identity: &Map<String, Value>,
    ) -> Result<bool> {
        let url = format!("{}/youtube/v3/channels?part=id&mine=true", self.api_base);
        http::get_json(&self.http, &url, Some(access_token)).await?;
        Ok(true)
    }

    fn supports_refresh(&self) -> bool {
        true
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenSet> {
        let token_url = format!("{}/token", self.token_base);
        let response = http::post_token_form(
            &self.http,
            &token_url,
            &[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", &self.keys.client_id),
                ("client_secret", &self.keys.client_secret),
            ],
        )
        .await?;
        let mut tokens = response.into_tokens()?;
        // Google only returns a new refresh token on the initial consent
        if tokens.refresh_token.is_none() {
            tokens.refresh_token = Some(refresh_token.to_string());
        }
        Ok(tokens)
    }

    fn connection_data(&self, tokens: &TokenSet, resource: &Resource) -> ConnectionData {
        let mut identity = Map::new();
        identity.insert("channel_id".to_string(), Value::String(resource.id.clone()));
        identity.insert(
            "channel_name".to_string(),
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

#[cfg(test)]
mod tests {
    use super::*;

    fn test_adapter() -> YouTubeAdapter {
        YouTubeAdapter::new(OAuthKeys {
            client_id: "yt-client".to_string(),
            client_secret: "yt-secret".to_string(),
        })
    }

    #[test]
    fn test_auth_url_requests_offline_access() {
        let url = test_adapter().auth_url("http://localhost/cb", "biz-3", None);
        assert!(url.starts_with("https://accounts.google.com/o/oauth2/v2/auth?"));
        assert!(url.contains("access_type=offline"));
        assert!(url.contains("prompt=consent"));
        assert!(url.contains("youtube.upload"));
        assert!(url.contains("state=biz-3"));
    }

    #[tokio::test]
    async fn test_resources_parses_channel_statistics() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/youtube/v3/channels?part=snippet,statistics&mine=true")
            .with_status(200)
            .with_body(
                r#"{"items":[{
                    "id":"UC123",
                    "snippet":{"title":"Bakery Vlogs"},
                    "statistics":{"subscriberCount":"1520","videoCount":"44"}
                }]}"#,
            )
            .create_async()
            .await;

        let adapter = test_adapter().with_base_urls(&server.url(), &server.url(), &server.url());
        let resources = adapter.resources("tok").await.unwrap();

        assert_eq!(resources.len(), 1);
        assert_eq!(resources[0].id, "UC123");
        assert_eq!(resources[0].name, "Bakery Vlogs");
        assert_eq!(resources[0].meta["subscriber_count"], "1520");
        assert_eq!(resources[0].meta["video_count"], "44");
    }

    #[tokio::test]
    async fn test_resources_empty_when_no_channel() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/youtube/v3/channels?part=snippet,statistics&mine=true")
            .with_status(200)
            .with_body(r#"{"kind":"youtube#channelListResponse","pageInfo":{"totalResults":0}}"#)
            .create_async()
            .await;

        let adapter = test_adapter().with_base_urls(&server.url(), &server.url(), &server.url());
        let resources = adapter.resources("tok").await.unwrap();
        assert!(resources.is_empty());
    }

    #[tokio::test]
    async fn test_refresh_keeps_existing_refresh_token() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/token")
            .with_status(200)
            .with_body(r#"{"access_token":"new-access","expires_in":3599}"#)
            .create_async()
            .await;

        let adapter = test_adapter().with_base_urls(&server.url(), &server.url(), &server.url());
        let tokens = adapter.refresh("old-refresh").await.unwrap();

        assert_eq!(tokens.access_token, "new-access");
        assert_eq!(tokens.refresh_token.as_deref(), Some("old-refresh"));
    }

    #[test]
    fn test_connection_data_identity() {
        let tokens = TokenSet {
            access_token: "tok".to_string(),
            refresh_token: Some("refresh".to_string()),
            expires_in: Some(3599),
            open_id: None,
        };
        let mut resource = Resource::new("UC123", "Bakery Vlogs");
        resource
            .meta
            .insert("subscriber_count".to_string(), Value::String("1520".to_string()));

        let data = test_adapter().connection_data(&tokens, &resource);
        assert_eq!(data.identity["channel_id"], "UC123");
        assert_eq!(data.identity["channel_name"], "Bakery Vlogs");
        assert_eq!(data.identity["subscriber_count"], "1520");
        assert_eq!(data.refresh_token.as_deref(), Some("refresh"));
    }
}
