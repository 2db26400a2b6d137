//! Facebook adapter: Pages via the Graph API.
//!
//! The code exchange returns a short-lived user token which is immediately
//! promoted to a ~60-day long-lived token with a second `fb_exchange_token`
//! call. Facebook has no refresh grant; expiry forces a full reconnect.

use super::http::{self, TokenEndpointResponse};
use super::{
    expires_at_from, ConnectionData, OAuthKeys, Platform, Resource, SocialPlatformAdapter,
    TokenSet,
};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};

const DIALOG_BASE: &str = "https://www.facebook.com/v19.0";
const GRAPH_BASE: &str = "https://graph.facebook.com/v19.0";

const SCOPES: &str = "pages_show_list,pages_read_engagement,pages_manage_posts";

pub struct FacebookAdapter {
    keys: OAuthKeys,
    http: reqwest::Client,
    dialog_base: String,
    graph_base: String,
}

impl FacebookAdapter {
    pub fn new(keys: OAuthKeys) -> Self {
        Self {
            keys,
            http: http::client(),
            dialog_base: DIALOG_BASE.to_string(),
            graph_base: GRAPH_BASE.to_string(),
        }
    }

    /// Overrides the Graph API endpoints (tests).
    pub fn with_base_urls(mut self, dialog_base: &str, graph_base: &str) -> Self {
        self.dialog_base = dialog_base.trim_end_matches('/').to_string();
        self.graph_base = graph_base.trim_end_matches('/').to_string();
        self
    }

    async fn token_request(&self, url: &str) -> Result<TokenSet> {
        let value = http::get_json(&self.http, url, None).await?;
        let response: TokenEndpointResponse =
            serde_json::from_value(value).context("Failed to parse Facebook token response")?;
        response.into_tokens()
    }

    /// Promotes a short-lived user token to a long-lived one.
    async fn promote_to_long_lived(&self, short_lived: &str) -> Result<TokenSet> {
        let url = format!(
            "{}/oauth/access_token?grant_type=fb_exchange_token&client_id={}&client_secret={}&fb_exchange_token={}",
            self.graph_base,
            urlencoding::encode(&self.keys.client_id),
            urlencoding::encode(&self.keys.client_secret),
            urlencoding::encode(short_lived),
        );
        self.token_request(&url).await
    }
}

#[async_trait]
impl SocialPlatformAdapter for FacebookAdapter {
    fn platform(&self) -> Platform {
        Platform::Facebook
    }

    fn auth_url(&self, redirect_uri: &str, state: &str, _pkce_challenge: Option<&str>) -> String {
        format!(
            "{}/dialog/oauth?client_id={}&redirect_uri={}&state={}&scope={}&response_type=code",
            self.dialog_base,
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
        let url = format!(
            "{}/oauth/access_token?client_id={}&redirect_uri={}&client_secret={}&code={}",
            self.graph_base,
            urlencoding::encode(&self.keys.client_id),
            urlencoding::encode(redirect_uri),
            urlencoding::encode(&self.keys.client_secret),
            urlencoding::encode(code),
        );
        let short_lived = self.token_request(&url).await?;
        self.promote_to_long_lived(&short_lived.access_token).await
    }

    async fn resources(&self, access_token: &str) -> Result<Vec<Resource>> {
        let url = format!("{}/me/accounts?fields=id,name", self.graph_base);
        let value = http::get_json(&self.http, &url, Some(access_token)).await?;

        let pages = value["data"]
            .as_array()
            .ok_or_else(|| anyhow!("Unexpected Facebook pages response shape"))?;

        Ok(pages
            .iter()
            .filter_map(|page| {
                let id = page["id"].as_str()?;
                let name = page["name"].as_str().unwrap_or(id);
                Some(Resource::new(id, name))
            })
            .collect())
    }

    async fn test_connection(
        &self,
        access_token: &str,
        _identity: &Map<String, Value>,
    ) -> Result<bool> {
        let url = format!("{}/me?fields=id,name", self.graph_base);
        http::get_json(&self.http, &url, Some(access_token)).await?;
        Ok(true)
    }

    fn connection_data(&self, tokens: &TokenSet, resource: &Resource) -> ConnectionData {
        let mut identity = Map::new();
        identity.insert("page_id".to_string(), Value::String(resource.id.clone()));
        identity.insert("page_name".to_string(), Value::String(resource.name.clone()));

        ConnectionData {
            access_token: tokens.access_token.clone(),
            refresh_token: None,
            expires_at: expires_at_from(tokens.expires_in),
            identity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_adapter() -> FacebookAdapter {
        FacebookAdapter::new(OAuthKeys {
            client_id: "fb-client".to_string(),
            client_secret: "fb-secret".to_string(),
        })
    }

    #[test]
    fn test_auth_url_contents() {
        let url = test_adapter().auth_url("http://localhost:8080/cb", "biz-42", None);

        assert!(url.starts_with("https://www.facebook.com/v19.0/dialog/oauth?"));
        assert!(url.contains("client_id=fb-client"));
        assert!(url.contains("redirect_uri=http%3A%2F%2Flocalhost%3A8080%2Fcb"));
        assert!(url.contains("state=biz-42"));
        assert!(url.contains("pages_manage_posts"));
        assert!(url.contains("response_type=code"));
    }

    #[test]
    fn test_connection_data_identity() {
        let adapter = test_adapter();
        let tokens = TokenSet {
            access_token: "long-lived-token".to_string(),
            refresh_token: None,
            expires_in: Some(5_184_000),
            open_id: None,
        };
        let resource = Resource::new("page-1", "My Bakery");

        let data = adapter.connection_data(&tokens, &resource);
        assert_eq!(data.access_token, "long-lived-token");
        assert!(data.refresh_token.is_none());
        assert!(data.expires_at.is_some());
        assert_eq!(data.identity["page_id"], "page-1");
        assert_eq!(data.identity["page_name"], "My Bakery");
    }

    #[tokio::test]
    async fn test_exchange_promotes_to_long_lived() {
        let mut server = mockito::Server::new_async().await;

        let short = server
            .mock("GET", mockito::Matcher::Regex(
                r"^/oauth/access_token\?client_id=.*&code=auth-code$".to_string(),
            ))
            .with_status(200)
            .with_body(r#"{"access_token":"short-token","expires_in":5183}"#)
            .create_async()
            .await;
        let long = server
            .mock("GET", mockito::Matcher::Regex(
                r"^/oauth/access_token\?grant_type=fb_exchange_token.*fb_exchange_token=short-token$".to_string(),
            ))
            .with_status(200)
            .with_body(r#"{"access_token":"long-token","expires_in":5184000}"#)
            .create_async()
            .await;

        let adapter = test_adapter().with_base_urls(&server.url(), &server.url());
        let tokens = adapter
            .exchange_code("auth-code", "http://localhost/cb", None)
            .await
            .unwrap();

        assert_eq!(tokens.access_token, "long-token");
        assert_eq!(tokens.expires_in, Some(5_184_000));
        short.assert_async().await;
        long.assert_async().await;
    }

    #[tokio::test]
    async fn test_resources_lists_pages() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/me/accounts?fields=id,name")
            .with_status(200)
            .with_body(r#"{"data":[{"id":"p1","name":"Page One"},{"id":"p2","name":"Page Two"}]}"#)
            .create_async()
            .await;

        let adapter = test_adapter().with_base_urls(&server.url(), &server.url());
        let resources = adapter.resources("tok").await.unwrap();

        assert_eq!(resources.len(), 2);
        assert_eq!(resources[0].id, "p1");
        assert_eq!(resources[1].name, "Page Two");
    }
}
