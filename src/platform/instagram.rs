//! Instagram adapter.
//!
//! Instagram Business Accounts are reached through the Facebook Graph API:
//! discovery enumerates the user's Pages and keeps only those with a linked
//! Instagram Business Account. Same token mechanics as Facebook (long-lived
//! promotion, no refresh grant).

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

const SCOPES: &str =
    "instagram_basic,instagram_content_publish,pages_show_list,business_management";

pub struct InstagramAdapter {
    keys: OAuthKeys,
    http: reqwest::Client,
    dialog_base: String,
    graph_base: String,
}

impl InstagramAdapter {
    pub fn new(keys: OAuthKeys) -> Self {
        Self {
            keys,
            http: http::client(),
            dialog_base: DIALOG_BASE.to_string(),
            graph_base: GRAPH_BASE.to_string(),
        }
    }

    pub fn with_base_urls(mut self, dialog_base: &str, graph_base: &str) -> Self {
        self.dialog_base = dialog_base.trim_end_matches('/').to_string();
        self.graph_base = graph_base.trim_end_matches('/').to_string();
        self
    }

    async fn token_request(&self, url: &str) -> Result<TokenSet> {
        let value = http::get_json(&self.http, url, None).await?;
        let response: TokenEndpointResponse =
            serde_json::from_value(value).context("Failed to parse Instagram token response")?;
        response.into_tokens()
    }
}

#[async_trait]
impl SocialPlatformAdapter for InstagramAdapter {
    fn platform(&self) -> Platform {
        Platform::Instagram
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

        let promote_url = format!(
            "{}/oauth/access_token?grant_type=fb_exchange_token&client_id={}&client_secret={}&fb_exchange_token={}",
            self.graph_base,
            urlencoding::encode(&self.keys.client_id),
            urlencoding::encode(&self.keys.client_secret),
            urlencoding::encode(&short_lived.access_token),
        );
        self.token_request(&promote_url).await
    }

    /// Pages with a linked Instagram Business Account, presented as the
    /// Instagram account itself.
    async fn resources(&self, access_token: &str) -> Result<Vec<Resource>> {
        let url = format!(
            "{}/me/accounts?fields=id,name,instagram_business_account{{id,username}}",
            self.graph_base
        );
        let value = http::get_json(&self.http, &url, Some(access_token)).await?;

        let pages = value["data"]
            .as_array()
            .ok_or_else(|| anyhow!("Unexpected Instagram accounts response shape"))?;

        Ok(pages
            .iter()
            .filter_map(|page| {
                let ig = page.get("instagram_business_account")?;
                let account_id = ig["id"].as_str()?;
                let username = ig["username"].as_str().unwrap_or(account_id);

                let mut resource = Resource::new(account_id, username);
                if let Some(page_id) = page["id"].as_str() {
                    resource
                        .meta
                        .insert("page_id".to_string(), Value::String(page_id.to_string()));
                }
                if let Some(page_name) = page["name"].as_str() {
                    resource
                        .meta
                        .insert("page_name".to_string(), Value::String(page_name.to_string()));
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
        let url = format!("{}/me?fields=id,name", self.graph_base);
        http::get_json(&self.http, &url, Some(access_token)).await?;
        Ok(true)
    }

    fn connection_data(&self, tokens: &TokenSet, resource: &Resource) -> ConnectionData {
        let mut identity = Map::new();
        identity.insert("account_id".to_string(), Value::String(resource.id.clone()));
        identity.insert("username".to_string(), Value::String(resource.name.clone()));
        for (key, value) in &resource.meta {
            identity.insert(key.clone(), value.clone());
        }

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

    fn test_adapter() -> InstagramAdapter {
        InstagramAdapter::new(OAuthKeys {
            client_id: "ig-client".to_string(),
            client_secret: "ig-secret".to_string(),
        })
    }

    #[test]
    fn test_auth_url_contents() {
        let url = test_adapter().auth_url("http://localhost/cb", "biz-9", None);
        assert!(url.contains("client_id=ig-client"));
        assert!(url.contains("instagram_content_publish"));
        assert!(url.contains("state=biz-9"));
    }

    #[tokio::test]
    async fn test_resources_filters_pages_without_ig_account() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock(
                "GET",
                mockito::Matcher::Regex(r"^/me/accounts\?fields=".to_string()),
            )
            .with_status(200)
            .with_body(
                r#"{"data":[
                    {"id":"p1","name":"Plain Page"},
                    {"id":"p2","name":"IG Page",
                     "instagram_business_account":{"id":"ig9","username":"bakery.gram"}}
                ]}"#,
            )
            .create_async()
            .await;

        let adapter = test_adapter().with_base_urls(&server.url(), &server.url());
        let resources = adapter.resources("tok").await.unwrap();

        assert_eq!(resources.len(), 1);
        assert_eq!(resources[0].id, "ig9");
        assert_eq!(resources[0].name, "bakery.gram");
        assert_eq!(resources[0].meta["page_id"], "p2");
    }

    #[test]
    fn test_connection_data_carries_page_link() {
        let adapter = test_adapter();
        let tokens = TokenSet {
            access_token: "tok".to_string(),
            refresh_token: None,
            expires_in: Some(5_184_000),
            open_id: None,
        };
        let mut resource = Resource::new("ig9", "bakery.gram");
        resource
            .meta
            .insert("page_id".to_string(), Value::String("p2".to_string()));

        let data = adapter.connection_data(&tokens, &resource);
        assert_eq!(data.identity["account_id"], "ig9");
        assert_eq!(data.identity["username"], "bakery.gram");
        assert_eq!(data.identity["page_id"], "p2");
    }
}
