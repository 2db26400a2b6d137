//! LinkedIn adapter: organizations the user administers.
//!
//! Discovery is two-step: the organization ACL query returns URNs, then each
//! organization is fetched for its localized name. No refresh grant.

use super::http;
use super::{
    expires_at_from, ConnectionData, OAuthKeys, Platform, Resource, SocialPlatformAdapter,
    TokenSet,
};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::warn;

const AUTH_BASE: &str = "https://www.linkedin.com";
const API_BASE: &str = "https://api.linkedin.com";

const SCOPES: &str = "w_organization_social r_organization_admin";

const ORG_URN_PREFIX: &str = "urn:li:organization:";

pub struct LinkedInAdapter {
    keys: OAuthKeys,
    http: reqwest::Client,
    auth_base: String,
    api_base: String,
}

impl LinkedInAdapter {
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

    async fn organization_detail(&self, access_token: &str, org_id: &str) -> Result<Resource> {
        let url = format!("{}/v2/organizations/{}", self.api_base, org_id);
        let value = http::get_json(&self.http, &url, Some(access_token)).await?;
        let name = value["localizedName"].as_str().unwrap_or(org_id);
        Ok(Resource::new(org_id, name))
    }
}

#[async_trait]
impl SocialPlatformAdapter for LinkedInAdapter {
    fn platform(&self) -> Platform {
        Platform::Linkedin
    }

    fn auth_url(&self, redirect_uri: &str, state: &str, _pkce_challenge: Option<&str>) -> String {
        format!(
            "{}/oauth/v2/authorization?response_type=code&client_id={}&redirect_uri={}&state={}&scope={}",
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
        let token_url = format!("{}/oauth/v2/accessToken", self.auth_base);
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
            "{}/v2/organizationAcls?q=roleAssignee&role=ADMINISTRATOR&state=APPROVED",
            self.api_base
        );
        let value = http::get_json(&self.http, &url, Some(access_token)).await?;

        let elements = value["elements"]
            .as_array()
            .ok_or_else(|| anyhow!("Unexpected LinkedIn organization ACL response shape"))?;

        let mut resources = Vec::new();
        for element in elements {
            let Some(urn) = element["organization"].as_str() else {
                continue;
            };
            let org_id = urn.strip_prefix(ORG_URN_PREFIX).unwrap_or(urn);
            match self.organization_detail(access_token, org_id).await {
                Ok(resource) => resources.push(resource),
                Err(e) => {
                    // An org the token cannot read should not sink the whole list
                    warn!(org_id = %org_id, error = %e, "Skipping unreadable organization");
                }
            }
        }
        Ok(resources)
    }

    async fn test_connection(
        &self,
        access_token: &str,
        _identity: &Map<String, Value>,
    ) -> Result<bool> {
        let url = format!("{}/v2/userinfo", self.api_base);
        http::get_json(&self.http, &url, Some(access_token)).await?;
        Ok(true)
    }

    fn connection_data(&self, tokens: &TokenSet, resource: &Resource) -> ConnectionData {
        let mut identity = Map::new();
        identity.insert(
            "organization_id".to_string(),
            Value::String(resource.id.clone()),
        );
        identity.insert(
            "organization_name".to_string(),
            Value::String(resource.name.clone()),
        );

        ConnectionData {
            access_token: tokens.access_token.clone(),
            refresh_token: None,
            expires_at: expires_at_from(tokens.expires_in),
            identity,
        }
    }
}
