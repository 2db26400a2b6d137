//! Shared HTTP plumbing for platform adapters.

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::time::Duration;

/// Timeout applied to every outbound platform call.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Builds the reqwest client adapters share.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .expect("failed to build HTTP client")
}

/// Standard OAuth 2.0 token endpoint response.
///
/// `access_token` is optional so a platform error body deserializes instead
/// of failing parse; [`TokenEndpointResponse::into_tokens`] turns its absence
/// into an error carrying the platform's description.
#[derive(Deserialize, Debug)]
pub struct TokenEndpointResponse {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub open_id: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
}

impl TokenEndpointResponse {
    /// Converts the raw response into a token set, or the platform's error.
    pub fn into_tokens(self) -> Result<super::TokenSet> {
        match self.access_token {
            Some(access_token) => Ok(super::TokenSet {
                access_token,
                refresh_token: self.refresh_token,
                expires_in: self.expires_in,
                open_id: self.open_id,
            }),
            None => {
                let error = self.error.unwrap_or_else(|| "unknown_error".to_string());
                let description = self
                    .error_description
                    .unwrap_or_else(|| "no access token in response".to_string());
                Err(anyhow!("Token endpoint error: {} - {}", error, description))
            }
        }
    }
}

/// POSTs a form-encoded token request and parses the response.
pub async fn post_token_form(
    client: &reqwest::Client,
    token_url: &str,
    form: &[(&str, &str)],
) -> Result<TokenEndpointResponse> {
    let response = client
        .post(token_url)
        .header("Accept", "application/json")
        .form(form)
        .send()
        .await
        .context("Failed to send token request")?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        return Err(anyhow!("Token request failed with status {}: {}", status, body));
    }

    response
        .json::<TokenEndpointResponse>()
        .await
        .context("Failed to parse token response")
}

/// GETs a JSON document, failing on non-2xx with the body attached.
pub async fn get_json(
    client: &reqwest::Client,
    url: &str,
    bearer: Option<&str>,
) -> Result<serde_json::Value> {
    let mut request = client.get(url).header("Accept", "application/json");
    if let Some(token) = bearer {
        request = request.bearer_auth(token);
    }

    let response = request.send().await.context("Failed to send API request")?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        return Err(anyhow!("API request failed with status {}: {}", status, body));
    }

    response.json().await.context("Failed to parse API response")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_response_full() {
        let json = r#"{
            "access_token": "act.example123",
            "refresh_token": "rft.example456",
            "expires_in": 86400,
            "open_id": "user-open-id"
        }"#;

        let response: TokenEndpointResponse = serde_json::from_str(json).unwrap();
        let tokens = response.into_tokens().unwrap();
        assert_eq!(tokens.access_token, "act.example123");
        assert_eq!(tokens.refresh_token.as_deref(), Some("rft.example456"));
        assert_eq!(tokens.expires_in, Some(86400));
        assert_eq!(tokens.open_id.as_deref(), Some("user-open-id"));
    }

    #[test]
    fn test_token_response_minimal() {
        let response: TokenEndpointResponse =
            serde_json::from_str(r#"{"access_token": "tok"}"#).unwrap();
        let tokens = response.into_tokens().unwrap();
        assert_eq!(tokens.access_token, "tok");
        assert!(tokens.refresh_token.is_none());
        assert!(tokens.expires_in.is_none());
    }

    #[test]
    fn test_token_response_error_body() {
        let json = r#"{
            "error": "invalid_grant",
            "error_description": "Code was already redeemed."
        }"#;

        let response: TokenEndpointResponse = serde_json::from_str(json).unwrap();
        let err = response.into_tokens().unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("invalid_grant"));
        assert!(msg.contains("already redeemed"));
    }

    #[tokio::test]
    async fn test_post_token_form_non_2xx() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/token")
            .with_status(400)
            .with_body(r#"{"error":"bad_verification_code"}"#)
            .create_async()
            .await;

        let client = client();
        let url = format!("{}/token", server.url());
        let err = post_token_form(&client, &url, &[("code", "nope")])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("400"));

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_get_json_bearer() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/me")
            .match_header("authorization", "Bearer tok-123")
            .with_status(200)
            .with_body(r#"{"id":"42"}"#)
            .create_async()
            .await;

        let client = client();
        let url = format!("{}/me", server.url());
        let value = get_json(&client, &url, Some("tok-123")).await.unwrap();
        assert_eq!(value["id"], "42");

        mock.assert_async().await;
    }
}
