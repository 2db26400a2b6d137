//! Payment gateway client.
//!
//! The gateway is an opaque HTTP API: the frontend completes a charge and
//! hands us a transaction reference, which we verify server-side before any
//! credits or subscription are granted. Amounts arrive in minor units
//! (cents) and are converted to currency units here.

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://api.paystack.co";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// A gateway-verified payment.
#[derive(Clone, Debug)]
pub struct VerifiedPayment {
    pub reference: String,
    /// Amount in currency units (converted from the gateway's minor units).
    pub amount: f64,
    pub email: String,
    pub success: bool,
}

#[derive(Deserialize)]
struct VerifyResponse {
    status: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Option<VerifyData>,
}

#[derive(Deserialize)]
struct VerifyData {
    status: String,
    reference: String,
    amount: i64,
    customer: VerifyCustomer,
}

#[derive(Deserialize)]
struct VerifyCustomer {
    email: String,
}

pub struct PaymentGatewayClient {
    http: reqwest::Client,
    secret_key: String,
    base_url: String,
}

impl PaymentGatewayClient {
    /// `GROWTHD_PAYMENT_SECRET_KEY` authorizes verify calls.
    pub fn new(secret_key: String) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .expect("failed to build HTTP client"),
            secret_key,
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    /// Verifies a transaction reference against the gateway.
    pub async fn verify_transaction(&self, reference: &str) -> Result<VerifiedPayment> {
        let url = format!(
            "{}/transaction/verify/{}",
            self.base_url,
            urlencoding::encode(reference)
        );

        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .context("Failed to reach payment gateway")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(anyhow!(
                "Payment verification failed with status {}: {}",
                status,
                body
            ));
        }

        let body: VerifyResponse = response
            .json()
            .await
            .context("Failed to parse payment verification response")?;

        if !body.status {
            return Err(anyhow!(
                "Payment verification rejected: {}",
                body.message.unwrap_or_else(|| "no message".to_string())
            ));
        }
        let data = body
            .data
            .ok_or_else(|| anyhow!("Payment verification response missing data"))?;

        Ok(VerifiedPayment {
            reference: data.reference,
            amount: data.amount as f64 / 100.0,
            email: data.customer.email,
            success: data.status == "success",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_verify_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/transaction/verify/ref-123")
            .match_header("authorization", "Bearer sk_test")
            .with_status(200)
            .with_body(
                r#"{"status":true,"data":{
                    "status":"success","reference":"ref-123","amount":5000,
                    "customer":{"email":"a@b.com"}}}"#,
            )
            .create_async()
            .await;

        let client = PaymentGatewayClient::new("sk_test".to_string()).with_base_url(&server.url());
        let payment = client.verify_transaction("ref-123").await.unwrap();

        assert!(payment.success);
        assert_eq!(payment.amount, 50.0);
        assert_eq!(payment.email, "a@b.com");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_verify_gateway_rejection() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/transaction/verify/bad-ref")
            .with_status(200)
            .with_body(r#"{"status":false,"message":"Transaction reference not found"}"#)
            .create_async()
            .await;

        let client = PaymentGatewayClient::new("sk_test".to_string()).with_base_url(&server.url());
        let err = client.verify_transaction("bad-ref").await.unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[tokio::test]
    async fn test_verify_http_failure() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/transaction/verify/ref-500")
            .with_status(502)
            .with_body("upstream exploded")
            .create_async()
            .await;

        let client = PaymentGatewayClient::new("sk_test".to_string()).with_base_url(&server.url());
        let err = client.verify_transaction("ref-500").await.unwrap_err();
        assert!(err.to_string().contains("502"));
    }
}
