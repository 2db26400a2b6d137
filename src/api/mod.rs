//! HTTP API.
//!
//! Three route groups share one [`AppState`]: the OAuth orchestrator, the
//! wallet/billing endpoints, and the paid content-generation endpoints.
//! Errors are caught once at the route boundary and returned as JSON (or an
//! HTML page inside the OAuth popup).

pub mod content;
pub mod oauth;
pub mod pages;
pub mod wallet;

pub use oauth::create_oauth_router;

use crate::ai::CompletionClient;
use crate::payments::PaymentGatewayClient;
use crate::platform::PlatformRegistry;
use crate::store::{ConnectionStore, WalletStore};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    Router,
};
use oauth::state_manager::StateManager;
use serde::Serialize;
use std::sync::Arc;

/// Error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// Application error types, mapped to HTTP at the boundary.
pub enum AppError {
    BadRequest(String),
    /// Insufficient balance; carries `current_balance` and `required`.
    PaymentRequired(serde_json::Value),
    NotFound(String),
    ServerError(String),
    BadGateway(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, Json(ErrorResponse { error: msg })).into_response()
            }
            AppError::PaymentRequired(body) => {
                (StatusCode::PAYMENT_REQUIRED, Json(body)).into_response()
            }
            AppError::NotFound(msg) => {
                (StatusCode::NOT_FOUND, Json(ErrorResponse { error: msg })).into_response()
            }
            AppError::ServerError(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse { error: msg }),
            )
                .into_response(),
            AppError::BadGateway(msg) => {
                (StatusCode::BAD_GATEWAY, Json(ErrorResponse { error: msg })).into_response()
            }
        }
    }
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub connections: Arc<ConnectionStore>,
    pub wallet: Arc<WalletStore>,
    pub platforms: Arc<PlatformRegistry>,
    pub oauth_states: StateManager,
    pub payments: Arc<PaymentGatewayClient>,
    pub ai: Arc<CompletionClient>,
    /// Public base URL used to build OAuth redirect URIs.
    pub callback_base_url: String,
}

/// Assembles the full API router.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(oauth::create_oauth_router(state.clone()))
        .merge(wallet::create_wallet_router(state.clone()))
        .merge(content::create_content_router(state))
}
