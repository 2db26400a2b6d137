//! OAuth connection flow for social platforms.
//!
//! Drives the authorization code flow uniformly across every platform
//! adapter:
//! 1. Dashboard opens a popup on GET /api/auth/:platform/connect
//! 2. Redirect to the platform's authorization page
//! 3. Platform redirects back to /api/auth/:platform/callback
//! 4. Exchange code for tokens, enumerate resources
//! 5. More than one resource → render the picker, which resubmits the
//!    callback with a `resource_id`
//! 6. Persist the connection (tokens encrypted) and render success
//!
//! Errors anywhere in the callback are caught once at the boundary and
//! rendered as the HTML error page; persistence is the last step, so a
//! failed callback leaves the previous connection state untouched.

pub mod state_manager;

use super::{pages, AppError, AppState};
use crate::platform::{generate_pkce, Platform, SocialPlatformAdapter, TokenSet};
use crate::store::NotConnected;
use anyhow::{anyhow, Result};
use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Create the OAuth orchestrator router.
pub fn create_oauth_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/auth/:platform/connect", get(connect))
        .route("/api/auth/:platform/callback", get(callback))
        .route("/api/auth/:platform/test", post(test_connection))
        .route("/api/auth/:platform/disconnect", post(disconnect))
        .route("/api/auth/:platform/refresh", post(refresh))
        .route("/api/get-token", post(get_token))
        .route(
            "/api/business-settings/:business_id/social-media",
            get(get_settings),
        )
        .with_state(state)
}

fn parse_platform(raw: &str) -> Result<Platform, AppError> {
    Platform::parse(raw)
        .ok_or_else(|| AppError::NotFound(format!("Unknown platform '{}'", raw)))
}

fn adapter_for(
    state: &AppState,
    platform: Platform,
) -> Result<Arc<dyn SocialPlatformAdapter>, AppError> {
    state.platforms.get(platform).ok_or_else(|| {
        AppError::ServerError(format!(
            "OAuth not configured for {}. Set GROWTHD_OAUTH_{}_CLIENT_ID and GROWTHD_OAUTH_{}_CLIENT_SECRET.",
            platform.display_name(),
            platform.as_str().to_uppercase(),
            platform.as_str().to_uppercase(),
        ))
    })
}

fn callback_url(state: &AppState, platform: Platform) -> String {
    format!(
        "{}/api/auth/{}/callback",
        state.callback_base_url, platform
    )
}

#[derive(Deserialize)]
struct ConnectQuery {
    business_id: String,
}

/// GET /api/auth/:platform/connect
///
/// Redirects the popup to the platform's authorization page. For PKCE
/// platforms the verifier is held server-side, keyed by an opaque state
/// token; everyone else carries the business id in `state` directly.
async fn connect(
    State(state): State<Arc<AppState>>,
    Path(platform): Path<String>,
    Query(query): Query<ConnectQuery>,
) -> Result<Response, AppError> {
    let platform = parse_platform(&platform)?;
    let adapter = adapter_for(&state, platform)?;

    if query.business_id.is_empty() {
        return Err(AppError::BadRequest("business_id is required".to_string()));
    }

    let redirect_uri = callback_url(&state, platform);
    let auth_url = if adapter.uses_pkce() {
        let (verifier, challenge) = generate_pkce();
        let state_token = state.oauth_states.create_state(&query.business_id, &verifier);
        adapter.auth_url(&redirect_uri, &state_token, Some(&challenge))
    } else {
        adapter.auth_url(&redirect_uri, &query.business_id, None)
    };

    info!(
        platform = %platform,
        business_id = %query.business_id,
        "Redirecting to OAuth provider"
    );
    // Plain 302, the classic browser redirect
    Ok((
        StatusCode::FOUND,
        [(header::LOCATION, auth_url)],
    )
        .into_response())
}

#[derive(Deserialize)]
struct CallbackQuery {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
    /// Set when the picker resubmits the callback with a chosen resource.
    resource_id: Option<String>,
    /// Already-exchanged access token echoed through the picker round-trip.
    user_token: Option<String>,
}

/// GET /api/auth/:platform/callback
///
/// Always renders HTML: success, the resource picker, or the error page.
async fn callback(
    State(state): State<Arc<AppState>>,
    Path(platform): Path<String>,
    Query(query): Query<CallbackQuery>,
) -> Html<String> {
    let Some(platform) = Platform::parse(&platform) else {
        return pages::error_page(&platform, "Unknown platform");
    };

    match run_callback(&state, platform, query).await {
        Ok(page) => page,
        Err(e) => {
            error!(platform = %platform, error = %e, "OAuth callback failed");
            pages::error_page(platform.as_str(), &e.to_string())
        }
    }
}

async fn run_callback(
    state: &AppState,
    platform: Platform,
    query: CallbackQuery,
) -> Result<Html<String>> {
    if let Some(error) = query.error {
        let description = query
            .error_description
            .unwrap_or_else(|| "Unknown error".to_string());
        return Err(anyhow!("Authorization failed: {} - {}", error, description));
    }

    let adapter = state
        .platforms
        .get(platform)
        .ok_or_else(|| anyhow!("OAuth not configured for {}", platform.display_name()))?;

    let state_param = query
        .state
        .ok_or_else(|| anyhow!("Missing 'state' parameter"))?;

    // Resolve the business and, for PKCE platforms, the verifier
    let (business_id, code_verifier) = if adapter.uses_pkce() {
        let entry = state
            .oauth_states
            .validate_and_consume(&state_param)
            .ok_or_else(|| anyhow!("Invalid or expired OAuth state; restart the connect flow"))?;
        (entry.business_id, Some(entry.code_verifier))
    } else {
        (state_param.clone(), None)
    };

    debug!(platform = %platform, business_id = %business_id, "OAuth callback received");

    // Exchange the code once; picker resubmissions echo the token back
    // instead of re-exchanging a spent code
    let tokens = match &query.user_token {
        Some(token) => TokenSet {
            access_token: token.clone(),
            refresh_token: None,
            expires_in: None,
            open_id: None,
        },
        None => {
            let code = query
                .code
                .ok_or_else(|| anyhow!("Missing 'code' parameter"))?;
            adapter
                .exchange_code(&code, &callback_url(state, platform), code_verifier.as_deref())
                .await?
        }
    };

    let resources = adapter.resources(&tokens.access_token).await?;
    if resources.is_empty() {
        return Err(anyhow!(
            "No {} found on this account. Create one first, then reconnect.",
            platform.resource_noun()
        ));
    }

    let resource = match &query.resource_id {
        Some(resource_id) => resources
            .iter()
            .find(|r| &r.id == resource_id)
            .ok_or_else(|| anyhow!("Selected {} not found", platform.resource_noun()))?,
        None if resources.len() == 1 => &resources[0],
        None => {
            debug!(
                platform = %platform,
                business_id = %business_id,
                count = resources.len(),
                "Multiple resources, rendering picker"
            );
            return Ok(pages::selector_page(
                platform,
                &resources,
                &callback_url(state, platform),
                &business_id,
                &tokens.access_token,
            ));
        }
    };

    // Persistence is the last step: nothing is written on earlier failures
    let data = adapter.connection_data(&tokens, resource);
    state
        .connections
        .update_platform_connection(&business_id, platform, &data)?;

    info!(
        platform = %platform,
        business_id = %business_id,
        resource_id = %resource.id,
        "Platform connected"
    );
    Ok(pages::success_page(platform, &resource.name))
}

#[derive(Deserialize)]
struct BusinessRequest {
    business_id: String,
}

/// POST /api/auth/:platform/test
///
/// Probes the stored token. Soft failures (not connected, probe rejected)
/// are reported in the body, not as HTTP errors.
async fn test_connection(
    State(state): State<Arc<AppState>>,
    Path(platform): Path<String>,
    Json(request): Json<BusinessRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let platform = parse_platform(&platform)?;
    let adapter = adapter_for(&state, platform)?;

    let token = match state
        .connections
        .get_platform_token(&request.business_id, platform)
    {
        Ok(token) => token,
        Err(e) if e.downcast_ref::<NotConnected>().is_some() => {
            return Ok(Json(json!({ "success": false, "error": e.to_string() })));
        }
        Err(e) => return Err(AppError::ServerError(e.to_string())),
    };

    match adapter
        .test_connection(&token.access_token, &token.identity)
        .await
    {
        Ok(true) => Ok(Json(json!({
            "success": true,
            "message": format!("{} connection is working", platform.display_name()),
        }))),
        Ok(false) => Ok(Json(json!({
            "success": false,
            "error": "Stored connection no longer matches the platform account",
        }))),
        Err(e) => {
            warn!(platform = %platform, error = %e, "Connection test failed");
            Ok(Json(json!({ "success": false, "error": e.to_string() })))
        }
    }
}

/// POST /api/auth/:platform/disconnect
async fn disconnect(
    State(state): State<Arc<AppState>>,
    Path(platform): Path<String>,
    Json(request): Json<BusinessRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let platform = parse_platform(&platform)?;

    state
        .connections
        .disconnect_platform(&request.business_id, platform)
        .map_err(|e| AppError::ServerError(e.to_string()))?;

    info!(platform = %platform, business_id = %request.business_id, "Platform disconnected");
    Ok(Json(json!({
        "success": true,
        "message": format!("{} disconnected", platform.display_name()),
    })))
}

/// POST /api/auth/:platform/refresh
///
/// Only meaningful for platforms with a refresh grant; the rest get a soft
/// `success: false` rather than an HTTP error.
async fn refresh(
    State(state): State<Arc<AppState>>,
    Path(platform): Path<String>,
    Json(request): Json<BusinessRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let platform = parse_platform(&platform)?;
    let adapter = adapter_for(&state, platform)?;

    if !adapter.supports_refresh() {
        return Ok(Json(json!({
            "success": false,
            "error": format!(
                "{} does not support token refresh; reconnect instead",
                platform.display_name()
            ),
        })));
    }

    let token = match state
        .connections
        .get_platform_token(&request.business_id, platform)
    {
        Ok(token) => token,
        Err(e) if e.downcast_ref::<NotConnected>().is_some() => {
            return Err(AppError::NotFound(e.to_string()));
        }
        Err(e) => return Err(AppError::ServerError(e.to_string())),
    };

    let Some(refresh_token) = token.refresh_token else {
        return Ok(Json(json!({
            "success": false,
            "error": "No refresh token stored; reconnect instead",
        })));
    };

    let refreshed = adapter
        .refresh(&refresh_token)
        .await
        .map_err(|e| AppError::BadGateway(format!("Token refresh failed: {}", e)))?;

    let expires_at = crate::platform::expires_at_from(refreshed.expires_in);
    state
        .connections
        .apply_refreshed_tokens(
            &request.business_id,
            platform,
            &refreshed.access_token,
            refreshed.refresh_token.as_deref(),
            expires_at,
        )
        .map_err(|e| AppError::ServerError(e.to_string()))?;

    info!(platform = %platform, business_id = %request.business_id, "Token refreshed");
    Ok(Json(json!({ "success": true, "expires_at": expires_at })))
}

#[derive(Deserialize)]
struct GetTokenRequest {
    business_id: String,
    platform: String,
}

/// POST /api/get-token
///
/// Returns the decrypted token plus non-secret metadata for the external
/// automation engine. Deliberate trust boundary: any caller who can reach
/// this endpoint obtains a live credential.
async fn get_token(
    State(state): State<Arc<AppState>>,
    Json(request): Json<GetTokenRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let platform = parse_platform(&request.platform)?;

    let token = match state
        .connections
        .get_platform_token(&request.business_id, platform)
    {
        Ok(token) => token,
        Err(e) if e.downcast_ref::<NotConnected>().is_some() => {
            return Err(AppError::NotFound(e.to_string()));
        }
        Err(e) => return Err(AppError::ServerError(e.to_string())),
    };

    Ok(Json(json!({
        "success": true,
        "platform": platform.as_str(),
        "access_token": token.access_token,
        "refresh_token": token.refresh_token,
        "expires_at": token.expires_at,
        "identity": token.identity,
    })))
}

/// GET /api/business-settings/:business_id/social-media
async fn get_settings(
    State(state): State<Arc<AppState>>,
    Path(business_id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let settings = state
        .connections
        .get_settings(&business_id)
        .map_err(|e| AppError::ServerError(e.to_string()))?;
    Ok(Json(json!({ "social_media": settings })))
}
