//! Paid content-generation endpoints.
//!
//! Each endpoint follows the same ledger shape: check the balance covers
//! the price before calling the AI service, run the generation, then
//! deduct. The deduction itself is conditional, so a concurrent spend that
//! drains the wallet between check and deduct still cannot overdraft.

use super::wallet::map_wallet_error;
use super::{AppError, AppState};
use axum::{extract::State, response::Json, routing::post, Router};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

pub const CONTENT_CALENDAR_PRICE: f64 = 10.0;
pub const LEAD_CAMPAIGN_PRICE: f64 = 25.0;
pub const UNLOCK_CONTACT_PRICE: f64 = 2.0;

pub fn create_content_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/generate-content-calendar", post(generate_content_calendar))
        .route("/api/generate-lead-campaign", post(generate_lead_campaign))
        .route("/api/unlock-contact", post(unlock_contact))
        .with_state(state)
}

/// Rejects up front when the balance cannot cover the price, so no AI call
/// is made for a wallet that cannot pay.
fn check_balance(state: &AppState, email: &str, price: f64) -> Result<(), AppError> {
    let wallet = state
        .wallet
        .get_or_create(email)
        .map_err(|e| AppError::ServerError(e.to_string()))?;
    if wallet.balance < price {
        return Err(AppError::PaymentRequired(json!({
            "error": format!(
                "Insufficient balance: have {:.2}, need {:.2}",
                wallet.balance, price
            ),
            "current_balance": wallet.balance,
            "required": price,
        })));
    }
    Ok(())
}

#[derive(Deserialize)]
struct ContentCalendarRequest {
    email: String,
    business_name: String,
    industry: String,
    #[serde(default)]
    target_audience: Option<String>,
    #[serde(default)]
    goals: Option<String>,
}

/// POST /api/generate-content-calendar (10 credits)
async fn generate_content_calendar(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ContentCalendarRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    check_balance(&state, &request.email, CONTENT_CALENDAR_PRICE)?;

    let system = "You are a social media strategist for small businesses. \
                  Produce a 30-day content calendar with one post idea per day, \
                  each with a platform, format, and caption hook.";
    let prompt = format!(
        "Business: {}\nIndustry: {}\nTarget audience: {}\nGoals: {}",
        request.business_name,
        request.industry,
        request.target_audience.as_deref().unwrap_or("general local customers"),
        request.goals.as_deref().unwrap_or("grow awareness and engagement"),
    );

    let calendar = state
        .ai
        .complete(system, &prompt)
        .await
        .map_err(|e| AppError::BadGateway(e.to_string()))?;

    let balance = state
        .wallet
        .deduct(
            &request.email,
            CONTENT_CALENDAR_PRICE,
            "feature",
            Some("Content calendar generation"),
            None,
        )
        .map_err(map_wallet_error)?;

    info!(email = %request.email, "Content calendar generated");
    Ok(Json(json!({
        "success": true,
        "calendar": calendar,
        "balance": balance,
    })))
}

#[derive(Deserialize)]
struct LeadCampaignRequest {
    email: String,
    business_name: String,
    industry: String,
    #[serde(default)]
    offer: Option<String>,
    #[serde(default)]
    budget: Option<String>,
}

/// POST /api/generate-lead-campaign (25 credits)
async fn generate_lead_campaign(
    State(state): State<Arc<AppState>>,
    Json(request): Json<LeadCampaignRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    check_balance(&state, &request.email, LEAD_CAMPAIGN_PRICE)?;

    let system = "You are a performance marketing specialist. Design a complete \
                  lead generation campaign: audience targeting, ad copy variants, \
                  landing page outline, and a follow-up email sequence.";
    let prompt = format!(
        "Business: {}\nIndustry: {}\nOffer: {}\nBudget: {}",
        request.business_name,
        request.industry,
        request.offer.as_deref().unwrap_or("free consultation"),
        request.budget.as_deref().unwrap_or("not specified"),
    );

    let campaign = state
        .ai
        .complete(system, &prompt)
        .await
        .map_err(|e| AppError::BadGateway(e.to_string()))?;

    let balance = state
        .wallet
        .deduct(
            &request.email,
            LEAD_CAMPAIGN_PRICE,
            "feature",
            Some("Lead campaign generation"),
            None,
        )
        .map_err(map_wallet_error)?;

    info!(email = %request.email, "Lead campaign generated");
    Ok(Json(json!({
        "success": true,
        "campaign": campaign,
        "balance": balance,
    })))
}

#[derive(Deserialize)]
struct UnlockContactRequest {
    email: String,
    contact_id: String,
}

/// POST /api/unlock-contact (2 credits, no AI call)
async fn unlock_contact(
    State(state): State<Arc<AppState>>,
    Json(request): Json<UnlockContactRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let balance = state
        .wallet
        .deduct(
            &request.email,
            UNLOCK_CONTACT_PRICE,
            "feature",
            Some("Contact unlock"),
            Some(&json!({ "contact_id": request.contact_id })),
        )
        .map_err(map_wallet_error)?;

    info!(
        email = %request.email,
        contact_id = %request.contact_id,
        "Contact unlocked"
    );
    Ok(Json(json!({
        "success": true,
        "contact_id": request.contact_id,
        "balance": balance,
    })))
}
