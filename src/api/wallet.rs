//! Wallet and billing endpoints.
//!
//! Credit purchases and subscription activations are backed by a gateway
//! receipt: the reference is verified upstream, matched against the request,
//! and recorded so it cannot be spent twice. Insufficient balance on deduct
//! returns 402 with the shortfall.

use super::{AppError, AppState};
use crate::store::{InsufficientBalance, PROMO_CODES};
use anyhow::Error;
use axum::{
    extract::{Path, State},
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

pub fn create_wallet_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/wallet/:email", get(get_wallet))
        .route("/api/wallet/:email/transactions", get(get_transactions))
        .route("/api/wallet/credit", post(credit))
        .route("/api/wallet/deduct", post(deduct))
        .route("/api/add-credits", post(add_credits))
        .route("/api/activate-subscription", post(activate_subscription))
        .route("/api/cancel-subscription", post(cancel_subscription))
        .route("/api/validate-promo-code", post(validate_promo_code))
        .route(
            "/api/activate-promo-subscription",
            post(activate_promo_subscription),
        )
        .with_state(state)
}

/// Maps store errors: the typed shortfall becomes 402, everything else 500.
pub(super) fn map_wallet_error(e: Error) -> AppError {
    if let Some(short) = e.downcast_ref::<InsufficientBalance>() {
        return AppError::PaymentRequired(json!({
            "error": short.to_string(),
            "current_balance": short.current_balance,
            "required": short.required,
        }));
    }
    AppError::ServerError(e.to_string())
}

async fn get_wallet(
    State(state): State<Arc<AppState>>,
    Path(email): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let wallet = state
        .wallet
        .get_or_create(&email)
        .map_err(|e| AppError::ServerError(e.to_string()))?;
    Ok(Json(json!({ "success": true, "wallet": wallet })))
}

async fn get_transactions(
    State(state): State<Arc<AppState>>,
    Path(email): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let transactions = state
        .wallet
        .transactions(&email)
        .map_err(|e| AppError::ServerError(e.to_string()))?;
    Ok(Json(json!({ "success": true, "transactions": transactions })))
}

#[derive(Deserialize)]
struct AmountRequest {
    email: String,
    amount: f64,
    description: Option<String>,
}

async fn credit(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AmountRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    if request.amount <= 0.0 {
        return Err(AppError::BadRequest("Amount must be positive".to_string()));
    }

    let balance = state
        .wallet
        .credit(
            &request.email,
            request.amount,
            "credit",
            request.description.as_deref(),
            None,
        )
        .map_err(map_wallet_error)?;

    info!(email = %request.email, amount = request.amount, "Wallet credited");
    Ok(Json(json!({ "success": true, "new_balance": balance })))
}

async fn deduct(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AmountRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    if request.amount <= 0.0 {
        return Err(AppError::BadRequest("Amount must be positive".to_string()));
    }

    let balance = state
        .wallet
        .deduct(
            &request.email,
            request.amount,
            "deduct",
            request.description.as_deref(),
            None,
        )
        .map_err(map_wallet_error)?;

    info!(email = %request.email, amount = request.amount, "Wallet deducted");
    Ok(Json(json!({ "success": true, "new_balance": balance })))
}

#[derive(Deserialize)]
struct AddCreditsRequest {
    email: String,
    amount: f64,
    reference: String,
}

/// POST /api/add-credits
///
/// Verifies the gateway reference before any balance change: the payment
/// must have succeeded, the paid amount and email must match the request,
/// and the reference must not have been used before.
async fn add_credits(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AddCreditsRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let payment = state
        .payments
        .verify_transaction(&request.reference)
        .await
        .map_err(|e| AppError::BadGateway(format!("Payment verification failed: {}", e)))?;

    if !payment.success {
        return Err(AppError::BadRequest(
            "Payment was not successful".to_string(),
        ));
    }
    if (payment.amount - request.amount).abs() > 0.01 {
        warn!(
            email = %request.email,
            reference = %request.reference,
            paid = payment.amount,
            claimed = request.amount,
            "Payment amount mismatch"
        );
        return Err(AppError::BadRequest(format!(
            "Payment amount {:.2} does not match requested credits {:.2}",
            payment.amount, request.amount
        )));
    }
    if !payment.email.eq_ignore_ascii_case(&request.email) {
        return Err(AppError::BadRequest(
            "Payment email does not match wallet email".to_string(),
        ));
    }

    // Consuming the reference first means a duplicate submission fails
    // before it can credit twice
    state
        .wallet
        .record_payment_reference(&request.reference, &request.email, request.amount)
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    let balance = state
        .wallet
        .credit(
            &request.email,
            request.amount,
            "purchase",
            Some("Credit purchase"),
            Some(&json!({ "reference": request.reference })),
        )
        .map_err(map_wallet_error)?;

    info!(
        email = %request.email,
        amount = request.amount,
        reference = %request.reference,
        "Credits purchased"
    );
    Ok(Json(json!({ "success": true, "balance": balance })))
}

#[derive(Deserialize)]
struct ActivateSubscriptionRequest {
    email: String,
    plan: String,
    #[serde(default)]
    is_yearly: bool,
    reference: String,
}

/// POST /api/activate-subscription
///
/// Same gateway verification as add-credits, then activates the plan for
/// one year (yearly) or three months.
async fn activate_subscription(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ActivateSubscriptionRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let payment = state
        .payments
        .verify_transaction(&request.reference)
        .await
        .map_err(|e| AppError::BadGateway(format!("Payment verification failed: {}", e)))?;

    if !payment.success {
        return Err(AppError::BadRequest(
            "Payment was not successful".to_string(),
        ));
    }
    if !payment.email.eq_ignore_ascii_case(&request.email) {
        return Err(AppError::BadRequest(
            "Payment email does not match wallet email".to_string(),
        ));
    }

    state
        .wallet
        .record_payment_reference(&request.reference, &request.email, payment.amount)
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    let wallet = state
        .wallet
        .activate_subscription(&request.email, &request.plan, request.is_yearly)
        .map_err(|e| AppError::ServerError(e.to_string()))?;

    info!(
        email = %request.email,
        plan = %request.plan,
        is_yearly = request.is_yearly,
        "Subscription activated"
    );
    Ok(Json(json!({ "success": true, "wallet": wallet })))
}

#[derive(Deserialize)]
struct EmailRequest {
    email: String,
}

async fn cancel_subscription(
    State(state): State<Arc<AppState>>,
    Json(request): Json<EmailRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let wallet = state
        .wallet
        .cancel_subscription(&request.email)
        .map_err(|e| AppError::NotFound(e.to_string()))?;

    info!(email = %request.email, "Subscription cancelled");
    Ok(Json(json!({ "success": true, "wallet": wallet })))
}

#[derive(Deserialize)]
struct PromoRequest {
    email: String,
    code: String,
}

/// POST /api/validate-promo-code
///
/// Read-only check: unknown codes and already-redeemed pairs are soft
/// failures in the body, not HTTP errors.
async fn validate_promo_code(
    State(state): State<Arc<AppState>>,
    Json(request): Json<PromoRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    match state.wallet.validate_promo(&request.email, &request.code) {
        Ok(Some(offer)) => Ok(Json(json!({
            "valid": true,
            "plan": offer.plan,
            "duration_months": offer.duration_months,
            "credits": offer.credits,
        }))),
        Ok(None) => Ok(Json(json!({
            "valid": false,
            "error": "Unknown promo code",
        }))),
        Err(e) => Ok(Json(json!({
            "valid": false,
            "error": e.to_string(),
        }))),
    }
}

/// POST /api/activate-promo-subscription
///
/// The redemption row is written first; its unique (email, code) index is
/// what makes a concurrent double-redeem fail.
async fn activate_promo_subscription(
    State(state): State<Arc<AppState>>,
    Json(request): Json<PromoRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let offer = state
        .wallet
        .validate_promo(&request.email, &request.code)
        .map_err(|e| AppError::BadRequest(e.to_string()))?
        .ok_or_else(|| AppError::BadRequest("Unknown promo code".to_string()))?;

    state
        .wallet
        .record_promo_redemption(&request.email, &request.code)
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    let balance = state
        .wallet
        .credit(
            &request.email,
            offer.credits,
            "promo",
            Some(&format!("Promo code {}", offer.code)),
            Some(&json!({ "code": offer.code })),
        )
        .map_err(map_wallet_error)?;

    let wallet = state
        .wallet
        .activate_subscription_for(&request.email, offer.plan, offer.duration_months)
        .map_err(|e| AppError::ServerError(e.to_string()))?;

    info!(
        email = %request.email,
        code = %request.code,
        plan = %offer.plan,
        "Promo subscription activated"
    );
    Ok(Json(json!({
        "success": true,
        "balance": balance,
        "wallet": wallet,
    })))
}
