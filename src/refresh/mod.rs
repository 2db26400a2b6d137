//! Background token refresher.
//!
//! TikTok access tokens are short-lived, so a fixed-interval sweep finds
//! connections expiring within the next 48 hours and refreshes them with
//! the stored refresh token. The sweep is sequential and makes no retries;
//! a failed refresh disconnects the platform, which surfaces in the
//! dashboard as "reconnect required" instead of silently failing at post
//! time.

use crate::platform::{expires_at_from, Platform, PlatformRegistry};
use crate::store::ConnectionStore;
use anyhow::Result;
use chrono::Duration;
use std::sync::Arc;
use tracing::{error, info, warn};

const EXPIRY_WINDOW_HOURS: i64 = 48;

/// Runs the sweep forever. The first tick fires immediately so tokens that
/// expired while the server was down are handled at startup.
pub async fn run_token_refresh(
    connections: Arc<ConnectionStore>,
    platforms: Arc<PlatformRegistry>,
    interval_seconds: u64,
) {
    let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(interval_seconds));

    loop {
        interval.tick().await;
        if let Err(e) = sweep(&connections, &platforms).await {
            error!(error = %e, "Token refresh sweep failed");
        }
    }
}

/// One pass over every refreshable platform.
pub async fn sweep(
    connections: &ConnectionStore,
    platforms: &PlatformRegistry,
) -> Result<()> {
    for platform in Platform::ALL {
        let Some(adapter) = platforms.get(platform) else {
            continue;
        };
        if !adapter.supports_refresh() {
            continue;
        }

        let expiring =
            connections.expiring_within(platform, Duration::hours(EXPIRY_WINDOW_HOURS))?;
        if expiring.is_empty() {
            continue;
        }

        info!(
            platform = %platform,
            count = expiring.len(),
            "Refreshing expiring tokens"
        );

        for business_id in expiring {
            refresh_one(connections, adapter.as_ref(), &business_id).await;
        }
    }
    Ok(())
}

/// Refreshes a single connection. Any failure (missing refresh token,
/// upstream rejection, storage error) disconnects the platform so the
/// business is prompted to reconnect.
async fn refresh_one(
    connections: &ConnectionStore,
    adapter: &dyn crate::platform::SocialPlatformAdapter,
    business_id: &str,
) {
    let platform = adapter.platform();
    let result = async {
        let token = connections.get_platform_token(business_id, platform)?;
        let refresh_token = token
            .refresh_token
            .ok_or_else(|| anyhow::anyhow!("No refresh token stored"))?;

        let refreshed = adapter.refresh(&refresh_token).await?;
        connections.apply_refreshed_tokens(
            business_id,
            platform,
            &refreshed.access_token,
            refreshed.refresh_token.as_deref(),
            expires_at_from(refreshed.expires_in),
        )?;
        Ok::<_, anyhow::Error>(())
    }
    .await;

    match result {
        Ok(()) => {
            info!(platform = %platform, business_id = %business_id, "Token refreshed");
        }
        Err(e) => {
            warn!(
                platform = %platform,
                business_id = %business_id,
                error = %e,
                "Token refresh failed, disconnecting"
            );
            if let Err(e) = connections.disconnect_platform(business_id, platform) {
                error!(
                    platform = %platform,
                    business_id = %business_id,
                    error = %e,
                    "Failed to disconnect after refresh failure"
                );
            }
        }
    }
}
