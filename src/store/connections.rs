//! Per-business social platform connection records.
//!
//! One row per (business, platform). Access and refresh tokens are encrypted
//! before they touch disk; platform-specific identity fields (page id,
//! channel name, ...) live in a JSON column. Readers always see a
//! structurally complete settings map: every platform is present, defaulting
//! to disconnected, so callers never branch on "missing" vs "false".

use crate::crypto::TokenCipher;
use crate::platform::{ConnectionData, Platform};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Mutex;

/// Typed condition: an operation that needs a live connection found none.
#[derive(Debug)]
pub struct NotConnected {
    pub platform: Platform,
}

impl fmt::Display for NotConnected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} is not connected", self.platform.display_name())
    }
}

impl std::error::Error for NotConnected {}

/// One platform's connection state, as exposed to settings readers.
///
/// Token material never appears here; `connected` implies ciphertext exists
/// in the underlying row.
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct PlatformConnection {
    pub connected: bool,
    pub status: String,
    pub identity: Map<String, Value>,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_refreshed: Option<DateTime<Utc>>,
}

impl PlatformConnection {
    pub fn disconnected() -> Self {
        Self {
            connected: false,
            status: "disconnected".to_string(),
            identity: Map::new(),
            expires_at: None,
            last_refreshed: None,
        }
    }
}

/// Structurally complete platform map for one business.
pub type SocialMediaSettings = BTreeMap<String, PlatformConnection>;

/// Decrypted token set plus non-secret metadata, for the automation engine.
#[derive(Clone, Debug)]
pub struct DecryptedToken {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub identity: Map<String, Value>,
}

pub struct ConnectionStore {
    conn: Mutex<Connection>,
    cipher: TokenCipher,
}

impl ConnectionStore {
    pub fn new<P: AsRef<Path>>(db_path: P, cipher: TokenCipher) -> Result<Self> {
        let conn = Connection::open(db_path).context("Failed to open connections database")?;
        // Both stores can share one database file
        conn.busy_timeout(std::time::Duration::from_secs(5))
            .context("Failed to set busy timeout")?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS platform_connections (
                business_id TEXT NOT NULL,
                platform TEXT NOT NULL,
                connected INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL DEFAULT 'disconnected',
                access_token TEXT,
                refresh_token TEXT,
                identity TEXT,
                expires_at TEXT,
                last_refreshed TEXT,
                updated_at TEXT NOT NULL,
                UNIQUE(business_id, platform)
            )
            "#,
            [],
        )
        .context("Failed to create platform_connections table")?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_platform_connected
             ON platform_connections(platform, connected)",
            [],
        )
        .context("Failed to create connections index")?;

        Ok(Self {
            conn: Mutex::new(conn),
            cipher,
        })
    }

    /// Returns the full settings map, defaulting every absent platform to the
    /// disconnected shape.
    pub fn get_settings(&self, business_id: &str) -> Result<SocialMediaSettings> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT platform, connected, status, identity, expires_at, last_refreshed
                 FROM platform_connections WHERE business_id = ?1",
            )
            .context("Failed to prepare settings query")?;

        let mut settings: SocialMediaSettings = Platform::ALL
            .iter()
            .map(|p| (p.as_str().to_string(), PlatformConnection::disconnected()))
            .collect();

        let rows = stmt
            .query_map(params![business_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, bool>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, Option<String>>(5)?,
                ))
            })
            .context("Failed to query settings")?;

        for row in rows {
            let (platform, connected, status, identity, expires_at, last_refreshed) =
                row.context("Failed to read settings row")?;
            settings.insert(
                platform,
                PlatformConnection {
                    connected,
                    status,
                    identity: parse_identity(identity.as_deref()),
                    expires_at: parse_timestamp(expires_at.as_deref())?,
                    last_refreshed: parse_timestamp(last_refreshed.as_deref())?,
                },
            );
        }

        Ok(settings)
    }

    /// Persists a successful connection, replacing any prior record.
    pub fn update_platform_connection(
        &self,
        business_id: &str,
        platform: Platform,
        data: &ConnectionData,
    ) -> Result<()> {
        let access_token = self
            .cipher
            .encrypt(&data.access_token)
            .context("Failed to encrypt access token")?;
        let refresh_token = data
            .refresh_token
            .as_deref()
            .map(|t| self.cipher.encrypt(t))
            .transpose()
            .context("Failed to encrypt refresh token")?;

        let identity = serde_json::to_string(&data.identity)?;
        let now = Utc::now().to_rfc3339();
        let expires_at = data.expires_at.map(|dt| dt.to_rfc3339());

        self.conn
            .lock()
            .unwrap()
            .execute(
                r#"
                INSERT INTO platform_connections (
                    business_id, platform, connected, status,
                    access_token, refresh_token, identity,
                    expires_at, last_refreshed, updated_at
                )
                VALUES (?1, ?2, 1, 'active', ?3, ?4, ?5, ?6, ?7, ?7)
                ON CONFLICT(business_id, platform) DO UPDATE SET
                    connected = 1,
                    status = 'active',
                    access_token = excluded.access_token,
                    refresh_token = excluded.refresh_token,
                    identity = excluded.identity,
                    expires_at = excluded.expires_at,
                    last_refreshed = excluded.last_refreshed,
                    updated_at = excluded.updated_at
                "#,
                params![
                    business_id,
                    platform.as_str(),
                    access_token,
                    refresh_token,
                    identity,
                    expires_at,
                    now,
                ],
            )
            .context("Failed to store platform connection")?;

        Ok(())
    }

    /// Nulls every platform-specific field and marks the record disconnected.
    pub fn disconnect_platform(&self, business_id: &str, platform: Platform) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.conn
            .lock()
            .unwrap()
            .execute(
                r#"
                INSERT INTO platform_connections (
                    business_id, platform, connected, status,
                    access_token, refresh_token, identity,
                    expires_at, last_refreshed, updated_at
                )
                VALUES (?1, ?2, 0, 'disconnected', NULL, NULL, NULL, NULL, NULL, ?3)
                ON CONFLICT(business_id, platform) DO UPDATE SET
                    connected = 0,
                    status = 'disconnected',
                    access_token = NULL,
                    refresh_token = NULL,
                    identity = NULL,
                    expires_at = NULL,
                    last_refreshed = NULL,
                    updated_at = excluded.updated_at
                "#,
                params![business_id, platform.as_str(), now],
            )
            .context("Failed to disconnect platform")?;
        Ok(())
    }

    /// Decrypts and returns the stored tokens.
    ///
    /// Fails with [`NotConnected`] when no live connection exists. A refresh
    /// token that no longer decrypts is tolerated (`None`); a broken access
    /// token is not.
    pub fn get_platform_token(
        &self,
        business_id: &str,
        platform: Platform,
    ) -> Result<DecryptedToken> {
        let row = {
            let conn = self.conn.lock().unwrap();
            conn.query_row(
                "SELECT connected, access_token, refresh_token, identity, expires_at
                 FROM platform_connections
                 WHERE business_id = ?1 AND platform = ?2",
                params![business_id, platform.as_str()],
                |row| {
                    Ok((
                        row.get::<_, bool>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, Option<String>>(4)?,
                    ))
                },
            )
            .optional()
            .context("Failed to query platform connection")?
        };

        let Some((connected, access_token, refresh_token, identity, expires_at)) = row else {
            return Err(NotConnected { platform }.into());
        };
        let (true, Some(access_ciphertext)) = (connected, access_token) else {
            return Err(NotConnected { platform }.into());
        };

        let access_token = self
            .cipher
            .decrypt(&access_ciphertext)
            .context("Failed to decrypt access token")?;
        let refresh_token = refresh_token
            .as_deref()
            .and_then(|ct| self.cipher.decrypt(ct).ok());

        Ok(DecryptedToken {
            access_token,
            refresh_token,
            expires_at: parse_timestamp(expires_at.as_deref())?,
            identity: parse_identity(identity.as_deref()),
        })
    }

    /// Replaces the token set after a refresh, leaving identity fields alone.
    pub fn apply_refreshed_tokens(
        &self,
        business_id: &str,
        platform: Platform,
        access_token: &str,
        refresh_token: Option<&str>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let access_ciphertext = self
            .cipher
            .encrypt(access_token)
            .context("Failed to encrypt refreshed access token")?;
        let refresh_ciphertext = refresh_token
            .map(|t| self.cipher.encrypt(t))
            .transpose()
            .context("Failed to encrypt refreshed refresh token")?;
        let now = Utc::now().to_rfc3339();

        let updated = self
            .conn
            .lock()
            .unwrap()
            .execute(
                r#"
                UPDATE platform_connections SET
                    access_token = ?1,
                    refresh_token = COALESCE(?2, refresh_token),
                    expires_at = ?3,
                    last_refreshed = ?4,
                    updated_at = ?4
                WHERE business_id = ?5 AND platform = ?6 AND connected = 1
                "#,
                params![
                    access_ciphertext,
                    refresh_ciphertext,
                    expires_at.map(|dt| dt.to_rfc3339()),
                    now,
                    business_id,
                    platform.as_str(),
                ],
            )
            .context("Failed to apply refreshed tokens")?;

        if updated == 0 {
            return Err(NotConnected { platform }.into());
        }
        Ok(())
    }

    /// Business ids whose connection for `platform` expires inside `window`.
    pub fn expiring_within(
        &self,
        platform: Platform,
        window: chrono::Duration,
    ) -> Result<Vec<String>> {
        let rows = {
            let conn = self.conn.lock().unwrap();
            let mut stmt = conn
                .prepare(
                    "SELECT business_id, expires_at FROM platform_connections
                     WHERE platform = ?1 AND connected = 1 AND expires_at IS NOT NULL",
                )
                .context("Failed to prepare expiry query")?;
            let rows = stmt
                .query_map(params![platform.as_str()], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })
                .context("Failed to query expiring connections")?
                .collect::<std::result::Result<Vec<_>, _>>()
                .context("Failed to read expiring connections")?;
            rows
        };

        let cutoff = Utc::now() + window;
        let mut business_ids = Vec::new();
        for (business_id, expires_at) in rows {
            if let Some(expires_at) = parse_timestamp(Some(&expires_at))? {
                if expires_at <= cutoff {
                    business_ids.push(business_id);
                }
            }
        }
        Ok(business_ids)
    }
}

fn parse_identity(raw: Option<&str>) -> Map<String, Value> {
    raw.and_then(|s| serde_json::from_str(s).ok())
        .unwrap_or_default()
}

fn parse_timestamp(raw: Option<&str>) -> Result<Option<DateTime<Utc>>> {
    raw.map(|s| {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .context("Failed to parse stored timestamp")
    })
    .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn test_store() -> ConnectionStore {
        let cipher = TokenCipher::new("test-secret").unwrap();
        ConnectionStore::new(":memory:", cipher).unwrap()
    }

    fn sample_data(token: &str) -> ConnectionData {
        let mut identity = Map::new();
        identity.insert("page_id".to_string(), Value::String("p1".to_string()));
        identity.insert("page_name".to_string(), Value::String("My Page".to_string()));
        ConnectionData {
            access_token: token.to_string(),
            refresh_token: Some("refresh-plain".to_string()),
            expires_at: Some(Utc::now() + Duration::days(60)),
            identity,
        }
    }

    #[test]
    fn test_settings_default_to_disconnected_for_all_platforms() {
        let store = test_store();
        let settings = store.get_settings("biz-1").unwrap();

        assert_eq!(settings.len(), 5);
        for platform in Platform::ALL {
            let entry = &settings[platform.as_str()];
            assert!(!entry.connected);
            assert_eq!(entry.status, "disconnected");
            assert!(entry.identity.is_empty());
        }
    }

    #[test]
    fn test_update_then_settings_shows_active() {
        let store = test_store();
        store
            .update_platform_connection("biz-1", Platform::Facebook, &sample_data("tok"))
            .unwrap();

        let settings = store.get_settings("biz-1").unwrap();
        let fb = &settings["facebook"];
        assert!(fb.connected);
        assert_eq!(fb.status, "active");
        assert_eq!(fb.identity["page_id"], "p1");
        assert!(fb.expires_at.is_some());
        assert!(fb.last_refreshed.is_some());

        // Other platforms untouched
        assert!(!settings["tiktok"].connected);
    }

    #[test]
    fn test_token_roundtrip_is_lossless() {
        let store = test_store();
        store
            .update_platform_connection("biz-1", Platform::Youtube, &sample_data("exact-token-123"))
            .unwrap();

        let token = store.get_platform_token("biz-1", Platform::Youtube).unwrap();
        assert_eq!(token.access_token, "exact-token-123");
        assert_eq!(token.refresh_token.as_deref(), Some("refresh-plain"));
        assert_eq!(token.identity["page_name"], "My Page");
    }

    #[test]
    fn test_token_is_ciphertext_at_rest() {
        let store = test_store();
        store
            .update_platform_connection("biz-1", Platform::Facebook, &sample_data("plain-token"))
            .unwrap();

        let raw: String = store
            .conn
            .lock()
            .unwrap()
            .query_row(
                "SELECT access_token FROM platform_connections WHERE business_id='biz-1'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_ne!(raw, "plain-token");
        assert!(!raw.contains("plain-token"));
        assert!(raw.contains(':'));
    }

    #[test]
    fn test_disconnect_nulls_everything() {
        let store = test_store();
        store
            .update_platform_connection("biz-1", Platform::Facebook, &sample_data("tok"))
            .unwrap();
        store.disconnect_platform("biz-1", Platform::Facebook).unwrap();

        let settings = store.get_settings("biz-1").unwrap();
        let fb = &settings["facebook"];
        assert!(!fb.connected);
        assert_eq!(fb.status, "disconnected");
        assert!(fb.identity.is_empty());
        assert!(fb.expires_at.is_none());
        assert!(fb.last_refreshed.is_none());

        let err = store
            .get_platform_token("biz-1", Platform::Facebook)
            .unwrap_err();
        assert!(err.downcast_ref::<NotConnected>().is_some());
    }

    #[test]
    fn test_get_token_not_connected_is_typed() {
        let store = test_store();
        let err = store
            .get_platform_token("ghost", Platform::Tiktok)
            .unwrap_err();
        let not_connected = err.downcast_ref::<NotConnected>().unwrap();
        assert_eq!(not_connected.platform, Platform::Tiktok);
    }

    #[test]
    fn test_apply_refreshed_tokens_preserves_identity() {
        let store = test_store();
        store
            .update_platform_connection("biz-1", Platform::Tiktok, &sample_data("old-token"))
            .unwrap();

        store
            .apply_refreshed_tokens(
                "biz-1",
                Platform::Tiktok,
                "new-token",
                Some("new-refresh"),
                Some(Utc::now() + Duration::days(1)),
            )
            .unwrap();

        let token = store.get_platform_token("biz-1", Platform::Tiktok).unwrap();
        assert_eq!(token.access_token, "new-token");
        assert_eq!(token.refresh_token.as_deref(), Some("new-refresh"));
        assert_eq!(token.identity["page_id"], "p1");
    }

    #[test]
    fn test_apply_refreshed_tokens_requires_connection() {
        let store = test_store();
        let err = store
            .apply_refreshed_tokens("ghost", Platform::Tiktok, "tok", None, None)
            .unwrap_err();
        assert!(err.downcast_ref::<NotConnected>().is_some());
    }

    #[test]
    fn test_expiring_within_window() {
        let store = test_store();

        let mut soon = sample_data("tok-a");
        soon.expires_at = Some(Utc::now() + Duration::hours(12));
        store
            .update_platform_connection("biz-soon", Platform::Tiktok, &soon)
            .unwrap();

        let mut later = sample_data("tok-b");
        later.expires_at = Some(Utc::now() + Duration::days(30));
        store
            .update_platform_connection("biz-later", Platform::Tiktok, &later)
            .unwrap();

        let expiring = store
            .expiring_within(Platform::Tiktok, Duration::hours(48))
            .unwrap();
        assert_eq!(expiring, vec!["biz-soon".to_string()]);
    }
}
