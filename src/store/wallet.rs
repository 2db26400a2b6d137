//! Wallet ledger: balance, append-only transaction log, subscription state.
//!
//! Wallets are created lazily on first access. Deductions are a single
//! conditional update (`WHERE balance >= amount`) so two concurrent requests
//! cannot both pass a balance check and overdraft the wallet; the newest
//! transaction's `balance_after` always equals the current balance.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Months, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::path::Path;
use std::sync::Mutex;
use uuid::Uuid;

/// Typed condition: a deduction larger than the current balance.
#[derive(Debug)]
pub struct InsufficientBalance {
    pub current_balance: f64,
    pub required: f64,
}

impl fmt::Display for InsufficientBalance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Insufficient balance: have {:.2}, need {:.2}",
            self.current_balance, self.required
        )
    }
}

impl std::error::Error for InsufficientBalance {}

/// A fixed promo offer: plan, subscription length, credit grant.
#[derive(Clone, Copy, Debug)]
pub struct PromoOffer {
    pub code: &'static str,
    pub plan: &'static str,
    pub duration_months: u32,
    pub credits: f64,
}

/// Redeemable promo codes. Lookup is exact; each (email, code) pair redeems
/// at most once.
pub const PROMO_CODES: &[PromoOffer] = &[
    PromoOffer {
        code: "LAUNCH50",
        plan: "starter",
        duration_months: 3,
        credits: 50.0,
    },
    PromoOffer {
        code: "GROWTH100",
        plan: "growth",
        duration_months: 3,
        credits: 100.0,
    },
    PromoOffer {
        code: "PARTNER12",
        plan: "growth",
        duration_months: 12,
        credits: 250.0,
    },
];

#[derive(Clone, Debug, Serialize)]
pub struct WalletRecord {
    pub email: String,
    pub balance: f64,
    pub current_plan: Option<String>,
    pub subscription_status: String,
    pub subscription_start_date: Option<DateTime<Utc>>,
    pub subscription_end_date: Option<DateTime<Utc>>,
    pub auto_renew: bool,
}

#[derive(Clone, Debug, Serialize)]
pub struct Transaction {
    pub id: String,
    #[serde(rename = "type")]
    pub txn_type: String,
    pub amount: f64,
    pub balance_after: f64,
    pub description: Option<String>,
    pub metadata: Option<Value>,
    pub timestamp: DateTime<Utc>,
}

pub struct WalletStore {
    conn: Mutex<Connection>,
}

impl WalletStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path).context("Failed to open wallet database")?;
        // Both stores can share one database file
        conn.busy_timeout(std::time::Duration::from_secs(5))
            .context("Failed to set busy timeout")?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS wallets (
                email TEXT PRIMARY KEY,
                balance REAL NOT NULL DEFAULT 0,
                current_plan TEXT,
                subscription_status TEXT NOT NULL DEFAULT 'inactive',
                subscription_start_date TEXT,
                subscription_end_date TEXT,
                auto_renew INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS wallet_transactions (
                id TEXT PRIMARY KEY,
                email TEXT NOT NULL,
                txn_type TEXT NOT NULL,
                amount REAL NOT NULL,
                balance_after REAL NOT NULL,
                description TEXT,
                metadata TEXT,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_txn_email
                ON wallet_transactions(email, created_at);
            CREATE TABLE IF NOT EXISTS promo_redemptions (
                email TEXT NOT NULL,
                code TEXT NOT NULL,
                redeemed_at TEXT NOT NULL,
                UNIQUE(email, code)
            );
            CREATE TABLE IF NOT EXISTS payment_references (
                reference TEXT PRIMARY KEY,
                email TEXT NOT NULL,
                amount REAL NOT NULL,
                used_at TEXT NOT NULL
            );
            "#,
        )
        .context("Failed to create wallet schema")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Returns the wallet, creating an empty one on first access.
    pub fn get_or_create(&self, email: &str) -> Result<WalletRecord> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction().context("Failed to begin transaction")?;
        ensure_wallet(&tx, email)?;
        let record = read_wallet(&tx, email)?
            .ok_or_else(|| anyhow!("Wallet vanished during creation"))?;
        tx.commit().context("Failed to commit wallet creation")?;
        Ok(record)
    }

    /// Adds credits, creating the wallet if needed, and appends the
    /// transaction in the same database transaction.
    pub fn credit(
        &self,
        email: &str,
        amount: f64,
        txn_type: &str,
        description: Option<&str>,
        metadata: Option<&Value>,
    ) -> Result<f64> {
        if amount <= 0.0 {
            return Err(anyhow!("Credit amount must be positive"));
        }

        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction().context("Failed to begin transaction")?;

        ensure_wallet(&tx, email)?;
        tx.execute(
            "UPDATE wallets SET balance = balance + ?1, updated_at = ?2 WHERE email = ?3",
            params![amount, Utc::now().to_rfc3339(), email],
        )
        .context("Failed to credit wallet")?;

        let new_balance = current_balance(&tx, email)?;
        append_transaction(&tx, email, txn_type, amount, new_balance, description, metadata)?;

        tx.commit().context("Failed to commit credit")?;
        Ok(new_balance)
    }

    /// Deducts credits with a single conditional update.
    ///
    /// Zero rows affected means the balance (possibly of a wallet that does
    /// not exist yet) is short; the typed error carries the current balance
    /// and the required amount.
    pub fn deduct(
        &self,
        email: &str,
        amount: f64,
        txn_type: &str,
        description: Option<&str>,
        metadata: Option<&Value>,
    ) -> Result<f64> {
        if amount <= 0.0 {
            return Err(anyhow!("Deduction amount must be positive"));
        }

        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction().context("Failed to begin transaction")?;

        let updated = tx
            .execute(
                "UPDATE wallets SET balance = balance - ?1, updated_at = ?2
                 WHERE email = ?3 AND balance >= ?1",
                params![amount, Utc::now().to_rfc3339(), email],
            )
            .context("Failed to deduct from wallet")?;

        if updated == 0 {
            let current = current_balance(&tx, email).unwrap_or(0.0);
            return Err(InsufficientBalance {
                current_balance: current,
                required: amount,
            }
            .into());
        }

        let new_balance = current_balance(&tx, email)?;
        append_transaction(&tx, email, txn_type, -amount, new_balance, description, metadata)?;

        tx.commit().context("Failed to commit deduction")?;
        Ok(new_balance)
    }

    /// Transactions, newest first.
    pub fn transactions(&self, email: &str) -> Result<Vec<Transaction>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT id, txn_type, amount, balance_after, description, metadata, created_at
                 FROM wallet_transactions WHERE email = ?1
                 ORDER BY created_at DESC, rowid DESC",
            )
            .context("Failed to prepare transactions query")?;

        let rows = stmt
            .query_map(params![email], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, f64>(2)?,
                    row.get::<_, f64>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, Option<String>>(5)?,
                    row.get::<_, String>(6)?,
                ))
            })
            .context("Failed to query transactions")?;

        let mut transactions = Vec::new();
        for row in rows {
            let (id, txn_type, amount, balance_after, description, metadata, created_at) =
                row.context("Failed to read transaction row")?;
            transactions.push(Transaction {
                id,
                txn_type,
                amount,
                balance_after,
                description,
                metadata: metadata.and_then(|m| serde_json::from_str(&m).ok()),
                timestamp: DateTime::parse_from_rfc3339(&created_at)
                    .context("Failed to parse transaction timestamp")?
                    .with_timezone(&Utc),
            });
        }
        Ok(transactions)
    }

    /// Activates a subscription: end date is start + 1 year (yearly) or
    /// start + 3 months (quarterly billing).
    pub fn activate_subscription(
        &self,
        email: &str,
        plan: &str,
        is_yearly: bool,
    ) -> Result<WalletRecord> {
        let months = if is_yearly { 12 } else { 3 };
        self.activate_subscription_for(email, plan, months)
    }

    /// Activates a subscription with an explicit length (promo offers).
    pub fn activate_subscription_for(
        &self,
        email: &str,
        plan: &str,
        duration_months: u32,
    ) -> Result<WalletRecord> {
        let start = Utc::now();
        let end = start
            .checked_add_months(Months::new(duration_months))
            .ok_or_else(|| anyhow!("Subscription end date out of range"))?;

        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction().context("Failed to begin transaction")?;

        ensure_wallet(&tx, email)?;
        tx.execute(
            "UPDATE wallets SET
                current_plan = ?1,
                subscription_status = 'active',
                subscription_start_date = ?2,
                subscription_end_date = ?3,
                auto_renew = 1,
                updated_at = ?4
             WHERE email = ?5",
            params![
                plan,
                start.to_rfc3339(),
                end.to_rfc3339(),
                Utc::now().to_rfc3339(),
                email
            ],
        )
        .context("Failed to activate subscription")?;

        let record = read_wallet(&tx, email)?
            .ok_or_else(|| anyhow!("Wallet vanished during activation"))?;
        tx.commit().context("Failed to commit activation")?;
        Ok(record)
    }

    /// Marks the subscription cancelled; the current period is not revoked.
    pub fn cancel_subscription(&self, email: &str) -> Result<WalletRecord> {
        let conn = self.conn.lock().unwrap();
        let updated = conn
            .execute(
                "UPDATE wallets SET
                    subscription_status = 'cancelled',
                    auto_renew = 0,
                    updated_at = ?1
                 WHERE email = ?2",
                params![Utc::now().to_rfc3339(), email],
            )
            .context("Failed to cancel subscription")?;
        if updated == 0 {
            return Err(anyhow!("Wallet not found for {}", email));
        }
        read_wallet(&conn, email)?.ok_or_else(|| anyhow!("Wallet not found for {}", email))
    }

    /// Looks up a promo offer and checks prior use for this email.
    pub fn validate_promo(&self, email: &str, code: &str) -> Result<Option<PromoOffer>> {
        let Some(offer) = PROMO_CODES.iter().find(|o| o.code == code).copied() else {
            return Ok(None);
        };
        let conn = self.conn.lock().unwrap();
        let used: Option<String> = conn
            .query_row(
                "SELECT redeemed_at FROM promo_redemptions WHERE email = ?1 AND code = ?2",
                params![email, code],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to check promo usage")?;
        if used.is_some() {
            return Err(anyhow!("Promo code {} already redeemed by {}", code, email));
        }
        Ok(Some(offer))
    }

    /// Records a redemption; the unique (email, code) index rejects repeats.
    pub fn record_promo_redemption(&self, email: &str, code: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO promo_redemptions (email, code, redeemed_at) VALUES (?1, ?2, ?3)",
            params![email, code, Utc::now().to_rfc3339()],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(err, _)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                anyhow!("Promo code {} already redeemed by {}", code, email)
            }
            other => anyhow::Error::from(other).context("Failed to record promo redemption"),
        })?;
        Ok(())
    }

    /// Records a verified payment reference; duplicates are rejected so a
    /// gateway receipt can only be spent once.
    pub fn record_payment_reference(&self, reference: &str, email: &str, amount: f64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO payment_references (reference, email, amount, used_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![reference, email, amount, Utc::now().to_rfc3339()],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(err, _)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                anyhow!("Payment reference {} was already used", reference)
            }
            other => anyhow::Error::from(other).context("Failed to record payment reference"),
        })?;
        Ok(())
    }
}

fn ensure_wallet(conn: &Connection, email: &str) -> Result<()> {
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO wallets (email, balance, created_at, updated_at)
         VALUES (?1, 0, ?2, ?2)
         ON CONFLICT(email) DO NOTHING",
        params![email, now],
    )
    .context("Failed to ensure wallet exists")?;
    Ok(())
}

fn current_balance(conn: &Connection, email: &str) -> Result<f64> {
    conn.query_row(
        "SELECT balance FROM wallets WHERE email = ?1",
        params![email],
        |row| row.get(0),
    )
    .optional()
    .context("Failed to read balance")?
    .ok_or_else(|| anyhow!("Wallet not found for {}", email))
}

fn read_wallet(conn: &Connection, email: &str) -> Result<Option<WalletRecord>> {
    conn.query_row(
        "SELECT email, balance, current_plan, subscription_status,
                subscription_start_date, subscription_end_date, auto_renew
         FROM wallets WHERE email = ?1",
        params![email],
        |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, f64>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, bool>(6)?,
            ))
        },
    )
    .optional()
    .context("Failed to read wallet")?
    .map(
        |(email, balance, current_plan, status, start, end, auto_renew)| {
            Ok(WalletRecord {
                email,
                balance,
                current_plan,
                subscription_status: status,
                subscription_start_date: parse_ts(start)?,
                subscription_end_date: parse_ts(end)?,
                auto_renew,
            })
        },
    )
    .transpose()
}

fn parse_ts(raw: Option<String>) -> Result<Option<DateTime<Utc>>> {
    raw.map(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .context("Failed to parse stored timestamp")
    })
    .transpose()
}

fn append_transaction(
    conn: &Connection,
    email: &str,
    txn_type: &str,
    amount: f64,
    balance_after: f64,
    description: Option<&str>,
    metadata: Option<&Value>,
) -> Result<()> {
    conn.execute(
        "INSERT INTO wallet_transactions
            (id, email, txn_type, amount, balance_after, description, metadata, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            Uuid::new_v4().to_string(),
            email,
            txn_type,
            amount,
            balance_after,
            description,
            metadata.map(|m| m.to_string()),
            Utc::now().to_rfc3339(),
        ],
    )
    .context("Failed to append transaction")?;
    Ok(())
}
