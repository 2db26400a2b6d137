//! Persistence layer.
//!
//! Two SQLite-backed stores: business platform connections (tokens encrypted
//! at rest) and the per-user wallet ledger. Both follow the same shape: a
//! `Mutex<Connection>`, schema created on open, upsert writes.

mod connections;
mod wallet;

pub use connections::{
    ConnectionStore, DecryptedToken, NotConnected, PlatformConnection, SocialMediaSettings,
};
pub use wallet::{
    InsufficientBalance, PromoOffer, Transaction, WalletRecord, WalletStore, PROMO_CODES,
};
