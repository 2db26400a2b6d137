// AI completion client
pub mod ai;

// HTTP API
pub mod api;

// Configuration loading
pub mod config;

// Token encryption
pub mod crypto;

// Payment gateway verification
pub mod payments;

// Social platform adapters
pub mod platform;

// Background token refresher
pub mod refresh;

// SQLite-backed stores
pub mod store;
