//! Gallery link resolver bot.
//!
//! Finds gallery links in chat messages, applies per-API, per-sender and
//! per-room admission control, and resolves the links into metadata with
//! batched calls to the remote JSON API.

/// Telegram transport: handlers, rendering and delivery
pub mod bot;
/// Configuration and settings management
pub mod config;
/// Link extraction, API client and resolution
pub mod gallery;
/// Token buckets, flood windows and admission control
pub mod limits;
/// Per-message pipeline
pub mod pipeline;
/// Utility functions
pub mod utils;
