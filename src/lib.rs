//! Notes Backend Library
//!
//! Multi-user notes service: password accounts, bearer tokens and
//! per-client rate limiting in front of an owner-scoped notes store.
//! Exposes every module for use by the binary and integration tests.

pub mod api;
pub mod auth;
pub mod clock;
pub mod config;
pub mod middleware;
pub mod notes;
pub mod storage;
