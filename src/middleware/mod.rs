//! Middleware for observability and rate limiting.
//!
//! This module provides:
//! - Request logging with latency tracking
//! - Sliding-window admission control per client IP and operation class

pub mod logging;
pub mod rate_limit;

pub use logging::request_logging;
pub use rate_limit::{
    admission_check, admit, Admission, AdmissionControl, AdmissionGate, Operation,
    RateLimitPolicy, RateLimiters, SlidingWindowLimiter,
};
