//! Rate limiting middleware.
//!
//! In-memory per-client admission control using a sliding window. Every
//! protected operation class owns an independent limiter keyed by client IP.

use crate::api::error::ApiError;
use crate::clock::Clock;
use axum::{
    extract::{ConnectInfo, Request, State},
    http::HeaderValue,
    middleware::Next,
    response::Response,
};
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Default budget applied to every rate-limited operation
pub const DEFAULT_LIMIT: usize = 2;
pub const DEFAULT_WINDOW_SECS: u64 = 30;

/// Longest window accepted from configuration (one year)
pub const MAX_WINDOW_SECS: u64 = 366 * 24 * 60 * 60;

/// Header carrying the admissions left in the current window
pub const REMAINING_HEADER: &str = "x-ratelimit-remaining";

/// `(limit, window_seconds)` pair for one operation class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    /// Maximum admitted requests inside the trailing window.
    pub limit: usize,
    /// Window length in seconds.
    pub window_secs: u64,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
            window_secs: DEFAULT_WINDOW_SECS,
        }
    }
}

impl RateLimitPolicy {
    pub fn new(limit: usize, window_secs: u64) -> Self {
        Self { limit, window_secs }
    }

    pub fn window(&self) -> Duration {
        Duration::seconds(self.window_secs.min(MAX_WINDOW_SECS) as i64)
    }
}

/// Result of a single admission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Allowed { remaining: usize },
    Rejected { retry_after: Duration },
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Admission::Allowed { .. })
    }
}

/// Admission decision source. The in-memory limiter is the only
/// implementation; the trait keeps call sites independent of the backing store.
pub trait AdmissionControl: Send + Sync {
    /// Decide on and, if admitted, record one request from `client_id` at `now`.
    fn check_and_record(&self, client_id: &str, now: DateTime<Utc>) -> Admission;

    /// Drop clients with no timestamps left inside the window.
    /// Returns how many were evicted.
    fn sweep(&self, now: DateTime<Utc>) -> usize;

    fn tracked_clients(&self) -> usize;
}

/// Sliding-window counter: exact count of admitted requests in the trailing
/// window, recomputed on every check.
pub struct SlidingWindowLimiter {
    policy: RateLimitPolicy,
    window: Duration,
    history: Mutex<HashMap<String, Vec<DateTime<Utc>>>>,
}

impl SlidingWindowLimiter {
    pub fn new(policy: RateLimitPolicy) -> Self {
        Self {
            policy,
            window: policy.window(),
            history: Mutex::new(HashMap::new()),
        }
    }

}

impl AdmissionControl for SlidingWindowLimiter {
    fn check_and_record(&self, client_id: &str, now: DateTime<Utc>) -> Admission {
        // Prune, check and append happen under one lock so concurrent
        // requests cannot both take the last slot.
        let mut history = self.history.lock();
        let stamps = history.entry(client_id.to_string()).or_default();

        let window = self.window;
        stamps.retain(|t| now - *t < window);

        if stamps.len() >= self.policy.limit {
            let retry_after = stamps
                .iter()
                .min()
                .and_then(|oldest| oldest.checked_add_signed(window))
                .map(|end| end - now)
                .unwrap_or(window);
            return Admission::Rejected { retry_after };
        }

        stamps.push(now);
        Admission::Allowed {
            remaining: self.policy.limit - stamps.len(),
        }
    }

    fn sweep(&self, now: DateTime<Utc>) -> usize {
        let mut history = self.history.lock();
        let before = history.len();
        let window = self.window;

        history.retain(|_, stamps| {
            stamps.retain(|t| now - *t < window);
            !stamps.is_empty()
        });

        before - history.len()
    }

    fn tracked_clients(&self) -> usize {
        self.history.lock().len()
    }
}

/// Rate-limited operation classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    CreateNote,
    ListNotes,
    GetNote,
    UpdateNote,
    DeleteNote,
}

impl Operation {
    pub const ALL: [Operation; 5] = [
        Operation::CreateNote,
        Operation::ListNotes,
        Operation::GetNote,
        Operation::UpdateNote,
        Operation::DeleteNote,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::CreateNote => "notes.create",
            Operation::ListNotes => "notes.list",
            Operation::GetNote => "notes.get",
            Operation::UpdateNote => "notes.update",
            Operation::DeleteNote => "notes.delete",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Operation::ALL
            .into_iter()
            .find(|op| op.as_str() == s.trim())
            .ok_or_else(|| format!("unknown operation class '{}'", s.trim()))
    }
}

/// One independent limiter per operation class, built once at startup.
#[derive(Clone)]
pub struct RateLimiters {
    limiters: HashMap<Operation, Arc<dyn AdmissionControl>>,
}

impl RateLimiters {
    pub fn new(default: RateLimitPolicy, overrides: &HashMap<Operation, RateLimitPolicy>) -> Self {
        let limiters = Operation::ALL
            .into_iter()
            .map(|op| {
                let policy = overrides.get(&op).copied().unwrap_or(default);
                debug!(
                    operation = %op,
                    limit = policy.limit,
                    window_secs = policy.window_secs,
                    "Rate limiter configured"
                );
                let limiter: Arc<dyn AdmissionControl> = Arc::new(SlidingWindowLimiter::new(policy));
                (op, limiter)
            })
            .collect();

        Self { limiters }
    }

    pub fn uniform(policy: RateLimitPolicy) -> Self {
        Self::new(policy, &HashMap::new())
    }

    pub fn get(&self, operation: Operation) -> Arc<dyn AdmissionControl> {
        self.limiters[&operation].clone()
    }

    /// Evict idle clients from every limiter.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        self.limiters.values().map(|l| l.sweep(now)).sum()
    }

    /// Periodic cleanup of idle entries (background task).
    pub fn spawn_sweeper(
        &self,
        clock: Arc<dyn Clock>,
        every: std::time::Duration,
    ) -> JoinHandle<()> {
        let limiters = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let evicted = limiters.sweep(clock.now());
                if evicted > 0 {
                    debug!(evicted, "Evicted idle rate-limit clients");
                }
            }
        })
    }
}

/// Middleware state: one operation class bound to its limiter.
#[derive(Clone)]
pub struct AdmissionGate {
    pub operation: Operation,
    pub limiter: Arc<dyn AdmissionControl>,
    pub clock: Arc<dyn Clock>,
}

impl AdmissionGate {
    pub fn new(operation: Operation, limiters: &RateLimiters, clock: Arc<dyn Clock>) -> Self {
        Self {
            operation,
            limiter: limiters.get(operation),
            clock,
        }
    }
}

/// Client identity used to partition limiter state: the peer IP.
pub fn client_identity(connect_info: Option<&ConnectInfo<SocketAddr>>) -> String {
    connect_info
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Admission stage on its own: check and record, returning the admissions
/// left in the window, or a 429 error.
pub fn admission_check(gate: &AdmissionGate, client_id: &str) -> Result<usize, ApiError> {
    match gate.limiter.check_and_record(client_id, gate.clock.now()) {
        Admission::Allowed { remaining } => Ok(remaining),
        Admission::Rejected { retry_after } => {
            // Round up so clients never retry inside the window
            let millis = retry_after.num_milliseconds().max(0) as u64;
            let retry_after_secs = millis.div_ceil(1000).max(1);

            warn!(
                client = client_id,
                operation = %gate.operation,
                retry_after_secs,
                "Rate limit exceeded"
            );

            Err(ApiError::RateLimited {
                retry_after_secs: Some(retry_after_secs),
            })
        }
    }
}

/// Rate limiting middleware function.
pub async fn admit(
    State(gate): State<AdmissionGate>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let client_id = client_identity(connect_info.as_ref());
    let remaining = admission_check(&gate, &client_id)?;

    let mut response = next.run(request).await;
    response
        .headers_mut()
        .insert(REMAINING_HEADER, HeaderValue::from(remaining));
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::Barrier;
    use std::thread;

    fn limiter(limit: usize, window_secs: u64) -> SlidingWindowLimiter {
        SlidingWindowLimiter::new(RateLimitPolicy::new(limit, window_secs))
    }

    #[test]
    fn test_allows_up_to_limit_then_rejects() {
        let limiter = limiter(3, 10);
        let t0 = Utc::now();

        for i in 0..3 {
            let now = t0 + Duration::seconds(i);
            assert_eq!(
                limiter.check_and_record("10.0.0.1", now),
                Admission::Allowed {
                    remaining: 2 - i as usize
                }
            );
        }

        let decision = limiter.check_and_record("10.0.0.1", t0 + Duration::seconds(3));
        assert_eq!(
            decision,
            Admission::Rejected {
                retry_after: Duration::seconds(7)
            }
        );
    }

    #[test]
    fn test_allowed_again_once_oldest_leaves_window() {
        let limiter = limiter(2, 30);
        let t0 = Utc::now();

        assert!(limiter.check_and_record("c", t0).is_allowed());
        assert!(limiter.check_and_record("c", t0 + Duration::seconds(10)).is_allowed());
        assert!(!limiter.check_and_record("c", t0 + Duration::seconds(29)).is_allowed());

        // Exactly W after the first call: it no longer counts
        assert!(limiter.check_and_record("c", t0 + Duration::seconds(30)).is_allowed());
        // The 10s call is still inside the window
        assert!(!limiter.check_and_record("c", t0 + Duration::seconds(31)).is_allowed());
        assert!(limiter.check_and_record("c", t0 + Duration::seconds(40)).is_allowed());
    }

    #[test]
    fn test_rejections_do_not_consume_budget() {
        let limiter = limiter(1, 10);
        let t0 = Utc::now();

        assert!(limiter.check_and_record("c", t0).is_allowed());
        for s in 1..10 {
            assert!(!limiter.check_and_record("c", t0 + Duration::seconds(s)).is_allowed());
        }
        // Only the admitted call at t0 counted, so t0+10 is free
        assert!(limiter.check_and_record("c", t0 + Duration::seconds(10)).is_allowed());
    }

    #[test]
    fn test_burst_at_window_boundary_is_allowed() {
        let limiter = limiter(3, 60);
        let t0 = Utc::now();

        // L calls just before the boundary, then L calls right after it
        for ms in [0, 1, 2] {
            assert!(limiter
                .check_and_record("c", t0 + Duration::milliseconds(59_990 + ms))
                .is_allowed());
        }
        for ms in [0, 1, 2] {
            assert!(limiter
                .check_and_record("c", t0 + Duration::milliseconds(119_990 + ms))
                .is_allowed());
        }
        assert!(!limiter
            .check_and_record("c", t0 + Duration::milliseconds(119_993))
            .is_allowed());
    }

    #[test]
    fn test_clients_isolated() {
        let limiter = limiter(1, 30);
        let now = Utc::now();

        assert!(limiter.check_and_record("10.0.0.1", now).is_allowed());
        assert!(!limiter.check_and_record("10.0.0.1", now).is_allowed());
        assert!(limiter.check_and_record("10.0.0.2", now).is_allowed());
    }

    #[test]
    fn test_operations_isolated() {
        let limiters = RateLimiters::uniform(RateLimitPolicy::new(1, 30));
        let now = Utc::now();

        assert!(limiters
            .get(Operation::ListNotes)
            .check_and_record("c", now)
            .is_allowed());
        assert!(!limiters
            .get(Operation::ListNotes)
            .check_and_record("c", now)
            .is_allowed());

        for op in [
            Operation::CreateNote,
            Operation::GetNote,
            Operation::UpdateNote,
            Operation::DeleteNote,
        ] {
            assert!(limiters.get(op).check_and_record("c", now).is_allowed(), "{op}");
        }
    }

    #[test]
    fn test_zero_limit_rejects_everything() {
        let limiter = limiter(0, 30);
        assert!(!limiter.check_and_record("c", Utc::now()).is_allowed());
    }

    #[test]
    fn test_per_operation_overrides() {
        let overrides = HashMap::from([(Operation::CreateNote, RateLimitPolicy::new(5, 60))]);
        let limiters = RateLimiters::new(RateLimitPolicy::default(), &overrides);
        let now = Utc::now();

        let create = limiters.get(Operation::CreateNote);
        for _ in 0..5 {
            assert!(create.check_and_record("c", now).is_allowed());
        }
        assert!(!create.check_and_record("c", now).is_allowed());

        let list = limiters.get(Operation::ListNotes);
        assert!(list.check_and_record("c", now).is_allowed());
        assert!(list.check_and_record("c", now).is_allowed());
        assert!(!list.check_and_record("c", now).is_allowed());
    }

    #[test]
    fn test_sweep_evicts_idle_clients() {
        let limiter = limiter(2, 30);
        let t0 = Utc::now();

        limiter.check_and_record("old", t0);
        limiter.check_and_record("recent", t0 + Duration::seconds(20));
        assert_eq!(limiter.tracked_clients(), 2);

        assert_eq!(limiter.sweep(t0 + Duration::seconds(29)), 0);
        assert_eq!(limiter.sweep(t0 + Duration::seconds(30)), 1);
        assert_eq!(limiter.tracked_clients(), 1);

        assert_eq!(limiter.sweep(t0 + Duration::seconds(50)), 1);
        assert_eq!(limiter.tracked_clients(), 0);
    }

    #[test]
    fn test_concurrent_requests_never_over_admit() {
        let limiter = Arc::new(limiter(5, 30));
        let now = Utc::now();
        let threads = 64;
        let barrier = Arc::new(Barrier::new(threads));

        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let limiter = limiter.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    limiter.check_and_record("203.0.113.9", now).is_allowed()
                })
            })
            .collect();

        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|allowed| *allowed)
            .count();

        assert_eq!(admitted, 5);
    }

    #[test]
    fn test_operation_parsing() {
        for op in Operation::ALL {
            assert_eq!(op.as_str().parse::<Operation>().unwrap(), op);
        }
        assert!("notes.share".parse::<Operation>().is_err());
    }

    #[test]
    fn test_admission_check_reports_retry_after() {
        let clock = Arc::new(ManualClock::starting_now());
        let limiters = RateLimiters::uniform(RateLimitPolicy::new(1, 30));
        let gate = AdmissionGate::new(Operation::GetNote, &limiters, clock.clone());

        assert_eq!(admission_check(&gate, "c").unwrap(), 0);

        clock.advance(Duration::milliseconds(10_500));
        match admission_check(&gate, "c") {
            Err(ApiError::RateLimited { retry_after_secs }) => {
                assert_eq!(retry_after_secs, Some(20));
            }
            other => panic!("expected rate limit, got {:?}", other),
        }

        clock.advance(Duration::seconds(20));
        assert!(admission_check(&gate, "c").is_ok());
    }

    #[test]
    fn test_unbounded_window_rejects_without_overflow() {
        let limiter = limiter(1, u64::MAX);
        let t0 = Utc::now();

        assert!(limiter.check_and_record("c", t0).is_allowed());
        match limiter.check_and_record("c", t0 + Duration::seconds(5)) {
            Admission::Rejected { retry_after } => {
                assert_eq!(
                    retry_after,
                    Duration::seconds(MAX_WINDOW_SECS as i64 - 5)
                );
            }
            other => panic!("expected rejection, got {:?}", other),
        }

        // Near chrono's upper bound the window end is not representable
        let late = DateTime::<Utc>::MAX_UTC - Duration::seconds(10);
        assert!(limiter.check_and_record("late", late).is_allowed());
        assert_eq!(
            limiter.check_and_record("late", late),
            Admission::Rejected {
                retry_after: RateLimitPolicy::new(1, u64::MAX).window()
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_task_evicts_idle_clients() {
        let clock = Arc::new(ManualClock::starting_now());
        let limiters = RateLimiters::uniform(RateLimitPolicy::new(2, 30));
        let list = limiters.get(Operation::ListNotes);

        list.check_and_record("idle", clock.now());
        clock.advance(Duration::seconds(20));
        list.check_and_record("active", clock.now());
        assert_eq!(list.tracked_clients(), 2);

        let handle = limiters.spawn_sweeper(clock.clone(), std::time::Duration::from_secs(60));

        // First tick is skipped, so nothing happens before one interval
        tokio::time::sleep(std::time::Duration::from_secs(59)).await;
        assert_eq!(list.tracked_clients(), 2);

        // "idle" is 30s old at the next tick, "active" only 10s
        clock.advance(Duration::seconds(10));
        tokio::time::sleep(std::time::Duration::from_secs(2)).await;
        assert_eq!(list.tracked_clients(), 1);

        clock.advance(Duration::seconds(30));
        tokio::time::sleep(std::time::Duration::from_secs(60)).await;
        assert_eq!(list.tracked_clients(), 0);

        handle.abort();
    }

    #[test]
    fn test_client_identity() {
        let addr: SocketAddr = "198.51.100.7:54321".parse().unwrap();
        assert_eq!(client_identity(Some(&ConnectInfo(addr))), "198.51.100.7");
        assert_eq!(client_identity(None), "unknown");
    }
}
