//! Bounded retry with exponential backoff
//!
//! Wraps a single remote call. Retryable failures sleep `base_delay * 2^attempt`
//! on the calling thread before the next attempt; terminal failures return at
//! once. Every failure collapses to `None` at this boundary.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::{debug, error, warn};

use crate::config::RetryConfig;
use crate::drive::DriveError;

/// Maximum number of recent failures to track
const MAX_ERROR_HISTORY: usize = 10;

/// Health status values
const HEALTH_HEALTHY: u8 = 0;
const HEALTH_DEGRADED: u8 = 1;
const HEALTH_UNHEALTHY: u8 = 2;

/// Connection health as seen by the retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Health {
    Healthy,
    /// Last failure was throttling or a service outage
    Degraded,
    /// Last failure was a timeout or an unclassified transport error
    Unhealthy,
}

impl Health {
    pub fn as_str(&self) -> &'static str {
        match self {
            Health::Healthy => "healthy",
            Health::Degraded => "degraded",
            Health::Unhealthy => "unhealthy",
        }
    }
}

/// A recent failure entry for diagnostics
#[derive(Debug, Clone, PartialEq)]
pub struct FailureEntry {
    /// Unix timestamp in seconds
    pub timestamp: u64,
    pub operation: String,
    pub error: DriveError,
}

/// Blocking sleep used between attempts
pub type Sleeper = Arc<dyn Fn(Duration) + Send + Sync>;

/// Retry policy shared by every operation of one facade
#[derive(Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    sleeper: Sleeper,
    health: Arc<AtomicU8>,
    history: Arc<RwLock<VecDeque<FailureEntry>>>,
}

impl RetryPolicy {
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: config.base_delay,
            sleeper: Arc::new(std::thread::sleep),
            health: Arc::new(AtomicU8::new(HEALTH_HEALTHY)),
            history: Arc::new(RwLock::new(VecDeque::with_capacity(MAX_ERROR_HISTORY))),
        }
    }

    /// Replace the sleep function (tests record delays instead of waiting)
    pub fn with_sleeper(mut self, sleeper: Sleeper) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before retrying after the zero-indexed `attempt` failed
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
    }

    /// Execute `operation` with retries
    ///
    /// Returns `None` when the operation failed terminally or exhausted its
    /// attempts. A result is never invented.
    pub fn execute<T, F>(&self, label: &str, operation: F) -> Option<T>
    where
        F: Fn() -> Result<T, DriveError>,
    {
        for attempt in 0..self.max_attempts {
            match operation() {
                Ok(result) => {
                    self.health.store(HEALTH_HEALTHY, Ordering::Relaxed);
                    if attempt > 0 {
                        debug!(operation = label, attempts = attempt + 1, "Operation recovered after retry");
                    }
                    return Some(result);
                }
                Err(e) if !e.is_retryable() => {
                    error!(operation = label, error = %e, "Operation failed, not retrying");
                    self.record_failure(label, e);
                    return None;
                }
                Err(e) => {
                    if attempt + 1 >= self.max_attempts {
                        error!(
                            operation = label,
                            attempts = self.max_attempts,
                            error = %e,
                            "Operation failed after exhausting retries"
                        );
                        self.store_health_for(&e);
                        self.record_failure(label, e);
                        return None;
                    }

                    let delay = self.backoff(attempt);
                    warn!(
                        operation = label,
                        attempt = attempt + 1,
                        max = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying remote operation"
                    );
                    (self.sleeper)(delay);
                }
            }
        }

        None
    }

    /// Record a failure detected before any remote call was made
    pub fn reject(&self, label: &str, error: DriveError) {
        error!(operation = label, error = %error, "Operation rejected");
        self.record_failure(label, error);
    }

    fn store_health_for(&self, err: &DriveError) {
        let health = match err {
            DriveError::RateLimited | DriveError::ServiceUnavailable { .. } => HEALTH_DEGRADED,
            DriveError::Timeout | DriveError::Unknown(_) => HEALTH_UNHEALTHY,
            _ => return,
        };
        self.health.store(health, Ordering::Relaxed);
    }

    /// Log a failure to the history ring buffer
    fn record_failure(&self, operation: &str, error: DriveError) {
        let entry = FailureEntry {
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            operation: operation.to_string(),
            error,
        };

        let mut history = match self.history.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if history.len() >= MAX_ERROR_HISTORY {
            history.pop_front();
        }
        history.push_back(entry);
    }

    /// Current connection health
    pub fn health(&self) -> Health {
        match self.health.load(Ordering::Relaxed) {
            HEALTH_HEALTHY => Health::Healthy,
            HEALTH_DEGRADED => Health::Degraded,
            _ => Health::Unhealthy,
        }
    }

    /// Most recent final failures, oldest first
    pub fn recent_failures(&self) -> Vec<FailureEntry> {
        match self.history.read() {
            Ok(history) => history.iter().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().iter().cloned().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::sync::Mutex;

    fn recording_policy(max_attempts: u32) -> (RetryPolicy, Arc<Mutex<Vec<Duration>>>) {
        let slept = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&slept);
        let policy = RetryPolicy::new(&RetryConfig {
            max_attempts,
            base_delay: Duration::from_millis(100),
        })
        .with_sleeper(Arc::new(move |d| sink.lock().unwrap().push(d)));
        (policy, slept)
    }

    /// Operation that fails with the scripted errors, then succeeds
    fn scripted(
        failures: Vec<DriveError>,
    ) -> (impl Fn() -> Result<&'static str, DriveError>, Arc<Mutex<u32>>) {
        let calls = Arc::new(Mutex::new(0u32));
        let counter = Arc::clone(&calls);
        let failures = RefCell::new(failures.into_iter());
        let op = move || {
            *counter.lock().unwrap() += 1;
            match failures.borrow_mut().next() {
                Some(err) => Err(err),
                None => Ok("done"),
            }
        };
        (op, calls)
    }

    #[test]
    fn test_backoff_sequence_on_service_unavailable() {
        let (policy, slept) = recording_policy(3);
        let (op, calls) = scripted(vec![
            DriveError::ServiceUnavailable { status: 503 },
            DriveError::ServiceUnavailable { status: 503 },
        ]);

        assert_eq!(policy.execute("list", op), Some("done"));
        assert_eq!(*calls.lock().unwrap(), 3);
        assert_eq!(
            *slept.lock().unwrap(),
            vec![Duration::from_millis(100), Duration::from_millis(200)]
        );
        assert_eq!(policy.health(), Health::Healthy);
        assert!(policy.recent_failures().is_empty());
    }

    #[test]
    fn test_terminal_error_short_circuits() {
        let (policy, slept) = recording_policy(3);
        let (op, calls) = scripted(vec![DriveError::from_status(403, "forbidden")]);

        assert_eq!(policy.execute("get", op), None);
        assert_eq!(*calls.lock().unwrap(), 1);
        assert!(slept.lock().unwrap().is_empty());

        let failures = policy.recent_failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].operation, "get");
        assert_eq!(failures[0].error.status(), Some(403));
        // Request-specific failures leave health alone
        assert_eq!(policy.health(), Health::Healthy);
    }

    #[test]
    fn test_exhaustion_returns_none() {
        let (policy, slept) = recording_policy(3);
        let (op, calls) = scripted(vec![
            DriveError::Timeout,
            DriveError::Timeout,
            DriveError::Timeout,
        ]);

        assert_eq!(policy.execute("download", op), None);
        assert_eq!(*calls.lock().unwrap(), 3);
        // No sleep after the final attempt
        assert_eq!(slept.lock().unwrap().len(), 2);
        assert_eq!(policy.health(), Health::Unhealthy);
    }

    #[test]
    fn test_unknown_errors_are_retried() {
        let (policy, _) = recording_policy(3);
        let (op, calls) = scripted(vec![DriveError::Unknown("connection reset".into())]);

        assert_eq!(policy.execute("list", op), Some("done"));
        assert_eq!(*calls.lock().unwrap(), 2);
    }

    #[test]
    fn test_invalid_input_not_retried() {
        let (policy, slept) = recording_policy(3);
        let (op, calls) = scripted(vec![DriveError::InvalidInput("empty name".into())]);

        assert_eq!(policy.execute("create", op), None);
        assert_eq!(*calls.lock().unwrap(), 1);
        assert!(slept.lock().unwrap().is_empty());
    }

    #[test]
    fn test_rate_limit_exhaustion_degrades_health() {
        let (policy, _) = recording_policy(2);
        let (op, _) = scripted(vec![DriveError::RateLimited, DriveError::RateLimited]);

        assert_eq!(policy.execute("search", op), None);
        assert_eq!(policy.health(), Health::Degraded);
        assert_eq!(policy.health().as_str(), "degraded");

        // A later success restores health
        let (op, _) = scripted(vec![]);
        assert_eq!(policy.execute("search", op), Some("done"));
        assert_eq!(policy.health(), Health::Healthy);
    }

    #[test]
    fn test_history_is_bounded() {
        let (policy, _) = recording_policy(1);
        for i in 0..(MAX_ERROR_HISTORY + 5) {
            let label = format!("op-{}", i);
            policy.execute::<(), _>(&label, || Err(DriveError::from_status(404, "")));
        }

        let failures = policy.recent_failures();
        assert_eq!(failures.len(), MAX_ERROR_HISTORY);
        assert_eq!(failures[0].operation, "op-5");
    }

    #[test]
    fn test_reject_records_without_touching_health() {
        let (policy, slept) = recording_policy(3);
        policy.reject("upload_file", DriveError::InvalidInput("unreadable".into()));

        let failures = policy.recent_failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].operation, "upload_file");
        assert_eq!(policy.health(), Health::Healthy);
        assert!(slept.lock().unwrap().is_empty());
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy::new(&RetryConfig::default());
        assert_eq!(policy.backoff(0), Duration::from_secs(1));
        assert_eq!(policy.backoff(1), Duration::from_secs(2));
        assert_eq!(policy.backoff(2), Duration::from_secs(4));
    }
}
