//! Fixed-window rate limiting keyed by `(session, tool)`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::time::Instant;

use keel::{codes, AgentError, SessionId};

/// One rate-limit policy. Policies are attached per tool category.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RateLimitPolicy {
    /// Window length in milliseconds.
    pub window_ms: u64,
    /// Calls admitted per window.
    pub max_requests: u32,
    /// Extra calls tolerated above `max_requests` before blocking.
    pub burst_limit: u32,
    /// How long the key stays blocked after the limit is exceeded.
    pub block_duration_ms: u64,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            window_ms: 60_000,
            max_requests: 60,
            burst_limit: 10,
            block_duration_ms: 30_000,
        }
    }
}

struct KeyState {
    window_start: Instant,
    count: u32,
    blocked_until: Option<Instant>,
}

/// The shared rate-limit table. Guarded by a single mutex: checks are
/// short map operations and never await while holding the lock.
pub(crate) struct RateLimiter {
    policies: HashMap<String, RateLimitPolicy>,
    keys: Mutex<HashMap<(SessionId, String), KeyState>>,
}

impl RateLimiter {
    pub(crate) fn new(policies: HashMap<String, RateLimitPolicy>) -> Self {
        Self {
            policies,
            keys: Mutex::new(HashMap::new()),
        }
    }

    fn policy_for(&self, category: &str) -> RateLimitPolicy {
        self.policies
            .get(category)
            .or_else(|| self.policies.get("default"))
            .copied()
            .unwrap_or_default()
    }

    /// Consume one token for `(session, tool)` under the category's
    /// policy. `Err` carries `RATE_LIMIT_BLOCKED` while a block is
    /// active and `RATE_LIMIT_EXCEEDED` on the call that trips the
    /// limit.
    pub(crate) fn check(
        &self,
        session: &SessionId,
        tool: &str,
        category: &str,
    ) -> Result<(), AgentError> {
        let policy = self.policy_for(category);
        let now = Instant::now();
        let mut keys = self.keys.lock().expect("rate limit lock");
        let state = keys
            .entry((session.clone(), tool.to_string()))
            .or_insert_with(|| KeyState {
                window_start: now,
                count: 0,
                blocked_until: None,
            });

        if let Some(until) = state.blocked_until {
            if now < until {
                let remaining = (until - now).as_millis() as u64;
                return Err(AgentError::business(
                    codes::RATE_LIMIT_BLOCKED,
                    format!("{tool} is blocked for this session"),
                )
                .with_context(serde_json::json!({ "remaining_block_ms": remaining })));
            }
            // Block expired: start a fresh window.
            state.blocked_until = None;
            state.window_start = now;
            state.count = 0;
        }

        if now.duration_since(state.window_start).as_millis() as u64 >= policy.window_ms {
            state.window_start = now;
            state.count = 0;
        }

        state.count += 1;
        if state.count > policy.max_requests + policy.burst_limit {
            state.blocked_until =
                Some(now + std::time::Duration::from_millis(policy.block_duration_ms));
            return Err(AgentError::business(
                codes::RATE_LIMIT_EXCEEDED,
                format!(
                    "{tool} exceeded {} calls per {}ms",
                    policy.max_requests, policy.window_ms
                ),
            )
            .with_context(serde_json::json!({
                "window_ms": policy.window_ms,
                "max_requests": policy.max_requests,
                "block_duration_ms": policy.block_duration_ms,
            })));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn limiter(policy: RateLimitPolicy) -> RateLimiter {
        RateLimiter::new(HashMap::from([("default".to_string(), policy)]))
    }

    #[tokio::test(start_paused = true)]
    async fn third_call_trips_then_block_expires() {
        let limiter = limiter(RateLimitPolicy {
            window_ms: 1000,
            max_requests: 2,
            burst_limit: 0,
            block_duration_ms: 2000,
        });
        let session = SessionId::new("s-1");

        assert!(limiter.check(&session, "bash", "default").is_ok());
        tokio::time::advance(Duration::from_millis(250)).await;
        assert!(limiter.check(&session, "bash", "default").is_ok());
        tokio::time::advance(Duration::from_millis(250)).await;
        let err = limiter.check(&session, "bash", "default").unwrap_err();
        assert_eq!(err.code, codes::RATE_LIMIT_EXCEEDED);

        // Still blocked shortly after.
        tokio::time::advance(Duration::from_millis(500)).await;
        let err = limiter.check(&session, "bash", "default").unwrap_err();
        assert_eq!(err.code, codes::RATE_LIMIT_BLOCKED);
        assert!(err.context["remaining_block_ms"].as_u64().unwrap() <= 2000);

        // At t=3000 the block has lapsed.
        tokio::time::advance(Duration::from_millis(2500)).await;
        assert!(limiter.check(&session, "bash", "default").is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn window_resets_after_window_ms() {
        let limiter = limiter(RateLimitPolicy {
            window_ms: 1000,
            max_requests: 1,
            burst_limit: 0,
            block_duration_ms: 5000,
        });
        let session = SessionId::new("s-1");
        assert!(limiter.check(&session, "grep", "default").is_ok());
        tokio::time::advance(Duration::from_millis(1100)).await;
        assert!(limiter.check(&session, "grep", "default").is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn keys_are_independent() {
        let limiter = limiter(RateLimitPolicy {
            window_ms: 1000,
            max_requests: 1,
            burst_limit: 0,
            block_duration_ms: 5000,
        });
        let a = SessionId::new("s-a");
        let b = SessionId::new("s-b");
        assert!(limiter.check(&a, "bash", "default").is_ok());
        assert!(limiter.check(&b, "bash", "default").is_ok());
        assert!(limiter.check(&a, "grep", "default").is_ok());
        assert!(limiter.check(&a, "bash", "default").is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn burst_extends_the_hard_limit() {
        let limiter = limiter(RateLimitPolicy {
            window_ms: 1000,
            max_requests: 1,
            burst_limit: 2,
            block_duration_ms: 5000,
        });
        let session = SessionId::new("s-1");
        assert!(limiter.check(&session, "bash", "default").is_ok());
        assert!(limiter.check(&session, "bash", "default").is_ok());
        assert!(limiter.check(&session, "bash", "default").is_ok());
        assert!(limiter.check(&session, "bash", "default").is_err());
    }
}
