//! Per-room upload throttling.
//!
//! Each room gets a budget of `limit` uploads that may all be spent at once
//! and trickles back at `limit / window`. Budgets live in memory only; a
//! restart hands every room a full budget again.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::warn;

use livepad_shared::types::RoomId;

#[derive(Debug, Clone, Copy)]
struct Budget {
    remaining: f64,
    updated: Instant,
}

#[derive(Clone)]
pub struct RateLimiter {
    budgets: Arc<Mutex<HashMap<RoomId, Budget>>>,
    limit: f64,
    per_second: f64,
}

impl RateLimiter {
    /// `limit` uploads per `window`. Windows shorter than a second are
    /// treated as one second.
    pub fn per_window(limit: u32, window: Duration) -> Self {
        let limit = f64::from(limit.max(1));
        Self {
            budgets: Arc::new(Mutex::new(HashMap::new())),
            limit,
            per_second: limit / window.as_secs_f64().max(1.0),
        }
    }

    /// Spend one upload from `room`'s budget. `false` means the room is over
    /// its limit and the upload must be refused.
    pub async fn check(&self, room: &RoomId) -> bool {
        let allowed = self.check_at(room, Instant::now()).await;
        if !allowed {
            warn!(room = %room.short(), "Upload rate limit exceeded");
        }
        allowed
    }

    async fn check_at(&self, room: &RoomId, at: Instant) -> bool {
        let mut budgets = self.budgets.lock().await;
        let budget = budgets.entry(room.clone()).or_insert(Budget {
            remaining: self.limit,
            updated: at,
        });

        let regained = at.saturating_duration_since(budget.updated).as_secs_f64() * self.per_second;
        budget.remaining = (budget.remaining + regained).min(self.limit);
        budget.updated = at;

        if budget.remaining < 1.0 {
            return false;
        }
        budget.remaining -= 1.0;
        true
    }

    /// Forget rooms that have not uploaded for `max_idle`. A forgotten room
    /// would have refilled to a full budget by then anyway.
    pub async fn purge_stale(&self, max_idle: Duration) {
        let now = Instant::now();
        self.budgets
            .lock()
            .await
            .retain(|_, budget| now.saturating_duration_since(budget.updated) < max_idle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn room(n: u8) -> RoomId {
        RoomId::parse(&format!("{n:02x}").repeat(16)).unwrap()
    }

    #[tokio::test]
    async fn whole_budget_can_be_spent_at_once() {
        let limiter = RateLimiter::per_window(20, Duration::from_secs(600));
        let start = Instant::now();

        for _ in 0..20 {
            assert!(limiter.check_at(&room(1), start).await);
        }
        assert!(!limiter.check_at(&room(1), start).await);
        // other rooms are unaffected
        assert!(limiter.check_at(&room(2), start).await);
    }

    #[tokio::test]
    async fn budget_trickles_back() {
        let limiter = RateLimiter::per_window(2, Duration::from_secs(600));
        let start = Instant::now();

        assert!(limiter.check_at(&room(1), start).await);
        assert!(limiter.check_at(&room(1), start).await);
        assert!(!limiter.check_at(&room(1), start + Duration::from_secs(60)).await);

        // one upload every 300 s
        assert!(limiter.check_at(&room(1), start + Duration::from_secs(301)).await);
        assert!(!limiter.check_at(&room(1), start + Duration::from_secs(302)).await);
    }

    #[tokio::test]
    async fn purge_forgets_idle_rooms() {
        let limiter = RateLimiter::per_window(1, Duration::from_secs(600));
        assert!(limiter.check(&room(1)).await);
        assert!(!limiter.check(&room(1)).await);

        limiter.purge_stale(Duration::ZERO).await;
        assert!(limiter.budgets.lock().await.is_empty());
        assert!(limiter.check(&room(1)).await);
    }
}
