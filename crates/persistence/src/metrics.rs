//! Store query metrics.

use metrics::{counter, gauge, histogram};
use sqlx::PgPool;
use std::time::Instant;

/// Query duration, labelled by query and outcome.
pub fn record_query(query: &'static str, outcome: &'static str, duration_secs: f64) {
    histogram!(
        "invitation_store_query_duration_seconds",
        "query" => query,
        "outcome" => outcome
    )
    .record(duration_secs);
    if outcome == "error" {
        counter!("invitation_store_query_errors_total", "query" => query).increment(1);
    }
}

/// Pool gauges, refreshed by the readiness probe.
pub fn record_pool_state(pool: &PgPool) {
    let size = pool.size() as usize;
    let idle = pool.num_idle();

    gauge!("invitation_store_connections", "state" => "active")
        .set(size.saturating_sub(idle) as f64);
    gauge!("invitation_store_connections", "state" => "idle").set(idle as f64);
}

/// Times one store call; `observe` records it with the call's outcome.
pub struct QueryTimer {
    query: &'static str,
    start: Instant,
}

impl QueryTimer {
    pub fn new(query: &'static str) -> Self {
        Self {
            query,
            start: Instant::now(),
        }
    }

    pub fn observe<T, E>(self, result: &Result<T, E>) {
        let outcome = if result.is_ok() { "ok" } else { "error" };
        record_query(self.query, outcome, self.start.elapsed().as_secs_f64());
    }
}
