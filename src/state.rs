//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor.
//! It holds the database pool, the broadcast service that fans results out
//! to websocket clients, and the API rate limiter. There is no module-level
//! socket state: anything that needs to publish receives this struct.

use std::time::Instant;

use sqlx::PgPool;

use crate::broadcast::BroadcastService;
use crate::config::Config;
use crate::rate_limit::RateLimiter;

/// Shared application state, injected into Axum handlers via State extractor.
/// Clone is required by Axum; every field is cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub broadcast: BroadcastService,
    /// In-memory rate limiter for REST requests.
    pub rate_limiter: RateLimiter,
    pub started_at: Instant,
}

impl AppState {
    #[must_use]
    pub fn new(pool: PgPool, config: &Config) -> Self {
        Self {
            pool,
            broadcast: BroadcastService::new(config.ws_outbound_buffer),
            rate_limiter: RateLimiter::new(config.rate_limit),
            started_at: Instant::now(),
        }
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================
