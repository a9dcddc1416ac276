/// Process-wide flood guard in front of the whole router
use crate::context::AppContext;
use crate::error::TapglueError;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::{Duration, Utc};
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter as GovernorLimiter,
};
use std::{num::NonZeroU32, sync::Arc};
use tracing::warn;

#[derive(Clone)]
pub struct FloodGuard {
    limiter: Option<Arc<GovernorLimiter<NotKeyed, InMemoryState, DefaultClock>>>,
}

impl FloodGuard {
    /// `requests_per_second` of zero disables the guard
    pub fn new(requests_per_second: u32, burst: u32) -> Self {
        let limiter = NonZeroU32::new(requests_per_second).map(|rps| {
            let burst = NonZeroU32::new(burst).unwrap_or(rps);
            Arc::new(GovernorLimiter::direct(Quota::per_second(rps).allow_burst(burst)))
        });
        Self { limiter }
    }

    pub fn disabled() -> Self {
        Self { limiter: None }
    }

    pub fn check(&self) -> Result<(), TapglueError> {
        match &self.limiter {
            Some(limiter) if limiter.check().is_err() => Err(TapglueError::RateLimited {
                reset_at: Utc::now() + Duration::seconds(1),
            }),
            _ => Ok(()),
        }
    }
}

pub async fn flood_guard(State(ctx): State<AppContext>, request: Request, next: Next) -> Response {
    if let Err(e) = ctx.flood_guard.check() {
        warn!(path = %request.uri().path(), "flood guard tripped");
        return e.into_response();
    }
    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_burst_then_reject() {
        let guard = FloodGuard::new(1, 3);
        for _ in 0..3 {
            assert!(guard.check().is_ok());
        }
        assert!(matches!(guard.check(), Err(TapglueError::RateLimited { .. })));
    }

    #[test]
    fn test_disabled_guard_admits_everything() {
        let guard = FloodGuard::new(0, 0);
        for _ in 0..100 {
            assert!(guard.check().is_ok());
        }
        assert!(FloodGuard::disabled().check().is_ok());
    }
}
