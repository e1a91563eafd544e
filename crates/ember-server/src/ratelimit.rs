//! Per-IP request quotas using governor's keyed token buckets.
//!
//! Each route class has its own limiter so a burst of downloads cannot eat
//! into a client's upload allowance. The client key is the direct connection
//! address; forwarded headers are not trusted.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use governor::clock::{Clock, DefaultClock};
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::config::RateLimitConfig;
use crate::error::ServerError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RouteClass {
    Upload,
    Download,
    Page,
}

struct Limiters {
    upload: DefaultKeyedRateLimiter<IpAddr>,
    download: DefaultKeyedRateLimiter<IpAddr>,
    page: DefaultKeyedRateLimiter<IpAddr>,
}

impl Limiters {
    fn get(&self, class: RouteClass) -> &DefaultKeyedRateLimiter<IpAddr> {
        match class {
            RouteClass::Upload => &self.upload,
            RouteClass::Download => &self.download,
            RouteClass::Page => &self.page,
        }
    }
}

/// Shared limiter state. Nothing is allocated when limiting is disabled.
#[derive(Clone)]
pub struct RateLimitState {
    inner: Option<Arc<Limiters>>,
}

fn per_minute(n: u32) -> Quota {
    Quota::per_minute(NonZeroU32::new(n).unwrap_or(NonZeroU32::MIN))
}

impl RateLimitState {
    pub fn new(config: &RateLimitConfig) -> Self {
        if !config.enabled {
            return Self::disabled();
        }
        Self {
            inner: Some(Arc::new(Limiters {
                upload: RateLimiter::keyed(per_minute(config.upload_per_minute)),
                download: RateLimiter::keyed(per_minute(config.download_per_minute)),
                page: RateLimiter::keyed(per_minute(config.page_per_minute)),
            })),
        }
    }

    pub fn disabled() -> Self {
        Self { inner: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    /// Count one request from `ip` against the quota for `class`.
    pub fn check(&self, class: RouteClass, ip: IpAddr) -> Result<(), ServerError> {
        let Some(inner) = &self.inner else {
            return Ok(());
        };
        inner.get(class).check_key(&ip).map_err(|not_until| {
            let wait = not_until.wait_time_from(DefaultClock::default().now());
            debug!(%ip, ?class, wait_secs = wait.as_secs(), "rate limited");
            ServerError::RateLimited {
                retry_after_secs: wait.as_secs() + 1,
            }
        })
    }

    /// Drop buckets that have refilled completely.
    pub fn cleanup(&self) {
        if let Some(inner) = &self.inner {
            for limiter in [&inner.upload, &inner.download, &inner.page] {
                limiter.retain_recent();
                limiter.shrink_to_fit();
            }
        }
    }
}

/// Periodically forget idle clients so the key maps stay bounded.
pub fn spawn_cleanup_task(state: RateLimitState, interval: Duration) -> Option<JoinHandle<()>> {
    if !state.is_enabled() {
        return None;
    }
    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            state.cleanup();
        }
    }))
}

fn client_ip(req: &Request<Body>) -> IpAddr {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
}

pub async fn rate_limit_middleware(
    State((state, class)): State<(RateLimitState, RouteClass)>,
    req: Request<Body>,
    next: Next,
) -> Response {
    match state.check(class, client_ip(&req)) {
        Ok(()) => next.run(req).await,
        Err(e) => e.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(upload: u32) -> RateLimitConfig {
        RateLimitConfig {
            upload_per_minute: upload,
            ..Default::default()
        }
    }

    #[test]
    fn quota_is_enforced_per_ip() {
        let state = RateLimitState::new(&config(2));
        let a: IpAddr = "10.0.0.1".parse().unwrap();
        let b: IpAddr = "10.0.0.2".parse().unwrap();

        state.check(RouteClass::Upload, a).unwrap();
        state.check(RouteClass::Upload, a).unwrap();
        let err = state.check(RouteClass::Upload, a).unwrap_err();
        assert!(matches!(err, ServerError::RateLimited { retry_after_secs } if retry_after_secs >= 1));
        state.check(RouteClass::Upload, b).unwrap();
    }

    #[test]
    fn route_classes_are_independent() {
        let state = RateLimitState::new(&config(1));
        let ip: IpAddr = "10.0.0.3".parse().unwrap();
        state.check(RouteClass::Upload, ip).unwrap();
        assert!(state.check(RouteClass::Upload, ip).is_err());
        state.check(RouteClass::Download, ip).unwrap();
        state.check(RouteClass::Page, ip).unwrap();
    }

    #[test]
    fn disabled_state_allows_everything() {
        let state = RateLimitState::new(&RateLimitConfig {
            enabled: false,
            ..Default::default()
        });
        assert!(!state.is_enabled());
        let ip: IpAddr = "10.0.0.4".parse().unwrap();
        for _ in 0..100 {
            state.check(RouteClass::Upload, ip).unwrap();
        }
        state.cleanup();
    }
}
