use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use dashmap::DashMap;
use std::collections::VecDeque;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::models::ApiResponse;

/// Route groups with separate budgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    /// Catalog and availability reads.
    Public,
    /// Signed-in customer endpoints.
    Account,
    /// Booking submission.
    Booking,
    Admin,
}

#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window: Duration,
}

impl RateLimitConfig {
    pub fn per(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
        }
    }
}

/// One tier's budget and the recent hits of every client against it.
#[derive(Debug)]
struct Bucket {
    config: RateLimitConfig,
    hits: DashMap<IpAddr, VecDeque<Instant>>,
}

impl Bucket {
    fn admit(&self, ip: IpAddr, now: Instant) -> Result<(), u64> {
        let window = self.config.window;
        let mut hits = self.hits.entry(ip).or_default();
        while hits.front().is_some_and(|t| now.duration_since(*t) >= window) {
            hits.pop_front();
        }

        if hits.len() >= self.config.max_requests as usize {
            let retry_after = hits
                .front()
                .map(|oldest| (*oldest + window).saturating_duration_since(now).as_secs())
                .unwrap_or(0);
            return Err(retry_after.max(1));
        }
        hits.push_back(now);
        Ok(())
    }
}

/// In-memory per-IP sliding-window limiter, shared by all route groups.
#[derive(Debug, Clone, Default)]
pub struct RateLimiter {
    buckets: Arc<DashMap<Tier, Bucket>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// The studio's standard budgets.
    pub fn with_default_tiers() -> Self {
        let limiter = Self::new();
        limiter.add_tier(Tier::Public, RateLimitConfig::per(60, Duration::from_secs(60)));
        limiter.add_tier(Tier::Account, RateLimitConfig::per(30, Duration::from_secs(60)));
        limiter.add_tier(Tier::Booking, RateLimitConfig::per(5, Duration::from_secs(300)));
        limiter.add_tier(Tier::Admin, RateLimitConfig::per(120, Duration::from_secs(60)));
        limiter
    }

    pub fn add_tier(&self, tier: Tier, config: RateLimitConfig) {
        self.buckets.insert(
            tier,
            Bucket {
                config,
                hits: DashMap::new(),
            },
        );
    }

    /// `Err(retry_after_secs)` when `ip` has used up its budget. Unconfigured
    /// tiers are not limited.
    pub fn check(&self, tier: Tier, ip: IpAddr) -> Result<(), u64> {
        match self.buckets.get(&tier) {
            Some(bucket) => bucket.admit(ip, Instant::now()),
            None => Ok(()),
        }
    }

    /// Forget clients with no hits inside their tier's window.
    pub fn cleanup(&self) {
        let now = Instant::now();
        for bucket in self.buckets.iter() {
            let window = bucket.config.window;
            bucket
                .hits
                .retain(|_, hits| hits.back().is_some_and(|t| now.duration_since(*t) < window));
        }
    }

    #[cfg(test)]
    fn tracked_clients(&self, tier: Tier) -> usize {
        self.buckets.get(&tier).map_or(0, |b| b.hits.len())
    }
}

/// Client IP: first `X-Forwarded-For` hop behind the reverse proxy, else the
/// socket peer.
pub fn extract_client_ip(req: &Request) -> IpAddr {
    req.headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|ip| ip.trim().parse::<IpAddr>().ok())
        .or_else(|| {
            req.extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip())
        })
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

fn too_many_requests(retry_after: u64) -> Response {
    let body = ApiResponse::<()>::error(format!(
        "Too many requests, please try again in {retry_after} seconds"
    ));
    let mut resp = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
    resp.headers_mut()
        .insert(header::RETRY_AFTER, retry_after.into());
    resp
}

async fn enforce(limiter: &RateLimiter, tier: Tier, req: Request, next: Next) -> Response {
    let ip = extract_client_ip(&req);
    match limiter.check(tier, ip) {
        Ok(()) => next.run(req).await,
        Err(retry_after) => {
            tracing::warn!("Rate limited {} on {:?} tier ({}s)", ip, tier, retry_after);
            too_many_requests(retry_after)
        }
    }
}

pub async fn rate_limit_public(State(limiter): State<RateLimiter>, req: Request, next: Next) -> Response {
    enforce(&limiter, Tier::Public, req, next).await
}

pub async fn rate_limit_account(State(limiter): State<RateLimiter>, req: Request, next: Next) -> Response {
    enforce(&limiter, Tier::Account, req, next).await
}

pub async fn rate_limit_booking(State(limiter): State<RateLimiter>, req: Request, next: Next) -> Response {
    enforce(&limiter, Tier::Booking, req, next).await
}

pub async fn rate_limit_admin(State(limiter): State<RateLimiter>, req: Request, next: Next) -> Response {
    enforce(&limiter, Tier::Admin, req, next).await
}
