//! Rate Limiting Module
//!
//! Fixed-window counters keyed by operation and client key. A window that has
//! elapsed is reset on the next hit for that key. Proxy headers are only
//! believed when the TCP peer is a configured trusted proxy.

use axum::{
    extract::{ConnectInfo, Request, State},
    http::Method,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::{
    collections::HashMap,
    net::{IpAddr, SocketAddr},
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::Mutex;

use crate::core::config::RateLimitConfig;
use crate::core::shared::error::CrmError;
use crate::core::shared::state::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Api,
    AuthAttempt,
    Send,
    /// Automation webhook delivering customer messages.
    Ingest,
}

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

/// Per-key fixed-window limiter.
pub struct FixedWindowLimiter {
    window: Duration,
    limits: HashMap<Operation, u32>,
    counters: Mutex<HashMap<(Operation, String), Window>>,
    trusted_proxies: Vec<IpAddr>,
}

impl FixedWindowLimiter {
    pub fn new(window: Duration, limits: HashMap<Operation, u32>) -> Self {
        Self {
            window,
            limits,
            counters: Mutex::new(HashMap::new()),
            trusted_proxies: Vec::new(),
        }
    }

    pub fn with_trusted_proxies(mut self, proxies: Vec<IpAddr>) -> Self {
        self.trusted_proxies = proxies;
        self
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        let limits = HashMap::from([
            (Operation::Api, config.api_requests),
            (Operation::AuthAttempt, config.auth_attempts),
            (Operation::Send, config.sends),
            (Operation::Ingest, config.ingest),
        ]);
        let proxies = config
            .trusted_proxies
            .iter()
            .filter_map(|raw| match raw.trim().parse::<IpAddr>() {
                Ok(ip) => Some(ip),
                Err(_) => {
                    log::warn!("Ignoring invalid trusted proxy address: {}", raw);
                    None
                }
            })
            .collect();
        Self::new(Duration::from_secs(config.window_secs.max(1)), limits)
            .with_trusted_proxies(proxies)
    }

    /// Counts one hit. Fails with `RateLimited` once the window's quota is used.
    pub async fn check(&self, operation: Operation, key: &str) -> Result<(), CrmError> {
        self.check_at(operation, key, Instant::now()).await
    }

    async fn check_at(
        &self,
        operation: Operation,
        key: &str,
        now: Instant,
    ) -> Result<(), CrmError> {
        let Some(&limit) = self.limits.get(&operation) else {
            return Ok(());
        };

        let mut counters = self.counters.lock().await;
        let entry = counters
            .entry((operation, key.to_string()))
            .or_insert(Window {
                started: now,
                count: 0,
            });
        if now.duration_since(entry.started) >= self.window {
            *entry = Window {
                started: now,
                count: 0,
            };
        }

        if entry.count >= limit {
            let elapsed = now.duration_since(entry.started);
            let retry_after_secs = self.window.saturating_sub(elapsed).as_secs().max(1);
            return Err(CrmError::RateLimited { retry_after_secs });
        }
        entry.count += 1;
        Ok(())
    }

    pub fn trusted_proxies(&self) -> &[IpAddr] {
        &self.trusted_proxies
    }

    pub async fn tracked_keys(&self) -> usize {
        self.counters.lock().await.len()
    }
}

impl std::fmt::Debug for FixedWindowLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FixedWindowLimiter")
            .field("window", &self.window)
            .field("trusted_proxies", &self.trusted_proxies)
            .finish()
    }
}

/// Extract client IP from request. Forwarding headers count only when the
/// peer is one of `trusted_proxies`.
fn get_client_ip(req: &Request, trusted_proxies: &[IpAddr]) -> String {
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip());

    if peer.is_some_and(|ip| trusted_proxies.contains(&ip)) {
        if let Some(forwarded) = req.headers().get("x-forwarded-for") {
            if let Ok(value) = forwarded.to_str() {
                if let Some(ip) = value.split(',').next().map(str::trim) {
                    if !ip.is_empty() {
                        return ip.to_string();
                    }
                }
            }
        }

        if let Some(real_ip) = req.headers().get("x-real-ip") {
            if let Ok(value) = real_ip.to_str() {
                return value.trim().to_string();
            }
        }
    }

    peer.map(|ip| ip.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn classify(method: &Method, path: &str) -> Operation {
    if path.starts_with("/api/invites") {
        Operation::AuthAttempt
    } else if *method == Method::POST && path.ends_with("/inbound") {
        Operation::Ingest
    } else if *method == Method::POST
        && (path.ends_with("/messages") || path.ends_with("/nps") || path.ends_with("/followups"))
    {
        Operation::Send
    } else {
        Operation::Api
    }
}

pub async fn rate_limit_middleware(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    if !state.config.rate_limit.enabled {
        return next.run(req).await;
    }

    let client_ip = get_client_ip(&req, state.rate_limits.trusted_proxies());
    let operation = classify(req.method(), req.uri().path());
    // One automation host feeds every company, so ingest is counted per company.
    let key = match operation {
        Operation::Ingest => format!("{} {}", client_ip, req.uri().path()),
        _ => client_ip.clone(),
    };

    match state.rate_limits.check(operation, &key).await {
        Ok(()) => next.run(req).await,
        Err(e) => {
            log::warn!("Rate limit hit for {} on {:?}", client_ip, operation);
            e.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(limit: u32) -> FixedWindowLimiter {
        FixedWindowLimiter::new(
            Duration::from_secs(60),
            HashMap::from([(Operation::Send, limit)]),
        )
    }

    #[tokio::test]
    async fn test_blocks_after_quota() {
        let limiter = limiter(2);
        let now = Instant::now();
        assert!(limiter.check_at(Operation::Send, "a", now).await.is_ok());
        assert!(limiter.check_at(Operation::Send, "a", now).await.is_ok());

        let err = limiter
            .check_at(Operation::Send, "a", now + Duration::from_secs(10))
            .await
            .unwrap_err();
        assert!(matches!(err, CrmError::RateLimited { retry_after_secs: 50 }));

        assert!(limiter.check_at(Operation::Send, "b", now).await.is_ok());
    }

    #[tokio::test]
    async fn test_window_resets() {
        let limiter = limiter(1);
        let now = Instant::now();
        assert!(limiter.check_at(Operation::Send, "a", now).await.is_ok());
        assert!(limiter.check_at(Operation::Send, "a", now).await.is_err());
        assert!(limiter
            .check_at(Operation::Send, "a", now + Duration::from_secs(60))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_unlimited_operation_passes() {
        let limiter = limiter(0);
        assert!(limiter.check(Operation::Api, "a").await.is_ok());
        assert_eq!(limiter.tracked_keys().await, 0);
    }

    #[test]
    fn test_classify_paths() {
        assert_eq!(
            classify(&Method::POST, "/api/invites/abc/accept"),
            Operation::AuthAttempt
        );
        assert_eq!(
            classify(&Method::POST, "/api/companies/1/conversations/55/messages"),
            Operation::Send
        );
        assert_eq!(
            classify(&Method::GET, "/api/companies/1/conversations/55/messages"),
            Operation::Api
        );
        assert_eq!(
            classify(&Method::POST, "/api/companies/1/inbound"),
            Operation::Ingest
        );
    }

    fn from_peer(peer: &str, forwarded: Option<&str>) -> Request {
        let mut builder = axum::http::Request::builder().uri("/api/health");
        if let Some(forwarded) = forwarded {
            builder = builder.header("x-forwarded-for", forwarded);
        }
        let mut req = builder.body(axum::body::Body::empty()).unwrap();
        req.extensions_mut()
            .insert(ConnectInfo(peer.parse::<SocketAddr>().unwrap()));
        req
    }

    #[test]
    fn test_forwarded_header_needs_trusted_peer() {
        let proxy: IpAddr = "10.0.0.2".parse().unwrap();

        let spoofed = from_peer("203.0.113.9:5000", Some("198.51.100.1"));
        assert_eq!(get_client_ip(&spoofed, &[proxy]), "203.0.113.9");

        let proxied = from_peer("10.0.0.2:5000", Some("198.51.100.1, 10.0.0.2"));
        assert_eq!(get_client_ip(&proxied, &[proxy]), "198.51.100.1");

        let direct = from_peer("10.0.0.2:5000", None);
        assert_eq!(get_client_ip(&direct, &[proxy]), "10.0.0.2");
        assert_eq!(get_client_ip(&proxied, &[]), "10.0.0.2");
    }

    #[test]
    fn test_missing_peer_is_unknown() {
        let req = axum::http::Request::builder()
            .header("x-forwarded-for", "198.51.100.1")
            .body(axum::body::Body::empty())
            .unwrap();
        assert_eq!(get_client_ip(&req, &[]), "unknown");
    }

    #[tokio::test]
    async fn test_counters_stay_until_reused() {
        let limiter = limiter(1);
        let now = Instant::now();
        assert!(limiter.check_at(Operation::Send, "a", now).await.is_ok());
        assert!(limiter
            .check_at(Operation::Send, "b", now + Duration::from_secs(120))
            .await
            .is_ok());
        assert_eq!(limiter.tracked_keys().await, 2);
    }
}
