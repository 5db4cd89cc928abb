use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use axum::extract::{ConnectInfo, Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::warn;

use crate::api::error::ErrorKind;
use crate::api::handler_utils::error_response;
use crate::api::server::AppState;
use crate::config::RateLimitConfig;

const UPSCALE_PATH: &str = "/api/upscale";
const PRUNE_THRESHOLD: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateRule {
    pub max_requests: u32,
    pub window: Duration,
    pub upscale_only: bool,
}

impl fmt::Display for RateRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let unit = match self.window.as_secs() {
            60 => "minute",
            3600 => "hour",
            86_400 => "day",
            _ => return write!(f, "{} per {}s", self.max_requests, self.window.as_secs()),
        };
        write!(f, "{} per {unit}", self.max_requests)
    }
}

#[derive(Debug, Clone, Copy)]
struct FixedWindow {
    started: Instant,
    count: u32,
}

/// Fixed-window request counters keyed by rule and client address.
#[derive(Debug)]
pub struct RateLimiter {
    rules: Vec<RateRule>,
    windows: Mutex<HashMap<(usize, String), FixedWindow>>,
}

impl RateLimiter {
    pub fn new(rules: Vec<RateRule>) -> Self {
        Self {
            rules: rules.into_iter().filter(|r| r.max_requests > 0).collect(),
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(vec![
            RateRule {
                max_requests: config.upscale_per_minute,
                window: Duration::from_secs(60),
                upscale_only: true,
            },
            RateRule {
                max_requests: config.per_hour,
                window: Duration::from_secs(3600),
                upscale_only: false,
            },
            RateRule {
                max_requests: config.per_day,
                window: Duration::from_secs(86_400),
                upscale_only: false,
            },
        ])
    }

    /// Counts the request against every applicable rule, or returns the first
    /// exhausted rule without counting anything.
    pub fn check(&self, client: &str, is_upscale: bool, now: Instant) -> Result<(), RateRule> {
        let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);
        if windows.len() > PRUNE_THRESHOLD {
            let rules = &self.rules;
            windows.retain(|(idx, _), window| now.duration_since(window.started) < rules[*idx].window);
        }

        let applicable = self
            .rules
            .iter()
            .enumerate()
            .filter(|(_, rule)| is_upscale || !rule.upscale_only)
            .collect::<Vec<_>>();

        for (idx, rule) in applicable.iter() {
            let key = (*idx, client.to_string());
            let window = windows.entry(key).or_insert(FixedWindow {
                started: now,
                count: 0,
            });
            if now.duration_since(window.started) >= rule.window {
                *window = FixedWindow {
                    started: now,
                    count: 0,
                };
            }
            if window.count >= rule.max_requests {
                return Err(**rule);
            }
        }

        for (idx, _) in applicable {
            if let Some(window) = windows.get_mut(&(idx, client.to_string())) {
                window.count += 1;
            }
        }
        Ok(())
    }
}

pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let client = client_key(&request);
    let is_upscale = request.uri().path() == UPSCALE_PATH;

    match state.rate_limiter.check(client.as_str(), is_upscale, Instant::now()) {
        Ok(()) => next.run(request).await,
        Err(rule) => {
            warn!(client = %client, limit = %rule, "rate limit exceeded");
            error_response(
                StatusCode::TOO_MANY_REQUESTS,
                ErrorKind::Policy,
                "rate_limited",
                format!("Rate limit exceeded: {rule}"),
            )
            .into_response()
        }
    }
}

fn client_key(request: &Request) -> String {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| String::from("unknown"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(upscale_per_minute: u32, per_hour: u32, per_day: u32) -> RateLimiter {
        RateLimiter::from_config(&RateLimitConfig {
            upscale_per_minute,
            per_hour,
            per_day,
        })
    }

    #[test]
    fn upscale_rule_only_counts_upscale_requests() {
        let limiter = limiter(2, 100, 100);
        let now = Instant::now();

        assert!(limiter.check("10.0.0.1", true, now).is_ok());
        assert!(limiter.check("10.0.0.1", true, now).is_ok());
        let rejected = limiter.check("10.0.0.1", true, now).expect_err("third upscale should be limited");
        assert_eq!(rejected.to_string(), "2 per minute");

        assert!(limiter.check("10.0.0.1", false, now).is_ok());
        assert!(limiter.check("10.0.0.2", true, now).is_ok());
    }

    #[test]
    fn windows_reset_after_they_elapse() {
        let limiter = limiter(1, 100, 100);
        let start = Instant::now();

        assert!(limiter.check("c", true, start).is_ok());
        assert!(limiter.check("c", true, start + Duration::from_secs(30)).is_err());
        assert!(limiter.check("c", true, start + Duration::from_secs(61)).is_ok());
    }

    #[test]
    fn rejected_requests_do_not_consume_other_windows() {
        let limiter = limiter(1, 3, 100);
        let now = Instant::now();

        assert!(limiter.check("c", true, now).is_ok());
        for _ in 0..5 {
            assert!(limiter.check("c", true, now).is_err());
        }
        assert!(limiter.check("c", false, now).is_ok());
        assert!(limiter.check("c", false, now).is_ok());
        let rejected = limiter.check("c", false, now).expect_err("hourly ceiling should apply");
        assert_eq!(rejected.to_string(), "3 per hour");
    }

    #[test]
    fn zero_disables_a_rule() {
        let limiter = limiter(0, 0, 0);
        let now = Instant::now();
        for _ in 0..50 {
            assert!(limiter.check("c", true, now).is_ok());
        }
    }
}
