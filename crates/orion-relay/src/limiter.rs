//! Per-caller sliding-window rate limiting.
//!
//! Callers with a bearer token are counted per token, everyone else per
//! client address. Each caller has a one-minute and a one-hour window.

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use axum::http::{header, HeaderMap};

use crate::config::LimitsConfig;

const MINUTE: Duration = Duration::from_secs(60);
const HOUR: Duration = Duration::from_secs(60 * 60);
/// Sweep idle callers once the table grows past this size.
const SWEEP_THRESHOLD: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Authenticated,
    Anonymous,
}

/// Identity used for rate limiting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub key: String,
    pub tier: Tier,
}

impl Caller {
    /// Derive the caller from request headers. Tokens are fingerprinted so
    /// raw credentials never sit in the limiter table.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let bearer = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty());

        if let Some(token) = bearer {
            let mut hasher = DefaultHasher::new();
            token.hash(&mut hasher);
            return Self {
                key: format!("token:{:016x}", hasher.finish()),
                tier: Tier::Authenticated,
            };
        }

        let address = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .or_else(|| headers.get("x-real-ip").and_then(|v| v.to_str().ok()))
            .map(str::trim)
            .filter(|addr| !addr.is_empty());

        Self {
            key: match address {
                Some(addr) => format!("ip:{addr}"),
                None => "anonymous".to_string(),
            },
            tier: Tier::Anonymous,
        }
    }
}

/// Rejection with the time until the oldest counted request leaves its window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limited {
    pub retry_after: Duration,
}

impl Limited {
    /// Whole seconds, rounded up, at least one.
    pub fn retry_after_secs(&self) -> u64 {
        let secs = self.retry_after.as_secs() + u64::from(self.retry_after.subsec_nanos() > 0);
        secs.max(1)
    }
}

#[derive(Debug)]
pub struct RateLimiter {
    limits: LimitsConfig,
    hits: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new(limits: LimitsConfig) -> Self {
        Self {
            limits,
            hits: Mutex::new(HashMap::new()),
        }
    }

    /// Count one request for `caller`, or reject it.
    pub fn check(&self, caller: &Caller) -> Result<(), Limited> {
        self.check_at(caller, Instant::now())
    }

    pub fn check_at(&self, caller: &Caller, now: Instant) -> Result<(), Limited> {
        let (per_minute, per_hour) = match caller.tier {
            Tier::Authenticated => (self.limits.per_minute, self.limits.per_hour),
            Tier::Anonymous => (
                self.limits.anonymous_per_minute,
                self.limits.anonymous_per_hour,
            ),
        };

        let mut table = self.hits.lock().unwrap_or_else(PoisonError::into_inner);
        if table.len() > SWEEP_THRESHOLD {
            table.retain(|_, hits| {
                hits.back()
                    .is_some_and(|last| now.duration_since(*last) < HOUR)
            });
        }

        let hits = table.entry(caller.key.clone()).or_default();
        while hits
            .front()
            .is_some_and(|first| now.duration_since(*first) >= HOUR)
        {
            hits.pop_front();
        }

        let oldest_in_minute = hits
            .iter()
            .find(|t| now.duration_since(**t) < MINUTE)
            .copied();
        let in_minute = hits
            .iter()
            .filter(|t| now.duration_since(**t) < MINUTE)
            .count();

        if in_minute >= per_minute {
            let elapsed = oldest_in_minute.map_or(Duration::ZERO, |t| now.duration_since(t));
            return Err(Limited {
                retry_after: MINUTE.saturating_sub(elapsed),
            });
        }

        if hits.len() >= per_hour {
            let elapsed = hits.front().map_or(Duration::ZERO, |t| now.duration_since(*t));
            return Err(Limited {
                retry_after: HOUR.saturating_sub(elapsed),
            });
        }

        hits.push_back(now);
        Ok(())
    }
}
