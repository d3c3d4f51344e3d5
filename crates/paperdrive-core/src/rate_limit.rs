//! Per-source request pacing with 429 back-off.
//!
//! Each source gets a governor limiter at its polite base period. A 429
//! doubles the period (up to 16x) and the base is restored after a minute
//! without another 429. Sources without a limiter are not paced.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};

use crate::sources::{ARXIV, SEMANTIC_SCHOLAR, SourceError};

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

const DECAY_AFTER: Duration = Duration::from_secs(60);
const MAX_SLOWDOWN: u32 = 16;
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Delay used when `Retry-After` names a date that cannot be read.
const UNKNOWN_RETRY_AFTER: Duration = Duration::from_secs(5);

fn governor(period: Duration) -> Arc<DirectLimiter> {
    let quota = Quota::with_period(period)
        .unwrap_or_else(|| Quota::per_second(std::num::NonZeroU32::MIN));
    Arc::new(DirectLimiter::direct(quota))
}

#[derive(Debug, Default)]
struct Slowdown {
    factor: u32,
    last_limited: Option<Instant>,
}

/// Governor for one source whose period stretches after 429s.
pub struct SourceLimiter {
    base: Duration,
    governor: ArcSwap<DirectLimiter>,
    slowdown: Mutex<Slowdown>,
}

impl SourceLimiter {
    pub fn new(base: Duration) -> Self {
        Self {
            base,
            governor: ArcSwap::from(governor(base)),
            slowdown: Mutex::new(Slowdown {
                factor: 1,
                last_limited: None,
            }),
        }
    }

    /// Current period between requests.
    pub fn period(&self) -> Duration {
        self.base * self.factor()
    }

    fn factor(&self) -> u32 {
        self.slowdown.lock().map(|s| s.factor.max(1)).unwrap_or(1)
    }

    /// Wait for the next request slot.
    pub async fn acquire(&self) {
        self.restore_if_quiet();
        let governor = self.governor.load_full();
        governor.until_ready().await;
    }

    /// Slow down after a 429.
    pub fn on_rate_limited(&self) {
        let Ok(mut slowdown) = self.slowdown.lock() else {
            return;
        };
        slowdown.last_limited = Some(Instant::now());
        slowdown.factor = (slowdown.factor.max(1) * 2).min(MAX_SLOWDOWN);
        self.governor.store(governor(self.base * slowdown.factor));
    }

    fn restore_if_quiet(&self) {
        let Ok(mut slowdown) = self.slowdown.lock() else {
            return;
        };
        let quiet = slowdown
            .last_limited
            .is_some_and(|t| t.elapsed() >= DECAY_AFTER);
        if quiet && slowdown.factor > 1 {
            *slowdown = Slowdown {
                factor: 1,
                last_limited: None,
            };
            self.governor.store(governor(self.base));
        }
    }
}

/// Limiters for the known bibliographic sources.
pub struct RateLimiters {
    limiters: HashMap<&'static str, SourceLimiter>,
}

impl Default for RateLimiters {
    fn default() -> Self {
        Self::new(false)
    }
}

impl RateLimiters {
    /// arXiv asks for one request every three seconds. Semantic Scholar
    /// allows a shared keyless pool, but a key is limited to 1/s.
    pub fn new(has_s2_api_key: bool) -> Self {
        let s2_period = if has_s2_api_key {
            Duration::from_secs(1)
        } else {
            Duration::from_millis(100)
        };
        let limiters = HashMap::from([
            (ARXIV, SourceLimiter::new(Duration::from_secs(3))),
            (SEMANTIC_SCHOLAR, SourceLimiter::new(s2_period)),
        ]);
        Self { limiters }
    }

    pub fn get(&self, source: &str) -> Option<&SourceLimiter> {
        self.limiters.get(source)
    }
}

/// `Err(RateLimited)` for a 429 response, carrying its `Retry-After`.
pub fn check_rate_limit_response(resp: &reqwest::Response) -> Result<(), SourceError> {
    if resp.status() != reqwest::StatusCode::TOO_MANY_REQUESTS {
        return Ok(());
    }
    let retry_after = resp
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| parse_retry_after(v, chrono::Utc::now()));
    Err(SourceError::RateLimited { retry_after })
}

/// Parse `Retry-After` as delta seconds or an HTTP date relative to `now`.
pub fn parse_retry_after(value: &str, now: chrono::DateTime<chrono::Utc>) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    match chrono::DateTime::parse_from_rfc2822(value) {
        Ok(at) => Some(
            (at.with_timezone(&chrono::Utc) - now)
                .to_std()
                .unwrap_or(Duration::ZERO),
        ),
        Err(_) if value.contains("GMT") => Some(UNKNOWN_RETRY_AFTER),
        Err(_) => None,
    }
}

fn backoff(attempt: u32, retry_after: Option<Duration>) -> Duration {
    retry_after
        .unwrap_or_else(|| {
            Duration::from_secs(1 << attempt.min(4)) + Duration::from_millis(fastrand::u64(0..500))
        })
        .min(MAX_BACKOFF)
}

/// Run `request` paced by the source's limiter, retrying 429s up to
/// `max_retries` times. Any other outcome is returned as is.
pub async fn with_retry<T, F, Fut>(
    source: &str,
    rate_limiters: &RateLimiters,
    max_retries: u32,
    request: F,
) -> Result<T, SourceError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, SourceError>>,
{
    let limiter = rate_limiters.get(source);
    let mut attempt = 0;
    loop {
        if let Some(limiter) = limiter {
            limiter.acquire().await;
        }
        match request().await {
            Err(SourceError::RateLimited { retry_after }) if attempt < max_retries => {
                if let Some(limiter) = limiter {
                    limiter.on_rate_limited();
                }
                let delay = backoff(attempt, retry_after);
                attempt += 1;
                log::info!(
                    "{source}: rate limited, retry {attempt}/{max_retries} in {:.1}s",
                    delay.as_secs_f64()
                );
                tokio::time::sleep(delay).await;
            }
            other => return other,
        }
    }
}
