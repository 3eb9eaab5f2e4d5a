//! Token-bucket limit on job starts, backed by `governor`.

use std::num::NonZeroU32;
use std::time::Duration;

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};

use crate::error::{QueueError, QueueResult};

/// At most `max` job starts per `per` window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub max: u32,
    pub per: Duration,
}

impl RateLimit {
    pub fn per_second(max: u32) -> Self {
        Self {
            max,
            per: Duration::from_secs(1),
        }
    }

    /// Build the limiter. Starts are spaced `per / max` apart with a burst of
    /// one, so no window of length `per` admits more than `max`.
    pub fn build(&self) -> QueueResult<DefaultDirectRateLimiter> {
        if self.max == 0 {
            return Err(QueueError::InvalidRateLimit("max must be greater than zero".to_string()));
        }
        let quota = Quota::with_period(self.per / self.max)
            .ok_or_else(|| QueueError::InvalidRateLimit("window must be greater than zero".to_string()))?
            .allow_burst(NonZeroU32::MIN);
        Ok(RateLimiter::direct(quota))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_instant_burst() {
        let limiter = RateLimit::per_second(10).build().unwrap();
        let admitted = (0..20).filter(|_| limiter.check().is_ok()).count();
        assert_eq!(admitted, 1);
    }

    #[tokio::test]
    async fn test_starts_within_one_second_never_exceed_max() {
        let limiter = RateLimit::per_second(50).build().unwrap();
        let window = std::time::Instant::now();

        let mut admitted = 0;
        loop {
            limiter.until_ready().await;
            if window.elapsed() >= Duration::from_secs(1) {
                break;
            }
            admitted += 1;
        }

        assert!(admitted <= 50, "admitted {} starts inside one second", admitted);
        assert!(admitted >= 40, "admitted only {} starts", admitted);
    }

    #[test]
    fn test_zero_max_rejected() {
        assert!(matches!(
            RateLimit::per_second(0).build(),
            Err(QueueError::InvalidRateLimit(_))
        ));
    }

    #[test]
    fn test_zero_window_rejected() {
        let limit = RateLimit {
            max: 5,
            per: Duration::ZERO,
        };
        assert!(limit.build().is_err());
    }
}
