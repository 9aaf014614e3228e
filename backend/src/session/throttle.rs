//! Per-email throttling of password sign-ins.

use std::num::NonZeroU32;

use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};

use crate::identity::ProviderError;

/// Limits password sign-in attempts per email address before the identity
/// provider is called.
pub struct LoginThrottle {
    limiter: DefaultKeyedRateLimiter<String>,
}

impl LoginThrottle {
    /// Allow `attempts_per_minute` attempts per email, bursting up to the
    /// same number. Zero is treated as one.
    pub fn new(attempts_per_minute: u32) -> Self {
        let per_minute = NonZeroU32::new(attempts_per_minute).unwrap_or(NonZeroU32::MIN);
        Self {
            limiter: RateLimiter::keyed(Quota::per_minute(per_minute)),
        }
    }

    /// Consume one attempt for `email`.
    pub fn check(&self, email: &str) -> Result<(), ProviderError> {
        let key = email.trim().to_lowercase();
        self.limiter.check_key(&key).map_err(|_| {
            tracing::warn!(email = %key, "Sign-in attempts throttled");
            ProviderError::RateLimited
        })
    }

    /// Forget keys whose quota has fully replenished.
    pub fn shrink(&self) {
        self.limiter.retain_recent();
        self.limiter.shrink_to_fit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attempts_beyond_quota_are_rate_limited() {
        let throttle = LoginThrottle::new(3);
        for _ in 0..3 {
            assert!(throttle.check("guest@example.com").is_ok());
        }
        assert_eq!(throttle.check("guest@example.com"), Err(ProviderError::RateLimited));
    }

    #[test]
    fn test_quota_is_per_email() {
        let throttle = LoginThrottle::new(1);
        assert!(throttle.check("a@example.com").is_ok());
        assert!(throttle.check("b@example.com").is_ok());
        assert!(throttle.check("a@example.com").is_err());
    }

    #[test]
    fn test_email_key_is_normalized() {
        let throttle = LoginThrottle::new(1);
        assert!(throttle.check("Guest@Example.com").is_ok());
        assert!(throttle.check(" guest@example.com ").is_err());
    }

    #[test]
    fn test_zero_quota_still_allows_one_attempt() {
        let throttle = LoginThrottle::new(0);
        assert!(throttle.check("a@example.com").is_ok());
        assert!(throttle.check("a@example.com").is_err());
    }
}
