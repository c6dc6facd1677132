use serde::Deserialize;
use std::time::Duration;

pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Bounded exponential backoff. Retries never stop; only the delay is capped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BackoffPolicy {
    #[serde(rename = "base_ms", with = "millis")]
    pub base: Duration,
    #[serde(rename = "cap_ms", with = "millis")]
    pub cap: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: DEFAULT_BASE_DELAY,
            cap: DEFAULT_MAX_DELAY,
        }
    }
}

impl BackoffPolicy {
    /// Delay before retrying after the `attempt`-th consecutive failure
    /// (1-based): `min(base * 2^(attempt - 1), cap)`.
    pub fn delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return self.base.min(self.cap);
        }
        let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
        self.base
            .checked_mul(factor)
            .map(|delay| delay.min(self.cap))
            .unwrap_or(self.cap)
    }

    pub fn next(&self, current: Duration) -> Duration {
        let next = current + current;
        if next > self.cap {
            self.cap
        } else {
            next
        }
    }
}

pub(crate) mod millis {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_doubles_until_cap() {
        let policy = BackoffPolicy::default();
        let expected = [1, 2, 4, 8, 16, 30, 30, 30];
        for (index, secs) in expected.iter().enumerate() {
            assert_eq!(
                policy.delay(index as u32 + 1),
                Duration::from_secs(*secs),
                "attempt {}",
                index + 1
            );
        }
    }

    #[test]
    fn delay_survives_huge_attempt_counts() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay(64), DEFAULT_MAX_DELAY);
        assert_eq!(policy.delay(u32::MAX), DEFAULT_MAX_DELAY);
    }

    #[test]
    fn next_matches_closed_form() {
        let policy = BackoffPolicy {
            base: Duration::from_millis(250),
            cap: Duration::from_secs(3),
        };
        let mut current = policy.base;
        for attempt in 1..12 {
            assert_eq!(current, policy.delay(attempt));
            current = policy.next(current);
        }
    }
}
