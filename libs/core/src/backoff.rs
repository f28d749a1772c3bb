use std::time::Duration;

/// Exponential reconnect delay: `base * 2^(attempt-1)`, capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectBackoff {
    pub base: Duration,
    pub max: Duration,
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(2_000),
            max: Duration::from_millis(60_000),
        }
    }
}

impl ReconnectBackoff {
    /// Delay before reconnect number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let pow = attempt.saturating_sub(1).min(16); // prevent overflow
        let base_ms = u64::try_from(self.base.as_millis()).unwrap_or(u64::MAX);
        let max_ms = u64::try_from(self.max.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(base_ms.saturating_mul(1u64 << pow).min(max_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_from_base_until_capped() {
        let backoff = ReconnectBackoff::default();
        let delays: Vec<u64> = (1..=7)
            .map(|attempt| backoff.delay_for(attempt).as_millis() as u64)
            .collect();
        assert_eq!(
            delays,
            vec![2_000, 4_000, 8_000, 16_000, 32_000, 60_000, 60_000]
        );
    }

    #[test]
    fn large_attempts_do_not_overflow() {
        let backoff = ReconnectBackoff {
            base: Duration::from_secs(u64::MAX / 2),
            max: Duration::from_secs(30),
        };
        assert_eq!(backoff.delay_for(u32::MAX), Duration::from_secs(30));
        assert_eq!(
            ReconnectBackoff::default().delay_for(0),
            Duration::from_millis(2_000)
        );
    }
}
