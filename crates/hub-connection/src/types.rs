//! Public configuration types for the hub relay link.

use std::time::Duration;

/// Where and how to open the relay session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// `ws://` or `wss://` endpoint of the relay.
    pub url: String,
    /// Bearer token sent on the upgrade request. Empty means anonymous.
    pub token: String,
}

impl SessionConfig {
    pub fn new(url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: token.into(),
        }
    }
}

/// Backoff schedule for re-establishing a lost session.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Wait before the first attempt.
    pub initial_delay: Duration,
    /// Upper bound for any single wait, before jitter.
    pub max_delay: Duration,
    pub backoff_factor: f64,
    /// Attempts before giving up and settling on `Disconnected`.
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
            max_attempts: 8,
        }
    }
}

/// Share of the base delay added or removed at random.
const JITTER: f64 = 0.25;

impl ReconnectConfig {
    /// Un-jittered wait before attempt `attempt` (1-based).
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(63) as i32;
        let grown = self.initial_delay.as_secs_f64() * self.backoff_factor.powi(exp);
        Duration::from_secs_f64(grown.min(self.max_delay.as_secs_f64()))
    }

    /// [`base_delay`](Self::base_delay) spread by up to ±25%.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt).as_secs_f64();
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.subsec_nanos())
            .unwrap_or(0);
        // Map [0, 1e9) onto [-1, 1).
        let spread = f64::from(nanos) / 500_000_000.0 - 1.0;
        Duration::from_secs_f64((base * (1.0 + JITTER * spread)).max(0.05))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_then_caps() {
        let config = ReconnectConfig::default();
        let secs: Vec<u64> = (1..=7).map(|n| config.base_delay(n).as_secs()).collect();
        assert_eq!(secs, vec![1, 2, 4, 8, 16, 30, 30]);
        assert_eq!(config.base_delay(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn jitter_stays_within_a_quarter() {
        let config = ReconnectConfig::default();
        for attempt in 1..=8 {
            let base = config.base_delay(attempt).as_secs_f64();
            let got = config.delay_for_attempt(attempt).as_secs_f64();
            assert!(
                (base * 0.75..=base * 1.25).contains(&got),
                "attempt {attempt}: {got:.3}s outside ±25% of {base}s"
            );
        }
    }
}
