//! Exponential backoff for remote calls
//!
//! Every failure is followed by a sleep, including the last one, and the
//! delay is multiplied after each sleep. Once `max_attempts` calls have
//! failed the last error is returned to the caller.

use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

/// Upper bound of the random component added when jitter is enabled
const MAX_JITTER_MS: u64 = 250;

/// Backoff policy for remote calls
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total number of attempts before giving up
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay after the first failure, in milliseconds
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    /// Factor applied to the delay after each failure
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: u32,
    /// Optional ceiling for a single delay
    #[serde(default)]
    pub max_delay_ms: Option<u64>,
    /// Add up to 250ms of jitter to each delay
    #[serde(default)]
    pub jitter: bool,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_delay_ms() -> u64 {
    1000
}

fn default_backoff_multiplier() -> u32 {
    2
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            max_delay_ms: None,
            jitter: false,
        }
    }
}

impl RetryConfig {
    pub fn new(max_attempts: u32, initial_delay: Duration, backoff_multiplier: u32) -> Self {
        Self {
            max_attempts,
            initial_delay_ms: millis(initial_delay),
            backoff_multiplier,
            ..Default::default()
        }
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay_ms = Some(millis(max_delay));
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Reject policies whose delays would not grow
    pub fn validate(&self) -> Result<()> {
        if self.backoff_multiplier < 2 {
            anyhow::bail!(
                "retry.backoff_multiplier must be at least 2, got {}",
                self.backoff_multiplier
            );
        }
        Ok(())
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    /// Delay that follows `current`, honouring the optional cap
    pub fn next_delay(&self, current: Duration) -> Duration {
        let next = current.saturating_mul(self.backoff_multiplier.max(1));
        match self.max_delay_ms {
            Some(cap) => next.min(Duration::from_millis(cap)),
            None => next,
        }
    }

    /// Sleep durations taken after each failed attempt, without jitter
    pub fn schedule(&self) -> Vec<Duration> {
        let mut delays = Vec::with_capacity(self.max_attempts as usize);
        let mut delay = self.capped(self.initial_delay());
        for _ in 0..self.attempts() {
            delays.push(delay);
            delay = self.next_delay(delay);
        }
        delays
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    fn capped(&self, delay: Duration) -> Duration {
        match self.max_delay_ms {
            Some(cap) => delay.min(Duration::from_millis(cap)),
            None => delay,
        }
    }

    fn with_jitter_applied(&self, delay: Duration) -> Duration {
        if !self.jitter {
            return delay;
        }
        let jitter_ms = rand::rng().random_range(0..MAX_JITTER_MS);
        delay + Duration::from_millis(jitter_ms)
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Run `op` until it succeeds or `config.max_attempts` calls have failed
pub async fn retry<T, F, Fut>(config: &RetryConfig, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = config.attempts();
    let mut delay = config.capped(config.initial_delay());
    let mut attempt = 0;

    loop {
        match op().await {
            Ok(value) => {
                if attempt > 0 {
                    info!(attempt = attempt + 1, "Remote call recovered after retries");
                }
                return Ok(value);
            }
            Err(e) => {
                attempt += 1;
                let wait = config.with_jitter_applied(delay);
                warn!(
                    attempt,
                    max_attempts,
                    delay_ms = millis(wait),
                    error = %e,
                    "Remote call failed, backing off"
                );
                tokio::time::sleep(wait).await;
                delay = config.next_delay(delay);

                if attempt >= max_attempts {
                    error!(attempts = attempt, "Max retries exceeded");
                    return Err(e.context(format!("giving up after {} attempts", attempt)));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use tokio::time::Instant;

    #[test]
    fn test_default_policy() {
        let config = RetryConfig::default();
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.initial_delay(), Duration::from_secs(1));
        assert_eq!(config.backoff_multiplier, 2);
        assert!(config.max_delay_ms.is_none());
    }

    #[test]
    fn test_schedule_is_exponential() {
        let config = RetryConfig::new(4, Duration::from_millis(100), 2);
        assert_eq!(
            config.schedule(),
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(400),
                Duration::from_millis(800),
            ]
        );
    }

    #[test]
    fn test_schedule_respects_cap() {
        let config =
            RetryConfig::new(5, Duration::from_secs(1), 3).with_max_delay(Duration::from_secs(5));
        let schedule = config.schedule();
        assert_eq!(schedule[1], Duration::from_secs(3));
        assert_eq!(schedule[2], Duration::from_secs(5));
        assert_eq!(schedule[4], Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_failing_makes_exact_attempts() {
        let config = RetryConfig::new(3, Duration::from_secs(1), 2);
        let start = Instant::now();
        let mut attempt_times = Vec::new();

        let result: Result<()> = retry(&config, || {
            attempt_times.push(Instant::now());
            async { Err(anyhow!("service unavailable")) }
        })
        .await;

        let err = result.unwrap_err();
        assert!(format!("{:#}", err).contains("service unavailable"));
        assert_eq!(attempt_times.len(), 3);

        // Delays of d, 2d, 4d: attempts start at 0, d, 3d and the final
        // backoff ends at 7d.
        assert_eq!(attempt_times[0] - start, Duration::ZERO);
        assert_eq!(attempt_times[1] - attempt_times[0], Duration::from_secs(1));
        assert_eq!(attempt_times[2] - attempt_times[1], Duration::from_secs(2));
        assert_eq!(start.elapsed(), Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_transient_failures() {
        let config = RetryConfig::new(5, Duration::from_millis(10), 2);
        let mut calls = 0;

        let value = retry(&config, || {
            calls += 1;
            let current = calls;
            async move {
                if current < 3 {
                    Err(anyhow!("timeout"))
                } else {
                    Ok("reply")
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(value, "reply");
        assert_eq!(calls, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_does_not_sleep() {
        let config = RetryConfig::default();
        let start = Instant::now();

        let value = retry(&config, || async { Ok::<_, anyhow::Error>(42) }).await.unwrap();

        assert_eq!(value, 42);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_attempts_still_calls_once() {
        let config = RetryConfig::new(0, Duration::from_millis(1), 2);
        let mut calls = 0;

        let result: Result<()> = retry(&config, || {
            calls += 1;
            async { Err(anyhow!("down")) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_jitter_stays_in_window() {
        let config = RetryConfig::new(3, Duration::from_secs(1), 2).with_jitter(true);
        let base = config.initial_delay();

        for _ in 0..200 {
            let delay = config.with_jitter_applied(base);
            assert!(delay >= base);
            assert!(delay < base + Duration::from_millis(MAX_JITTER_MS));
        }

        let plain = RetryConfig::new(3, Duration::from_secs(1), 2);
        assert_eq!(plain.with_jitter_applied(base), base);
    }

    #[test]
    fn test_validate_rejects_flat_backoff() {
        assert!(RetryConfig::default().validate().is_ok());
        assert!(RetryConfig::new(3, Duration::from_secs(1), 1).validate().is_err());
        assert!(RetryConfig::new(3, Duration::from_secs(1), 0).validate().is_err());
    }

    #[test]
    fn test_huge_durations_saturate() {
        let config = RetryConfig::new(3, Duration::MAX, 2).with_max_delay(Duration::MAX);
        assert_eq!(config.initial_delay_ms, u64::MAX);
        assert_eq!(config.max_delay_ms, Some(u64::MAX));
    }

    #[test]
    fn test_parse_from_toml() {
        let config: RetryConfig = toml::from_str("max_attempts = 3\njitter = true").unwrap();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.initial_delay_ms, 1000);
        assert!(config.jitter);
    }
}
