use rand::Rng;
use serde::{Deserialize, Serialize};
use std::thread;
use std::time::Duration;

/// Exponential backoff with jitter, capped per delay and bounded in attempts.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            initial_backoff_ms: 100,
            max_backoff_ms: 2_000,
            max_attempts: 10,
        }
    }
}

impl RetryPolicy {
    pub fn backoff(&self) -> Backoff {
        Backoff {
            policy: self.clone(),
            attempt: 0,
        }
    }
}

pub struct Backoff {
    policy: RetryPolicy,
    attempt: u32,
}

impl Backoff {
    /// Upper bound of the delay after the given failed attempt (0-based).
    pub fn ceiling(&self, attempt: u32) -> Duration {
        let factor = 1_u64.checked_shl(attempt.min(32)).unwrap_or(u64::MAX);
        let millis = self
            .policy
            .initial_backoff_ms
            .saturating_mul(factor)
            .min(self.policy.max_backoff_ms);
        Duration::from_millis(millis)
    }

    /// Delay before the next attempt, or `None` once the budget is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt + 1 >= self.policy.max_attempts {
            return None;
        }

        let ceiling = self.ceiling(self.attempt);
        self.attempt += 1;

        // Jitter within the upper half so retries of many workers spread out.
        let millis = ceiling.as_millis() as u64;
        let jittered = if millis > 1 {
            rand::thread_rng().gen_range(millis / 2..=millis)
        } else {
            millis
        };
        Some(Duration::from_millis(jittered))
    }

    pub fn attempts(&self) -> u32 {
        self.attempt + 1
    }
}

/// Runs `op` until it succeeds or the policy's attempts are exhausted,
/// returning the last error and the number of attempts made.
pub fn retry<T, E, F>(policy: &RetryPolicy, what: &str, mut op: F) -> Result<T, (E, u32)>
where
    E: std::fmt::Display,
    F: FnMut() -> Result<T, E>,
{
    let mut backoff = policy.backoff();
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(err) => match backoff.next_delay() {
                Some(delay) => {
                    tracing::debug!(
                        "{} failed (attempt {}): {}, retrying in {} ms",
                        what,
                        backoff.attempts() - 1,
                        err,
                        delay.as_millis()
                    );
                    thread::sleep(delay);
                }
                None => return Err((err, backoff.attempts())),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            initial_backoff_ms: 1,
            max_backoff_ms: 4,
            max_attempts: attempts,
        }
    }

    #[test]
    fn delays_grow_and_cap() {
        let backoff = RetryPolicy {
            initial_backoff_ms: 100,
            max_backoff_ms: 1_000,
            max_attempts: 50,
        }
        .backoff();
        assert_eq!(backoff.ceiling(0), Duration::from_millis(100));
        assert_eq!(backoff.ceiling(1), Duration::from_millis(200));
        assert_eq!(backoff.ceiling(3), Duration::from_millis(800));
        assert_eq!(backoff.ceiling(4), Duration::from_millis(1_000));
        assert_eq!(backoff.ceiling(40), Duration::from_millis(1_000));
    }

    #[test]
    fn jitter_stays_under_ceiling() {
        let mut backoff = RetryPolicy {
            initial_backoff_ms: 100,
            max_backoff_ms: 400,
            max_attempts: 6,
        }
        .backoff();
        let mut delays = Vec::new();
        while let Some(delay) = backoff.next_delay() {
            delays.push(delay);
        }
        assert_eq!(delays.len(), 5);
        assert!(delays[0] >= Duration::from_millis(50) && delays[0] <= Duration::from_millis(100));
        assert!(delays.iter().all(|d| *d <= Duration::from_millis(400)));
    }

    #[test]
    fn retry_gives_up_after_budget() {
        let mut calls = 0;
        let result: Result<(), (String, u32)> = retry(&policy(4), "connect", || {
            calls += 1;
            Err("refused".to_string())
        });
        assert_eq!(result, Err(("refused".to_string(), 4)));
        assert_eq!(calls, 4);
    }

    #[test]
    fn retry_returns_first_success() {
        let mut calls = 0;
        let result: Result<u32, (String, u32)> = retry(&policy(5), "connect", || {
            calls += 1;
            if calls < 3 {
                Err("refused".to_string())
            } else {
                Ok(calls)
            }
        });
        assert_eq!(result, Ok(3));
    }
}
