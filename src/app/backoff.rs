use std::time::Duration;

/// Delay before retry `attempt` (0-based): doubles each time, capped at `max_delay`.
pub fn backoff_delay(attempt: u32, initial_delay: Duration, max_delay: Duration) -> Duration {
    let multiplier = 2_u32.saturating_pow(attempt);
    initial_delay.saturating_mul(multiplier).min(max_delay)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32, initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay,
            max_delay,
        }
    }

    pub fn delay_before(&self, attempt: u32) -> Duration {
        backoff_delay(
            attempt.saturating_sub(1),
            self.initial_delay,
            self.max_delay,
        )
    }

    /// Runs `op` until it succeeds, `should_retry` rejects the error, or attempts run out.
    pub fn run<T, E>(
        &self,
        mut op: impl FnMut() -> Result<T, E>,
        should_retry: impl Fn(&E) -> bool,
        mut on_retry: impl FnMut(u32, Duration, &E),
    ) -> Result<T, E> {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match op() {
                Ok(value) => return Ok(value),
                Err(error) if attempt < max_attempts && should_retry(&error) => {
                    let delay = self.delay_before(attempt);
                    on_retry(attempt, delay, &error);
                    std::thread::sleep(delay);
                }
                Err(error) => return Err(error),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{RetryPolicy, backoff_delay};

    #[test]
    fn delay_doubles_until_cap() {
        let initial = Duration::from_millis(100);
        let max = Duration::from_secs(1);

        assert_eq!(backoff_delay(0, initial, max), Duration::from_millis(100));
        assert_eq!(backoff_delay(1, initial, max), Duration::from_millis(200));
        assert_eq!(backoff_delay(3, initial, max), Duration::from_millis(800));
        assert_eq!(backoff_delay(4, initial, max), max);
        assert_eq!(backoff_delay(40, initial, max), max);
    }

    #[test]
    fn retries_until_success() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(2));
        let mut calls = 0;
        let mut retries = Vec::new();

        let result: Result<u32, &str> = policy.run(
            || {
                calls += 1;
                if calls < 3 { Err("busy") } else { Ok(calls) }
            },
            |_| true,
            |attempt, _, _| retries.push(attempt),
        );

        assert_eq!(result, Ok(3));
        assert_eq!(retries, vec![1, 2]);
    }

    #[test]
    fn stops_on_non_retryable_error() {
        let policy = RetryPolicy::new(5, Duration::from_millis(1), Duration::from_millis(2));
        let mut calls = 0;

        let result: Result<(), &str> = policy.run(
            || {
                calls += 1;
                Err("corrupt")
            },
            |error| *error == "busy",
            |_, _, _| {},
        );

        assert_eq!(result, Err("corrupt"));
        assert_eq!(calls, 1);
    }

    #[test]
    fn zero_attempts_still_runs_once() {
        let policy = RetryPolicy::new(0, Duration::from_millis(1), Duration::from_millis(1));
        let mut calls = 0;

        let _: Result<(), &str> = policy.run(
            || {
                calls += 1;
                Err("fail")
            },
            |_| true,
            |_, _, _| {},
        );

        assert_eq!(calls, 1);
    }
}
