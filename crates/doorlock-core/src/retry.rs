//! Bounded retries with a fixed delay
//!
//! Every network call and sensor read on a node gets a small fixed number of
//! attempts with a fixed pause in between. There is no backoff: the loop is
//! blocked for the whole sequence, so the worst case has to stay short and
//! predictable.

use core::fmt::Debug;

use embedded_hal_async::delay::DelayNs;
use log::warn;
use serde::{Deserialize, Serialize};

/// How many times to try and how long to wait between tries
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Zero is treated as one.
    pub attempts: u8,
    /// Pause between attempts in milliseconds
    pub delay_ms: u32,
}

impl RetryPolicy {
    pub const fn new(attempts: u8, delay_ms: u32) -> Self {
        Self { attempts, delay_ms }
    }

    /// A single attempt, no retries
    pub const fn once() -> Self {
        Self::new(1, 0)
    }

    pub const fn max_attempts(&self) -> u8 {
        if self.attempts == 0 { 1 } else { self.attempts }
    }
}

/// All attempts failed; carries the last error seen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Exhausted<E> {
    pub attempts: u8,
    pub last: E,
}

/// Run `op` until it succeeds or the policy runs out.
///
/// `op` receives the 1-based attempt number. The delay is only awaited
/// between attempts, never after the last one.
pub async fn retry<T, E, D>(
    policy: RetryPolicy,
    delay: &mut D,
    what: &str,
    mut op: impl AsyncFnMut(u8) -> Result<T, E>,
) -> Result<T, Exhausted<E>>
where
    E: Debug,
    D: DelayNs,
{
    let attempts = policy.max_attempts();
    let mut attempt = 1;

    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if attempt >= attempts => {
                warn!("{}: attempt {}/{} failed: {:?}, giving up", what, attempt, attempts, e);
                return Err(Exhausted {
                    attempts: attempt,
                    last: e,
                });
            }
            Err(e) => {
                warn!("{}: attempt {}/{} failed: {:?}, retrying", what, attempt, attempts, e);
                delay.delay_ms(policy.delay_ms).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingDelay;
    use embassy_futures::block_on;

    #[test]
    fn first_success_needs_no_delay() {
        let mut delay = RecordingDelay::default();
        let mut calls = 0;

        let result: Result<u8, Exhausted<()>> =
            block_on(retry(RetryPolicy::new(3, 100), &mut delay, "test", async |_| {
                calls += 1;
                Ok(7)
            }));

        assert_eq!(result, Ok(7));
        assert_eq!(calls, 1);
        assert!(delay.delays_ms.is_empty());
    }

    #[test]
    fn succeeds_on_a_later_attempt() {
        let mut delay = RecordingDelay::default();

        let result = block_on(retry(
            RetryPolicy::new(3, 250),
            &mut delay,
            "test",
            async |attempt| if attempt < 3 { Err(attempt) } else { Ok(attempt) },
        ));

        assert_eq!(result, Ok(3));
        assert_eq!(delay.delays_ms, [250, 250]);
    }

    #[test]
    fn exhaustion_reports_last_error() {
        let mut delay = RecordingDelay::default();
        let mut calls = 0u8;

        let result: Result<(), _> =
            block_on(retry(RetryPolicy::new(3, 500), &mut delay, "test", async |attempt| {
                calls += 1;
                Err(attempt * 10)
            }));

        assert_eq!(
            result,
            Err(Exhausted {
                attempts: 3,
                last: 30
            })
        );
        assert_eq!(calls, 3);
        assert_eq!(delay.delays_ms, [500, 500]);
    }

    #[test]
    fn zero_attempts_still_tries_once() {
        let mut delay = RecordingDelay::default();
        let mut calls = 0;

        let result: Result<(), _> =
            block_on(retry(RetryPolicy::new(0, 500), &mut delay, "test", async |_| {
                calls += 1;
                Err("down")
            }));

        assert_eq!(result.unwrap_err().attempts, 1);
        assert_eq!(calls, 1);
    }
}
