//! Retry delay policy for diffs that stay unresolved after a handler call.

use intentful_core::{Backoff, Delay, Kind};
use rand::Rng;

/// Upper bound on retry jitter in seconds.
const JITTER_SECONDS: f64 = 5.0;
const DEBUG_JITTER_SECONDS: f64 = 0.5;

/// `min(exponent^retries + entropy, max_backoff)`.
pub fn compute(retries: u32, max_backoff: f64, entropy: f64, exponent: f64) -> f64 {
    let exp = i32::try_from(retries).unwrap_or(i32::MAX);
    (exponent.powi(exp) + entropy).min(max_backoff)
}

#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub max_backoff: f64,
    /// Used when the kind does not set `diff_retry_exponent`.
    pub default_exponent: f64,
    pub debug: bool,
}

impl BackoffPolicy {
    pub fn new(max_backoff: f64, default_exponent: f64, debug: bool) -> Self {
        BackoffPolicy {
            max_backoff,
            default_exponent,
            debug,
        }
    }

    /// Kind base delay plus random jitter.
    pub fn entropy(&self, kind: &Kind) -> f64 {
        let bound = if self.debug {
            DEBUG_JITTER_SECONDS
        } else {
            JITTER_SECONDS
        };
        let jitter: f64 = rand::thread_rng().gen_range(0.0..bound);
        kind.diff_delay.unwrap_or(0.0).max(0.0) + jitter
    }

    pub fn exponent(&self, kind: &Kind) -> f64 {
        kind.diff_retry_exponent.unwrap_or(self.default_exponent)
    }

    /// Backoff after an attempt. An explicit delay from the handler wins over
    /// the formula.
    pub fn backoff(&self, kind: &Kind, explicit: Option<Delay>, retries: u32) -> Backoff {
        let delay = explicit.unwrap_or_else(|| {
            Delay::starting_now(compute(
                retries,
                self.max_backoff,
                self.entropy(kind),
                self.exponent(kind),
            ))
        });
        Backoff { delay, retries }
    }

    /// Backoff following `previous` after a further attempt.
    pub fn next(&self, previous: &Backoff, kind: &Kind, explicit: Option<Delay>) -> Backoff {
        self.backoff(kind, explicit, previous.retries.saturating_add(1))
    }
}
