#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(coverage_nightly, coverage(off))] // This is all test code, no need to test it.

//! Private helpers for testing and examples in `stress_cpus`.

use std::sync::mpsc;
use std::thread;
use std::time::Duration;

/// How long a watched test may run before we declare it hung.
const WATCHDOG_TIMEOUT: Duration = Duration::from_secs(10);

/// Under Miri, thread synchronization is dramatically slower.
const WATCHDOG_TIMEOUT_MIRI: Duration = Duration::from_secs(60);

/// Standard normal quantile used for the uniformity check. Corresponds to a false alarm
/// probability of roughly 1 in 30 000 per check.
const UNIFORMITY_Z: f64 = 4.0;

/// Runs a test on a separate thread and fails it if it does not finish in time.
///
/// Tests of rendezvous logic hang forever when they are wrong. Wrapping them in a watchdog turns
/// such a hang into a test failure instead of a stuck CI job.
///
/// When the `MUTATION_TESTING` environment variable is set to "1", the watchdog is disabled and
/// the test function is executed directly, so mutation testing can detect hanging mutations.
///
/// # Panics
///
/// Panics if the test exceeds the timeout or if the test itself panics.
///
/// # Example
///
/// ```rust
/// use testing::with_watchdog;
///
/// let answer = with_watchdog(|| 6 * 7);
/// assert_eq!(answer, 42);
/// ```
pub fn with_watchdog<F, R>(test_fn: F) -> R
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    if std::env::var("MUTATION_TESTING").as_deref() == Ok("1") {
        return test_fn();
    }

    let (tx, rx) = mpsc::channel();

    let test_handle = thread::spawn(move || {
        let result = test_fn();
        // If this fails, the receiver has already timed out.
        drop(tx.send(result));
    });

    let timeout = if cfg!(miri) {
        WATCHDOG_TIMEOUT_MIRI
    } else {
        WATCHDOG_TIMEOUT
    };

    match rx.recv_timeout(timeout) {
        Ok(result) => {
            test_handle.join().expect("test thread already sent its result");
            result
        }
        Err(mpsc::RecvTimeoutError::Timeout) => {
            panic!("test did not finish within {timeout:?} - probably hung");
        }
        Err(mpsc::RecvTimeoutError::Disconnected) => match test_handle.join() {
            Ok(()) => panic!("test thread disconnected without a result"),
            Err(e) => std::panic::resume_unwind(e),
        },
    }
}

/// Pearson's chi-squared statistic of observed bucket counts against a uniform distribution.
///
/// # Panics
///
/// Panics if `counts` is empty or all counts are zero.
#[must_use]
#[expect(
    clippy::cast_precision_loss,
    reason = "test sample sizes are far below the precision limit of f64"
)]
pub fn chi_squared_uniform(counts: &[usize]) -> f64 {
    let total: usize = counts.iter().sum();
    assert!(total > 0, "need at least one sample");

    let expected = total as f64 / counts.len() as f64;

    counts
        .iter()
        .map(|&observed| {
            let diff = observed as f64 - expected;
            diff * diff / expected
        })
        .sum()
}

/// Whether bucket counts are statistically consistent with a uniform distribution.
///
/// Compares the chi-squared statistic against an approximate critical value (Wilson-Hilferty)
/// at a very low false alarm rate, so a fair source practically never fails the check while a
/// clearly skewed one does.
///
/// # Panics
///
/// Panics if there are fewer than two buckets or no samples.
#[must_use]
#[expect(
    clippy::arithmetic_side_effects,
    clippy::cast_precision_loss,
    reason = "bucket counts in tests are small"
)]
pub fn is_plausibly_uniform(counts: &[usize]) -> bool {
    assert!(counts.len() >= 2, "need at least two buckets");

    let degrees_of_freedom = (counts.len() - 1) as f64;
    let spread = 2.0 / (9.0 * degrees_of_freedom);
    let critical = degrees_of_freedom * (1.0 - spread + UNIFORMITY_Z * spread.sqrt()).powi(3);

    chi_squared_uniform(counts) <= critical
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn watchdog_returns_value() {
        assert_eq!(with_watchdog(|| "hello world"), "hello world");
    }

    #[test]
    #[should_panic(expected = "boom")]
    fn watchdog_propagates_panic() {
        with_watchdog(|| panic!("boom"));
    }

    #[test]
    fn perfectly_even_counts_are_uniform() {
        let counts = [1000; 8];

        assert!(chi_squared_uniform(&counts).abs() < f64::EPSILON);
        assert!(is_plausibly_uniform(&counts));
    }

    #[test]
    fn skewed_counts_are_not_uniform() {
        let counts = [2000, 1000, 1000, 1000, 1000, 1000, 1000, 0];

        assert!(!is_plausibly_uniform(&counts));
    }
}
