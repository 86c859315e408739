//! Pure retry-delay calculation.
//!
//! Kept free of clocks, sleeps, and process spawning so the schedule can be
//! tested as a plain function of its inputs. The jitter source is an explicit
//! seed; callers derive it from the session id.

use std::time::Duration;

/// Fraction of the exponential term used as the jitter window (20%).
const JITTER_NUMERATOR: u64 = 1;
const JITTER_DENOMINATOR: u64 = 5;

/// Compute the delay before retry number `attempt` (0-based).
///
/// The schedule is exponential with additive jitter:
/// `base * 2^attempt + uniform(0, 0.2 * base * 2^attempt)`,
/// where the uniform draw is a deterministic function of `seed` and `attempt`.
/// Saturates instead of overflowing for absurd attempt counts.
pub fn retry_delay(attempt: u32, base: Duration, seed: u64) -> Duration {
    let base_ms = base.as_millis() as u64;
    let exp_ms = base_ms.saturating_mul(1u64.checked_shl(attempt).unwrap_or(u64::MAX));
    let window_ms = exp_ms / JITTER_DENOMINATOR * JITTER_NUMERATOR;
    let jitter_ms = if window_ms == 0 {
        0
    } else {
        mix(seed ^ u64::from(attempt).wrapping_mul(0x9e37_79b9_7f4a_7c15)) % (window_ms + 1)
    };
    Duration::from_millis(exp_ms.saturating_add(jitter_ms))
}

/// SplitMix64 finalizer. Cheap, stateless, and good enough to decorrelate
/// retry schedules across concurrent sessions.
fn mix(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9e37_79b9_7f4a_7c15);
    x = (x ^ (x >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    x ^ (x >> 31)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_is_at_least_the_exponential_term() {
        let base = Duration::from_millis(2000);
        for attempt in 0..5 {
            let d = retry_delay(attempt, base, 42);
            assert!(d >= Duration::from_millis(2000 * 2u64.pow(attempt)));
        }
    }

    #[test]
    fn jitter_stays_within_twenty_percent_window() {
        let base = Duration::from_millis(2000);
        for seed in 0..200u64 {
            for attempt in 0..5 {
                let exp = 2000 * 2u64.pow(attempt);
                let d = retry_delay(attempt, base, seed).as_millis() as u64;
                assert!(d >= exp, "delay below exponential floor");
                assert!(d <= exp + exp / 5, "delay above jitter ceiling");
            }
        }
    }

    #[test]
    fn same_inputs_give_same_delay() {
        let base = Duration::from_millis(1500);
        assert_eq!(retry_delay(3, base, 7), retry_delay(3, base, 7));
    }

    #[test]
    fn expected_delay_grows_with_attempt_number() {
        // Average over many seeds approximates the expectation; the backoff
        // formula doubles the floor each attempt so the mean must strictly grow.
        let base = Duration::from_millis(100);
        let mean = |attempt: u32| -> f64 {
            (0..500u64)
                .map(|seed| retry_delay(attempt, base, seed).as_millis() as f64)
                .sum::<f64>()
                / 500.0
        };
        for attempt in 0..6 {
            assert!(mean(attempt + 1) > mean(attempt));
        }
    }

    #[test]
    fn huge_attempt_saturates_instead_of_panicking() {
        let d = retry_delay(200, Duration::from_millis(2000), 1);
        assert!(d.as_millis() > 0);
    }

    #[test]
    fn zero_base_yields_zero_delay() {
        assert_eq!(retry_delay(4, Duration::ZERO, 99), Duration::ZERO);
    }
}
