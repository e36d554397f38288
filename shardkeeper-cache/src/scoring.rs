//! Pure scoring functions for cache eviction (spec §4.2).
//!
//! Kept free of any locking or I/O so the scoring math itself is trivially
//! property-testable in isolation from the cache's concurrency structure.

use std::time::Duration;

const FIVE_MINUTES: Duration = Duration::from_secs(5 * 60);
const THIRTY_MINUTES: Duration = Duration::from_secs(30 * 60);
const TAU: Duration = Duration::from_secs(60 * 60);

/// `log(1 + freq) / log(1 + F_max)`, with the degenerate `F_max == 0` case returning
/// `0.0` rather than `NaN` (spec §8 boundary: "`F_max = 0` ... must not cause
/// `freq_norm` to be NaN").
pub fn freq_norm(freq: u64, f_max: u64) -> f64 {
    if f_max == 0 {
        return 0.0;
    }
    ((1.0 + freq as f64).ln()) / ((1.0 + f_max as f64).ln())
}

/// Piecewise recency decay over age `a = now - last_access` (spec §4.2).
pub fn recency_norm(age: Duration) -> f64 {
    if age <= FIVE_MINUTES {
        1.0
    } else if age <= THIRTY_MINUTES {
        let span = (THIRTY_MINUTES - FIVE_MINUTES).as_secs_f64();
        let elapsed = (age - FIVE_MINUTES).as_secs_f64();
        let t = elapsed / span;
        1.0 + t * (0.7 - 1.0)
    } else {
        let over = (age - THIRTY_MINUTES).as_secs_f64();
        0.7 * (-over / TAU.as_secs_f64()).exp()
    }
}

/// Composite eviction score in `[0, 1]`; lower is evicted first.
pub fn score(freq: u64, f_max: u64, age: Duration) -> f64 {
    0.6 * freq_norm(freq, f_max) + 0.4 * recency_norm(age)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn zero_f_max_never_nans() {
        assert_eq!(freq_norm(0, 0), 0.0);
        assert_eq!(freq_norm(5, 0), 0.0);
    }

    #[test]
    fn recency_is_one_within_five_minutes() {
        assert_eq!(recency_norm(Duration::from_secs(0)), 1.0);
        assert_eq!(recency_norm(FIVE_MINUTES), 1.0);
    }

    #[test]
    fn recency_interpolates_between_five_and_thirty_minutes() {
        let mid = recency_norm(FIVE_MINUTES + (THIRTY_MINUTES - FIVE_MINUTES) / 2);
        assert!((mid - 0.85).abs() < 1e-9);
        assert!((recency_norm(THIRTY_MINUTES) - 0.7).abs() < 1e-9);
    }

    #[test]
    fn recency_decays_exponentially_past_thirty_minutes() {
        let at_boundary = recency_norm(THIRTY_MINUTES);
        let later = recency_norm(THIRTY_MINUTES + TAU);
        assert!(later < at_boundary);
        assert!(later > 0.0);
    }

    proptest! {
        #[test]
        fn score_always_in_unit_interval(freq in 0u64..1_000_000, f_max in 0u64..1_000_000, age_secs in 0u64..100_000_000) {
            let s = score(freq, f_max, Duration::from_secs(age_secs));
            prop_assert!(s >= 0.0 && s <= 1.0001);
        }

        #[test]
        fn higher_freq_never_lowers_score_at_fixed_age(f_max in 1u64..1_000_000, low in 0u64..500_000, delta in 0u64..500_000) {
            let high = low + delta;
            let age = Duration::from_secs(0);
            prop_assert!(score(high, f_max.max(high), age) >= score(low, f_max.max(high), age) - 1e-12);
        }
    }
}
