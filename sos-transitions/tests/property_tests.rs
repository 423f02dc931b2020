//! Property tests for the pure timing calculations

use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;
use sos_transitions::config::{SilenceMode, SilenceParams};
use sos_transitions::crossfade::fire_in_secs;
use sos_transitions::silence::random_gap_ms;

proptest! {
    #[test]
    fn random_gap_stays_within_bounds(
        min in 0u64..20_000,
        span in 0u64..20_000,
        step in 1u64..1_000,
        seed in any::<u64>(),
    ) {
        let max = min + span;
        let mut rng = StdRng::seed_from_u64(seed);
        let gap = random_gap_ms(min, max, step, &mut rng);

        prop_assert!(gap >= min && gap <= max, "{} outside {}..={}", gap, min, max);
        // Off-step results only happen when no step fits in the range
        if gap % step != 0 {
            prop_assert_eq!(gap, min);
            prop_assert!(min.div_ceil(step) > max / step);
        }
    }

    #[test]
    fn equal_bounds_return_exactly_that_value(value in 0u64..60_000, step in 1u64..1_000, seed in any::<u64>()) {
        let mut rng = StdRng::seed_from_u64(seed);
        prop_assert_eq!(random_gap_ms(value, value, step, &mut rng), value);
    }

    #[test]
    fn fire_time_matches_remaining_minus_fade(
        duration in 0.0f64..3_600.0,
        elapsed in 0.0f64..3_600.0,
        fade in 0.0f64..30.0,
    ) {
        let fire_in = fire_in_secs(duration, elapsed, fade);

        prop_assert!(fire_in >= 0.0);
        let expected = duration - elapsed - fade;
        if expected > 0.0 {
            prop_assert!((fire_in - expected).abs() < 1e-9);
        } else {
            prop_assert_eq!(fire_in, 0.0);
        }
    }

    #[test]
    fn normalized_params_are_ordered(
        duration in 0u64..100_000,
        min in 0u64..100_000,
        max in 0u64..100_000,
    ) {
        let params = SilenceParams {
            mode: SilenceMode::Random,
            duration_ms: duration,
            min_delay_ms: min,
            max_delay_ms: max,
        }
        .normalized();

        prop_assert!(params.min_delay_ms <= params.max_delay_ms);
        prop_assert!(params.max_delay_ms <= params.duration_ms);
    }
}
