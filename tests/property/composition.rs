//! Property-based tests: results do not depend on how a computation is split
//! across suspensions or which driver runs it.

use fasync::{yield_now, Cold, Fault, Handlers};
use proptest::prelude::*;

#[derive(Debug, thiserror::Error)]
#[error("rejected {0}")]
struct Rejected(i64);

/// Sum `values` one element per step, yielding between steps when `yields` says so.
fn summed(values: Vec<i64>, yields: Vec<bool>) -> Cold<i64> {
    values
        .into_iter()
        .zip(yields.into_iter().chain(std::iter::repeat(false)))
        .fold(Cold::pure(0i64), |acc, (value, yield_first)| {
            acc.and_then(move |total| {
                let step = Cold::pure(total + value);
                if yield_first {
                    yield_now().then(step)
                } else {
                    step
                }
            })
        })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_pure_round_trip(value in any::<i64>()) {
        prop_assert_eq!(Cold::pure(value).run_blocking().unwrap(), value);
    }

    #[test]
    fn prop_sum_independent_of_suspensions(
        values in prop::collection::vec(-1_000i64..1_000, 0..400),
        yields in prop::collection::vec(any::<bool>(), 0..400),
    ) {
        let expected: i64 = values.iter().sum();
        let computation = summed(values, yields);
        prop_assert_eq!(computation.run_blocking().unwrap(), expected);
        prop_assert_eq!(computation.run_as_future().wait().unwrap(), expected);
    }

    #[test]
    fn prop_map_fusion(value in -10_000i64..10_000) {
        let f = |v: i64| v * 3;
        let g = |v: i64| v - 7;
        let separate = Cold::pure(value).map(f).map(g).run_blocking().unwrap();
        let fused = Cold::pure(value).map(move |v| g(f(v))).run_blocking().unwrap();
        prop_assert_eq!(separate, fused);
    }

    #[test]
    fn prop_filter_threshold(value in -100i64..100, threshold in -100i64..100) {
        let guarded = Cold::pure(value)
            .try_map(|v| Err::<i64, _>(Fault::user(Rejected(v))))
            .catch_with(Handlers::new().on_when::<Rejected, _, _>(
                move |e| e.0 >= threshold,
                |e| Cold::pure(e.0),
            ));
        let outcome = guarded.run_blocking();
        if value >= threshold {
            prop_assert_eq!(outcome.unwrap(), value);
        } else {
            prop_assert!(outcome.unwrap_err().downcast_ref::<Rejected>().is_some());
        }
    }
}
