//! Exception filter ordering, predicates and propagation.

use fasync::{Cold, Fault, FaultKind, Handlers};

use super::test_utils::{Counter, Flag, Oops};

#[derive(Debug, thiserror::Error)]
#[error("other: {0}")]
struct Other(u32);

#[test]
fn test_first_matching_entry_wins() {
    let second = Flag::default();
    let s = second.clone();
    let handled = Cold::<u32>::raise(Oops::new("x")).catch_with(
        Handlers::new()
            .on::<Other, _>(|_| Cold::pure(1))
            .on::<Oops, _>(|_| Cold::pure(2))
            .on_any(move |_| {
                s.set();
                Cold::pure(3)
            }),
    );
    assert_eq!(handled.run_blocking().unwrap(), 2);
    assert!(!second.is_set());
}

#[test]
fn test_predicate_sees_payload() {
    let handled = Cold::<u32>::raise(Other(7)).catch_with(
        Handlers::new()
            .on_when::<Other, _, _>(|e| e.0 > 10, |_| Cold::pure(1))
            .on_when::<Other, _, _>(|e| e.0 == 7, |e| Cold::pure(e.0 * 2)),
    );
    assert_eq!(handled.run_blocking().unwrap(), 14);
}

#[test]
fn test_innermost_region_first() {
    let outer = Flag::default();
    let o = outer.clone();
    let handled = Cold::<&'static str>::raise(Oops::new("x"))
        .catch_with(Handlers::new().on::<Oops, _>(|_| Cold::pure("inner")))
        .catch_with(Handlers::new().on::<Oops, _>(move |_| {
            o.set();
            Cold::pure("outer")
        }));
    assert_eq!(handled.run_blocking().unwrap(), "inner");
    assert!(!outer.is_set());
}

#[test]
fn test_unmatched_fault_reaches_outer_region() {
    let handled = Cold::<&'static str>::raise(Other(1))
        .catch_with(Handlers::new().on::<Oops, _>(|_| Cold::pure("inner")))
        .catch_with(Handlers::new().on::<Other, _>(|_| Cold::pure("outer")));
    assert_eq!(handled.run_blocking().unwrap(), "outer");
}

#[test]
fn test_handler_fault_propagates_outward() {
    let handled = Cold::<u32>::raise(Oops::new("first"))
        .catch_with(Handlers::new().on::<Oops, _>(|_| Cold::raise(Other(2))))
        .catch_with(Handlers::new().on::<Other, _>(|e| Cold::pure(e.0)));
    assert_eq!(handled.run_blocking().unwrap(), 2);
}

#[test]
fn test_handler_does_not_catch_its_own_fault() {
    let calls = Counter::default();
    let c = calls.clone();
    let fault = Cold::<u32>::raise(Oops::new("first"))
        .catch_with(Handlers::new().on::<Oops, _>(move |_| {
            c.bump();
            Cold::raise(Oops::new("second"))
        }))
        .run_blocking()
        .unwrap_err();
    assert_eq!(calls.get(), 1);
    assert_eq!(fault.to_string(), "second");
}

#[test]
fn test_panicking_predicate_is_no_match() {
    let handled = Cold::<u32>::raise(Oops::new("x")).catch_with(
        Handlers::new()
            .on_when::<Oops, _, _>(
                |e| {
                    if e.0 == "x" {
                        panic!("predicate blew up");
                    }
                    true
                },
                |_| Cold::pure(1),
            )
            .on::<Oops, _>(|_| Cold::pure(2)),
    );
    assert_eq!(handled.run_blocking().unwrap(), 2);
}

#[test]
fn test_on_kind_matches_composition_faults() {
    let handled = Cold::<u32>::fail(Fault::composition("wiring"))
        .catch_with(Handlers::new().on_kind(FaultKind::Composition, |f| {
            Cold::pure(f.to_string().len() as u32)
        }));
    assert!(handled.run_blocking().unwrap() > 0);
}

#[test]
fn test_body_panic_is_catchable_fault() {
    let handled = Cold::<u32>::from_fn(|| {
        if true {
            panic!("body panic");
        }
        Ok(0)
    })
    .catch_with(Handlers::new().on_kind(FaultKind::Panicked, |_| Cold::pure(9)));
    assert_eq!(handled.run_blocking().unwrap(), 9);
}

#[test]
fn test_finally_runs_on_success_and_fault() {
    let runs = Counter::default();
    let r = runs.clone();
    let value = Cold::pure(1)
        .finally(move || {
            r.bump();
        })
        .run_blocking()
        .unwrap();
    assert_eq!(value, 1);

    let r = runs.clone();
    let fault = Cold::<u32>::raise(Oops::new("x"))
        .finally(move || {
            r.bump();
        })
        .run_blocking()
        .unwrap_err();
    assert_eq!(runs.get(), 2);
    assert!(fault.downcast_ref::<Oops>().is_some());
}

#[test]
fn test_catch_after_finally_sees_original_fault() {
    let runs = Counter::default();
    let r = runs.clone();
    let handled = Cold::<String>::raise(Oops::new("kept"))
        .finally(move || {
            r.bump();
        })
        .catch_with(Handlers::new().on::<Oops, _>(|e| Cold::pure(e.0.clone())));
    assert_eq!(handled.run_blocking().unwrap(), "kept");
    assert_eq!(runs.get(), 1);
}
