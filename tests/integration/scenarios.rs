//! End-to-end scenarios: delayed arithmetic, nesting, throw/catch, long loops, laziness.

use std::time::Duration;

use fasync::{sleep, yield_now, Cold, Fault, Handlers, HotFuture};

use super::test_utils::{add_cold, add_hot, Counter, Flag, Oops};

#[test]
fn test_delayed_add_hot() {
    assert_eq!(add_hot(1, 2).wait().unwrap(), 3);
}

#[test]
fn test_delayed_add_cold() {
    assert_eq!(add_cold(1, 2).run_blocking().unwrap(), 3);
    assert_eq!(add_cold(1, 2).run_as_future().wait().unwrap(), 3);
}

#[test]
fn test_nested_calls() {
    let nested = Cold::nested(add_cold(1, 2))
        .and_then(|a| Cold::nested(add_cold(3, 4)).map(move |b| a + b));
    assert_eq!(nested.run_blocking().unwrap(), 10);

    let spliced = add_cold(1, 2).and_then(|a| add_cold(3, 4).map(move |b| a + b));
    assert_eq!(spliced.run_as_future().wait().unwrap(), 10);
}

#[test]
fn test_nested_mixes_hot_and_cold() {
    let mixed = Cold::delay(|| Cold::await_hot(add_hot(1, 2)))
        .and_then(|a| add_cold(3, 4).map(move |b| a + b));
    assert_eq!(mixed.run_blocking().unwrap(), 10);
}

#[test]
fn test_direct_throw_and_catch() {
    let caught = Cold::<String>::raise(Oops::new("thrown"))
        .catch_with(Handlers::new().on::<Oops, _>(|_| Cold::pure("caught".to_string())));
    assert_eq!(caught.run_blocking().unwrap(), "caught");
}

fn thrower(msg: &'static str) -> Cold<String> {
    yield_now().try_map(move |_| Err(Fault::user(Oops::new(msg))))
}

#[test]
fn test_catcher_over_thrower() {
    let catch_all = Flag::default();
    let seen = catch_all.clone();
    let catcher = thrower("bad")
        .catch_when::<Oops, _, _>(|e| e.0 == "bad", |_| Cold::pure("good".to_string()))
        .catch_with(Handlers::new().on_any(move |_| {
            seen.set();
            Cold::pure("catch-all".to_string())
        }));

    assert_eq!(catcher.run_blocking().unwrap(), "good");
    assert!(!catch_all.is_set());
}

#[test]
fn test_non_matching_filter_surfaces_fault() {
    let unmatched = thrower("bad")
        .catch_when::<Oops, _, _>(|e| e.0 == "worse", |_| Cold::pure("good".to_string()));
    let fault = unmatched.run_blocking().unwrap_err();
    assert_eq!(fault.downcast_ref::<Oops>(), Some(&Oops::new("bad")));
}

fn long_loop(iterations: usize) -> Cold<i32> {
    Cold::repeat(iterations, |_| yield_now().then(sleep(Duration::ZERO))).map(|_| 0)
}

#[test]
fn test_long_loop_blocking() {
    assert_eq!(long_loop(10_000).run_blocking().unwrap(), 0);
    assert_eq!(long_loop(1).run_blocking().unwrap(), 0);
}

#[test]
fn test_long_loop_as_future() {
    assert_eq!(long_loop(10_000).run_as_future().wait().unwrap(), 0);
}

#[test]
fn test_long_loop_on_small_stack() {
    // 256 KiB is far too little for one native frame per suspension.
    let handle = std::thread::Builder::new()
        .stack_size(256 * 1024)
        .spawn(|| long_loop(10_000).run_blocking())
        .unwrap();
    assert_eq!(handle.join().unwrap().unwrap(), 0);
}

/// Plain sequential composition, no `repeat`: each fold step wraps the chain so far.
fn then_chain(steps: usize) -> Cold<()> {
    (0..steps).fold(Cold::pure(()), |acc, _| acc.then(yield_now()))
}

fn and_then_chain(steps: i64) -> Cold<i64> {
    (0..steps).fold(Cold::pure(0i64), |acc, i| {
        acc.and_then(move |total| add_cold_zero(total, i))
    })
}

/// `total + i` behind a zero-length sleep.
fn add_cold_zero(total: i64, i: i64) -> Cold<i64> {
    sleep(Duration::ZERO).map(move |_| total + i)
}

fn on_small_stack<T, F>(f: F) -> T
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    std::thread::Builder::new()
        .stack_size(256 * 1024)
        .spawn(f)
        .unwrap()
        .join()
        .unwrap()
}

#[test]
fn test_then_fold_on_small_stack() {
    let outcome = on_small_stack(|| then_chain(10_000).run_blocking());
    assert!(outcome.is_ok());
}

#[test]
fn test_then_fold_as_future() {
    let hot = on_small_stack(|| then_chain(10_000).run_as_future());
    assert!(hot.wait().is_ok());
}

#[test]
fn test_and_then_fold_both_drivers() {
    let expected: i64 = (0..10_000).sum();
    assert_eq!(
        on_small_stack(|| and_then_chain(10_000).run_blocking()).unwrap(),
        expected
    );
    assert_eq!(
        on_small_stack(|| and_then_chain(10_000).run_as_future())
            .wait()
            .unwrap(),
        expected
    );
}

#[test]
fn test_guarded_fold_on_small_stack() {
    let outcome = on_small_stack(|| {
        (0..10_000)
            .fold(Cold::pure(0u32), |acc, _| {
                acc.map(|v| v + 1)
                    .catch_with(Handlers::new().on::<Oops, _>(|_| Cold::pure(0)))
                    .finally(|| {})
            })
            .run_blocking()
    });
    assert_eq!(outcome.unwrap(), 10_000);
}

#[test]
fn test_cold_is_lazy_hot_is_eager() {
    let cold_flag = Flag::default();
    let f = cold_flag.clone();
    let cold = Cold::from_fn(move || {
        f.set();
        Ok(1)
    });
    assert!(!cold_flag.is_set());
    assert_eq!(cold.run_blocking().unwrap(), 1);
    assert!(cold_flag.is_set());

    let hot_flag = Flag::default();
    let start_hot = |flag: Flag| {
        flag.set();
        HotFuture::ready(1)
    };
    let hot = start_hot(hot_flag.clone());
    assert!(hot_flag.is_set());
    assert_eq!(hot.wait().unwrap(), 1);
}

#[test]
fn test_each_start_reruns_body() {
    let runs = Counter::default();
    let r = runs.clone();
    let computation =
        Cold::from_fn(move || Ok(r.bump())).and_then(|n| sleep(Duration::ZERO).map(move |_| n));
    assert_eq!(computation.run_blocking().unwrap(), 1);
    assert_eq!(computation.run_as_future().wait().unwrap(), 2);
    assert_eq!(runs.get(), 2);
}
