//! Shared test utilities for integration tests

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use fasync::{sleep, Cold, HotFuture};

/// Error type raised by test bodies.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct Oops(pub String);

impl Oops {
    pub fn new(msg: &str) -> Self {
        Self(msg.to_string())
    }
}

/// Addition behind a short timer wait, as a cold computation.
pub fn add_cold(x: i32, y: i32) -> Cold<i32> {
    sleep(Duration::from_millis(5)).map(move |_| x + y)
}

/// Addition behind a short timer wait, started immediately.
pub fn add_hot(x: i32, y: i32) -> HotFuture<i32> {
    HotFuture::spawn(async move {
        tokio::time::sleep(Duration::from_millis(5)).await;
        Ok(x + y)
    })
}

#[derive(Clone, Default)]
pub struct Flag(Arc<AtomicBool>);

impl Flag {
    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Default)]
pub struct Counter(Arc<AtomicUsize>);

impl Counter {
    pub fn bump(&self) -> usize {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}
