//! Property-based tests for composition laws

mod composition;
