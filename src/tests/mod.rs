//! tests/mod.rs
mod dispatch_tests;
pub(crate) mod support;
