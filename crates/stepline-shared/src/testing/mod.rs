//! Test support. Available to this crate's own tests and, behind the
//! `test-utils` feature, to downstream test suites.

pub mod factory;
