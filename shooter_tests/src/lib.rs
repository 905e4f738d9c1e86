//! Integration test support for the shooter crates.
//!
//! The actual tests live in `tests/`; this crate exists to pull the three
//! shooter crates together under one test target.
