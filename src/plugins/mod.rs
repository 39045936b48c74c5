//! Internal "plugin" modules (crate-local sub-systems).
//!
//! Regular Rust modules with a stable boundary so other parts of the app can
//! depend on them without tight coupling.

pub mod history;
