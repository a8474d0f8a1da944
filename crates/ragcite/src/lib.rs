//! Public facade crate for `ragcite`.
//!
//! Contains no IO or provider-specific logic; it re-exports the
//! backend-agnostic types and traits from `ragcite-core`.

pub use ragcite_core::*;
