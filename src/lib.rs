//! Statement binding and result streaming over an in-process database link.
//!
//! Native links live in their own crates (`bindery-sqlite`), this crate
//! re-exports the binding layer they are built on.

pub use bindery_core::*;
