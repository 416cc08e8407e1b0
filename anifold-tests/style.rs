//! Style Enforcement Tests
//!
//! Scans the production sources of every workspace crate for patterns clippy
//! does not reject on its own.
//!
//! - `dead_code_enforcement` - No `#[allow(dead_code)]` and no `.unwrap()`
//!   outside test modules

#[path = "style/dead_code_enforcement.rs"]
mod dead_code_enforcement;
