//! Integration tests for Anifold
//!
//! These tests drive the source manager, verifier and HTTP router together
//! against scripted in-memory sources. They check component interactions and
//! the JSON contracts of the API, not individual functions.

#[path = "integration/fixtures.rs"]
mod fixtures;

#[path = "integration/source_selection.rs"]
mod source_selection;

#[path = "integration/failure_recovery.rs"]
mod failure_recovery;

#[path = "integration/throttle_admission.rs"]
mod throttle_admission;

#[path = "integration/watch_fallback.rs"]
mod watch_fallback;

#[path = "integration/proxy_guard.rs"]
mod proxy_guard;

#[path = "integration/sources_api.rs"]
mod sources_api;

#[path = "integration/verification.rs"]
mod verification;

#[path = "style.rs"]
mod style;
