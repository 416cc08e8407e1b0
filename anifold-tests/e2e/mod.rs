//! End-to-end tests for Anifold
//!
//! These tests run the real HTTP server on a loopback socket next to a fake
//! CDN and walk complete user workflows: discovering a title, resolving a
//! stream and playing it back through the proxy.

mod playback_workflow;
