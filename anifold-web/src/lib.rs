//! Anifold Web - JSON API and streaming proxy
//!
//! Thin axum routes over the core source manager, plus the media proxy that
//! lets browsers play CDN streams that require a specific Referer.

pub mod error;
pub mod handlers;
pub mod proxy;
pub mod server;

pub use error::{ApiError, ProxyError};
pub use proxy::StreamProxy;
pub use server::{AppState, router, run_server};
