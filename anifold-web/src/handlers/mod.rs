//! JSON route handlers organized by functionality

pub mod catalog;
pub mod health;
pub mod sources;
pub mod verify;
pub mod watch;

use tokio_util::sync::{CancellationToken, DropGuard};

use anifold_core::RequestOptions;

pub use catalog::{
    anime_detail, anime_episodes, episode_servers, genre_titles, genres, latest, search,
    top_rated, trending,
};
pub use health::liveness;
pub use sources::{check_sources, list_sources, set_preferred, sources_health};
pub use verify::{cached_verification, run_verification, stream_quality};
pub use watch::watch_episode;

/// Options bound to the lifetime of the handler future.
///
/// Axum drops the handler when the client disconnects; the guard then
/// cancels every source call and throttle wait made with the options.
pub(crate) fn request_scope() -> (RequestOptions, DropGuard) {
    let cancel = CancellationToken::new();
    let opts = RequestOptions::with_cancel(cancel.clone());
    (opts, cancel.drop_guard())
}

pub(crate) fn default_page() -> u32 {
    1
}
