//! Admission throttle in front of real source calls.

use std::sync::Arc;
use std::time::Duration;

use anifold_core::source::SearchFilters;
use anifold_core::testing::MockSource;
use anifold_core::{AdmissionThrottle, RequestOptions, Source};
use futures::future::join_all;
use tokio::time::Instant;

#[tokio::test(start_paused = true)]
async fn test_single_slot_serialises_calls_in_arrival_order() {
    let source = Arc::new(
        MockSource::new("A")
            .with_title("show", "Show A", 1)
            .with_latency(Duration::from_millis(100)),
    );
    let throttle = AdmissionThrottle::new(1, Duration::ZERO);
    let filters = SearchFilters::default();
    let opts = RequestOptions::default();
    let started = Instant::now();

    let queries = ["first", "second", "third"];
    let results = join_all(queries.iter().map(|q| {
        throttle.run(source.search(q, 1, &filters, &opts))
    }))
    .await;

    assert!(results.iter().all(Result::is_ok));
    assert!(started.elapsed() >= Duration::from_millis(300));
    assert_eq!(
        source.calls(),
        vec!["search:first", "search:second", "search:third"]
    );
    assert_eq!(throttle.stats().dispatched, 3);
    assert_eq!(throttle.stats().active, 0);
}

#[tokio::test(start_paused = true)]
async fn test_spacing_applies_between_dispatches() {
    let source = Arc::new(MockSource::new("A"));
    let throttle = AdmissionThrottle::new(4, Duration::from_millis(250));
    let opts = RequestOptions::default();
    let started = Instant::now();

    join_all((0..4).map(|_| throttle.run(source.get_genres(&opts)))).await;

    // Four dispatches need three gaps.
    assert!(started.elapsed() >= Duration::from_millis(750));
    assert_eq!(source.call_count("genres"), 4);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_request_leaves_the_queue() {
    let source = Arc::new(MockSource::new("A").with_latency(Duration::from_millis(50)));
    let throttle = AdmissionThrottle::new(1, Duration::ZERO);
    let opts = RequestOptions::default();

    let running = tokio::spawn({
        let throttle = throttle.clone();
        let source = source.clone();
        let opts = opts.clone();
        async move { throttle.run(source.get_trending(1, &opts)).await }
    });
    tokio::task::yield_now().await;

    let abandoned = tokio::time::timeout(
        Duration::from_millis(10),
        throttle.run(source.get_latest(1, &opts)),
    )
    .await;
    assert!(abandoned.is_err());

    running.await.unwrap().unwrap();
    throttle.run(source.get_genres(&opts)).await.unwrap();

    assert_eq!(source.calls(), vec!["trending", "genres"]);
    assert_eq!(throttle.stats().queued, 0);
}
