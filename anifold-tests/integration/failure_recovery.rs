//! Failure threshold and cooldown observed through the manager.

use std::sync::Arc;
use std::time::Duration;

use anifold_core::source::SearchFilters;
use anifold_core::testing::MockSource;
use anifold_core::{RequestOptions, Source, SourceError, SourceManager};

fn search_filters() -> SearchFilters {
    SearchFilters::default()
}

#[tokio::test(start_paused = true)]
async fn test_repeated_failures_move_traffic_then_recover() {
    let flaky = Arc::new(
        MockSource::new("Flaky")
            .with_title("show", "Show Flaky", 1)
            .failing(SourceError::Network {
                reason: "connection reset".to_string(),
            }),
    );
    let backup = Arc::new(MockSource::new("Backup").with_title("show", "Show Backup", 1));
    let manager = SourceManager::builder()
        .register(flaky.clone())
        .register(backup.clone())
        .build()
        .unwrap();
    let opts = RequestOptions::default();
    let threshold = flaky.tracker().threshold();

    for _ in 0..threshold {
        let page = manager
            .search("show", 1, &search_filters(), None, &opts)
            .await
            .unwrap();
        assert!(page.results.is_empty());
        assert_eq!(page.source.as_deref(), Some("Flaky"));
    }
    assert!(!flaky.is_available());

    let page = manager
        .search("show", 1, &search_filters(), None, &opts)
        .await
        .unwrap();
    assert_eq!(page.source.as_deref(), Some("Backup"));
    assert_eq!(flaky.call_count("search"), threshold as usize);

    flaky.set_failing(None);
    tokio::time::advance(flaky.tracker().recovery_window() + Duration::from_millis(1)).await;
    tokio::task::yield_now().await;
    assert!(flaky.is_available());

    let page = manager
        .search("show", 1, &search_filters(), None, &opts)
        .await
        .unwrap();
    assert_eq!(page.source.as_deref(), Some("Flaky"));
    assert_eq!(page.results[0].title, "Show Flaky");
}

#[tokio::test(start_paused = true)]
async fn test_slow_source_times_out_without_being_marked_offline() {
    let slow = Arc::new(
        MockSource::new("Slow")
            .with_title("show", "Show Slow", 1)
            .with_latency(Duration::from_secs(60)),
    );
    let manager = SourceManager::builder().register(slow.clone()).build().unwrap();
    let opts = RequestOptions::default().timeout(Duration::from_millis(200));

    for _ in 0..slow.tracker().threshold() + 1 {
        let page = manager
            .search("show", 1, &search_filters(), None, &opts)
            .await
            .unwrap();
        assert!(page.results.is_empty());
    }

    assert!(slow.is_available());
    assert_eq!(slow.tracker().consecutive_failures(), 0);
}

#[tokio::test]
async fn test_success_between_failures_resets_the_count() {
    let source = Arc::new(MockSource::new("A").with_title("show", "Show A", 1));
    let manager = SourceManager::builder().register(source.clone()).build().unwrap();
    let opts = RequestOptions::default();
    let threshold = source.tracker().threshold();

    for round in 0..3 {
        source.set_failing(Some(SourceError::Upstream {
            status: 500,
            url: format!("mock://a/trending?round={round}"),
        }));
        for _ in 0..threshold - 1 {
            manager.get_trending(1, None, &opts).await.unwrap();
        }
        source.set_failing(None);
        manager.get_trending(1, None, &opts).await.unwrap();
    }

    assert!(source.is_available());
    assert_eq!(source.tracker().consecutive_failures(), 0);
}
