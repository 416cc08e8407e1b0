//! Source selection across preference, priority order and ID ownership.

use std::sync::Arc;

use anifold_core::source::SearchFilters;
use anifold_core::testing::MockSource;
use anifold_core::{RequestOptions, Source, SourceManager};
use proptest::prelude::*;

use crate::fixtures::take_offline;

fn catalogue(name: &str) -> Arc<MockSource> {
    Arc::new(MockSource::new(name).with_title("show", &format!("Show {name}"), 3))
}

#[tokio::test]
async fn test_offline_preference_walks_the_priority_list() {
    let a = catalogue("A");
    let b = catalogue("B");
    let c = catalogue("C");
    take_offline(&a);
    take_offline(&b);

    let manager = SourceManager::builder()
        .register(a.clone())
        .register(b.clone())
        .register(c.clone())
        .source_order(["A", "B", "C"])
        .build()
        .unwrap();

    let result = manager
        .search("show", 1, &SearchFilters::default(), Some("A"), &RequestOptions::default())
        .await
        .unwrap();

    assert_eq!(result.source.as_deref(), Some("C"));
    assert_eq!(result.results[0].title, "Show C");
    assert_eq!(a.call_count("search"), 0);
    assert_eq!(b.call_count("search"), 0);
}

#[tokio::test]
async fn test_everything_offline_still_answers_from_primary() {
    let a = catalogue("A");
    let b = catalogue("B");
    take_offline(&a);
    take_offline(&b);

    let manager = SourceManager::builder()
        .register(a.clone())
        .register(b.clone())
        .primary("B")
        .build()
        .unwrap();

    let result = manager
        .search("show", 1, &SearchFilters::default(), None, &RequestOptions::default())
        .await
        .unwrap();
    assert_eq!(result.source.as_deref(), Some("B"));
}

#[tokio::test]
async fn test_prefixed_ids_route_to_their_owner_regardless_of_preference() {
    let zoro = catalogue("Zoro");
    let zoro_tv = Arc::new(MockSource::new("Zoro TV").with_title("show", "Show TV", 2));

    let manager = SourceManager::builder()
        .register(zoro.clone())
        .register(zoro_tv.clone())
        .preferred("Zoro")
        .build()
        .unwrap();

    let detail = manager
        .get_anime("zoro-tv-show", Some("Zoro"), &RequestOptions::default())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(detail.title, "Show TV");
    assert_eq!(zoro_tv.calls(), vec!["anime:zoro-tv-show".to_string()]);
    assert!(zoro.calls().is_empty());
}

#[tokio::test]
async fn test_episodes_carry_the_owner_prefix() {
    let a = catalogue("A");
    let manager = SourceManager::builder().register(a.clone()).build().unwrap();

    let episodes = manager
        .get_episodes("a-show", None, &RequestOptions::default())
        .await
        .unwrap();

    assert_eq!(episodes.len(), 3);
    assert!(episodes.iter().all(|e| e.id.starts_with("a-show")));
    assert_eq!(manager.source_for_id(&episodes[0].id).name(), "A");
}

proptest! {
    #[test]
    fn test_selection_prefers_any_available_source(offline in proptest::collection::vec(any::<bool>(), 1..6)) {
        let sources: Vec<Arc<MockSource>> = (0..offline.len())
            .map(|i| Arc::new(MockSource::new(&format!("S{i}"))))
            .collect();
        for (source, down) in sources.iter().zip(&offline) {
            if *down {
                take_offline(source);
            }
        }

        let manager = sources
            .iter()
            .fold(SourceManager::builder(), |builder, s| builder.register(s.clone()))
            .build()
            .unwrap();
        let selected = manager.select_source(None);

        if offline.iter().all(|down| *down) {
            prop_assert_eq!(selected.name(), "S0");
        } else {
            prop_assert!(selected.is_available());
            let first_up = offline.iter().position(|down| !*down).unwrap();
            prop_assert_eq!(selected.name(), format!("S{first_up}"));
        }
    }
}
