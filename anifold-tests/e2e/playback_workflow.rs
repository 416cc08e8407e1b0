//! Search → watch → proxied manifest → ranged segment, over real sockets.

use std::net::SocketAddr;
use std::sync::Arc;

use anifold_core::config::ProxyConfig;
use anifold_core::testing::MockSource;
use anifold_core::{AnifoldConfig, SourceManager};
use anifold_web::{AppState, router};
use axum::Router;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use parking_lot::Mutex;
use serde_json::Value;

const SEGMENT: &[u8] = b"0123456789abcdef";

const MASTER: &str = "#EXTM3U\n\
#EXT-X-VERSION:3\n\
#EXT-X-KEY:METHOD=AES-128,URI=\"key.bin\"\n\
#EXTINF:4.0,\n\
seg-1.ts\n\
#EXT-X-ENDLIST\n";

/// Referer headers received by the fake CDN.
type SeenReferers = Arc<Mutex<Vec<String>>>;

async fn master(State(seen): State<SeenReferers>, headers: HeaderMap) -> Response {
    record_referer(&seen, &headers);
    ([(header::CONTENT_TYPE, "application/vnd.apple.mpegurl")], MASTER).into_response()
}

async fn segment(State(seen): State<SeenReferers>, headers: HeaderMap) -> Response {
    record_referer(&seen, &headers);
    let total = SEGMENT.len();

    let range = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("bytes="))
        .and_then(|v| v.split_once('-'))
        .and_then(|(start, end)| Some((start.parse::<usize>().ok()?, end.parse::<usize>().ok()?)));

    match range {
        Some((start, end)) if start <= end && end < total => (
            StatusCode::PARTIAL_CONTENT,
            [
                (header::CONTENT_TYPE, "video/mp2t".to_string()),
                (header::ACCEPT_RANGES, "bytes".to_string()),
                (header::CONTENT_RANGE, format!("bytes {start}-{end}/{total}")),
            ],
            SEGMENT[start..=end].to_vec(),
        )
            .into_response(),
        _ => (
            [
                (header::CONTENT_TYPE, "video/mp2t".to_string()),
                (header::ACCEPT_RANGES, "bytes".to_string()),
            ],
            SEGMENT.to_vec(),
        )
            .into_response(),
    }
}

async fn forbidden() -> StatusCode {
    StatusCode::FORBIDDEN
}

fn record_referer(seen: &SeenReferers, headers: &HeaderMap) {
    if let Some(referer) = headers.get(header::REFERER).and_then(|v| v.to_str().ok()) {
        seen.lock().push(referer.to_string());
    }
}

async fn serve(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn fake_cdn() -> (SocketAddr, SeenReferers) {
    let seen = SeenReferers::default();
    let app = Router::new()
        .route("/hls/master.m3u8", get(master))
        .route("/hls/seg-1.ts", get(segment))
        .route("/hls/locked.ts", get(forbidden))
        .with_state(seen.clone());
    (serve(app).await, seen)
}

fn client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}

async fn json(client: &reqwest::Client, url: &str) -> Value {
    let response = client.get(url).send().await.unwrap();
    assert!(response.status().is_success(), "GET {url} -> {}", response.status());
    response.json().await.unwrap()
}

/// First non-tag line of a playlist.
fn first_uri_line(playlist: &str) -> &str {
    playlist
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty() && !line.starts_with('#'))
        .unwrap()
}

#[tokio::test]
async fn test_search_watch_and_play_through_the_proxy() {
    let (cdn, seen) = fake_cdn().await;
    let source = Arc::new(
        MockSource::new("Zoro")
            .with_title("frieren", "Frieren: Beyond Journey's End", 28)
            .with_stream("hd-1", MockSource::playable(&format!("http://{cdn}/hls/master.m3u8"))),
    );
    let manager = Arc::new(SourceManager::builder().register(source).build().unwrap());
    let state = AppState::new(manager, AnifoldConfig::for_testing()).unwrap();
    let app = serve(router(state)).await;
    let base = format!("http://{app}/api");
    let client = client();

    // Discover
    let results = json(&client, &format!("{base}/search?q=frieren")).await;
    let anime_id = results["results"][0]["id"].as_str().unwrap().to_string();
    assert_eq!(anime_id, "zoro-frieren");

    let episodes = json(&client, &format!("{base}/anime/{anime_id}/episodes")).await;
    assert_eq!(episodes["totalEpisodes"], 28);
    let episode_id = episodes["episodes"][0]["id"].as_str().unwrap().to_string();
    let encoded_episode = episode_id.replace('?', "%3F").replace('=', "%3D");

    // Resolve a stream routed through the proxy
    let watch = json(
        &client,
        &format!("{base}/watch/{encoded_episode}?server=hd-1&proxy=true"),
    )
    .await;
    assert_eq!(watch["server"], "hd-1");
    let manifest_url = watch["sources"][0]["url"].as_str().unwrap().to_string();
    assert!(manifest_url.starts_with(&format!("http://{app}/api/proxy?url=")));

    // Manifest comes back rewritten
    let response = client.get(&manifest_url).send().await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "application/vnd.apple.mpegurl"
    );
    assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    let playlist = response.text().await.unwrap();
    assert!(playlist.starts_with("#EXTM3U"));
    assert!(playlist.contains(&format!("URI=\"http://{app}/api/proxy?url=")));
    assert!(playlist.contains("key.bin"));
    let segment_url = first_uri_line(&playlist).to_string();
    assert!(segment_url.starts_with(&format!("http://{app}/api/proxy?url=")));
    assert!(segment_url.ends_with("seg-1.ts"));

    // Ranged segment fetch is forwarded and answered partially
    let response = client
        .get(&segment_url)
        .header(header::RANGE, "bytes=4-7")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::PARTIAL_CONTENT);
    assert_eq!(response.headers()[header::CONTENT_RANGE], "bytes 4-7/16");
    assert_eq!(response.headers()[header::ACCEPT_RANGES], "bytes");
    assert_eq!(response.headers()[header::CACHE_CONTROL], "public, max-age=86400");
    assert_eq!(response.bytes().await.unwrap().as_ref(), b"4567");

    // Whole segment without a Range header
    let response = client.get(&segment_url).send().await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(response.bytes().await.unwrap().as_ref(), SEGMENT);

    // Every upstream request carried the CDN referer
    let referers = seen.lock().clone();
    assert_eq!(referers.len(), 3);
    assert!(
        referers
            .iter()
            .all(|r| r == ProxyConfig::default().default_referer)
    );
}

#[tokio::test]
async fn test_upstream_refusal_is_reported_as_blocked() {
    let (cdn, _) = fake_cdn().await;
    let manager = Arc::new(
        SourceManager::builder()
            .register(Arc::new(MockSource::new("A")))
            .build()
            .unwrap(),
    );
    let state = AppState::new(manager, AnifoldConfig::for_testing()).unwrap();
    let app = serve(router(state)).await;

    let target = format!("http%3A%2F%2F{}%3A{}%2Fhls%2Flocked.ts", cdn.ip(), cdn.port());
    let response = client()
        .get(format!("http://{app}/api/proxy?url={target}"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), reqwest::StatusCode::FORBIDDEN);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["reason"], "blocked");
    assert_eq!(body["status"], 403);
}
