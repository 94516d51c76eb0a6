//! Shared fixtures: a mock feed server and a coordinator wired to it

use igscraper::auth::Account;
use igscraper::config::Config;
use igscraper::downloader::progress::ProgressSink;
use igscraper::downloader::retry::{ClassPolicy, RetryPolicy};
use igscraper::downloader::Coordinator;
use igscraper::shutdown::CancelHandle;
use mockito::{Matcher, Mock, ServerGuard};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub const FEED_PATH: &str = "/api/v1/users/web_profile_info/";

/// Feed page JSON whose image URLs point back at `server_url`
pub fn page_body(server_url: &str, codes: &[&str], end_cursor: Option<&str>, has_next: bool) -> String {
    let edges: Vec<serde_json::Value> = codes
        .iter()
        .map(|code| {
            serde_json::json!({"node": {
                "shortcode": code,
                "display_url": format!("{server_url}/img/{code}.jpg"),
                "is_video": false,
                "edge_media_to_caption": {"edges": [{"node": {"text": format!("caption {code}")}}]},
                "edge_liked_by": {"count": 7},
                "taken_at_timestamp": 1_700_000_000
            }})
        })
        .collect();
    serde_json::json!({
        "data": {"user": {
            "id": "1",
            "is_private": false,
            "edge_owner_to_timeline_media": {
                "count": codes.len(),
                "page_info": {"end_cursor": end_cursor, "has_next_page": has_next},
                "edges": edges
            }
        }},
        "status": "ok"
    })
    .to_string()
}

/// Matcher for the first page of `username`
pub fn first_page(username: &str) -> Matcher {
    Matcher::Regex(format!("^username={username}&count=12$"))
}

/// Matcher for the page requested with `cursor`
pub fn page_after(cursor: &str) -> Matcher {
    Matcher::UrlEncoded("max_id".into(), cursor.into())
}

/// Serve a feed page
pub async fn mock_page(server: &mut ServerGuard, query: Matcher, body: String) -> Mock {
    server
        .mock("GET", FEED_PATH)
        .match_query(query)
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(body)
        .create_async()
        .await
}

/// Serve one image
pub async fn mock_image(server: &mut ServerGuard, code: &str) -> Mock {
    server
        .mock("GET", format!("/img/{code}.jpg").as_str())
        .with_status(200)
        .with_header("content-type", "image/jpeg")
        .with_body(format!("\u{ff}\u{d8}jpeg-{code}"))
        .create_async()
        .await
}

/// Fast retries so failures resolve in milliseconds
pub fn fast_retry() -> RetryPolicy {
    let fast = ClassPolicy::new(3, Duration::from_millis(5));
    RetryPolicy::new(fast, fast, fast)
}

/// Settings with a generous rate limit and output under `dir`
pub fn config(dir: &Path, workers: usize) -> Config {
    let mut config = Config::default();
    config.output.base_directory = dir.to_path_buf();
    config.download.concurrent_downloads = workers;
    config.rate_limit.requests_per_minute = 6_000;
    config.rate_limit.burst_size = 100;
    config.download.download_timeout_secs = 5;
    config
}

/// Coordinator against the mock server
pub fn coordinator(
    server_url: &str,
    config: Config,
    sink: Arc<dyn ProgressSink>,
    cancel: CancelHandle,
) -> Coordinator {
    Coordinator::new(config, Account::new("tester", "sessionid-0123456789", "csrftoken-9876543210"), sink, cancel)
        .unwrap()
        .with_base_url(server_url)
        .with_retry_policy(fast_retry())
}

/// Short-codes of the `.jpg` files in `dir`
pub fn jpgs(dir: &Path) -> BTreeSet<String> {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .map(|e| e.path())
                .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("jpg"))
                .filter_map(|p| p.file_stem().and_then(|s| s.to_str()).map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}
