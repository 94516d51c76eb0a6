//! Rate limiting: server back-off and the shared token bucket

use crate::support::*;
use igscraper::downloader::progress::RecordingSink;
use igscraper::downloader::rate_limit::{RateLimitError, RateLimiter};
use igscraper::shutdown::{CancelCause, CancelHandle};
use igscraper::Username;
use mockito::Server;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

#[tokio::test]
async fn test_retry_after_is_honoured() {
    let mut server = Server::new_async().await;
    let url = server.url();
    let dir = TempDir::new().unwrap();

    // Created first so it answers the first request only
    let limited = server
        .mock("GET", FEED_PATH)
        .match_query(first_page("nasa"))
        .with_status(429)
        .with_header("retry-after", "2")
        .expect(1)
        .create_async()
        .await;
    let page = mock_page(&mut server, first_page("nasa"), page_body(&url, &["A"], None, false)).await;
    let _image = mock_image(&mut server, "A").await;

    let started = Instant::now();
    let summary = coordinator(
        &url,
        config(dir.path(), 1),
        Arc::new(RecordingSink::new()),
        CancelHandle::new(),
    )
    .run(&Username::parse("nasa").unwrap(), false, false)
    .await
    .unwrap();

    assert!(started.elapsed() >= Duration::from_secs(2), "waited {:?}", started.elapsed());
    limited.assert_async().await;
    page.assert_async().await;
    assert_eq!(summary.downloaded, 1);
}

#[tokio::test(start_paused = true)]
async fn test_shared_bucket_caps_throughput() {
    let limiter = Arc::new(RateLimiter::new(120, 5));
    let acquired = Arc::new(AtomicUsize::new(0));
    let cancel = CancelHandle::new();
    let window = Duration::from_secs(30);
    let start = tokio::time::Instant::now();

    let mut tasks = tokio::task::JoinSet::new();
    for _ in 0..4 {
        let limiter = Arc::clone(&limiter);
        let acquired = Arc::clone(&acquired);
        let cancel = cancel.clone();
        tasks.spawn(async move {
            loop {
                limiter.acquire(1, &cancel).await.unwrap();
                if start.elapsed() > window {
                    break;
                }
                acquired.fetch_add(1, Ordering::SeqCst);
            }
        });
    }
    while tasks.join_next().await.is_some() {}

    // burst + rate * window
    let total = acquired.load(Ordering::SeqCst);
    assert!(total <= 5 + 2 * 30, "acquired {total}");
    assert!(total >= 50, "acquired only {total}");
}

#[tokio::test(start_paused = true)]
async fn test_waiters_wake_on_cancel() {
    let limiter = Arc::new(RateLimiter::new(1, 1));
    let cancel = CancelHandle::new();
    assert!(limiter.try_acquire(1));

    let waiter = {
        let limiter = Arc::clone(&limiter);
        let cancel = cancel.clone();
        tokio::spawn(async move { limiter.acquire(1, &cancel).await })
    };
    tokio::time::sleep(Duration::from_secs(5)).await;
    cancel.cancel(CancelCause::Interrupted);

    assert_eq!(waiter.await.unwrap(), Err(RateLimitError::Cancelled));
}

#[tokio::test]
async fn test_oversized_request_rejected() {
    let limiter = RateLimiter::new(60, 3);
    let err = limiter.acquire(4, &CancelHandle::new()).await.unwrap_err();
    assert!(matches!(err, RateLimitError::InvalidRequest { requested: 4, capacity: 3 }));
    assert!(!limiter.try_acquire(0));
}
