//! End-to-end pipeline runs against a mock feed

use crate::support::*;
use igscraper::downloader::progress::{ProgressEvent, RecordingSink, SkipReason};
use igscraper::error::ScrapeError;
use igscraper::output::metadata::ProfileMetadata;
use igscraper::output::ProfileLayout;
use igscraper::resume::CheckpointStore;
use igscraper::shutdown::CancelHandle;
use igscraper::Username;
use mockito::Server;
use std::collections::BTreeSet;
use std::sync::Arc;
use tempfile::TempDir;

fn layout(dir: &TempDir, username: &str) -> ProfileLayout {
    ProfileLayout::new(dir.path(), &Username::parse(username).unwrap())
}

fn set(codes: &[&str]) -> BTreeSet<String> {
    codes.iter().map(|c| c.to_string()).collect()
}

#[tokio::test]
async fn test_single_page_profile_downloads_everything() {
    let mut server = Server::new_async().await;
    let url = server.url();
    let dir = TempDir::new().unwrap();

    let page = mock_page(
        &mut server,
        first_page("nasa"),
        page_body(&url, &["A", "B", "C"], None, false),
    )
    .await;
    let mut images = Vec::new();
    for code in ["A", "B", "C"] {
        images.push(mock_image(&mut server, code).await);
    }

    let sink = Arc::new(RecordingSink::new());
    let summary = coordinator(&url, config(dir.path(), 2), sink.clone(), CancelHandle::new())
        .run(&Username::parse("nasa").unwrap(), false, false)
        .await
        .unwrap();

    page.assert_async().await;
    for image in &images {
        image.assert_async().await;
    }

    assert_eq!(summary.downloaded, 3);
    assert_eq!(summary.skipped, 0);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.pages, 1);

    let layout = layout(&dir, "nasa");
    assert_eq!(jpgs(layout.dir()), set(&["A", "B", "C"]));

    let checkpoint = CheckpointStore::load(&layout).unwrap().unwrap();
    assert_eq!(checkpoint.count, 3);
    assert!(!checkpoint.has_next_page);
    assert!(checkpoint.is_complete());

    let metadata = ProfileMetadata::load(&layout.metadata_path()).unwrap().unwrap();
    assert_eq!(metadata.username, "nasa");
    assert_eq!(metadata.photos.len(), 3);
    assert!(metadata
        .photos
        .iter()
        .all(|p| p.caption.as_deref() == Some(&format!("caption {}", p.shortcode)[..])));

    let events = sink.events();
    assert!(matches!(events.first(), Some(ProgressEvent::Started { resumed: false, .. })));
    assert!(matches!(events.last(), Some(ProgressEvent::Done(s)) if s.downloaded == 3));
}

#[tokio::test]
async fn test_expired_session_aborts_before_downloading() {
    let mut server = Server::new_async().await;
    let url = server.url();
    let dir = TempDir::new().unwrap();

    let page = server
        .mock("GET", FEED_PATH)
        .match_query(first_page("nasa"))
        .with_status(401)
        .expect(1)
        .create_async()
        .await;

    let err = coordinator(
        &url,
        config(dir.path(), 3),
        Arc::new(RecordingSink::new()),
        CancelHandle::new(),
    )
    .run(&Username::parse("nasa").unwrap(), false, false)
    .await
    .unwrap_err();

    page.assert_async().await;
    assert!(matches!(err, ScrapeError::AuthInvalid { status: 401 }), "got {err:?}");
    assert!(jpgs(layout(&dir, "nasa").dir()).is_empty());
}

#[tokio::test]
async fn test_duplicate_across_pages_downloaded_once() {
    let mut server = Server::new_async().await;
    let url = server.url();
    let dir = TempDir::new().unwrap();

    let _pages = vec![
        mock_page(
            &mut server,
            first_page("nasa"),
            page_body(&url, &["A", "X"], Some("p2"), true),
        )
        .await,
        mock_page(
            &mut server,
            page_after("p2"),
            page_body(&url, &["X", "B"], None, false),
        )
        .await,
    ];
    let duplicate = server
        .mock("GET", "/img/X.jpg")
        .with_status(200)
        .with_body("jpeg-X")
        .expect(1)
        .create_async()
        .await;
    let _images = vec![mock_image(&mut server, "A").await, mock_image(&mut server, "B").await];

    let sink = Arc::new(RecordingSink::new());
    let summary = coordinator(&url, config(dir.path(), 2), sink.clone(), CancelHandle::new())
        .run(&Username::parse("nasa").unwrap(), false, false)
        .await
        .unwrap();

    duplicate.assert_async().await;
    assert_eq!(summary.downloaded, 3);
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.pages, 2);
    assert_eq!(jpgs(layout(&dir, "nasa").dir()), set(&["A", "B", "X"]));
    assert!(sink.events().iter().any(|e| matches!(
        e,
        ProgressEvent::DownloadSkipped { shortcode, reason: SkipReason::Duplicate } if shortcode == "X"
    )));
}

#[tokio::test]
async fn test_repeated_cursor_ends_pagination() {
    let mut server = Server::new_async().await;
    let url = server.url();
    let dir = TempDir::new().unwrap();

    let first = mock_page(
        &mut server,
        first_page("nasa"),
        page_body(&url, &["A"], Some("loop"), true),
    )
    .await;
    let looping = server
        .mock("GET", FEED_PATH)
        .match_query(page_after("loop"))
        .with_status(200)
        .with_body(page_body(&url, &["B"], Some("loop"), true))
        .expect(1)
        .create_async()
        .await;
    let _images = vec![mock_image(&mut server, "A").await, mock_image(&mut server, "B").await];

    let summary = coordinator(
        &url,
        config(dir.path(), 2),
        Arc::new(RecordingSink::new()),
        CancelHandle::new(),
    )
    .run(&Username::parse("nasa").unwrap(), false, false)
    .await
    .unwrap();

    first.assert_async().await;
    looping.assert_async().await;
    assert_eq!(summary.pages, 2);
    assert_eq!(summary.downloaded, 2);

    let checkpoint = CheckpointStore::load(&layout(&dir, "nasa")).unwrap().unwrap();
    assert!(!checkpoint.has_next_page);
}

#[tokio::test]
async fn test_failed_image_keeps_cursor_and_is_retried_on_resume() {
    let mut server = Server::new_async().await;
    let url = server.url();
    let dir = TempDir::new().unwrap();
    let username = Username::parse("nasa").unwrap();

    let _page = mock_page(
        &mut server,
        first_page("nasa"),
        page_body(&url, &["A", "B"], None, false),
    )
    .await;
    let a = server
        .mock("GET", "/img/A.jpg")
        .with_status(200)
        .with_body("jpeg-A")
        .expect(1)
        .create_async()
        .await;
    let broken = server
        .mock("GET", "/img/B.jpg")
        .with_status(500)
        .expect(3)
        .create_async()
        .await;

    let summary = coordinator(
        &url,
        config(dir.path(), 2),
        Arc::new(RecordingSink::new()),
        CancelHandle::new(),
    )
    .run(&username, false, false)
    .await
    .unwrap();

    broken.assert_async().await;
    assert_eq!(summary.downloaded, 1);
    assert_eq!(summary.failed, 1);

    let checkpoint = CheckpointStore::load(&layout(&dir, "nasa")).unwrap().unwrap();
    assert_eq!(checkpoint.cursor, "");
    assert!(checkpoint.has_next_page);
    assert!(!checkpoint.is_complete());

    broken.remove_async().await;
    let fixed = mock_image(&mut server, "B").await;

    let summary = coordinator(
        &url,
        config(dir.path(), 2),
        Arc::new(RecordingSink::new()),
        CancelHandle::new(),
    )
    .run(&username, true, false)
    .await
    .unwrap();

    a.assert_async().await;
    fixed.assert_async().await;
    assert_eq!(summary.downloaded, 1);
    assert_eq!(summary.skipped, 1);
    assert_eq!(jpgs(layout(&dir, "nasa").dir()), set(&["A", "B"]));

    let checkpoint = CheckpointStore::load(&layout(&dir, "nasa")).unwrap().unwrap();
    assert_eq!(checkpoint.count, 2);
    assert!(checkpoint.is_complete());
}

#[tokio::test]
async fn test_in_flight_downloads_bounded_by_workers() {
    let mut server = Server::new_async().await;
    let url = server.url();
    let dir = TempDir::new().unwrap();

    let codes: Vec<String> = (0..12).map(|i| format!("C{i:02}")).collect();
    let refs: Vec<&str> = codes.iter().map(String::as_str).collect();
    let _page = mock_page(&mut server, first_page("nasa"), page_body(&url, &refs, None, false)).await;
    let mut images = Vec::new();
    for code in &refs {
        images.push(mock_image(&mut server, code).await);
    }

    let sink = Arc::new(RecordingSink::new());
    let summary = coordinator(&url, config(dir.path(), 2), sink.clone(), CancelHandle::new())
        .run(&Username::parse("nasa").unwrap(), false, false)
        .await
        .unwrap();
    assert_eq!(summary.downloaded, 12);

    let mut in_flight: i64 = 0;
    let mut peak = 0;
    for event in sink.events() {
        match event {
            ProgressEvent::DownloadStarted { .. } => in_flight += 1,
            ProgressEvent::DownloadCompleted { .. } | ProgressEvent::DownloadFailed { .. } => in_flight -= 1,
            _ => {}
        }
        peak = peak.max(in_flight);
    }
    assert!(peak <= 2, "peak in-flight {peak}");
    assert_eq!(in_flight, 0);
}

#[tokio::test]
async fn test_non_empty_checkpoint_needs_resume_or_restart() {
    let mut server = Server::new_async().await;
    let url = server.url();
    let dir = TempDir::new().unwrap();
    let username = Username::parse("nasa").unwrap();

    let _page = mock_page(&mut server, first_page("nasa"), page_body(&url, &["A"], None, false)).await;
    let _image = mock_image(&mut server, "A").await;

    let run = |resume, restart| {
        let url = url.clone();
        let cfg = config(dir.path(), 1);
        let username = username.clone();
        async move {
            coordinator(&url, cfg, Arc::new(RecordingSink::new()), CancelHandle::new())
                .run(&username, resume, restart)
                .await
        }
    };

    run(false, false).await.unwrap();
    let err = run(false, false).await.unwrap_err();
    assert!(matches!(err, ScrapeError::CheckpointIncompatible(_)), "got {err:?}");

    std::fs::remove_file(layout(&dir, "nasa").media_path("A")).unwrap();
    let summary = run(false, true).await.unwrap();
    assert_eq!(summary.downloaded, 1);
}
