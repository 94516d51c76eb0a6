//! Interrupt and resume behaviour

use crate::support::*;
use igscraper::downloader::progress::{ProgressEvent, ProgressSink, RecordingSink};
use igscraper::error::ScrapeError;
use igscraper::output::ProfileLayout;
use igscraper::resume::CheckpointStore;
use igscraper::shutdown::{CancelCause, CancelHandle};
use igscraper::Username;
use mockito::Server;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

/// Records events and cancels the run after `limit` completed downloads
struct InterruptAfter {
    inner: RecordingSink,
    completed: AtomicUsize,
    limit: usize,
    cancel: CancelHandle,
}

impl ProgressSink for InterruptAfter {
    fn emit(&self, event: ProgressEvent) {
        if matches!(event, ProgressEvent::DownloadCompleted { .. })
            && self.completed.fetch_add(1, Ordering::SeqCst) + 1 == self.limit
        {
            self.cancel.cancel(CancelCause::Interrupted);
        }
        self.inner.emit(event);
    }
}

fn codes() -> Vec<String> {
    (0..10).map(|i| format!("P{i}")).collect()
}

#[tokio::test]
async fn test_interrupted_run_resumes_without_redownloading() {
    let mut server = Server::new_async().await;
    let url = server.url();
    let dir = TempDir::new().unwrap();
    let username = Username::parse("nasa").unwrap();

    let codes = codes();
    let refs: Vec<&str> = codes.iter().map(String::as_str).collect();
    let page = server
        .mock("GET", FEED_PATH)
        .match_query(first_page("nasa"))
        .with_status(200)
        .with_body(page_body(&url, &refs, None, false))
        .expect(3)
        .create_async()
        .await;

    let mut images = Vec::new();
    for code in &refs {
        images.push(
            server
                .mock("GET", format!("/img/{code}.jpg").as_str())
                .with_status(200)
                .with_body(format!("jpeg-{code}"))
                .expect(1)
                .create_async()
                .await,
        );
    }

    // First run: interrupted after four files
    let cancel = CancelHandle::new();
    let sink = Arc::new(InterruptAfter {
        inner: RecordingSink::new(),
        completed: AtomicUsize::new(0),
        limit: 4,
        cancel: cancel.clone(),
    });
    let err = coordinator(&url, config(dir.path(), 1), sink.clone(), cancel)
        .run(&username, false, false)
        .await
        .unwrap_err();
    assert_eq!(err, ScrapeError::Cancelled);

    let layout = ProfileLayout::new(dir.path(), &username);
    let checkpoint = CheckpointStore::load(&layout).unwrap().unwrap();
    assert_eq!(checkpoint.count, 4);
    assert!(!checkpoint.is_complete());
    assert_eq!(jpgs(layout.dir()).len(), 4);
    assert!(sink.inner.events().iter().any(|e| matches!(e, ProgressEvent::Log { .. })));

    // Second run: picks up the remaining six
    let summary = coordinator(
        &url,
        config(dir.path(), 1),
        Arc::new(RecordingSink::new()),
        CancelHandle::new(),
    )
    .run(&username, true, false)
    .await
    .unwrap();
    assert_eq!(summary.downloaded, 6);
    assert_eq!(summary.skipped, 4);

    let checkpoint = CheckpointStore::load(&layout).unwrap().unwrap();
    assert_eq!(checkpoint.count, 10);
    assert!(checkpoint.is_complete());
    for image in &images {
        image.assert_async().await;
    }

    // Third run: nothing new, one probe page
    let sink = Arc::new(RecordingSink::new());
    let summary = coordinator(&url, config(dir.path(), 1), sink.clone(), CancelHandle::new())
        .run(&username, true, false)
        .await
        .unwrap();
    assert_eq!(summary.downloaded, 0);
    assert_eq!(summary.pages, 1);
    assert!(matches!(
        sink.events().first(),
        Some(ProgressEvent::Started { resumed: true, already_downloaded: 10, .. })
    ));

    page.assert_async().await;
    for image in &images {
        image.assert_async().await;
    }
    assert_eq!(jpgs(layout.dir()).len(), 10);
}

#[tokio::test]
async fn test_resume_continues_from_saved_cursor() {
    let mut server = Server::new_async().await;
    let url = server.url();
    let dir = TempDir::new().unwrap();
    let username = Username::parse("nasa").unwrap();

    let layout = ProfileLayout::new(dir.path(), &username);
    layout.create().unwrap();
    std::fs::write(layout.media_path("A"), b"jpeg-A").unwrap();
    let mut checkpoint = igscraper::resume::Checkpoint::new("nasa");
    checkpoint.cursor = "p2".to_string();
    checkpoint.has_next_page = true;
    checkpoint.downloaded.insert("A".to_string());
    checkpoint.count = 1;
    CheckpointStore::new(layout.clone(), checkpoint).save().unwrap();

    let first = server
        .mock("GET", FEED_PATH)
        .match_query(first_page("nasa"))
        .with_status(200)
        .with_body(page_body(&url, &["A"], Some("p2"), true))
        .expect(0)
        .create_async()
        .await;
    let second = server
        .mock("GET", FEED_PATH)
        .match_query(page_after("p2"))
        .with_status(200)
        .with_body(page_body(&url, &["B"], None, false))
        .expect(1)
        .create_async()
        .await;
    let image = mock_image(&mut server, "B").await;

    let summary = coordinator(
        &url,
        config(dir.path(), 2),
        Arc::new(RecordingSink::new()),
        CancelHandle::new(),
    )
    .run(&username, true, false)
    .await
    .unwrap();

    first.assert_async().await;
    second.assert_async().await;
    image.assert_async().await;
    assert_eq!(summary.downloaded, 1);
    assert_eq!(summary.pages, 1);

    let checkpoint = CheckpointStore::load(&layout).unwrap().unwrap();
    assert_eq!(checkpoint.count, 2);
    assert!(checkpoint.is_complete());
}

#[tokio::test]
async fn test_force_restart_discards_checkpoint() {
    let mut server = Server::new_async().await;
    let url = server.url();
    let dir = TempDir::new().unwrap();
    let username = Username::parse("nasa").unwrap();

    let layout = ProfileLayout::new(dir.path(), &username);
    layout.create().unwrap();
    let mut checkpoint = igscraper::resume::Checkpoint::new("nasa");
    checkpoint.cursor = "stale".to_string();
    checkpoint.has_next_page = true;
    CheckpointStore::new(layout.clone(), checkpoint).save().unwrap();

    let _page = mock_page(&mut server, first_page("nasa"), page_body(&url, &["A"], None, false)).await;
    let _image = mock_image(&mut server, "A").await;

    let summary = coordinator(
        &url,
        config(dir.path(), 1),
        Arc::new(RecordingSink::new()),
        CancelHandle::new(),
    )
    .run(&username, false, true)
    .await
    .unwrap();
    assert_eq!(summary.downloaded, 1);
    let checkpoint = CheckpointStore::load(&layout).unwrap().unwrap();
    assert_eq!(checkpoint.cursor, "");
    assert!(checkpoint.is_complete());
}
