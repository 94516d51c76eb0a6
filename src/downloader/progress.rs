//! Progress reporting for a scrape run.
//!
//! The pipeline pushes [`ProgressEvent`]s through a single
//! [`ProgressSink::emit`] method and polls [`ProgressSink::is_paused`] before
//! each download. It never knows which sink is attached.
//!
//! [`LineSink`] is the terminal implementation: plain lines in
//! [`DisplayMode::Normal`] and [`DisplayMode::Verbose`], an `indicatif` bar in
//! [`DisplayMode::Progress`], and errors only in [`DisplayMode::Quiet`].

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use super::coordinator::RunSummary;
use super::rate_limit::RateLimitSnapshot;
use crate::error::ErrorKind;

/// Why an item was not downloaded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Recorded in the checkpoint
    InCheckpoint,
    /// A non-empty file already exists
    OnDisk,
    /// Another worker is already handling the same short-code
    Duplicate,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::InCheckpoint => "already downloaded",
            Self::OnDisk => "file exists",
            Self::Duplicate => "duplicate",
        })
    }
}

/// Severity of a free-form log event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Neutral information
    Info,
    /// Something finished well
    Success,
    /// Degraded but continuing
    Warning,
    /// A failure
    Error,
}

/// Everything a sink can be told
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    /// Run begins
    Started {
        /// Target profile
        username: String,
        /// Continuing from a checkpoint
        resumed: bool,
        /// Downloads already recorded in the checkpoint
        already_downloaded: usize,
    },
    /// A feed page was fetched
    PageFetched {
        /// Page index (0-based)
        index: u32,
        /// Image items on the page
        items: usize,
        /// Total posts reported by the profile
        total: Option<u64>,
    },
    /// A worker started downloading an item
    DownloadStarted {
        /// Item short-code
        shortcode: String,
    },
    /// Running totals after an item finished
    Progress {
        /// Items completed this run
        completed: usize,
        /// Items skipped this run
        skipped: usize,
        /// Items failed this run
        failed: usize,
        /// Items seen so far
        seen: usize,
    },
    /// Item written to disk
    DownloadCompleted {
        /// Item short-code
        shortcode: String,
        /// Bytes written
        bytes: u64,
    },
    /// Item not downloaded
    DownloadSkipped {
        /// Item short-code
        shortcode: String,
        /// Why
        reason: SkipReason,
    },
    /// Item failed permanently
    DownloadFailed {
        /// Item short-code
        shortcode: String,
        /// Error category
        kind: ErrorKind,
        /// Error message
        error: String,
    },
    /// Rate limiter state
    RateLimit(RateLimitSnapshot),
    /// Free-form message
    Log {
        /// Severity
        level: LogLevel,
        /// Text
        message: String,
    },
    /// Run finished
    Done(RunSummary),
}

/// Consumer of pipeline events
pub trait ProgressSink: Send + Sync {
    /// Deliver one event. Must not block for long.
    fn emit(&self, event: ProgressEvent);

    /// Workers wait before starting new downloads while this is true
    fn is_paused(&self) -> bool {
        false
    }
}

/// How much the terminal sink prints
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DisplayMode {
    /// Errors only
    Quiet,
    /// One line per finished item
    #[default]
    Normal,
    /// Also pages, skips and rate-limit state
    Verbose,
    /// A single progress bar
    Progress,
}

impl DisplayMode {
    /// Resolve from CLI flags; quiet wins, then progress, then verbose.
    pub fn from_flags(quiet: bool, progress: bool, verbose: bool) -> Self {
        if quiet {
            Self::Quiet
        } else if progress {
            Self::Progress
        } else if verbose {
            Self::Verbose
        } else {
            Self::Normal
        }
    }
}

/// Sink that discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl ProgressSink for NullSink {
    fn emit(&self, _event: ProgressEvent) {}
}

/// Terminal sink printing lines or a progress bar
#[derive(Debug)]
pub struct LineSink {
    mode: DisplayMode,
    color: bool,
    bar: Mutex<Option<ProgressBar>>,
    paused: AtomicBool,
}

impl LineSink {
    /// Sink for `mode` with colors enabled
    pub fn new(mode: DisplayMode) -> Self {
        Self {
            mode,
            color: true,
            bar: Mutex::new(None),
            paused: AtomicBool::new(false),
        }
    }

    /// Disable colors even when stdout is a terminal
    pub fn without_color(mut self) -> Self {
        self.color = false;
        self
    }

    /// Current display mode
    pub fn mode(&self) -> DisplayMode {
        self.mode
    }

    /// Pause or resume new downloads
    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
    }

    fn paint(&self, text: &str, style: Style) -> String {
        if self.color {
            style.apply_to(text).to_string()
        } else {
            text.to_string()
        }
    }

    fn print(&self, line: String) {
        let bar = self.bar.lock().unwrap_or_else(PoisonError::into_inner);
        match bar.as_ref() {
            Some(bar) => bar.println(line),
            None => println!("{line}"),
        }
    }

    fn with_bar(&self, f: impl FnOnce(&ProgressBar)) {
        let bar = self.bar.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(bar) = bar.as_ref() {
            f(bar);
        }
    }

    fn start_bar(&self, total: u64) {
        let mut slot = self.bar.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return;
        }
        let bar = ProgressBar::new(total);
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        bar.set_style(style.progress_chars("#>-"));
        bar.enable_steady_tick(Duration::from_millis(120));
        *slot = Some(bar);
    }

    fn finish_bar(&self) {
        let mut slot = self.bar.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(bar) = slot.take() {
            bar.finish_and_clear();
        }
    }
}

impl ProgressSink for LineSink {
    fn emit(&self, event: ProgressEvent) {
        let verbose = self.mode == DisplayMode::Verbose;
        let quiet = self.mode == DisplayMode::Quiet;
        let bar_mode = self.mode == DisplayMode::Progress;

        match event {
            ProgressEvent::Started {
                username,
                resumed,
                already_downloaded,
            } => {
                if bar_mode {
                    self.start_bar(0);
                    self.with_bar(|bar| bar.set_message(format!("@{username}")));
                } else if !quiet {
                    let verb = if resumed { "Resuming" } else { "Downloading" };
                    let mut line = format!("{verb} photos from @{username}");
                    if resumed && already_downloaded > 0 {
                        line.push_str(&format!(" ({already_downloaded} already downloaded)"));
                    }
                    self.print(self.paint(&line, Style::new().bold()));
                }
            }
            ProgressEvent::PageFetched { index, items, total } => {
                if let Some(total) = total {
                    self.with_bar(|bar| bar.set_length(total));
                }
                if verbose {
                    self.print(format!("Page {}: {items} photos", index + 1));
                }
            }
            ProgressEvent::DownloadStarted { shortcode } => {
                if verbose {
                    self.print(format!("  ... {shortcode}"));
                }
            }
            ProgressEvent::Progress { completed, skipped, failed, seen } => {
                self.with_bar(|bar| {
                    bar.set_position((completed + skipped + failed) as u64);
                    if bar.length().unwrap_or(0) < seen as u64 {
                        bar.set_length(seen as u64);
                    }
                });
            }
            ProgressEvent::DownloadCompleted { shortcode, bytes } => {
                if !quiet && !bar_mode {
                    let mark = self.paint("✓", Style::new().green());
                    self.print(format!("{mark} {shortcode}.jpg ({})", human_bytes(bytes)));
                }
            }
            ProgressEvent::DownloadSkipped { shortcode, reason } => {
                if verbose {
                    self.print(format!("- {shortcode} ({reason})"));
                }
            }
            ProgressEvent::DownloadFailed { shortcode, kind, error } => {
                let mark = self.paint("✗", Style::new().red());
                self.print(format!("{mark} {shortcode}: {kind}: {error}"));
            }
            ProgressEvent::RateLimit(snapshot) => {
                if verbose && snapshot.available == 0 {
                    self.print(format!(
                        "Rate limit reached, next slot in {:.1}s",
                        snapshot.full_in.as_secs_f64() / f64::from(snapshot.capacity.max(1))
                    ));
                }
            }
            ProgressEvent::Log { level, message } => match level {
                LogLevel::Error => self.print(self.paint(&message, Style::new().red())),
                LogLevel::Warning if !quiet => self.print(self.paint(&message, Style::new().yellow())),
                LogLevel::Success if !quiet => self.print(self.paint(&message, Style::new().green())),
                LogLevel::Info if !quiet => self.print(message),
                _ => {}
            },
            ProgressEvent::Done(summary) => {
                self.finish_bar();
                if !quiet {
                    self.print(self.paint(&summary.to_string(), Style::new().bold()));
                }
            }
        }
    }

    fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }
}

/// Sink that keeps every event, for tests and embedding
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<ProgressEvent>>,
    paused: AtomicBool,
}

impl RecordingSink {
    /// Empty recorder
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything emitted so far
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Pause or resume new downloads
    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
    }
}

impl ProgressSink for RecordingSink {
    fn emit(&self, event: ProgressEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }

    fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }
}

/// `1.5 MB` style sizes
pub fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_mode_precedence() {
        assert_eq!(DisplayMode::from_flags(true, true, true), DisplayMode::Quiet);
        assert_eq!(DisplayMode::from_flags(false, true, true), DisplayMode::Progress);
        assert_eq!(DisplayMode::from_flags(false, false, true), DisplayMode::Verbose);
        assert_eq!(DisplayMode::from_flags(false, false, false), DisplayMode::Normal);
    }

    #[test]
    fn test_paint_respects_no_color() {
        let sink = LineSink::new(DisplayMode::Normal).without_color();
        let painted = sink.paint("done", Style::new().green().force_styling(true));
        assert_eq!(painted, "done");

        let sink = LineSink::new(DisplayMode::Normal);
        let painted = sink.paint("done", Style::new().green().force_styling(true));
        assert!(painted.contains("done"));
        assert!(painted.starts_with('\u{1b}'));
    }

    #[test]
    fn test_human_bytes() {
        assert_eq!(human_bytes(512), "512 B");
        assert_eq!(human_bytes(1536), "1.5 KB");
        assert_eq!(human_bytes(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn test_recording_sink() {
        let sink = RecordingSink::new();
        assert!(!sink.is_paused());
        sink.set_paused(true);
        assert!(sink.is_paused());

        sink.emit(ProgressEvent::DownloadStarted {
            shortcode: "A".into(),
        });
        assert_eq!(
            sink.events(),
            vec![ProgressEvent::DownloadStarted {
                shortcode: "A".into()
            }]
        );
    }

    #[test]
    fn test_line_sink_quiet_does_not_panic() {
        let sink = LineSink::new(DisplayMode::Quiet).without_color();
        sink.emit(ProgressEvent::DownloadCompleted {
            shortcode: "A".into(),
            bytes: 10,
        });
        sink.emit(ProgressEvent::Done(RunSummary::default()));
        assert_eq!(sink.mode(), DisplayMode::Quiet);
    }
}
