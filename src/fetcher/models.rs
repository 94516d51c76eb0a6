//! Wire types for the profile feed endpoint
//!
//! Only the fields the pipeline reads are modeled; everything else in the
//! response is ignored.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::{MediaItem, PageCursor};

/// Top-level response body
#[derive(Debug, Clone, Deserialize)]
pub struct FeedResponse {
    /// Payload, absent on error bodies
    #[serde(default)]
    pub data: Option<FeedData>,
    /// `"ok"` or `"fail"`
    #[serde(default)]
    pub status: Option<String>,
    /// Error message on failure bodies
    #[serde(default)]
    pub message: Option<String>,
    /// Set when the platform flags the session as spamming
    #[serde(default)]
    pub spam: bool,
}

/// `data`
#[derive(Debug, Clone, Deserialize)]
pub struct FeedData {
    /// Null for unknown or unavailable profiles
    #[serde(default)]
    pub user: Option<FeedUser>,
}

/// `data.user`
#[derive(Debug, Clone, Deserialize)]
pub struct FeedUser {
    /// Numeric profile id
    #[serde(default)]
    pub id: Option<String>,
    /// Whether the profile is private
    #[serde(default)]
    pub is_private: bool,
    /// The timeline connection
    pub edge_owner_to_timeline_media: TimelineMedia,
}

/// `edge_owner_to_timeline_media`
#[derive(Debug, Clone, Deserialize)]
pub struct TimelineMedia {
    /// Total posts on the profile
    #[serde(default)]
    pub count: Option<u64>,
    /// Pagination state
    pub page_info: PageInfo,
    /// Posts on this page
    #[serde(default)]
    pub edges: Vec<MediaEdge>,
}

/// `page_info`
#[derive(Debug, Clone, Deserialize)]
pub struct PageInfo {
    /// Cursor for the next request
    #[serde(default)]
    pub end_cursor: Option<String>,
    /// Whether more pages follow
    #[serde(default)]
    pub has_next_page: bool,
}

/// `edges[]`
#[derive(Debug, Clone, Deserialize)]
pub struct MediaEdge {
    /// The post
    pub node: MediaNode,
}

/// `edges[].node`
#[derive(Debug, Clone, Deserialize)]
pub struct MediaNode {
    /// Stable post identifier
    pub shortcode: String,
    /// Full-size image URL
    #[serde(default)]
    pub display_url: String,
    /// Video posts are skipped
    #[serde(default)]
    pub is_video: bool,
    /// Caption connection
    #[serde(default)]
    pub edge_media_to_caption: Option<CaptionEdges>,
    /// Like count
    #[serde(default)]
    pub edge_liked_by: Option<Counter>,
    /// Like count as exposed in newer responses
    #[serde(default)]
    pub edge_media_preview_like: Option<Counter>,
    /// Unix seconds
    #[serde(default)]
    pub taken_at_timestamp: Option<i64>,
}

/// `{ "edges": [{ "node": { "text": ... } }] }`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CaptionEdges {
    /// Caption entries; the first is the post caption
    #[serde(default)]
    pub edges: Vec<CaptionEdge>,
}

/// Caption entry
#[derive(Debug, Clone, Deserialize)]
pub struct CaptionEdge {
    /// Caption node
    pub node: CaptionNode,
}

/// Caption text holder
#[derive(Debug, Clone, Deserialize)]
pub struct CaptionNode {
    /// Caption text
    #[serde(default)]
    pub text: String,
}

/// `{ "count": N }`
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Counter {
    /// The count
    #[serde(default)]
    pub count: u64,
}

impl From<MediaNode> for MediaItem {
    fn from(node: MediaNode) -> Self {
        let caption = node
            .edge_media_to_caption
            .and_then(|c| c.edges.into_iter().next())
            .map(|e| e.node.text)
            .filter(|t| !t.is_empty());
        let like_count = node
            .edge_liked_by
            .or(node.edge_media_preview_like)
            .map(|c| c.count);
        let taken_at = node
            .taken_at_timestamp
            .and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0));

        Self {
            shortcode: node.shortcode,
            display_url: node.display_url,
            caption,
            like_count,
            taken_at,
            is_video: node.is_video,
        }
    }
}

/// One page of the feed, converted to domain types
#[derive(Debug, Clone, PartialEq)]
pub struct FeedPage {
    /// Items in feed order, videos included
    pub items: Vec<MediaItem>,
    /// Where the next page starts
    pub cursor: PageCursor,
    /// Total posts reported by the profile, if present
    pub total: Option<u64>,
}

impl FeedResponse {
    /// Whether the body is the platform's soft rate-limit response
    pub fn is_rate_limited(&self) -> bool {
        self.spam
            || self
                .message
                .as_deref()
                .is_some_and(|m| m.to_lowercase().contains("wait a few minutes"))
    }
}

impl From<TimelineMedia> for FeedPage {
    fn from(media: TimelineMedia) -> Self {
        Self {
            items: media.edges.into_iter().map(|e| MediaItem::from(e.node)).collect(),
            cursor: PageCursor {
                end_cursor: media.page_info.end_cursor.filter(|c| !c.is_empty()),
                has_next_page: media.page_info.has_next_page,
            },
            total: media.count,
        }
    }
}
