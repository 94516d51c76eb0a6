//! `metadata.json` sidecar describing every downloaded photo
//!
//! The file is rewritten at the end of each run. Records from earlier runs are
//! kept; a record for the same short-code is replaced by the newer one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{self, Write};
use std::path::Path;
use tracing::debug;

use super::ProfileLayout;
use crate::MediaItem;

/// One downloaded photo
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhotoRecord {
    /// Platform short-code
    pub shortcode: String,
    /// File name relative to the profile directory
    pub file: String,
    /// Source URL
    pub display_url: String,
    /// Caption text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    /// Likes at download time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub like_count: Option<u64>,
    /// Post timestamp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub taken_at: Option<DateTime<Utc>>,
    /// Bytes written
    #[serde(default)]
    pub file_size: u64,
    /// When the file was written
    pub downloaded_at: DateTime<Utc>,
}

impl PhotoRecord {
    /// Record for an item that was just written
    pub fn from_item(item: &MediaItem, file_size: u64) -> Self {
        Self {
            shortcode: item.shortcode.clone(),
            file: ProfileLayout::file_name(&item.shortcode),
            display_url: item.display_url.clone(),
            caption: item.caption.clone(),
            like_count: item.like_count,
            taken_at: item.taken_at,
            file_size,
            downloaded_at: Utc::now(),
        }
    }
}

/// Contents of `metadata.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileMetadata {
    /// Profile username
    pub username: String,
    /// Last rewrite
    pub updated_at: DateTime<Utc>,
    /// Photos ordered by short-code
    pub photos: Vec<PhotoRecord>,
}

impl ProfileMetadata {
    /// Read the sidecar if it exists
    pub fn load(path: &Path) -> io::Result<Option<Self>> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        serde_json::from_str(&contents)
            .map(Some)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

/// Merge `records` into the profile's sidecar and write it atomically.
///
/// Returns the number of photos in the resulting file. A sidecar that cannot
/// be parsed is replaced.
pub fn merge_and_write(
    layout: &ProfileLayout,
    username: &str,
    records: Vec<PhotoRecord>,
) -> io::Result<usize> {
    let path = layout.metadata_path();
    let existing = match ProfileMetadata::load(&path) {
        Ok(existing) => existing,
        Err(e) if e.kind() == io::ErrorKind::InvalidData => {
            debug!(path = %path.display(), error = %e, "Replacing unreadable metadata file");
            None
        }
        Err(e) => return Err(e),
    };

    if records.is_empty() && existing.is_some() {
        return Ok(existing.map_or(0, |m| m.photos.len()));
    }

    let mut by_code: BTreeMap<String, PhotoRecord> = existing
        .into_iter()
        .flat_map(|m| m.photos)
        .map(|r| (r.shortcode.clone(), r))
        .collect();
    for record in records {
        by_code.insert(record.shortcode.clone(), record);
    }

    let metadata = ProfileMetadata {
        username: username.to_string(),
        updated_at: Utc::now(),
        photos: by_code.into_values().collect(),
    };
    let json = serde_json::to_vec_pretty(&metadata)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

    layout.create()?;
    let mut temp = tempfile::NamedTempFile::new_in(layout.dir())?;
    temp.write_all(&json)?;
    temp.flush()?;
    temp.as_file().sync_all()?;
    temp.persist(&path).map_err(|e| e.error)?;

    debug!(path = %path.display(), photos = metadata.photos.len(), "Metadata written");
    Ok(metadata.photos.len())
}
