use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Derived description of a media file, baked out-of-band by the native
/// transcoder and stored in a per-file sidecar.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub album: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
}

impl MediaDetails {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.artist.is_none() && self.album.is_none() && self.duration.is_none()
    }
}

/// One tracked file inside a directory cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    pub mod_time: DateTime<Utc>,
    pub size: u64,
    pub is_dir: bool,
    /// From the extension; empty when unrecognized.
    pub mime_type: String,
    /// Lowercase 8-hex CRC-32 of the contents; empty until computed.
    pub crc32: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<MediaDetails>,
}

impl FileRecord {
    pub fn from_stat(stat: &std::fs::Metadata, mime_type: String, crc32: String) -> Self {
        let mod_time = stat
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        FileRecord {
            mod_time,
            size: stat.len(),
            is_dir: stat.is_dir(),
            mime_type,
            crc32,
            details: None,
        }
    }
}

/// The serialized body of a directory cache. The map is keyed by base
/// filename; the playlist is an ordered subset of the audio entries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirBody {
    pub meta_map: BTreeMap<String, FileRecord>,
    pub playlist: Vec<String>,
}
