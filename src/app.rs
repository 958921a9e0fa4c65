use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::config::Config;

pub const UPLOADS_DIR: &str = "uploads";
pub const METADATA_DIR: &str = "homecast-metadata";
pub const AUTH_JSON: &str = "auth.json";
pub const SOCKET_NAME: &str = "homecast.ffmpeg.sock";

/// How many inputs a single bridged job may carry; advertised in /api/manifest
/// so the browser page can refuse oversized commands before queueing them.
pub const FFMPEG_INPUT_LIMIT: usize = 8;

/// Process-wide context built once during startup and injected into
/// components as an explicit dependency. Read-mostly after construction.
#[derive(Debug)]
pub struct AppInfo {
    pub start: Instant,
    pub upload_root: PathBuf,
    pub metadata_root: PathBuf,
    pub local_ips: BTreeSet<String>,
    pub config: Config,
}

impl AppInfo {
    /// Media file destination: `<uploadRoot>/<album>/<base>`.
    pub fn upload_fullpath(&self, album: &str, base: &str) -> PathBuf {
        self.upload_root.join(album).join(base)
    }

    /// Album directory under the upload root. The album name is always taken
    /// as a basename so query input cannot escape the root.
    pub fn album_dir(&self, album: &str) -> PathBuf {
        self.upload_root.join(basename(album))
    }

    /// Per-file sidecar destination: `<metadataRoot>/<uploadRoot>/<album>/<base><suffix>`.
    /// The upload root is mirrored under the metadata root so directory cache
    /// sidecars and per-file sidecars never collide.
    pub fn metadata_fullpath(&self, album: &str, base: &str, suffix: &str) -> PathBuf {
        self.metadata_root
            .join(crate::meta::sidecar::mirrored(&self.upload_root))
            .join(album)
            .join(format!("{base}{suffix}"))
    }

    /// Unix socket the subordinate dials, derived from the platform temp dir.
    pub fn bridge_socket_path() -> PathBuf {
        std::env::temp_dir().join(SOCKET_NAME)
    }
}

/// Last path component as a string, or the input unchanged when it has none.
pub fn basename(name: &str) -> String {
    Path::new(name)
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| name.to_string())
}
