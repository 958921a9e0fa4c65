//! Per-directory metadata caches: file records, playlists, and JSON
//! snapshots persisted as sidecar files under the metadata root.

pub mod mime;
pub mod record;
pub mod sidecar;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

use crate::meta::record::{DirBody, FileRecord, MediaDetails};
use crate::util::checksum::crc32_of_file;
use crate::util::pacing::Throttle;

/// Minimum spacing between rescans of the same directory.
pub const RESCAN_COOLDOWN: Duration = Duration::from_secs(3);

#[derive(Debug, thiserror::Error)]
pub enum MetaError {
    #[error("directory is not registered")]
    NotFound,
    #[error("invalid playlist entry: {0}")]
    Invalid(String),
    #[error("metadata I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("metadata encoding failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// One tracked directory: the mutable body, the immutable latest snapshot,
/// and the per-directory rescan throttle.
///
/// Snapshot reads only take the `snapshot` lock for an `Arc` clone, so HTTP
/// responses never wait on a rescan holding `body`.
struct DirCache {
    dir: PathBuf,
    body: Mutex<DirBody>,
    snapshot: RwLock<Arc<[u8]>>,
    throttle: Throttle,
}

/// Registry of directory caches. Rescans are serialized store-wide; snapshot
/// reads are lock-free with respect to them.
pub struct MetaStore {
    metadata_root: PathBuf,
    caches: RwLock<HashMap<PathBuf, Arc<DirCache>>>,
    /// Only one directory rescans at a time.
    update_mutex: Mutex<()>,
    cooldown: Duration,
}

impl MetaStore {
    pub fn new(metadata_root: impl Into<PathBuf>) -> Self {
        Self::with_cooldown(metadata_root, RESCAN_COOLDOWN)
    }

    pub fn with_cooldown(metadata_root: impl Into<PathBuf>, cooldown: Duration) -> Self {
        MetaStore {
            metadata_root: metadata_root.into(),
            caches: RwLock::new(HashMap::new()),
            update_mutex: Mutex::new(()),
            cooldown,
        }
    }

    pub fn metadata_root(&self) -> &Path {
        &self.metadata_root
    }

    fn cache(&self, dir: &Path) -> Option<Arc<DirCache>> {
        self.caches
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(dir)
            .cloned()
    }

    /// Populate caches from the sidecar files under the metadata root.
    /// I/O or decode failures are fatal; the caller runs this at startup.
    pub fn load_all_from_disk(&self) -> Result<(), MetaError> {
        let entries = match std::fs::read_dir(&self.metadata_root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        for entry in entries {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.ends_with(".json") || entry.file_type()?.is_dir() {
                continue;
            }

            let dir = sidecar::parse_dir_cache_name(&name);
            self.add_dir(&dir)?;
            let cache = self.cache(&dir).ok_or(MetaError::NotFound)?;

            let data = std::fs::read(entry.path())?;
            let body: DirBody = serde_json::from_slice(&data)?;
            let mut guard = lock(&cache.body);
            *guard = body;
            *cache.snapshot.write().unwrap_or_else(|e| e.into_inner()) = data.into();
            tracing::debug!("loaded cache sidecar for {}", dir.display());
        }

        Ok(())
    }

    /// Register a directory. Idempotent; allocates an empty cache and
    /// ensures the mirrored directory for per-file sidecars exists.
    pub fn add_dir(&self, dir: &Path) -> Result<(), MetaError> {
        {
            let caches = self.caches.read().unwrap_or_else(|e| e.into_inner());
            if caches.contains_key(dir) {
                return Ok(());
            }
        }

        let body = DirBody::default();
        let snapshot: Arc<[u8]> = serde_json::to_vec(&body)?.into();
        let cache = Arc::new(DirCache {
            dir: dir.to_path_buf(),
            body: Mutex::new(body),
            snapshot: RwLock::new(snapshot),
            throttle: Throttle::new(self.cooldown),
        });

        std::fs::create_dir_all(self.metadata_root.join(sidecar::mirrored(dir)))?;

        let mut caches = self.caches.write().unwrap_or_else(|e| e.into_inner());
        caches.entry(dir.to_path_buf()).or_insert(cache);
        Ok(())
    }

    /// Rescan a directory now, throttled per-directory and serialized
    /// store-wide. Synchronous: when this returns, the snapshot reflects the
    /// rescan (or the throttle dropped it as too soon after the last one).
    pub fn update_dir(&self, dir: &Path) -> Result<(), MetaError> {
        let cache = self.cache(dir).ok_or(MetaError::NotFound)?;

        let _serial = lock(&self.update_mutex);
        cache.throttle.call(|| cache.rescan(&self.metadata_root));
        Ok(())
    }

    /// Latest JSON snapshot. Never blocks a rescan and vice-versa.
    pub fn get(&self, dir: &Path) -> Option<Arc<[u8]>> {
        let cache = self.cache(dir)?;
        let snapshot = cache.snapshot.read().unwrap_or_else(|e| e.into_inner());
        Some(Arc::clone(&snapshot))
    }

    /// Upsert a single record (fresh upload) and persist.
    pub fn set_metadata(
        &self,
        dir: &Path,
        base: &str,
        stat: &std::fs::Metadata,
        crc32: String,
    ) -> Result<(), MetaError> {
        let cache = self.cache(dir).ok_or(MetaError::NotFound)?;

        let record = FileRecord::from_stat(stat, mime::mime_by_name_or_empty(base), crc32);
        let mut body = lock(&cache.body);
        body.meta_map.insert(base.to_string(), record);
        cache.persist(&body, &self.metadata_root);
        Ok(())
    }

    /// Replace the playlist after validating that every entry is a known
    /// audio record.
    pub fn edit_playlist(&self, dir: &Path, names: Vec<String>) -> Result<(), MetaError> {
        let cache = self.cache(dir).ok_or(MetaError::NotFound)?;

        let mut body = lock(&cache.body);
        for base in &names {
            match body.meta_map.get(base) {
                None => return Err(MetaError::Invalid(format!("{base}: no such file"))),
                Some(record) if !mime::is_audio(&record.mime_type) => {
                    return Err(MetaError::Invalid(format!("{base}: not an audio file")))
                }
                Some(_) => {}
            }
        }

        body.playlist = names;
        cache.persist(&body, &self.metadata_root);
        Ok(())
    }
}

impl DirCache {
    /// Serialize the body, swap the snapshot, and mirror the bytes to the
    /// sidecar file. Invariants (iii) and (iv): snapshot and sidecar carry
    /// the same encoding of the body at the time of this call.
    fn persist(&self, body: &DirBody, metadata_root: &Path) {
        let data = match serde_json::to_vec(body) {
            Ok(data) => data,
            Err(e) => {
                tracing::error!("failed to encode cache body for {}: {}", self.dir.display(), e);
                return;
            }
        };

        *self.snapshot.write().unwrap_or_else(|e| e.into_inner()) = data.clone().into();

        let sidecar_path = metadata_root.join(sidecar::format_dir_cache_name(&self.dir));
        if let Err(e) = std::fs::write(&sidecar_path, &data) {
            tracing::error!("failed to write cache sidecar {}: {}", sidecar_path.display(), e);
        }
    }

    fn rescan(&self, metadata_root: &Path) {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::error!("cannot read directory {}: {}", self.dir.display(), e);
                return;
            }
        };

        // Collect stats before taking the body lock.
        let mut listed: Vec<(String, std::fs::Metadata)> = Vec::new();
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!("cannot access entry in {}: {}", self.dir.display(), e);
                    continue;
                }
            };
            let base = entry.file_name().to_string_lossy().into_owned();
            // Half-written uploads never surface in a snapshot.
            if base.ends_with(".inprogress") {
                continue;
            }
            match entry.metadata() {
                Ok(stat) => listed.push((base, stat)),
                Err(e) => tracing::warn!("cannot stat {}: {}", entry.path().display(), e),
            }
        }

        let mut added = 0usize;
        let mut modified = 0usize;

        let mut body = lock(&self.body);
        let old_map = std::mem::take(&mut body.meta_map);
        let mut new_map = std::collections::BTreeMap::new();

        for (base, stat) in listed {
            let fullpath = self.dir.join(&base);
            let mod_time = stat
                .modified()
                .map(chrono::DateTime::<chrono::Utc>::from)
                .unwrap_or_else(|_| chrono::Utc::now());

            let mut record = match old_map.get(&base) {
                Some(old) => {
                    if old.mod_time != mod_time || old.size != stat.len() {
                        modified += 1;
                    }
                    old.clone()
                }
                None => {
                    added += 1;
                    FileRecord::from_stat(&stat, String::new(), String::new())
                }
            };

            record.mod_time = mod_time;
            record.size = stat.len();
            record.is_dir = stat.is_dir();
            if record.mime_type.is_empty() {
                record.mime_type = mime::mime_by_name_or_empty(&base);
            }

            if !record.is_dir && (record.crc32.is_empty() || record.crc32 == "0") {
                match crc32_of_file(&fullpath) {
                    Ok(crc) => record.crc32 = crc,
                    Err(e) => tracing::warn!("failed to checksum {}: {}", fullpath.display(), e),
                }
            }

            if !record.is_dir && mime::is_media(&record.mime_type) && record.details.is_none() {
                record.details = load_baked_details(metadata_root, &self.dir, &base);
            }

            new_map.insert(base, record);
        }

        let removed = old_map.keys().filter(|base| !new_map.contains_key(*base)).count();

        // Reconcile the playlist: retain listed audio entries in their prior
        // order, then append audio records not yet listed.
        let mut playlist: Vec<String> = body
            .playlist
            .iter()
            .filter(|base| {
                new_map
                    .get(*base)
                    .is_some_and(|record| mime::is_audio(&record.mime_type))
            })
            .cloned()
            .collect();
        for (base, record) in &new_map {
            if mime::is_audio(&record.mime_type) && !playlist.iter().any(|p| p == base) {
                playlist.push(base.clone());
            }
        }

        body.meta_map = new_map;
        body.playlist = playlist;

        tracing::info!(
            "rescanned {}: {} added, {} modified, {} removed",
            self.dir.display(),
            added,
            modified,
            removed
        );

        self.persist(&body, metadata_root);
    }
}

/// Baked detail sidecars sit next to the other per-file sidecars in the
/// mirrored directory. Absent or malformed files just mean "not baked yet".
fn load_baked_details(metadata_root: &Path, dir: &Path, base: &str) -> Option<MediaDetails> {
    let path = metadata_root
        .join(sidecar::mirrored(dir))
        .join(format!("{base}.json"));
    let data = std::fs::read(path).ok()?;
    let details: MediaDetails = serde_json::from_slice(&data).ok()?;
    if details.is_empty() {
        None
    } else {
        Some(details)
    }
}

/// Lock helper that shrugs off poisoning: a panicked rescan must not wedge
/// every later HTTP request.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
