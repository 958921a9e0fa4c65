use std::path::{Component, Path, PathBuf};

/// Path separators inside a directory cache's sidecar filename are encoded
/// with this sentinel, which never occurs in tracked directory names.
const SLASH_IN_FILENAME: &str = "###";

/// Encode a tracked directory path into its sidecar base name:
/// `uploads/trip` becomes `uploads###trip.json`, `/srv/media` becomes
/// `###srv###media.json`.
pub fn format_dir_cache_name(dir: &Path) -> String {
    let mut encoded = dir
        .to_string_lossy()
        .replace(['/', '\\'], SLASH_IN_FILENAME);
    encoded.push_str(".json");
    encoded
}

/// Reverse of `format_dir_cache_name`. A leading sentinel decodes back to a
/// rooted path.
pub fn parse_dir_cache_name(base: &str) -> PathBuf {
    let base = base.strip_suffix(".json").unwrap_or(base);
    let mut path = PathBuf::new();
    for (i, part) in base.split(SLASH_IN_FILENAME).enumerate() {
        if part.is_empty() {
            if i == 0 {
                path.push("/");
            }
            continue;
        }
        path.push(part);
    }
    path
}

/// A directory path with root and prefix components dropped, for mirroring
/// it under the metadata root.
pub fn mirrored(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| matches!(c, Component::Normal(_)))
        .collect()
}
