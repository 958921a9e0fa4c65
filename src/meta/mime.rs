/// Look up a MIME type from a filename's extension, matched
/// case-insensitively. Returns `None` for unrecognized extensions; callers
/// that need a wire value fall back to `application/octet-stream`.
///
/// MIME strings favor the values browsers accept for playback (e.g.
/// "video/x-matroska" for .mkv).
pub fn mime_by_name(name: &str) -> Option<&'static str> {
    let ext = std::path::Path::new(name).extension()?.to_str()?.to_ascii_lowercase();

    let mime = match ext.as_str() {
        // Video
        "mp4" => "video/mp4",
        "m4v" => "video/mp4",
        "mkv" => "video/x-matroska",
        "avi" => "video/x-msvideo",
        "mov" => "video/quicktime",
        "ts" => "video/mp2t",
        "m2ts" => "video/mp2t",
        "mts" => "video/mp2t",
        "mpg" => "video/mpeg",
        "mpeg" => "video/mpeg",
        "wmv" => "video/x-ms-wmv",
        "flv" => "video/x-flv",
        "ogv" => "video/ogg",
        "webm" => "video/webm",
        "3gp" => "video/3gpp",

        // Audio
        "mp3" => "audio/mpeg",
        "flac" => "audio/flac",
        "wav" => "audio/wav",
        "m4a" => "audio/mp4",
        "aac" => "audio/aac",
        "ogg" => "audio/ogg",
        "oga" => "audio/ogg",
        "wma" => "audio/x-ms-wma",
        "opus" => "audio/ogg",
        "aiff" => "audio/aiff",
        "aif" => "audio/aiff",

        // Image
        "jpg" => "image/jpeg",
        "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "tiff" => "image/tiff",
        "tif" => "image/tiff",
        "svg" => "image/svg+xml",
        "heic" => "image/heic",

        // Text / sidecar formats the UI fetches directly
        "json" => "application/json",
        "txt" => "text/plain",
        "srt" => "text/srt",
        "vtt" => "text/vtt",
        "html" => "text/html",
        "css" => "text/css",
        "js" => "text/javascript",
        "wasm" => "application/wasm",

        _ => return None,
    };

    Some(mime)
}

/// MIME type as stored in file records: empty string when unknown.
pub fn mime_by_name_or_empty(name: &str) -> String {
    mime_by_name(name).unwrap_or("").to_string()
}

pub fn is_audio(mime: &str) -> bool {
    mime.starts_with("audio/")
}

/// Audio and video records carry a details subrecord once baked.
pub fn is_media(mime: &str) -> bool {
    mime.starts_with("audio/") || mime.starts_with("video/")
}
