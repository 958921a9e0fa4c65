use std::path::Path;
use std::time::Duration;

use homecast::meta::record::{DirBody, FileRecord};
use homecast::meta::sidecar::{format_dir_cache_name, parse_dir_cache_name};
use homecast::meta::{MetaError, MetaStore};
use homecast::util::checksum::{crc32_hex, crc32_of_bytes};

fn make_store(metadata_root: &Path) -> MetaStore {
    // Zero cooldown so every update_dir call actually rescans.
    MetaStore::with_cooldown(metadata_root, Duration::ZERO)
}

fn snapshot_body(store: &MetaStore, dir: &Path) -> DirBody {
    let bytes = store.get(dir).expect("directory registered");
    serde_json::from_slice(&bytes).expect("snapshot is valid JSON")
}

// ── Sidecar naming ───────────────────────────────────────────────────────────

#[test]
fn sidecar_name_encodes_separators() {
    assert_eq!(format_dir_cache_name(Path::new("uploads/trip")), "uploads###trip.json");
}

#[test]
fn sidecar_name_roundtrips_relative_paths() {
    for dir in ["uploads", "uploads/trip", "a/b/c"] {
        let encoded = format_dir_cache_name(Path::new(dir));
        assert!(!encoded.contains('/'), "encoded name must be a plain filename");
        assert_eq!(parse_dir_cache_name(&encoded), Path::new(dir));
    }
}

#[test]
fn sidecar_name_roundtrips_absolute_paths() {
    let dir = Path::new("/srv/media/uploads");
    let encoded = format_dir_cache_name(dir);
    assert!(!encoded.contains('/'));
    assert_eq!(parse_dir_cache_name(&encoded), dir);
}

// ── Record serialization ─────────────────────────────────────────────────────

#[test]
fn file_record_json_roundtrips() {
    let record = FileRecord {
        mod_time: chrono::Utc::now(),
        size: 1234,
        is_dir: false,
        mime_type: "audio/mpeg".to_string(),
        crc32: "0badf00d".to_string(),
        details: None,
    };
    let json = serde_json::to_string(&record).unwrap();
    let back: FileRecord = serde_json::from_str(&json).unwrap();
    assert_eq!(back, record);
}

#[test]
fn file_record_uses_wire_field_names() {
    let record = FileRecord {
        mod_time: chrono::Utc::now(),
        size: 1,
        is_dir: false,
        mime_type: "image/png".to_string(),
        crc32: "00000000".to_string(),
        details: None,
    };
    let json = serde_json::to_string(&record).unwrap();
    for key in ["\"modTime\"", "\"size\"", "\"isDir\"", "\"mimeType\"", "\"crc32\""] {
        assert!(json.contains(key), "missing {key} in {json}");
    }
}

// ── Rescan ───────────────────────────────────────────────────────────────────

#[test]
fn rescan_indexes_files_with_mime_and_crc() {
    let meta = tempfile::tempdir().unwrap();
    let media = tempfile::tempdir().unwrap();
    std::fs::write(media.path().join("x.mp3"), b"xxx-audio").unwrap();
    std::fs::write(media.path().join("z.png"), b"zzz-image").unwrap();

    let store = make_store(meta.path());
    store.add_dir(media.path()).unwrap();
    store.update_dir(media.path()).unwrap();

    let body = snapshot_body(&store, media.path());
    assert_eq!(body.meta_map.len(), 2);

    let x = &body.meta_map["x.mp3"];
    assert_eq!(x.mime_type, "audio/mpeg");
    assert_eq!(x.size, 9);
    assert_eq!(x.crc32, crc32_hex(crc32_of_bytes(b"xxx-audio")));

    let z = &body.meta_map["z.png"];
    assert_eq!(z.mime_type, "image/png");
}

#[test]
fn playlist_contains_only_audio() {
    let meta = tempfile::tempdir().unwrap();
    let media = tempfile::tempdir().unwrap();
    std::fs::write(media.path().join("x.mp3"), b"x").unwrap();
    std::fs::write(media.path().join("y.mp3"), b"y").unwrap();
    std::fs::write(media.path().join("z.png"), b"z").unwrap();

    let store = make_store(meta.path());
    store.add_dir(media.path()).unwrap();
    store.update_dir(media.path()).unwrap();

    let body = snapshot_body(&store, media.path());
    assert_eq!(body.playlist, vec!["x.mp3".to_string(), "y.mp3".to_string()]);
}

#[test]
fn rescan_drops_removed_files_and_playlist_entries() {
    let meta = tempfile::tempdir().unwrap();
    let media = tempfile::tempdir().unwrap();
    std::fs::write(media.path().join("x.mp3"), b"x").unwrap();
    std::fs::write(media.path().join("y.mp3"), b"y").unwrap();

    let store = make_store(meta.path());
    store.add_dir(media.path()).unwrap();
    store.update_dir(media.path()).unwrap();

    std::fs::remove_file(media.path().join("y.mp3")).unwrap();
    store.update_dir(media.path()).unwrap();

    let body = snapshot_body(&store, media.path());
    assert!(!body.meta_map.contains_key("y.mp3"));
    assert_eq!(body.playlist, vec!["x.mp3".to_string()]);
}

#[test]
fn rescan_preserves_crc_of_unchanged_files() {
    let meta = tempfile::tempdir().unwrap();
    let media = tempfile::tempdir().unwrap();
    std::fs::write(media.path().join("x.mp3"), b"stable").unwrap();

    let store = make_store(meta.path());
    store.add_dir(media.path()).unwrap();
    store.update_dir(media.path()).unwrap();
    let first = snapshot_body(&store, media.path()).meta_map["x.mp3"].crc32.clone();

    store.update_dir(media.path()).unwrap();
    let second = snapshot_body(&store, media.path()).meta_map["x.mp3"].crc32.clone();
    assert_eq!(first, second);
}

#[test]
fn rescan_skips_inprogress_files() {
    let meta = tempfile::tempdir().unwrap();
    let media = tempfile::tempdir().unwrap();
    std::fs::write(media.path().join("x.mp3"), b"x").unwrap();
    std::fs::write(media.path().join("y.mp3.1700000000.inprogress"), b"partial").unwrap();

    let store = make_store(meta.path());
    store.add_dir(media.path()).unwrap();
    store.update_dir(media.path()).unwrap();

    let body = snapshot_body(&store, media.path());
    assert_eq!(body.meta_map.len(), 1);
    assert!(body.meta_map.contains_key("x.mp3"));
}

#[test]
fn playlist_keeps_prior_order_and_appends_new_audio() {
    let meta = tempfile::tempdir().unwrap();
    let media = tempfile::tempdir().unwrap();
    std::fs::write(media.path().join("a.mp3"), b"a").unwrap();
    std::fs::write(media.path().join("b.mp3"), b"b").unwrap();

    let store = make_store(meta.path());
    store.add_dir(media.path()).unwrap();
    store.update_dir(media.path()).unwrap();
    store
        .edit_playlist(media.path(), vec!["b.mp3".to_string(), "a.mp3".to_string()])
        .unwrap();

    std::fs::write(media.path().join("c.mp3"), b"c").unwrap();
    store.update_dir(media.path()).unwrap();

    let body = snapshot_body(&store, media.path());
    assert_eq!(
        body.playlist,
        vec!["b.mp3".to_string(), "a.mp3".to_string(), "c.mp3".to_string()]
    );
}

// ── Snapshot and persistence invariants ──────────────────────────────────────

#[test]
fn snapshot_matches_sidecar_file() {
    let meta = tempfile::tempdir().unwrap();
    let media = tempfile::tempdir().unwrap();
    std::fs::write(media.path().join("x.mp3"), b"x").unwrap();

    let store = make_store(meta.path());
    store.add_dir(media.path()).unwrap();
    store.update_dir(media.path()).unwrap();

    let snapshot = store.get(media.path()).unwrap();
    let sidecar_path = meta.path().join(format_dir_cache_name(media.path()));
    let on_disk = std::fs::read(sidecar_path).unwrap();
    assert_eq!(&*snapshot, on_disk.as_slice());
}

#[test]
fn load_all_from_disk_restores_caches() {
    let meta = tempfile::tempdir().unwrap();
    let media = tempfile::tempdir().unwrap();
    std::fs::write(media.path().join("x.mp3"), b"x").unwrap();

    {
        let store = make_store(meta.path());
        store.add_dir(media.path()).unwrap();
        store.update_dir(media.path()).unwrap();
    }

    let restored = make_store(meta.path());
    restored.load_all_from_disk().unwrap();
    let body = snapshot_body(&restored, media.path());
    assert!(body.meta_map.contains_key("x.mp3"));
}

#[test]
fn get_unregistered_dir_is_none() {
    let meta = tempfile::tempdir().unwrap();
    let store = make_store(meta.path());
    assert!(store.get(Path::new("/nowhere")).is_none());
}

#[test]
fn get_before_first_rescan_is_an_empty_body() {
    let meta = tempfile::tempdir().unwrap();
    let media = tempfile::tempdir().unwrap();
    let store = make_store(meta.path());
    store.add_dir(media.path()).unwrap();

    let body = snapshot_body(&store, media.path());
    assert!(body.meta_map.is_empty());
    assert!(body.playlist.is_empty());
}

// ── Playlist editing ─────────────────────────────────────────────────────────

#[test]
fn edit_playlist_replaces_order() {
    let meta = tempfile::tempdir().unwrap();
    let media = tempfile::tempdir().unwrap();
    std::fs::write(media.path().join("x.mp3"), b"x").unwrap();
    std::fs::write(media.path().join("y.mp3"), b"y").unwrap();

    let store = make_store(meta.path());
    store.add_dir(media.path()).unwrap();
    store.update_dir(media.path()).unwrap();

    store
        .edit_playlist(media.path(), vec!["y.mp3".to_string(), "x.mp3".to_string()])
        .unwrap();
    let body = snapshot_body(&store, media.path());
    assert_eq!(body.playlist, vec!["y.mp3".to_string(), "x.mp3".to_string()]);
}

#[test]
fn edit_playlist_rejects_unknown_names() {
    let meta = tempfile::tempdir().unwrap();
    let media = tempfile::tempdir().unwrap();

    let store = make_store(meta.path());
    store.add_dir(media.path()).unwrap();
    store.update_dir(media.path()).unwrap();

    let err = store
        .edit_playlist(media.path(), vec!["ghost.mp3".to_string()])
        .unwrap_err();
    assert!(matches!(err, MetaError::Invalid(_)));
}

#[test]
fn edit_playlist_rejects_non_audio() {
    let meta = tempfile::tempdir().unwrap();
    let media = tempfile::tempdir().unwrap();
    std::fs::write(media.path().join("z.png"), b"z").unwrap();

    let store = make_store(meta.path());
    store.add_dir(media.path()).unwrap();
    store.update_dir(media.path()).unwrap();

    let err = store
        .edit_playlist(media.path(), vec!["z.png".to_string()])
        .unwrap_err();
    assert!(matches!(err, MetaError::Invalid(_)));
}

#[test]
fn edit_playlist_unknown_dir_is_not_found() {
    let meta = tempfile::tempdir().unwrap();
    let store = make_store(meta.path());
    let err = store
        .edit_playlist(Path::new("/nowhere"), vec![])
        .unwrap_err();
    assert!(matches!(err, MetaError::NotFound));
}

// ── set_metadata ─────────────────────────────────────────────────────────────

#[test]
fn set_metadata_upserts_and_persists() {
    let meta = tempfile::tempdir().unwrap();
    let media = tempfile::tempdir().unwrap();
    let file = media.path().join("new.mp3");
    std::fs::write(&file, b"fresh").unwrap();

    let store = make_store(meta.path());
    store.add_dir(media.path()).unwrap();

    let stat = std::fs::metadata(&file).unwrap();
    store
        .set_metadata(media.path(), "new.mp3", &stat, "cafebabe".to_string())
        .unwrap();

    let body = snapshot_body(&store, media.path());
    let record = &body.meta_map["new.mp3"];
    assert_eq!(record.crc32, "cafebabe");
    assert_eq!(record.mime_type, "audio/mpeg");
    assert_eq!(record.size, 5);

    let sidecar_path = meta.path().join(format_dir_cache_name(media.path()));
    assert!(sidecar_path.exists());
}

#[test]
fn set_metadata_unknown_dir_is_not_found() {
    let meta = tempfile::tempdir().unwrap();
    let media = tempfile::tempdir().unwrap();
    let file = media.path().join("a.mp3");
    std::fs::write(&file, b"a").unwrap();

    let store = make_store(meta.path());
    let stat = std::fs::metadata(&file).unwrap();
    let err = store
        .set_metadata(Path::new("/nowhere"), "a.mp3", &stat, "00000000".to_string())
        .unwrap_err();
    assert!(matches!(err, MetaError::NotFound));
}

// ── Change detection ─────────────────────────────────────────────────────────

#[test]
fn touched_file_keeps_identity_but_updates_mtime() {
    let meta = tempfile::tempdir().unwrap();
    let media = tempfile::tempdir().unwrap();
    let file = media.path().join("x.mp3");
    std::fs::write(&file, b"x").unwrap();

    let store = make_store(meta.path());
    store.add_dir(media.path()).unwrap();
    store.update_dir(media.path()).unwrap();
    let before = snapshot_body(&store, media.path()).meta_map["x.mp3"].mod_time;

    let later = filetime::FileTime::from_unix_time(
        before.timestamp() + 3600,
        0,
    );
    filetime::set_file_mtime(&file, later).unwrap();
    store.update_dir(media.path()).unwrap();

    let after = snapshot_body(&store, media.path()).meta_map["x.mp3"].mod_time;
    assert!(after > before);
}
