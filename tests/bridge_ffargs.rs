use std::path::Path;

use homecast::bridge::ffargs::{parse, FfArgsError};
use homecast::bridge::subordinate::{impersonated_kind, TranscoderKind};

fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

#[test]
fn classifies_single_input_and_output() {
    let args = argv(&["ffmpeg", "-i", "/tmp/a.mov", "-y", "/tmp/a.mp4"]);
    let ffargs = parse(&args, Path::new("/work")).unwrap();
    assert_eq!(ffargs.inputs, vec![2]);
    assert_eq!(ffargs.outputs, vec![4]);
    assert_eq!(ffargs.cwd, "/work");
}

#[test]
fn classifies_multiple_inputs() {
    let args = argv(&["ffmpeg", "-i", "a.mp3", "-i", "b.mp3", "mix.mp3"]);
    let ffargs = parse(&args, Path::new("/work")).unwrap();
    assert_eq!(ffargs.inputs, vec![2, 4]);
    assert_eq!(ffargs.outputs, vec![5]);
}

#[test]
fn flags_are_never_files() {
    let args = argv(&["ffmpeg", "-i", "in.mov", "-vf", "scale=320:-1", "out.mp4"]);
    let ffargs = parse(&args, Path::new("/")).unwrap();
    assert_eq!(ffargs.inputs, vec![2]);
    // "scale=320:-1" has no recognized extension; only out.mp4 qualifies.
    assert_eq!(ffargs.outputs, vec![5]);
}

#[test]
fn tokens_without_known_extension_are_not_outputs() {
    let args = argv(&["ffprobe", "-i", "in.mov", "-show_entries", "format=duration"]);
    let ffargs = parse(&args, Path::new("/")).unwrap();
    assert_eq!(ffargs.inputs, vec![2]);
    assert!(ffargs.outputs.is_empty());
}

#[test]
fn file_scheme_prefix_is_stripped_for_classification() {
    let args = argv(&["ffmpeg", "-i", "file:in.mov", "file:out.mp4"]);
    let ffargs = parse(&args, Path::new("/work")).unwrap();
    assert_eq!(ffargs.outputs, vec![3]);
    assert_eq!(ffargs.resolve(3), Path::new("/work/out.mp4"));
}

#[test]
fn relative_paths_resolve_against_cwd() {
    let args = argv(&["ffmpeg", "-i", "clip.mov", "clip.mp4"]);
    let ffargs = parse(&args, Path::new("/videos")).unwrap();
    assert_eq!(ffargs.resolve(2), Path::new("/videos/clip.mov"));
    assert_eq!(ffargs.resolve(3), Path::new("/videos/clip.mp4"));
}

#[test]
fn absolute_paths_resolve_unchanged() {
    let args = argv(&["ffmpeg", "-i", "/abs/clip.mov", "/abs/clip.mp4"]);
    let ffargs = parse(&args, Path::new("/elsewhere")).unwrap();
    assert_eq!(ffargs.resolve(2), Path::new("/abs/clip.mov"));
}

#[test]
fn missing_path_after_input_flag_errors() {
    let args = argv(&["ffmpeg", "-i"]);
    assert_eq!(parse(&args, Path::new("/")).unwrap_err(), FfArgsError::MissingInputPath);
}

#[test]
fn no_inputs_errors() {
    let args = argv(&["ffmpeg", "-version"]);
    assert_eq!(parse(&args, Path::new("/")).unwrap_err(), FfArgsError::NoInputs);
}

#[test]
fn impersonation_matches_transcoder_basenames() {
    assert_eq!(impersonated_kind("ffmpeg"), Some(TranscoderKind::Ffmpeg));
    assert_eq!(impersonated_kind("/usr/local/bin/ffprobe"), Some(TranscoderKind::Ffprobe));
    // Extension-stripped comparison covers Windows-style names.
    assert_eq!(impersonated_kind("ffmpeg.exe"), Some(TranscoderKind::Ffmpeg));
    assert_eq!(impersonated_kind("homecast"), None);
    assert_eq!(impersonated_kind("ffmpeg2"), None);
}

#[test]
fn json_roundtrip_preserves_indexes() {
    let args = argv(&["ffmpeg", "-i", "a.mov", "b.mp4"]);
    let ffargs = parse(&args, Path::new("/w")).unwrap();
    let json = serde_json::to_string(&ffargs).unwrap();
    let back: homecast::bridge::ffargs::FfArgs = serde_json::from_str(&json).unwrap();
    assert_eq!(back, ffargs);
}
