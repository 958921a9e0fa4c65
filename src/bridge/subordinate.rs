//! The impersonated CLI: when this binary is launched under the name
//! `ffmpeg` or `ffprobe`, it ships the invocation to the bridge over the
//! Unix socket and plays back the captured output streams. When the bridge
//! is unreachable it execs the real native binary instead.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::Context;
use tokio::net::UnixStream;

use crate::app::AppInfo;
use crate::bridge::ffargs;
use crate::bridge::framing::{read_frame, write_frame, FrameError, TAG_FFARGS_JSON, TAG_STDERR, TAG_STDOUT};
use crate::bridge::job::SERVER_FAILED;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscoderKind {
    Ffmpeg,
    Ffprobe,
}

impl TranscoderKind {
    pub fn name(self) -> &'static str {
        match self {
            TranscoderKind::Ffmpeg => "ffmpeg",
            TranscoderKind::Ffprobe => "ffprobe",
        }
    }
}

/// Detect whether argv[0] names a transcoder. Extension-stripped so
/// `ffmpeg.exe` style names also match.
pub fn impersonated_kind(argv0: &str) -> Option<TranscoderKind> {
    let stem = Path::new(argv0).file_stem()?.to_str()?;
    match stem {
        "ffmpeg" => Some(TranscoderKind::Ffmpeg),
        "ffprobe" => Some(TranscoderKind::Ffprobe),
        _ => None,
    }
}

/// Run as the subordinate. Returns the process exit code: 0 for a clean
/// bridge RPC, the native binary's status on fallback.
pub async fn run(kind: TranscoderKind, args: Vec<String>) -> i32 {
    match bridge_rpc(kind, &args).await {
        Ok(code) => code,
        Err(e) => {
            tracing::debug!("bridge unavailable ({e:#}), trying native {}", kind.name());
            native_fallback(kind, &args)
        }
    }
}

/// Ship the argv to the bridge and relay the log stream. `Err` means the
/// bridge could not be used at all (fallback territory); `Ok(code)` means
/// the RPC ran to an EOF.
async fn bridge_rpc(kind: TranscoderKind, args: &[String]) -> anyhow::Result<i32> {
    let cwd = std::env::current_dir().context("cannot read working directory")?;
    let ffargs = ffargs::parse(args, &cwd)
        .with_context(|| format!("cannot classify {} argv", kind.name()))?;

    let socket_path = AppInfo::bridge_socket_path();
    let stream = UnixStream::connect(&socket_path)
        .await
        .with_context(|| format!("cannot reach bridge at {}", socket_path.display()))?;
    let (mut rd, mut wr) = stream.into_split();

    let payload = serde_json::to_vec(&ffargs).context("cannot encode ffargs")?;
    write_frame(&mut wr, TAG_FFARGS_JSON, &payload)
        .await
        .context("cannot send ffargs frame")?;

    // From here on the bridge owns the job; errors are reported through the
    // exit code rather than triggering the native fallback.
    let mut failed = false;
    loop {
        match read_frame(&mut rd).await {
            Ok((tag, payload)) => match tag.as_str() {
                TAG_STDOUT => {
                    let mut out = std::io::stdout().lock();
                    let _ = out.write_all(&payload);
                    let _ = out.write_all(b"\n");
                }
                TAG_STDERR => {
                    if payload == SERVER_FAILED.as_bytes() {
                        failed = true;
                    } else {
                        let mut err = std::io::stderr().lock();
                        let _ = err.write_all(&payload);
                        let _ = err.write_all(b"\n");
                    }
                }
                other => {
                    eprintln!("bridge sent unknown frame tag {other}");
                    return Ok(1);
                }
            },
            Err(FrameError::Closed) => break,
            Err(e) => {
                eprintln!("bridge stream failed: {e}");
                return Ok(1);
            }
        }
    }

    Ok(if failed { 1 } else { 0 })
}

/// Exec the real native transcoder: the first PATH entry whose
/// extension-stripped basename matches, excluding this executable itself
/// (symlinks followed). ffmpeg gets `-y` injected; ffprobe's `-o <file>` is
/// rewritten into a stdout redirection.
fn native_fallback(kind: TranscoderKind, args: &[String]) -> i32 {
    let Some(native) = find_native(kind) else {
        eprintln!("no native {} found on PATH", kind.name());
        return 1;
    };

    let mut rest: Vec<String> = args.iter().skip(1).cloned().collect();
    let mut stdout_to: Option<PathBuf> = None;

    match kind {
        TranscoderKind::Ffmpeg => rest.insert(0, "-y".to_string()),
        TranscoderKind::Ffprobe => {
            if let Some(pos) = rest.iter().position(|a| a == "-o") {
                if pos + 1 < rest.len() {
                    stdout_to = Some(PathBuf::from(&rest[pos + 1]));
                    rest.drain(pos..=pos + 1);
                }
            }
        }
    }

    let mut cmd = std::process::Command::new(&native);
    cmd.args(&rest);
    if let Some(path) = stdout_to {
        match std::fs::File::create(&path) {
            Ok(file) => {
                cmd.stdout(Stdio::from(file));
            }
            Err(e) => {
                eprintln!("cannot create {}: {e}", path.display());
                return 1;
            }
        }
    }

    match cmd.status() {
        Ok(status) => status.code().unwrap_or(1),
        Err(e) => {
            eprintln!("cannot run {}: {e}", native.display());
            1
        }
    }
}

fn find_native(kind: TranscoderKind) -> Option<PathBuf> {
    let own = std::env::current_exe().ok().and_then(|p| p.canonicalize().ok());
    let path_var = std::env::var_os("PATH")?;

    for dir in std::env::split_paths(&path_var) {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        let mut matches: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.is_file()
                    && p.file_stem()
                        .and_then(|s| s.to_str())
                        .is_some_and(|stem| stem == kind.name())
            })
            .collect();
        matches.sort();

        for candidate in matches {
            let resolved = candidate.canonicalize().unwrap_or_else(|_| candidate.clone());
            if Some(&resolved) == own.as_ref() {
                continue;
            }
            return Some(candidate);
        }
    }

    None
}
