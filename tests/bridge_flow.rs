use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use homecast::app::AppInfo;
use homecast::bridge::envelope::{Envelope, LogKind};
use homecast::bridge::ffargs::{self, FfArgs};
use homecast::bridge::framing::{read_frame, write_frame, FrameError, TAG_FFARGS_JSON, TAG_STDOUT};
use homecast::bridge::job::Job;
use homecast::bridge::Bridge;
use homecast::http::admission::Admission;
use homecast::http::auth::AuthInfo;
use homecast::http::build_router;
use homecast::http::state::AppState;
use homecast::http::statics::StaticFiles;
use homecast::meta::MetaStore;
use homecast::util::gate::Gate;

type WsClient = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

// ── Envelope encoding ────────────────────────────────────────────────────────

#[test]
fn bare_envelopes_serialize_to_type_only_objects() {
    assert_eq!(Envelope::Ready.to_json(), r#"{"type":"ready"}"#);
    assert_eq!(Envelope::Wait.to_json(), r#"{"type":"wait"}"#);
    assert_eq!(Envelope::TaskReady.to_json(), r#"{"type":"taskReady"}"#);
}

#[test]
fn log_line_envelope_parses() {
    let parsed: Envelope =
        serde_json::from_str(r#"{"type":"logLine","logType":"stdout","logLine":"frame=1"}"#).unwrap();
    assert_eq!(
        parsed,
        Envelope::LogLine {
            log_type: LogKind::Stdout,
            log_line: "frame=1".to_string(),
        }
    );
}

#[test]
fn out_info_envelope_roundtrips() {
    let envelope = Envelope::OutInfo { out_info: (4, 123) };
    let parsed: Envelope = serde_json::from_str(&envelope.to_json()).unwrap();
    assert_eq!(parsed, envelope);
}

#[test]
fn unknown_tag_is_rejected() {
    assert!(serde_json::from_str::<Envelope>(r#"{"type":"mystery"}"#).is_err());
}

#[test]
fn ffargs_ack_without_payload_parses() {
    let parsed: Envelope = serde_json::from_str(r#"{"type":"ffargs"}"#).unwrap();
    assert_eq!(parsed, Envelope::FfArgs { ffargs: None });
}

// ── Job queue ────────────────────────────────────────────────────────────────

fn fake_job(id: u64) -> Arc<Job> {
    let ffargs = FfArgs {
        cwd: "/".to_string(),
        args: vec!["ffmpeg".into(), "-i".into(), "a.mov".into(), "b.mp4".into()],
        inputs: vec![2],
        outputs: vec![3],
    };
    Job::new(id, ffargs).0
}

#[tokio::test]
async fn queue_is_fifo_with_head_requeue() {
    let bridge = Bridge::new(CancellationToken::new());
    bridge.queue.push_back(fake_job(1)).await;
    bridge.queue.push_back(fake_job(2)).await;
    bridge.queue.push_front(fake_job(3));

    assert_eq!(bridge.queue.pop().await.id, 3);
    assert_eq!(bridge.queue.pop().await.id, 1);
    assert_eq!(bridge.queue.pop().await.id, 2);
    assert!(bridge.queue.is_empty());
}

// ── End-to-end bridge flows ──────────────────────────────────────────────────

fn make_state(upload_root: &Path, metadata_root: &Path) -> AppState {
    let args = homecast::cli::Args::default();
    let config = homecast::config::Config::resolve(None, &args);
    let store = Arc::new(MetaStore::with_cooldown(metadata_root, Duration::ZERO));
    store.add_dir(upload_root).unwrap();

    AppState {
        app: Arc::new(AppInfo {
            start: Instant::now(),
            upload_root: upload_root.to_path_buf(),
            metadata_root: metadata_root.to_path_buf(),
            local_ips: BTreeSet::new(),
            config,
        }),
        store,
        bridge: Bridge::new(CancellationToken::new()),
        admission: Arc::new(Admission::new(64, Duration::from_secs(5))),
        auth: Arc::new(
            AuthInfo::load(metadata_root.join("auth.json"), "test-password".to_string()).unwrap(),
        ),
        statics: Arc::new(StaticFiles::load(Path::new("/nonexistent"))),
        ffmpeg_gate: Arc::new(Gate::new(1, Duration::ZERO)),
    }
}

/// Boot the bridge's unix listener and the HTTP server on ephemeral
/// addresses; returns the HTTP address for the WebSocket client.
async fn spawn_server(state: AppState, socket_path: PathBuf) -> SocketAddr {
    let bridge = Arc::clone(&state.bridge);
    tokio::spawn(async move {
        let _ = bridge.serve_unix(socket_path).await;
    });

    let app = build_router(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// Connect as a subordinate would: dial the unix socket and ship the argv.
async fn connect_subordinate(
    socket_path: &Path,
    args: &[String],
    cwd: &Path,
) -> (
    tokio::net::unix::OwnedReadHalf,
    tokio::net::unix::OwnedWriteHalf,
) {
    // The listener task may still be binding.
    let mut attempts = 0;
    let stream = loop {
        match tokio::net::UnixStream::connect(socket_path).await {
            Ok(stream) => break stream,
            Err(_) if attempts < 50 => {
                attempts += 1;
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            Err(e) => panic!("cannot reach bridge socket: {e}"),
        }
    };
    let (rd, mut wr) = stream.into_split();
    let ffargs = ffargs::parse(args, cwd).unwrap();
    let payload = serde_json::to_vec(&ffargs).unwrap();
    write_frame(&mut wr, TAG_FFARGS_JSON, &payload).await.unwrap();
    (rd, wr)
}

async fn ws_connect(addr: SocketAddr) -> WsClient {
    let (ws, _) = connect_async(format!("ws://{addr}/ws/ffmpeg")).await.unwrap();
    ws
}

async fn ws_send_json(ws: &mut WsClient, value: serde_json::Value) {
    ws.send(Message::text(value.to_string())).await.unwrap();
}

/// Next text message as JSON, answering heartbeats along the way.
async fn ws_recv_json(ws: &mut WsClient) -> serde_json::Value {
    loop {
        match ws.next().await.expect("socket open").expect("no transport error") {
            Message::Text(text) => {
                let value: serde_json::Value = serde_json::from_str(&text).unwrap();
                if value["type"] == "wait" {
                    ws.send(Message::text(r#"{"type":"wait"}"#)).await.unwrap();
                    continue;
                }
                return value;
            }
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("expected text, got {other:?}"),
        }
    }
}

async fn ws_recv_binary(ws: &mut WsClient) -> Vec<u8> {
    loop {
        match ws.next().await.expect("socket open").expect("no transport error") {
            Message::Binary(data) => return data.to_vec(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("expected binary, got {other:?}"),
        }
    }
}

/// Run the browser side of one job up to and including the input transfer.
/// Returns the parsed ffargs payload.
async fn browser_take_job(ws: &mut WsClient, expect_input: &[u8]) -> serde_json::Value {
    ws_send_json(ws, serde_json::json!({"type": "ready"})).await;
    assert_eq!(ws_recv_json(ws).await["type"], "ready");

    assert_eq!(ws_recv_json(ws).await["type"], "taskReady");
    ws_send_json(ws, serde_json::json!({"type": "taskReady"})).await;

    let ffargs_msg = ws_recv_json(ws).await;
    assert_eq!(ffargs_msg["type"], "ffargs");
    let ffargs = ffargs_msg["ffargs"].clone();
    ws_send_json(ws, serde_json::json!({"type": "ffargs"})).await;

    let inputs = ffargs["inputs"].as_array().unwrap().clone();
    for index in &inputs {
        let info = ws_recv_json(ws).await;
        assert_eq!(info[0], *index);
        assert_eq!(info[1], expect_input.len() as u64);
        ws_send_json(ws, serde_json::json!({"type": "inputInfoOk"})).await;

        let data = ws_recv_binary(ws).await;
        assert_eq!(data, expect_input);
        ws_send_json(ws, serde_json::json!({"type": "inputOk"})).await;
    }

    ffargs
}

#[tokio::test]
async fn happy_bridge_streams_input_logs_and_output() {
    let uploads = tempfile::tempdir().unwrap();
    let meta = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    let sock_dir = tempfile::tempdir().unwrap();
    let socket_path = sock_dir.path().join("bridge.sock");

    std::fs::write(work.path().join("a.mov"), b"MOVDATA").unwrap();
    let in_path = work.path().join("a.mov").to_string_lossy().into_owned();
    let out_path = work.path().join("a.mp4").to_string_lossy().into_owned();
    let args: Vec<String> = ["ffmpeg", "-i", &in_path, "-y", &out_path]
        .iter()
        .map(|s| s.to_string())
        .collect();

    let addr = spawn_server(make_state(uploads.path(), meta.path()), socket_path.clone()).await;
    let (mut sub_rd, _sub_wr) = connect_subordinate(&socket_path, &args, work.path()).await;

    // Browser side: take the job, transcode, stream everything back.
    let mut ws = ws_connect(addr).await;
    let ffargs = browser_take_job(&mut ws, b"MOVDATA").await;
    assert_eq!(ffargs["inputs"][0], 2);
    assert_eq!(ffargs["outputs"][0], 4);

    ws_send_json(
        &mut ws,
        serde_json::json!({"type": "logLine", "logType": "stdout", "logLine": "frame=  1 fps=0.0"}),
    )
    .await;
    ws_send_json(&mut ws, serde_json::json!({"type": "logEnd"})).await;

    let encoded = b"ENCODED-MP4";
    ws_send_json(
        &mut ws,
        serde_json::json!({"type": "outInfo", "outInfo": [4, encoded.len()]}),
    )
    .await;
    ws.send(Message::binary(encoded.to_vec())).await.unwrap();

    // The subordinate receives the captured log stream, then a clean EOF.
    let (tag, payload) = read_frame(&mut sub_rd).await.unwrap();
    assert_eq!(tag, TAG_STDOUT);
    assert_eq!(payload, b"frame=  1 fps=0.0");
    assert!(matches!(read_frame(&mut sub_rd).await, Err(FrameError::Closed)));

    // The produced file equals the received bytes.
    assert_eq!(std::fs::read(work.path().join("a.mp4")).unwrap(), encoded);
}

#[tokio::test]
async fn browser_reconnect_replays_job_and_discards_first_logs() {
    let uploads = tempfile::tempdir().unwrap();
    let meta = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    let sock_dir = tempfile::tempdir().unwrap();
    let socket_path = sock_dir.path().join("bridge.sock");

    std::fs::write(work.path().join("a.mov"), b"MOVDATA").unwrap();
    let in_path = work.path().join("a.mov").to_string_lossy().into_owned();
    let out_path = work.path().join("a.mp4").to_string_lossy().into_owned();
    let args: Vec<String> = ["ffmpeg", "-i", &in_path, "-y", &out_path]
        .iter()
        .map(|s| s.to_string())
        .collect();

    let addr = spawn_server(make_state(uploads.path(), meta.path()), socket_path.clone()).await;
    let (mut sub_rd, _sub_wr) = connect_subordinate(&socket_path, &args, work.path()).await;

    // First browser takes the job, emits a log line, then vanishes.
    let mut ws1 = ws_connect(addr).await;
    browser_take_job(&mut ws1, b"MOVDATA").await;
    ws_send_json(
        &mut ws1,
        serde_json::json!({"type": "logLine", "logType": "stderr", "logLine": "first attempt"}),
    )
    .await;
    drop(ws1);

    // Second browser picks the requeued job and finishes it.
    let mut ws2 = ws_connect(addr).await;
    browser_take_job(&mut ws2, b"MOVDATA").await;
    ws_send_json(
        &mut ws2,
        serde_json::json!({"type": "logLine", "logType": "stdout", "logLine": "second attempt"}),
    )
    .await;
    ws_send_json(&mut ws2, serde_json::json!({"type": "logEnd"})).await;
    ws_send_json(&mut ws2, serde_json::json!({"type": "outInfo", "outInfo": [4, 3]})).await;
    ws2.send(Message::binary(b"enc".to_vec())).await.unwrap();

    // The subordinate sees only the surviving attempt's frames.
    let (tag, payload) = read_frame(&mut sub_rd).await.unwrap();
    assert_eq!(tag, TAG_STDOUT);
    assert_eq!(payload, b"second attempt");
    assert!(matches!(read_frame(&mut sub_rd).await, Err(FrameError::Closed)));

    assert_eq!(std::fs::read(work.path().join("a.mp4")).unwrap(), b"enc");
}
