use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;

use crate::bridge::envelope::Envelope;
use crate::bridge::job::{Job, JobState, LogFrame};
use crate::bridge::Bridge;
use crate::http::state::AppState;

/// Idle heartbeat cadence while no job is available. A failed heartbeat
/// write is how we notice a silently departed browser.
const HEARTBEAT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("websocket closed")]
    Closed,
    #[error("protocol violation: {0}")]
    Protocol(String),
    #[error("websocket transport: {0}")]
    Ws(#[from] axum::Error),
    #[error("file I/O: {0}")]
    Io(#[from] std::io::Error),
}

/// GET /ws/ffmpeg — upgrade a browser worker onto the bridge.
pub async fn handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    let bridge = Arc::clone(&state.bridge);
    ws.on_upgrade(move |socket| async move {
        match browser_session(socket, bridge).await {
            Ok(()) => tracing::info!("browser transcoder disconnected"),
            Err(e) => tracing::info!("browser transcoder session ended: {e}"),
        }
    })
}

/// Serve one browser worker: confirm readiness, then hand it jobs until the
/// socket dies. One job at a time per browser.
pub async fn browser_session(mut socket: WebSocket, bridge: Arc<Bridge>) -> Result<(), SessionError> {
    match recv_envelope(&mut socket).await? {
        Envelope::Ready => {}
        other => return Err(SessionError::Protocol(format!("expected ready, got {other:?}"))),
    }
    send_envelope(&mut socket, &Envelope::Ready).await?;
    tracing::info!("browser transcoder connected");

    let shutdown = bridge.shutdown_token();
    loop {
        // Heartbeat until a job shows up.
        let job = loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    let _ = socket.send(Message::Close(None)).await;
                    return Ok(());
                }
                popped = tokio::time::timeout(HEARTBEAT, bridge.queue.pop()) => match popped {
                    Ok(job) => break job,
                    Err(_) => {
                        send_envelope(&mut socket, &Envelope::Wait).await?;
                        match recv_envelope(&mut socket).await? {
                            Envelope::Wait => {}
                            other => {
                                return Err(SessionError::Protocol(format!(
                                    "expected wait, got {other:?}"
                                )))
                            }
                        }
                    }
                }
            }
        };

        // The subordinate may have hung up while the job sat queued.
        if job.abort.is_cancelled() {
            continue;
        }

        // taskReady handshake. Until it completes the job is not ours, so
        // any failure puts it back at the head of the queue.
        if let Err(e) = handshake(&mut socket).await {
            bridge.queue.push_front(job);
            return Err(e);
        }

        job.attempt.fetch_add(1, Ordering::Relaxed);
        job.set_state(JobState::Assigned);

        let served = tokio::select! {
            // Subordinate gone mid-job: close this socket and stop waiting.
            _ = job.abort.cancelled() => {
                let _ = socket.send(Message::Close(None)).await;
                return Ok(());
            }
            served = serve_job(&mut socket, &job) => served,
        };

        match served {
            Ok(()) => {
                let _ = job.log_tx.send(LogFrame::End).await;
            }
            Err(e @ (SessionError::Protocol(_) | SessionError::Io(_))) => {
                let _ = job.log_tx.send(LogFrame::ServerFailed).await;
                return Err(e);
            }
            Err(e) => {
                let _ = job.log_tx.send(LogFrame::SocketClosed).await;
                return Err(e);
            }
        }
    }
}

async fn handshake(socket: &mut WebSocket) -> Result<(), SessionError> {
    send_envelope(socket, &Envelope::TaskReady).await?;
    match recv_envelope(socket).await? {
        Envelope::TaskReady => Ok(()),
        other => Err(SessionError::Protocol(format!(
            "expected taskReady, got {other:?}"
        ))),
    }
}

/// One job over an already-confirmed socket: ship the argv and inputs, relay
/// log lines, then collect the outputs in declared order.
async fn serve_job(socket: &mut WebSocket, job: &Arc<Job>) -> Result<(), SessionError> {
    send_envelope(
        socket,
        &Envelope::FfArgs {
            ffargs: Some(job.ffargs.clone()),
        },
    )
    .await?;
    match recv_envelope(socket).await? {
        Envelope::FfArgs { .. } => {}
        other => {
            return Err(SessionError::Protocol(format!(
                "expected ffargs ack, got {other:?}"
            )))
        }
    }

    for &index in &job.ffargs.inputs {
        let path = job.ffargs.resolve(index);
        let size = tokio::fs::metadata(&path).await?.len();

        let info = serde_json::to_string(&(index, size))
            .map_err(|e| SessionError::Protocol(e.to_string()))?;
        socket.send(Message::Text(info.into())).await?;
        match recv_envelope(socket).await? {
            Envelope::InputInfoOk => {}
            other => {
                return Err(SessionError::Protocol(format!(
                    "expected inputInfoOk, got {other:?}"
                )))
            }
        }

        let data = tokio::fs::read(&path).await?;
        socket.send(Message::Binary(data.into())).await?;
        match recv_envelope(socket).await? {
            Envelope::InputOk => {}
            other => {
                return Err(SessionError::Protocol(format!(
                    "expected inputOk, got {other:?}"
                )))
            }
        }
    }

    job.set_state(JobState::Streaming);

    loop {
        match recv_envelope(socket).await? {
            Envelope::LogLine { log_type, log_line } => {
                // A failed send means the unix side is gone; the abort token
                // fires right behind it.
                let _ = job
                    .log_tx
                    .send(LogFrame::Line {
                        stream: log_type,
                        text: log_line,
                    })
                    .await;
            }
            Envelope::LogEnd => break,
            other => {
                return Err(SessionError::Protocol(format!(
                    "expected logLine/logEnd, got {other:?}"
                )))
            }
        }
    }

    for &index in &job.ffargs.outputs {
        let (got, size) = match recv_envelope(socket).await? {
            Envelope::OutInfo { out_info } => out_info,
            other => {
                return Err(SessionError::Protocol(format!(
                    "expected outInfo, got {other:?}"
                )))
            }
        };
        if got != index as i64 {
            return Err(SessionError::Protocol(format!(
                "output index mismatch: expected {index}, got {got}"
            )));
        }

        let data = recv_binary(socket).await?;
        if data.len() as u64 != size {
            return Err(SessionError::Protocol(format!(
                "output size mismatch: declared {size}, received {}",
                data.len()
            )));
        }
        tokio::fs::write(job.ffargs.resolve(index), &data).await?;
    }

    Ok(())
}

async fn send_envelope(socket: &mut WebSocket, envelope: &Envelope) -> Result<(), SessionError> {
    socket
        .send(Message::Text(envelope.to_json().into()))
        .await
        .map_err(SessionError::from)
}

async fn recv_message(socket: &mut WebSocket) -> Result<Message, SessionError> {
    loop {
        match socket.recv().await {
            None => return Err(SessionError::Closed),
            Some(Err(e)) => return Err(e.into()),
            Some(Ok(Message::Close(_))) => return Err(SessionError::Closed),
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
            Some(Ok(msg)) => return Ok(msg),
        }
    }
}

async fn recv_envelope(socket: &mut WebSocket) -> Result<Envelope, SessionError> {
    match recv_message(socket).await? {
        Message::Text(text) => serde_json::from_str(text.as_str())
            .map_err(|e| SessionError::Protocol(format!("bad envelope: {e}"))),
        _ => Err(SessionError::Protocol(
            "binary message while expecting an envelope".to_string(),
        )),
    }
}

async fn recv_binary(socket: &mut WebSocket) -> Result<Vec<u8>, SessionError> {
    match recv_message(socket).await? {
        Message::Binary(data) => Ok(data.to_vec()),
        _ => Err(SessionError::Protocol(
            "text message while expecting a file body".to_string(),
        )),
    }
}
