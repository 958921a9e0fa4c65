//! Reverse-RPC transcoder bridge: a Unix-socket front end for impersonated
//! ffmpeg/ffprobe processes and a WebSocket back end for browser workers
//! running the WASM transcoder.

pub mod envelope;
pub mod ffargs;
pub mod framing;
pub mod job;
pub mod subordinate;
pub mod ws;

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::net::{unix::OwnedWriteHalf, UnixListener, UnixStream};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::bridge::envelope::LogKind;
use crate::bridge::framing::{read_frame, write_frame, TAG_FFARGS_JSON, TAG_STDERR, TAG_STDOUT};
use crate::bridge::job::{Job, JobState, LogFrame, SERVER_FAILED};

/// Pending jobs waiting for a browser. Small on purpose: each connected
/// subordinate blocks on its own job anyway.
const QUEUE_DEPTH: usize = 8;

/// FIFO of pending jobs with head requeue for retried ones. `push_back`
/// applies backpressure at `QUEUE_DEPTH`; `push_front` never blocks, since a
/// requeued job was already admitted once.
pub struct JobQueue {
    inner: Mutex<VecDeque<Arc<Job>>>,
    jobs: Notify,
    space: Notify,
    capacity: usize,
}

impl JobQueue {
    fn new(capacity: usize) -> Self {
        JobQueue {
            inner: Mutex::new(VecDeque::new()),
            jobs: Notify::new(),
            space: Notify::new(),
            capacity,
        }
    }

    pub async fn push_back(&self, job: Arc<Job>) {
        loop {
            let wait = self.space.notified();
            {
                let mut queue = self.inner.lock().unwrap_or_else(|e| e.into_inner());
                if queue.len() < self.capacity {
                    queue.push_back(job);
                    self.jobs.notify_one();
                    return;
                }
            }
            wait.await;
        }
    }

    pub fn push_front(&self, job: Arc<Job>) {
        let mut queue = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        queue.push_front(job);
        self.jobs.notify_one();
    }

    pub async fn pop(&self) -> Arc<Job> {
        loop {
            let wait = self.jobs.notified();
            {
                let mut queue = self.inner.lock().unwrap_or_else(|e| e.into_inner());
                if let Some(job) = queue.pop_front() {
                    self.space.notify_one();
                    return job;
                }
            }
            wait.await;
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The long-running orchestrator between subordinates and browser workers.
pub struct Bridge {
    pub queue: JobQueue,
    next_id: AtomicU64,
    shutdown: CancellationToken,
}

impl Bridge {
    pub fn new(shutdown: CancellationToken) -> Arc<Self> {
        Arc::new(Bridge {
            queue: JobQueue::new(QUEUE_DEPTH),
            next_id: AtomicU64::new(1),
            shutdown,
        })
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Accept subordinate connections until shutdown. A stale socket file
    /// from a previous run is removed before binding.
    pub async fn serve_unix(self: Arc<Self>, socket_path: PathBuf) -> std::io::Result<()> {
        if socket_path.exists() {
            std::fs::remove_file(&socket_path)?;
        }
        let listener = UnixListener::bind(&socket_path)?;
        tracing::info!("transcoder bridge listening on {}", socket_path.display());

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    let _ = std::fs::remove_file(&socket_path);
                    return Ok(());
                }
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, _)) => {
                            let bridge = Arc::clone(&self);
                            tokio::spawn(async move {
                                if let Err(e) = bridge.handle_subordinate(stream).await {
                                    tracing::warn!("subordinate connection failed: {e}");
                                }
                            });
                        }
                        Err(e) => tracing::warn!("bridge accept error: {e}"),
                    }
                }
            }
        }
    }

    /// One subordinate connection: read its argv, queue a job, then relay
    /// the surviving attempt's log frames back over the socket.
    async fn handle_subordinate(self: Arc<Self>, stream: UnixStream) -> anyhow::Result<()> {
        let (mut rd, mut wr) = stream.into_split();

        let (tag, payload) = read_frame(&mut rd).await?;
        if tag != TAG_FFARGS_JSON {
            anyhow::bail!("expected {TAG_FFARGS_JSON} frame, got {tag}");
        }
        let ffargs: ffargs::FfArgs = serde_json::from_slice(&payload)?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (job, mut log_rx) = Job::new(id, ffargs);
        tracing::info!(job = id, args = ?job.ffargs.args, "bridge job queued");

        // Any read result on the subordinate socket, EOF included, means the
        // caller is gone: fire the abort so the assigned browser lets go.
        let abort = job.abort.clone();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            use tokio::io::AsyncReadExt;
            let mut byte = [0u8; 1];
            tokio::select! {
                _ = shutdown.cancelled() => {}
                _ = rd.read(&mut byte) => {}
            }
            abort.cancel();
        });

        tokio::select! {
            _ = job.abort.cancelled() => return Ok(()),
            _ = self.queue.push_back(Arc::clone(&job)) => {}
        }

        // Accumulate log frames per attempt; the subordinate only ever sees
        // the frames of the attempt that completed.
        let mut buffered: Vec<(LogKind, String)> = Vec::new();
        loop {
            let frame = tokio::select! {
                _ = job.abort.cancelled() => {
                    tracing::info!(job = id, "subordinate aborted, dropping job");
                    return Ok(());
                }
                frame = log_rx.recv() => frame,
            };

            match frame {
                Some(LogFrame::Line { stream, text }) => buffered.push((stream, text)),
                Some(LogFrame::SocketClosed) => {
                    job.set_state(JobState::ClientAborted);
                    if job.abort.is_cancelled() {
                        return Ok(());
                    }
                    tracing::warn!(job = id, "browser disconnected, requeueing job");
                    buffered.clear();
                    job.set_state(JobState::Queued);
                    self.queue.push_front(Arc::clone(&job));
                }
                Some(LogFrame::ServerFailed) => {
                    job.set_state(JobState::ServerFailed);
                    flush_log(&mut wr, &buffered).await?;
                    write_frame(&mut wr, TAG_STDERR, SERVER_FAILED.as_bytes()).await?;
                    anyhow::bail!("job {id} failed on a protocol violation");
                }
                Some(LogFrame::End) => {
                    job.set_state(JobState::Completed);
                    flush_log(&mut wr, &buffered).await?;
                    tracing::info!(job = id, "bridge job completed");
                    return Ok(());
                }
                // All senders dropped without a terminal frame.
                None => anyhow::bail!("job {id} log channel closed unexpectedly"),
            }
        }
    }
}

async fn flush_log(wr: &mut OwnedWriteHalf, frames: &[(LogKind, String)]) -> std::io::Result<()> {
    for (stream, text) in frames {
        let tag = match stream {
            LogKind::Stdout => TAG_STDOUT,
            LogKind::Stderr => TAG_STDERR,
        };
        write_frame(wr, tag, text.as_bytes()).await?;
    }
    Ok(())
}
