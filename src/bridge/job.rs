use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::bridge::envelope::LogKind;
use crate::bridge::ffargs::FfArgs;

/// Log-line sentinel written to the subordinate's stderr stream when the
/// active attempt dies to a protocol violation.
pub const SERVER_FAILED: &str = "SERVER_FAILED";

/// Depth of a job's log-frame channel. Browsers emit log lines in small
/// bursts; the unix side drains continuously.
const LOG_CHANNEL_DEPTH: usize = 256;

/// What the browser session feeds back to the unix-side loop.
#[derive(Debug, Clone, PartialEq)]
pub enum LogFrame {
    Line { stream: LogKind, text: String },
    /// Browser disconnected mid-job; the job may be requeued.
    SocketClosed,
    /// Protocol violation or fatal I/O; terminal.
    ServerFailed,
    /// The surviving attempt finished: outputs are on disk.
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum JobState {
    Queued = 0,
    Assigned = 1,
    Streaming = 2,
    Completed = 3,
    ClientAborted = 4,
    ServerFailed = 5,
}

/// One outstanding transcode request, shared between the unix-side reader
/// (owner of the log receiver) and whichever browser session currently holds
/// it. The browser task never holds the subordinate connection; the
/// cancellation token is the only path between them.
pub struct Job {
    pub id: u64,
    pub ffargs: FfArgs,
    pub log_tx: mpsc::Sender<LogFrame>,
    /// Fired when the subordinate drops its socket; the assigned browser
    /// session observes this and closes.
    pub abort: CancellationToken,
    pub attempt: AtomicU32,
    state: AtomicU8,
}

impl Job {
    pub fn new(id: u64, ffargs: FfArgs) -> (Arc<Job>, mpsc::Receiver<LogFrame>) {
        let (log_tx, log_rx) = mpsc::channel(LOG_CHANNEL_DEPTH);
        let job = Arc::new(Job {
            id,
            ffargs,
            log_tx,
            abort: CancellationToken::new(),
            attempt: AtomicU32::new(0),
            state: AtomicU8::new(JobState::Queued as u8),
        });
        (job, log_rx)
    }

    pub fn set_state(&self, state: JobState) {
        self.state.store(state as u8, Ordering::Release);
        tracing::debug!(job = self.id, ?state, "job state");
    }

    pub fn state(&self) -> JobState {
        match self.state.load(Ordering::Acquire) {
            0 => JobState::Queued,
            1 => JobState::Assigned,
            2 => JobState::Streaming,
            3 => JobState::Completed,
            4 => JobState::ClientAborted,
            _ => JobState::ServerFailed,
        }
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("attempt", &self.attempt.load(Ordering::Relaxed))
            .finish()
    }
}
