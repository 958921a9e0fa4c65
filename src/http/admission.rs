use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use axum::extract::{ConnectInfo, Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sysinfo::{Pid, ProcessesToUpdate, System};

use crate::http::state::AppState;
use crate::util::gate::Gate;
use crate::util::pacing::Throttle;

/// Minimum spacing between process-memory samples.
const MEM_SAMPLE_COOLDOWN: Duration = Duration::from_secs(1);

/// One in-flight request, kept in the registry for the lifetime of the
/// request and exposed through /api/performance.
#[derive(Debug, Clone)]
pub struct RequestInfo {
    pub uri: String,
    pub remote_addr: String,
    pub start: DateTime<Utc>,
    pub started: Instant,
}

#[derive(Debug, Default)]
struct Stats {
    mem_alloc: AtomicU64,
    peak_mem_alloc: AtomicU64,
    concurrent_requests: AtomicI64,
    peak_concurrent_requests: AtomicI64,
    peak_nanoseconds_per_request: AtomicU64,
    timeouts: AtomicU64,
    request_count: AtomicU64,
}

/// The admission gate plus everything observed through it: a live registry
/// of in-flight requests, a throttled process-memory sampler, and the peak
/// counters.
pub struct Admission {
    gate: Gate,
    registry: Mutex<HashMap<u64, RequestInfo>>,
    stats: Stats,
    mem_throttle: Throttle,
    system: Mutex<System>,
    pid: Pid,
}

impl Admission {
    pub fn new(max_concurrent: usize, timeout: Duration) -> Self {
        Admission {
            gate: Gate::new(max_concurrent, timeout),
            registry: Mutex::new(HashMap::new()),
            stats: Stats::default(),
            mem_throttle: Throttle::new(MEM_SAMPLE_COOLDOWN),
            system: Mutex::new(System::new()),
            pid: Pid::from_u32(std::process::id()),
        }
    }

    /// Sample this process's resident memory, at most once per cooldown
    /// window regardless of how many requests ask.
    pub fn sample_memory(&self) {
        self.mem_throttle.call(|| {
            let mut system = self.system.lock().unwrap_or_else(|e| e.into_inner());
            system.refresh_processes(ProcessesToUpdate::Some(&[self.pid]), true);
            let Some(process) = system.process(self.pid) else {
                return;
            };
            let rss = process.memory();
            self.stats.mem_alloc.store(rss, Ordering::Relaxed);
            compare_peak_u64(&self.stats.peak_mem_alloc, rss);
        });
    }

    pub fn timeouts(&self) -> u64 {
        self.stats.timeouts.load(Ordering::Relaxed)
    }

    /// Requests currently between registration and completion.
    pub fn in_flight(&self) -> usize {
        self.registry.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// Raise a peak value with a load/compare-swap loop; lost races retry until
/// the stored peak is at least `current`.
fn compare_peak_u64(peak: &AtomicU64, current: u64) {
    let mut seen = peak.load(Ordering::Relaxed);
    while current > seen {
        match peak.compare_exchange_weak(seen, current, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => return,
            Err(actual) => seen = actual,
        }
    }
}

fn compare_peak_i64(peak: &AtomicI64, current: i64) {
    let mut seen = peak.load(Ordering::Relaxed);
    while current > seen {
        match peak.compare_exchange_weak(seen, current, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => return,
            Err(actual) => seen = actual,
        }
    }
}

/// Releases an admitted request's slot when it finishes — or when the
/// connection dies and hyper drops the handler future mid-flight. Without
/// the Drop path, abandoned requests would leak gate slots.
struct AdmittedSlot {
    admission: std::sync::Arc<Admission>,
    id: u64,
}

impl Drop for AdmittedSlot {
    fn drop(&mut self) {
        self.admission
            .stats
            .concurrent_requests
            .fetch_sub(1, Ordering::Relaxed);
        self.admission.gate.release();
        self.admission
            .registry
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.id);
    }
}

/// Wraps every request: registry entry, admission gate, memory sample,
/// concurrency accounting, elapsed-time peak.
pub async fn middleware(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let admission = std::sync::Arc::clone(&state.admission);
    let stats = &admission.stats;

    let id = stats.request_count.fetch_add(1, Ordering::Relaxed) + 1;
    let remote_addr = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.to_string())
        .unwrap_or_else(|| "unknown".to_string());
    let info = RequestInfo {
        uri: req.uri().to_string(),
        remote_addr,
        start: Utc::now(),
        started: Instant::now(),
    };
    admission
        .registry
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .insert(id, info);

    if !admission.gate.acquire().await {
        stats.timeouts.fetch_add(1, Ordering::Relaxed);
        admission
            .registry
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id);
        tracing::warn!(request = id, "admission timeout");
        return (StatusCode::SERVICE_UNAVAILABLE, "Timeout").into_response();
    }

    admission.sample_memory();

    let concurrent = stats.concurrent_requests.fetch_add(1, Ordering::Relaxed) + 1;
    compare_peak_i64(&stats.peak_concurrent_requests, concurrent);
    let slot = AdmittedSlot {
        admission: std::sync::Arc::clone(&admission),
        id,
    };

    let started = Instant::now();
    let response = next.run(req).await;
    let elapsed = started.elapsed().as_nanos() as u64;
    compare_peak_u64(&admission.stats.peak_nanoseconds_per_request, elapsed);

    drop(slot);
    response
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatsView {
    mem_alloc: u64,
    peak_mem_alloc: u64,
    concurrent_requests: i64,
    peak_concurrent_requests: i64,
    peak_nanoseconds_per_request: u64,
    timeouts: u64,
    request_count: u64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RequestInfoView {
    uri: String,
    remote_addr: String,
    start: DateTime<Utc>,
    elapsed_nanoseconds: u64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PerformanceView {
    stats: StatsView,
    request_infos: HashMap<u64, RequestInfoView>,
}

/// GET /api/performance — counters plus the live request registry, with
/// elapsed durations computed at render time.
pub async fn performance(State(state): State<AppState>) -> Response {
    let admission = &state.admission;
    let stats = &admission.stats;

    let request_infos = admission
        .registry
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .iter()
        .map(|(id, info)| {
            (
                *id,
                RequestInfoView {
                    uri: info.uri.clone(),
                    remote_addr: info.remote_addr.clone(),
                    start: info.start,
                    elapsed_nanoseconds: info.started.elapsed().as_nanos() as u64,
                },
            )
        })
        .collect();

    Json(PerformanceView {
        stats: StatsView {
            mem_alloc: stats.mem_alloc.load(Ordering::Relaxed),
            peak_mem_alloc: stats.peak_mem_alloc.load(Ordering::Relaxed),
            concurrent_requests: stats.concurrent_requests.load(Ordering::Relaxed),
            peak_concurrent_requests: stats.peak_concurrent_requests.load(Ordering::Relaxed),
            peak_nanoseconds_per_request: stats.peak_nanoseconds_per_request.load(Ordering::Relaxed),
            timeouts: stats.timeouts.load(Ordering::Relaxed),
            request_count: stats.request_count.load(Ordering::Relaxed),
        },
        request_infos,
    })
    .into_response()
}
