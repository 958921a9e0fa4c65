use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use axum::Router;
use clap::Parser;
use tokio_util::sync::CancellationToken;

use homecast::app::{AppInfo, AUTH_JSON, METADATA_DIR, UPLOADS_DIR};
use homecast::bridge::{subordinate, Bridge};
use homecast::http::admission::Admission;
use homecast::http::auth::AuthInfo;
use homecast::http::state::AppState;
use homecast::http::statics::StaticFiles;
use homecast::meta::MetaStore;
use homecast::util::gate::Gate;
use homecast::util::netinfo;
use homecast::{cli, config, http};

/// Restart delay for the serve loops after a listener error.
const RESTART_BACKOFF: Duration = Duration::from_secs(10);

/// Set to true once the first Ctrl+C is received. Second Ctrl+C force-exits.
static SHUTTING_DOWN: AtomicBool = AtomicBool::new(false);

/// Wait for the first Ctrl+C (graceful shutdown).
/// On second Ctrl+C (during shutdown wait), force-exits immediately.
async fn wait_for_shutdown() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install Ctrl+C handler");
    if SHUTTING_DOWN.swap(true, Ordering::SeqCst) {
        eprintln!("\nhomecast: forced exit");
        std::process::exit(1);
    }
}

#[tokio::main]
async fn main() {
    // Invoked under the transcoder's name by a third-party script: act as
    // the bridge subordinate instead of starting the server.
    let argv: Vec<String> = std::env::args().collect();
    if let Some(kind) = argv.first().and_then(|a| subordinate::impersonated_kind(a)) {
        init_tracing(false);
        let code = subordinate::run(kind, argv).await;
        std::process::exit(code);
    }

    let args = cli::Args::parse();

    let file_config = config::find_config_file(args.config.as_deref()).and_then(|path| {
        match config::load_config(&path) {
            Ok(cfg) => Some(cfg),
            Err(e) => {
                eprintln!("warning: failed to parse config file: {e}");
                None
            }
        }
    });
    let config = config::Config::resolve(file_config, &args);

    init_tracing(config.debug);

    // Directories.
    let upload_root = PathBuf::from(UPLOADS_DIR);
    let metadata_root = dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(METADATA_DIR);
    for dir in [&upload_root, &metadata_root] {
        if let Err(e) = std::fs::create_dir_all(dir) {
            tracing::error!("FATAL cannot create {}: {e}", dir.display());
            std::process::exit(1);
        }
    }
    tracing::info!("upload directory is {}", upload_root.display());
    tracing::info!("metadata directory is {}", metadata_root.display());

    // Metadata store: sidecars first, then a fresh scan of every album.
    let store = Arc::new(MetaStore::new(&metadata_root));
    if let Err(e) = store.load_all_from_disk() {
        tracing::error!("FATAL cannot load metadata caches: {e}");
        std::process::exit(1);
    }
    if let Err(e) = http::listing::register_albums(&store, &upload_root) {
        tracing::error!("FATAL cannot cache upload directories: {e}");
        std::process::exit(1);
    }

    // Addresses.
    let local_ips = netinfo::resolve_local_ips();
    tracing::debug!("local address fingerprint {}", netinfo::fingerprint(&local_ips));

    // Session password.
    let password = AuthInfo::resolve_password(config.password.clone());
    tracing::info!("session password is {password:?}; 10 consecutive bad tries shut the server down");
    let auth = match AuthInfo::load(PathBuf::from(AUTH_JSON), password) {
        Ok(auth) => Arc::new(auth),
        Err(e) => {
            tracing::error!("FATAL cannot load {AUTH_JSON}: {e}");
            std::process::exit(1);
        }
    };

    let shutdown = CancellationToken::new();

    // Transcoder bridge on the Unix socket, restarted on failure.
    let bridge = Bridge::new(shutdown.clone());
    {
        let bridge = Arc::clone(&bridge);
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            loop {
                let serve = Arc::clone(&bridge).serve_unix(AppInfo::bridge_socket_path());
                if let Err(e) = serve.await {
                    tracing::error!("bridge listener failed: {e}");
                }
                if shutdown.is_cancelled() {
                    return;
                }
                tokio::time::sleep(RESTART_BACKOFF).await;
                tracing::error!("attempting bridge restart...");
            }
        });
    }

    // Admission gate plus the periodic memory sampler.
    let admission = Arc::new(Admission::new(
        config.max_concurrent_requests,
        config.request_timeout,
    ));
    {
        let admission = Arc::clone(&admission);
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(10));
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    _ = ticker.tick() => admission.sample_memory(),
                }
            }
        });
    }

    let app_info = Arc::new(AppInfo {
        start: std::time::Instant::now(),
        upload_root,
        metadata_root,
        local_ips,
        config: config.clone(),
    });

    let state = AppState {
        app: Arc::clone(&app_info),
        store,
        bridge,
        admission: Arc::clone(&admission),
        auth,
        statics: Arc::new(StaticFiles::load(std::path::Path::new("static"))),
        ffmpeg_gate: Arc::new(Gate::new(config.max_concurrent_ffmpeg, Duration::ZERO)),
    };
    let app = http::build_router(state);

    // Startup banner.
    tracing::info!("homecast \"{}\" on port {}", config.name, config.port);
    for ip in &app_info.local_ips {
        if ip.contains(':') {
            tracing::info!("  http://[{ip}]:{}", config.port);
        } else {
            tracing::info!("  http://{ip}:{}", config.port);
        }
    }

    if config.localhost {
        spawn_serve_loop("localhost", bind_localhost(config.port), app, shutdown.clone());
    } else {
        spawn_serve_loop("IPv4", bind_v4(config.port), app.clone(), shutdown.clone());
        spawn_serve_loop("IPv6", bind_v6(config.port), app, shutdown.clone());
    }

    wait_for_shutdown().await;
    tracing::info!("shutting down...");
    shutdown.cancel();

    // Give in-flight requests a moment to drain before the process exits.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while admission.in_flight() > 0 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    tracing::info!("goodbye");
}

fn init_tracing(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .init();
}

/// Bind-then-serve loop with the fixed restart backoff. Each iteration
/// rebinds, so a transient bind failure (port briefly held) also recovers.
fn spawn_serve_loop(
    name: &'static str,
    bind: impl Fn() -> std::io::Result<std::net::TcpListener> + Send + 'static,
    app: Router,
    shutdown: CancellationToken,
) {
    tokio::spawn(async move {
        loop {
            if shutdown.is_cancelled() {
                return;
            }
            match bind_tokio(&bind) {
                Ok(listener) => {
                    let served = axum::serve(
                        listener,
                        app.clone().into_make_service_with_connect_info::<SocketAddr>(),
                    )
                    .with_graceful_shutdown(shutdown.clone().cancelled_owned())
                    .await;
                    if shutdown.is_cancelled() {
                        return;
                    }
                    if let Err(e) = served {
                        tracing::error!("{name} server error: {e}");
                    }
                }
                Err(e) => tracing::error!("{name} bind error: {e}"),
            }
            tokio::time::sleep(RESTART_BACKOFF).await;
            tracing::error!("attempting {name} restart...");
        }
    });
}

fn bind_tokio(
    bind: &impl Fn() -> std::io::Result<std::net::TcpListener>,
) -> std::io::Result<tokio::net::TcpListener> {
    let listener = bind()?;
    listener.set_nonblocking(true)?;
    tokio::net::TcpListener::from_std(listener)
}

fn bind_localhost(port: u16) -> impl Fn() -> std::io::Result<std::net::TcpListener> {
    move || std::net::TcpListener::bind(("127.0.0.1", port))
}

fn bind_v4(port: u16) -> impl Fn() -> std::io::Result<std::net::TcpListener> {
    move || std::net::TcpListener::bind(("0.0.0.0", port))
}

/// Separate IPv6 socket with IPV6_V6ONLY=true. Linux defaults the shared
/// stack, which makes the 0.0.0.0 and :: binds collide.
fn bind_v6(port: u16) -> impl Fn() -> std::io::Result<std::net::TcpListener> {
    move || {
        let addr: SocketAddr = format!("[::]:{port}")
            .parse()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, format!("{e}")))?;
        let socket = socket2::Socket::new(
            socket2::Domain::IPV6,
            socket2::Type::STREAM,
            Some(socket2::Protocol::TCP),
        )?;
        socket.set_only_v6(true)?;
        socket.set_reuse_address(true)?;
        socket.bind(&addr.into())?;
        socket.listen(1024)?;
        Ok(socket.into())
    }
}
