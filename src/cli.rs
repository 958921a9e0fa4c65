use clap::Parser;
use std::time::Duration;

#[derive(Parser, Debug, Default)]
#[command(
    name = "homecast",
    about = "Personal media server — uploads, playlists, and browser-side WASM transcoding",
    long_about = None,
    version = env!("GIT_VERSION"),
)]
pub struct Args {
    /// Maximum number of concurrent HTTP requests admitted at once
    #[arg(long)]
    pub max_concurrent_requests: Option<usize>,

    /// Admission deadline for a request slot (e.g. 30s, 1m); 0 blocks forever
    #[arg(long, value_parser = humantime::parse_duration)]
    pub request_timeout: Option<Duration>,

    /// Maximum number of concurrent native ffmpeg/ffprobe processes
    #[arg(long)]
    pub max_concurrent_ffmpeg: Option<usize>,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,

    /// Debug channels as single characters; `*` enables all
    #[arg(short = 'd', value_name = "CHANNELS")]
    pub debug_channels: Option<String>,

    /// Session password; empty generates a random one printed at startup
    #[arg(long)]
    pub password: Option<String>,

    /// HTTP port to listen on [default: 8200]
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Path to TOML config file (overrides default search: ./homecast.toml, ~/.config/homecast/config.toml)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<std::path::PathBuf>,

    /// Bind to localhost only (127.0.0.1) instead of all interfaces (0.0.0.0 + :::)
    #[arg(long)]
    pub localhost: bool,

    /// Test harness selector
    #[arg(short = 'T', value_name = "TEST", hide = true)]
    pub test: Option<String>,

    /// Test harness variable
    #[arg(long = "Tv", value_name = "VAR", hide = true)]
    pub test_var: Option<String>,
}
