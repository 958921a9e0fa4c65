//! Personal media server — uploads with integrity checking, per-directory
//! metadata caches, and a reverse-RPC bridge from CLI ffmpeg/ffprobe
//! invocations to a browser-hosted WebAssembly transcoder.

pub mod app;
pub mod bridge;
pub mod cli;
pub mod config;
pub mod http;
pub mod meta;
pub mod util;
