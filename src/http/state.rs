use std::sync::Arc;

use crate::app::AppInfo;
use crate::bridge::Bridge;
use crate::http::admission::Admission;
use crate::http::auth::AuthInfo;
use crate::http::statics::StaticFiles;
use crate::meta::MetaStore;
use crate::util::gate::Gate;

/// Shared application state injected into all route handlers via
/// axum::extract::State. Everything here is built once during startup.
#[derive(Clone)]
pub struct AppState {
    pub app: Arc<AppInfo>,
    pub store: Arc<MetaStore>,
    pub bridge: Arc<Bridge>,
    pub admission: Arc<Admission>,
    pub auth: Arc<AuthInfo>,
    pub statics: Arc<StaticFiles>,
    /// Bounds concurrent native transcoder invocations (bake pipeline).
    pub ffmpeg_gate: Arc<Gate>,
}
