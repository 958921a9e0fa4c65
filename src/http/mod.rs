pub mod admission;
pub mod api;
pub mod auth;
pub mod listing;
pub mod state;
pub mod statics;
pub mod upload;
pub mod view;

use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{any, get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::http::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(statics::index))
        .route("/static/{*path}", get(statics::serve))
        .route("/ping", any(api::ping))
        .route("/view/{base}", get(view::serve))
        .route("/list", get(listing::list))
        .route("/upload", post(upload::receive))
        .route("/editPlaylist", post(listing::edit_playlist))
        .route("/signout", any(auth::signout))
        .route("/api/typeByName", get(api::type_by_name))
        .route("/api/manifest", get(api::manifest))
        .route("/api/bakeMetadata", post(api::bake_metadata))
        .route("/api/performance", get(admission::performance))
        .route("/ws/ffmpeg", any(crate::bridge::ws::handler))
        // Uploads are whole media files; the multipart receiver streams them.
        .layer(DefaultBodyLimit::disable())
        // Innermost → outermost: auth, then admission, then tracing.
        .layer(middleware::from_fn_with_state(state.clone(), auth::middleware))
        .layer(middleware::from_fn_with_state(state.clone(), admission::middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
