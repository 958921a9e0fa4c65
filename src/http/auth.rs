//! Cookie-session authentication: a single shared password guards the whole
//! surface, successful logins mint 64-hex cookies whose expiries persist to
//! auth.json under a debounced writer.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::RequestExt;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Deserialize;

use crate::http::state::AppState;
use crate::util::pacing::Debounce;

pub const AUTH_COOKIE_NAME: &str = "auth";
const AUTH_COOKIE_LENGTH: usize = 64;
const AUTH_COOKIE_LIFE_SECS: i64 = 3 * 24 * 3600;
const BAD_TRIES_TOLERANCE: u32 = 10;
const STORE_DEBOUNCE: Duration = Duration::from_secs(10);

fn cookie_life() -> chrono::Duration {
    chrono::Duration::seconds(AUTH_COOKIE_LIFE_SECS)
}

/// The expiry map and its backing file, shared between the middleware and
/// the debounced writer.
struct ExpiryStore {
    path: PathBuf,
    map: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl ExpiryStore {
    fn save(&self) {
        let map = self.map.lock().unwrap_or_else(|e| e.into_inner()).clone();
        match serde_json::to_vec_pretty(&map) {
            Ok(data) => {
                if let Err(e) = std::fs::write(&self.path, data) {
                    tracing::error!("failed to store auth file: {e}");
                } else {
                    tracing::info!("stored {} authenticated sessions", map.len());
                }
            }
            Err(e) => tracing::error!("failed to encode auth file: {e}"),
        }
    }
}

pub struct AuthInfo {
    session_password: String,
    store: Arc<ExpiryStore>,
    file_updater: Debounce,
    bad_tries: AtomicU32,
}

impl AuthInfo {
    /// Load auth.json (creating an empty one when absent), dropping expired
    /// cookies on the way in.
    pub fn load(path: PathBuf, session_password: String) -> std::io::Result<Self> {
        let data = match std::fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("no auth sessions found");
                std::fs::write(&path, b"{}")?;
                b"{}".to_vec()
            }
            Err(e) => return Err(e),
        };

        let mut map: HashMap<String, DateTime<Utc>> =
            serde_json::from_slice(&data).unwrap_or_default();

        let now = Utc::now();
        let before = map.len();
        map.retain(|_, expiry| *expiry > now);
        let expired = before - map.len();

        tracing::info!("loaded {} authenticated sessions", map.len());

        let store = Arc::new(ExpiryStore {
            path,
            map: Mutex::new(map),
        });
        if expired > 0 {
            store.save();
        }

        let writer = Arc::clone(&store);
        Ok(AuthInfo {
            session_password,
            store,
            file_updater: Debounce::new(STORE_DEBOUNCE, move || writer.save()),
            bad_tries: AtomicU32::new(0),
        })
    }

    /// `--password` when given, otherwise a short random one the operator
    /// reads off the startup log.
    pub fn resolve_password(configured: Option<String>) -> String {
        match configured {
            Some(p) if !p.is_empty() => p,
            _ => format!("random{:04x}", rand::thread_rng().gen::<u16>()),
        }
    }

    pub fn session_password(&self) -> &str {
        &self.session_password
    }

    fn is_valid(&self, cookie: &str, now: DateTime<Utc>) -> bool {
        if cookie.len() != AUTH_COOKIE_LENGTH {
            return false;
        }
        let mut map = self.store.map.lock().unwrap_or_else(|e| e.into_inner());
        match map.get(cookie) {
            Some(expiry) if *expiry > now => {
                // Sliding expiry: every authenticated request refreshes.
                map.insert(cookie.to_string(), now + cookie_life());
                true
            }
            Some(_) => {
                map.remove(cookie);
                false
            }
            None => false,
        }
    }

    fn mint(&self, now: DateTime<Utc>) -> String {
        let mut rng = rand::thread_rng();
        let value: String = (0..AUTH_COOKIE_LENGTH / 2)
            .map(|_| format!("{:02x}", rng.gen::<u8>()))
            .collect();
        self.store
            .map
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(value.clone(), now + cookie_life());
        value
    }
}

#[derive(Deserialize)]
struct LoginForm {
    password: String,
}

fn cookie_header(value: &str, expiry: DateTime<Utc>) -> String {
    format!(
        "{AUTH_COOKIE_NAME}={value}; Path=/; Expires={}; HttpOnly",
        expiry.format("%a, %d %b %Y %H:%M:%S GMT")
    )
}

fn request_cookie(req: &Request) -> Option<String> {
    let cookies = req.headers().get(header::COOKIE)?.to_str().ok()?;
    cookies.split(';').find_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        (name == AUTH_COOKIE_NAME).then(|| value.to_string())
    })
}

fn is_local(req: &Request) -> bool {
    match req.extensions().get::<ConnectInfo<SocketAddr>>() {
        Some(info) => info.0.ip().is_loopback(),
        // No connect info means an in-process caller (tests); treat as local.
        None => true,
    }
}

/// Authentication middleware: loopback bypass, cookie check with sliding
/// expiry, password form handling for everything else. /ping and the
/// transcoder WebSocket stay open: reachability probes carry no cookie and
/// the worker endpoint serves the page's already-established session.
pub async fn middleware(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let auth = &state.auth;
    let now = Utc::now();

    let path = req.uri().path();
    if path == "/ping" || path == "/ws/ffmpeg" {
        return next.run(req).await;
    }

    if is_local(&req) {
        return next.run(req).await;
    }

    if let Some(cookie) = request_cookie(&req) {
        if auth.is_valid(&cookie, now) {
            auth.file_updater.call();
            let mut response = next.run(req).await;
            if let Ok(header_value) = cookie_header(&cookie, now + cookie_life()).parse() {
                response.headers_mut().append(header::SET_COOKIE, header_value);
            }
            return response;
        }
        tracing::info!("rejected expired or unknown auth cookie");
    }

    if req.method() == axum::http::Method::POST {
        let form = match req.extract::<axum::Form<LoginForm>, _>().await {
            Ok(axum::Form(form)) => form,
            Err(_) => return (StatusCode::BAD_REQUEST, "Error parsing form").into_response(),
        };

        if form.password == auth.session_password() {
            auth.bad_tries.store(0, Ordering::Relaxed);
            let value = auth.mint(now);
            auth.file_updater.call();
            tracing::info!("session cookie created");
            let mut response = Redirect::to("/").into_response();
            if let Ok(header_value) = cookie_header(&value, now + cookie_life()).parse() {
                response.headers_mut().append(header::SET_COOKIE, header_value);
            }
            return response;
        }

        let tries = auth.bad_tries.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::warn!("bad password attempt {tries}/{BAD_TRIES_TOLERANCE}");
        if tries >= BAD_TRIES_TOLERANCE {
            tracing::error!("too many bad password attempts, shutting down");
            std::process::exit(1);
        }
        return Redirect::to("/").into_response();
    }

    login_form().into_response()
}

/// /signout — clear the cookie and bounce to the login form.
pub async fn signout(State(state): State<AppState>, req: Request) -> Response {
    if let Some(cookie) = request_cookie(&req) {
        state
            .auth
            .store
            .map
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&cookie);
        state.auth.file_updater.call();
    }
    let mut response = Redirect::to("/").into_response();
    if let Ok(header_value) = cookie_header("", DateTime::<Utc>::UNIX_EPOCH).parse() {
        response.headers_mut().append(header::SET_COOKIE, header_value);
    }
    response
}

fn login_form() -> Html<&'static str> {
    Html(
        r#"<!DOCTYPE html>
<html>
<head>
<title>Login</title>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<style>
html, body { font-size: 24px; height: 100vh; }
input, button { font-size: 1rem; }
.flex { display: flex; justify-content: center; align-items: center; }
</style>
</head>
<body class="flex">
<form method="POST" action="/">
  <div><input id="password" type="password" name="password" placeholder="Password" required /></div>
  <div class="flex"><button type="submit">Submit</button></div>
</form>
<script>document.getElementById("password").focus();</script>
</body>
</html>
"#,
    )
}
