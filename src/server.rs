//! Local HTTP API server.
//!
//! Serves the UI bundle and the HTTP flavour of the bridge on loopback:
//!
//! | Route              | Purpose                                          |
//! |--------------------|--------------------------------------------------|
//! | `POST /api/invoke` | bridge envelope in, bridge envelope out          |
//! | `GET  /api/health` | liveness and storage status                      |
//! | everything else    | static files from the bundle directory           |
//!
//! The server runs on its own tokio runtime in a background thread so the
//! winit loop never blocks on it. It owns a separate storage connection;
//! without one, `/api/invoke` answers 503 with a failure envelope.
//!
//! No CORS: the UI is served from this origin. `/api/invoke` only accepts
//! `application/json` bodies from its own origin (or with no `Origin` at all),
//! so a foreign page cannot reach the store with a "simple" cross-site POST.

use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use serde_json::json;
use tokio::sync::oneshot;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use url::Url;

use crate::bridge::{self, BridgeResponse};
use crate::config::ServerConfig;
use crate::error::{HostError, Result};
use crate::storage::Store;

#[derive(Clone)]
struct ApiState {
    store: Arc<Mutex<Option<Store>>>,
    /// `http://127.0.0.1:<port>`, as browsers send it in `Origin`.
    origin: Arc<str>,
}

pub struct LocalApiServer {
    base_url: Url,
    shutdown: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl LocalApiServer {
    /// Binds synchronously, so the returned URL is already reachable.
    pub fn start(config: &ServerConfig, bundle_root: PathBuf, store: Option<Store>) -> Result<Self> {
        let addr: SocketAddr = format!("{}:{}", config.host, config.port)
            .parse()
            .map_err(|e| HostError::ServerStartFailed(format!("bad bind address: {e}")))?;
        if !addr.ip().is_loopback() {
            return Err(HostError::ServerStartFailed(format!(
                "refusing to bind non-loopback address {addr}"
            )));
        }

        let listener = StdTcpListener::bind(addr)
            .map_err(|e| HostError::ServerStartFailed(format!("bind {addr}: {e}")))?;
        listener
            .set_nonblocking(true)
            .map_err(|e| HostError::ServerStartFailed(e.to_string()))?;
        let local = listener
            .local_addr()
            .map_err(|e| HostError::ServerStartFailed(e.to_string()))?;
        let base_url = Url::parse(&format!("http://{local}/"))
            .map_err(|e| HostError::ServerStartFailed(e.to_string()))?;

        if store.is_none() {
            warn!("API server started without storage, /api/invoke will answer 503");
        }
        let app = router(
            ApiState {
                store: Arc::new(Mutex::new(store)),
                origin: base_url.origin().ascii_serialization().into(),
            },
            &bundle_root,
        );

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("kiosk-api")
            .enable_all()
            .build()
            .map_err(|e| HostError::ServerStartFailed(format!("tokio runtime: {e}")))?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let thread = thread::Builder::new()
            .name("kiosk-api-server".into())
            .spawn(move || {
                runtime.block_on(async move {
                    let listener = match tokio::net::TcpListener::from_std(listener) {
                        Ok(listener) => listener,
                        Err(e) => {
                            error!(error = %e, "API listener handoff failed");
                            return;
                        }
                    };
                    let served = axum::serve(listener, app)
                        .with_graceful_shutdown(async {
                            let _ = shutdown_rx.await;
                        })
                        .await;
                    if let Err(e) = served {
                        error!(error = %e, "API server stopped with an error");
                    }
                });
            })
            .map_err(|e| HostError::ServerStartFailed(format!("server thread: {e}")))?;

        info!(url = %base_url, bundle = %bundle_root.display(), "Local API server listening");
        Ok(Self {
            base_url,
            shutdown: Some(shutdown_tx),
            thread: Some(thread),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Graceful stop. Idempotent.
    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("API server thread panicked");
            } else {
                info!("Local API server stopped");
            }
        }
    }
}

impl Drop for LocalApiServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn router(state: ApiState, bundle_root: &Path) -> Router {
    Router::new()
        .route("/api/invoke", post(invoke))
        .route("/api/health", get(health))
        .fallback_service(ServeDir::new(bundle_root))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn envelope(status: StatusCode, response: BridgeResponse) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, "application/json")],
        response.to_json(),
    )
        .into_response()
}

/// Refuses callers other than the UI: foreign `Origin`, or a body type a
/// cross-site form or `text/plain` fetch could send without a preflight.
fn check_caller(headers: &HeaderMap, own_origin: &str) -> std::result::Result<(), Response> {
    if let Some(origin) = headers.get(header::ORIGIN)
        && origin.as_bytes() != own_origin.as_bytes()
    {
        warn!(?origin, "Cross-origin bridge call refused");
        return Err(envelope(
            StatusCode::FORBIDDEN,
            BridgeResponse::failure("cross-origin request refused"),
        ));
    }
    let is_json = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(';').next())
        .is_some_and(|mime| mime.trim().eq_ignore_ascii_case("application/json"));
    if !is_json {
        warn!(content_type = ?headers.get(header::CONTENT_TYPE), "Bridge call without a JSON body refused");
        return Err(envelope(
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            BridgeResponse::failure("expected application/json"),
        ));
    }
    Ok(())
}

async fn invoke(State(state): State<ApiState>, headers: HeaderMap, body: String) -> Response {
    if let Err(refused) = check_caller(&headers, &state.origin) {
        return refused;
    }
    let Ok(guard) = state.store.lock() else {
        return envelope(
            StatusCode::INTERNAL_SERVER_ERROR,
            BridgeResponse::failure("storage lock poisoned"),
        );
    };
    match guard.as_ref() {
        Some(store) => envelope(StatusCode::OK, bridge::dispatch_json(store, &body)),
        None => envelope(
            StatusCode::SERVICE_UNAVAILABLE,
            BridgeResponse::failure("storage unavailable"),
        ),
    }
}

async fn health(State(state): State<ApiState>) -> Response {
    let storage = state
        .store
        .lock()
        .map(|guard| guard.is_some())
        .unwrap_or(false);
    envelope(
        StatusCode::OK,
        BridgeResponse::success(json!({
            "storage": storage,
            "version": env!("CARGO_PKG_VERSION"),
        })),
    )
}
