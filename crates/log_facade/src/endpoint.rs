//! HTTP endpoint for reading and changing a console threshold at runtime.
//!
//! - `GET` responds with `{"level":"info"}`.
//! - `PUT` or `POST` with a JSON body (`{"level":"debug"}`) or a form body (`level=debug`)
//!   replaces the threshold and responds with the new level.
//! - Missing or unknown levels are rejected with `400` and `{"error":"..."}`; other methods
//!   are rejected with `405`.

use std::{
    net::{SocketAddr, TcpListener},
    sync::Arc,
    thread::JoinHandle,
};

use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::any,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::Dispatch;

use crate::{AtomicThreshold, LoggerError, Severity};

/// Path the endpoint is served under.
pub const LEVEL_ENDPOINT_PATH: &str = "/app/level";

#[derive(Debug, Serialize)]
struct LevelResponse {
    level: Severity,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Debug, Deserialize)]
struct LevelRequest {
    level: Option<String>,
}

/// Serves an [`AtomicThreshold`] over HTTP.
#[derive(Clone, Debug)]
pub struct LevelEndpoint {
    threshold: Arc<AtomicThreshold>,
    dispatch: Option<Dispatch>,
}

impl LevelEndpoint {
    /// Creates an endpoint controlling `threshold`.
    pub fn new(threshold: Arc<AtomicThreshold>) -> Self {
        Self {
            threshold,
            dispatch: None,
        }
    }

    /// Records level changes through `dispatch`.
    pub fn with_dispatch(mut self, dispatch: Dispatch) -> Self {
        self.dispatch = Some(dispatch);
        self
    }

    /// The router serving [`LEVEL_ENDPOINT_PATH`].
    pub fn router(self) -> Router {
        Router::new()
            .route(LEVEL_ENDPOINT_PATH, any(level_handler))
            .with_state(self)
    }

    /// Binds `addr` and serves the endpoint from a dedicated thread.
    ///
    /// Binding happens before this returns, so address conflicts are reported here rather
    /// than from the background thread.
    ///
    /// # Errors
    ///
    /// Returns [`LoggerError::ControlEndpoint`] if the address cannot be bound or the runtime
    /// or thread cannot be created.
    pub fn spawn(self, addr: SocketAddr) -> Result<LevelEndpointHandle, LoggerError> {
        let startup_error = |source| LoggerError::ControlEndpoint { addr, source };

        let listener = TcpListener::bind(addr).map_err(startup_error)?;
        listener.set_nonblocking(true).map_err(startup_error)?;
        let local_addr = listener.local_addr().map_err(startup_error)?;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(startup_error)?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let app = self.router();

        let thread = std::thread::Builder::new()
            .name("log-level-endpoint".to_owned())
            .spawn(move || {
                runtime.block_on(async move {
                    let Ok(listener) = tokio::net::TcpListener::from_std(listener) else {
                        return;
                    };
                    let _ = axum::serve(listener, app)
                        .with_graceful_shutdown(async {
                            // A dropped sender also stops the server.
                            let _ = shutdown_rx.await;
                        })
                        .await;
                });
            })
            .map_err(startup_error)?;

        Ok(LevelEndpointHandle {
            local_addr,
            shutdown: Some(shutdown_tx),
            thread: Some(thread),
        })
    }

    fn record_change(&self, old: Severity, new: Severity) {
        if let Some(dispatch) = &self.dispatch {
            tracing::dispatcher::with_default(dispatch, || {
                tracing::info!(target: "log_facade::endpoint", "log level changed from {old} to {new}");
            });
        }
    }
}

/// A running [`LevelEndpoint`]. Dropping the handle stops the endpoint.
#[derive(Debug)]
pub struct LevelEndpointHandle {
    local_addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl LevelEndpointHandle {
    /// Address the endpoint is listening on.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops accepting requests and waits for the serving thread to exit.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for LevelEndpointHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn level_handler(
    State(endpoint): State<LevelEndpoint>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    match method {
        Method::GET => level_response(endpoint.threshold.get()),
        Method::PUT | Method::POST => match requested_level(&headers, &body) {
            Ok(level) => {
                let old = endpoint.threshold.swap(level);
                if old != level {
                    endpoint.record_change(old, level);
                }
                level_response(level)
            }
            Err(error) => error_response(StatusCode::BAD_REQUEST, error),
        },
        _ => error_response(
            StatusCode::METHOD_NOT_ALLOWED,
            "Only GET and PUT are supported.".to_owned(),
        ),
    }
}

fn requested_level(headers: &HeaderMap, body: &[u8]) -> Result<Severity, String> {
    let is_form = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("application/x-www-form-urlencoded"));

    let requested = if is_form {
        url::form_urlencoded::parse(body)
            .find(|(key, _)| key == "level")
            .map(|(_, value)| value.into_owned())
            .filter(|name| !name.is_empty())
    } else if body.iter().all(u8::is_ascii_whitespace) {
        None
    } else {
        // An empty JSON level names the default severity.
        serde_json::from_slice::<LevelRequest>(body)
            .map_err(|error| format!("malformed request body: {error}"))?
            .level
            .map(|name| {
                if name.is_empty() {
                    Severity::default().as_str().to_owned()
                } else {
                    name
                }
            })
    };

    let name = requested.ok_or_else(|| "must specify logging level".to_owned())?;
    name.parse()
        .map_err(|_| format!("unrecognized level: {name:?}"))
}

fn level_response(level: Severity) -> Response {
    (StatusCode::OK, Json(LevelResponse { level })).into_response()
}

fn error_response(status: StatusCode, error: String) -> Response {
    (status, Json(ErrorResponse { error })).into_response()
}
