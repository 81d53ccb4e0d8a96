use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{Arc, Mutex},
    time::Duration,
};

use {
    axum::{
        Router,
        extract::{Query, State},
        http::{StatusCode, header},
        response::{Html, IntoResponse, Redirect, Response},
        routing::get,
    },
    outlook_config::RedirectTarget,
    tokio::{net::TcpListener, sync::oneshot, task::JoinHandle},
    tracing::{debug, info, warn},
};

use crate::error::AuthError;

/// How long in-flight connections get to drain before the server task is aborted.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Local entry point that redirects to the upstream authorization page.
pub const START_PATH: &str = "/auth";

type Outcome = Result<String, AuthError>;

/// Single-use local HTTP listener that captures the OAuth redirect.
///
/// The port is bound in [`CallbackServer::bind`] and released when
/// [`CallbackServer::wait`] returns or the server is dropped, whichever
/// comes first.
pub struct CallbackServer {
    local_addr: SocketAddr,
    outcome_rx: oneshot::Receiver<Outcome>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

struct CallbackState {
    expected_state: String,
    authorize_url: String,
    /// Taken by the first qualifying callback; later callbacks find it empty.
    outcome_tx: Mutex<Option<oneshot::Sender<Outcome>>>,
}

impl CallbackServer {
    /// Bind the redirect target and start serving. The listener accepts
    /// connections by the time this returns.
    ///
    /// Besides the callback path, `GET /auth` redirects to `authorize_url`.
    pub async fn bind(
        target: &RedirectTarget,
        expected_state: String,
        authorize_url: String,
    ) -> Result<Self, AuthError> {
        let listener = TcpListener::bind((target.host.as_str(), target.port))
            .await
            .map_err(|e| {
                AuthError::Listener(format!(
                    "failed to bind {}:{}: {e}",
                    target.host, target.port
                ))
            })?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| AuthError::Listener(e.to_string()))?;

        let (outcome_tx, outcome_rx) = oneshot::channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let state = Arc::new(CallbackState {
            expected_state,
            authorize_url,
            outcome_tx: Mutex::new(Some(outcome_tx)),
        });
        let mut app = Router::new().route(&target.path, get(handle_callback));
        if target.path != START_PATH {
            app = app.route(START_PATH, get(handle_start));
        }
        let app = app.fallback(handle_fallback).with_state(state);

        let task = tokio::spawn(async move {
            let server = axum::serve(listener, app).with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            });
            if let Err(e) = server.await {
                warn!(error = %e, "callback listener stopped with error");
            }
        });

        info!(addr = %local_addr, path = %target.path, "OAuth callback listener ready");
        Ok(Self {
            local_addr,
            outcome_rx,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Wait for the first qualifying callback or `timeout`, then release the
    /// listener. Returns the authorization code.
    pub async fn wait(mut self, timeout: Duration) -> Result<String, AuthError> {
        let outcome = tokio::time::timeout(timeout, &mut self.outcome_rx).await;
        self.shutdown().await;
        match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(AuthError::Listener(
                "callback listener stopped unexpectedly".into(),
            )),
            Err(_) => {
                warn!(timeout_secs = timeout.as_secs(), "OAuth callback timed out");
                Err(AuthError::AuthTimeout(timeout))
            },
        }
    }

    async fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(mut task) = self.task.take() {
            if tokio::time::timeout(SHUTDOWN_GRACE, &mut task).await.is_err() {
                task.abort();
                let _ = task.await;
            }
        }
        debug!(addr = %self.local_addr, "OAuth callback listener released");
    }
}

impl Drop for CallbackServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Decide what a callback request means. `None` means it does not qualify
/// (no `state` at all) and the flow stays armed.
fn classify(expected_state: &str, params: &HashMap<String, String>) -> Option<Outcome> {
    let state = params.get("state")?;
    if state != expected_state {
        return Some(Err(AuthError::StateMismatch));
    }
    if let Some(error) = params.get("error") {
        return Some(Err(AuthError::AuthorizationDenied {
            error: error.clone(),
            description: params.get("error_description").cloned(),
        }));
    }
    match params.get("code") {
        Some(code) if !code.is_empty() => Some(Ok(code.clone())),
        _ => None,
    }
}

async fn handle_callback(
    State(state): State<Arc<CallbackState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let Some(outcome) = classify(&state.expected_state, &params) else {
        return page(
            StatusCode::BAD_REQUEST,
            "Invalid callback",
            "The request is missing the expected OAuth parameters.",
        );
    };

    let sender = state.outcome_tx.lock().ok().and_then(|mut slot| slot.take());
    let Some(sender) = sender else {
        return page(
            StatusCode::GONE,
            "Sign-in already handled",
            "This sign-in link is no longer active. You can close this window.",
        );
    };

    let response = match &outcome {
        Ok(_) => page(
            StatusCode::OK,
            "Authentication successful",
            "You can close this window and return to your assistant.",
        ),
        Err(AuthError::StateMismatch) => page(
            StatusCode::BAD_REQUEST,
            "Authentication failed",
            "The sign-in response did not match this request. Please start again.",
        ),
        Err(e) => page(
            StatusCode::BAD_REQUEST,
            "Authentication failed",
            &html_escape(&e.to_string()),
        ),
    };
    let _ = sender.send(outcome);
    response
}

async fn handle_start(State(state): State<Arc<CallbackState>>) -> Response {
    let armed = state
        .outcome_tx
        .lock()
        .map(|slot| slot.is_some())
        .unwrap_or(false);
    if !armed {
        return page(
            StatusCode::GONE,
            "Sign-in already handled",
            "This sign-in link is no longer active.",
        );
    }
    Redirect::to(&state.authorize_url).into_response()
}

async fn handle_fallback() -> Response {
    page(StatusCode::NOT_FOUND, "Not found", "")
}

fn page(status: StatusCode, title: &str, message: &str) -> Response {
    let body = format!(
        "<!doctype html><html><head><title>{title}</title></head>\
         <body><h1>{title}</h1><p>{message}</p></body></html>"
    );
    (status, [(header::CONNECTION, "close")], Html(body)).into_response()
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
