//! Request routing and the webhook flow.

use std::sync::Arc;

use http_body::{LengthLimitError, Limited};
use hyper::header::{HeaderValue, CONTENT_LENGTH, CONTENT_TYPE};
use hyper::{Body, Method, Request, Response, StatusCode};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use gitops::{SyncEngine, WebhookRequest};

/// Largest webhook body accepted, in bytes.
pub const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

pub const WEBHOOK_PATH: &str = "/webhook";
pub const HEALTH_PATH: &str = "/health";
pub const READY_PATH: &str = "/ready";

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Shared state behind every connection.
pub struct ListenerState {
    engine: SyncEngine,
    secret: String,
    /// Held by the sync task so pushes are applied one at a time.
    sync_lock: Mutex<()>,
}

impl ListenerState {
    pub fn new(engine: SyncEngine, secret: impl Into<String>) -> Self {
        Self {
            engine,
            secret: secret.into(),
            sync_lock: Mutex::new(()),
        }
    }
}

/// Routes one HTTP request. Never fails: every outcome is a response.
pub async fn handle_request(
    req: Request<Body>,
    state: Arc<ListenerState>,
) -> Result<Response<Body>, hyper::Error> {
    let response = match (req.method(), req.uri().path()) {
        (&Method::GET, HEALTH_PATH) => text(StatusCode::OK, "OK"),
        (&Method::GET, READY_PATH) => text(StatusCode::OK, "Ready"),
        (&Method::POST, WEBHOOK_PATH) => handle_webhook(req, state).await,
        (_, WEBHOOK_PATH) => text(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed"),
        (_, HEALTH_PATH | READY_PATH) => text(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed"),
        _ => text(StatusCode::NOT_FOUND, "Not found"),
    };
    Ok(response)
}

async fn handle_webhook(req: Request<Body>, state: Arc<ListenerState>) -> Response<Body> {
    let (parts, body) = req.into_parts();

    let declared_len = parts
        .headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    if declared_len.is_some_and(|len| len > MAX_BODY_BYTES) {
        return payload_too_large();
    }
    let body = match read_body(body, MAX_BODY_BYTES).await {
        Ok(Some(bytes)) => bytes,
        Ok(None) => return payload_too_large(),
        Err(e) => {
            warn!(error = %e, "Failed to read webhook body");
            return text(StatusCode::BAD_REQUEST, format!("Failed to read body: {e}"));
        }
    };

    let mut request = WebhookRequest::new(body);
    for (name, value) in &parts.headers {
        if let Ok(value) = value.to_str() {
            request.insert_header(name.as_str(), value);
        }
    }

    let provider = state.engine.provider();
    debug!(provider = %provider.kind(), bytes = request.body().len(), "Received webhook");

    if let Err(e) = provider.validate(&request, &state.secret) {
        warn!(error = %e, "Webhook validation failed");
        return text(StatusCode::BAD_REQUEST, format!("Validation failed: {e}"));
    }

    let event = match provider.parse_push_event(&request) {
        Ok(event) => event,
        Err(e) if e.is_ignored_event() => {
            info!(reason = %e, "Event received but not processed");
            return text(StatusCode::OK, "Event received but not processed (non-push)");
        }
        Err(e) => {
            warn!(error = %e, "Could not decode push payload");
            return text(StatusCode::OK, "Event received but not processed (non-push)");
        }
    };

    // The sync is detached from the request so a client hanging up cannot
    // abandon it halfway through.
    let task_state = Arc::clone(&state);
    let sync = tokio::spawn(async move {
        let _guard = task_state.sync_lock.lock().await;
        task_state.engine.handle_push(&event).await
    });

    match sync.await {
        Ok(Ok(report)) => {
            info!(
                sync_id = %report.sync_id,
                manifests = report.manifests.len(),
                resources = report.applied.len(),
                "Push processed"
            );
            text(
                StatusCode::OK,
                format!("Successfully processed {} push event", provider.kind()),
            )
        }
        Ok(Err(e)) => {
            error!(error = %e, "Failed to process push");
            text(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to process push: {e}"),
            )
        }
        Err(e) => {
            error!(error = %e, "Sync task did not complete");
            text(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to process push: sync task failed: {e}"),
            )
        }
    }
}

/// Reads the whole body, or `None` once it grows past `limit`.
async fn read_body(body: Body, limit: usize) -> Result<Option<Vec<u8>>, BoxError> {
    match hyper::body::to_bytes(Limited::new(body, limit)).await {
        Ok(bytes) => Ok(Some(bytes.to_vec())),
        Err(e) if e.is::<LengthLimitError>() => Ok(None),
        Err(e) => Err(e),
    }
}

fn payload_too_large() -> Response<Body> {
    text(StatusCode::PAYLOAD_TOO_LARGE, "Payload too large")
}

fn text(status: StatusCode, body: impl Into<Body>) -> Response<Body> {
    let mut response = Response::new(body.into());
    *response.status_mut() = status;
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}
