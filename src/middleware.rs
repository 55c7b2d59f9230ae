use crate::capture::{CapturedResponse, REPLAY_MARKER_HEADER};
use crate::coordinator::{Coordinator, Outcome};
use crate::error::{AppError, Result};
use axum::{
    body::Body,
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use http::{HeaderName, HeaderValue, StatusCode};
use http_body::Body as HttpBody;
use std::sync::{Arc, Mutex};

/// axum middleware wiring the coordinator into a request pipeline.
///
/// Mount with `axum::middleware::from_fn_with_state(coordinator, coordinate_request)`.
/// Reads the configured token header, runs the downstream handler under
/// coordination, and snapshots the buffered response after the handler
/// returns. Methods outside the configured set pass through untouched.
pub async fn coordinate_request(
    State(coordinator): State<Arc<Coordinator>>,
    req: Request,
    next: Next,
) -> Response {
    let method = req.method().as_str().to_string();
    let path = req.uri().path().to_string();

    if !coordinator.settings().applies_to_method(&method) {
        return next.run(req).await;
    }

    let token = match req.headers().get(&coordinator.settings().token_header) {
        None => None,
        Some(value) => match value.to_str() {
            Ok(token) => Some(token.to_string()),
            Err(_) => {
                return error_response(
                    StatusCode::BAD_REQUEST,
                    "invalid_idempotency_key",
                    "idempotency token must be visible ASCII",
                );
            }
        },
    };

    // Responses that cannot be captured within the size cap are parked here
    // and delivered as-is; their claim is released and never committed.
    let passthrough: Arc<Mutex<Option<Response>>> = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&passthrough);
    let cap = coordinator.settings().max_capture_bytes;

    let outcome = coordinator
        .execute(&method, &path, token.as_deref(), move || async move {
            let response = next.run(req).await;
            match HttpBody::size_hint(response.body()).exact() {
                Some(size) if size <= cap as u64 => snapshot_response(response, cap).await,
                _ => {
                    *slot.lock().unwrap() = Some(response);
                    Err(AppError::Handler(anyhow::anyhow!(
                        "response exceeds capture limit of {} bytes",
                        cap
                    )))
                }
            }
        })
        .await;

    if let Some(response) = passthrough.lock().unwrap().take() {
        tracing::debug!("delivering uncaptured response past the capture size cap");
        return response;
    }

    match outcome {
        Ok(Outcome::Executed(captured)) => rebuild_response(&captured, false),
        Ok(Outcome::Replayed(captured)) => rebuild_response(&captured, true),
        Ok(Outcome::Conflict) => error_response(
            StatusCode::CONFLICT,
            "operation_in_progress",
            "an execution for this idempotency key is in flight, retry later",
        ),
        Err(AppError::InvalidKey(msg)) => {
            error_response(StatusCode::BAD_REQUEST, "invalid_idempotency_key", &msg)
        }
        Err(err) if err.is_store_unavailable() => {
            tracing::error!("rejecting request, claim store unavailable: {}", err);
            error_response(
                StatusCode::SERVICE_UNAVAILABLE,
                "store_unavailable",
                "idempotency store unavailable",
            )
        }
        Err(err) => {
            tracing::error!("idempotency coordination failed: {}", err);
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "idempotency coordination failed",
            )
        }
    }
}

/// Buffers a response and captures it byte-for-byte.
async fn snapshot_response(response: Response, limit: usize) -> Result<CapturedResponse> {
    let (parts, body) = response.into_parts();

    let headers = parts
        .headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect();

    let body = axum::body::to_bytes(body, limit)
        .await
        .map_err(|e| AppError::Internal(anyhow::anyhow!("failed to buffer response body: {}", e)))?;

    Ok(CapturedResponse::new(
        parts.status.as_u16(),
        headers,
        body.to_vec(),
    ))
}

/// Rebuilds an HTTP response from a snapshot. Replays carry the marker
/// header; the cached status, headers, and body are reproduced unaltered.
fn rebuild_response(captured: &CapturedResponse, replayed: bool) -> Response {
    let status =
        StatusCode::from_u16(captured.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    let mut response = Response::builder().status(status);
    if let Some(headers) = response.headers_mut() {
        for (name, value) in &captured.headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                headers.append(name, value);
            }
        }
        if replayed {
            headers.insert(
                HeaderName::from_static(REPLAY_MARKER_HEADER),
                HeaderValue::from_static("true"),
            );
        }
    }

    response
        .body(Body::from(captured.body.clone()))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

fn error_response(status: StatusCode, code: &str, message: &str) -> Response {
    let body = serde_json::json!({
        "success": false,
        "error": {
            "code": code,
            "message": message,
        }
    });

    (status, Json(body)).into_response()
}
