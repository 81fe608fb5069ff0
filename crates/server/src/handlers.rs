//! HTTP route handlers.
//!
//! Handlers decode what the middleware chain left them, dispatch to the
//! metrics service, and map storage errors onto status codes. Bodies are
//! parsed by hand so malformed JSON is a 400, not an extractor rejection.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use pulse_audit::AuditRecord;
use pulse_model::{wire, Metric, MetricKind, WireMetric};
use pulse_service::ServiceError;
use tracing::{debug, error, info, warn};

use crate::middleware::IP_HEADER;
use crate::state::AppState;

fn storage_status(err: &ServiceError) -> StatusCode {
    if err.is_not_found() {
        StatusCode::NOT_FOUND
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

/// GET `/` — every metric, one `name: value` row per line.
pub async fn get_all(State(state): State<AppState>) -> Response {
    let metrics = match state.service.get_all().await {
        Ok(m) => m,
        Err(e) => {
            error!(error = %e, "list metrics");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let mut body = String::new();
    for metric in &metrics {
        body.push_str(&metric.name);
        body.push_str(": ");
        body.push_str(&metric.value.render());
        body.push('\r');
    }

    ([(CONTENT_TYPE, "text/html")], body).into_response()
}

/// GET `/value/{type}/{name}` — one scalar value as plain text.
pub async fn get_value(
    State(state): State<AppState>,
    Path((kind, name)): Path<(String, String)>,
) -> Response {
    let kind = MetricKind::parse(&kind);
    if kind == MetricKind::Unknown {
        warn!(kind = %kind, "read with unknown metric type");
        return StatusCode::BAD_REQUEST.into_response();
    }

    match state.service.get(&name, kind).await {
        Ok(metric) => {
            ([(CONTENT_TYPE, "text/plain")], metric.value.render()).into_response()
        }
        Err(e) => {
            warn!(error = %e, name = %name, "read metric");
            storage_status(&e).into_response()
        }
    }
}

/// POST `/update/{type}/{name}/{value}` — upsert from path segments.
pub async fn update_path(
    State(state): State<AppState>,
    Path((kind, name, value)): Path<(String, String, String)>,
) -> Response {
    if name.is_empty() {
        return StatusCode::NOT_FOUND.into_response();
    }

    let kind = MetricKind::parse(&kind);
    if kind == MetricKind::Unknown {
        warn!("update with unknown metric type");
        return StatusCode::BAD_REQUEST.into_response();
    }

    let metric = match Metric::from_path(kind, &name, &value) {
        Ok(m) => m,
        Err(e) => {
            warn!(error = %e, "unparseable metric value");
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    if let Err(e) = state.service.store(&metric).await {
        error!(error = %e, "store metric");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    debug!(name = %metric.name, "stored metric from path");
    ([(CONTENT_TYPE, "text/plain")], "").into_response()
}

/// POST `/update/` — upsert one metric from a JSON body, echo it back.
pub async fn update_json(State(state): State<AppState>, body: Bytes) -> Response {
    let wire: WireMetric = match serde_json::from_slice(&body) {
        Ok(w) => w,
        Err(e) => {
            warn!(error = %e, "malformed update body");
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    if wire.id.is_empty() {
        return StatusCode::NOT_FOUND.into_response();
    }

    let metric = match Metric::try_from(wire.clone()) {
        Ok(m) => m,
        Err(e) => {
            warn!(error = %e, "invalid metric in update body");
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    if let Err(e) = state.service.store(&metric).await {
        error!(error = %e, "store metric");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    Json(wire).into_response()
}

/// POST `/value/` — read one metric, JSON body in and out.
pub async fn value_json(State(state): State<AppState>, body: Bytes) -> Response {
    let wire: WireMetric = match serde_json::from_slice(&body) {
        Ok(w) => w,
        Err(e) => {
            warn!(error = %e, "malformed value body");
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    if wire.id.is_empty() {
        return StatusCode::NOT_FOUND.into_response();
    }

    let kind = MetricKind::parse(&wire.kind);
    if kind == MetricKind::Unknown {
        warn!(kind = %wire.kind, "value request with unknown metric type");
        return StatusCode::BAD_REQUEST.into_response();
    }

    match state.service.get(&wire.id, kind).await {
        Ok(metric) => Json(WireMetric::from(&metric)).into_response(),
        Err(e) => {
            warn!(error = %e, name = %wire.id, "read metric");
            storage_status(&e).into_response()
        }
    }
}

/// GET `/ping` — storage liveness.
pub async fn ping(State(state): State<AppState>) -> Response {
    match state.service.ping().await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => {
            error!(error = %e, "storage ping failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// POST `/updates/` — batch upsert; emits one audit record on success.
pub async fn update_batch(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let batch: Vec<WireMetric> = match serde_json::from_slice(&body) {
        Ok(b) => b,
        Err(e) => {
            warn!(error = %e, "malformed batch body");
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    if batch.is_empty() {
        debug!("empty batch accepted");
        return StatusCode::OK.into_response();
    }

    let metrics = match wire::from_wire(batch) {
        Ok(m) => m,
        Err(e) => {
            warn!(error = %e, "invalid metric in batch");
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    if let Err(e) = state.service.store_many_with_retry(&metrics).await {
        error!(error = %e, "store batch");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    let ip = headers
        .get(IP_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    state
        .auditor
        .update(AuditRecord::for_batch(&metrics, ip))
        .await;

    info!(count = metrics.len(), "stored batch");
    StatusCode::OK.into_response()
}
