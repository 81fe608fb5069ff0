//! HTTP middleware chain.
//!
//! The batch endpoint sees, outermost first: request logging, content-type
//! guard, subnet allow-list, signature verification, gzip, RSA decryption.
//! Verification runs against the raw wire body — the agent signs the
//! envelope exactly as transmitted — so the signature layer sits outside the
//! decompression and decryption layers that unwrap it.

use axum::body::{to_bytes, Body, Bytes};
use axum::extract::{Request, State};
use axum::http::header::{ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::{debug, error, info, warn};

use crate::state::AppState;
use crate::subnet;

/// Signature header carried by signed requests.
pub const SIGNATURE_HEADER: &str = "HashSHA256";

/// Header carrying the client's own address.
pub const IP_HEADER: &str = "X-Real-IP";

const BODY_LIMIT: usize = usize::MAX;

/// Log method, URI, elapsed time, response status and body size.
pub async fn log_requests(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let uri = req.uri().clone();
    let start = std::time::Instant::now();

    let response = next.run(req).await;
    let elapsed = start.elapsed();

    let (parts, body) = response.into_parts();
    let bytes = match to_bytes(body, BODY_LIMIT).await {
        Ok(b) => b,
        Err(e) => {
            error!(error = %e, "read response body for logging");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    info!(
        %method,
        uri = %uri,
        status = parts.status.as_u16(),
        elapsed_ms = elapsed.as_millis() as u64,
        size = bytes.len(),
        "handled request"
    );

    Response::from_parts(parts, Body::from(bytes))
}

/// Reject JSON endpoints invoked without `Content-Type: application/json`.
pub async fn require_json(req: Request, next: Next) -> Response {
    let is_json = req
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(';').next().unwrap_or("").trim() == "application/json")
        .unwrap_or(false);

    if !is_json {
        return StatusCode::NOT_ACCEPTABLE.into_response();
    }
    next.run(req).await
}

/// Reject batch posts from outside the trusted subnet.
pub async fn check_subnet(State(state): State<AppState>, req: Request, next: Next) -> Response {
    if let Some(net) = &state.trusted_subnet {
        let header = req
            .headers()
            .get(IP_HEADER)
            .and_then(|v| v.to_str().ok());
        if !subnet::permits(net, header) {
            warn!(ip = header.unwrap_or(""), "rejected update from outside trusted subnet");
            return StatusCode::FORBIDDEN.into_response();
        }
    }
    next.run(req).await
}

/// Verify `HashSHA256` over the body as received. Requests without the
/// header pass through unverified; a configured secret plus a bad header is
/// a 400.
pub async fn verify_signature(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    let Some(signer) = &state.signer else {
        return next.run(req).await;
    };

    let received = req
        .headers()
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    let Some(received) = received else {
        return next.run(req).await;
    };

    let (parts, body) = req.into_parts();
    let bytes = match to_bytes(body, BODY_LIMIT).await {
        Ok(b) => b,
        Err(e) => {
            error!(error = %e, "read request body for signature check");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    if !signer.verify(&received, &bytes) {
        warn!("request signature mismatch");
        return StatusCode::BAD_REQUEST.into_response();
    }

    debug!("request signature verified");
    next.run(Request::from_parts(parts, Body::from(bytes))).await
}

/// Decrypt the body with the configured private key. No key, no-op.
pub async fn decrypt_body(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let Some(key) = &state.private_key else {
        return next.run(req).await;
    };

    let (parts, body) = req.into_parts();
    let bytes = match to_bytes(body, BODY_LIMIT).await {
        Ok(b) => b,
        Err(e) => {
            error!(error = %e, "read request body for decryption");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let plaintext = match key.decrypt(&bytes) {
        Ok(p) => p,
        Err(e) => {
            warn!(error = %e, "request body decryption failed");
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    next.run(Request::from_parts(parts, Body::from(plaintext)))
        .await
}

/// Transparent gzip on both directions: decode `Content-Encoding: gzip`
/// request bodies, encode responses when the client sent
/// `Accept-Encoding: gzip`.
pub async fn gzip_codec(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let accepts_gzip = req
        .headers()
        .get(ACCEPT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains("gzip"));

    let sends_gzip = req
        .headers()
        .get(CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains("gzip"));

    let req = if sends_gzip {
        let (mut parts, body) = req.into_parts();
        let bytes = match to_bytes(body, BODY_LIMIT).await {
            Ok(b) => b,
            Err(e) => {
                error!(error = %e, "read request body for decompression");
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
        };
        let decoded = match state.gzip.decompress(&bytes) {
            Ok(d) => d,
            Err(e) => {
                warn!(error = %e, "request body is not valid gzip");
                return StatusCode::BAD_REQUEST.into_response();
            }
        };
        parts.headers.remove(CONTENT_ENCODING);
        parts.headers.remove(CONTENT_LENGTH);
        Request::from_parts(parts, Body::from(decoded))
    } else {
        req
    };

    let response = next.run(req).await;
    if !accepts_gzip {
        return response;
    }

    let (mut parts, body) = response.into_parts();
    let bytes = match to_bytes(body, BODY_LIMIT).await {
        Ok(b) => b,
        Err(e) => {
            error!(error = %e, "read response body for compression");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };
    let compressed: Bytes = match state.gzip.compress(&bytes) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "compress response body");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    parts
        .headers
        .insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
    parts.headers.remove(CONTENT_LENGTH);
    Response::from_parts(parts, Body::from(compressed))
}
