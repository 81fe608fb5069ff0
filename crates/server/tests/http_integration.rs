//! End-to-end tests for the HTTP surface, including the full batch envelope
//! (JSON → RSA → gzip → signature) the agent produces.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use pulse_audit::Auditor;
use pulse_codec::{GzipCodec, PrivateKey, PublicKey, Signer};
use pulse_server::{build_router, AppState};
use pulse_service::MetricsService;
use pulse_storage::{MemoryStore, MemoryStoreOptions};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

struct TestApp {
    app: Router,
    auditor: Arc<Auditor>,
    _dir: tempfile::TempDir,
}

async fn test_app(configure: impl FnOnce(AppState) -> AppState) -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let opts = MemoryStoreOptions {
        path: dir.path().join("metrics.log"),
        flush_interval: Duration::ZERO,
        restore: false,
        max_retry: 3,
    };
    let store = MemoryStore::open(opts, CancellationToken::new())
        .await
        .unwrap();
    let auditor = Arc::new(Auditor::new());
    let state = configure(AppState::new(
        MetricsService::new(Arc::new(store)),
        auditor.clone(),
    ));

    TestApp {
        app: build_router(state),
        auditor,
        _dir: dir,
    }
}

async fn body_string(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

fn post(uri: &str) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn counter_sums_over_repeated_path_updates() {
    let t = test_app(|s| s).await;

    for _ in 0..3 {
        let response = t
            .app
            .clone()
            .oneshot(post("/update/counter/hits/1"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = t
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/value/counter/hits")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "3");
}

#[tokio::test]
async fn gauge_keeps_last_value() {
    let t = test_app(|s| s).await;

    t.app
        .clone()
        .oneshot(post("/update/gauge/load/0.5"))
        .await
        .unwrap();
    t.app
        .clone()
        .oneshot(post("/update/gauge/load/0.25"))
        .await
        .unwrap();

    let response = t
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/value/gauge/load")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(body_string(response).await, "0.25");
}

#[tokio::test]
async fn missing_counter_is_404_with_empty_body() {
    let t = test_app(|s| s).await;

    let response = t
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/value/counter/missing")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_string(response).await, "");
}

#[tokio::test]
async fn unknown_type_is_400() {
    let t = test_app(|s| s).await;

    let response = t
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/value/histogram/x")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = t
        .app
        .clone()
        .oneshot(post("/update/histogram/x/1"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unparseable_value_is_400() {
    let t = test_app(|s| s).await;
    let response = t
        .app
        .clone()
        .oneshot(post("/update/counter/hits/1.5"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn method_mismatch_is_405() {
    let t = test_app(|s| s).await;
    let response = t
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method(Method::GET)
                .uri("/update/counter/hits/1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn json_endpoint_requires_content_type() {
    let t = test_app(|s| s).await;
    let response = t
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri("/update/")
                .body(Body::from(r#"{"id":"x","type":"gauge","value":1.0}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_ACCEPTABLE);
}

#[tokio::test]
async fn update_and_read_roundtrip_as_json() {
    let t = test_app(|s| s).await;

    let response = t
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri("/update/")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"id":"load","type":"gauge","value":1.25}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = t
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri("/value/")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"id":"load","type":"gauge"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_string(response).await;
    assert_eq!(body, r#"{"id":"load","type":"gauge","value":1.25}"#);
}

#[tokio::test]
async fn ping_reports_ok() {
    let t = test_app(|s| s).await;
    let response = t
        .app
        .clone()
        .oneshot(Request::builder().uri("/ping").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn index_lists_metrics_in_name_order() {
    let t = test_app(|s| s).await;
    t.app
        .clone()
        .oneshot(post("/update/gauge/zeta/1"))
        .await
        .unwrap();
    t.app
        .clone()
        .oneshot(post("/update/counter/alpha/2"))
        .await
        .unwrap();

    let response = t
        .app
        .clone()
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get(header::CONTENT_TYPE)
            .unwrap()
            .to_str()
            .unwrap(),
        "text/html"
    );
    let body = body_string(response).await;
    assert_eq!(body, "alpha: 2\rzeta: 1\r");
}

fn batch_request(body: Vec<u8>, extra: &[(&str, String)]) -> Request<Body> {
    let mut builder = Request::builder()
        .method(Method::POST)
        .uri("/updates/")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::CONTENT_ENCODING, "gzip");
    for (name, value) in extra {
        builder = builder.header(*name, value.as_str());
    }
    builder.body(Body::from(body)).unwrap()
}

const BATCH: &str = r#"[{"id":"a","type":"gauge","value":1.0},{"id":"b","type":"counter","delta":2}]"#;

#[tokio::test]
async fn signed_gzip_batch_is_stored() {
    let signer = Signer::new("secret");
    let t = test_app(|s| s.with_signer(Some(Signer::new("secret")))).await;

    let gzip = GzipCodec::default();
    let body = gzip.compress(BATCH.as_bytes()).unwrap().to_vec();
    let hash = signer.sign(&body);

    let response = t
        .app
        .clone()
        .oneshot(batch_request(body, &[("HashSHA256", hash)]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = t
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/value/gauge/a")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(body_string(response).await, "1");

    let response = t
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/value/counter/b")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(body_string(response).await, "2");
}

#[tokio::test]
async fn tampered_signature_is_400() {
    let signer = Signer::new("secret");
    let t = test_app(|s| s.with_signer(Some(Signer::new("secret")))).await;

    let gzip = GzipCodec::default();
    let body = gzip.compress(BATCH.as_bytes()).unwrap().to_vec();
    let mut hash = signer.sign(&body);
    // Flip one character.
    let flipped = if hash.ends_with('A') { "B" } else { "A" };
    hash.truncate(hash.len() - 1);
    hash.push_str(flipped);

    let response = t
        .app
        .clone()
        .oneshot(batch_request(body, &[("HashSHA256", hash)]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unsigned_batch_passes_when_secret_is_set() {
    // Absence of the header skips verification.
    let t = test_app(|s| s.with_signer(Some(Signer::new("secret")))).await;

    let gzip = GzipCodec::default();
    let body = gzip.compress(BATCH.as_bytes()).unwrap().to_vec();

    let response = t
        .app
        .clone()
        .oneshot(batch_request(body, &[]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn batch_from_outside_trusted_subnet_is_403() {
    let t = test_app(|s| {
        s.with_trusted_subnet(Some("192.168.1.0/24".parse().unwrap()))
    })
    .await;

    let gzip = GzipCodec::default();
    let body = gzip.compress(BATCH.as_bytes()).unwrap().to_vec();

    let response = t
        .app
        .clone()
        .oneshot(batch_request(
            body.clone(),
            &[("X-Real-IP", "10.0.0.1".to_string())],
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = t
        .app
        .clone()
        .oneshot(batch_request(
            body,
            &[("X-Real-IP", "192.168.1.42".to_string())],
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn encrypted_batch_roundtrips_through_the_full_envelope() {
    let dir = tempfile::tempdir().unwrap();
    let (private_path, public_path) = pulse_codec::generate_keys(dir.path()).unwrap();
    let private = PrivateKey::from_pem_file(&private_path).unwrap();
    let public = PublicKey::from_pem_file(&public_path).unwrap();

    let signer = Signer::new("secret");
    let t = test_app(move |s| {
        s.with_signer(Some(Signer::new("secret")))
            .with_private_key(Some(private))
    })
    .await;

    // Envelope exactly as the agent builds it: encrypt, then gzip, then
    // sign the wire bytes.
    let encrypted = public.encrypt(BATCH.as_bytes()).unwrap();
    let gzip = GzipCodec::default();
    let body = gzip.compress(&encrypted).unwrap().to_vec();
    let hash = signer.sign(&body);

    let response = t
        .app
        .clone()
        .oneshot(batch_request(body, &[("HashSHA256", hash)]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = t
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/value/counter/b")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(body_string(response).await, "2");
}

#[tokio::test]
async fn undecryptable_batch_is_400() {
    let dir = tempfile::tempdir().unwrap();
    let (private_path, _) = pulse_codec::generate_keys(dir.path()).unwrap();
    let private = PrivateKey::from_pem_file(&private_path).unwrap();

    let t = test_app(move |s| s.with_private_key(Some(private))).await;

    // Plaintext where ciphertext is expected.
    let gzip = GzipCodec::default();
    let body = gzip.compress(BATCH.as_bytes()).unwrap().to_vec();

    let response = t
        .app
        .clone()
        .oneshot(batch_request(body, &[]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn empty_batch_is_accepted_without_audit() {
    let t = test_app(|s| s).await;

    let gzip = GzipCodec::default();
    let body = gzip.compress(b"[]").unwrap().to_vec();

    let response = t
        .app
        .clone()
        .oneshot(batch_request(body, &[]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(t.auditor.last().is_none());
}

#[tokio::test]
async fn stored_batch_emits_an_audit_record() {
    let t = test_app(|s| s).await;

    let gzip = GzipCodec::default();
    let body = gzip.compress(BATCH.as_bytes()).unwrap().to_vec();

    let response = t
        .app
        .clone()
        .oneshot(batch_request(
            body,
            &[("X-Real-IP", "192.168.1.5".to_string())],
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let record = t.auditor.last().unwrap();
    assert_eq!(record.metrics, vec!["a", "b"]);
    assert_eq!(record.ip, "192.168.1.5");
}

#[tokio::test]
async fn malformed_batch_body_is_400() {
    let t = test_app(|s| s).await;

    let gzip = GzipCodec::default();
    let body = gzip.compress(b"{not json").unwrap().to_vec();

    let response = t
        .app
        .clone()
        .oneshot(batch_request(body, &[]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn garbage_gzip_is_400() {
    let t = test_app(|s| s).await;

    let response = t
        .app
        .clone()
        .oneshot(batch_request(b"not gzip at all".to_vec(), &[]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn responses_are_gzipped_when_accepted() {
    let t = test_app(|s| s).await;
    t.app
        .clone()
        .oneshot(post("/update/gauge/load/3.5"))
        .await
        .unwrap();

    let response = t
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/")
                .header(header::ACCEPT_ENCODING, "gzip")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get(header::CONTENT_ENCODING)
            .unwrap()
            .to_str()
            .unwrap(),
        "gzip"
    );

    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    let decoded = GzipCodec::default().decompress(&bytes).unwrap();
    assert_eq!(&decoded[..], b"load: 3.5\r");
}
