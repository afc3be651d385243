//! JSON HTTP API over the verification store.

use crate::error::StoreError;
use crate::utils;
use crate::verifier::{self, VerificationStore, DEFAULT_HISTORY_LIMIT};
use hyper::body::HttpBody;
use hyper::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
    CONTENT_TYPE,
};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::task;
use tracing::{error, info, warn};

pub type SharedStore = Arc<RwLock<VerificationStore>>;

/// A verify payload is a single short string; anything bigger is refused unread.
const MAX_VERIFY_BODY_BYTES: usize = 4 * 1024;

#[derive(Debug, Deserialize)]
struct VerifyRequest {
    #[serde(default)]
    serial_number: Option<String>,
}

/// Bind `addr` and serve until `shutdown` resolves.
pub async fn serve(
    addr: SocketAddr,
    store: SharedStore,
    shutdown: impl Future<Output = ()>,
) -> anyhow::Result<()> {
    let make_svc = make_service_fn(move |_conn| {
        let store = store.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req: Request<Body>| {
                handle_request(req, store.clone())
            }))
        }
    });

    let server = Server::try_bind(&addr)
        .map_err(|e| anyhow::anyhow!("failed to bind {}: {}", addr, e))?
        .serve(make_svc);
    info!("API server listening on http://{}", addr);

    server.with_graceful_shutdown(shutdown).await?;
    info!("API server stopped");
    Ok(())
}

pub async fn handle_request(
    req: Request<Body>,
    store: SharedStore,
) -> Result<Response<Body>, Infallible> {
    let path = req.uri().path().to_string();
    let response = match (req.method(), path.as_str()) {
        (&Method::OPTIONS, _) => preflight(),

        (&Method::POST, "/api/verify") => verify(req, store).await,

        (&Method::GET, "/api/stats") => {
            let result = with_store(store, |s| Ok(read(s)?.stats())).await;
            respond(result)
        }

        (&Method::GET, "/api/history") => {
            let limit = history_limit(req.uri().query());
            let result = with_store(store, move |s| Ok(read(s)?.history(limit).to_vec())).await;
            respond(result)
        }

        (&Method::POST, "/api/clear") => {
            let result = with_store(store, |s| Ok(write(s)?.clear())).await;
            respond(result)
        }

        // liveness only; never touches the store
        (&Method::GET, "/api/health") => json_response(
            StatusCode::OK,
            &json!({ "status": "healthy", "timestamp": verifier::now_iso8601() }),
        ),

        _ => error_response(StatusCode::NOT_FOUND, "Not Found"),
    };
    Ok(response)
}

async fn verify(req: Request<Body>, store: SharedStore) -> Response<Body> {
    let body = match read_body_capped(req.into_body(), MAX_VERIFY_BODY_BYTES).await {
        Ok(b) => b,
        Err(BodyError::TooLarge) => {
            return error_response(StatusCode::PAYLOAD_TOO_LARGE, "Request body too large")
        }
        Err(BodyError::Read(e)) => {
            warn!(error = %e, "failed to read request body");
            return error_response(StatusCode::BAD_REQUEST, "Failed to read request body");
        }
    };
    let request: VerifyRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(_) => return error_response(StatusCode::BAD_REQUEST, "Malformed JSON"),
    };
    let serial = match request
        .serial_number
        .as_deref()
        .and_then(utils::normalize_serial)
    {
        Some(s) => s.to_string(),
        None => return error_response(StatusCode::BAD_REQUEST, "Serial number is required"),
    };

    let result = with_store(store, move |s| Ok(write(s)?.verify(&serial))).await;
    respond(result)
}

enum BodyError {
    TooLarge,
    Read(hyper::Error),
}

/// Collect `body`, giving up as soon as it is known to exceed `limit` bytes.
async fn read_body_capped(mut body: Body, limit: usize) -> Result<Vec<u8>, BodyError> {
    // exact when the client sent Content-Length
    if body.size_hint().lower() > limit as u64 {
        return Err(BodyError::TooLarge);
    }
    let mut buf = Vec::new();
    while let Some(chunk) = body.data().await {
        let chunk = chunk.map_err(BodyError::Read)?;
        if buf.len() + chunk.len() > limit {
            return Err(BodyError::TooLarge);
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(buf)
}

/// Run `f` on the blocking pool; snapshot writes happen under the store lock.
async fn with_store<T, F>(store: SharedStore, f: F) -> Result<T, StoreError>
where
    T: Send + 'static,
    F: FnOnce(&SharedStore) -> Result<T, StoreError> + Send + 'static,
{
    task::spawn_blocking(move || f(&store))
        .await
        .map_err(|e| StoreError::Worker(e.to_string()))?
}

fn read(store: &SharedStore) -> Result<RwLockReadGuard<'_, VerificationStore>, StoreError> {
    store.read().map_err(|_| StoreError::Poisoned)
}

fn write(store: &SharedStore) -> Result<RwLockWriteGuard<'_, VerificationStore>, StoreError> {
    store.write().map_err(|_| StoreError::Poisoned)
}

/// `?limit=N`, percent-decoded; anything missing or unparsable falls back to the default.
fn history_limit(query: Option<&str>) -> usize {
    query
        .and_then(|q| {
            url::form_urlencoded::parse(q.as_bytes())
                .find(|(key, _)| key == "limit")
                .and_then(|(_, value)| value.parse::<usize>().ok())
        })
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
}

fn respond<T: Serialize>(result: Result<T, StoreError>) -> Response<Body> {
    match result {
        Ok(value) => json_response(StatusCode::OK, &value),
        Err(e) => {
            error!(error = %e, "store operation failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string())
        }
    }
}

fn json_response<T: Serialize + ?Sized>(status: StatusCode, value: &T) -> Response<Body> {
    let body = match serde_json::to_vec(value) {
        Ok(b) => b,
        Err(e) => {
            error!(error = %e, "failed to encode response");
            return server_error();
        }
    };
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "application/json")
        .header(ACCESS_CONTROL_ALLOW_ORIGIN, "*")
        .body(Body::from(body))
        .unwrap_or_else(|_| server_error())
}

fn error_response(status: StatusCode, msg: &str) -> Response<Body> {
    json_response(status, &json!({ "error": msg }))
}

fn preflight() -> Response<Body> {
    Response::builder()
        .status(StatusCode::NO_CONTENT)
        .header(ACCESS_CONTROL_ALLOW_ORIGIN, "*")
        .header(ACCESS_CONTROL_ALLOW_METHODS, "GET, POST, OPTIONS")
        .header(ACCESS_CONTROL_ALLOW_HEADERS, "Content-Type")
        .body(Body::empty())
        .unwrap_or_else(|_| server_error())
}

fn server_error() -> Response<Body> {
    let mut res = Response::new(Body::from("Internal Server Error"));
    *res.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    res
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use crate::storage::JsonFileStorage;
    use serde_json::Value;
    use tempfile::{tempdir, TempDir};

    fn store_with_pool(size: u32) -> (TempDir, SharedStore) {
        let dir = tempdir().unwrap();
        let storage = JsonFileStorage::new(dir.path().join("data.json"));
        let pool = PoolConfig { size, width: 2 };
        let store = VerificationStore::with_defaults(pool, Box::new(storage));
        (dir, Arc::new(RwLock::new(store)))
    }

    fn test_store() -> (TempDir, SharedStore) {
        store_with_pool(10)
    }

    fn verify_body(serial: &str) -> String {
        json!({ "serial_number": serial }).to_string()
    }

    async fn call(
        store: &SharedStore,
        method: Method,
        uri: &str,
        body: &str,
    ) -> (StatusCode, Value) {
        let req = Request::builder()
            .method(method)
            .uri(uri)
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let res = handle_request(req, store.clone()).await.unwrap();
        let status = res.status();
        let bytes = hyper::body::to_bytes(res.into_body()).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    #[tokio::test]
    async fn verify_trims_and_classifies() {
        let (_dir, store) = test_store();

        let (status, body) = call(&store, Method::POST, "/api/verify", &verify_body("  03 ")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["serial_number"], "03");
        assert_eq!(body["status"], "valid");
        assert_eq!(body["is_duplicate"], false);
        assert!(body["timestamp"].as_str().unwrap().ends_with('Z'));

        let (_, body) = call(&store, Method::POST, "/api/verify", &verify_body("03")).await;
        assert_eq!(body["status"], "duplicate");
        assert_eq!(body["is_duplicate"], true);
    }

    #[tokio::test]
    async fn verify_rejects_blank_or_missing_serial() {
        let (_dir, store) = test_store();
        let payloads = [r#"{"serial_number": "   "}"#, r#"{}"#, r#"{"serial_number": null}"#];
        for payload in payloads {
            let (status, body) = call(&store, Method::POST, "/api/verify", payload).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{payload}");
            assert_eq!(body["error"], "Serial number is required");
        }
        let (status, _) = call(&store, Method::POST, "/api/verify", "not json").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (_, stats) = call(&store, Method::GET, "/api/stats", "").await;
        assert_eq!(stats["total_scanned"], 0);
    }

    #[tokio::test]
    async fn oversized_verify_body_is_refused() {
        let (_dir, store) = test_store();
        let huge = verify_body(&"7".repeat(MAX_VERIFY_BODY_BYTES));
        let (status, body) = call(&store, Method::POST, "/api/verify", &huge).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(body["error"], "Request body too large");

        let (_, stats) = call(&store, Method::GET, "/api/stats", "").await;
        assert_eq!(stats["total_scanned"], 0);
        assert_eq!(stats["invalid_count"], 0);
    }

    #[tokio::test]
    async fn stats_history_and_clear() {
        let (_dir, store) = test_store();
        for s in ["01", "02", "99", "01"] {
            call(&store, Method::POST, "/api/verify", &verify_body(s)).await;
        }

        let (status, stats) = call(&store, Method::GET, "/api/stats", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(stats["valid_count"], 2);
        assert_eq!(stats["invalid_count"], 1);
        assert_eq!(stats["duplicate_count"], 1);
        assert_eq!(stats["total_scanned"], 3);
        assert_eq!(stats["remaining_valid"], 8);

        let (_, history) = call(&store, Method::GET, "/api/history?limit=2", "").await;
        let serials: Vec<_> = history
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["serial_number"].clone())
            .collect();
        assert_eq!(serials, vec![Value::from("99"), Value::from("01")]);

        // percent-encoded key and value decode the same as the plain form
        let (_, history) = call(&store, Method::GET, "/api/history?limit=%32", "").await;
        assert_eq!(history.as_array().unwrap().len(), 2);
        let (_, history) = call(&store, Method::GET, "/api/history?%6Cimit=3", "").await;
        assert_eq!(history.as_array().unwrap().len(), 3);

        let (_, history) = call(&store, Method::GET, "/api/history?limit=oops", "").await;
        assert_eq!(history.as_array().unwrap().len(), 4);

        let (status, body) = call(&store, Method::POST, "/api/clear", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "History cleared successfully");

        let (_, stats) = call(&store, Method::GET, "/api/stats", "").await;
        assert_eq!(stats["valid_count"], 0);
        assert_eq!(stats["remaining_valid"], 10);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_verifies_keep_counters_consistent() {
        const POOL: u64 = 50;
        const REQUESTS: u64 = 200;
        let (_dir, store) = store_with_pool(POOL as u32);

        let mut handles = Vec::new();
        for i in 0..REQUESTS {
            // 01..=60: fifty pool members, ten strangers, the rest repeats
            let serial = format!("{:02}", i % 60 + 1);
            let writer = store.clone();
            handles.push(tokio::spawn(async move {
                call(&writer, Method::POST, "/api/verify", &verify_body(&serial)).await
            }));
            let reader = store.clone();
            handles.push(tokio::spawn(async move {
                call(&reader, Method::GET, "/api/stats", "").await
            }));
        }

        let mut outcomes = 0;
        for handle in handles {
            let (status, body) = handle.await.unwrap();
            assert_eq!(status, StatusCode::OK);
            if body.get("status").is_some() {
                outcomes += 1;
                continue;
            }
            // no reader may observe a half-applied verify
            let valid = body["valid_count"].as_u64().unwrap();
            let invalid = body["invalid_count"].as_u64().unwrap();
            assert_eq!(body["remaining_valid"].as_u64().unwrap() + valid, POOL);
            assert_eq!(body["total_scanned"].as_u64().unwrap(), valid + invalid);
        }
        assert_eq!(outcomes, REQUESTS);

        let (_, stats) = call(&store, Method::GET, "/api/stats", "").await;
        let valid = stats["valid_count"].as_u64().unwrap();
        let invalid = stats["invalid_count"].as_u64().unwrap();
        let duplicate = stats["duplicate_count"].as_u64().unwrap();
        assert_eq!(valid + invalid + duplicate, REQUESTS);
        assert_eq!((valid, invalid, duplicate), (50, 10, 140));
        assert_eq!(stats["remaining_valid"].as_u64().unwrap() + valid, POOL);
        assert_eq!(stats["total_scanned"], 60);

        let (_, history) = call(&store, Method::GET, "/api/history?limit=1000", "").await;
        assert_eq!(history.as_array().unwrap().len() as u64, REQUESTS);
    }

    #[tokio::test]
    async fn health_and_unknown_routes() {
        let (_dir, store) = test_store();
        let (status, body) = call(&store, Method::GET, "/api/health", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert!(body["timestamp"].as_str().unwrap().ends_with('Z'));

        let (status, body) = call(&store, Method::GET, "/api/nope", "").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Not Found");

        let (status, _) = call(&store, Method::GET, "/api/verify", "").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn preflight_allows_cross_origin() {
        let (_dir, store) = test_store();
        let req = Request::builder()
            .method(Method::OPTIONS)
            .uri("/api/verify")
            .body(Body::empty())
            .unwrap();
        let res = handle_request(req, store).await.unwrap();
        assert_eq!(res.status(), StatusCode::NO_CONTENT);
        assert_eq!(res.headers()[ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    }

    #[test]
    fn limit_parsing() {
        assert_eq!(history_limit(None), 100);
        assert_eq!(history_limit(Some("limit=7")), 7);
        assert_eq!(history_limit(Some("x=1&limit=0")), 0);
        assert_eq!(history_limit(Some("limit=%32")), 2);
        assert_eq!(history_limit(Some("%6Cimit=12")), 12);
        assert_eq!(history_limit(Some("limit=-4")), 100);
        assert_eq!(history_limit(Some("limit=")), 100);
    }
}
