//! Integration tests for the HTTP front end.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use looplag::{server, Dispatcher, HarnessBuilder, HarnessRuntime, Reply, Route, Variant};
use serde_json::Value;
use tower::ServiceExt;

fn runtime(variant: Variant, dir: &tempfile::TempDir) -> HarnessRuntime {
    HarnessBuilder::new()
        .prefix("httptest")
        .variant(variant)
        .worker_threads(1)
        .scratch_dir(dir.path())
        .build()
        .expect("failed to create runtime")
}

/// Send one GET through the router and return status and body text.
fn get(runtime: &HarnessRuntime, uri: &str) -> (StatusCode, String) {
    let app = server::router(Arc::new(Dispatcher::for_runtime(runtime)));
    runtime.block_on(async {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    })
}

fn get_json(runtime: &HarnessRuntime, uri: &str) -> (StatusCode, Value) {
    let (status, text) = get(runtime, uri);
    (status, serde_json::from_str(&text).unwrap())
}

#[test]
fn test_unknown_route_lists_exact_paths() {
    let dir = tempfile::tempdir().unwrap();
    let rt = runtime(Variant::Cooperative, &dir);

    let (status, json) = get_json(&rt, "/compute");
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"], "Not Found");
    assert_eq!(json["path"], "/compute");
    let listed: Vec<String> = serde_json::from_value(json["availableEndpoints"].clone()).unwrap();
    assert_eq!(listed, Route::paths(Variant::Cooperative));
}

#[test]
fn test_index_per_variant() {
    let dir = tempfile::tempdir().unwrap();

    let rt = runtime(Variant::Monopolizing, &dir);
    let (status, json) = get_json(&rt, "/");
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["service"], "blocking-demo");
    assert_eq!(json["warning"], "All endpoints block the event loop!");
    assert_eq!(json["endpoints"].as_array().unwrap().len(), 8);
}

#[test]
fn test_cooperative_compute() {
    let dir = tempfile::tempdir().unwrap();
    let rt = runtime(Variant::Cooperative, &dir);

    let (status, json) = get_json(&rt, "/compute-async?limit=25000&depth=20");
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);
    assert_eq!(json["operation"], "async-computation");
    assert_eq!(json["limit"], 25_000);
    assert_eq!(json["depth"], 20);
    assert_eq!(json["fibonacci"], 6_765);
    assert_eq!(json["chunkSize"], 10_000);
    assert_eq!(json["blocked"], false);
    assert_eq!(json["note"], "Computation yielded to event loop between chunks");
}

#[test]
fn test_depth_above_ceiling_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let rt = runtime(Variant::Cooperative, &dir);

    let (status, json) = get_json(&rt, "/compute-async?depth=36");
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["success"], false);
    assert_eq!(json["endpoint"], "/compute-async");
}

#[test]
fn test_read_repeat_sizes() {
    let dir = tempfile::tempdir().unwrap();
    let rt = runtime(Variant::Monopolizing, &dir);

    for n in [1u64, 2, 5] {
        let (status, json) = get_json(&rt, &format!("/slow-sync?iterations={n}"));
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["totalSize"], n * 1024 * 1024);
    }
}

#[test]
fn test_metrics_exposition() {
    let dir = tempfile::tempdir().unwrap();
    let rt = runtime(Variant::Monopolizing, &dir);
    get(&rt, "/compute?limit=10");

    let (status, text) = get(&rt, "/metrics");
    assert_eq!(status, StatusCode::OK);
    assert!(text.contains("httptest_requests_total 2"));
    assert!(text.contains("httptest_lag_violations 0"));
}

fn raw_get(addr: SocketAddr, path: &str) -> String {
    let mut stream = TcpStream::connect(addr).unwrap();
    write!(
        stream,
        "GET {path} HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\n\r\n"
    )
    .unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).unwrap();
    response
}

#[test]
fn test_serve_until_shutdown() {
    let dir = tempfile::tempdir().unwrap();
    let rt = runtime(Variant::Cooperative, &dir);

    let response = rt.block_on(async {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();

        let client = std::thread::spawn(move || {
            let response = raw_get(addr, "/delay?duration=20");
            let _ = tx.send(());
            response
        });

        server::serve(&rt, listener, async move {
            let _ = rx.await;
        })
        .await
        .unwrap();
        client.join().unwrap()
    });

    assert!(response.starts_with("HTTP/1.1 200"));
    let body = response.split("\r\n\r\n").nth(1).unwrap();
    let json: Value = serde_json::from_str(body).unwrap();
    assert_eq!(json["operation"], "async-delay");
    assert_eq!(json["note"], "Proper async delay - no blocking!");
    assert!(rt.is_idle());
}

#[test]
fn test_operation_survives_client_disconnect() {
    let dir = tempfile::tempdir().unwrap();
    let rt = runtime(Variant::Cooperative, &dir);

    rt.block_on(async {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();

        // Hang up well before the delay ends, then stop the server
        let client = std::thread::spawn(move || {
            let mut stream = TcpStream::connect(addr).unwrap();
            write!(
                stream,
                "GET /delay?duration=300 HTTP/1.1\r\nHost: {addr}\r\n\r\n"
            )
            .unwrap();
            std::thread::sleep(std::time::Duration::from_millis(50));
            drop(stream);
            let _ = tx.send(());
        });

        server::serve(&rt, listener, async move {
            let _ = rx.await;
        })
        .await
        .unwrap();
        client.join().unwrap();
    });

    assert_eq!(rt.metrics().requests_total.get(), 1);
    assert_eq!(rt.metrics().operations_completed.get(), 1);
    assert!(rt.is_idle());
}

#[test]
fn test_handler_panic_is_internal_error() {
    let dir = tempfile::tempdir().unwrap();
    let rt = runtime(Variant::Monopolizing, &dir);

    async fn faulty() -> Reply {
        panic!("handler fault")
    }

    let (status, json) = rt.block_on(async {
        let response = server::guard_reply("/compute", faulty()).await;
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice::<Value>(&bytes).unwrap())
    });

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        json,
        serde_json::json!({ "success": false, "error": "Internal Server Error" })
    );
}
