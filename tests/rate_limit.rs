//! Rate limit admission and client admin endpoint tests.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use flowgate::balancer::Algorithm;
use flowgate::config::AppConfig;
use flowgate::http::HttpServer;
use flowgate::lifecycle::Shutdown;
use flowgate::limiter::store::Store;

mod common;

async fn spawn_limited_proxy(
    proxy_addr: SocketAddr,
    backend_addr: SocketAddr,
    capacity: i64,
) -> Shutdown {
    let mut config = AppConfig::default();
    config.listener.bind_address = proxy_addr.to_string();
    config.balancer.algorithm = Algorithm::RoundRobin;
    config.balancer.backends = vec![format!("http://{}", backend_addr)];
    config.health_check.enabled = false;
    config.rate_limit.enabled = true;
    config.rate_limit.default_capacity = capacity;
    config.rate_limit.default_rate = 1;

    let store = Arc::new(Store::from_config(&config.store, &config.rate_limit).unwrap());
    let server = HttpServer::new(config, store).unwrap();
    let listener = tokio::net::TcpListener::bind(proxy_addr).await.unwrap();

    let shutdown = Shutdown::new();
    let server_rx = shutdown.subscribe();
    let health_rx = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = server.run(listener, server_rx, health_rx).await;
    });
    tokio::time::sleep(Duration::from_millis(300)).await;
    shutdown
}

#[tokio::test]
async fn test_burst_beyond_capacity_is_limited() {
    let backend_addr: SocketAddr = "127.0.0.1:28601".parse().unwrap();
    let proxy_addr: SocketAddr = "127.0.0.1:28602".parse().unwrap();

    common::start_mock_backend(backend_addr, "ok").await;
    let shutdown = spawn_limited_proxy(proxy_addr, backend_addr, 3).await;
    let client = common::test_client();

    let mut admitted = 0;
    let mut limited = 0;
    for _ in 0..10 {
        let res = client
            .get(format!("http://{}", proxy_addr))
            .send()
            .await
            .expect("proxy unreachable");
        match res.status().as_u16() {
            200 => admitted += 1,
            429 => limited += 1,
            other => panic!("unexpected status {other}"),
        }
    }

    // Capacity 3 plus at most one refill tick during the burst.
    assert!(admitted >= 3, "burst start must pass, got {admitted}");
    assert!(limited >= 5, "burst tail must be limited, got {limited}");

    shutdown.trigger();
}

#[tokio::test]
async fn test_limited_response_is_json_envelope() {
    let backend_addr: SocketAddr = "127.0.0.1:28611".parse().unwrap();
    let proxy_addr: SocketAddr = "127.0.0.1:28612".parse().unwrap();

    common::start_mock_backend(backend_addr, "ok").await;
    let shutdown = spawn_limited_proxy(proxy_addr, backend_addr, 1).await;
    let client = common::test_client();

    let mut saw_envelope = false;
    for _ in 0..5 {
        let res = client
            .get(format!("http://{}", proxy_addr))
            .send()
            .await
            .unwrap();
        if res.status() == 429 {
            let body: serde_json::Value = res.json().await.unwrap();
            assert_eq!(body["code"], 429);
            assert_eq!(body["message"], "rate limit exceeded");
            saw_envelope = true;
            break;
        }
    }
    assert!(saw_envelope, "burst of 5 against capacity 1 must hit the limit");

    shutdown.trigger();
}

#[tokio::test]
async fn test_clients_crud_roundtrip() {
    let backend_addr: SocketAddr = "127.0.0.1:28621".parse().unwrap();
    let proxy_addr: SocketAddr = "127.0.0.1:28622".parse().unwrap();

    common::start_mock_backend(backend_addr, "ok").await;
    let shutdown = spawn_limited_proxy(proxy_addr, backend_addr, 100).await;
    let client = common::test_client();
    let base = format!("http://{}/clients", proxy_addr);

    let record = serde_json::json!({
        "client_ip": "10_1_2_3",
        "tokens": 9,
        "last_update": 1_700_000_000,
        "capacity": 10,
        "rate": 2,
    });

    // Missing id is a client error.
    let res = client.get(&base).send().await.unwrap();
    assert_eq!(res.status(), 400);

    // Unknown client is a client error.
    let res = client
        .get(format!("{base}?client_id=10_1_2_3"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 400);

    // Create, then duplicate create fails.
    let res = client.post(&base).json(&record).send().await.unwrap();
    assert_eq!(res.status(), 200);
    let res = client.post(&base).json(&record).send().await.unwrap();
    assert_eq!(res.status(), 400);

    // Read back the stored record.
    let res = client
        .get(format!("{base}?client_id=10_1_2_3"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["client_ip"], "10_1_2_3");
    assert_eq!(body["capacity"], 10);

    // Update changes the bucket.
    let mut updated = record.clone();
    updated["capacity"] = serde_json::json!(50);
    let res = client.put(&base).json(&updated).send().await.unwrap();
    assert_eq!(res.status(), 200);
    let res = client
        .get(format!("{base}?client_id=10_1_2_3"))
        .send()
        .await
        .unwrap();
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["capacity"], 50);

    // Delete, then the record is gone.
    let res = client
        .delete(format!("{base}?client_id=10_1_2_3"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    let res = client
        .delete(format!("{base}?client_id=10_1_2_3"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 400);

    shutdown.trigger();
}

#[tokio::test]
async fn test_admin_routes_bypass_rate_limit() {
    let backend_addr: SocketAddr = "127.0.0.1:28631".parse().unwrap();
    let proxy_addr: SocketAddr = "127.0.0.1:28632".parse().unwrap();

    common::start_mock_backend(backend_addr, "ok").await;
    let shutdown = spawn_limited_proxy(proxy_addr, backend_addr, 1).await;
    let client = common::test_client();

    // Exhaust the proxy budget for this client.
    for _ in 0..5 {
        let _ = client.get(format!("http://{}", proxy_addr)).send().await;
    }

    // Admin endpoints still answer (400 for unknown id, never 429).
    let res = client
        .get(format!("http://{}/clients?client_id=nobody", proxy_addr))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 400);

    shutdown.trigger();
}
