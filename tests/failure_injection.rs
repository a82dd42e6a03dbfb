//! Failure injection tests for the gateway.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use api_gateway::hooks::Hooks;
use api_gateway::load_balancer::UpstreamAddr;
use axum::http::StatusCode;

mod common;

#[tokio::test]
async fn test_unreachable_upstream_returns_502() {
    let dead = common::closed_port().await;

    let mut custom = common::route("auth", "/api/auth", &[dead]);
    custom.error_message = Some("authentication service is down".into());
    let plain = common::route("users", "/api/users", &[dead]);

    let mut config = common::config_with(vec![custom, plain]);
    config.health.fallback_to_unhealthy = false;
    let gw = common::start_gateway(config, Hooks::new()).await;
    let client = common::client();

    let res = client.get(gw.url("/api/auth/login")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::BAD_GATEWAY);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["message"], "Bad Gateway: authentication service is down");

    let res = client.get(gw.url("/api/users")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::BAD_GATEWAY);
    let body: serde_json::Value = res.json().await.unwrap();
    let message = body["message"].as_str().unwrap();
    assert!(message.starts_with("Bad Gateway: upstream http://127.0.0.1:"), "{}", message);
    assert!(message.contains("unreachable"), "{}", message);
}

#[tokio::test]
async fn test_slow_upstream_returns_504() {
    let slow = common::start_programmable_upstream(|| async {
        tokio::time::sleep(Duration::from_secs(3)).await;
        (200, "late".into())
    })
    .await;

    let mut config = common::config_with(vec![common::route("slow", "/slow", &[slow])]);
    config.timeouts.request_ms = 300;
    let log = common::EventLog::default();
    let gw = common::start_gateway(config, log.hooks()).await;

    let started = Instant::now();
    let res = common::client().get(gw.url("/slow")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::GATEWAY_TIMEOUT);
    assert!(started.elapsed() < Duration::from_secs(2));

    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(
        body["message"],
        format!("Gateway Timeout: upstream http://{} did not finish within 300ms", slow)
    );

    let events = log.wait_for(3).await;
    assert_eq!(
        events[2],
        (
            "forward_error".to_string(),
            "upstream_timeout response_started=false bytes=0".to_string()
        )
    );
}

#[tokio::test]
async fn test_half_sent_response_aborts_client_connection() {
    let upstream = common::start_half_sent_upstream().await;
    let log = common::EventLog::default();
    let gw = common::start_gateway(
        common::config_with(vec![common::route("partial", "/partial", &[upstream])]),
        log.hooks(),
    )
    .await;

    let res = common::client().get(gw.url("/partial")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert!(res.bytes().await.is_err(), "truncated body must not look complete");

    let events = log.wait_for(3).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    let failures: Vec<(String, String)> = log
        .events()
        .into_iter()
        .filter(|(name, _)| name == "forward_error")
        .collect();
    assert_eq!(failures.len(), 1, "{:?}", events);
    assert_eq!(failures[0].1, "streaming_error response_started=true bytes=10");
    assert!(!log.names().contains(&"forward_complete".to_string()));
}

#[tokio::test]
async fn test_cancelled_request_releases_connection_slot() {
    let upstream = common::start_stalling_upstream().await;

    let mut route = common::route("stall", "/stall", &[upstream]);
    route.upstreams[0].max_connections = 1;
    let mut config = common::config_with(vec![route]);
    config.timeouts.request_ms = 1_000;
    let gw = common::start_gateway(config, Hooks::new()).await;

    let first = common::client()
        .get(gw.url("/stall"))
        .timeout(Duration::from_millis(400))
        .send()
        .await;
    assert!(first.is_err(), "first request should be abandoned by the client");

    // The only slot must come back, through cancellation or the deadline.
    let res = common::client()
        .get(gw.url("/stall"))
        .timeout(Duration::from_secs(5))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.text().await.unwrap(), "ok");

    let addr = UpstreamAddr::http("127.0.0.1", upstream.port());
    let pool = gw.gateway.forwarder().pool();
    let mut available = pool.available(&addr);
    for _ in 0..100 {
        if available == Some(1) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        available = pool.available(&addr);
    }
    assert_eq!(available, Some(1));
}

#[tokio::test]
async fn test_failing_upstream_is_skipped_during_cooldown() {
    let dead = common::closed_port().await;
    let alive = common::start_mock_upstream("alive").await;

    let mut config = common::config_with(vec![common::route("r", "/", &[dead, alive])]);
    config.health.cooldown_ms = 60_000;
    let gw = common::start_gateway(config, Hooks::new()).await;
    let client = common::client();

    let mut ok = 0;
    let mut bad_gateway = 0;
    for _ in 0..10 {
        match client.get(gw.url("/")).send().await.unwrap().status() {
            StatusCode::OK => ok += 1,
            StatusCode::BAD_GATEWAY => bad_gateway += 1,
            other => panic!("unexpected status {}", other),
        }
    }

    assert_eq!(bad_gateway, 1, "only the first attempt should reach the dead upstream");
    assert_eq!(ok, 9);
}

#[tokio::test]
async fn test_degraded_fallback_forwards_to_unhealthy_upstream() {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);
    let overloaded = common::start_programmable_upstream(move || {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            (503, "busy".into())
        }
    })
    .await;

    let log = common::EventLog::default();
    let gw = common::start_gateway(
        common::config_with(vec![common::route("r", "/", &[overloaded])]),
        log.hooks(),
    )
    .await;
    let client = common::client();

    // The relayed 503 puts the only upstream into cooldown.
    let res = client.get(gw.url("/")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(res.text().await.unwrap(), "busy");

    let res = client.get(gw.url("/")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    res.text().await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    let events = log.wait_for(6).await;
    let chosen: Vec<String> = events
        .into_iter()
        .filter(|(name, _)| name == "upstream_chosen")
        .map(|(_, detail)| detail)
        .collect();
    assert_eq!(
        chosen,
        vec![
            format!("http://{} degraded=false", overloaded),
            format!("http://{} degraded=true", overloaded),
        ]
    );
}

#[tokio::test]
async fn test_fail_fast_without_fallback() {
    let dead = common::closed_port().await;

    let mut config = common::config_with(vec![common::route("r", "/", &[dead])]);
    config.health.fallback_to_unhealthy = false;
    let gw = common::start_gateway(config, Hooks::new()).await;
    let client = common::client();

    let first = client.get(gw.url("/")).send().await.unwrap();
    assert_eq!(first.status(), StatusCode::BAD_GATEWAY);

    let second = client.get(gw.url("/")).send().await.unwrap();
    assert_eq!(second.status(), StatusCode::BAD_GATEWAY);
    let body: serde_json::Value = second.json().await.unwrap();
    assert!(body["message"]
        .as_str()
        .unwrap()
        .starts_with("Bad Gateway: no healthy upstream for route r"));
}

#[tokio::test]
async fn test_failed_degraded_attempt_reports_no_healthy_upstream() {
    let dead = common::closed_port().await;

    let log = common::EventLog::default();
    let gw = common::start_gateway(common::config_with(vec![common::route("r", "/", &[dead])]), log.hooks()).await;
    let client = common::client();

    let first = client.get(gw.url("/")).send().await.unwrap();
    assert_eq!(first.status(), StatusCode::BAD_GATEWAY);
    let body: serde_json::Value = first.json().await.unwrap();
    assert!(body["message"].as_str().unwrap().contains("unreachable"));

    let second = client.get(gw.url("/")).send().await.unwrap();
    assert_eq!(second.status(), StatusCode::BAD_GATEWAY);
    let body: serde_json::Value = second.json().await.unwrap();
    let message = body["message"].as_str().unwrap();
    assert!(message.starts_with("Bad Gateway: no healthy upstream for route r"), "{}", message);
    assert!(message.contains(&format!("fallback to http://{} failed", dead)), "{}", message);

    let events = log.wait_for(6).await;
    let details: Vec<String> = events
        .iter()
        .filter(|(name, _)| name != "route_matched")
        .map(|(name, detail)| format!("{} {}", name, detail))
        .collect();
    assert_eq!(
        details,
        vec![
            format!("upstream_chosen http://{} degraded=false", dead),
            "forward_error upstream_unreachable response_started=false bytes=0".to_string(),
            format!("upstream_chosen http://{} degraded=true", dead),
            "forward_error no_healthy_upstream response_started=false bytes=0".to_string(),
        ]
    );
}
