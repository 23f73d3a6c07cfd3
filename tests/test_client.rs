//! Tests for the request/retry loop and the busy/done handshake

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{OK_EMPTY, Script, ScriptedProvider, UNAVAILABLE, client};
use objstore_http::{ClientBuilder, Disposition, Error, Method, Request, RequestBuilder, Stats};
use tokio::time::Instant;

fn get(path: &str) -> Request {
    RequestBuilder::new()
        .method(Method::GET)
        .path(path)
        .header("Host", "example.com")
        .build()
        .unwrap()
}

fn concat(parts: &[&[u8]]) -> Vec<u8> {
    parts.concat()
}

#[tokio::test]
async fn test_retry_after_503_then_200() {
    let provider = ScriptedProvider::replies(&[
        b"HTTP/1.1 503 Service Unavailable\r\n\r\n",
        b"HTTP/1.1 200 OK\r\nContent-Length:0\r\n\r\n",
    ]);
    let (mut client, stats) = client(provider.clone(), Duration::from_millis(5000));

    let response = client.request(&get("/ping"), false).await.unwrap();

    assert_eq!(response.status(), 200);
    let snap = stats.snapshot().unwrap();
    assert_eq!(snap.retries, 1);
    assert_eq!(snap.requests, 1);
    assert_eq!(snap.sessions, 2);
    assert_eq!(provider.opened(), 2);
    assert!(provider.written_text().starts_with("GET /ping HTTP/1.1\r\n"));
}

#[tokio::test(start_paused = true)]
async fn test_retry_count_matches_consecutive_server_errors() {
    for n in 0..5usize {
        let mut replies: Vec<&[u8]> = vec![UNAVAILABLE; n];
        replies.push(OK_EMPTY);
        let provider = ScriptedProvider::replies(&replies);
        let (mut client, stats) = client(provider, Duration::from_secs(5));

        let response = client.request(&get("/"), true).await.unwrap();

        assert_eq!(response.status(), 200);
        assert_eq!(stats.snapshot().unwrap().retries, n as u64);
    }
}

#[tokio::test(start_paused = true)]
async fn test_every_5xx_code_is_retried() {
    let provider = ScriptedProvider::replies(&[
        b"HTTP/1.1 500 Internal Server Error\r\n\r\n",
        b"HTTP/1.1 501 Not Implemented\r\n\r\n",
        b"HTTP/1.1 599 Whatever\r\n\r\n",
        OK_EMPTY,
    ]);
    let (mut client, stats) = client(provider, Duration::from_secs(5));

    assert_eq!(client.request(&get("/"), true).await.unwrap().status(), 200);
    assert_eq!(stats.snapshot().unwrap().retries, 3);
}

#[tokio::test]
async fn test_4xx_is_returned_without_retry() {
    let provider = ScriptedProvider::replies(&[b"HTTP/1.1 404 Not Found\r\nContent-Length:9\r\n\r\nNoSuchKey"]);
    let (mut client, stats) = client(provider, Duration::from_secs(5));

    let mut response = client.request(&get("/missing"), true).await.unwrap();

    assert_eq!(response.status(), 404);
    assert_eq!(response.bytes().await.unwrap(), "NoSuchKey");
    assert_eq!(stats.snapshot().unwrap().retries, 0);
}

#[tokio::test(start_paused = true)]
async fn test_deadline_exhausted_returns_last_error() {
    let provider = ScriptedProvider::new(vec![]);
    let (mut client, stats) = client(provider.clone(), Duration::from_secs(1));
    let started = Instant::now();

    let err = client.request(&get("/"), true).await.unwrap_err();

    assert!(matches!(err, Error::Server { status: 503, .. }));
    assert_eq!(err.status(), Some(503));
    let snap = stats.snapshot().unwrap();
    assert_eq!(snap.requests, 0);
    // pauses of 100, 100, 200 and 300 ms; a 500 ms pause no longer fits
    assert_eq!(snap.retries, 4);
    assert_eq!(provider.opened(), 5);
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(700) && elapsed < Duration::from_millis(800));
    assert!(!client.is_busy());
}

#[tokio::test(start_paused = true)]
async fn test_refused_endpoint_is_not_hammered() {
    let provider = ScriptedProvider::new((0..1000).map(|_| Script::Refuse).collect());
    let (mut client, stats) = client(provider.clone(), Duration::from_secs(1));

    let err = client.request(&get("/"), true).await.unwrap_err();

    assert!(matches!(err, Error::Connect(_)));
    assert_eq!(stats.snapshot().unwrap().retries, 4);
    assert_eq!(stats.snapshot().unwrap().sessions, 0);
}

#[tokio::test(start_paused = true)]
async fn test_default_timeout_bounds_retry_count() {
    let provider = ScriptedProvider::new(vec![]);
    let stats = Arc::new(Stats::new());
    let mut client = ClientBuilder::new("example.com")
        .stats(stats.clone())
        .build(provider.clone())
        .unwrap();
    let started = Instant::now();

    let err = client.request(&get("/"), true).await.unwrap_err();

    assert_eq!(err.status(), Some(503));
    // 100, 100, 200, 300, 500, 800, 1300, 2100, 3400, 5500, 8900 ms
    assert_eq!(stats.snapshot().unwrap().retries, 11);
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(23_200) && elapsed < Duration::from_millis(23_300));
}

#[tokio::test(start_paused = true)]
async fn test_configured_backoff_seeds_the_pauses() {
    let provider = ScriptedProvider::replies(&[UNAVAILABLE, UNAVAILABLE, UNAVAILABLE, OK_EMPTY]);
    let stats = Arc::new(Stats::new());
    let mut client = ClientBuilder::new("example.com")
        .timeout(Duration::from_secs(5))
        .retry_backoff(Duration::from_millis(250))
        .stats(stats.clone())
        .build(provider)
        .unwrap();
    let started = Instant::now();

    let response = client.request(&get("/"), true).await.unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(stats.snapshot().unwrap().retries, 3);
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(1000) && elapsed < Duration::from_millis(1100));
}

#[tokio::test(start_paused = true)]
async fn test_stalled_session_times_out() {
    let provider = ScriptedProvider::with_fallback(vec![Script::Stall], OK_EMPTY);
    let (mut client, stats) = client(provider, Duration::from_secs(2));

    let err = client.request(&get("/"), true).await.unwrap_err();

    assert!(matches!(err, Error::Timeout(d) if d == Duration::from_secs(2)));
    assert_eq!(stats.snapshot().unwrap().retries, 0);
}

#[tokio::test]
async fn test_refused_connection_is_retried() {
    let provider = ScriptedProvider::new(vec![Script::Refuse, Script::Reply(OK_EMPTY.to_vec())]);
    let (mut client, stats) = client(provider.clone(), Duration::from_secs(5));

    let response = client.request(&get("/"), true).await.unwrap();

    assert_eq!(response.status(), 200);
    let snap = stats.snapshot().unwrap();
    assert_eq!(snap.retries, 1);
    assert_eq!(snap.sessions, 1);
    assert_eq!(provider.opened(), 1);
}

#[tokio::test]
async fn test_session_closed_by_idle_server_is_reopened() {
    let provider = ScriptedProvider::replies(&[OK_EMPTY, OK_EMPTY]);
    let (mut client, stats) = client(provider.clone(), Duration::from_secs(5));

    client.request(&get("/a"), true).await.unwrap();
    // first session hits EOF on the second request
    client.request(&get("/b"), true).await.unwrap();

    let snap = stats.snapshot().unwrap();
    assert_eq!(snap.requests, 2);
    assert_eq!(snap.retries, 1);
    assert_eq!(provider.opened(), 2);
}

#[tokio::test]
async fn test_request_while_busy_is_rejected() {
    let provider = ScriptedProvider::replies(&[&concat(&[
        b"HTTP/1.1 200 OK\r\nContent-Length:5\r\n\r\nhello",
        OK_EMPTY,
    ])]);
    let (mut client, stats) = client(provider.clone(), Duration::from_secs(5));

    let mut first = client.request(&get("/object"), false).await.unwrap();
    assert!(first.is_busy());
    assert!(client.is_busy());

    let err = client.request(&get("/other"), false).await.unwrap_err();
    assert!(matches!(err, Error::ClientBusy));
    assert!(!err.is_transient());
    assert_eq!(stats.snapshot().unwrap().retries, 0);
    assert_eq!(stats.snapshot().unwrap().requests, 1);

    assert_eq!(first.bytes().await.unwrap(), "hello");
    assert!(!first.is_busy());
    assert!(!client.is_busy());

    let second = client.request(&get("/other"), false).await.unwrap();
    assert_eq!(second.status(), 200);
    assert_eq!(provider.opened(), 1);
}

#[tokio::test]
async fn test_cached_response_leaves_client_idle() {
    let provider = ScriptedProvider::replies(&[&concat(&[
        b"HTTP/1.1 200 OK\r\nContent-Length:5\r\n\r\nhello",
        OK_EMPTY,
    ])]);
    let (mut client, _stats) = client(provider.clone(), Duration::from_secs(5));

    let first = client.request(&get("/object"), true).await.unwrap();
    assert!(!first.is_busy());
    assert!(!client.is_busy());
    assert_eq!(first.body().unwrap(), "hello");

    // no explicit finalize needed before the next request
    let second = client.request(&get("/next"), true).await.unwrap();
    assert_eq!(second.status(), 200);
    assert_eq!(second.body().unwrap().len(), 0);
    assert_eq!(provider.opened(), 1);
    drop(first);
    assert_eq!(provider.dropped(), 0);
}

#[tokio::test]
async fn test_dropping_busy_response_closes_session() {
    let provider = ScriptedProvider::replies(&[
        b"HTTP/1.1 200 OK\r\nContent-Length:100\r\n\r\npartial",
        OK_EMPTY,
    ]);
    let (mut client, stats) = client(provider.clone(), Duration::from_secs(5));

    let response = client.request(&get("/big"), false).await.unwrap();
    assert!(client.is_busy());
    drop(response);

    assert!(!client.is_busy());
    assert_eq!(provider.dropped(), 1);
    assert_eq!(stats.snapshot().unwrap().forced_closes, 0);

    client.request(&get("/next"), true).await.unwrap();
    assert_eq!(provider.opened(), 2);
}

#[tokio::test]
async fn test_client_teardown_finalizes_busy_response() {
    let provider = ScriptedProvider::replies(&[b"HTTP/1.1 200 OK\r\nContent-Length:100\r\n\r\npartial"]);
    let (mut client, _stats) = client(provider.clone(), Duration::from_secs(5));

    let mut response = client.request(&get("/big"), false).await.unwrap();
    assert!(response.is_busy());

    drop(client);

    assert_eq!(provider.dropped(), 1);
    assert!(!response.is_busy());
    assert!(matches!(response.chunk().await, Err(Error::Finalized)));

    response.finalize();
    response.finalize();
    assert_eq!(provider.dropped(), 1);
}

#[tokio::test]
async fn test_server_close_counts_as_forced_close() {
    let provider = ScriptedProvider::replies(&[
        b"HTTP/1.1 200 OK\r\nConnection: close\r\nContent-Length:2\r\n\r\nok",
        OK_EMPTY,
    ]);
    let (mut client, stats) = client(provider.clone(), Duration::from_secs(5));

    let response = client.request(&get("/"), true).await.unwrap();
    assert!(!response.keep_alive());
    assert_eq!(provider.dropped(), 1);
    assert_eq!(stats.snapshot().unwrap().forced_closes, 1);

    client.request(&get("/"), true).await.unwrap();
    assert_eq!(provider.opened(), 2);
    assert_eq!(stats.snapshot().unwrap().retries, 0);
}

#[tokio::test]
async fn test_done_handshake() {
    let provider = ScriptedProvider::replies(&[OK_EMPTY]);
    let (mut client, stats) = client(provider.clone(), Duration::from_secs(5));

    // nothing active yet
    client.done(Disposition::Close);
    assert!(matches!(client.done_with(false, true), Err(Error::Contract(_))));
    assert_eq!(stats.snapshot().unwrap().forced_closes, 0);

    client.request(&get("/"), true).await.unwrap();
    client.done_with(true, true).unwrap();
    assert_eq!(provider.dropped(), 1);
    assert_eq!(stats.snapshot().unwrap().forced_closes, 1);

    client.done(Disposition::Close);
    assert_eq!(provider.dropped(), 1);
    assert_eq!(stats.snapshot().unwrap().forced_closes, 1);
}

#[tokio::test]
async fn test_chunked_body_drains_lazily() {
    let provider = ScriptedProvider::replies(&[&concat(&[
        b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n",
        b"5\r\nhello\r\n6;ext=1\r\n world\r\n0\r\nX-Trailer: yes\r\n\r\n",
        OK_EMPTY,
    ])]);
    let (mut client, _stats) = client(provider.clone(), Duration::from_secs(5));

    let mut response = client.request(&get("/listing"), false).await.unwrap();
    assert!(client.is_busy());

    let mut pieces = Vec::new();
    while let Some(chunk) = response.chunk().await.unwrap() {
        pieces.push(chunk);
    }
    assert_eq!(pieces, ["hello", " world"]);
    assert!(!client.is_busy());

    client.request(&get("/"), true).await.unwrap();
    assert_eq!(provider.opened(), 1);
}

#[tokio::test]
async fn test_head_response_has_no_body() {
    let provider = ScriptedProvider::replies(&[&concat(&[
        b"HTTP/1.1 200 OK\r\nContent-Length:1024\r\n\r\n",
        OK_EMPTY,
    ])]);
    let (mut client, _stats) = client(provider.clone(), Duration::from_secs(5));

    let head = RequestBuilder::new().method(Method::HEAD).path("/object").build().unwrap();
    let mut response = client.request(&head, false).await.unwrap();

    assert!(!response.is_busy());
    assert_eq!(response.header("content-length"), Some("1024"));
    assert!(response.bytes().await.unwrap().is_empty());

    client.request(&get("/"), true).await.unwrap();
    assert_eq!(provider.opened(), 1);
}

#[tokio::test]
async fn test_body_until_eof_forces_close() {
    let provider = ScriptedProvider::replies(&[b"HTTP/1.1 200 OK\r\n\r\nstreamed until close"]);
    let (mut client, stats) = client(provider.clone(), Duration::from_secs(5));

    let mut response = client.request(&get("/"), false).await.unwrap();
    assert!(!response.keep_alive());
    assert_eq!(response.bytes().await.unwrap(), "streamed until close");

    assert_eq!(provider.dropped(), 1);
    assert_eq!(stats.snapshot().unwrap().forced_closes, 1);
}

#[tokio::test]
async fn test_interim_continue_is_skipped() {
    let provider = ScriptedProvider::replies(&[&concat(&[
        b"HTTP/1.1 100 Continue\r\n\r\n",
        b"HTTP/1.1 201 Created\r\nContent-Length:0\r\n\r\n",
    ])]);
    let (mut client, _stats) = client(provider, Duration::from_secs(5));

    let put = RequestBuilder::new()
        .method(Method::PUT)
        .path("/bucket/key")
        .header("Expect", "100-continue")
        .body("data")
        .build()
        .unwrap();
    let response = client.request(&put, true).await.unwrap();

    assert_eq!(response.status(), 201);
}

#[tokio::test]
async fn test_stats_after_clean_request() {
    let provider = ScriptedProvider::replies(&[OK_EMPTY]);
    let (mut client, stats) = client(provider, Duration::from_secs(5));

    client.request(&get("/"), true).await.unwrap();

    let snap = stats.snapshot().unwrap();
    assert_eq!(snap.objects, 1);
    assert!(snap.sessions >= 1);
    assert_eq!(snap.requests, 1);
    assert_eq!(snap.retries, 0);
}

#[test]
fn test_empty_host_is_rejected() {
    let result = ClientBuilder::new("").build(ScriptedProvider::new(vec![]));
    assert!(matches!(result, Err(Error::InvalidHost)));
}
