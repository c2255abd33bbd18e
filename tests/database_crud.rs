#![cfg(not(target_arch = "wasm32"))]

use std::sync::Arc;
use std::time::Duration;

use firebase_rtdb_sync::database::{Database, DatabaseSettings, RateLimits, TransportKind};
use firebase_rtdb_sync::platform::StaticTokenSource;
use httpmock::prelude::*;
use httpmock::Method::PATCH;
use httpmock::MockServer;
use serde::Deserialize;
use serde_json::{json, Value};

fn database_for(server: &MockServer, limits: RateLimits) -> Database {
    let settings = DatabaseSettings::new(server.url("/"))
        .with_transport(TransportKind::Polling)
        .with_rate_limits(limits);
    Database::new(settings, Arc::new(StaticTokenSource::new("secret"))).expect("database")
}

#[derive(Debug, Deserialize, PartialEq)]
struct TestData {
    name: String,
    age: u32,
}

#[tokio::test(flavor = "multi_thread")]
async fn write_get_update_delete_round_trip() {
    let server = MockServer::start_async().await;
    let database = database_for(&server, RateLimits::default());

    let put = server
        .mock_async(|when, then| {
            when.method(PUT)
                .path("/testData.json")
                .query_param("auth", "secret")
                .json_body(json!({"name": "Test User", "age": 25}));
            then.status(200).body(r#"{"name":"Test User","age":25}"#);
        })
        .await;
    assert!(
        database
            .set("/testData", &json!({"name": "Test User", "age": 25}))
            .await
    );
    put.assert_async().await;

    let mut get = server
        .mock_async(|when, then| {
            when.method(GET).path("/testData.json");
            then.status(200).body(r#"{"name":"Test User","age":25}"#);
        })
        .await;
    let value = database.get("/testData", false, &[]).await.unwrap();
    assert_eq!(value["age"], json!(25));
    get.delete_async().await;

    let patch = server
        .mock_async(|when, then| {
            when.method(PATCH)
                .path("/testData.json")
                .json_body(json!({"age": 30}));
            then.status(200).body(r#"{"age":30}"#);
        })
        .await;
    assert!(database.update("/testData", &json!({"age": 30})).await);
    patch.assert_async().await;

    get = server
        .mock_async(|when, then| {
            when.method(GET).path("/testData.json");
            then.status(200).body(r#"{"name":"Test User","age":30}"#);
        })
        .await;
    let typed: Option<TestData> = database.get_as("/testData").await;
    assert_eq!(
        typed,
        Some(TestData {
            name: "Test User".into(),
            age: 30
        })
    );
    get.delete_async().await;

    let delete = server
        .mock_async(|when, then| {
            when.method(DELETE).path("/testData.json");
            then.status(200).body("null");
        })
        .await;
    assert!(database.delete("/testData").await);
    delete.assert_async().await;

    server
        .mock_async(|when, then| {
            when.method(GET).path("/testData.json");
            then.status(200).body("null");
        })
        .await;
    assert_eq!(database.get("/testData", false, &[]).await, None);

    let status = database.rate_limiter().status();
    assert_eq!(status.writes, 3);
    assert_eq!(status.reads, 3);
    assert_eq!(database.connections().open_count(), 0);
    database.dispose();
}

#[tokio::test(flavor = "multi_thread")]
async fn oversized_write_is_refused_on_an_empty_window() {
    let server = MockServer::start_async().await;
    let put = server
        .mock_async(|when, then| {
            when.method(PUT).path("/blob.json");
            then.status(200).body("null");
        })
        .await;
    let database = database_for(
        &server,
        RateLimits {
            max_bytes: 1_000,
            ..RateLimits::default()
        },
    );

    let blob = "x".repeat(2_000);
    assert!(!database.set("blob", &blob).await);
    assert_eq!(put.hits_async().await, 0);
    assert_eq!(database.rate_limiter().status().bytes_transferred, 0);
    database.dispose();
}

#[tokio::test(flavor = "multi_thread")]
async fn rate_window_resets_after_it_elapses() {
    let server = MockServer::start_async().await;
    let put = server
        .mock_async(|when, then| {
            when.method(PUT).path("/counter.json");
            then.status(200).body("1");
        })
        .await;
    let database = database_for(
        &server,
        RateLimits {
            max_writes: 2,
            window: Duration::from_millis(150),
            ..RateLimits::default()
        },
    );

    assert!(database.set("counter", &1).await);
    assert!(database.set("counter", &1).await);
    assert!(!database.set("counter", &1).await);

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(database.set("counter", &1).await);
    assert_eq!(put.hits_async().await, 3);
    database.dispose();
}

#[tokio::test(flavor = "multi_thread")]
async fn shallow_get_forwards_extra_query() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/rooms.json")
                .query_param("shallow", "true")
                .query_param("print", "silent");
            then.status(200).body(r#"{"lobby":true}"#);
        })
        .await;
    let database = database_for(&server, RateLimits::default());

    let keys: Value = database
        .get(
            "rooms",
            true,
            &[("print".to_string(), "silent".to_string())],
        )
        .await
        .unwrap();
    mock.assert_async().await;
    assert_eq!(keys, json!({"lobby": true}));
    database.dispose();
}
