//! In-process HTTP API tests: the router is driven directly with
//! `tower::ServiceExt::oneshot`, no listener bound.

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

use fleet_sync::config::{Config, RegistryConfig, ServerConfig, StorageConfig, SyncConfig};
use fleet_sync::ingest::ingest_records;
use fleet_sync::models::{Category, NormalizedRecord};
use fleet_sync::registry::TenantRegistry;
use fleet_sync::server;
use fleet_sync::snapshot::SnapshotBuilder;

fn test_config(tmp: &TempDir) -> Config {
    Config {
        storage: StorageConfig {
            data_dir: tmp.path().join("data"),
        },
        registry: RegistryConfig::default(),
        sync: SyncConfig {
            max_dump_records: 100,
            max_chunk_limit: 50,
            batch_size: 4,
            batch_pause_ms: 0,
            search_limit: 50,
        },
        server: ServerConfig {
            bind: "127.0.0.1:0".to_string(),
            admin_token: Some("sesame".to_string()),
            production: false,
        },
    }
}

fn rec(id: &str, reg: &str) -> NormalizedRecord {
    NormalizedRecord {
        id: id.to_string(),
        registration_number: reg.to_string(),
        customer_name: format!("Customer {id}"),
        ..NormalizedRecord::default()
    }
}

/// Router over a registry holding one tenant with ingested records and a
/// built snapshot. Returns the live snapshot path for on-disk assertions.
async fn app_with_snapshot(tmp: &TempDir) -> (Router, PathBuf) {
    let config = test_config(tmp);
    let registry = Arc::new(TenantRegistry::open(&config).await.unwrap());
    registry.add_tenant("acme", "Acme Motors").await.unwrap();

    let handle = registry.resolve("acme").await.unwrap();
    let records: Vec<NormalizedRecord> = (1..=5)
        .map(|i| rec(&format!("r{i}"), &format!("MH12AA{i:04}")))
        .collect();
    ingest_records(&handle.pool, Category::TwoWheeler, &records)
        .await
        .unwrap();

    let builder = Arc::new(SnapshotBuilder::new(&config).unwrap());
    builder.build(&handle).await.unwrap();
    let live = builder.snapshot_path(&handle);

    let app = server::app(Arc::new(config), registry, Some(builder));
    (app, live)
}

#[tokio::test]
async fn snapshot_download_streams_file_with_attachment_headers() {
    let tmp = TempDir::new().unwrap();
    let (app, live) = app_with_snapshot(&tmp).await;
    let on_disk = std::fs::read(&live).unwrap();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/tenants/acme/snapshot/file")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers();
    assert_eq!(
        headers.get(header::CONTENT_TYPE).unwrap(),
        "application/octet-stream"
    );
    assert_eq!(
        headers.get(header::CONTENT_LENGTH).unwrap().to_str().unwrap(),
        on_disk.len().to_string()
    );
    assert_eq!(
        headers.get(header::CONTENT_DISPOSITION).unwrap(),
        "attachment; filename=\"acme_motors-snapshot.sqlite\""
    );

    // The streamed body is byte-identical to the file on disk.
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(body.as_ref(), on_disk.as_slice());
}

#[tokio::test]
async fn snapshot_download_requires_a_built_snapshot() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let registry = Arc::new(TenantRegistry::open(&config).await.unwrap());
    registry.add_tenant("acme", "Acme Motors").await.unwrap();
    let builder = Arc::new(SnapshotBuilder::new(&config).unwrap());
    let app = server::app(Arc::new(config), registry, Some(builder));

    let response = app
        .oneshot(
            Request::builder()
                .uri("/tenants/acme/snapshot/file")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(value["success"], serde_json::json!(false));
}

#[tokio::test]
async fn rebuild_requires_admin_token() {
    let tmp = TempDir::new().unwrap();
    let (app, _live) = app_with_snapshot(&tmp).await;

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/tenants/acme/snapshot/rebuild")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/tenants/acme/snapshot/rebuild")
                .header("x-admin-token", "sesame")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(value["success"], serde_json::json!(true));
    assert!(value["meta"]["checksum"].as_str().unwrap().len() == 64);
}
