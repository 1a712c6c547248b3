//! Artifact transfer from a provider URL into storage.

mod common;

use std::sync::Arc;

use common::{Reply, mock_server};
use sketchbook::dispatch::AssetKind;
use sketchbook::error::SketchbookError;
use sketchbook::storage::memory::MemoryObjectStore;
use sketchbook::storage::{Placement, Storage, StoragePolicy};
use sketchbook::transfer::ArtifactTransfer;

fn transfer_with_store() -> (Arc<MemoryObjectStore>, ArtifactTransfer) {
    let store = Arc::new(MemoryObjectStore::new());
    let policy = StoragePolicy {
        public_base_url: "https://bucket.test".to_string(),
        ..Default::default()
    };
    let storage = Arc::new(Storage::new(store.clone(), policy).unwrap());
    (store, ArtifactTransfer::new(storage))
}

#[tokio::test]
async fn transfer_copies_bytes_with_matching_type() {
    let server = mock_server(|_, _| Reply::bytes("video/webm", b"webm-data")).await;
    let (store, transfer) = transfer_with_store();

    let asset = transfer
        .transfer(
            &server.url("/out/clip.webm?token=abc"),
            AssetKind::Video,
            &Placement::permanent("videos"),
        )
        .await
        .unwrap();

    assert!(asset.backing_key.starts_with("videos/"));
    assert!(asset.backing_key.ends_with(".webm"));
    assert_eq!(asset.url, format!("https://bucket.test/{}", asset.backing_key));

    let object = store.get(&asset.backing_key).unwrap();
    assert_eq!(object.bytes, b"webm-data");
    assert_eq!(object.content_type, "video/webm");
}

#[tokio::test]
async fn unknown_extension_uses_kind_default() {
    let server = mock_server(|_, _| Reply::bytes("application/octet-stream", b"\x89PNG")).await;
    let (store, transfer) = transfer_with_store();

    let asset = transfer
        .transfer(
            &server.url("/generated/12345"),
            AssetKind::Image,
            &Placement::permanent("characters"),
        )
        .await
        .unwrap();

    assert!(asset.backing_key.ends_with(".png"));
    assert_eq!(store.get(&asset.backing_key).unwrap().content_type, "image/png");
}

#[tokio::test]
async fn asset_without_content_length_is_read_to_the_end() {
    let body = vec![7u8; 200 * 1024];
    let expected = body.clone();
    let server = mock_server(move |_, _| Reply::bytes("video/mp4", &body).without_length()).await;
    let (store, transfer) = transfer_with_store();

    let asset = transfer
        .transfer(&server.url("/out/long.mp4"), AssetKind::Video, &Placement::permanent("videos"))
        .await
        .unwrap();

    assert_eq!(store.get(&asset.backing_key).unwrap().bytes, expected);
}

#[tokio::test]
async fn download_500_is_download_error_and_stores_nothing() {
    let server = mock_server(|_, _| Reply::json(500, r#"{"error":"boom"}"#)).await;
    let (store, transfer) = transfer_with_store();

    let err = transfer
        .transfer(&server.url("/out/a.mp4"), AssetKind::Video, &Placement::permanent("videos"))
        .await
        .unwrap_err();

    match err {
        SketchbookError::Download { url, message } => {
            assert!(url.ends_with("/out/a.mp4"));
            assert!(message.contains("500"), "{message}");
        }
        other => panic!("expected Download error, got {other:?}"),
    }
    assert!(store.keys().is_empty());
    assert_eq!(server.hits().len(), 1);
}

#[tokio::test]
async fn empty_download_is_rejected() {
    let server = mock_server(|_, _| Reply::bytes("image/png", b"")).await;
    let (store, transfer) = transfer_with_store();

    let err = transfer
        .transfer(&server.url("/a.png"), AssetKind::Image, &Placement::permanent("diaries"))
        .await
        .unwrap_err();

    assert!(matches!(err, SketchbookError::Download { .. }));
    assert!(store.keys().is_empty());
}

#[tokio::test]
async fn unreachable_host_is_download_error() {
    let (_, transfer) = transfer_with_store();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let err = transfer
        .transfer(
            &format!("http://127.0.0.1:{port}/a.png"),
            AssetKind::Image,
            &Placement::permanent("diaries"),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, SketchbookError::Download { .. }));
}
