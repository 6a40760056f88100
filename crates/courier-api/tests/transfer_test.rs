//! Transfer API integration tests.
//!
//! Run with: `cargo test -p courier-api --test transfer_test`
//! The suite is hermetic: memory ledger + memory storage behind the real router.

mod helpers;

use axum_test::{TestResponse, TestServer};
use bytes::Bytes;
use flate2::read::GzDecoder;
use helpers::{bearer_for, setup_test_app, setup_test_app_with, transfer_path};
use serde_json::{json, Value};
use std::io::Read;
use uuid::Uuid;

async fn create_upload(server: &TestServer, files: Value) -> Value {
    let response = server
        .post("/v1/uploader")
        .json(&json!({ "files": files }))
        .await;
    assert_eq!(response.status_code(), 201);
    response.json::<Value>()
}

fn file_id(upload: &Value, index: usize) -> String {
    upload["files"][index]["id"].as_str().expect("file id").to_string()
}

async fn write_location(server: &TestServer, upload: &Value, index: usize) -> TestResponse {
    let upload_id = upload["id"].as_str().unwrap();
    server
        .get(&format!(
            "/v1/uploader/{}/file/{}/upload_url",
            upload_id,
            file_id(upload, index)
        ))
        .await
}

async fn write_file(server: &TestServer, upload: &Value, index: usize, data: &[u8]) -> TestResponse {
    let response = write_location(server, upload, index).await;
    assert_eq!(response.status_code(), 200);
    let location = response.json::<Value>();
    assert_eq!(location["method"], "PUT");
    let path = transfer_path(location["url"].as_str().unwrap());
    server.put(&path).bytes(Bytes::copy_from_slice(data)).await
}

async fn complete(server: &TestServer, upload: &Value) -> TestResponse {
    let upload_id = upload["id"].as_str().unwrap();
    server
        .put(&format!("/v1/uploader/{}/complete", upload_id))
        .await
}

fn unpack_archive(archive: &[u8]) -> Vec<(String, Vec<u8>)> {
    let mut entries = Vec::new();
    let mut tar = tar::Archive::new(GzDecoder::new(archive));
    for entry in tar.entries().expect("tar entries") {
        let mut entry = entry.expect("tar entry");
        let name = entry.path().unwrap().to_string_lossy().into_owned();
        let mut data = Vec::new();
        entry.read_to_end(&mut data).expect("entry bytes");
        entries.push((name, data));
    }
    entries
}

#[tokio::test]
async fn test_index_banner() {
    let app = setup_test_app();
    let response = app.client().get("/v1/").await;
    assert_eq!(response.status_code(), 200);
    assert_eq!(response.json::<Value>()["status"], "success");
}

#[tokio::test]
async fn test_full_transfer_round_trip() {
    let app = setup_test_app();
    let client = app.client();

    let upload = create_upload(
        client,
        json!([
            { "name": "a.txt", "size": 10 },
            { "name": "b.txt", "size": 20 }
        ]),
    )
    .await;
    assert_eq!(upload["state"], "pending");

    let written = write_file(client, &upload, 0, b"0123456789").await;
    assert_eq!(written.status_code(), 200);
    assert_eq!(written.json::<Value>()["written"], 10);
    let written = write_file(client, &upload, 1, &[7u8; 20]).await;
    assert_eq!(written.status_code(), 200);

    let completed = complete(client, &upload).await;
    assert_eq!(completed.status_code(), 200);
    let body = completed.json::<Value>();
    assert_eq!(body["upload"]["state"], "completed");
    let download_id = body["download_id"].as_str().expect("download id").to_string();

    // Recipient view lists both files.
    let shown = client.get(&format!("/v1/downloader/{}", download_id)).await;
    assert_eq!(shown.status_code(), 200);
    let shown = shown.json::<Value>();
    assert_eq!(shown["files"].as_array().unwrap().len(), 2);
    assert_eq!(shown["files"][0]["name"], "a.txt");

    // Full archive carries exactly the two members, in declaration order.
    let archive = client.get(&format!("/v1/downloader/{}/zip", download_id)).await;
    assert_eq!(archive.status_code(), 200);
    let entries = unpack_archive(archive.as_bytes());
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].0, "a.txt");
    assert_eq!(entries[0].1, b"0123456789");
    assert_eq!(entries[1].0, "b.txt");
    assert_eq!(entries[1].1, vec![7u8; 20]);
}

#[tokio::test]
async fn test_completion_reports_missing_files() {
    let app = setup_test_app();
    let client = app.client();

    let upload = create_upload(
        client,
        json!([
            { "name": "a.txt", "size": 10 },
            { "name": "b.txt", "size": 20 }
        ]),
    )
    .await;

    write_file(client, &upload, 0, b"0123456789").await;

    let response = complete(client, &upload).await;
    assert_eq!(response.status_code(), 409);
    let body = response.json::<Value>();
    assert_eq!(body["code"], "UPLOAD_INCOMPLETE");
    let missing = body["missing"].as_array().expect("missing ids");
    assert_eq!(missing.len(), 1);
    assert_eq!(missing[0].as_str().unwrap(), file_id(&upload, 1));
}

#[tokio::test]
async fn test_size_mismatch_is_a_hard_failure() {
    let app = setup_test_app();
    let client = app.client();

    let upload = create_upload(client, json!([{ "name": "a.txt", "size": 10 }])).await;

    // 9 observed bytes against 10 declared.
    let response = write_file(client, &upload, 0, b"012345678").await;
    assert_eq!(response.status_code(), 422);
    assert_eq!(response.json::<Value>()["code"], "SIZE_MISMATCH");

    // The upload can never complete with the failed entry outstanding.
    let response = complete(client, &upload).await;
    assert_eq!(response.status_code(), 409);

    // Rewriting with the declared size recovers the entry.
    let response = write_file(client, &upload, 0, b"0123456789").await;
    assert_eq!(response.status_code(), 200);
    assert_eq!(complete(client, &upload).await.status_code(), 200);
}

#[tokio::test]
async fn test_rewriting_requires_overwrite_opt_in() {
    let app = setup_test_app();
    let client = app.client();

    let upload = create_upload(client, json!([{ "name": "a.txt", "size": 4 }])).await;
    write_file(client, &upload, 0, b"data").await;

    // Overwrites disabled: re-issuing the write location is refused.
    let response = write_location(client, &upload, 0).await;
    assert_eq!(response.status_code(), 409);
    assert_eq!(response.json::<Value>()["code"], "ALREADY_WRITTEN");
}

#[tokio::test]
async fn test_overwrite_allowed_when_enabled_and_requested() {
    let app = setup_test_app_with(true);
    let client = app.client();

    let upload = create_upload(client, json!([{ "name": "a.txt", "size": 4 }])).await;
    write_file(client, &upload, 0, b"data").await;
    let upload_id = upload["id"].as_str().unwrap();

    // Enabled but not requested: still refused.
    let response = write_location(client, &upload, 0).await;
    assert_eq!(response.status_code(), 409);

    // Enabled and requested: a fresh location is issued and redeemable.
    let response = client
        .get(&format!(
            "/v1/uploader/{}/file/{}/upload_url?overwrite=true",
            upload_id,
            file_id(&upload, 0)
        ))
        .await;
    assert_eq!(response.status_code(), 200);
    let location = response.json::<Value>();
    let path = transfer_path(location["url"].as_str().unwrap());
    let response = client.put(&path).bytes(Bytes::from_static(b"newd")).await;
    assert_eq!(response.status_code(), 200);
}

#[tokio::test]
async fn test_selection_archive_order_and_validation() {
    let app = setup_test_app();
    let client = app.client();

    let upload = create_upload(
        client,
        json!([
            { "name": "a.txt", "size": 1 },
            { "name": "b.txt", "size": 1 },
            { "name": "c.txt", "size": 1 }
        ]),
    )
    .await;
    write_file(client, &upload, 0, b"a").await;
    write_file(client, &upload, 1, b"b").await;
    write_file(client, &upload, 2, b"c").await;
    let body = complete(client, &upload).await.json::<Value>();
    let download_id = body["download_id"].as_str().unwrap().to_string();

    // Request c before a; members come back in declaration order.
    let response = client
        .post(&format!("/v1/downloader/{}/selection/zip", download_id))
        .json(&json!({ "file_ids": [file_id(&upload, 2), file_id(&upload, 0)] }))
        .await;
    assert_eq!(response.status_code(), 200);
    let entries = unpack_archive(response.as_bytes());
    let names: Vec<_> = entries.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(names, vec!["a.txt", "c.txt"]);

    // A foreign id is rejected before any bytes are emitted.
    let response = client
        .post(&format!("/v1/downloader/{}/selection/zip", download_id))
        .json(&json!({ "file_ids": [file_id(&upload, 0), Uuid::new_v4()] }))
        .await;
    assert_eq!(response.status_code(), 404);

    // An empty selection is invalid.
    let response = client
        .post(&format!("/v1/downloader/{}/selection/zip", download_id))
        .json(&json!({ "file_ids": [] }))
        .await;
    assert_eq!(response.status_code(), 400);
}

#[tokio::test]
async fn test_repeated_archive_requests_are_byte_identical() {
    let app = setup_test_app();
    let client = app.client();

    let upload = create_upload(
        client,
        json!([
            { "name": "a.bin", "size": 64 },
            { "name": "b.bin", "size": 256 }
        ]),
    )
    .await;
    write_file(client, &upload, 0, &[1u8; 64]).await;
    write_file(client, &upload, 1, &[2u8; 256]).await;
    let body = complete(client, &upload).await.json::<Value>();
    let download_id = body["download_id"].as_str().unwrap().to_string();

    let first = client
        .get(&format!("/v1/downloader/{}/zip", download_id))
        .await
        .as_bytes()
        .to_vec();
    let second = client
        .get(&format!("/v1/downloader/{}/zip", download_id))
        .await
        .as_bytes()
        .to_vec();
    assert!(!first.is_empty());
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_completion_is_idempotent_and_returns_same_download() {
    let app = setup_test_app();
    let client = app.client();

    let upload = create_upload(client, json!([{ "name": "a.txt", "size": 3 }])).await;
    write_file(client, &upload, 0, b"abc").await;

    let first = complete(client, &upload).await.json::<Value>();
    let second = complete(client, &upload).await.json::<Value>();
    assert_eq!(first["download_id"], second["download_id"]);
    assert_eq!(
        first["upload"]["completed_at"],
        second["upload"]["completed_at"]
    );
}

#[tokio::test]
async fn test_single_file_download_url_round_trip() {
    let app = setup_test_app();
    let client = app.client();

    let upload = create_upload(client, json!([{ "name": "report.pdf", "size": 6 }])).await;
    write_file(client, &upload, 0, b"%PDF-1").await;
    let body = complete(client, &upload).await.json::<Value>();
    let download_id = body["download_id"].as_str().unwrap().to_string();

    let response = client
        .get(&format!(
            "/v1/downloader/{}/file/{}/download_url",
            download_id,
            file_id(&upload, 0)
        ))
        .await;
    assert_eq!(response.status_code(), 200);
    let location = response.json::<Value>();
    assert_eq!(location["method"], "GET");

    let response = client
        .get(&transfer_path(location["url"].as_str().unwrap()))
        .await;
    assert_eq!(response.status_code(), 200);
    assert_eq!(response.as_bytes().to_vec(), b"%PDF-1".to_vec());
    let disposition = response
        .headers()
        .get("content-disposition")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    assert!(disposition.contains("report.pdf"));
}

#[tokio::test]
async fn test_deleted_upload_is_unreachable_everywhere() {
    let app = setup_test_app();
    let client = app.client();
    let owner = Uuid::new_v4();

    let response = client
        .post("/v1/uploader")
        .add_header("Authorization", bearer_for(owner))
        .json(&json!({ "files": [{ "name": "a.txt", "size": 3 }] }))
        .await;
    assert_eq!(response.status_code(), 201);
    let upload = response.json::<Value>();
    let upload_id = upload["id"].as_str().unwrap().to_string();

    write_file(client, &upload, 0, b"abc").await;
    let body = complete(client, &upload).await.json::<Value>();
    let download_id = body["download_id"].as_str().unwrap().to_string();

    // A different authenticated principal cannot even observe the upload.
    let response = client
        .delete(&format!("/v1/uploader/{}", upload_id))
        .add_header("Authorization", bearer_for(Uuid::new_v4()))
        .await;
    assert_eq!(response.status_code(), 404);

    // Unauthenticated deletion is refused outright.
    let response = client.delete(&format!("/v1/uploader/{}", upload_id)).await;
    assert_eq!(response.status_code(), 401);

    let response = client
        .delete(&format!("/v1/uploader/{}", upload_id))
        .add_header("Authorization", bearer_for(owner))
        .await;
    assert_eq!(response.status_code(), 204);

    // Every read path answers 404 immediately after the transition.
    let response = write_location(client, &upload, 0).await;
    assert_eq!(response.status_code(), 404);
    assert_eq!(complete(client, &upload).await.status_code(), 404);
    let response = client.get(&format!("/v1/downloader/{}", download_id)).await;
    assert_eq!(response.status_code(), 404);
    let response = client
        .get(&format!("/v1/downloader/{}/zip", download_id))
        .await;
    assert_eq!(response.status_code(), 404);
}

#[tokio::test]
async fn test_list_uploads_requires_auth_and_scopes_to_owner() {
    let app = setup_test_app();
    let client = app.client();
    let owner = Uuid::new_v4();

    assert_eq!(client.get("/v1/uploader").await.status_code(), 401);

    client
        .post("/v1/uploader")
        .add_header("Authorization", bearer_for(owner))
        .json(&json!({ "files": [{ "name": "mine.txt", "size": 1 }] }))
        .await;
    // Anonymous upload is invisible in listings.
    create_upload(client, json!([{ "name": "anon.txt", "size": 1 }])).await;

    let response = client
        .get("/v1/uploader")
        .add_header("Authorization", bearer_for(owner))
        .await;
    assert_eq!(response.status_code(), 200);
    let listed = response.json::<Value>();
    assert_eq!(listed.as_array().unwrap().len(), 1);
    assert_eq!(listed[0]["files"][0]["name"], "mine.txt");

    let response = client
        .get("/v1/uploader")
        .add_header("Authorization", bearer_for(Uuid::new_v4()))
        .await;
    assert_eq!(response.json::<Value>().as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_access_count_increments_per_metadata_fetch() {
    let app = setup_test_app();
    let client = app.client();

    let upload = create_upload(client, json!([{ "name": "a.txt", "size": 1 }])).await;
    write_file(client, &upload, 0, b"x").await;
    let body = complete(client, &upload).await.json::<Value>();
    let download_id = body["download_id"].as_str().unwrap().to_string();

    let first = client
        .get(&format!("/v1/downloader/{}", download_id))
        .await
        .json::<Value>();
    let second = client
        .get(&format!("/v1/downloader/{}", download_id))
        .await
        .json::<Value>();
    assert_eq!(first["access_count"], 1);
    assert_eq!(second["access_count"], 2);
}

#[tokio::test]
async fn test_malformed_and_foreign_requests() {
    let app = setup_test_app();
    let client = app.client();

    // Garbage transfer token.
    let response = client
        .put("/v1/transfer/not-a-token")
        .bytes(Bytes::from_static(b"x"))
        .await;
    assert_eq!(response.status_code(), 400);

    // Unknown ids.
    let response = client
        .get(&format!("/v1/downloader/{}", Uuid::new_v4()))
        .await;
    assert_eq!(response.status_code(), 404);
    let response = client
        .put(&format!("/v1/uploader/{}/complete", Uuid::new_v4()))
        .await;
    assert_eq!(response.status_code(), 404);

    // An upload must declare at least one file.
    let response = client.post("/v1/uploader").json(&json!({ "files": [] })).await;
    assert_eq!(response.status_code(), 400);
}
