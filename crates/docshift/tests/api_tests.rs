//! Router-level tests: envelopes, error handling, the file catalogue.

mod common;

use axum::http::{Method, StatusCode};
use serde_json::json;

use common::*;

#[tokio::test]
async fn test_health_reports_running_server() {
    let harness = TestHarness::new();
    let (status, body) = harness.send(get("/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["message"], "Server is running");
    assert_eq!(body["data"]["status"], "healthy");
    assert_eq!(body["data"]["environment"], "development");
    assert!(body["timestamp"].is_string());
}

#[tokio::test]
async fn test_unknown_route_uses_error_envelope() {
    let harness = TestHarness::new();
    let (status, body) = harness.send(get("/api/nowhere")).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["statusCode"], 404);
    assert_eq!(body["error"]["errorCode"], "NOT_FOUND");
    assert_eq!(body["error"]["message"], "Route GET /api/nowhere not found");
}

#[tokio::test]
async fn test_stack_only_in_development() {
    let dev = TestHarness::new();
    let (_, body) = dev.send(get("/api/files/missing")).await;
    assert!(body["error"]["stack"].is_string());

    let prod = TestHarness::production();
    let (status, body) = prod.send(get("/api/files/missing")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].get("stack").is_none());
}

#[tokio::test]
async fn test_disallowed_extension_leaves_nothing_behind() {
    let harness = TestHarness::new();
    let request = MultipartBuilder::new()
        .file("file", "setup.exe", "application/octet-stream", b"MZ\x90\x00")
        .build("/api/excel/upload");

    let (status, body) = harness.send(request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["errorCode"], "VALIDATION_ERROR");
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("Invalid file type"));
    assert!(harness.files_in("excel", "temp").is_empty());
    assert_eq!(harness.count_rows("files"), 0);
}

#[tokio::test]
async fn test_oversized_upload_is_rejected_while_streaming() {
    let mut config = docshift::Config::default();
    config.limits.spreadsheet_max_bytes = 64;
    let harness = TestHarness::with_config(config);
    let workbook = xlsx_bytes("Big", &[vec![json!("a"), json!("b")], vec![json!(1), json!(2)]]);
    assert!(workbook.len() > 64);

    let request = MultipartBuilder::new()
        .file("file", "big.xlsx", XLSX_MIME, &workbook)
        .build("/api/excel/upload");
    let (status, body) = harness.send(request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["errorCode"], "FILE_TOO_LARGE");
    assert_eq!(body["error"]["details"]["maxBytes"], 64);
    assert_eq!(
        body["error"]["message"],
        "File 'big.xlsx' is too large. Maximum size is 64 bytes"
    );
    assert!(harness.files_in("excel", "temp").is_empty());
    assert_eq!(harness.count_rows("files"), 0);
}

#[tokio::test]
async fn test_missing_file_field_is_rejected() {
    let harness = TestHarness::new();
    let request = MultipartBuilder::new()
        .text("level", "low")
        .build("/api/pdf/compress");

    let (status, body) = harness.send(request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["message"], "No file uploaded in field 'file'");
    assert_eq!(harness.count_rows("pdf_operations"), 0);
}

#[tokio::test]
async fn test_malformed_json_body_is_validation_error() {
    let harness = TestHarness::new();
    let request = axum::http::Request::builder()
        .method(Method::POST)
        .uri("/api/converter/json-to-excel")
        .header("content-type", "application/json")
        .body(axum::body::Body::from("{not json"))
        .unwrap();

    let (status, body) = harness.send(request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["errorCode"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_file_catalogue_tags_and_logs() {
    let harness = TestHarness::new();
    let workbook = xlsx_bytes("Data", &[vec![json!("name")], vec![json!("Ada")]]);
    let upload = MultipartBuilder::new()
        .file("file", "people.xlsx", XLSX_MIME, &workbook)
        .build("/api/excel/upload");
    let (status, body) = harness.send(upload).await;
    assert_eq!(status, StatusCode::CREATED);
    let file_id = body["data"]["id"].as_str().unwrap().to_string();
    assert_eq!(body["data"]["fileType"], "EXCEL");
    assert_eq!(body["data"]["processed"], false);

    let (status, body) = harness.send(get("/api/files?type=EXCEL")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total"], 1);
    assert_eq!(body["data"]["data"][0]["originalName"], "people.xlsx");

    let tag = json_request(
        Method::POST,
        &format!("/api/files/{}/tags", file_id),
        &json!({ "tag": "hr" }),
    );
    let (status, body) = harness.send(tag).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["tags"], json!(["hr"]));

    let again = json_request(
        Method::POST,
        &format!("/api/files/{}/tags", file_id),
        &json!({ "tag": "hr" }),
    );
    let (status, body) = harness.send(again).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["errorCode"], "DUPLICATE_ENTRY");

    let (status, body) = harness
        .send(delete(&format!("/api/files/{}/tags/hr", file_id)))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["tags"], json!([]));

    // Writing the workbook records a processing log against the source.
    let write = json_request(
        Method::PUT,
        &format!("/api/excel/{}/write", file_id),
        &json!({ "data": { "name": "Data", "rows": [["name"], ["Grace"]] } }),
    );
    let (status, _) = harness.send(write).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = harness
        .send(get(&format!("/api/files/{}/logs", file_id)))
        .await;
    assert_eq!(status, StatusCode::OK);
    let logs = body["data"].as_array().unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0]["operation"], "EXCEL_WRITE");
    assert_eq!(logs[0]["status"], "COMPLETED");
}

#[tokio::test]
async fn test_logs_for_unknown_file_is_not_found() {
    let harness = TestHarness::new();
    let (status, body) = harness.send(get("/api/files/nope/logs")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["errorCode"], "NOT_FOUND");
}

#[tokio::test]
async fn test_invalid_listing_query() {
    let harness = TestHarness::new();
    let (status, body) = harness.send(get("/api/pdf/operations?status=bogus")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["message"], "Invalid status 'bogus'");
}
