//! PDF routes end to end: multipart in, stored PDFs and history rows out.

mod common;

use axum::http::StatusCode;
use lopdf::Document;
use serde_json::Value;

use common::*;

fn pdf_upload(uri: &str, pages: u32, fields: &[(&str, &str)]) -> axum::http::Request<axum::body::Body> {
    let mut builder = MultipartBuilder::new().file("file", "report.pdf", PDF_MIME, &pdf_bytes(pages));
    for (name, value) in fields {
        builder = builder.text(name, value);
    }
    builder.build(uri)
}

async fn download(harness: &TestHarness, data: &Value) -> Vec<u8> {
    let url = data["downloadUrl"].as_str().expect("No download URL");
    let (status, headers, bytes) = harness.send_raw(get(url)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers["content-type"], PDF_MIME);
    bytes.to_vec()
}

#[tokio::test]
async fn test_merge_keeps_input_order() {
    let harness = TestHarness::new();
    let request = MultipartBuilder::new()
        .file("files", "a.pdf", PDF_MIME, &pdf_bytes(2))
        .file("files", "b.pdf", PDF_MIME, &pdf_bytes(3))
        .build("/api/pdf/merge");

    let (status, body) = harness.send(request).await;

    assert_eq!(status, StatusCode::CREATED);
    let data = &body["data"];
    assert_eq!(data["pageCount"], 5);
    assert_eq!(data["file"]["originalName"], "merged.pdf");

    let merged = download(&harness, data).await;
    assert_eq!(page_labels(&merged), vec![1, 2, 1, 2, 3]);

    // Staged inputs are gone; only the merged output remains.
    assert!(harness.files_in("pdf", "temp").is_empty());
    assert_eq!(harness.files_in("pdf", "merged").len(), 1);

    let (_, record) = harness
        .send(get(&format!("/api/pdf/{}", data["operationId"].as_str().unwrap())))
        .await;
    assert_eq!(record["data"]["type"], "MERGE");
    assert_eq!(record["data"]["status"], "COMPLETED");
    assert_eq!(record["data"]["options"]["fileCount"], 2);
    assert!(record["data"]["completedAt"].is_string());
}

#[tokio::test]
async fn test_merge_needs_two_files() {
    let harness = TestHarness::new();
    let request = MultipartBuilder::new()
        .file("files", "a.pdf", PDF_MIME, &pdf_bytes(1))
        .build("/api/pdf/merge");

    let (status, _) = harness.send(request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (_, list) = harness.send(get("/api/pdf/operations?status=FAILED")).await;
    assert_eq!(list["data"]["total"], 1);
    assert!(harness.files_in("pdf", "temp").is_empty());
    assert!(harness.files_in("pdf", "merged").is_empty());
}

#[tokio::test]
async fn test_merge_rejects_extra_files() {
    let mut config = docshift::Config::default();
    config.limits.merge_max_files = 2;
    let harness = TestHarness::with_config(config);
    let pdf = pdf_bytes(1);
    let request = MultipartBuilder::new()
        .file("files", "a.pdf", PDF_MIME, &pdf)
        .file("files", "b.pdf", PDF_MIME, &pdf)
        .file("files", "c.pdf", PDF_MIME, &pdf)
        .build("/api/pdf/merge");

    let (status, body) = harness.send(request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["errorCode"], "TOO_MANY_FILES");
    assert_eq!(body["error"]["details"]["maxFiles"], 2);
    assert!(harness.files_in("pdf", "temp").is_empty());
}

#[tokio::test]
async fn test_oversized_merge_input_discards_staged_files() {
    let small = pdf_bytes(1);
    let large = pdf_bytes(40);
    let mut config = docshift::Config::default();
    config.limits.pdf_max_bytes = small.len() as u64 + 16;
    let harness = TestHarness::with_config(config);

    let request = MultipartBuilder::new()
        .file("files", "a.pdf", PDF_MIME, &small)
        .file("files", "b.pdf", PDF_MIME, &large)
        .build("/api/pdf/merge");
    let (status, body) = harness.send(request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["errorCode"], "FILE_TOO_LARGE");
    assert_eq!(body["error"]["details"]["maxBytes"], small.len() as u64 + 16);
    assert!(harness.files_in("pdf", "temp").is_empty());
    assert_eq!(harness.count_rows("files"), 0);
    assert_eq!(harness.count_rows("pdf_operations"), 0);
}

#[tokio::test]
async fn test_split_by_range() {
    let harness = TestHarness::new();
    let (status, body) = harness
        .send(pdf_upload("/api/pdf/split/range", 6, &[("ranges", "1-2,5")]))
        .await;

    assert_eq!(status, StatusCode::CREATED);
    let data = &body["data"];
    assert_eq!(data["partCount"], 2);
    let parts = data["parts"].as_array().unwrap();
    assert_eq!(parts[0]["startPage"], 1);
    assert_eq!(parts[0]["endPage"], 2);
    assert_eq!(parts[1]["pageCount"], 1);

    let second = download(&harness, &parts[1]).await;
    assert_eq!(page_labels(&second), vec![5]);
    assert_eq!(harness.files_in("pdf", "split").len(), 2);
}

#[tokio::test]
async fn test_split_fixed_and_pages() {
    let harness = TestHarness::new();
    let (status, body) = harness
        .send(pdf_upload("/api/pdf/split/fixed", 5, &[("pagesPerFile", "2")]))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["partCount"], 3);
    assert_eq!(body["data"]["parts"][2]["pageCount"], 1);

    let (status, body) = harness.send(pdf_upload("/api/pdf/split/pages", 3, &[])).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["partCount"], 3);
    let names: Vec<&str> = body["data"]["parts"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["file"]["originalName"].as_str().unwrap())
        .collect();
    assert_eq!(
        names,
        vec!["report_page_001.pdf", "report_page_002.pdf", "report_page_003.pdf"]
    );
}

#[tokio::test]
async fn test_bad_range_records_failed_operation() {
    let harness = TestHarness::new();
    let (status, body) = harness
        .send(pdf_upload("/api/pdf/split/range", 3, &[("ranges", "2-x")]))
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["message"], "Invalid page range '2-x'");

    let (_, list) = harness.send(get("/api/pdf/operations")).await;
    let record = &list["data"]["data"][0];
    assert_eq!(record["type"], "SPLIT_RANGE");
    assert_eq!(record["status"], "FAILED");
    assert_eq!(record["errorMessage"], "Invalid page range '2-x'");
    assert!(record["sourceFileId"].is_string());
    assert!(record["outputFileId"].is_null());
}

#[tokio::test]
async fn test_range_past_last_page_fails() {
    let harness = TestHarness::new();
    let (status, body) = harness
        .send(pdf_upload("/api/pdf/split/range", 3, &[("ranges", "1-1,2-9")]))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body["error"]["message"],
        "Invalid range 2-9: end page exceeds total pages (3)"
    );
    // Ranges are checked before the first part is written.
    assert!(harness.files_in("pdf", "split").is_empty());
}

#[tokio::test]
async fn test_extract_follows_requested_order() {
    let harness = TestHarness::new();
    let (status, body) = harness
        .send(pdf_upload("/api/pdf/extract", 4, &[("pages", "3,1,2")]))
        .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["file"]["originalName"], "report_extracted.pdf");
    let extracted = download(&harness, &body["data"]).await;
    assert_eq!(page_labels(&extracted), vec![3, 1, 2]);
}

#[tokio::test]
async fn test_compress_reports_sizes() {
    let harness = TestHarness::new();
    let (status, body) = harness
        .send(pdf_upload("/api/pdf/compress", 3, &[("level", "low")]))
        .await;

    assert_eq!(status, StatusCode::CREATED);
    let data = &body["data"];
    assert_eq!(data["level"], "low");
    assert!(data["originalSize"].as_u64().unwrap() > 0);
    assert!(data["percentage"].as_str().unwrap().ends_with('%'));
    assert_eq!(harness.files_in("pdf", "compressed").len(), 1);

    let (status, body) = harness
        .send(pdf_upload("/api/pdf/compress", 1, &[("level", "max")]))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .starts_with("Invalid compression level 'max'"));
    assert_eq!(harness.files_in("pdf", "compressed").len(), 1);
}

#[tokio::test]
async fn test_watermark_requires_text() {
    let harness = TestHarness::new();
    let (status, body) = harness
        .send(pdf_upload(
            "/api/pdf/watermark",
            2,
            &[("text", "DRAFT"), ("position", "diagonal"), ("opacity", "0.4")],
        ))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["pageCount"], 2);
    let stamped = download(&harness, &body["data"]).await;
    assert_eq!(page_labels(&stamped), vec![1, 2]);

    let (status, body) = harness.send(pdf_upload("/api/pdf/watermark", 1, &[])).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["message"], "Watermark text is required");
}

#[tokio::test]
async fn test_watermark_with_custom_options() {
    let harness = TestHarness::new();
    let (status, body) = harness
        .send(pdf_upload(
            "/api/pdf/watermark",
            3,
            &[
                ("text", "INTERNAL"),
                ("opacity", "0.25"),
                ("fontSize", "36"),
                ("rotation", "30"),
                ("position", "diagonal"),
                ("color", "0.2,0.2,0.8"),
            ],
        ))
        .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["file"]["originalName"], "report_watermarked.pdf");
    assert_eq!(body["data"]["pageCount"], 3);
    let stamped = download(&harness, &body["data"]).await;
    assert_eq!(page_labels(&stamped), vec![1, 2, 3]);

    let doc = Document::load_mem(&stamped).unwrap();
    for (_, page_id) in doc.get_pages() {
        let content = String::from_utf8_lossy(&doc.get_page_content(page_id).unwrap()).into_owned();
        assert!(content.contains("/FWm 36.0 Tf"), "{}", content);
        assert!(content.contains("0.8660 0.5000 -0.5000 0.8660"), "{}", content);
        assert!(content.contains("0.200 0.200 0.800 rg"), "{}", content);
        assert!(content.contains("(INTERNAL) Tj"));

        let page = doc.get_dictionary(page_id).unwrap();
        let resources = page.get(b"Resources").unwrap().as_dict().unwrap();
        let states = resources.get(b"ExtGState").unwrap().as_dict().unwrap();
        let state_id = states.get(b"GSWm").unwrap().as_reference().unwrap();
        let state = doc.get_dictionary(state_id).unwrap();
        assert_eq!(state.get(b"ca").unwrap().as_float().unwrap(), 0.25);
    }
    assert_eq!(harness.files_in("pdf", "watermarked").len(), 1);

    let (_, record) = harness
        .send(get(&format!("/api/pdf/{}", body["data"]["operationId"].as_str().unwrap())))
        .await;
    assert_eq!(record["data"]["type"], "WATERMARK");
    assert_eq!(record["data"]["status"], "COMPLETED");

    let (status, body) = harness
        .send(pdf_upload(
            "/api/pdf/watermark",
            1,
            &[("text", "INTERNAL"), ("rotation", "sideways")],
        ))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["errorCode"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_doc_to_pdf_reflows_pdf_text() {
    let harness = TestHarness::new();
    let (status, body) = harness.send(pdf_upload("/api/pdf/doc-to-pdf", 3, &[])).await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["file"]["originalName"], "report.pdf");
    assert_eq!(body["data"]["pageCount"], 1);
    assert_eq!(harness.files_in("pdf", "converted").len(), 1);

    let (_, list) = harness.send(get("/api/pdf/operations")).await;
    assert_eq!(list["data"]["data"][0]["type"], "DOC_TO_PDF");
    assert_eq!(list["data"]["data"][0]["status"], "COMPLETED");
}

#[tokio::test]
async fn test_doc_to_pdf_from_docx() {
    let harness = TestHarness::new();
    let request = MultipartBuilder::new()
        .file("file", "notes.docx", DOCX_MIME, &docx_bytes("First line\nSecond line"))
        .build("/api/pdf/doc-to-pdf");

    let (status, body) = harness.send(request).await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["file"]["originalName"], "notes.pdf");
    assert!(body["data"]["pageCount"].as_u64().unwrap() >= 1);
    assert_eq!(harness.files_in("pdf", "converted").len(), 1);
}

#[tokio::test]
async fn test_info_is_untracked() {
    let harness = TestHarness::new();
    let (status, body) = harness.send(pdf_upload("/api/pdf/info", 4, &[])).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["fileName"], "report.pdf");
    assert_eq!(body["data"]["pageCount"], 4);
    assert!(harness.files_in("pdf", "temp").is_empty());
    assert_eq!(harness.count_rows("pdf_operations"), 0);
    assert_eq!(harness.count_rows("files"), 0);
}

#[tokio::test]
async fn test_to_images_is_unavailable() {
    let harness = TestHarness::new();
    let (status, body) = harness.send(pdf_upload("/api/pdf/to-images", 1, &[])).await;

    assert_eq!(status, StatusCode::NOT_IMPLEMENTED);
    assert_eq!(body["error"]["errorCode"], "FEATURE_UNAVAILABLE");

    let (_, list) = harness.send(get("/api/pdf/operations")).await;
    assert_eq!(list["data"]["data"][0]["type"], "PDF_TO_IMAGES");
    assert_eq!(list["data"]["data"][0]["status"], "FAILED");
}

#[tokio::test]
async fn test_delete_operation_removes_files() {
    let harness = TestHarness::new();
    let (_, body) = harness
        .send(pdf_upload("/api/pdf/split/fixed", 4, &[("pagesPerFile", "2")]))
        .await;
    let operation_id = body["data"]["operationId"].as_str().unwrap().to_string();
    assert_eq!(harness.files_in("pdf", "split").len(), 2);
    assert_eq!(harness.count_rows("files"), 3);

    let (status, body) = harness
        .send(delete(&format!("/api/pdf/{}", operation_id)))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["filesRemoved"], 3);
    assert!(harness.files_in("pdf", "split").is_empty());
    assert!(harness.files_in("pdf", "temp").is_empty());
    assert_eq!(harness.count_rows("files"), 0);

    let (status, _) = harness
        .send(get(&format!("/api/pdf/{}", operation_id)))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_operation_lookup_is_scoped_to_family() {
    let harness = TestHarness::new();
    let (status, body) = harness
        .send(json_request(
            axum::http::Method::POST,
            "/api/converter/json-to-excel",
            &serde_json::json!({ "jsonData": [{ "a": 1 }] }),
        ))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let conversion_id = body["data"]["operationId"].as_str().unwrap().to_string();

    let (status, _) = harness
        .send(get(&format!("/api/pdf/{}", conversion_id)))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = harness
        .send(get(&format!("/api/converter/{}", conversion_id)))
        .await;
    assert_eq!(status, StatusCode::OK);
}
