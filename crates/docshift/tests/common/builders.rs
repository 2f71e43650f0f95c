//! Fixture builders: PDFs, workbooks, DOCX files and multipart requests.

#![allow(dead_code)]

use std::io::{Cursor, Write};

use axum::body::Body;
use axum::http::{header, Method, Request};
use lopdf::{dictionary, Document, Object, Stream};
use serde_json::Value;

pub const BOUNDARY: &str = "----WebKitFormBoundary7MA4YWxkTrZu0gW";

pub const PDF_MIME: &str = "application/pdf";
pub const XLSX_MIME: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";
pub const DOCX_MIME: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

/// A PDF of `pages` A4 pages, each showing `(Page N)`.
pub fn pdf_bytes(pages: u32) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let mut kids: Vec<Object> = Vec::new();
    for n in 1..=pages {
        let content = format!("BT /F1 24 Tf 72 700 Td (Page {}) Tj ET", n);
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.into_bytes()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
        });
        kids.push(page_id.into());
    }

    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => pages as i64,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let info_id = doc.add_object(dictionary! {
        "Title" => Object::string_literal("Fixture"),
        "Author" => Object::string_literal("docshift tests"),
    });
    doc.trailer.set("Info", info_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).expect("Failed to save fixture PDF");
    bytes
}

/// The `N` of every `(Page N)` label, in page order.
pub fn page_labels(bytes: &[u8]) -> Vec<u32> {
    let doc = Document::load_mem(bytes).expect("Not a PDF");
    doc.get_pages()
        .values()
        .map(|&id| {
            let content = doc.get_page_content(id).expect("Missing page content");
            let content = String::from_utf8_lossy(&content).into_owned();
            let start = content.find("(Page ").expect("No page label") + "(Page ".len();
            let end = start + content[start..].find(')').expect("Unterminated label");
            content[start..end].parse().expect("Label is not a number")
        })
        .collect()
}

/// Page count of a PDF on disk.
pub fn pdf_page_count(path: &std::path::Path) -> usize {
    Document::load(path).expect("Not a PDF").get_pages().len()
}

/// An `.xlsx` workbook with one sheet holding `rows` (first row is the
/// header). Strings, numbers and booleans are typed accordingly.
pub fn xlsx_bytes(sheet: &str, rows: &[Vec<Value>]) -> Vec<u8> {
    let mut book = umya_spreadsheet::new_file();
    let worksheet = book.get_sheet_mut(&0).expect("Default sheet missing");
    worksheet.set_name(sheet);

    for (r, row) in rows.iter().enumerate() {
        for (c, value) in row.iter().enumerate() {
            let cell = worksheet.get_cell_mut(((c + 1) as u32, (r + 1) as u32));
            match value {
                Value::Number(n) => {
                    cell.set_value_number(n.as_f64().unwrap_or_default());
                }
                Value::Bool(b) => {
                    cell.set_value_bool(*b);
                }
                Value::String(s) => {
                    cell.set_value_string(s.clone());
                }
                Value::Null => {}
                other => {
                    cell.set_value_string(other.to_string());
                }
            }
        }
    }

    let mut cursor = Cursor::new(Vec::new());
    umya_spreadsheet::writer::xlsx::write_writer(&book, &mut cursor)
        .expect("Failed to write fixture workbook");
    cursor.into_inner()
}

/// A minimal DOCX with one paragraph per line of `text`.
pub fn docx_bytes(text: &str) -> Vec<u8> {
    let mut body = String::new();
    for line in text.lines() {
        body.push_str(&format!("<w:p><w:r><w:t>{}</w:t></w:r></w:p>", line));
    }

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut zip = zip::ZipWriter::new(&mut cursor);
        let options = zip::write::SimpleFileOptions::default();
        zip.start_file("word/document.xml", options)
            .expect("Failed to start zip entry");
        write!(
            zip,
            r#"<?xml version="1.0" encoding="UTF-8"?><w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>{}</w:body></w:document>"#,
            body
        )
        .expect("Failed to write document.xml");
        zip.finish().expect("Failed to finish zip");
    }
    cursor.into_inner()
}

/// Hand-assembled `multipart/form-data` body.
pub struct MultipartBuilder {
    body: Vec<u8>,
}

impl MultipartBuilder {
    pub fn new() -> Self {
        Self { body: Vec::new() }
    }

    pub fn file(mut self, field: &str, filename: &str, content_type: &str, bytes: &[u8]) -> Self {
        write!(self.body, "--{}\r\n", BOUNDARY).unwrap();
        write!(
            self.body,
            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
            field, filename
        )
        .unwrap();
        write!(self.body, "Content-Type: {}\r\n\r\n", content_type).unwrap();
        self.body.extend_from_slice(bytes);
        write!(self.body, "\r\n").unwrap();
        self
    }

    pub fn text(mut self, name: &str, value: &str) -> Self {
        write!(self.body, "--{}\r\n", BOUNDARY).unwrap();
        write!(
            self.body,
            "Content-Disposition: form-data; name=\"{}\"\r\n\r\n",
            name
        )
        .unwrap();
        write!(self.body, "{}\r\n", value).unwrap();
        self
    }

    pub fn build(mut self, uri: &str) -> Request<Body> {
        write!(self.body, "--{}--\r\n", BOUNDARY).unwrap();
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(self.body))
            .unwrap()
    }
}

impl Default for MultipartBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

pub fn delete(uri: &str) -> Request<Body> {
    Request::builder()
        .method(Method::DELETE)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

pub fn json_request(method: Method, uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::to_vec(body).unwrap()))
        .unwrap()
}
