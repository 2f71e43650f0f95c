//! Test harness for isolated API tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use axum::body::{Body, Bytes};
use axum::http::{HeaderMap, Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use docshift::config::{Config, Environment};
use docshift::{router, AppState, Database, FileStorage};

/// A fully wired application over a temporary storage root and an
/// in-memory database.
pub struct TestHarness {
    temp_dir: TempDir,
    pub state: AppState,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn production() -> Self {
        let mut config = Config::default();
        config.environment = Environment::Production;
        Self::with_config(config)
    }

    pub fn with_config(mut config: Config) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        config.storage.root = temp_dir.path().join("uploads");
        config.database.path = temp_dir.path().join("docshift.db");

        let db = Database::open_in_memory().expect("Failed to open database");
        let storage = FileStorage::new(&config.storage.root);
        Self {
            temp_dir,
            state: AppState::new(db, storage, config),
        }
    }

    pub fn storage_root(&self) -> &Path {
        self.state.storage.root()
    }

    /// Sends a request and parses the body as JSON.
    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let (status, _, bytes) = self.send_raw(request).await;
        let json = serde_json::from_slice(&bytes).unwrap_or_else(|e| {
            panic!(
                "Response is not JSON ({}): {}",
                e,
                String::from_utf8_lossy(&bytes)
            )
        });
        (status, json)
    }

    /// Sends a request and returns the raw response parts.
    pub async fn send_raw(&self, request: Request<Body>) -> (StatusCode, HeaderMap, Bytes) {
        let response = router(self.state.clone())
            .oneshot(request)
            .await
            .expect("Router failed");
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to read body")
            .to_bytes();
        (status, headers, bytes)
    }

    /// Every regular file below `<root>/<family>/<stage>`, recursively.
    pub fn files_in(&self, family: &str, stage: &str) -> Vec<PathBuf> {
        let mut found = Vec::new();
        collect_files(&self.storage_root().join(family).join(stage), &mut found);
        found.sort();
        found
    }

    /// Counts rows in a table.
    pub fn count_rows(&self, table: &str) -> i64 {
        self.state
            .db
            .with_conn(|conn| {
                Ok(conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |r| {
                    r.get(0)
                })?)
            })
            .expect("Count query failed")
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

fn collect_files(dir: &Path, found: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_files(&path, found);
        } else {
            found.push(path);
        }
    }
}
