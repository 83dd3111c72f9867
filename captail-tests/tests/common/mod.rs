//! Shared plumbing for the live-server tests. Every test runs in its own
//! throwaway database against the deployment named by `MONGODB_URI`
//! (default `mongodb://localhost:27017`).
#![allow(dead_code)]

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use anyhow::Result;
use captail::{BoxError, DocumentHandler, PersistentTracker};
use mongodb::{
    bson::{doc, oid::ObjectId, Document},
    Client, Collection, Database,
};

pub const CAP_SIZE_BYTES: u64 = 1 << 20;

pub async fn client() -> Result<Client> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let uri = std::env::var("MONGODB_URI")
        .unwrap_or_else(|_| "mongodb://localhost:27017".to_string());
    Ok(Client::with_uri_str(uri).await?)
}

/// A database with a unique name, so tests cannot observe each other.
pub fn unique_database(client: &Client, prefix: &str) -> Database {
    client.database(&format!("{prefix}-{}", ObjectId::new()))
}

pub async fn create_capped_collection(
    database: &Database,
    name: &str,
) -> Result<Collection<Document>> {
    database
        .create_collection(name)
        .capped(true)
        .size(CAP_SIZE_BYTES)
        .await?;
    Ok(database.collection(name))
}

/// Insert documents `{ n: <value> }` and return their ids in insertion
/// order.
pub async fn insert_numbered(
    collection: &Collection<Document>,
    values: impl IntoIterator<Item = i64>,
) -> Result<Vec<ObjectId>> {
    let documents: Vec<Document> = values.into_iter().map(|n| doc! { "n": n }).collect();
    let inserted = collection.insert_many(documents.clone()).await?;
    let mut ids = Vec::with_capacity(documents.len());
    for index in 0..documents.len() {
        ids.push(inserted.inserted_ids[&index].as_object_id().unwrap());
    }
    Ok(ids)
}

/// Records the `n` field of every document it sees; optionally fails each
/// delivery of one value.
#[derive(Clone, Default)]
pub struct RecordingHandler {
    seen: Arc<Mutex<Vec<i64>>>,
    fail_on: Option<i64>,
}

impl RecordingHandler {
    pub fn failing_on(value: i64) -> Self {
        Self {
            seen: Arc::default(),
            fail_on: Some(value),
        }
    }

    pub fn seen(&self) -> Vec<i64> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl DocumentHandler for RecordingHandler {
    async fn handle_document(&self, document: &Document) -> Result<(), BoxError> {
        let n = document.get_i64("n")?;
        self.seen.lock().unwrap().push(n);
        if self.fail_on == Some(n) {
            return Err(format!("refusing to process {n}").into());
        }
        Ok(())
    }
}

/// Poll until `predicate` holds or `deadline` elapses.
pub async fn wait_until(deadline: Duration, mut predicate: impl FnMut() -> bool) -> bool {
    let start = tokio::time::Instant::now();
    while start.elapsed() < deadline {
        if predicate() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    predicate()
}

/// Poll the tracker until its marker equals `expected` or `deadline`
/// elapses.
pub async fn wait_for_marker(
    tracker: &PersistentTracker,
    expected: mongodb::bson::oid::ObjectId,
    deadline: Duration,
) -> Result<bool> {
    let start = tokio::time::Instant::now();
    loop {
        if tracker.fetch_last().await? == Some(expected) {
            return Ok(true);
        }
        if start.elapsed() >= deadline {
            return Ok(false);
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
