//! # Captail
//!
//! Captail is a durable tailing consumer for MongoDB capped collections.
//! It feeds every document appended to a capped collection to your handler,
//! exactly in insertion order, using tailable await-data cursors: cursors
//! which block server-side at the end of the collection and return new
//! documents as they arrive.
//!
//! When a cursor is lost to a transient fault the engine rebuilds it and
//! resumes from the last successfully processed document. With persistent
//! tracking enabled the resume marker is also checkpointed to a small
//! `tracker` collection, so a restarted process does not replay documents it
//! already handled. Delivery is at-least-once: a handler that fails on a
//! document sees it again on the next cursor.
//!
//! ## Getting started
//!
//! Implement [DocumentHandler] for whatever consumes your documents, then
//! hand a configured engine its handler and run it:
//!
//! ``` no_run
//! use captail::{DocumentHandler, TailConfig, TailingEngine, TrackingConfig};
//! use mongodb::{bson::Document, Client};
//!
//! struct Printer;
//!
//! #[async_trait::async_trait]
//! impl DocumentHandler for Printer {
//!     async fn handle_document(
//!         &self,
//!         document: &Document,
//!     ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!         println!("{document}");
//!         Ok(())
//!     }
//! }
//!
//! # async fn inner() -> anyhow::Result<()> {
//! let client = Client::with_uri_str("mongodb://localhost:27017").await?;
//! let config = TailConfig::new(client)
//!     .with_database("eventsystemdb")
//!     .with_collection("events")
//!     .with_tracking(TrackingConfig::new("reporting-consumer"));
//!
//! let mut engine = TailingEngine::new(config)?;
//! engine.set_handler(Printer);
//! engine.start().await?;
//!
//! // Stop it later from anywhere.
//! let handle = engine.handle();
//! tokio::spawn(async move {
//!     tokio::time::sleep(std::time::Duration::from_secs(60)).await;
//!     handle.stop();
//! });
//!
//! // Runs until stopped or a fatal backend error.
//! engine.run().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## What it will not do
//!
//! The target collection must already exist and be capped; the engine
//! refuses to start otherwise. There is no worker fan-out (strict single
//! reader keeps the ordering guarantee) and no exactly-once delivery. If
//! the collection rolls over past the resume marker while the consumer is
//! down, the evicted range is silently skipped: size the cap to your
//! downtime budget.

mod config;
mod engine;
mod error;
mod handler;
mod tracker;

pub use config::{
    TailConfig, TrackingConfig, DEFAULT_COLLECTION_NAME,
    DEFAULT_CURSOR_REGENERATION_DELAY_MS, DEFAULT_DATABASE_NAME,
};
pub use engine::{EngineHandle, ServiceStatus, TailingEngine};
pub use error::Error;
pub use handler::{BoxError, DocumentHandler};
pub use tracker::{
    PersistentTracker, CONSUMER_ID_FIELD, LAST_TRACKED_ID_FIELD, TRACKER_COLLECTION_NAME,
};
