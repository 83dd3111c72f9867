//! Persistent tracking of the last processed document per consumer.
//!
//! The tracker collection holds one record per consumer id, shaped
//! `{ _id, "consumer-task-id", "last-tracked-id" }`, and carries a unique
//! index on the consumer id. The index is created at construction when
//! missing, so no administrative pre-step is needed.

use futures::stream::TryStreamExt;
use mongodb::{
    bson::{doc, oid::ObjectId},
    error::ErrorKind,
    options::IndexOptions,
    Collection, Database, IndexModel,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::Error;

/// Collection holding every consumer's resume marker.
pub const TRACKER_COLLECTION_NAME: &str = "tracker";
/// Field identifying the consumer a record belongs to.
pub const CONSUMER_ID_FIELD: &str = "consumer-task-id";
/// Field holding the id of the last document the consumer processed.
pub const LAST_TRACKED_ID_FIELD: &str = "last-tracked-id";

/// NamespaceNotFound: listing indexes of a collection that does not exist
/// yet.
const NAMESPACE_NOT_FOUND: i32 = 26;

/// One resume marker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct TrackerRecord {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    #[serde(rename = "consumer-task-id")]
    pub consumer_id: String,
    #[serde(rename = "last-tracked-id")]
    pub last_tracked_id: ObjectId,
}

/// Reads and writes the resume marker for a single consumer id.
///
/// Writes are never coordinated here; the engine's single-writer discipline
/// is what keeps markers monotonic.
pub struct PersistentTracker {
    consumer_id: String,
    collection: Collection<TrackerRecord>,
}

impl PersistentTracker {
    /// Binds a tracker to `consumer_id`, creating the unique index on
    /// [CONSUMER_ID_FIELD] if the collection does not already have one.
    pub async fn new(database: &Database, consumer_id: impl Into<String>) -> Result<Self, Error> {
        let tracker = Self {
            consumer_id: consumer_id.into(),
            collection: database.collection(TRACKER_COLLECTION_NAME),
        };
        tracker.ensure_consumer_id_index().await?;
        Ok(tracker)
    }

    /// The last tracked document id for this consumer, or `None` when the
    /// consumer has never checkpointed.
    pub async fn fetch_last(&self) -> Result<Option<ObjectId>, Error> {
        let record = self
            .collection
            .find_one(doc! { CONSUMER_ID_FIELD: &self.consumer_id })
            .await?;
        Ok(record.map(|record| record.last_tracked_id))
    }

    /// Upserts this consumer's record to point at `last_processed_id`.
    /// Backend write failures propagate to the caller.
    pub async fn persist(&self, last_processed_id: ObjectId) -> Result<(), Error> {
        self.collection
            .update_one(
                doc! { CONSUMER_ID_FIELD: &self.consumer_id },
                doc! { "$set": { LAST_TRACKED_ID_FIELD: last_processed_id } },
            )
            .upsert(true)
            .await?;
        debug!(consumer_id = %self.consumer_id, %last_processed_id, "resume marker persisted");
        Ok(())
    }

    /// Self-heal: make sure some index covers [CONSUMER_ID_FIELD], building
    /// a unique one when none does.
    async fn ensure_consumer_id_index(&self) -> Result<(), Error> {
        if self.consumer_id_index_exists().await? {
            return Ok(());
        }
        let index = IndexModel::builder()
            .keys(doc! { CONSUMER_ID_FIELD: 1 })
            .options(IndexOptions::builder().unique(true).build())
            .build();
        self.collection.create_index(index).await?;
        info!(
            collection = TRACKER_COLLECTION_NAME,
            field = CONSUMER_ID_FIELD,
            "created unique tracker index"
        );
        Ok(())
    }

    async fn consumer_id_index_exists(&self) -> Result<bool, Error> {
        let mut indexes = match self.collection.list_indexes().await {
            Ok(indexes) => indexes,
            // A collection that does not exist yet has no indexes.
            Err(error) => match error.kind.as_ref() {
                ErrorKind::Command(command) if command.code == NAMESPACE_NOT_FOUND => {
                    return Ok(false)
                }
                _ => return Err(error.into()),
            },
        };
        while let Some(index) = indexes.try_next().await? {
            if index.keys.contains_key(CONSUMER_ID_FIELD) {
                return Ok(true);
            }
        }
        Ok(false)
    }
}
