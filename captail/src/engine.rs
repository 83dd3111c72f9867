//! The tailing engine: builds tailable-await cursors over the capped
//! collection, feeds every document to the handler in insertion order, and
//! recovers from cursor loss by rebuilding from the last checkpoint.

use std::{sync::Arc, time::Duration};

use futures::stream::TryStreamExt;
use mongodb::{
    bson::{doc, oid::ObjectId, Document},
    options::{CursorType, ReadPreference, SelectionCriteria},
    Collection, Cursor, Database,
};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::{
    config::{TailConfig, TrackingConfig},
    error::{classify, Error, Fault},
    handler::DocumentHandler,
    tracker::PersistentTracker,
};

/// Server-side await window for an idle tailable cursor. When it expires
/// without data the driver yields `None`, which is the engine's end-of-burst
/// checkpoint hook.
const CURSOR_AWAIT_TIME: Duration = Duration::from_secs(1);

/// Lifecycle state of a [TailingEngine].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceStatus {
    Stopped,
    Started,
}

/// Why a cursor stopped being iterated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CursorExit {
    /// The cursor is gone; the outer loop rebuilds it after the
    /// regeneration delay.
    Lost,
    /// `stop()` was observed; the run loop returns cleanly.
    Stopped,
}

/// A cloneable remote control for an engine whose `run()` future is owned by
/// another task.
#[derive(Clone)]
pub struct EngineHandle {
    status: Arc<watch::Sender<ServiceStatus>>,
}

impl EngineHandle {
    /// Request a cooperative stop. Observed by the run loop at its next
    /// check point; an in-flight cursor await is not interrupted.
    pub fn stop(&self) {
        self.status.send_replace(ServiceStatus::Stopped);
    }

    pub fn status(&self) -> ServiceStatus {
        *self.status.borrow()
    }
}

/// Consumes documents from a capped collection through tailable-await
/// cursors.
///
/// The engine owns a single logical thread of control: [run](Self::run)
/// iterates one cursor at a time, invokes the handler serially, and
/// checkpoints the resume marker at end-of-burst, on cursor loss and on
/// shutdown. Delivery is at-least-once in strict insertion order.
pub struct TailingEngine {
    database: Database,
    /// The capped collection being tailed.
    collection: Collection<Document>,
    tracking: Option<TrackingConfig>,
    cursor_regeneration_delay: Duration,
    handler: Option<Arc<dyn DocumentHandler>>,
    /// Present once started with tracking enabled.
    tracker: Option<PersistentTracker>,
    /// Resume anchor for the next cursor; refreshed on every checkpoint.
    /// Only ever moves forward.
    last_tracked_id: Option<ObjectId>,
    status: Arc<watch::Sender<ServiceStatus>>,
}

impl TailingEngine {
    /// Validates `config` and builds a stopped engine.
    pub fn new(config: TailConfig) -> Result<Self, Error> {
        config.validate()?;
        let database = config.client.database(config.database_name());
        let collection = database.collection(config.collection_name());
        let (status, _) = watch::channel(ServiceStatus::Stopped);
        Ok(Self {
            database,
            collection,
            cursor_regeneration_delay: config.cursor_regeneration_delay(),
            tracking: config.tracking,
            handler: None,
            tracker: None,
            last_tracked_id: None,
            status: Arc::new(status),
        })
    }

    /// Installs the document handler. Required before [start](Self::start).
    pub fn set_handler(&mut self, handler: impl DocumentHandler + 'static) {
        self.handler = Some(Arc::new(handler));
    }

    pub fn status(&self) -> ServiceStatus {
        *self.status.borrow()
    }

    /// A remote control usable from other tasks.
    pub fn handle(&self) -> EngineHandle {
        EngineHandle {
            status: Arc::clone(&self.status),
        }
    }

    /// Request a cooperative stop; see [EngineHandle::stop].
    pub fn stop(&self) {
        info!("stop requested");
        self.status.send_replace(ServiceStatus::Stopped);
    }

    /// Transitions the engine to `Started`. Loads the resume marker when
    /// tracking is enabled and verifies the target collection is capped.
    /// A no-op when already started.
    pub async fn start(&mut self) -> Result<(), Error> {
        if self.status() == ServiceStatus::Started {
            return Ok(());
        }
        if self.handler.is_none() {
            return Err(Error::HandlerRequired);
        }
        if let Some(tracking) = &self.tracking {
            let tracker = PersistentTracker::new(&self.database, &tracking.consumer_id).await?;
            self.last_tracked_id = tracker.fetch_last().await?;
            debug!(
                consumer_id = %tracking.consumer_id,
                resume_after = ?self.last_tracked_id,
                "persistent tracking enabled"
            );
            self.tracker = Some(tracker);
        }
        self.verify_capped().await?;
        self.status.send_replace(ServiceStatus::Started);
        info!(collection = %self.collection.name(), "tailing engine started");
        Ok(())
    }

    /// Runs the tailing loop on the caller's task until a clean shutdown
    /// (`Ok`) or a fatal backend error (`Err`). Either way the engine ends
    /// `Stopped` and can be started again.
    pub async fn run(&mut self) -> Result<(), Error> {
        if self.status() != ServiceStatus::Started {
            return Err(Error::ExecutionError(
                "trying to run a non-started engine; call start() first",
            ));
        }
        let handler = self.handler.clone().ok_or(Error::HandlerRequired)?;
        let result = self.tail(handler).await;
        self.status.send_replace(ServiceStatus::Stopped);
        match &result {
            Ok(()) => info!("tailing engine stopped"),
            Err(err) => error!(error = %err, "tailing engine failed"),
        }
        result
    }

    /// The outer loop: build a cursor, iterate it until it is lost or the
    /// engine is stopped, then either rebuild (after the regeneration
    /// delay) or return.
    async fn tail(&mut self, handler: Arc<dyn DocumentHandler>) -> Result<(), Error> {
        let mut status_rx = self.status.subscribe();
        loop {
            let mut cursor = match self.build_cursor().await {
                Ok(cursor) => cursor,
                Err(err) => match classify(&err) {
                    Fault::CursorLost => {
                        info!(error = %err, "failed to build cursor; retrying");
                        self.apply_regeneration_delay(&mut status_rx).await;
                        if self.status() == ServiceStatus::Stopped {
                            return Ok(());
                        }
                        continue;
                    }
                    Fault::ServerUnreachable => return Err(Error::BackendFatal(err)),
                    Fault::Other => return Err(err.into()),
                },
            };
            match self.iterate_cursor(&mut cursor, handler.as_ref()).await? {
                CursorExit::Stopped => return Ok(()),
                CursorExit::Lost => {
                    self.apply_regeneration_delay(&mut status_rx).await;
                    if self.status() == ServiceStatus::Stopped {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// The inner loop: drain one cursor. Returns how the cursor ended;
    /// fatal faults surface as `Err`. Every exit path checkpoints the last
    /// successfully handled document and releases the cursor.
    async fn iterate_cursor(
        &mut self,
        cursor: &mut Cursor<Document>,
        handler: &dyn DocumentHandler,
    ) -> Result<CursorExit, Error> {
        // Id of the last document this cursor delivered to a successful
        // handler call.
        let mut last_processed_id: Option<ObjectId> = None;
        // Set once a handler call fails. The marker must never move past an
        // unprocessed document, so later successes stop advancing it until
        // the failed document is redelivered on a fresh cursor.
        let mut handler_failed = false;

        let exit = loop {
            if !cursor.has_next() {
                info!("cursor closed by the server");
                break Ok(CursorExit::Lost);
            }
            match cursor.try_next().await {
                Ok(Some(document)) => match handler.handle_document(&document).await {
                    Ok(()) if handler_failed => {}
                    Ok(()) => match document.get_object_id("_id") {
                        Ok(id) => last_processed_id = Some(id),
                        Err(err) => warn!(
                            error = %err,
                            "processed document has no object id; resume marker not advanced"
                        ),
                    },
                    Err(err) => {
                        // At-least-once: the marker stays put, so this
                        // document is redelivered by the next cursor.
                        error!(error = %err, "document handler failed");
                        handler_failed = true;
                    }
                },
                Ok(None) => {
                    // End of burst: the consumer is caught up, the cheap
                    // moment to persist the resume marker.
                    debug!("await window expired with no data");
                    if let Err(err) = self.checkpoint(last_processed_id).await {
                        warn!(error = %err, "checkpoint failed; regenerating cursor");
                        break Ok(CursorExit::Lost);
                    }
                }
                Err(err) => match classify(&err) {
                    Fault::CursorLost => {
                        info!(error = %err, "cursor lost");
                        break Ok(CursorExit::Lost);
                    }
                    Fault::ServerUnreachable => {
                        error!(error = %err, "network problems detected");
                        break Err(Error::BackendFatal(err));
                    }
                    Fault::Other => break Err(err.into()),
                },
            }
            // Handler calls are atomic; stop is observed between documents.
            if self.status() == ServiceStatus::Stopped {
                break Ok(CursorExit::Stopped);
            }
        };

        // Runs on every exit path, so a lost cursor costs at most the
        // documents delivered since the previous end-of-burst checkpoint.
        if let Err(err) = self.checkpoint(last_processed_id).await {
            warn!(error = %err, "failed to persist resume marker during cursor teardown");
        }
        exit
    }

    /// Persist `last_processed_id` and move the in-memory resume anchor up
    /// to it. A no-op without tracking or before the first success.
    async fn checkpoint(&mut self, last_processed_id: Option<ObjectId>) -> Result<(), Error> {
        let (Some(tracker), Some(id)) = (self.tracker.as_ref(), last_processed_id) else {
            return Ok(());
        };
        tracker.persist(id).await?;
        self.last_tracked_id = Some(id);
        Ok(())
    }

    /// A tailable-await cursor in natural order, resuming after
    /// `last_tracked_id` when set.
    async fn build_cursor(&self) -> Result<Cursor<Document>, mongodb::error::Error> {
        debug!(resume_after = ?self.last_tracked_id, "building tailable cursor");
        self.collection
            .find(resume_filter(self.last_tracked_id))
            .sort(doc! { "$natural": 1 })
            .cursor_type(CursorType::TailableAwait)
            .max_await_time(CURSOR_AWAIT_TIME)
            .await
    }

    /// Refuse to tail anything that is not capped: a tailable cursor over a
    /// plain collection would simply close at end of data.
    async fn verify_capped(&self) -> Result<(), Error> {
        let stats = self
            .database
            .run_command(doc! { "collStats": self.collection.name() })
            .selection_criteria(SelectionCriteria::ReadPreference(ReadPreference::Primary))
            .await?;
        if stats.get_bool("capped").unwrap_or(false) {
            debug!(collection = %self.collection.name(), "collection is capped");
            Ok(())
        } else {
            Err(Error::CappedCollectionRequired(
                self.collection.name().to_string(),
            ))
        }
    }

    /// Interruptible pause before regenerating a lost cursor. A stop
    /// request cuts the sleep short; the caller re-checks status.
    async fn apply_regeneration_delay(&self, status_rx: &mut watch::Receiver<ServiceStatus>) {
        if self.cursor_regeneration_delay.is_zero() {
            return;
        }
        tokio::select! {
            _ = tokio::time::sleep(self.cursor_regeneration_delay) => {}
            _ = status_rx.changed() => {}
        }
    }
}

/// Filter for the next cursor: everything after the resume anchor, or the
/// whole resident window when there is none.
fn resume_filter(last_tracked_id: Option<ObjectId>) -> Document {
    match last_tracked_id {
        Some(id) => doc! { "_id": { "$gt": id } },
        None => Document::new(),
    }
}
