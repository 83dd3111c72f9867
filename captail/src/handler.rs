//! The seam between the engine and user code.

use mongodb::bson::Document;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Processes documents fetched from the capped collection.
///
/// Handlers are invoked one document at a time, in insertion order, from the
/// engine's single logical thread of control. A handler error is logged and
/// the loop continues, but the resume marker is *not* advanced past the
/// failed document: on the next cursor the same document is delivered again.
/// Handlers should therefore be idempotent.
#[async_trait::async_trait]
pub trait DocumentHandler: Send + Sync {
    async fn handle_document(&self, document: &Document) -> Result<(), BoxError>;
}

/// Blanket implementation so shared handlers can be passed around.
#[async_trait::async_trait]
impl<H: DocumentHandler + ?Sized> DocumentHandler for std::sync::Arc<H> {
    async fn handle_document(&self, document: &Document) -> Result<(), BoxError> {
        (**self).handle_document(document).await
    }
}
