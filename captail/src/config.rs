//! Configuration for a [TailingEngine](crate::TailingEngine).
//!
//! A configuration binds a [Client] to the capped collection holding the
//! documents to consume, and optionally enables persistent tracking so a
//! restarted consumer resumes where it left off rather than replaying the
//! whole resident window.

use std::time::Duration;

use mongodb::Client;

use crate::error::Error;

/// Database used when none is configured.
pub const DEFAULT_DATABASE_NAME: &str = "eventsystemdb";
/// Capped collection read when none is configured.
pub const DEFAULT_COLLECTION_NAME: &str = "events";
/// Delay applied between losing a cursor and building its replacement when
/// the configured value is the `0` sentinel.
pub const DEFAULT_CURSOR_REGENERATION_DELAY_MS: u64 = 1000;

/// Settings for the persistent tracking system. Presence of this value on a
/// [TailConfig] is what enables tracking.
#[derive(Debug, Clone)]
pub struct TrackingConfig {
    /// Identifies this consumer in the tracker collection. One engine per
    /// consumer id; must be non-empty.
    pub consumer_id: String,
    /// Milliseconds to wait before regenerating a lost cursor. `0` means
    /// "use the default" ([DEFAULT_CURSOR_REGENERATION_DELAY_MS]).
    pub cursor_regeneration_delay_ms: u64,
}

impl TrackingConfig {
    /// Tracking for `consumer_id` with the default cursor regeneration
    /// delay.
    pub fn new(consumer_id: impl Into<String>) -> Self {
        Self {
            consumer_id: consumer_id.into(),
            cursor_regeneration_delay_ms: 0,
        }
    }

    pub fn with_cursor_regeneration_delay_ms(mut self, millis: u64) -> Self {
        self.cursor_regeneration_delay_ms = millis;
        self
    }

    fn resolved_delay(&self) -> Duration {
        let millis = if self.cursor_regeneration_delay_ms == 0 {
            DEFAULT_CURSOR_REGENERATION_DELAY_MS
        } else {
            self.cursor_regeneration_delay_ms
        };
        Duration::from_millis(millis)
    }
}

/// Everything a [TailingEngine](crate::TailingEngine) needs to know.
#[derive(Clone)]
pub struct TailConfig {
    /// Handle to the deployment holding both the capped collection and, when
    /// tracking is enabled, the tracker collection.
    pub client: Client,
    /// Database name. `None` falls back to [DEFAULT_DATABASE_NAME].
    pub database: Option<String>,
    /// Capped collection name. `None` falls back to
    /// [DEFAULT_COLLECTION_NAME]. The engine refuses to start against a
    /// collection that is not capped.
    pub collection: Option<String>,
    /// Persistent tracking settings; `None` disables tracking.
    pub tracking: Option<TrackingConfig>,
}

impl TailConfig {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            database: None,
            collection: None,
            tracking: None,
        }
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = Some(collection.into());
        self
    }

    pub fn with_tracking(mut self, tracking: TrackingConfig) -> Self {
        self.tracking = Some(tracking);
        self
    }

    pub fn database_name(&self) -> &str {
        self.database.as_deref().unwrap_or(DEFAULT_DATABASE_NAME)
    }

    pub fn collection_name(&self) -> &str {
        self.collection.as_deref().unwrap_or(DEFAULT_COLLECTION_NAME)
    }

    pub fn is_tracking_enabled(&self) -> bool {
        self.tracking.is_some()
    }

    /// The delay between losing a cursor and building its replacement.
    /// [Duration::ZERO] (tracking disabled) means no delay at all.
    pub fn cursor_regeneration_delay(&self) -> Duration {
        self.tracking
            .as_ref()
            .map(TrackingConfig::resolved_delay)
            .unwrap_or(Duration::ZERO)
    }

    /// Checks the configuration is internally consistent. Pure; called once
    /// during engine construction.
    pub fn validate(&self) -> Result<(), Error> {
        if let Some(tracking) = &self.tracking {
            if tracking.consumer_id.trim().is_empty() {
                return Err(Error::InvalidConfiguration(
                    "persistent tracking requires a non-empty consumer id".into(),
                ));
            }
        }
        Ok(())
    }
}
