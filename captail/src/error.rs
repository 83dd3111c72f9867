//! Crate error type and backend fault classification.

use mongodb::error::ErrorKind;
use thiserror::Error;

/// Everything that can go wrong constructing, starting or running a
/// [TailingEngine](crate::TailingEngine).
#[derive(Debug, Error)]
pub enum Error {
    /// The configuration failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// `start()` was called before a document handler was installed.
    #[error("a document handler is required in order to consume documents")]
    HandlerRequired,

    /// Tailable cursors only work against capped collections.
    #[error("collection {0} is not capped; tailable cursors require a capped collection")]
    CappedCollectionRequired(String),

    /// A lifecycle method was called from the wrong state.
    #[error("execution error: {0}")]
    ExecutionError(&'static str),

    /// The server became unreachable while tailing. The engine gives up
    /// rather than rebuilding the cursor; the embedder decides whether to
    /// start over.
    #[error("server unreachable while tailing")]
    BackendFatal(#[source] mongodb::error::Error),

    /// Any other driver fault that is not part of the recovery protocol.
    #[error(transparent)]
    Backend(#[from] mongodb::error::Error),
}

/// How the tailing loop reacts to a driver error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Fault {
    /// The cursor is gone but the server is fine: rebuild after the
    /// regeneration delay.
    CursorLost,
    /// The server cannot be reached: stop tailing, surface to the caller.
    ServerUnreachable,
    /// Unclassified: surface to the caller untouched.
    Other,
}

/// Cursor no longer known to the server.
const CURSOR_NOT_FOUND: i32 = 43;
/// Capped collection overwrote the cursor position.
const CAPPED_POSITION_LOST: i32 = 136;
/// Cursor killed by another actor.
const CURSOR_KILLED: i32 = 237;

/// Sorts a driver error into the small set of reactions the loop knows.
/// Pure over the error kind.
pub(crate) fn classify(error: &mongodb::error::Error) -> Fault {
    match error.kind.as_ref() {
        ErrorKind::Command(command)
            if matches!(
                command.code,
                CURSOR_NOT_FOUND | CAPPED_POSITION_LOST | CURSOR_KILLED
            ) =>
        {
            Fault::CursorLost
        }
        ErrorKind::Io(_) | ErrorKind::DnsResolve { .. } | ErrorKind::ServerSelection { .. } => {
            Fault::ServerUnreachable
        }
        _ => Fault::Other,
    }
}
