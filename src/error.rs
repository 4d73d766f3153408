//! Service-layer error kinds.

use derive_more::Display;

use crate::db::DbError;
use crate::engine::EngineError;

/// Errors surfaced by the game orchestrator and puzzle solver.
///
/// User-input problems (`InvalidMove`, `InvalidState`) carry a message meant
/// for the caller and never mutate state. `CorruptState` means a consistency
/// invariant was violated by an earlier bug or race; it is kept distinct so
/// operators can detect data corruption instead of blaming the user.
#[derive(Debug, Clone, Display)]
pub enum ServiceError {
    /// Game, session, or puzzle does not exist.
    #[display("{_0}")]
    NotFound(String),
    /// The operation is not valid given the current status.
    #[display("{_0}")]
    InvalidState(String),
    /// The submitted move is malformed or illegal.
    #[display("{_0}")]
    InvalidMove(String),
    /// Persisted puzzle or move-history content is unparseable.
    #[display("{_0}")]
    InvalidData(String),
    /// A stored position fails to parse or a logged move no longer replays.
    #[display("{_0}")]
    CorruptState(String),
    /// The store itself failed.
    #[display("Database failure: {_0}")]
    Database(DbError),
    /// The search engine failed and the operation could not degrade.
    #[display("Engine failure: {_0}")]
    Engine(EngineError),
}

impl std::error::Error for ServiceError {}

impl From<DbError> for ServiceError {
    fn from(err: DbError) -> Self {
        Self::Database(err)
    }
}

impl From<EngineError> for ServiceError {
    fn from(err: EngineError) -> Self {
        Self::Engine(err)
    }
}
