//! Chess Academy - chess learning platform backend.
//!
//! # Architecture
//!
//! - **Services**: [`GameService`] orchestrates game lifecycles (moves, bot
//!   replies, termination, undo); [`PuzzleService`] checks puzzle solutions
//!   move-by-move and tracks per-user statistics.
//! - **Position capability**: the [`position`] module adapts the chess rules
//!   library; [`MoveEngine`] is the search seam, implemented by [`UciEngine`]
//!   over an external Stockfish process.
//! - **Persistence**: diesel/sqlite repositories with embedded migrations.
//! - **Server**: axum REST API over the services.
//! - **Maintenance**: a [`Scheduler`] runs periodic tasks behind a
//!   cross-process [`TaskLock`], with retries and operator alerts.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use chess_academy::{GameRepository, GameService, Opponent, RetryPolicy, UciEngine};
//!
//! # async fn example() -> Result<(), chess_academy::ServiceError> {
//! let repository = GameRepository::new("chess_academy.db".to_string());
//! let engine = Arc::new(UciEngine::new("stockfish".to_string(), 10));
//! let games = GameService::new(repository, engine, RetryPolicy::default(), 2_000, 15);
//!
//! let (game, _session) = games.create_game(Some(1), Opponent::Bot { skill: 10 })?;
//! let outcome = games.make_move(*game.id(), "e2e4", Some(1)).await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![forbid(unsafe_code)]

// Private module declarations
mod alert;
mod cli;
mod config;
mod db;
mod engine;
mod error;
mod game_service;
mod lock;
mod puzzle_service;
mod retry;
mod scheduler;
mod server;

/// Position capability: FEN parsing, legality, terminal detection, records.
pub mod position;

// Crate-level exports - CLI
pub use cli::{Cli, Command};

// Crate-level exports - Configuration
pub use config::{
    AlertConfig, ApiConfig, AppConfig, ConfigError, DatabaseConfig, EngineConfig, SchedulerConfig,
};

// Crate-level exports - Persistence
pub use db::{
    DbError, Difficulty, DifficultyTotals, Game, GameRepository, GameSession, GameStatus, NewGame,
    NewGameSession, NewPuzzle, Puzzle, PuzzleRepository, PuzzleStat, UserPuzzleSummary,
    decode_moves, encode_moves,
};

// Crate-level exports - Engine seam
pub use engine::{Analysis, EngineError, MoveEngine, UciEngine};

// Crate-level exports - Services
pub use error::ServiceError;
pub use game_service::{GameService, MoveOutcome, Opponent, Suggestion, UndoOutcome};
pub use puzzle_service::{AttemptOutcome, PuzzleService};

// Crate-level exports - Server
pub use server::{ApiError, AppState, router};

// Crate-level exports - Maintenance plumbing
pub use alert::AlertNotifier;
pub use lock::{FileLock, LockError, LockGuard, TaskLock};
pub use retry::RetryPolicy;
pub use scheduler::{AbandonStaleGames, ScheduledTask, Scheduler, TaskError};
