//! Database persistence layer for games, sessions, puzzles, and stats.

mod error;
mod models;
mod repository;
mod schema; // Diesel generated schema - internal use only

use diesel_migrations::{EmbeddedMigrations, embed_migrations};

pub use error::DbError;
pub use models::{
    Difficulty, DifficultyTotals, Game, GameSession, GameStatus, NewGame, NewGameSession,
    NewPuzzle, NewPuzzleStat, Puzzle, PuzzleStat, UserPuzzleSummary, decode_moves, encode_moves,
};
pub use repository::{GameRepository, PuzzleRepository};

/// Embedded schema migrations, applied at startup and in tests.
pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");
