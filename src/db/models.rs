//! Database models and domain types.

use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use derive_getters::Getters;
use derive_new::new;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::db::{DbError, schema};

/// Lifecycle status of a game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GameStatus {
    /// Game is being played.
    InProgress,
    /// White delivered checkmate.
    WhiteWon,
    /// Black delivered checkmate.
    BlackWon,
    /// Game ended in a draw.
    Draw,
    /// Game was abandoned without a result.
    Abandoned,
}

impl GameStatus {
    /// Converts the status to the string stored in the database.
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::WhiteWon => "white_won",
            Self::BlackWon => "black_won",
            Self::Draw => "draw",
            Self::Abandoned => "abandoned",
        }
    }

    /// Parses the status from the string stored in the database.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the string is not a valid status value.
    pub fn from_db_string(s: &str) -> Result<Self, DbError> {
        match s {
            "in_progress" => Ok(Self::InProgress),
            "white_won" => Ok(Self::WhiteWon),
            "black_won" => Ok(Self::BlackWon),
            "draw" => Ok(Self::Draw),
            "abandoned" => Ok(Self::Abandoned),
            _ => Err(DbError::new(format!("Invalid game status: '{}'", s))),
        }
    }

    /// Returns true once the game can no longer accept moves.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::InProgress)
    }

    /// PGN result token for this status.
    pub fn result_token(&self) -> &'static str {
        match self {
            Self::WhiteWon => "1-0",
            Self::BlackWon => "0-1",
            Self::Draw => "1/2-1/2",
            Self::InProgress | Self::Abandoned => "*",
        }
    }
}

/// Difficulty classification of a puzzle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    /// Beginner level.
    Easy,
    /// Intermediate level.
    Medium,
    /// Advanced level.
    Hard,
    /// Master level.
    Expert,
}

impl Difficulty {
    /// Converts the difficulty to the string stored in the database.
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Easy => "easy",
            Self::Medium => "medium",
            Self::Hard => "hard",
            Self::Expert => "expert",
        }
    }

    /// Parses the difficulty from the string stored in the database.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the string is not a valid difficulty value.
    pub fn from_db_string(s: &str) -> Result<Self, DbError> {
        match s {
            "easy" => Ok(Self::Easy),
            "medium" => Ok(Self::Medium),
            "hard" => Ok(Self::Hard),
            "expert" => Ok(Self::Expert),
            _ => Err(DbError::new(format!("Invalid difficulty: '{}'", s))),
        }
    }
}

/// Game database model.
#[derive(Debug, Clone, Queryable, Identifiable, Selectable, Getters)]
#[diesel(table_name = schema::games)]
pub struct Game {
    id: i32,
    white_player_id: Option<i32>,
    black_player_id: Option<i32>,
    bot_difficulty: Option<i32>,
    pgn: Option<String>,
    status: String,
    started_at: NaiveDateTime,
    ended_at: Option<NaiveDateTime>,
}

impl Game {
    /// Parses the stored status string into a [`GameStatus`].
    pub fn parse_status(&self) -> Result<GameStatus, DbError> {
        GameStatus::from_db_string(self.status())
    }

    /// A game is a bot game exactly when no black player is assigned.
    pub fn is_bot_game(&self) -> bool {
        self.black_player_id.is_none()
    }
}

/// Insertable game model for creating new games.
#[derive(Debug, Clone, Insertable, new)]
#[diesel(table_name = schema::games)]
pub struct NewGame {
    white_player_id: Option<i32>,
    black_player_id: Option<i32>,
    bot_difficulty: Option<i32>,
    status: String,
}

/// Current materialized state for one game: position plus ordered move log.
#[derive(Debug, Clone, Queryable, Identifiable, Associations, Selectable, Getters)]
#[diesel(table_name = schema::game_sessions)]
#[diesel(belongs_to(Game))]
pub struct GameSession {
    id: i32,
    game_id: i32,
    current_fen: String,
    move_history: String,
    last_move_at: NaiveDateTime,
    created_at: NaiveDateTime,
}

impl GameSession {
    /// Decodes the stored move history JSON into a list of UCI strings.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the stored JSON is not an array of strings.
    pub fn parse_moves(&self) -> Result<Vec<String>, DbError> {
        decode_moves(self.move_history())
    }
}

/// Insertable session model.
#[derive(Debug, Clone, Insertable, new)]
#[diesel(table_name = schema::game_sessions)]
pub struct NewGameSession {
    game_id: i32,
    current_fen: String,
    move_history: String,
}

/// Puzzle database model. Immutable after creation.
#[derive(Debug, Clone, Queryable, Identifiable, Selectable, Getters)]
#[diesel(table_name = schema::puzzles)]
pub struct Puzzle {
    id: i32,
    fen: String,
    solution: String,
    difficulty: String,
    theme: Option<String>,
    description: Option<String>,
    created_at: NaiveDateTime,
}

impl Puzzle {
    /// Parses the stored difficulty string into a [`Difficulty`].
    pub fn parse_difficulty(&self) -> Result<Difficulty, DbError> {
        Difficulty::from_db_string(self.difficulty())
    }

    /// Decodes the stored solution JSON into a list of UCI strings.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the stored JSON is not an array of strings.
    pub fn parse_solution(&self) -> Result<Vec<String>, DbError> {
        decode_moves(self.solution())
    }
}

/// Insertable puzzle model.
#[derive(Debug, Clone, Insertable, new)]
#[diesel(table_name = schema::puzzles)]
pub struct NewPuzzle {
    fen: String,
    solution: String,
    difficulty: String,
    theme: Option<String>,
    description: Option<String>,
}

/// Per (user, puzzle) solving statistics.
#[derive(Debug, Clone, Queryable, Identifiable, Associations, Selectable, Getters)]
#[diesel(table_name = schema::puzzle_stats)]
#[diesel(belongs_to(Puzzle))]
pub struct PuzzleStat {
    id: i32,
    user_id: i32,
    puzzle_id: i32,
    solved_count: i32,
    failed_count: i32,
    progress: i32,
    best_time_seconds: Option<f64>,
    last_attempt_at: Option<NaiveDateTime>,
    created_at: NaiveDateTime,
}

/// Insertable stat row, created lazily on a user's first attempt.
#[derive(Debug, Clone, Insertable, new)]
#[diesel(table_name = schema::puzzle_stats)]
pub struct NewPuzzleStat {
    user_id: i32,
    puzzle_id: i32,
}

/// Solved/failed totals for one difficulty class.
#[derive(Debug, Clone, Copy, Default, Serialize, Getters)]
pub struct DifficultyTotals {
    solved: i64,
    failed: i64,
}

impl DifficultyTotals {
    pub(crate) fn add(&mut self, solved: i32, failed: i32) {
        self.solved += i64::from(solved);
        self.failed += i64::from(failed);
    }
}

/// Aggregated puzzle statistics for a user across all attempted puzzles.
#[derive(Debug, Clone, Serialize, Getters)]
pub struct UserPuzzleSummary {
    user_id: i32,
    total_solved: i64,
    total_failed: i64,
    success_rate: f64,
    best_time_seconds: Option<f64>,
    puzzles_by_difficulty: BTreeMap<String, DifficultyTotals>,
}

impl UserPuzzleSummary {
    /// Builds a summary from per-puzzle stat rows paired with each puzzle's
    /// stored difficulty string.
    pub fn from_rows(user_id: i32, rows: &[(PuzzleStat, String)]) -> Self {
        let total_solved: i64 = rows.iter().map(|(s, _)| i64::from(*s.solved_count())).sum();
        let total_failed: i64 = rows.iter().map(|(s, _)| i64::from(*s.failed_count())).sum();
        let attempts = total_solved + total_failed;
        let success_rate = if attempts > 0 {
            let rate = total_solved as f64 / attempts as f64 * 100.0;
            (rate * 100.0).round() / 100.0
        } else {
            0.0
        };

        let best_time_seconds = rows
            .iter()
            .filter_map(|(s, _)| *s.best_time_seconds())
            .fold(None, |best: Option<f64>, t| match best {
                Some(b) if b <= t => Some(b),
                _ => Some(t),
            });

        let mut puzzles_by_difficulty: BTreeMap<String, DifficultyTotals> = BTreeMap::new();
        for (stat, difficulty) in rows {
            puzzles_by_difficulty
                .entry(difficulty.clone())
                .or_default()
                .add(*stat.solved_count(), *stat.failed_count());
        }

        Self {
            user_id,
            total_solved,
            total_failed,
            success_rate,
            best_time_seconds,
            puzzles_by_difficulty,
        }
    }
}

/// Encodes a move list as the JSON stored in a session or puzzle column.
///
/// # Errors
///
/// Returns [`DbError`] if serialization fails.
pub fn encode_moves(moves: &[String]) -> Result<String, DbError> {
    Ok(serde_json::to_string(moves)?)
}

/// Decodes the JSON move list stored in a session or puzzle column.
///
/// # Errors
///
/// Returns [`DbError`] if the stored JSON is not an array of strings.
pub fn decode_moves(raw: &str) -> Result<Vec<String>, DbError> {
    Ok(serde_json::from_str(raw)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn game_status_round_trip() {
        for status in [
            GameStatus::InProgress,
            GameStatus::WhiteWon,
            GameStatus::BlackWon,
            GameStatus::Draw,
            GameStatus::Abandoned,
        ] {
            let parsed = GameStatus::from_db_string(status.to_db_string()).expect("parse");
            assert_eq!(status, parsed);
        }
    }

    #[test]
    fn game_status_invalid_string() {
        assert!(GameStatus::from_db_string("resigned").is_err());
    }

    #[test]
    fn terminal_statuses() {
        assert!(!GameStatus::InProgress.is_terminal());
        assert!(GameStatus::WhiteWon.is_terminal());
        assert!(GameStatus::Abandoned.is_terminal());
    }

    #[test]
    fn difficulty_round_trip() {
        for difficulty in [
            Difficulty::Easy,
            Difficulty::Medium,
            Difficulty::Hard,
            Difficulty::Expert,
        ] {
            let parsed = Difficulty::from_db_string(difficulty.to_db_string()).expect("parse");
            assert_eq!(difficulty, parsed);
        }
    }

    #[test]
    fn move_list_round_trip() {
        let moves = vec!["e2e4".to_string(), "e7e5".to_string()];
        let encoded = encode_moves(&moves).expect("encode");
        assert_eq!(decode_moves(&encoded).expect("decode"), moves);
    }

    #[test]
    fn decode_moves_rejects_garbage() {
        assert!(decode_moves("not json").is_err());
        assert!(decode_moves("{\"a\":1}").is_err());
    }
}
