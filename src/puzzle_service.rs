//! Puzzle solving: solution checking move-by-move and per-user statistics.
//!
//! A puzzle's solution is trusted ground truth, so a submitted move is
//! checked by canonical-notation equality against the expected solution move,
//! not by independent legality analysis. Progress through the solution is
//! persisted per (user, puzzle) and re-validated by replaying the solved
//! prefix on every attempt, so a solution that stopped replaying clamps the
//! pointer back instead of wedging the puzzle.

use derive_getters::Getters;
use tracing::{info, instrument, warn};

use crate::db::{Difficulty, NewPuzzle, Puzzle, PuzzleRepository, UserPuzzleSummary, encode_moves};
use crate::error::ServiceError;
use crate::position;

/// Result of one puzzle attempt.
#[derive(Debug, Clone, Getters)]
pub struct AttemptOutcome {
    /// Whether the submitted move matched the solution.
    correct: bool,
    /// Human-readable description of what happened.
    message: String,
    /// The next expected solution move, absent once the puzzle is complete.
    next_move: Option<String>,
    /// Whether the whole solution has now been played.
    is_complete: bool,
}

impl AttemptOutcome {
    fn rejected(message: impl Into<String>, is_complete: bool) -> Self {
        Self {
            correct: false,
            message: message.into(),
            next_move: None,
            is_complete,
        }
    }
}

/// Service layer for tactics puzzles.
#[derive(Debug, Clone)]
pub struct PuzzleService {
    repository: PuzzleRepository,
}

impl PuzzleService {
    /// Creates a new puzzle service backed by the given repository.
    #[instrument(skip(repository))]
    pub fn new(repository: PuzzleRepository) -> Self {
        info!("Creating PuzzleService");
        Self { repository }
    }

    /// Creates a puzzle after validating that its solution actually plays
    /// out from the starting position. Moves are stored in canonical
    /// coordinate notation; puzzles are immutable once created.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::InvalidData`] for an unparseable position,
    /// an empty solution, or a solution move that is not legal in sequence.
    #[instrument(skip(self, fen, solution, theme, description), fields(fen = %fen))]
    pub fn create_puzzle(
        &self,
        fen: &str,
        solution: &[String],
        difficulty: Difficulty,
        theme: Option<String>,
        description: Option<String>,
    ) -> Result<Puzzle, ServiceError> {
        let start = position::parse_fen(fen).map_err(|e| {
            ServiceError::InvalidData(format!("Starting position is not valid: {}", e))
        })?;
        if solution.is_empty() {
            return Err(ServiceError::InvalidData(
                "Solution must contain at least one move".to_string(),
            ));
        }

        let mut pos = start;
        let mut canonical = Vec::with_capacity(solution.len());
        for (index, uci) in solution.iter().enumerate() {
            let m = position::parse_move(&pos, uci).map_err(|e| {
                ServiceError::InvalidData(format!(
                    "Solution move {} ('{}') does not play out: {}",
                    index + 1,
                    uci,
                    e
                ))
            })?;
            canonical.push(position::uci_string(&m));
            pos = position::apply(pos, &m);
        }

        let puzzle = self.repository.create_puzzle(NewPuzzle::new(
            fen.to_string(),
            encode_moves(&canonical)?,
            difficulty.to_db_string().to_string(),
            theme,
            description,
        ))?;
        info!(puzzle_id = puzzle.id(), moves = canonical.len(), "Puzzle created");
        Ok(puzzle)
    }

    /// Gets a puzzle by id.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::NotFound`] if the puzzle does not exist.
    #[instrument(skip(self))]
    pub fn get_puzzle(&self, puzzle_id: i32) -> Result<Puzzle, ServiceError> {
        self.repository
            .get_puzzle(puzzle_id)?
            .ok_or_else(|| ServiceError::NotFound(format!("Puzzle {} not found", puzzle_id)))
    }

    /// Picks a random puzzle, optionally filtered by difficulty.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::NotFound`] when no puzzle matches.
    #[instrument(skip(self))]
    pub fn random_puzzle(&self, difficulty: Option<Difficulty>) -> Result<Puzzle, ServiceError> {
        self.repository
            .random_puzzle(difficulty)?
            .ok_or_else(|| ServiceError::NotFound("No puzzles found".to_string()))
    }

    /// Checks one submitted move against the puzzle's solution sequence.
    ///
    /// Progress comes from the user's stat row, re-validated by replaying the
    /// solved prefix from the puzzle's starting position. Anonymous attempts
    /// (no user id) always check against the first solution move and record
    /// nothing.
    ///
    /// # Errors
    ///
    /// `NotFound` for a missing puzzle, `InvalidData` for unparseable stored
    /// puzzle content.
    #[instrument(skip(self, move_uci), fields(mv = %move_uci))]
    pub fn attempt(
        &self,
        puzzle_id: i32,
        move_uci: &str,
        user_id: Option<i32>,
        time_seconds: Option<f64>,
    ) -> Result<AttemptOutcome, ServiceError> {
        let puzzle = self.get_puzzle(puzzle_id)?;
        let solution = puzzle.parse_solution().map_err(|e| {
            ServiceError::InvalidData(format!("Puzzle solution does not parse: {}", e))
        })?;
        if solution.is_empty() {
            return Err(ServiceError::InvalidData(
                "Puzzle has no solution moves".to_string(),
            ));
        }
        let start = position::parse_fen(puzzle.fen()).map_err(|e| {
            ServiceError::InvalidData(format!("Puzzle position does not parse: {}", e))
        })?;

        let stored_progress = match user_id {
            Some(uid) => self
                .repository
                .get_stat(uid, puzzle_id)?
                .map(|stat| (*stat.progress()).max(0) as usize)
                .unwrap_or(0),
            None => 0,
        };

        let progress = self.replay_prefix(puzzle_id, &solution, start, stored_progress);
        if progress >= solution.len() {
            return Ok(AttemptOutcome::rejected("Puzzle already solved", true));
        }

        let Some(submitted) = position::canonical_uci(move_uci) else {
            return Ok(AttemptOutcome::rejected("Invalid move format", false));
        };

        let expected = &solution[progress];
        if submitted == *expected {
            let new_progress = progress + 1;
            let is_complete = new_progress >= solution.len();
            if let Some(uid) = user_id {
                self.repository
                    .record_attempt(uid, puzzle_id, true, new_progress as i32)?;
                if is_complete {
                    if let Some(seconds) = time_seconds {
                        self.repository.record_best_time(uid, puzzle_id, seconds)?;
                    }
                }
            }
            let next_move = if is_complete {
                None
            } else {
                Some(solution[new_progress].clone())
            };
            info!(puzzle_id, progress = new_progress, is_complete, "Correct solution move");
            Ok(AttemptOutcome {
                correct: true,
                message: "Correct move!".to_string(),
                next_move,
                is_complete,
            })
        } else {
            if let Some(uid) = user_id {
                self.repository
                    .record_attempt(uid, puzzle_id, false, progress as i32)?;
            }
            Ok(AttemptOutcome::rejected("Incorrect move. Try again!", false))
        }
    }

    /// Aggregated statistics for a user across all attempted puzzles.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Database`] if the store fails.
    #[instrument(skip(self))]
    pub fn user_stats(&self, user_id: i32) -> Result<UserPuzzleSummary, ServiceError> {
        Ok(self.repository.user_summary(user_id)?)
    }

    /// Replays up to `stored_progress` solution moves from the start; the
    /// count actually replayed is the trusted progress pointer.
    fn replay_prefix(
        &self,
        puzzle_id: i32,
        solution: &[String],
        start: position::Chess,
        stored_progress: usize,
    ) -> usize {
        let mut pos = start;
        let mut progress = 0;
        for uci in solution.iter().take(stored_progress.min(solution.len())) {
            match position::parse_move(&pos, uci) {
                Ok(m) => {
                    pos = position::apply(pos, &m);
                    progress += 1;
                }
                Err(e) => {
                    warn!(
                        puzzle_id,
                        mv = %uci,
                        error = %e,
                        "Solved prefix no longer replays; clamping progress"
                    );
                    break;
                }
            }
        }
        progress
    }
}
