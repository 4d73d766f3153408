//! Database repositories for games, sessions, puzzles, and solving stats.

use chrono::{NaiveDateTime, Utc};
use diesel::prelude::*;
use diesel_migrations::MigrationHarness;
use rand::seq::SliceRandom;
use tracing::{debug, info, instrument, warn};

use crate::db::{
    DbError, Difficulty, Game, GameSession, GameStatus, NewGame, NewGameSession, NewPuzzle,
    NewPuzzleStat, Puzzle, PuzzleStat, UserPuzzleSummary, schema,
};

/// Repository for games and their sessions.
#[derive(Debug, Clone)]
pub struct GameRepository {
    db_path: String,
}

impl GameRepository {
    /// Creates a new repository connected to the database at the given path.
    ///
    /// Use `":memory:"` for an in-memory database (useful for tests).
    #[instrument(skip(db_path), fields(db_path = %db_path))]
    pub fn new(db_path: String) -> Self {
        info!(path = %db_path, "Creating GameRepository");
        Self { db_path }
    }

    /// Establishes a database connection.
    fn connection(&self) -> Result<SqliteConnection, DbError> {
        debug!(path = %self.db_path, "Establishing connection");
        SqliteConnection::establish(&self.db_path)
            .map_err(|e| DbError::new(format!("Failed to connect to '{}': {}", self.db_path, e)))
    }

    /// Applies any pending embedded migrations.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if a migration fails to apply.
    #[instrument(skip(self))]
    pub fn run_migrations(&self) -> Result<(), DbError> {
        let mut conn = self.connection()?;
        let applied = conn
            .run_pending_migrations(crate::db::MIGRATIONS)
            .map_err(|e| DbError::new(format!("Migration failed: {}", e)))?;
        info!(count = applied.len(), "Migrations applied");
        Ok(())
    }

    /// Checks that the database answers a trivial query.
    #[instrument(skip(self))]
    pub fn check_connection(&self) -> bool {
        match self.connection() {
            Ok(mut conn) => diesel::sql_query("SELECT 1").execute(&mut conn).is_ok(),
            Err(e) => {
                warn!(error = %e, "Database connectivity check failed");
                false
            }
        }
    }

    /// Persists a new game.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if a database error occurs.
    #[instrument(skip(self, game))]
    pub fn create_game(&self, game: NewGame) -> Result<Game, DbError> {
        debug!("Creating game");
        let mut conn = self.connection()?;

        let game = diesel::insert_into(schema::games::table)
            .values(&game)
            .returning(Game::as_returning())
            .get_result(&mut conn)?;

        info!(game_id = game.id(), "Game created");
        Ok(game)
    }

    /// Gets a game by id. Returns `None` if not found.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if a database error occurs.
    #[instrument(skip(self))]
    pub fn get_game(&self, game_id: i32) -> Result<Option<Game>, DbError> {
        let mut conn = self.connection()?;

        let game = schema::games::table
            .find(game_id)
            .first::<Game>(&mut conn)
            .optional()?;

        Ok(game)
    }

    /// Marks a game as finished: terminal status, end timestamp, and game
    /// record are written together, never independently.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the game does not exist or a database error
    /// occurs.
    #[instrument(skip(self, pgn), fields(status = status.to_db_string()))]
    pub fn finish_game(&self, game_id: i32, status: GameStatus, pgn: &str) -> Result<(), DbError> {
        debug!(game_id, "Finishing game");
        let mut conn = self.connection()?;

        let updated = diesel::update(schema::games::table.find(game_id))
            .set((
                schema::games::status.eq(status.to_db_string()),
                schema::games::pgn.eq(pgn),
                schema::games::ended_at.eq(Utc::now().naive_utc()),
            ))
            .execute(&mut conn)?;

        if updated == 0 {
            return Err(DbError::new(format!("Game {} not found", game_id)));
        }

        info!(game_id, status = status.to_db_string(), "Game finished");
        Ok(())
    }

    /// Returns a finished game to play: status back to in-progress, end
    /// timestamp and game record cleared together.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the game does not exist or a database error
    /// occurs.
    #[instrument(skip(self))]
    pub fn reopen_game(&self, game_id: i32) -> Result<(), DbError> {
        debug!(game_id, "Reopening game");
        let mut conn = self.connection()?;

        let updated = diesel::update(schema::games::table.find(game_id))
            .set((
                schema::games::status.eq(GameStatus::InProgress.to_db_string()),
                schema::games::pgn.eq(None::<String>),
                schema::games::ended_at.eq(None::<NaiveDateTime>),
            ))
            .execute(&mut conn)?;

        if updated == 0 {
            return Err(DbError::new(format!("Game {} not found", game_id)));
        }

        info!(game_id, "Game reopened");
        Ok(())
    }

    /// Persists a new session row for a game.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if a database error occurs.
    #[instrument(skip(self, session))]
    pub fn create_session(&self, session: NewGameSession) -> Result<GameSession, DbError> {
        let mut conn = self.connection()?;

        let session = diesel::insert_into(schema::game_sessions::table)
            .values(&session)
            .returning(GameSession::as_returning())
            .get_result(&mut conn)?;

        info!(
            session_id = session.id(),
            game_id = session.game_id(),
            "Session created"
        );
        Ok(session)
    }

    /// Gets the authoritative session for a game: the most recently created
    /// row. Returns `None` if the game has no session.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if a database error occurs.
    #[instrument(skip(self))]
    pub fn current_session(&self, game_id: i32) -> Result<Option<GameSession>, DbError> {
        let mut conn = self.connection()?;

        let session = schema::game_sessions::table
            .filter(schema::game_sessions::game_id.eq(game_id))
            .order((
                schema::game_sessions::created_at.desc(),
                schema::game_sessions::id.desc(),
            ))
            .first::<GameSession>(&mut conn)
            .optional()?;

        Ok(session)
    }

    /// Writes a session's position, move history, and last-move timestamp.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the session does not exist or a database error
    /// occurs.
    #[instrument(skip(self, fen, move_history))]
    pub fn update_session(
        &self,
        session_id: i32,
        fen: &str,
        move_history: &str,
    ) -> Result<(), DbError> {
        let mut conn = self.connection()?;

        let updated = diesel::update(schema::game_sessions::table.find(session_id))
            .set((
                schema::game_sessions::current_fen.eq(fen),
                schema::game_sessions::move_history.eq(move_history),
                schema::game_sessions::last_move_at.eq(Utc::now().naive_utc()),
            ))
            .execute(&mut conn)?;

        if updated == 0 {
            return Err(DbError::new(format!("Session {} not found", session_id)));
        }

        debug!(session_id, "Session updated");
        Ok(())
    }

    /// Lists in-progress games whose session saw no move since `cutoff`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if a database error occurs.
    #[instrument(skip(self))]
    pub fn stale_games(&self, cutoff: NaiveDateTime) -> Result<Vec<Game>, DbError> {
        let mut conn = self.connection()?;

        let stale_ids: Vec<i32> = schema::game_sessions::table
            .filter(schema::game_sessions::last_move_at.lt(cutoff))
            .select(schema::game_sessions::game_id)
            .distinct()
            .load(&mut conn)?;

        let games = schema::games::table
            .filter(schema::games::id.eq_any(stale_ids))
            .filter(schema::games::status.eq(GameStatus::InProgress.to_db_string()))
            .load::<Game>(&mut conn)?;

        debug!(count = games.len(), "Stale games found");
        Ok(games)
    }
}

/// Repository for puzzles and per-user solving statistics.
#[derive(Debug, Clone)]
pub struct PuzzleRepository {
    db_path: String,
}

impl PuzzleRepository {
    /// Creates a new repository connected to the database at the given path.
    #[instrument(skip(db_path), fields(db_path = %db_path))]
    pub fn new(db_path: String) -> Self {
        info!(path = %db_path, "Creating PuzzleRepository");
        Self { db_path }
    }

    fn connection(&self) -> Result<SqliteConnection, DbError> {
        debug!(path = %self.db_path, "Establishing connection");
        SqliteConnection::establish(&self.db_path)
            .map_err(|e| DbError::new(format!("Failed to connect to '{}': {}", self.db_path, e)))
    }

    /// Persists a new puzzle.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if a database error occurs.
    #[instrument(skip(self, puzzle))]
    pub fn create_puzzle(&self, puzzle: NewPuzzle) -> Result<Puzzle, DbError> {
        let mut conn = self.connection()?;

        let puzzle = diesel::insert_into(schema::puzzles::table)
            .values(&puzzle)
            .returning(Puzzle::as_returning())
            .get_result(&mut conn)?;

        info!(puzzle_id = puzzle.id(), "Puzzle created");
        Ok(puzzle)
    }

    /// Gets a puzzle by id. Returns `None` if not found.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if a database error occurs.
    #[instrument(skip(self))]
    pub fn get_puzzle(&self, puzzle_id: i32) -> Result<Option<Puzzle>, DbError> {
        let mut conn = self.connection()?;

        let puzzle = schema::puzzles::table
            .find(puzzle_id)
            .first::<Puzzle>(&mut conn)
            .optional()?;

        Ok(puzzle)
    }

    /// Picks a random puzzle, optionally restricted to one difficulty.
    /// Returns `None` when no puzzle matches.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if a database error occurs.
    #[instrument(skip(self))]
    pub fn random_puzzle(&self, difficulty: Option<Difficulty>) -> Result<Option<Puzzle>, DbError> {
        let mut conn = self.connection()?;

        let puzzles: Vec<Puzzle> = match difficulty {
            Some(d) => schema::puzzles::table
                .filter(schema::puzzles::difficulty.eq(d.to_db_string()))
                .load(&mut conn)?,
            None => schema::puzzles::table.load(&mut conn)?,
        };

        let chosen = puzzles.choose(&mut rand::thread_rng()).cloned();
        debug!(
            candidates = puzzles.len(),
            found = chosen.is_some(),
            "Random puzzle selected"
        );
        Ok(chosen)
    }

    /// Gets the stat row for a (user, puzzle) pair. Returns `None` if the
    /// user never attempted the puzzle.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if a database error occurs.
    #[instrument(skip(self))]
    pub fn get_stat(&self, user_id: i32, puzzle_id: i32) -> Result<Option<PuzzleStat>, DbError> {
        let mut conn = self.connection()?;

        let stat = schema::puzzle_stats::table
            .filter(schema::puzzle_stats::user_id.eq(user_id))
            .filter(schema::puzzle_stats::puzzle_id.eq(puzzle_id))
            .first::<PuzzleStat>(&mut conn)
            .optional()?;

        Ok(stat)
    }

    /// Records one attempt: creates the stat row lazily, bumps the solved or
    /// failed counter with an in-database increment (so concurrent attempts
    /// cannot under-count), stores the new progress pointer, and stamps the
    /// attempt time.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if a database error occurs.
    #[instrument(skip(self))]
    pub fn record_attempt(
        &self,
        user_id: i32,
        puzzle_id: i32,
        success: bool,
        progress: i32,
    ) -> Result<(), DbError> {
        let mut conn = self.connection()?;

        diesel::insert_or_ignore_into(schema::puzzle_stats::table)
            .values(&NewPuzzleStat::new(user_id, puzzle_id))
            .execute(&mut conn)?;

        let target = schema::puzzle_stats::table
            .filter(schema::puzzle_stats::user_id.eq(user_id))
            .filter(schema::puzzle_stats::puzzle_id.eq(puzzle_id));
        let now = Utc::now().naive_utc();

        if success {
            diesel::update(target)
                .set((
                    schema::puzzle_stats::solved_count
                        .eq(schema::puzzle_stats::solved_count + 1),
                    schema::puzzle_stats::progress.eq(progress),
                    schema::puzzle_stats::last_attempt_at.eq(now),
                ))
                .execute(&mut conn)?;
        } else {
            diesel::update(target)
                .set((
                    schema::puzzle_stats::failed_count
                        .eq(schema::puzzle_stats::failed_count + 1),
                    schema::puzzle_stats::progress.eq(progress),
                    schema::puzzle_stats::last_attempt_at.eq(now),
                ))
                .execute(&mut conn)?;
        }

        info!(user_id, puzzle_id, success, progress, "Attempt recorded");
        Ok(())
    }

    /// Lowers the stored best completion time if `seconds` beats it.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if a database error occurs.
    #[instrument(skip(self))]
    pub fn record_best_time(
        &self,
        user_id: i32,
        puzzle_id: i32,
        seconds: f64,
    ) -> Result<(), DbError> {
        let mut conn = self.connection()?;

        let updated = diesel::update(
            schema::puzzle_stats::table
                .filter(schema::puzzle_stats::user_id.eq(user_id))
                .filter(schema::puzzle_stats::puzzle_id.eq(puzzle_id))
                .filter(
                    schema::puzzle_stats::best_time_seconds
                        .is_null()
                        .or(schema::puzzle_stats::best_time_seconds.gt(seconds)),
                ),
        )
        .set(schema::puzzle_stats::best_time_seconds.eq(seconds))
        .execute(&mut conn)?;

        if updated > 0 {
            info!(user_id, puzzle_id, seconds, "Best time improved");
        }
        Ok(())
    }

    /// Aggregates all stat rows for a user into totals, success rate, best
    /// time, and a per-difficulty breakdown.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if a database error occurs.
    #[instrument(skip(self))]
    pub fn user_summary(&self, user_id: i32) -> Result<UserPuzzleSummary, DbError> {
        let mut conn = self.connection()?;

        let rows: Vec<(PuzzleStat, String)> = schema::puzzle_stats::table
            .inner_join(schema::puzzles::table)
            .filter(schema::puzzle_stats::user_id.eq(user_id))
            .select((PuzzleStat::as_select(), schema::puzzles::difficulty))
            .load(&mut conn)?;

        let summary = UserPuzzleSummary::from_rows(user_id, &rows);
        info!(
            user_id,
            total_solved = summary.total_solved(),
            total_failed = summary.total_failed(),
            "User summary computed"
        );
        Ok(summary)
    }
}
