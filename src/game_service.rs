//! Game orchestration: move submission, bot replies, termination, undo.
//!
//! The orchestrator owns nothing chess-specific itself - legality and
//! terminal verdicts come from the position capability, search from the
//! engine seam, durability from the repository. What lives here is the
//! sequencing: the player's move is persisted before termination is
//! evaluated, termination is re-checked after every ply, and undo rebuilds
//! the position by replay instead of trying to reverse moves.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use derive_getters::Getters;
use tracing::{debug, info, instrument, warn};

use crate::db::{
    Game, GameRepository, GameSession, GameStatus, NewGame, NewGameSession, encode_moves,
};
use crate::engine::{Analysis, MoveEngine};
use crate::error::ServiceError;
use crate::position::{self, Chess, Color, TerminalState};
use crate::retry::{self, RetryPolicy};

/// Depth used for the move-suggestion evaluation.
const SUGGESTION_DEPTH: u32 = 10;

/// Who plays black. A bot opponent is the only way to get an engine reply;
/// a human game always carries the opponent's identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opponent {
    /// A human opponent with the given user id.
    Human(i32),
    /// The engine, playing at the given skill level.
    Bot {
        /// Engine skill level (0-20).
        skill: i32,
    },
}

/// Result of a move submission.
#[derive(Debug, Clone, Getters)]
pub struct MoveOutcome {
    /// Human-readable description of what happened.
    message: String,
    /// Position after the player's move and any bot reply.
    fen: String,
    /// Game status after the ply (or plies).
    status: GameStatus,
    /// The bot's reply, when one was made.
    bot_move: Option<String>,
    /// Full move log after this submission.
    move_history: Vec<String>,
}

/// Result of an undo.
#[derive(Debug, Clone, Getters)]
pub struct UndoOutcome {
    /// Human-readable description of what happened.
    message: String,
    /// Position after the undo.
    fen: String,
    /// Game status after the undo (always in progress).
    status: GameStatus,
    /// Truncated move log.
    move_history: Vec<String>,
}

/// Engine recommendation for the current position.
#[derive(Debug, Clone, Getters)]
pub struct Suggestion {
    /// Recommended move in coordinate notation.
    suggested_move: String,
    /// Evaluation string, e.g. `"cp 34"`.
    evaluation: String,
    /// Depth the evaluation was computed at.
    depth: u32,
}

/// Service layer for chess games.
///
/// Constructed once at startup with its collaborators passed in explicitly;
/// no global state.
#[derive(Clone)]
pub struct GameService {
    repository: GameRepository,
    engine: Arc<dyn MoveEngine>,
    retry_policy: RetryPolicy,
    move_time_ms: u64,
    analysis_depth: u32,
    locks: Arc<Mutex<HashMap<i32, Arc<tokio::sync::Mutex<()>>>>>,
}

impl GameService {
    /// Creates a new game service.
    #[instrument(skip(repository, engine, retry_policy))]
    pub fn new(
        repository: GameRepository,
        engine: Arc<dyn MoveEngine>,
        retry_policy: RetryPolicy,
        move_time_ms: u64,
        analysis_depth: u32,
    ) -> Self {
        info!(move_time_ms, analysis_depth, "Creating GameService");
        Self {
            repository,
            engine,
            retry_policy,
            move_time_ms,
            analysis_depth,
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Returns the underlying repository.
    pub fn repository(&self) -> &GameRepository {
        &self.repository
    }

    /// Per-game serialization point: all read-modify-write operations on one
    /// game id go through the same async mutex.
    fn lock_for(&self, game_id: i32) -> Arc<tokio::sync::Mutex<()>> {
        let mut map = self
            .locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        map.entry(game_id).or_default().clone()
    }

    /// Creates a game plus its initial session at the standard starting
    /// position with an empty move log.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Database`] if persistence fails.
    #[instrument(skip(self))]
    pub fn create_game(
        &self,
        white_player: Option<i32>,
        opponent: Opponent,
    ) -> Result<(Game, GameSession), ServiceError> {
        let status = GameStatus::InProgress.to_db_string().to_string();
        let new_game = match opponent {
            Opponent::Human(black) => NewGame::new(white_player, Some(black), None, status),
            Opponent::Bot { skill } => NewGame::new(white_player, None, Some(skill), status),
        };

        let game = self.repository.create_game(new_game)?;
        let session = self.repository.create_session(NewGameSession::new(
            *game.id(),
            position::starting_fen(),
            "[]".to_string(),
        ))?;

        info!(game_id = game.id(), bot = game.is_bot_game(), "Game created");
        Ok((game, session))
    }

    /// Gets a game by id.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::NotFound`] if the game does not exist.
    #[instrument(skip(self))]
    pub fn get_game(&self, game_id: i32) -> Result<Game, ServiceError> {
        self.repository
            .get_game(game_id)?
            .ok_or_else(|| ServiceError::NotFound(format!("Game {} not found", game_id)))
    }

    /// Gets the authoritative session for a game.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::NotFound`] if the game has no session.
    #[instrument(skip(self))]
    pub fn get_session(&self, game_id: i32) -> Result<GameSession, ServiceError> {
        self.repository
            .current_session(game_id)?
            .ok_or_else(|| ServiceError::NotFound(format!("No session for game {}", game_id)))
    }

    /// Submits a move. Validates it against the actual current position,
    /// persists the ply, evaluates termination, and triggers a bot reply when
    /// it is the engine's turn. Engine trouble (timeout, no move, unplayable
    /// move) degrades to "no bot reply" - the player's ply stands.
    ///
    /// # Errors
    ///
    /// `NotFound` for a missing game or session, `InvalidState` once the game
    /// is over, `InvalidMove` for malformed or illegal input, `CorruptState`
    /// when stored state violates the session invariant.
    #[instrument(skip(self, move_uci), fields(mv = %move_uci))]
    pub async fn make_move(
        &self,
        game_id: i32,
        move_uci: &str,
        player_id: Option<i32>,
    ) -> Result<MoveOutcome, ServiceError> {
        let lock = self.lock_for(game_id);
        let _guard = lock.lock().await;

        let game = self.get_game(game_id)?;
        if game.parse_status()? != GameStatus::InProgress {
            return Err(ServiceError::InvalidState(
                "Game is not in progress".to_string(),
            ));
        }
        let session = self.get_session(game_id)?;

        let pos = position::parse_fen(session.current_fen()).map_err(|e| {
            ServiceError::CorruptState(format!("Stored position does not parse: {}", e))
        })?;
        debug!(
            legal_count = position::legal_moves(&pos).len(),
            "Validating move"
        );
        let mv = position::parse_move(&pos, move_uci)
            .map_err(|e| ServiceError::InvalidMove(e.to_string()))?;
        if let Some(player) = player_id {
            debug!(player, "Move submitted by player");
        }

        let mut history = session.parse_moves().map_err(|e| {
            ServiceError::InvalidData(format!("Stored move history does not parse: {}", e))
        })?;

        let mover = position::turn(&pos);
        let mut current = position::apply(pos, &mv);
        let mut fen = position::fen_string(&current);
        history.push(position::uci_string(&mv));

        // The player's ply must be durable even if nothing else resolves.
        self.repository
            .update_session(*session.id(), &fen, &encode_moves(&history)?)?;

        if let Some(status) = self.check_termination(game_id, &current, &history, mover)? {
            return Ok(MoveOutcome {
                message: format!("Game ended: {}", status.to_db_string()),
                fen,
                status,
                bot_move: None,
                move_history: history,
            });
        }

        let mut bot_move = None;
        if game.is_bot_game() && position::turn(&current) == Color::Black {
            if let Some(reply_uci) = self.request_bot_move(&fen, *game.bot_difficulty()).await {
                match position::parse_move(&current, &reply_uci) {
                    Ok(reply) => {
                        current = position::apply(current, &reply);
                        fen = position::fen_string(&current);
                        let canonical = position::uci_string(&reply);
                        history.push(canonical.clone());
                        self.repository.update_session(
                            *session.id(),
                            &fen,
                            &encode_moves(&history)?,
                        )?;
                        bot_move = Some(canonical);

                        // A bot reply can itself end the game.
                        if let Some(status) =
                            self.check_termination(game_id, &current, &history, Color::Black)?
                        {
                            return Ok(MoveOutcome {
                                message: format!("Game ended: {}", status.to_db_string()),
                                fen,
                                status,
                                bot_move,
                                move_history: history,
                            });
                        }
                    }
                    Err(e) => {
                        warn!(
                            reply = %reply_uci,
                            error = %e,
                            "Engine produced an unplayable move; continuing without a bot reply"
                        );
                    }
                }
            }
        }

        Ok(MoveOutcome {
            message: "Move successful".to_string(),
            fen,
            status: GameStatus::InProgress,
            bot_move,
            move_history: history,
        })
    }

    /// Undoes the last `count` moves by replaying the remaining log from the
    /// starting position. Undoing from a finished game unconditionally
    /// returns it to in-progress and clears the end timestamp and record.
    ///
    /// # Errors
    ///
    /// `NotFound` for a missing game or session, `InvalidState` when fewer
    /// than `count` moves were played, `CorruptState` when a logged move no
    /// longer replays.
    #[instrument(skip(self))]
    pub async fn undo_moves(
        &self,
        game_id: i32,
        count: usize,
    ) -> Result<UndoOutcome, ServiceError> {
        let lock = self.lock_for(game_id);
        let _guard = lock.lock().await;

        if count == 0 {
            return Err(ServiceError::InvalidState(
                "Must undo at least one move".to_string(),
            ));
        }

        let game = self.get_game(game_id)?;
        let session = self.get_session(game_id)?;

        let history = session.parse_moves().map_err(|e| {
            ServiceError::InvalidData(format!("Stored move history does not parse: {}", e))
        })?;
        if history.len() < count {
            return Err(ServiceError::InvalidState(format!(
                "Not enough moves to undo; only {} played",
                history.len()
            )));
        }

        let truncated = history[..history.len() - count].to_vec();
        let rebuilt = position::replay(&truncated)
            .map_err(|e| ServiceError::CorruptState(e.to_string()))?;
        let fen = position::fen_string(&rebuilt);

        self.repository
            .update_session(*session.id(), &fen, &encode_moves(&truncated)?)?;

        if game.parse_status()?.is_terminal() {
            self.repository.reopen_game(game_id)?;
        }

        info!(game_id, count, "Moves undone");
        Ok(UndoOutcome {
            message: format!("Undid {} move(s)", count),
            fen,
            status: GameStatus::InProgress,
            move_history: truncated,
        })
    }

    /// Analyzes the game's current position with the engine.
    ///
    /// # Errors
    ///
    /// `NotFound` for a missing session, `Engine` if the engine stays
    /// unavailable through the retry policy.
    #[instrument(skip(self))]
    pub async fn analyze(
        &self,
        game_id: i32,
        depth: Option<u32>,
    ) -> Result<Analysis, ServiceError> {
        let session = self.get_session(game_id)?;
        let depth = depth.unwrap_or(self.analysis_depth);

        let analysis = retry::retry(&self.retry_policy, "engine analyze", || {
            self.engine.analyze(session.current_fen(), depth)
        })
        .await?;

        Ok(analysis)
    }

    /// Asks the engine for the best move in the game's current position,
    /// with an evaluation.
    ///
    /// # Errors
    ///
    /// `NotFound` for a missing session, `InvalidState` when the position has
    /// no legal moves, `Engine` if the engine stays unavailable.
    #[instrument(skip(self))]
    pub async fn suggest_move(&self, game_id: i32) -> Result<Suggestion, ServiceError> {
        let session = self.get_session(game_id)?;
        let fen = session.current_fen();

        let best = retry::retry(&self.retry_policy, "engine best_move", || {
            self.engine.best_move(fen, None, self.move_time_ms)
        })
        .await?;
        let Some(suggested_move) = best else {
            return Err(ServiceError::InvalidState(
                "No legal moves available".to_string(),
            ));
        };

        let analysis = retry::retry(&self.retry_policy, "engine analyze", || {
            self.engine.analyze(fen, SUGGESTION_DEPTH)
        })
        .await?;

        Ok(Suggestion {
            suggested_move,
            evaluation: analysis.score().clone(),
            depth: *analysis.depth(),
        })
    }

    /// Evaluates terminal conditions on `pos` and, if the game is over,
    /// persists status, end timestamp, and game record together.
    fn check_termination(
        &self,
        game_id: i32,
        pos: &Chess,
        history: &[String],
        mover: Color,
    ) -> Result<Option<GameStatus>, ServiceError> {
        let verdict = position::terminal_state(pos, history)
            .map_err(|e| ServiceError::CorruptState(e.to_string()))?;
        let Some(kind) = verdict else {
            return Ok(None);
        };

        let status = match kind {
            TerminalState::Checkmate => {
                if mover == Color::White {
                    GameStatus::WhiteWon
                } else {
                    GameStatus::BlackWon
                }
            }
            TerminalState::Stalemate
            | TerminalState::InsufficientMaterial
            | TerminalState::Repetition
            | TerminalState::MoveLimit => GameStatus::Draw,
        };

        let pgn = position::pgn_from_history(history, status.result_token())
            .map_err(|e| ServiceError::CorruptState(e.to_string()))?;
        self.repository.finish_game(game_id, status, &pgn)?;

        info!(
            game_id,
            outcome = status.to_db_string(),
            reason = %kind,
            "Game ended"
        );
        Ok(Some(status))
    }

    /// Requests a bot reply, retrying per policy. Every failure mode (no
    /// move, timeout, engine missing) collapses to `None`: a move submission
    /// must not fail because the bot could not answer.
    async fn request_bot_move(&self, fen: &str, skill: Option<i32>) -> Option<String> {
        let result = retry::retry(&self.retry_policy, "engine best_move", || {
            self.engine.best_move(fen, skill, self.move_time_ms)
        })
        .await;

        match result {
            Ok(Some(reply)) => Some(reply),
            Ok(None) => {
                warn!("Engine reported no legal reply");
                None
            }
            Err(e) => {
                warn!(error = %e, "Engine unavailable; move stands without a bot reply");
                None
            }
        }
    }
}
