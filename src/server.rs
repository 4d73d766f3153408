//! REST API surface over the game and puzzle services.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tracing::{error, instrument, warn};

use crate::db::{Difficulty, Game, GameSession, Puzzle, UserPuzzleSummary};
use crate::error::ServiceError;
use crate::game_service::{GameService, Opponent};
use crate::puzzle_service::PuzzleService;

/// Default engine skill for bot games when the caller does not pick one.
const DEFAULT_BOT_SKILL: i32 = 10;

/// Shared handler state: the services, constructed once at startup.
#[derive(Clone)]
pub struct AppState {
    /// Game orchestration service.
    pub games: Arc<GameService>,
    /// Puzzle solving service.
    pub puzzles: Arc<PuzzleService>,
}

/// Error surfaced to HTTP callers.
#[derive(Debug)]
pub enum ApiError {
    /// A service-layer failure, mapped by kind.
    Service(ServiceError),
    /// The request itself is malformed.
    BadRequest(String),
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        Self::Service(err)
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    detail: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match self {
            ApiError::BadRequest(message) => {
                warn!(%message, "Bad request");
                (StatusCode::BAD_REQUEST, message)
            }
            ApiError::Service(err) => match &err {
                ServiceError::NotFound(message) => {
                    warn!(%message, "Not found");
                    (StatusCode::NOT_FOUND, message.clone())
                }
                ServiceError::InvalidState(message) | ServiceError::InvalidMove(message) => {
                    warn!(%message, "Rejected request");
                    (StatusCode::BAD_REQUEST, message.clone())
                }
                ServiceError::InvalidData(message) => {
                    error!(%message, "Unparseable persisted content");
                    (StatusCode::UNPROCESSABLE_ENTITY, message.clone())
                }
                ServiceError::CorruptState(message) => {
                    error!(%message, "State corruption detected");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "Internal state corruption detected".to_string(),
                    )
                }
                ServiceError::Database(db) => {
                    error!(error = %db, "Database failure");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "Internal server error".to_string(),
                    )
                }
                ServiceError::Engine(engine) => {
                    error!(error = %engine, "Engine failure");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "Engine unavailable".to_string(),
                    )
                }
            },
        };
        (status, Json(ErrorBody { detail })).into_response()
    }
}

// ---- Request/response shapes ----

/// Request to create a game.
#[derive(Debug, Deserialize)]
struct CreateGameRequest {
    white_player_id: Option<i32>,
    black_player_id: Option<i32>,
    #[serde(default)]
    is_bot_game: bool,
    bot_difficulty: Option<i32>,
}

#[derive(Debug, Serialize)]
struct GameDto {
    id: i32,
    white_player_id: Option<i32>,
    black_player_id: Option<i32>,
    bot_difficulty: Option<i32>,
    pgn: Option<String>,
    status: String,
    started_at: NaiveDateTime,
    ended_at: Option<NaiveDateTime>,
}

impl From<&Game> for GameDto {
    fn from(game: &Game) -> Self {
        Self {
            id: *game.id(),
            white_player_id: *game.white_player_id(),
            black_player_id: *game.black_player_id(),
            bot_difficulty: *game.bot_difficulty(),
            pgn: game.pgn().clone(),
            status: game.status().clone(),
            started_at: *game.started_at(),
            ended_at: *game.ended_at(),
        }
    }
}

#[derive(Debug, Serialize)]
struct SessionDto {
    id: i32,
    game_id: i32,
    current_fen: String,
    move_history: Vec<String>,
    last_move_at: NaiveDateTime,
    created_at: NaiveDateTime,
}

#[derive(Debug, Deserialize)]
struct MoveRequest {
    game_id: i32,
    #[serde(rename = "move")]
    mv: String,
    player_id: Option<i32>,
}

#[derive(Debug, Serialize)]
struct MoveResponse {
    success: bool,
    message: String,
    new_fen: String,
    game_status: String,
    bot_move: Option<String>,
    move_history: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct AnalyzeRequest {
    depth: Option<u32>,
}

#[derive(Debug, Serialize)]
struct AnalyzeResponse {
    score: String,
    depth: u32,
    best_moves: Vec<String>,
    nodes: u64,
    time_ms: u64,
}

#[derive(Debug, Serialize)]
struct SuggestResponse {
    suggested_move: String,
    evaluation: String,
    depth: u32,
}

#[derive(Debug, Deserialize)]
struct UndoQuery {
    #[serde(default = "default_undo_count")]
    num_moves: usize,
}

fn default_undo_count() -> usize {
    1
}

#[derive(Debug, Serialize)]
struct UndoResponse {
    success: bool,
    message: String,
    new_fen: String,
    game_status: String,
    move_history: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct CreatePuzzleRequest {
    fen: String,
    solution: Vec<String>,
    difficulty: String,
    theme: Option<String>,
    description: Option<String>,
}

#[derive(Debug, Serialize)]
struct PuzzleDto {
    id: i32,
    fen: String,
    solution: Vec<String>,
    difficulty: String,
    theme: Option<String>,
    description: Option<String>,
    created_at: NaiveDateTime,
}

#[derive(Debug, Deserialize)]
struct RandomPuzzleQuery {
    difficulty: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AttemptRequest {
    puzzle_id: i32,
    #[serde(rename = "move")]
    mv: String,
    user_id: Option<i32>,
    time_seconds: Option<f64>,
}

#[derive(Debug, Serialize)]
struct AttemptResponse {
    correct: bool,
    message: String,
    next_move: Option<String>,
    is_complete: bool,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    database: bool,
}

// ---- Handlers ----

#[instrument(skip(state))]
async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let database = state.games.repository().check_connection();
    Json(HealthResponse {
        status: if database { "ok" } else { "degraded" },
        database,
    })
}

#[instrument(skip(state, req))]
async fn create_game(
    State(state): State<AppState>,
    Json(req): Json<CreateGameRequest>,
) -> Result<(StatusCode, Json<GameDto>), ApiError> {
    let opponent = if req.is_bot_game {
        let skill = req.bot_difficulty.unwrap_or(DEFAULT_BOT_SKILL);
        if !(0..=20).contains(&skill) {
            return Err(ApiError::bad_request("bot_difficulty must be between 0 and 20"));
        }
        Opponent::Bot { skill }
    } else {
        match req.black_player_id {
            Some(black) => Opponent::Human(black),
            None => {
                return Err(ApiError::bad_request(
                    "A game without a bot opponent requires a black player",
                ));
            }
        }
    };

    let (game, _session) = state.games.create_game(req.white_player_id, opponent)?;
    Ok((StatusCode::CREATED, Json(GameDto::from(&game))))
}

#[instrument(skip(state))]
async fn get_game(
    State(state): State<AppState>,
    Path(game_id): Path<i32>,
) -> Result<Json<GameDto>, ApiError> {
    let game = state.games.get_game(game_id)?;
    Ok(Json(GameDto::from(&game)))
}

#[instrument(skip(state))]
async fn get_game_session(
    State(state): State<AppState>,
    Path(game_id): Path<i32>,
) -> Result<Json<SessionDto>, ApiError> {
    let session = state.games.get_session(game_id)?;
    Ok(Json(session_dto(&session)?))
}

fn session_dto(session: &GameSession) -> Result<SessionDto, ApiError> {
    let move_history = session.parse_moves().map_err(|e| {
        ApiError::Service(ServiceError::InvalidData(format!(
            "Stored move history does not parse: {}",
            e
        )))
    })?;
    Ok(SessionDto {
        id: *session.id(),
        game_id: *session.game_id(),
        current_fen: session.current_fen().clone(),
        move_history,
        last_move_at: *session.last_move_at(),
        created_at: *session.created_at(),
    })
}

#[instrument(skip(state, req))]
async fn make_move(
    State(state): State<AppState>,
    Json(req): Json<MoveRequest>,
) -> Result<Json<MoveResponse>, ApiError> {
    let outcome = state
        .games
        .make_move(req.game_id, &req.mv, req.player_id)
        .await?;

    Ok(Json(MoveResponse {
        success: true,
        message: outcome.message().clone(),
        new_fen: outcome.fen().clone(),
        game_status: outcome.status().to_db_string().to_string(),
        bot_move: outcome.bot_move().clone(),
        move_history: outcome.move_history().clone(),
    }))
}

#[instrument(skip(state, req))]
async fn analyze_position(
    State(state): State<AppState>,
    Path(game_id): Path<i32>,
    Json(req): Json<AnalyzeRequest>,
) -> Result<Json<AnalyzeResponse>, ApiError> {
    if let Some(depth) = req.depth {
        if !(1..=30).contains(&depth) {
            return Err(ApiError::bad_request("depth must be between 1 and 30"));
        }
    }

    let analysis = state.games.analyze(game_id, req.depth).await?;
    Ok(Json(AnalyzeResponse {
        score: analysis.score().clone(),
        depth: *analysis.depth(),
        best_moves: analysis.pv().clone(),
        nodes: *analysis.nodes(),
        time_ms: *analysis.time_ms(),
    }))
}

#[instrument(skip(state))]
async fn suggest_move(
    State(state): State<AppState>,
    Path(game_id): Path<i32>,
) -> Result<Json<SuggestResponse>, ApiError> {
    let suggestion = state.games.suggest_move(game_id).await?;
    Ok(Json(SuggestResponse {
        suggested_move: suggestion.suggested_move().clone(),
        evaluation: suggestion.evaluation().clone(),
        depth: *suggestion.depth(),
    }))
}

#[instrument(skip(state))]
async fn undo_moves(
    State(state): State<AppState>,
    Path(game_id): Path<i32>,
    Query(query): Query<UndoQuery>,
) -> Result<Json<UndoResponse>, ApiError> {
    if !(1..=10).contains(&query.num_moves) {
        return Err(ApiError::bad_request("num_moves must be between 1 and 10"));
    }

    let outcome = state.games.undo_moves(game_id, query.num_moves).await?;
    Ok(Json(UndoResponse {
        success: true,
        message: outcome.message().clone(),
        new_fen: outcome.fen().clone(),
        game_status: outcome.status().to_db_string().to_string(),
        move_history: outcome.move_history().clone(),
    }))
}

#[instrument(skip(state, req))]
async fn create_puzzle(
    State(state): State<AppState>,
    Json(req): Json<CreatePuzzleRequest>,
) -> Result<(StatusCode, Json<PuzzleDto>), ApiError> {
    let difficulty = parse_difficulty(&req.difficulty)?;
    let puzzle = state.puzzles.create_puzzle(
        &req.fen,
        &req.solution,
        difficulty,
        req.theme,
        req.description,
    )?;
    Ok((StatusCode::CREATED, Json(puzzle_dto(&puzzle)?)))
}

#[instrument(skip(state))]
async fn random_puzzle(
    State(state): State<AppState>,
    Query(query): Query<RandomPuzzleQuery>,
) -> Result<Json<PuzzleDto>, ApiError> {
    let difficulty = query
        .difficulty
        .as_deref()
        .map(parse_difficulty)
        .transpose()?;
    let puzzle = state.puzzles.random_puzzle(difficulty)?;
    Ok(Json(puzzle_dto(&puzzle)?))
}

#[instrument(skip(state))]
async fn get_puzzle(
    State(state): State<AppState>,
    Path(puzzle_id): Path<i32>,
) -> Result<Json<PuzzleDto>, ApiError> {
    let puzzle = state.puzzles.get_puzzle(puzzle_id)?;
    Ok(Json(puzzle_dto(&puzzle)?))
}

fn parse_difficulty(raw: &str) -> Result<Difficulty, ApiError> {
    Difficulty::from_db_string(raw).map_err(|_| {
        ApiError::bad_request("difficulty must be one of easy, medium, hard, expert")
    })
}

fn puzzle_dto(puzzle: &Puzzle) -> Result<PuzzleDto, ApiError> {
    let solution = puzzle.parse_solution().map_err(|e| {
        ApiError::Service(ServiceError::InvalidData(format!(
            "Puzzle solution does not parse: {}",
            e
        )))
    })?;
    Ok(PuzzleDto {
        id: *puzzle.id(),
        fen: puzzle.fen().clone(),
        solution,
        difficulty: puzzle.difficulty().clone(),
        theme: puzzle.theme().clone(),
        description: puzzle.description().clone(),
        created_at: *puzzle.created_at(),
    })
}

#[instrument(skip(state, req))]
async fn attempt_puzzle(
    State(state): State<AppState>,
    Json(req): Json<AttemptRequest>,
) -> Result<Json<AttemptResponse>, ApiError> {
    let outcome = state
        .puzzles
        .attempt(req.puzzle_id, &req.mv, req.user_id, req.time_seconds)?;

    Ok(Json(AttemptResponse {
        correct: *outcome.correct(),
        message: outcome.message().clone(),
        next_move: outcome.next_move().clone(),
        is_complete: *outcome.is_complete(),
    }))
}

#[instrument(skip(state))]
async fn user_stats(
    State(state): State<AppState>,
    Path(user_id): Path<i32>,
) -> Result<Json<UserPuzzleSummary>, ApiError> {
    let summary = state.puzzles.user_stats(user_id)?;
    Ok(Json(summary))
}

/// Builds the API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/games", post(create_game))
        .route("/api/games/{id}", get(get_game))
        .route("/api/games/{id}/session", get(get_game_session))
        .route("/api/games/move", post(make_move))
        .route("/api/games/{id}/analyze", post(analyze_position))
        .route("/api/games/{id}/suggest-move", post(suggest_move))
        .route("/api/games/{id}/undo", post(undo_moves))
        .route("/api/puzzles", post(create_puzzle))
        .route("/api/puzzles/random", get(random_puzzle))
        .route("/api/puzzles/{id}", get(get_puzzle))
        .route("/api/puzzles/attempt", post(attempt_puzzle))
        .route("/api/puzzles/stats/{user_id}", get(user_stats))
        .with_state(state)
}
