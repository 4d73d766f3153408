//! End-to-end tests for game orchestration with a scripted engine.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::NamedTempFile;

use chess_academy::{
    AbandonStaleGames, Analysis, EngineError, GameRepository, GameService, GameStatus, MoveEngine,
    Opponent, RetryPolicy, ScheduledTask, ServiceError, position,
};

/// Engine fake that replies with a fixed script of moves.
struct ScriptedEngine {
    replies: Mutex<VecDeque<String>>,
}

impl ScriptedEngine {
    fn new(replies: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.iter().map(|m| m.to_string()).collect()),
        })
    }
}

#[async_trait]
impl MoveEngine for ScriptedEngine {
    async fn best_move(
        &self,
        _fen: &str,
        _skill: Option<i32>,
        _time_ms: u64,
    ) -> Result<Option<String>, EngineError> {
        Ok(self.replies.lock().expect("lock").pop_front())
    }

    async fn analyze(&self, _fen: &str, depth: u32) -> Result<Analysis, EngineError> {
        Ok(Analysis::new(
            "cp 25".to_string(),
            depth,
            vec!["e2e4".to_string()],
            1_000,
            5,
        ))
    }
}

/// Engine fake that is permanently broken.
struct FailingEngine;

#[async_trait]
impl MoveEngine for FailingEngine {
    async fn best_move(
        &self,
        _fen: &str,
        _skill: Option<i32>,
        _time_ms: u64,
    ) -> Result<Option<String>, EngineError> {
        Err(EngineError::new("engine exploded"))
    }

    async fn analyze(&self, _fen: &str, _depth: u32) -> Result<Analysis, EngineError> {
        Err(EngineError::new("engine exploded"))
    }
}

fn service_with(engine: Arc<dyn MoveEngine>) -> (NamedTempFile, GameService) {
    let db_file = NamedTempFile::new().expect("Failed to create temp file");
    let db_path = db_file.path().to_str().expect("Invalid path").to_string();

    let repository = GameRepository::new(db_path);
    repository.run_migrations().expect("Migrations failed");

    let service = GameService::new(repository, engine, RetryPolicy::immediate(2), 100, 10);
    (db_file, service)
}

const FOOLS_MATE: [&str; 4] = ["f2f3", "e7e5", "g2g4", "d8h4"];

#[tokio::test]
async fn create_game_starts_at_initial_position() {
    let (_db, service) = service_with(ScriptedEngine::new(&[]));

    let (game, session) = service
        .create_game(Some(1), Opponent::Bot { skill: 5 })
        .expect("create");

    assert!(game.is_bot_game());
    assert_eq!(*game.bot_difficulty(), Some(5));
    assert_eq!(game.parse_status().expect("status"), GameStatus::InProgress);
    assert_eq!(session.current_fen(), &position::starting_fen());
    assert!(session.parse_moves().expect("moves").is_empty());
}

#[tokio::test]
async fn human_move_gets_bot_reply() {
    let (_db, service) = service_with(ScriptedEngine::new(&["e7e5"]));
    let (game, _) = service
        .create_game(Some(1), Opponent::Bot { skill: 5 })
        .expect("create");

    let outcome = service
        .make_move(*game.id(), "e2e4", Some(1))
        .await
        .expect("move");

    assert_eq!(outcome.bot_move().as_deref(), Some("e7e5"));
    assert_eq!(*outcome.status(), GameStatus::InProgress);
    assert_eq!(
        outcome.move_history(),
        &vec!["e2e4".to_string(), "e7e5".to_string()]
    );

    // Session invariant: the stored position is exactly the replayed log.
    let session = service.get_session(*game.id()).expect("session");
    assert_eq!(session.current_fen(), outcome.fen());
    let replayed = position::replay(&session.parse_moves().expect("moves")).expect("replay");
    assert_eq!(&position::fen_string(&replayed), session.current_fen());
}

#[tokio::test]
async fn illegal_move_leaves_state_unchanged() {
    let (_db, service) = service_with(ScriptedEngine::new(&["e7e5"]));
    let (game, _) = service
        .create_game(Some(1), Opponent::Bot { skill: 5 })
        .expect("create");

    let err = service
        .make_move(*game.id(), "e2e5", Some(1))
        .await
        .expect_err("illegal move must fail");
    assert!(matches!(err, ServiceError::InvalidMove(_)));

    let session = service.get_session(*game.id()).expect("session");
    assert_eq!(session.current_fen(), &position::starting_fen());
    assert!(session.parse_moves().expect("moves").is_empty());
}

#[tokio::test]
async fn malformed_move_is_rejected() {
    let (_db, service) = service_with(ScriptedEngine::new(&[]));
    let (game, _) = service
        .create_game(Some(1), Opponent::Bot { skill: 5 })
        .expect("create");

    let err = service
        .make_move(*game.id(), "knight to f3", None)
        .await
        .expect_err("malformed move must fail");
    assert!(matches!(err, ServiceError::InvalidMove(_)));
}

#[tokio::test]
async fn missing_game_is_not_found() {
    let (_db, service) = service_with(ScriptedEngine::new(&[]));

    let err = service
        .make_move(404, "e2e4", None)
        .await
        .expect_err("missing game must fail");
    assert!(matches!(err, ServiceError::NotFound(_)));
}

#[tokio::test]
async fn human_game_never_triggers_the_bot() {
    // The engine has a reply ready; the predicate must not consult it because
    // a black player is assigned.
    let (_db, service) = service_with(ScriptedEngine::new(&["e7e5"]));
    let (game, _) = service
        .create_game(Some(1), Opponent::Human(2))
        .expect("create");

    let outcome = service
        .make_move(*game.id(), "e2e4", Some(1))
        .await
        .expect("move");

    assert!(outcome.bot_move().is_none());
    assert_eq!(outcome.move_history().len(), 1);
}

#[tokio::test]
async fn checkmate_finishes_the_game() {
    let (_db, service) = service_with(ScriptedEngine::new(&[]));
    let (game, _) = service
        .create_game(Some(1), Opponent::Human(2))
        .expect("create");

    let mut last = None;
    for mv in FOOLS_MATE {
        last = Some(service.make_move(*game.id(), mv, None).await.expect("move"));
    }
    let outcome = last.expect("moves played");

    assert_eq!(*outcome.status(), GameStatus::BlackWon);
    assert_eq!(outcome.message(), "Game ended: black_won");
    assert!(outcome.bot_move().is_none());

    let stored = service.get_game(*game.id()).expect("game");
    assert_eq!(stored.parse_status().expect("status"), GameStatus::BlackWon);
    assert!(stored.ended_at().is_some());
    let pgn = stored.pgn().as_deref().expect("record generated");
    assert!(pgn.contains("Qh4#"));
    assert!(pgn.ends_with("0-1"));
}

#[tokio::test]
async fn finished_game_rejects_moves_without_mutation() {
    let (_db, service) = service_with(ScriptedEngine::new(&[]));
    let (game, _) = service
        .create_game(Some(1), Opponent::Human(2))
        .expect("create");
    for mv in FOOLS_MATE {
        service.make_move(*game.id(), mv, None).await.expect("move");
    }

    let err = service
        .make_move(*game.id(), "a2a3", None)
        .await
        .expect_err("finished game must reject moves");
    assert!(matches!(err, ServiceError::InvalidState(_)));

    let session = service.get_session(*game.id()).expect("session");
    assert_eq!(session.parse_moves().expect("moves").len(), FOOLS_MATE.len());
}

#[tokio::test]
async fn bot_reply_can_finish_the_game() {
    // White walks into the fool's mate; the bot delivers it.
    let (_db, service) = service_with(ScriptedEngine::new(&["e7e5", "d8h4"]));
    let (game, _) = service
        .create_game(Some(1), Opponent::Bot { skill: 20 })
        .expect("create");

    let first = service
        .make_move(*game.id(), "f2f3", Some(1))
        .await
        .expect("move");
    assert_eq!(first.bot_move().as_deref(), Some("e7e5"));
    assert_eq!(*first.status(), GameStatus::InProgress);

    let second = service
        .make_move(*game.id(), "g2g4", Some(1))
        .await
        .expect("move");
    assert_eq!(second.bot_move().as_deref(), Some("d8h4"));
    assert_eq!(*second.status(), GameStatus::BlackWon);

    let stored = service.get_game(*game.id()).expect("game");
    assert!(stored.pgn().is_some());
    assert!(stored.ended_at().is_some());
}

#[tokio::test]
async fn engine_failure_degrades_to_no_bot_reply() {
    let (_db, service) = service_with(Arc::new(FailingEngine));
    let (game, _) = service
        .create_game(Some(1), Opponent::Bot { skill: 5 })
        .expect("create");

    let outcome = service
        .make_move(*game.id(), "e2e4", Some(1))
        .await
        .expect("the human ply must stand");

    assert!(outcome.bot_move().is_none());
    assert_eq!(*outcome.status(), GameStatus::InProgress);
    assert_eq!(outcome.move_history(), &vec!["e2e4".to_string()]);
}

#[tokio::test]
async fn engine_without_a_reply_degrades_too() {
    let (_db, service) = service_with(ScriptedEngine::new(&[]));
    let (game, _) = service
        .create_game(Some(1), Opponent::Bot { skill: 5 })
        .expect("create");

    let outcome = service
        .make_move(*game.id(), "e2e4", Some(1))
        .await
        .expect("move");
    assert!(outcome.bot_move().is_none());
}

#[tokio::test]
async fn undo_removes_exactly_n_plies() {
    let (_db, service) = service_with(ScriptedEngine::new(&["e7e5"]));
    let (game, _) = service
        .create_game(Some(1), Opponent::Bot { skill: 5 })
        .expect("create");
    service
        .make_move(*game.id(), "e2e4", Some(1))
        .await
        .expect("move");

    let outcome = service.undo_moves(*game.id(), 1).await.expect("undo");

    // The bot's reply is gone, white's move remains.
    assert_eq!(outcome.move_history(), &vec!["e2e4".to_string()]);
    let expected = position::replay(&["e2e4".to_string()]).expect("replay");
    assert_eq!(outcome.fen(), &position::fen_string(&expected));

    let session = service.get_session(*game.id()).expect("session");
    assert_eq!(session.current_fen(), outcome.fen());
}

#[tokio::test]
async fn undo_more_than_played_is_rejected() {
    let (_db, service) = service_with(ScriptedEngine::new(&[]));
    let (game, _) = service
        .create_game(Some(1), Opponent::Human(2))
        .expect("create");
    service
        .make_move(*game.id(), "e2e4", None)
        .await
        .expect("move");

    let err = service
        .undo_moves(*game.id(), 2)
        .await
        .expect_err("cannot undo more than played");
    assert!(matches!(err, ServiceError::InvalidState(_)));
}

#[tokio::test]
async fn undo_reopens_a_finished_game() {
    let (_db, service) = service_with(ScriptedEngine::new(&[]));
    let (game, _) = service
        .create_game(Some(1), Opponent::Human(2))
        .expect("create");
    for mv in FOOLS_MATE {
        service.make_move(*game.id(), mv, None).await.expect("move");
    }

    let outcome = service.undo_moves(*game.id(), 1).await.expect("undo");
    assert_eq!(*outcome.status(), GameStatus::InProgress);
    assert_eq!(outcome.move_history().len(), FOOLS_MATE.len() - 1);

    let stored = service.get_game(*game.id()).expect("game");
    assert_eq!(stored.parse_status().expect("status"), GameStatus::InProgress);
    assert!(stored.pgn().is_none());
    assert!(stored.ended_at().is_none());

    // The game accepts moves again, and the mate can be replayed.
    let replayed = service
        .make_move(*game.id(), "d8h4", None)
        .await
        .expect("move");
    assert_eq!(*replayed.status(), GameStatus::BlackWon);
}

#[tokio::test]
async fn analyze_and_suggest_use_the_engine() {
    let (_db, service) = service_with(ScriptedEngine::new(&["g1f3"]));
    let (game, _) = service
        .create_game(Some(1), Opponent::Human(2))
        .expect("create");

    let analysis = service.analyze(*game.id(), Some(12)).await.expect("analyze");
    assert_eq!(*analysis.depth(), 12);
    assert_eq!(analysis.score(), "cp 25");

    let suggestion = service.suggest_move(*game.id()).await.expect("suggest");
    assert_eq!(suggestion.suggested_move(), "g1f3");
}

#[tokio::test]
async fn stale_games_are_abandoned_by_the_maintenance_task() {
    let (_db, service) = service_with(ScriptedEngine::new(&[]));
    let (game, _) = service
        .create_game(Some(1), Opponent::Human(2))
        .expect("create");
    service
        .make_move(*game.id(), "e2e4", None)
        .await
        .expect("move");

    // A negative idle window makes every session count as stale.
    let task = AbandonStaleGames::new(service.repository().clone(), -1);
    task.run().await.expect("task run");

    let stored = service.get_game(*game.id()).expect("game");
    assert_eq!(stored.parse_status().expect("status"), GameStatus::Abandoned);
    assert!(stored.ended_at().is_some());
    let pgn = stored.pgn().as_deref().expect("record written");
    assert!(pgn.ends_with('*'));

    let err = service
        .make_move(*game.id(), "e7e5", None)
        .await
        .expect_err("abandoned game rejects moves");
    assert!(matches!(err, ServiceError::InvalidState(_)));
}

#[tokio::test]
async fn analyze_missing_game_is_not_found() {
    let (_db, service) = service_with(ScriptedEngine::new(&[]));
    let err = service
        .analyze(123, None)
        .await
        .expect_err("missing session must fail");
    assert!(matches!(err, ServiceError::NotFound(_)));
}
