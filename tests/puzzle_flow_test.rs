//! End-to-end tests for puzzle solving and statistics.

use tempfile::NamedTempFile;

use chess_academy::{
    Difficulty, GameRepository, PuzzleRepository, PuzzleService, ServiceError,
};

fn setup() -> (NamedTempFile, PuzzleService, PuzzleRepository) {
    let db_file = NamedTempFile::new().expect("Failed to create temp file");
    let db_path = db_file.path().to_str().expect("Invalid path").to_string();

    GameRepository::new(db_path.clone())
        .run_migrations()
        .expect("Migrations failed");

    let repository = PuzzleRepository::new(db_path);
    let service = PuzzleService::new(repository.clone());
    (db_file, service, repository)
}

const START_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

fn moves(list: &[&str]) -> Vec<String> {
    list.iter().map(|m| m.to_string()).collect()
}

fn two_move_puzzle(service: &PuzzleService) -> i32 {
    let puzzle = service
        .create_puzzle(
            START_FEN,
            &moves(&["e2e4", "e7e5"]),
            Difficulty::Easy,
            Some("opening".to_string()),
            None,
        )
        .expect("create puzzle");
    *puzzle.id()
}

#[test]
fn create_puzzle_rejects_bad_content() {
    let (_db, service, _) = setup();

    let err = service
        .create_puzzle("not a fen", &moves(&["e2e4"]), Difficulty::Easy, None, None)
        .expect_err("bad fen must fail");
    assert!(matches!(err, ServiceError::InvalidData(_)));

    let err = service
        .create_puzzle(START_FEN, &[], Difficulty::Easy, None, None)
        .expect_err("empty solution must fail");
    assert!(matches!(err, ServiceError::InvalidData(_)));

    let err = service
        .create_puzzle(
            START_FEN,
            &moves(&["e2e4", "e2e4"]),
            Difficulty::Easy,
            None,
            None,
        )
        .expect_err("unplayable solution must fail");
    assert!(matches!(err, ServiceError::InvalidData(_)));
}

#[test]
fn attempt_on_missing_puzzle_is_not_found() {
    let (_db, service, _) = setup();
    let err = service
        .attempt(999, "e2e4", None, None)
        .expect_err("missing puzzle must fail");
    assert!(matches!(err, ServiceError::NotFound(_)));
}

#[test]
fn correct_sequence_completes_the_puzzle() {
    let (_db, service, _) = setup();
    let puzzle_id = two_move_puzzle(&service);

    let first = service
        .attempt(puzzle_id, "e2e4", Some(7), None)
        .expect("attempt");
    assert!(*first.correct());
    assert!(!*first.is_complete());
    assert_eq!(first.next_move().as_deref(), Some("e7e5"));

    let second = service
        .attempt(puzzle_id, "e7e5", Some(7), None)
        .expect("attempt");
    assert!(*second.correct());
    assert!(*second.is_complete());
    assert!(second.next_move().is_none());

    let again = service
        .attempt(puzzle_id, "e2e4", Some(7), None)
        .expect("attempt");
    assert!(!*again.correct());
    assert!(*again.is_complete());
    assert_eq!(again.message(), "Puzzle already solved");
}

#[test]
fn wrong_move_does_not_advance_progress() {
    let (_db, service, repository) = setup();
    let puzzle_id = two_move_puzzle(&service);

    let outcome = service
        .attempt(puzzle_id, "d2d4", Some(8), None)
        .expect("attempt");
    assert!(!*outcome.correct());
    assert!(!*outcome.is_complete());
    assert_eq!(outcome.message(), "Incorrect move. Try again!");

    let stat = repository
        .get_stat(8, puzzle_id)
        .expect("query")
        .expect("stat row created");
    assert_eq!(*stat.failed_count(), 1);
    assert_eq!(*stat.solved_count(), 0);
    assert_eq!(*stat.progress(), 0);

    // The expected move is still the first one.
    let retry = service
        .attempt(puzzle_id, "e2e4", Some(8), None)
        .expect("attempt");
    assert!(*retry.correct());
    assert_eq!(retry.next_move().as_deref(), Some("e7e5"));
}

#[test]
fn deviation_then_prefix_replays_deterministically() {
    let (_db, service, _) = setup();
    let puzzle_id = two_move_puzzle(&service);

    let opening = service
        .attempt(puzzle_id, "e2e4", Some(11), None)
        .expect("attempt");
    assert!(*opening.correct());

    // Deviates at the second step; progress stays at one.
    let deviation = service
        .attempt(puzzle_id, "g8f6", Some(11), None)
        .expect("attempt");
    assert!(!*deviation.correct());

    // The second solution move is still what completes the puzzle.
    let done = service
        .attempt(puzzle_id, "e7e5", Some(11), None)
        .expect("attempt");
    assert!(*done.correct());
    assert!(*done.is_complete());
}

#[test]
fn anonymous_attempts_record_nothing() {
    let (_db, service, repository) = setup();
    let puzzle_id = two_move_puzzle(&service);

    let outcome = service
        .attempt(puzzle_id, "e2e4", None, None)
        .expect("attempt");
    assert!(*outcome.correct());

    // Anonymous progress is not persisted: the first move is expected again.
    let again = service
        .attempt(puzzle_id, "e2e4", None, None)
        .expect("attempt");
    assert!(*again.correct());
    assert_eq!(again.next_move().as_deref(), Some("e7e5"));

    assert!(repository.get_stat(0, puzzle_id).expect("query").is_none());
}

#[test]
fn malformed_move_is_reported_in_band_without_stats() {
    let (_db, service, repository) = setup();
    let puzzle_id = two_move_puzzle(&service);

    let outcome = service
        .attempt(puzzle_id, "bishop takes", Some(5), None)
        .expect("attempt");
    assert!(!*outcome.correct());
    assert_eq!(outcome.message(), "Invalid move format");
    assert!(!*outcome.is_complete());

    assert!(
        repository.get_stat(5, puzzle_id).expect("query").is_none(),
        "a malformed submission is not an attempt"
    );
}

#[test]
fn completion_records_best_time() {
    let (_db, service, repository) = setup();
    let puzzle_id = two_move_puzzle(&service);

    service
        .attempt(puzzle_id, "e2e4", Some(9), None)
        .expect("attempt");
    service
        .attempt(puzzle_id, "e7e5", Some(9), Some(42.5))
        .expect("attempt");

    let stat = repository
        .get_stat(9, puzzle_id)
        .expect("query")
        .expect("stat exists");
    assert_eq!(*stat.best_time_seconds(), Some(42.5));
}

#[test]
fn stats_aggregate_solved_and_failed() {
    let (_db, service, _) = setup();
    let easy_id = two_move_puzzle(&service);
    let hard = service
        .create_puzzle(
            START_FEN,
            &moves(&["d2d4"]),
            Difficulty::Hard,
            None,
            None,
        )
        .expect("create puzzle");

    // Solve the easy puzzle in two correct moves, fail the hard one once.
    service.attempt(easy_id, "e2e4", Some(4), None).expect("attempt");
    service.attempt(easy_id, "e7e5", Some(4), None).expect("attempt");
    service
        .attempt(*hard.id(), "g1f3", Some(4), None)
        .expect("attempt");

    let summary = service.user_stats(4).expect("stats");
    assert_eq!(*summary.total_solved(), 2);
    assert_eq!(*summary.total_failed(), 1);
    assert_eq!(*summary.success_rate(), 66.67);

    let by_difficulty = summary.puzzles_by_difficulty();
    assert_eq!(*by_difficulty["easy"].solved(), 2);
    assert_eq!(*by_difficulty["hard"].failed(), 1);
}

#[test]
fn random_puzzle_honours_difficulty() {
    let (_db, service, _) = setup();
    two_move_puzzle(&service);

    let puzzle = service.random_puzzle(Some(Difficulty::Easy)).expect("random");
    assert_eq!(puzzle.parse_difficulty().expect("difficulty"), Difficulty::Easy);

    let err = service
        .random_puzzle(Some(Difficulty::Expert))
        .expect_err("no expert puzzles");
    assert!(matches!(err, ServiceError::NotFound(_)));
}
