//! Position capability: FEN parsing, move legality, terminal detection, and
//! game record generation on top of the shakmaty rules library.
//!
//! Everything here is pure: positions come in, positions and verdicts come
//! out. Persistence and orchestration live in the service layer.

use derive_more::{Display, Error};
use shakmaty::fen::Fen;
use shakmaty::san::SanPlus;
use shakmaty::uci::UciMove;
use shakmaty::{CastlingMode, EnPassantMode, Position};

pub use shakmaty::{Chess, Color, Move};

/// Error for unparseable or unreplayable position data.
#[derive(Debug, Clone, Display, Error)]
#[display("Position error: {} at {}:{}", message, file, line)]
pub struct PositionError {
    /// Error message.
    pub message: String,
    /// Line number where error occurred.
    pub line: u32,
    /// Source file where error occurred.
    pub file: &'static str,
}

impl PositionError {
    /// Creates a new position error with caller location tracking.
    #[track_caller]
    pub fn new(message: impl Into<String>) -> Self {
        let loc = std::panic::Location::caller();
        Self {
            message: message.into(),
            line: loc.line(),
            file: loc.file(),
        }
    }
}

/// Why a submitted move was rejected.
#[derive(Debug, Clone, Display)]
pub enum MoveError {
    /// The string is not coordinate notation at all.
    #[display("{_0}")]
    Format(String),
    /// Well-formed, but not a legal move in the position.
    #[display("{_0}")]
    Illegal(String),
}

impl std::error::Error for MoveError {}

/// Game-ending condition detectable from a position and its move history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum TerminalState {
    /// Side to move is checkmated.
    #[display("checkmate")]
    Checkmate,
    /// Side to move has no legal move but is not in check.
    #[display("stalemate")]
    Stalemate,
    /// Neither side can deliver mate.
    #[display("insufficient material")]
    InsufficientMaterial,
    /// The position occurred for the third time.
    #[display("threefold repetition")]
    Repetition,
    /// 75 moves without a capture or pawn move.
    #[display("seventy-five-move rule")]
    MoveLimit,
}

/// Returns the canonical chess starting position.
pub fn starting_position() -> Chess {
    Chess::default()
}

/// FEN encoding of the canonical starting position.
pub fn starting_fen() -> String {
    fen_string(&starting_position())
}

/// Parses a FEN encoding into a validated position.
///
/// # Errors
///
/// Returns [`PositionError`] if the string is not FEN or describes an
/// illegal position.
pub fn parse_fen(fen: &str) -> Result<Chess, PositionError> {
    let parsed: Fen = fen
        .parse()
        .map_err(|e| PositionError::new(format!("Unparseable FEN '{}': {}", fen, e)))?;
    parsed
        .into_position(CastlingMode::Standard)
        .map_err(|e| PositionError::new(format!("Illegal position '{}': {}", fen, e)))
}

/// Serializes a position back to FEN. Round-trips exactly through
/// [`parse_fen`], move clocks included.
pub fn fen_string(pos: &Chess) -> String {
    Fen::from_position(pos.clone(), EnPassantMode::Legal).to_string()
}

/// Side to move in the given position.
pub fn turn(pos: &Chess) -> Color {
    pos.turn()
}

/// All legal moves in the position, in canonical coordinate notation.
pub fn legal_moves(pos: &Chess) -> Vec<String> {
    pos.legal_moves().iter().map(uci_string).collect()
}

/// Parses a UCI move string and resolves it against the position's actual
/// legal moves.
///
/// # Errors
///
/// Returns [`MoveError::Format`] for strings that are not coordinate
/// notation, and [`MoveError::Illegal`] for well-formed moves that are not
/// legal in the position.
pub fn parse_move(pos: &Chess, uci: &str) -> Result<Move, MoveError> {
    let parsed = UciMove::from_ascii(uci.trim().as_bytes())
        .map_err(|e| MoveError::Format(format!("Invalid move format '{}': {}", uci, e)))?;
    parsed
        .to_move(pos)
        .map_err(|_| MoveError::Illegal(format!("Move '{}' is not legal in this position", uci)))
}

/// Canonical coordinate notation for a move.
pub fn uci_string(m: &Move) -> String {
    m.to_uci(CastlingMode::Standard).to_string()
}

/// Normalizes a coordinate-notation string without consulting a position.
/// Returns `None` when the string is not coordinate notation at all.
pub fn canonical_uci(uci: &str) -> Option<String> {
    UciMove::from_ascii(uci.trim().as_bytes())
        .ok()
        .map(|parsed| parsed.to_string())
}

/// Advances the position by a move whose legality was already established
/// via [`parse_move`].
pub fn apply(pos: Chess, m: &Move) -> Chess {
    let mut next = pos;
    next.play_unchecked(m);
    next
}

/// Rebuilds a position by replaying a move log from the starting position.
/// This is the undo primitive: moves are never reversed, only replayed.
///
/// # Errors
///
/// Returns [`PositionError`] if any logged move is illegal against the
/// incrementally rebuilt position, which signals a corrupted log.
pub fn replay(moves: &[String]) -> Result<Chess, PositionError> {
    let mut pos = starting_position();
    for (index, uci) in moves.iter().enumerate() {
        let m = parse_move(&pos, uci).map_err(|e| {
            PositionError::new(format!(
                "Logged move {} ('{}') cannot be replayed: {}",
                index + 1,
                uci,
                e
            ))
        })?;
        pos = apply(pos, &m);
    }
    Ok(pos)
}

/// Detects a game-ending condition on `pos`, given the move log that led to
/// it (needed for repetition, which a bare position cannot see).
///
/// # Errors
///
/// Returns [`PositionError`] if the log cannot be replayed.
pub fn terminal_state(
    pos: &Chess,
    history: &[String],
) -> Result<Option<TerminalState>, PositionError> {
    if pos.is_checkmate() {
        return Ok(Some(TerminalState::Checkmate));
    }
    if pos.is_stalemate() {
        return Ok(Some(TerminalState::Stalemate));
    }
    if pos.is_insufficient_material() {
        return Ok(Some(TerminalState::InsufficientMaterial));
    }
    // 75 moves by each side without progress = 150 halfmoves.
    if pos.halfmoves() >= 150 {
        return Ok(Some(TerminalState::MoveLimit));
    }
    if is_threefold(pos, history)? {
        return Ok(Some(TerminalState::Repetition));
    }
    Ok(None)
}

/// Position identity for repetition purposes: placement, side to move,
/// castling rights, and en-passant square. Clocks are excluded.
fn epd(pos: &Chess) -> String {
    let fen = fen_string(pos);
    fen.split_whitespace().take(4).collect::<Vec<_>>().join(" ")
}

fn is_threefold(pos: &Chess, history: &[String]) -> Result<bool, PositionError> {
    let target = epd(pos);
    let mut replayed = starting_position();
    let mut count = u32::from(epd(&replayed) == target);

    for (index, uci) in history.iter().enumerate() {
        let m = parse_move(&replayed, uci).map_err(|e| {
            PositionError::new(format!(
                "Logged move {} ('{}') cannot be replayed: {}",
                index + 1,
                uci,
                e
            ))
        })?;
        replayed = apply(replayed, &m);
        if epd(&replayed) == target {
            count += 1;
        }
    }

    Ok(count >= 3)
}

/// Builds a portable game record from a move log: SAN movetext with move
/// numbers and the result token.
///
/// # Errors
///
/// Returns [`PositionError`] if the log cannot be replayed.
pub fn pgn_from_history(moves: &[String], result_token: &str) -> Result<String, PositionError> {
    let mut pos = starting_position();
    let mut movetext = String::new();

    for (index, uci) in moves.iter().enumerate() {
        let m = parse_move(&pos, uci).map_err(|e| {
            PositionError::new(format!(
                "Logged move {} ('{}') cannot be recorded: {}",
                index + 1,
                uci,
                e
            ))
        })?;
        if index % 2 == 0 {
            movetext.push_str(&format!("{}. ", index / 2 + 1));
        }
        let san = SanPlus::from_move_and_play_unchecked(&mut pos, &m);
        movetext.push_str(&san.to_string());
        movetext.push(' ');
    }

    movetext.push_str(result_token);
    Ok(format!("[Result \"{}\"]\n\n{}", result_token, movetext))
}
