//! Search engine integration over the UCI protocol.
//!
//! The orchestrator talks to [`MoveEngine`], never to a process directly, so
//! tests substitute fakes. [`UciEngine`] drives a Stockfish-compatible binary
//! per request: every call spawns the engine, runs one search, and reaps the
//! process, with the whole conversation bounded by a timeout.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use derive_getters::Getters;
use derive_more::{Display, Error};
use derive_new::new;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::time::timeout;
use tracing::{debug, info, instrument};

/// How long an analysis request may hold the engine before it is abandoned.
const ANALYSIS_TIMEOUT: Duration = Duration::from_secs(30);

/// Engine error with location tracking.
#[derive(Debug, Clone, Display, Error)]
#[display("Engine error: {} at {}:{}", message, file, line)]
pub struct EngineError {
    /// Error message.
    pub message: String,
    /// Line number where error occurred.
    pub line: u32,
    /// Source file where error occurred.
    pub file: &'static str,
}

impl EngineError {
    /// Creates a new engine error with caller location tracking.
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

impl From<std::io::Error> for EngineError {
    #[track_caller]
    fn from(err: std::io::Error) -> Self {
        Self::new(format!("Engine I/O error: {}", err))
    }
}

/// Result of a position analysis.
#[derive(Debug, Clone, Getters, new)]
pub struct Analysis {
    /// Evaluation from the side to move, e.g. `"cp 34"` or `"mate 3"`.
    score: String,
    /// Depth actually reached.
    depth: u32,
    /// Principal variation in coordinate notation.
    pv: Vec<String>,
    /// Nodes searched.
    nodes: u64,
    /// Search time in milliseconds.
    time_ms: u64,
}

/// Best-move and analysis capability of the position collaborator.
///
/// Calls are long-latency and cancellable: implementations must bound their
/// own work and return an error rather than hang the caller.
#[async_trait]
pub trait MoveEngine: Send + Sync {
    /// Searches for the best move in the position, spending roughly
    /// `time_ms`. Returns `None` when the engine has no move to offer.
    async fn best_move(
        &self,
        fen: &str,
        skill: Option<i32>,
        time_ms: u64,
    ) -> Result<Option<String>, EngineError>;

    /// Evaluates the position to the given depth.
    async fn analyze(&self, fen: &str, depth: u32) -> Result<Analysis, EngineError>;
}

/// [`MoveEngine`] backed by an external UCI binary (Stockfish).
#[derive(Debug, Clone)]
pub struct UciEngine {
    binary: String,
    default_skill: i32,
}

impl UciEngine {
    /// Creates an engine handle for the given binary path or command name.
    #[instrument(skip(binary), fields(binary = %binary))]
    pub fn new(binary: String, default_skill: i32) -> Self {
        info!(binary = %binary, default_skill, "Creating UCI engine handle");
        Self {
            binary,
            default_skill,
        }
    }
}

#[async_trait]
impl MoveEngine for UciEngine {
    #[instrument(skip(self, fen), fields(fen = %fen))]
    async fn best_move(
        &self,
        fen: &str,
        skill: Option<i32>,
        time_ms: u64,
    ) -> Result<Option<String>, EngineError> {
        // Double the search budget plus startup slack; expiry is reported as
        // an error and the caller decides how to degrade.
        let budget = Duration::from_millis(time_ms.saturating_mul(2).saturating_add(2_000));
        let skill = skill.unwrap_or(self.default_skill);

        let search = async {
            let mut session = UciSession::start(&self.binary).await?;
            session.handshake(skill).await?;
            session.send(&format!("position fen {}", fen)).await?;
            session.send(&format!("go movetime {}", time_ms)).await?;
            let lines = session.read_until("bestmove").await?;
            let reply = lines.last().and_then(|line| parse_bestmove(line));
            debug!(reply = ?reply, "Engine search finished");
            Ok(reply)
        };

        match timeout(budget, search).await {
            Ok(result) => result,
            Err(_) => Err(EngineError::new(format!(
                "Engine did not produce a move within {}ms",
                budget.as_millis()
            ))),
        }
    }

    #[instrument(skip(self, fen), fields(fen = %fen))]
    async fn analyze(&self, fen: &str, depth: u32) -> Result<Analysis, EngineError> {
        let search = async {
            let mut session = UciSession::start(&self.binary).await?;
            session.handshake(self.default_skill).await?;
            session.send(&format!("position fen {}", fen)).await?;
            session.send(&format!("go depth {}", depth)).await?;
            let lines = session.read_until("bestmove").await?;

            let mut analysis = Analysis::new("cp 0".to_string(), depth, Vec::new(), 0, 0);
            for line in &lines {
                if let Some(fields) = parse_info(line) {
                    fields.fold_into(&mut analysis);
                }
            }
            debug!(score = %analysis.score(), depth = analysis.depth(), "Analysis finished");
            Ok(analysis)
        };

        match timeout(ANALYSIS_TIMEOUT, search).await {
            Ok(result) => result,
            Err(_) => Err(EngineError::new(format!(
                "Engine analysis exceeded {}s",
                ANALYSIS_TIMEOUT.as_secs()
            ))),
        }
    }
}

/// One spawned engine process. Killed on drop.
struct UciSession {
    _child: Child,
    stdin: ChildStdin,
    lines: Lines<BufReader<ChildStdout>>,
}

impl UciSession {
    async fn start(binary: &str) -> Result<Self, EngineError> {
        let mut child = Command::new(binary)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| EngineError::new(format!("Failed to start engine '{}': {}", binary, e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| EngineError::new("Engine stdin unavailable"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EngineError::new("Engine stdout unavailable"))?;

        Ok(Self {
            _child: child,
            stdin,
            lines: BufReader::new(stdout).lines(),
        })
    }

    async fn handshake(&mut self, skill: i32) -> Result<(), EngineError> {
        self.send("uci").await?;
        self.read_until("uciok").await?;
        self.send(&format!("setoption name Skill Level value {}", skill))
            .await?;
        self.send("isready").await?;
        self.read_until("readyok").await?;
        Ok(())
    }

    async fn send(&mut self, command: &str) -> Result<(), EngineError> {
        self.stdin.write_all(command.as_bytes()).await?;
        self.stdin.write_all(b"\n").await?;
        self.stdin.flush().await?;
        Ok(())
    }

    /// Reads lines until one starts with `marker`, returning everything seen.
    async fn read_until(&mut self, marker: &str) -> Result<Vec<String>, EngineError> {
        let mut seen = Vec::new();
        while let Some(line) = self.lines.next_line().await? {
            let done = line.starts_with(marker);
            seen.push(line);
            if done {
                return Ok(seen);
            }
        }
        Err(EngineError::new(format!(
            "Engine closed its pipe before sending '{}'",
            marker
        )))
    }
}

/// Extracts the move from a `bestmove` line. `bestmove (none)` means the
/// engine has no legal reply.
fn parse_bestmove(line: &str) -> Option<String> {
    let mut tokens = line.split_whitespace();
    if tokens.next() != Some("bestmove") {
        return None;
    }
    match tokens.next() {
        Some("(none)") | None => None,
        Some(mv) => Some(mv.to_string()),
    }
}

/// Fields parsed from one `info` line.
#[derive(Debug, Default)]
struct InfoFields {
    score: Option<String>,
    depth: Option<u32>,
    nodes: Option<u64>,
    time_ms: Option<u64>,
    pv: Vec<String>,
}

impl InfoFields {
    fn fold_into(self, analysis: &mut Analysis) {
        let depth = self.depth.unwrap_or(*analysis.depth());
        let score = self.score.unwrap_or_else(|| analysis.score().clone());
        let nodes = self.nodes.unwrap_or(*analysis.nodes());
        let time_ms = self.time_ms.unwrap_or(*analysis.time_ms());
        let pv = if self.pv.is_empty() {
            analysis.pv().clone()
        } else {
            self.pv
        };
        *analysis = Analysis::new(score, depth, pv, nodes, time_ms);
    }
}

/// Parses a UCI `info` line; returns `None` for anything else.
fn parse_info(line: &str) -> Option<InfoFields> {
    let mut tokens = line.split_whitespace();
    if tokens.next() != Some("info") {
        return None;
    }

    let mut fields = InfoFields::default();
    while let Some(token) = tokens.next() {
        match token {
            "depth" => fields.depth = tokens.next().and_then(|t| t.parse().ok()),
            "nodes" => fields.nodes = tokens.next().and_then(|t| t.parse().ok()),
            "time" => fields.time_ms = tokens.next().and_then(|t| t.parse().ok()),
            "score" => {
                if let (Some(kind), Some(value)) = (tokens.next(), tokens.next()) {
                    fields.score = Some(format!("{} {}", kind, value));
                }
            }
            "pv" => {
                fields.pv = tokens.by_ref().map(|t| t.to_string()).collect();
                break;
            }
            _ => {}
        }
    }
    Some(fields)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_bestmove_extracts_move() {
        assert_eq!(parse_bestmove("bestmove e2e4 ponder e7e5"), Some("e2e4".to_string()));
        assert_eq!(parse_bestmove("bestmove (none)"), None);
        assert_eq!(parse_bestmove("info depth 1"), None);
    }

    #[test]
    fn parse_info_extracts_fields() {
        let line = "info depth 12 seldepth 18 score cp 34 nodes 48211 nps 961132 time 50 pv e2e4 e7e5 g1f3";
        let fields = parse_info(line).expect("info line");
        assert_eq!(fields.depth, Some(12));
        assert_eq!(fields.score.as_deref(), Some("cp 34"));
        assert_eq!(fields.nodes, Some(48211));
        assert_eq!(fields.time_ms, Some(50));
        assert_eq!(fields.pv, vec!["e2e4", "e7e5", "g1f3"]);
    }

    #[test]
    fn parse_info_handles_mate_scores() {
        let fields = parse_info("info depth 5 score mate 3 pv d1h5").expect("info line");
        assert_eq!(fields.score.as_deref(), Some("mate 3"));
    }

    #[test]
    fn parse_info_ignores_other_lines() {
        assert!(parse_info("bestmove e2e4").is_none());
    }

    #[test]
    fn info_lines_fold_with_last_value_winning() {
        let mut analysis = Analysis::new("cp 0".to_string(), 10, Vec::new(), 0, 0);
        for line in [
            "info depth 1 score cp 10 nodes 20 time 1 pv e2e4",
            "info depth 2 score cp -5 nodes 90 time 3 pv d2d4 d7d5",
        ] {
            parse_info(line).expect("info").fold_into(&mut analysis);
        }
        assert_eq!(*analysis.depth(), 2);
        assert_eq!(analysis.score(), "cp -5");
        assert_eq!(*analysis.nodes(), 90);
        assert_eq!(analysis.pv(), &vec!["d2d4".to_string(), "d7d5".to_string()]);
    }
}
