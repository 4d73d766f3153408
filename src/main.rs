//! Chess Academy server binary.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use chess_academy::{
    AbandonStaleGames, AlertNotifier, AppConfig, AppState, Cli, Command, FileLock, GameRepository,
    GameService, MoveEngine, PuzzleRepository, PuzzleService, Scheduler, UciEngine, router,
};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,chess_academy=debug")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve {
            config,
            db_path,
            host,
            port,
        } => serve(config, db_path, host, port).await,
    }
}

async fn serve(
    config_path: Option<PathBuf>,
    db_path: Option<String>,
    host: Option<String>,
    port: Option<u16>,
) -> Result<()> {
    let mut config = AppConfig::load(config_path.as_deref())?;
    config.apply_cli_overrides(db_path, host, port);

    let game_repository = GameRepository::new(config.database().path().clone());
    game_repository.run_migrations()?;
    let puzzle_repository = PuzzleRepository::new(config.database().path().clone());

    let engine: Arc<dyn MoveEngine> = Arc::new(UciEngine::new(
        config.engine().binary().clone(),
        *config.engine().skill_level(),
    ));

    let games = Arc::new(GameService::new(
        game_repository.clone(),
        engine,
        config.retry().clone(),
        *config.engine().time_limit_ms(),
        *config.engine().depth(),
    ));
    let puzzles = Arc::new(PuzzleService::new(puzzle_repository));
    let alerts = AlertNotifier::new(config.alerts().webhook_url().clone());

    if *config.scheduler().enabled() {
        let lock = FileLock::new(
            PathBuf::from(config.scheduler().lock_dir()),
            Duration::from_secs(*config.scheduler().lock_stale_secs()),
        )?;
        let mut scheduler = Scheduler::new(
            Arc::new(lock),
            config.retry().clone(),
            alerts.clone(),
            *config.scheduler().run_on_startup(),
        );
        scheduler.register(
            Arc::new(AbandonStaleGames::new(
                game_repository.clone(),
                *config.scheduler().stale_game_hours(),
            )),
            Duration::from_secs(*config.scheduler().interval_secs()),
        );
        scheduler.spawn();
        info!("Scheduler started");
    }

    let state = AppState { games, puzzles };
    let app = router(state);

    let addr = format!("{}:{}", config.api().host(), config.api().port());
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            alerts
                .notify(
                    "startup_failure",
                    &format!("Cannot bind {}: {}", addr, e),
                    serde_json::json!({ "addr": addr }),
                )
                .await;
            return Err(e.into());
        }
    };

    info!(addr = %addr, "API listening");
    axum::serve(listener, app).await?;
    Ok(())
}
