use anyhow::{Context, Result};
use clap::Parser;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::BufReader;
use tracing::{error, info, warn};

use caddie_turns::api::ApiClient;
use caddie_turns::cache;
use caddie_turns::config;
use caddie_turns::feed;
use caddie_turns::model::ListNumber;
use caddie_turns::session::{self, Board, Session};

#[derive(Debug, Parser)]
#[command(author, version, about = "Keep the caddie turn boards in sync with the backend")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Read newline-delimited push events from stdin
    #[arg(long)]
    stdin_feed: bool,
}

fn describe(board: &Board) -> String {
    let current = board
        .current
        .as_ref()
        .map(|c| c.name.as_str())
        .unwrap_or("-");
    let next: Vec<&str> = board.next.iter().map(|c| c.name.as_str()).collect();
    format!("current: {} | next: {}", current, next.join(", "))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let pool = cache::init_pool(&cfg.database_url()).await?;
    cache::run_migrations(&pool).await?;

    let token = match std::env::var("CADDIE_API_TOKEN") {
        Ok(token) => Some(token),
        Err(_) => cache::load_token(&pool).await?,
    };
    let client = ApiClient::from_config(&cfg)
        .context("failed to build backend client")?
        .with_token(token);
    let session = Arc::new(Session::restore(client, cfg.list_defaults(), pool).await?);

    if let Err(err) = session.refresh().await {
        warn!(%err, "initial refresh failed; serving cached state");
    }

    let poll_every = Duration::from_millis(cfg.app.poll_interval_ms);
    let poller = session::spawn_poll_loop(session.clone(), poll_every);

    if args.stdin_feed {
        let mut events = feed::read_events(BufReader::new(tokio::io::stdin()));
        let feed_session = session.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                feed_session.apply_event(event).await;
            }
            info!("push feed closed");
        });
    }

    let watcher_session = session.clone();
    let watcher = tokio::spawn(async move {
        let mut last: HashMap<ListNumber, Board> = HashMap::new();
        loop {
            for list in ListNumber::ALL {
                let board = watcher_session.board(list).await;
                if last.get(&list) != Some(&board) {
                    info!(list = %list, "{}", describe(&board));
                    last.insert(list, board);
                }
            }
            tokio::time::sleep(poll_every).await;
        }
    });

    info!(lists = ListNumber::ALL.len(), "caddie turn boards running");
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(?err, "failed to listen for shutdown signal");
    }
    poller.abort();
    watcher.abort();
    info!("shutting down");
    Ok(())
}
