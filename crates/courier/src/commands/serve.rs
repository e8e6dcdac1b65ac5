use crate::config::Config;
use anyhow::{Context, Result};
use courier_adapters::{
    discover_agent_pane, CallbackListener, LogDispatcher, TelegramDispatcher, TmuxPane,
};
use courier_core::{Dispatcher, Engine};
use courier_gateway::{IngestServer, ServerConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// The live Telegram client, or `None` in a dry run
fn build_telegram(config: &Config, dry_run: bool) -> Result<Option<Arc<TelegramDispatcher>>> {
    if dry_run {
        info!("Dry run: notifications are logged, not sent");
        return Ok(None);
    }

    let (token, chat_id) = config.telegram_credentials()?;
    let telegram = TelegramDispatcher::new(&token, &chat_id)?
        .with_api_base(&config.telegram.api_base)
        .with_max_message_len(config.telegram.max_message_len);
    Ok(Some(Arc::new(telegram)))
}

async fn resolve_pane(config: &Config) -> Result<TmuxPane> {
    let target = if config.tmux.target.is_empty() {
        discover_agent_pane()
            .await
            .context("No tmux.target configured and discovery failed")?
    } else {
        config.tmux.target.clone()
    };
    Ok(TmuxPane::new(target))
}

pub async fn execute(target_dir: Option<PathBuf>, dry_run: bool, config: &Config) -> Result<()> {
    let target_dir = match target_dir {
        Some(dir) => dir,
        None => config.target_dir()?,
    };
    let engine_config = config.engine_config();
    let grace = engine_config.shutdown_grace;

    let telegram = build_telegram(config, dry_run)?;
    let dispatcher: Arc<dyn Dispatcher> = match &telegram {
        Some(telegram) => Arc::clone(telegram) as Arc<dyn Dispatcher>,
        None => Arc::new(LogDispatcher::new()),
    };
    let pane = Arc::new(resolve_pane(config).await?);
    info!(
        target_dir = %target_dir.display(),
        pane = %pane.target(),
        dry_run,
        "Starting relay"
    );

    let engine = Engine::new(engine_config, dispatcher, pane.clone());
    engine.attach_key_injector(pane)?;
    let _sweeper = engine.spawn_sweeper();

    let mut server_config = ServerConfig::new(config.socket_path(&target_dir));
    if config.relay.filter_by_directory {
        server_config = server_config.with_target_dir(&target_dir);
    }
    let server = IngestServer::bind(server_config, engine.clone()).await?;

    let shutdown = CancellationToken::new();
    let server_task = tokio::spawn(server.run(shutdown.clone()));
    let listener_task = match telegram {
        Some(telegram) if config.telegram.callbacks => {
            let listener = CallbackListener::new(telegram, engine.clone());
            Some(tokio::spawn(listener.run(shutdown.clone())))
        }
        _ => None,
    };

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;
    info!("Shutdown requested");

    shutdown.cancel();
    server_task.await.context("Ingest server task panicked")??;
    if let Some(listener_task) = listener_task {
        listener_task.await.context("Callback listener task panicked")??;
    }
    if !engine.shutdown(grace).await {
        warn!("Exiting with notifications still in flight");
    }

    Ok(())
}
