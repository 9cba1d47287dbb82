mod cli;
mod config;
mod error;
mod output;

use std::{io, process};

use anyhow::Context;
use clap::Parser;
use livechat::{
    ChatClient, HttpSessionConfigSource, SessionEvent, StaticSessionConfigSource,
};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use crate::{cli::Args, config::AppConfig, output::ItemWriter};

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    if let Err(e) = run(args).await {
        error!("Application error: {:#}", e);
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = AppConfig::load(args.config.as_deref()).context("failed to load config")?;
    debug!("Using config: {:?}", config);

    let builder = ChatClient::builder(args.room_id).config(config.client);
    let builder = match (args.url, args.token) {
        (Some(url), Some(token)) => builder.source(StaticSessionConfigSource::new(token, url)),
        _ => {
            let api_base = args.api_base.unwrap_or(config.api_base);
            builder.source(HttpSessionConfigSource::new(&api_base)?)
        }
    };
    let client = builder.build()?;

    let mut items = client
        .take_items()
        .context("item stream already taken")?;
    let mut events = client.subscribe();
    let mut writer = ItemWriter::new(io::stdout().lock(), args.pretty);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    client.start().await;

    let result = loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Interrupted, stopping");
                break Ok(());
            }
            item = items.recv() => {
                let Some(item) = item else { break Ok(()) };
                if let Err(e) = writer.write(&item) {
                    if e.is_broken_pipe() {
                        debug!("Output closed, stopping");
                        break Ok(());
                    }
                    break Err(e.into());
                }
            }
            event = events.recv() => match event {
                Ok(event) => log_event(&event, args.events),
                Err(RecvError::Lagged(n)) => warn!("Missed {} session events", n),
                Err(RecvError::Closed) => break Ok(()),
            }
        }
    };

    client.stop().await;
    let stats = client.stats();
    info!(
        "Room {}: {} items, {} ignored, {} unrecognized, {} malformed notices",
        args.room_id, stats.classified, stats.ignored, stats.unrecognized, stats.mismatched
    );
    result
}

fn log_event(event: &SessionEvent, verbose: bool) {
    match event {
        SessionEvent::Error { message, .. } => warn!("{}", message),
        SessionEvent::Reconnecting { attempt, delay_ms } => {
            warn!("Reconnecting in {}ms (attempt {})", delay_ms, attempt)
        }
        SessionEvent::StateChanged { state } if verbose => info!("State: {}", state),
        SessionEvent::Popularity { value } if verbose => info!("Popularity: {}", value),
        _ => {}
    }
}

fn init_logging(verbose: bool, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("livechat=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("livechat=info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(io::stderr).with_target(false))
        .init();
}
