// SPDX-License-Identifier: AGPL-3.0-or-later

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use cowrite::authority::DocumentRegistry;
use cowrite::config::{Args, ServerConfig};
use cowrite::http::{self, AppState};
use cowrite::presence::InMemoryPresenceStore;
use cowrite::session::SessionRouter;
use cowrite::store::InMemoryStore;
use cowrite::{auth::TokenSigner, logging};
use tokio::signal;
use tracing::{debug, info};

#[tokio::main]
async fn main() -> Result<()> {
    let default_panic = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        default_panic(info);
        std::process::exit(1);
    }));

    let args = Args::parse();
    let config = ServerConfig::from_args(args);
    logging::initialize(config.debug());

    let documents = Arc::new(DocumentRegistry::new(
        Arc::new(InMemoryStore::default()),
        config.tail_len,
        config.persist_op_threshold,
        config.persist_interval,
    ));
    let presence = Arc::new(InMemoryPresenceStore::new(config.presence_ttl));
    spawn_presence_reaper(presence.clone(), config.presence_ttl);

    let sessions = Arc::new(SessionRouter::new(documents.clone(), presence));
    let state = Arc::new(AppState {
        documents,
        sessions,
        token_signer: TokenSigner::new(&config.secret),
    });

    let listener = tokio::net::TcpListener::bind(&config.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.bind))?;
    info!("listening on {}", config.bind);

    let app = http::router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(wait_for_shutdown())
        .await
        .context("server loop failed")?;

    Ok(())
}

fn spawn_presence_reaper(presence: Arc<InMemoryPresenceStore>, ttl: Duration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(ttl.max(Duration::from_secs(1)));
        loop {
            interval.tick().await;
            presence.reap_expired();
        }
    });
}

async fn wait_for_shutdown() {
    let mut signal_terminate = signal::unix::signal(signal::unix::SignalKind::terminate())
        .expect("Should have been able to create terminate signal stream");
    tokio::select! {
        _ = signal::ctrl_c() => {
            debug!("Got SIGINT (Ctrl+C), shutting down");
        }
        _ = signal_terminate.recv() => {
            debug!("Got SIGTERM, shutting down");
        }
    }
}
