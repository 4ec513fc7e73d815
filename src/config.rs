// SPDX-License-Identifier: AGPL-3.0-or-later

//! Runtime configuration for the server: listening address, shared secret, and the
//! tunables that govern the document authority and presence registry.

use std::time::Duration;

use clap::Parser;
use tracing::info;

/// Command-line / environment configuration for the server process.
///
/// Secrets prefer the environment so they don't end up in shell history or process
/// listings; everything else has a sensible default and can be overridden on the
/// command line.
#[derive(Parser, Clone, Debug)]
#[command(name = "cowrite-server", about = "Collaborative text editing server")]
pub struct Args {
    /// Address to bind the HTTP/WebSocket listener on.
    #[arg(long, env = "COWRITE_BIND", default_value = "0.0.0.0:8080")]
    pub bind: String,

    /// Shared secret used to sign and verify bearer tokens.
    #[arg(long, env = "COWRITE_SECRET")]
    pub secret: Option<String>,

    /// Number of recently applied operations retained per document for transforming
    /// stale client operations against.
    #[arg(long, env = "COWRITE_TAIL_LEN", default_value_t = 10)]
    pub tail_len: usize,

    /// Number of applied operations after which a document is written back to the
    /// durable store.
    #[arg(long, env = "COWRITE_PERSIST_OPS", default_value_t = 20)]
    pub persist_op_threshold: u32,

    /// Wall-clock time a document may remain dirty before a write-back is triggered.
    #[arg(long, env = "COWRITE_PERSIST_INTERVAL_SECS", default_value_t = 2)]
    pub persist_interval_secs: u64,

    /// Inactivity TTL for presence entries (cursors, join state).
    #[arg(long, env = "COWRITE_PRESENCE_TTL_SECS", default_value_t = 30)]
    pub presence_ttl_secs: u64,

    /// Enable debug-level logging.
    #[arg(long, env = "COWRITE_DEBUG")]
    pub debug: bool,
}

/// Resolved server configuration, derived from [`Args`] with defaults filled in.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind: String,
    pub secret: String,
    pub tail_len: usize,
    pub persist_op_threshold: u32,
    pub persist_interval: Duration,
    pub presence_ttl: Duration,
    debug: bool,
}

impl ServerConfig {
    pub fn from_args(args: Args) -> Self {
        let secret = args.secret.unwrap_or_else(|| {
            info!("no COWRITE_SECRET provided, generating an ephemeral one for this process");
            generate_ephemeral_secret()
        });

        Self {
            bind: args.bind,
            secret,
            tail_len: args.tail_len.max(10),
            persist_op_threshold: args.persist_op_threshold,
            persist_interval: Duration::from_secs(args.persist_interval_secs),
            presence_ttl: Duration::from_secs(args.presence_ttl_secs),
            debug: args.debug,
        }
    }

    pub const fn debug(&self) -> bool {
        self.debug
    }
}

fn generate_ephemeral_secret() -> String {
    use rand::Rng;
    let bytes: [u8; 32] = rand::thread_rng().gen();
    base64::Engine::encode(&base64::engine::general_purpose::STANDARD, bytes)
}
