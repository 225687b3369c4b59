//! cogstream engine: loopback server for cogstream clients.
//!
//! ```text
//! cogstream-engine                          Listen on 0.0.0.0:9099, sources cam,mic
//! cogstream-engine --port 7000              Listen on another port
//! cogstream-engine --sources cam,imu        Announce other sources
//! cogstream-engine --delay-ms 30            Simulate 30 ms of processing per frame
//! cogstream-engine --fail-every 50          Answer every 50th frame with an engine error
//! ```

mod server;

use std::time::Duration;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use cogstream_core::DEFAULT_PORT;
use server::{EngineServer, EngineSettings};

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "cogstream-engine", about = "Loopback cognitive engine for cogstream clients")]
struct Cli {
    /// Address to bind.
    #[arg(long, default_value = "0.0.0.0")]
    bind: String,

    /// TCP port to listen on.
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Source names announced in the Welcome.
    #[arg(short, long, value_delimiter = ',', default_value = "cam,mic")]
    sources: Vec<String>,

    /// Tokens granted per source.
    #[arg(short, long, default_value_t = 2)]
    tokens: u32,

    /// Simulated processing time per frame, in milliseconds.
    #[arg(long, default_value_t = 0)]
    delay_ms: u64,

    /// Answer every n-th frame with an engine error (0 = never).
    #[arg(long, default_value_t = 0)]
    fail_every: u64,

    /// Log level used when RUST_LOG is unset.
    #[arg(long, default_value = "info")]
    log_level: String,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Init tracing.
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let settings = EngineSettings {
        sources: cli.sources,
        tokens_per_source: cli.tokens,
        delay: Duration::from_millis(cli.delay_ms),
        fail_every: cli.fail_every,
    };

    info!("cogstream-engine v{}", env!("CARGO_PKG_VERSION"));
    info!("sources: {}", settings.sources.join(", "));
    info!("tokens per source: {}", settings.tokens_per_source);

    let server = EngineServer::listen(&format!("{}:{}", cli.bind, cli.port), settings).await?;
    info!("listening on {}", server.local_addr()?);

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => info!("Ctrl-C received, shutting down"),
    }
    Ok(())
}
