//! cogstream client: entry point.
//!
//! ```text
//! cogstream-client                     Stream with cogstream-client.toml (or defaults)
//! cogstream-client --config <path>     Load a custom config TOML
//! cogstream-client --server <addr>     Override the server address
//! cogstream-client --csv <path>        Also write measurements to a CSV file
//! cogstream-client --gen-config        Write default config to stdout
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use cogstream_client::config::ClientConfig;
use cogstream_client::producer::spawn_producers;
use cogstream_client::sink::open_sinks;
use cogstream_core::{Session, SessionEvent};

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "cogstream-client", about = "Stream sensor frames to a cognitive engine")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "cogstream-client.toml")]
    config: PathBuf,

    /// Server address, overriding `network.server`.
    #[arg(short, long)]
    server: Option<String>,

    /// Write measurement samples to this CSV file.
    #[arg(long)]
    csv: Option<PathBuf>,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // --gen-config: dump defaults and exit.
    if cli.gen_config {
        let text = toml::to_string_pretty(&ClientConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    // Load config, then apply CLI overrides.
    let mut config = ClientConfig::load(&cli.config);
    if let Some(server) = cli.server {
        config.network.server = server;
    }
    if let Some(csv) = cli.csv {
        config.measurement_output.csv_path = csv.display().to_string();
    }

    // Init tracing.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("cogstream-client v{}", env!("CARGO_PKG_VERSION"));
    let endpoint = config.endpoint()?;
    info!("server: {endpoint}");
    info!(
        "sources: {}",
        config
            .sources
            .iter()
            .map(|s| s.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );

    let mut sinks = open_sinks(&config.measurement_output)?;
    let (session, mut events) =
        Session::connect(endpoint, config.session.clone(), &Handle::current())?;
    let handles = spawn_producers(&session, &config.sources)?;
    let mut producers = tokio::task::spawn_blocking(move || {
        handles
            .into_iter()
            .filter_map(|handle| handle.join().ok())
            .collect::<Vec<_>>()
    });

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    // Event loop: runs until interrupted, a fatal event, or all producers finish.
    let mut reports = None;
    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Ctrl-C received, shutting down");
                break;
            }
            joined = &mut producers => {
                info!("all producers finished");
                reports = Some(joined?);
                break;
            }
            event = events.recv() => match event {
                Some(SessionEvent::Result(result)) => debug!(
                    source = %result.source_name,
                    frame_id = result.frame_id,
                    bytes = result.payload.len(),
                    "result"
                ),
                Some(SessionEvent::Measurement(sample)) => {
                    for sink in sinks.iter_mut() {
                        if let Err(e) = sink.record(&sample) {
                            warn!(error = %e, "measurement sink failed");
                        }
                    }
                }
                Some(event) if event.is_fatal() => {
                    error!(?event, "fatal session event, stopping");
                    break;
                }
                Some(event) => debug!(?event, "session event"),
                None => {
                    info!("session ended");
                    break;
                }
            }
        }
    }

    session.stop();
    let reports = match reports {
        Some(reports) => reports,
        None => producers.await?,
    };
    let joiner = session.clone();
    tokio::task::spawn_blocking(move || joiner.join()).await?;

    for sink in sinks.iter_mut() {
        sink.flush()?;
    }
    for report in &reports {
        let rtt = session
            .overall_rtt(&report.source_name)
            .map(|d| format!("{:.2} ms", d.as_secs_f64() * 1000.0))
            .unwrap_or_else(|| "n/a".into());
        let fps = session
            .overall_fps(&report.source_name)
            .map(|f| format!("{f:.2}"))
            .unwrap_or_else(|| "n/a".into());
        info!(
            "{}: sent {}, skipped {}, overall rtt {rtt}, overall fps {fps}",
            report.source_name, report.sent, report.skipped
        );
    }

    Ok(())
}
