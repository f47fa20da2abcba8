//! Binary entrypoint for the meshtap CLI.
//!
//! Commands:
//! - `start [--port <path>] [--listen <addr>]` - ingest from the configured devices and
//!   stream events over TCP until Ctrl-C
//! - `init` - write a starter `meshtap.toml`
//! - `check-config` - load and validate the configuration, then exit
//!
//! See the library crate docs for module-level details: `meshtap::`.
use anyhow::Result;
use clap::{Parser, Subcommand};
use log::{error, info};

use meshtap::config::{Config, DeviceConfig};
use meshtap::service::Meshtap;

#[derive(Parser)]
#[command(name = "meshtap")]
#[command(about = "Passive Meshtastic ingestion with a live node registry and TCP event stream")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "meshtap.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Start ingesting and streaming
    Start {
        /// Serial device to use instead of the configured `[[devices]]` (e.g. /dev/ttyUSB0)
        #[arg(short, long)]
        port: Option<String>,

        /// Listen address for the event stream, overriding `server.listen`
        #[arg(short, long)]
        listen: Option<String>,
    },
    /// Write a default configuration file
    Init,
    /// Validate the configuration file and print a summary
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start { port, listen } => {
            let mut config = Config::load(&cli.config).await?;
            init_logging(&Some(config.clone()), cli.verbose);
            info!("Starting meshtap v{}", env!("CARGO_PKG_VERSION"));

            if let Some(port) = port {
                let first = config.devices.first().cloned().unwrap_or_default();
                config.devices = vec![DeviceConfig { port, ..first }];
            }
            if let Some(listen) = listen {
                config.server.listen = listen;
            }

            let service = match Meshtap::new(config).await {
                Ok(s) => s,
                Err(e) => {
                    error!("Startup failed: {:#}", e);
                    return Err(e);
                }
            };
            info!("Event stream on {}", service.local_addr());
            service
                .run(async {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        error!("Cannot listen for Ctrl-C: {}", e);
                    }
                })
                .await?;
        }
        Commands::Init => {
            init_logging(&None, cli.verbose);
            if std::path::Path::new(&cli.config).exists() {
                anyhow::bail!("{} already exists; refusing to overwrite", cli.config);
            }
            Config::create_default(&cli.config).await?;
            info!("Configuration file created at {}", cli.config);
        }
        Commands::CheckConfig => {
            let config = Config::load(&cli.config).await?;
            init_logging(&Some(config.clone()), cli.verbose);
            config.validate()?;
            for d in &config.devices {
                println!("device {}: {} @ {} baud", d.name, d.port, d.baud_rate);
            }
            println!(
                "stream: {} (queue depth {}, snapshot {})",
                config.server.listen, config.server.queue_depth, config.server.send_snapshot
            );
            println!(
                "registry: ttl {}s, cache {}",
                config.registry.ttl_secs,
                config.registry.cache_file.as_deref().unwrap_or("(none)")
            );
            println!("{}: OK", cli.config);
        }
    }

    Ok(())
}

fn init_logging(config: &Option<Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    // CLI verbosity overrides the configured level
    let configured = config
        .as_ref()
        .and_then(|c| c.logging.level.parse::<log::LevelFilter>().ok())
        .unwrap_or(log::LevelFilter::Info);
    let base_level = match verbosity {
        0 => configured,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);

    let log_file = config
        .as_ref()
        .and_then(|c| c.logging.file.as_ref())
        .and_then(|file| {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(file)
                .ok()
        });
    if let Some(f) = log_file {
        let write_mutex = std::sync::Arc::new(std::sync::Mutex::new(f));
        // Only echo to the console when attached to a terminal
        let is_tty = atty::is(atty::Stream::Stdout);
        builder.format(move |fmt, record| {
            let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
            let line = format!("{} [{}] {}", ts, record.level(), record.args());
            if let Ok(mut guard) = write_mutex.lock() {
                let _ = writeln!(guard, "{}", line);
            }
            if is_tty {
                writeln!(fmt, "{}", line)
            } else {
                Ok(())
            }
        });
    } else {
        builder.format(|fmt, record| {
            let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
            writeln!(fmt, "{} [{}] {}", ts, record.level(), record.args())
        });
    }
    let _ = builder.try_init();
}
