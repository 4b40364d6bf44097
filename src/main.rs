//! ss-relay - CLI entry point (SPEC_FULL §4.I).

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use clap::Parser;
use ss_relay::{Config, Relay, VERSION};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "ss-relay")]
#[command(version = VERSION)]
#[command(about = "Shadowsocks remote-end relay")]
struct Args {
    /// Path to configuration file
    #[arg(short = 'c', long = "config", default_value = "config.json")]
    config: PathBuf,

    /// Validate the configuration and exit without binding a socket
    #[arg(short = 't', long = "test")]
    test: bool,

    /// Enable verbose (debug-level) logging
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = match Config::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("failed to load configuration from {}: {}", args.config.display(), e);
            std::process::exit(1);
        }
    };

    init_logging(args.verbose || config.verbose)?;

    if args.test {
        info!("configuration at {} is valid", args.config.display());
        return Ok(());
    }

    // Sized from the config's `workers` field, falling back to the host's
    // core count when the config leaves it at the single-worker default.
    let worker_threads = if config.workers > 1 { config.workers } else { num_cpus::get().max(1) };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(worker_threads)
        .enable_all()
        .thread_name("ss-relay-worker")
        .build()?;

    runtime.block_on(async_main(config))
}

fn init_logging(verbose: bool) -> anyhow::Result<()> {
    let default_directive = if verbose { "ss_relay=debug" } else { "ss_relay=info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(default_directive.parse()?))
        .init();
    Ok(())
}

async fn async_main(config: Config) -> anyhow::Result<()> {
    info!("ss-relay v{}", VERSION);

    let relay = match Relay::new(config).await {
        Ok(r) => r,
        Err(e) => {
            error!("failed to initialize relay: {}", e);
            std::process::exit(1);
        }
    };
    let relay = std::sync::Arc::new(relay);

    let run_handle = {
        let relay = relay.clone();
        tokio::spawn(async move {
            if let Err(e) = relay.run().await {
                error!("relay error: {}", e);
            }
        })
    };

    tokio::signal::ctrl_c().await?;
    info!("received shutdown signal");
    relay.shutdown().await;
    run_handle.abort();

    info!("ss-relay stopped");
    Ok(())
}
