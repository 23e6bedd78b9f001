//! Webhook dispatcher entry point.
//!
//! Startup is fail-fast: a configuration that does not load, template,
//! parse, or validate aborts the process before the listener opens.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use webhook_dispatcher::config;
use webhook_dispatcher::http::{HttpForwarder, HttpServer};
use webhook_dispatcher::rules::RuleSet;

#[derive(Parser)]
#[command(name = "webhook-dispatcher")]
#[command(about = "Condition-based webhook router", long_about = None)]
struct Args {
    /// Path to the configuration file.
    #[arg(short, long, env = "WEBHOOK_DISPATCHER_CONFIG", default_value = "dispatcher.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "webhook_dispatcher=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    tracing::info!(config = %args.config.display(), "webhook-dispatcher starting");

    let config = config::load_config(&args.config)?;
    let rules = RuleSet::build(&config.rules)?;
    tracing::info!(
        bind_address = %config.listener.bind_address,
        rule_count = rules.len(),
        "configuration loaded"
    );

    let forwarder = Arc::new(HttpForwarder::new(&config.forwarder, &config.timeouts)?);

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "listening for connections");

    let server = HttpServer::new(&config, rules, forwarder);
    server.run(listener).await?;

    tracing::info!("shutdown complete");
    Ok(())
}
