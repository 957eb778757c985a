use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info};
use std::path::PathBuf;
use tokio::runtime::Builder;

use linkstate_router::network::interface;
use linkstate_router::protocol::{DryRun, IpRouteCommand, KernelRoutes, ProtocolEngine};
use linkstate_router::{ConfigError, Cost, LinkConfig, Router, RouterConfig};

#[derive(Parser)]
#[command(name = "lsrouted", version, about = "Link-state routing daemon")]
struct Cli {
    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Router identifier, overrides the configuration file
    #[arg(long, env = "CONTAINER_NAME")]
    router_id: Option<String>,

    /// Extra link as NAME or NAME=COST; the address is read from the interface
    #[arg(long = "link", value_parser = parse_link)]
    links: Vec<LinkConfig>,

    /// UDP port for Hello and LSA datagrams
    #[arg(long)]
    port: Option<u16>,

    /// Compute routes but do not install them
    #[arg(long)]
    dry_run: bool,
}

fn parse_link(arg: &str) -> Result<LinkConfig, String> {
    let (name, cost) = match arg.split_once('=') {
        Some((name, cost)) => {
            let cost: Cost = cost
                .parse()
                .map_err(|_| format!("invalid cost in {:?}", arg))?;
            (name, Some(cost))
        }
        None => (arg, None),
    };

    if name.is_empty() {
        return Err(format!("missing interface name in {:?}", arg));
    }

    Ok(LinkConfig {
        name: name.to_string(),
        address: None,
        cost,
    })
}

fn load_config(cli: &Cli) -> Result<RouterConfig, ConfigError> {
    let mut config = match &cli.config {
        Some(path) => RouterConfig::load(path)?,
        None => RouterConfig::default(),
    };

    if let Some(id) = &cli.router_id {
        config.router_id = Some(id.clone());
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    if cli.dry_run {
        config.install_routes = false;
    }
    config.links.extend(cli.links.iter().cloned());
    Ok(config)
}

async fn serve<K: KernelRoutes>(router: Router, port: u16, kernel: K) -> Result<()> {
    let engine = ProtocolEngine::bind(router, port, kernel).await?;
    engine
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let config = load_config(&cli)?;
    let router_id = config.router_id()?;
    let timers = config.timers()?;
    let links = config.link_table(interface::lookup_ipv4).map_err(|e| {
        if let ConfigError::UnresolvedAddress(_) = e {
            error!("IPv4 interfaces available: {:?}", interface::ipv4_interfaces());
        }
        e
    })?;

    for link in links.iter() {
        info!("Link {} ({}) cost {}", link.name, link.address, link.cost);
    }

    // Seed the sequence from the clock so a restart starts above any
    // LSA of ours still held by the neighbors
    let initial_sequence = u64::try_from(chrono::Utc::now().timestamp()).unwrap_or(0);
    let router = Router::new(router_id, links, timers).with_initial_sequence(initial_sequence);

    let rt = Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    rt.block_on(async {
        if config.install_routes {
            serve(router, config.port, IpRouteCommand::default()).await
        } else {
            serve(router, config.port, DryRun).await
        }
    })
}
