//! Process entry point: loads configuration, then either runs one reconcile
//! pass and exits or serves the HTTP API.

use std::path::PathBuf;

use clap::Parser;
use tcrecon::client::{self, Client};
use tcrecon::config::{Config, Mode};
use tcrecon::node::{Node, NodeType, compose};
use tcrecon::reconcile::{reconcile_filters, reconcile_tree};

#[derive(Parser, Debug)]
#[command(name = "tcrecon", about = "Declarative Linux traffic-control reconciler")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "./tcconfig.toml")]
    config: PathBuf,

    /// Run a single reconcile pass against the configuration, then exit.
    #[arg(long)]
    once: bool,

    /// Override the configuration file's HTTP listen address.
    #[arg(long)]
    addr: Option<String>,
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();

    let config = match Config::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, path = %args.config.display(), "failed to load configuration");
            return std::process::ExitCode::FAILURE;
        }
    };

    if args.once {
        return run_once(&config).await;
    }

    run_server(&config, args.addr.as_deref()).await
}

async fn run_once(config: &Config) -> std::process::ExitCode {
    match reconcile_once(config).await {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "reconcile pass failed");
            std::process::ExitCode::FAILURE
        }
    }
}

async fn reconcile_once(config: &Config) -> tcrecon::netlink::error::Result<()> {
    let ifindex = client::ifindex_for(config.interface())?;
    let (desired_tree, desired_filters) = config.build_desired(ifindex)?;

    let c = Client::open()?;
    let live_qdiscs = c.get_qdiscs(ifindex).await?;
    let live_classes = c.get_classes(ifindex).await?;

    tracing::info!(
        interface = config.interface(),
        qdiscs = live_qdiscs.len(),
        classes = live_classes.len(),
        "starting reconcile"
    );

    let live_nodes: Vec<Node> = live_qdiscs
        .into_iter()
        .map(|o| Node::new(String::new(), NodeType::Qdisc, o))
        .chain(live_classes.into_iter().map(|o| Node::new(String::new(), NodeType::Class, o)))
        .collect();

    let live_tree = if live_nodes.is_empty() {
        None
    } else {
        match compose(live_nodes) {
            Ok((tree, _leftovers)) => Some(tree),
            Err(e) => {
                tracing::warn!(error = %e, "failed to compose live tree; treating kernel state as empty");
                None
            }
        }
    };

    let report = reconcile_tree(&desired_tree, live_tree.as_ref(), &c).await?;
    if report.has_failures() {
        tracing::warn!(?report.ops, "reconcile completed with per-object failures");
    }

    let filter_report = reconcile_filters(&desired_filters, &c).await?;
    if filter_report.has_failures() {
        tracing::warn!(?filter_report.ops, "filter reconcile completed with per-object failures");
    }

    Ok(())
}

async fn run_server(config: &Config, addr_override: Option<&str>) -> std::process::ExitCode {
    let addr = addr_override.unwrap_or(config.addr());
    if config.mode() != Mode::Declarative {
        tracing::info!(mode = ?config.mode(), "QoS template mode selected; templates are applied via the HTTP surface's object endpoints");
    }

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(error = %e, addr, "failed to bind HTTP listener");
            return std::process::ExitCode::FAILURE;
        }
    };

    tracing::info!(addr, "listening");
    if let Err(e) = axum::serve(listener, tcrecon::http::router()).await {
        tracing::error!(error = %e, "HTTP server exited with an error");
        return std::process::ExitCode::FAILURE;
    }

    std::process::ExitCode::SUCCESS
}
