#![allow(missing_docs)]

//! Command-line front end for the cluster call router.
//!
//! `dapi check` validates configuration and prints the topology.
//! `dapi call` runs a built-in operation through the router against an
//! in-process cluster built from that topology.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::Value;
use tracing::{debug, info};

use dapi::config::{load_config, Config};
use dapi::logging;
use dapi::operations::{NodeContext, OperationRegistry};
use dapi::rbac::PermissionSet;
use dapi::router::{DistributedApi, NodeService, RouterError};
use dapi::transport::LoopbackTransport;
use dapi::types::{AggregateResult, RoutingMode};

#[derive(Debug, Parser)]
#[command(name = "dapi", version, about = "Cluster call router")]
struct Cli {
    /// Config file (default: $DAPI_CONFIG_PATH or ~/.dapi/config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Also write JSON logs with daily rotation into this directory.
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Validate configuration and print the cluster topology.
    Check,
    /// Run an operation through the router and print the result as JSON.
    Call(CallArgs),
}

#[derive(Debug, Args)]
struct CallArgs {
    /// Operation id, e.g. `cluster.ping`.
    operation: String,

    /// Override the operation's routing mode.
    #[arg(long)]
    mode: Option<RoutingMode>,

    /// Keyword argument as `name=value`; values are parsed as JSON when
    /// possible and taken as strings otherwise.
    #[arg(long = "arg", value_parser = parse_key_val)]
    args: Vec<(String, Value)>,

    /// Permission token held by the caller, e.g. `cluster:read@node:id:*`.
    #[arg(long = "permission")]
    permissions: Vec<String>,

    /// Return an acknowledgment instead of waiting for results.
    #[arg(long = "async")]
    asynchronous: bool,

    /// Call timeout in seconds.
    #[arg(long, conflicts_with = "wait_for_complete")]
    timeout: Option<u64>,

    /// Wait without a timeout.
    #[arg(long)]
    wait_for_complete: bool,
}

fn parse_key_val(s: &str) -> Result<(String, Value), String> {
    let (name, raw) = s
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got '{s}'"))?;
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_owned()));
    Ok((name.to_owned(), value))
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let _guard = match &cli.log_dir {
        Some(dir) => Some(logging::init_production(dir)?),
        None => {
            logging::init_cli();
            None
        }
    };

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => Config::load().context("failed to load configuration")?,
    };
    config.validate().context("invalid configuration")?;

    match cli.command {
        Command::Check => check(&config),
        Command::Call(args) => call(&config, args).await,
    }
}

fn check(config: &Config) -> Result<ExitCode> {
    let topology = config.cluster_topology();
    info!(
        node = %topology.current,
        master = ?topology.master,
        nodes = topology.nodes.len(),
        "configuration ok"
    );
    println!("{}", serde_json::to_string_pretty(&topology)?);
    Ok(ExitCode::SUCCESS)
}

/// Build a router whose peers are in-process [`NodeService`]s.
fn local_cluster(config: &Config) -> DistributedApi {
    let registry = Arc::new(OperationRegistry::with_builtins());
    let topology = config.cluster_topology();

    let transport = LoopbackTransport::new();
    for node in topology.nodes.iter().filter(|n| n.name != topology.current) {
        let context = NodeContext {
            node: node.name.clone(),
            is_master: topology.master.as_deref() == Some(node.name.as_str()),
        };
        transport.register(Arc::new(NodeService::new(context, Arc::clone(&registry))));
        debug!(node = %node.name, "registered in-process peer");
    }

    DistributedApi::new(
        registry,
        Arc::new(config.topology()),
        Arc::new(transport),
        config.router.settings(),
    )
}

async fn run_call(
    api: &DistributedApi,
    args: CallArgs,
    permissions: PermissionSet,
) -> Result<AggregateResult, RouterError> {
    let mut builder = api
        .call_spec(&args.operation)?
        .args(args.args)
        .permissions(permissions)
        .synchronous(!args.asynchronous)
        .wait_for_complete(args.wait_for_complete);
    if let Some(mode) = args.mode {
        builder = builder.routing_mode(mode);
    }
    if let Some(secs) = args.timeout {
        builder = builder.timeout(Duration::from_secs(secs));
    }
    let spec = builder.build()?;
    api.distribute(&spec).await
}

async fn call(config: &Config, args: CallArgs) -> Result<ExitCode> {
    let permissions =
        PermissionSet::parse(&args.permissions).context("invalid --permission token")?;
    let api = local_cluster(config);

    match run_call(&api, args, permissions).await {
        Ok(result) => {
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            println!("{}", serde_json::to_string_pretty(&e.to_structured())?);
            Ok(ExitCode::FAILURE)
        }
    }
}
