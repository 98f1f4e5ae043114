use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use buildfleet::channel::agent;
use buildfleet::config::FleetConfig;
use buildfleet::error::FleetError;
use buildfleet::launcher::{InboundAcceptor, LauncherCatalog};
use buildfleet::node::{FleetRegistry, Node};
use buildfleet::retention::{retention_sweep, jittered_interval, RetentionCatalog};
use buildfleet::shutdown::shutdown_token;

#[derive(Parser, Debug)]
#[command(name = "buildfleet")]
#[command(version)]
#[command(about = "Master-side agent fleet for distributed build execution")]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Run the fleet master
    Master(MasterArgs),

    /// Run an execution agent
    Agent(AgentArgs),
}

#[derive(Parser, Debug)]
struct MasterArgs {
    /// Address to accept inbound agents on
    #[arg(long, default_value = "127.0.0.1:7847")]
    listen: SocketAddr,

    /// Agent definitions, repeatable. Format:
    /// "name:remote_fs[:executors[:labels[:retention]]]",
    /// e.g. "linux-1:/work:2:linux docker:always"
    #[arg(long = "agent")]
    agents: Vec<String>,

    /// Interval between retention sweeps, in milliseconds
    #[arg(long, default_value = "5000")]
    sweep_interval_ms: u64,

    /// Handshake timeout after a channel opens, in milliseconds
    #[arg(long, default_value = "10000")]
    handshake_timeout_ms: u64,

    /// How long an inbound launch waits for the agent to dial in, in
    /// milliseconds
    #[arg(long, default_value = "10000")]
    inbound_wait_ms: u64,

    /// Agents launched by spawning a command, repeatable. Format:
    /// "name=remote_fs=program args", e.g.
    /// "ssh-1=/work=ssh build-host buildfleet agent --stdio --name ssh-1"
    #[arg(long = "command-agent")]
    command_agents: Vec<String>,
}

#[derive(Parser, Debug)]
struct AgentArgs {
    /// Master address to dial into (ignored with --stdio)
    #[arg(long, default_value = "127.0.0.1:7847")]
    master: String,

    /// Agent name to announce
    #[arg(long)]
    name: String,

    /// Root of the build filesystem on this machine
    #[arg(long, default_value = ".")]
    remote_fs: String,

    /// Serve the protocol on stdin/stdout instead of dialing the master.
    /// This is the mode a command launcher spawns, e.g. over SSH.
    #[arg(long)]
    stdio: bool,
}

fn parse_agent_spec(spec: &str, retention: &RetentionCatalog) -> Result<Node, FleetError> {
    let mut parts = spec.splitn(5, ':');
    let name = parts.next().unwrap_or_default();
    let remote_fs = parts
        .next()
        .ok_or_else(|| FleetError::InvalidConfig(format!("agent spec {spec:?} has no remote FS")))?;

    let mut builder = Node::builder(name, remote_fs);
    if let Some(executors) = parts.next() {
        let n: u32 = executors.parse().map_err(|_| {
            FleetError::InvalidConfig(format!("agent {name}: bad executor count {executors:?}"))
        })?;
        builder = builder.num_executors(n);
    }
    if let Some(labels) = parts.next() {
        builder = builder.label_string(labels);
    }
    let node = builder.build()?;
    if let Some(id) = parts.next() {
        let strategy = retention
            .get(id)
            .ok_or_else(|| FleetError::NotFound(format!("retention strategy {id}")))?;
        node.set_retention(strategy);
    }
    Ok(node)
}

fn parse_command_agent_spec(spec: &str, launchers: &LauncherCatalog) -> Result<Node, FleetError> {
    let mut parts = spec.splitn(3, '=');
    let name = parts.next().unwrap_or_default();
    let remote_fs = parts.next().ok_or_else(|| {
        FleetError::InvalidConfig(format!("command agent spec {spec:?} has no remote FS"))
    })?;
    let command = parts.next().ok_or_else(|| {
        FleetError::InvalidConfig(format!("command agent spec {spec:?} has no command"))
    })?;

    let mut words = command.split_whitespace();
    let program = words.next().ok_or_else(|| {
        FleetError::InvalidConfig(format!("command agent {name}: empty command"))
    })?;
    let params = HashMap::from([
        ("program".to_string(), program.to_string()),
        (
            "args".to_string(),
            words.collect::<Vec<_>>().join(" "),
        ),
    ]);

    let node = Node::builder(name, remote_fs).build()?;
    node.set_launcher(launchers.resolve("command", &params)?);
    Ok(node)
}

async fn run_master(args: MasterArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = FleetConfig {
        inbound_listen_addr: Some(args.listen),
        sweep_interval_ms: args.sweep_interval_ms,
        handshake_timeout_ms: args.handshake_timeout_ms,
        inbound_wait_ms: args.inbound_wait_ms,
        ..FleetConfig::default()
    };

    let retention = RetentionCatalog::builtin();
    let launchers = LauncherCatalog::builtin();

    let registry = Arc::new(FleetRegistry::anonymous());
    for spec in &args.agents {
        let node = parse_agent_spec(spec, &retention)?;
        registry.add_node(node);
    }
    for spec in &args.command_agents {
        let node = parse_command_agent_spec(spec, &launchers)?;
        registry.add_node(node);
    }
    tracing::info!(agents = registry.node_names().len(), "Fleet registry loaded");

    let shutdown = shutdown_token()?;

    let acceptor = InboundAcceptor::new();
    registry.set_inbound_acceptor(acceptor.clone(), config.inbound_wait());
    let listener = TcpListener::bind(args.listen).await?;
    tokio::spawn(acceptor.clone().run(listener, shutdown.clone()));

    loop {
        tokio::select! {
            _ = tokio::time::sleep(jittered_interval(&config)) => {
                retention_sweep(&registry, &config).await;
            }
            _ = shutdown.cancelled() => {
                break;
            }
        }
    }

    // Drain: close every live channel before exit.
    for name in registry.node_names() {
        if let Some(computer) = registry.computer_for(&name) {
            computer.disconnect().await;
        }
    }
    tracing::info!("Fleet master stopped");
    Ok(())
}

async fn run_agent(args: AgentArgs) -> Result<(), Box<dyn std::error::Error>> {
    if args.stdio {
        let io = tokio::io::join(tokio::io::stdin(), tokio::io::stdout());
        agent::serve(io, &args.name, &args.remote_fs).await?;
    } else {
        agent::run_agent(&args.master, &args.name, &args.remote_fs).await?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    match args.command {
        Commands::Master(master_args) => run_master(master_args).await,
        Commands::Agent(agent_args) => run_agent(agent_args).await,
    }
}
