//! The `gantry` binary: assemble the configured blueprint, then either show
//! the creation plan or hand the deployment to the engine.
//!
//! Configuration is layered: compiled defaults, then `gantry.toml`, then
//! `GANTRY_*` environment variables, then flags. Logs go to stderr so
//! `--json` output stays parseable.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{ArgAction, Args, Parser, Subcommand};
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use gantry_deploy::{DeployConfig, assemble};
use gantry_engine::Engine;
use gantry_graph::DependencyGraph;
use gantry_provider::{
    CommandRunner, ProcessRunner, Provider, ProviderContext, SimProvider, SimRunner,
};

#[derive(Parser, Debug)]
#[command(
    name = "gantry",
    version,
    about = "Declarative provisioning with asynchronous output propagation"
)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,
    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct GlobalArgs {
    /// Path to the configuration file.
    #[arg(long, global = true, default_value = "gantry.toml")]
    config: PathBuf,
    /// Increase log verbosity (repeatable).
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,
    /// Silence log output entirely.
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Provision the configured environment.
    Up(UpArgs),
    /// Show creation waves and dependency edges without creating anything.
    Plan(PlanArgs),
}

#[derive(Args, Debug)]
struct UpArgs {
    /// Emit the run report as JSON on stdout.
    #[arg(long)]
    json: bool,
    /// Execute command steps for real instead of simulating them.
    #[arg(long)]
    exec: bool,
    /// Override the configured environment tag.
    #[arg(long)]
    environment: Option<String>,
    /// Override the configured region.
    #[arg(long)]
    location: Option<String>,
}

#[derive(Args, Debug)]
struct PlanArgs {
    /// Emit the plan as JSON on stdout.
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.global);
    match cli.command {
        Command::Up(args) => up(&cli.global, args).await,
        Command::Plan(args) => plan(&cli.global, args),
    }
}

fn init_tracing(global: &GlobalArgs) {
    let default_filter = if global.quiet {
        "off"
    } else {
        match global.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(global: &GlobalArgs) -> Result<DeployConfig> {
    Figment::from(Serialized::defaults(DeployConfig::default()))
        .merge(Toml::file(&global.config))
        .merge(Env::prefixed("GANTRY_").split("__"))
        .extract()
        .context("invalid configuration")
}

async fn up(global: &GlobalArgs, args: UpArgs) -> Result<()> {
    let mut config = load_config(global)?;
    if let Some(environment) = args.environment {
        config.environment = environment;
    }
    if let Some(location) = args.location {
        config.location = location;
    }

    let deployment = assemble(&config).context("assembling the blueprint failed")?;
    let ctx = ProviderContext::new(&config.environment, &config.location);

    // Resource creation always goes through the simulator; real cloud
    // transport is a separate provider implementation. Command steps run for
    // real only on request.
    let provider: Arc<dyn Provider> = Arc::new(SimProvider::new());
    let runner: Arc<dyn CommandRunner> = if args.exec {
        Arc::new(ProcessRunner::new())
    } else {
        // The rehearsal still seeds the operator firewall rule with a
        // believable address.
        Arc::new(SimRunner::new().with_stdout("operator-ip", "198.51.100.42\n"))
    };
    let engine = Engine::new(provider, runner);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling run");
            trigger.cancel();
        }
    });

    let report = engine.run_with_cancellation(deployment, ctx, cancel).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", report.render());
    }
    if !report.is_success() {
        bail!("run finished {}", report.status);
    }
    Ok(())
}

#[derive(Serialize)]
struct PlanView {
    deployment: String,
    waves: Vec<Vec<String>>,
    edges: Vec<PlanEdge>,
}

#[derive(Serialize)]
struct PlanEdge {
    from: String,
    to: String,
    kind: String,
}

fn plan(global: &GlobalArgs, args: PlanArgs) -> Result<()> {
    let config = load_config(global)?;
    let deployment = assemble(&config).context("assembling the blueprint failed")?;
    let graph = DependencyGraph::from_deployment(&deployment)?;

    if args.json {
        let view = PlanView {
            deployment: deployment.name().to_owned(),
            waves: graph
                .creation_waves()
                .into_iter()
                .map(|wave| wave.into_iter().map(|key| key.to_string()).collect())
                .collect(),
            edges: graph
                .edges()
                .into_iter()
                .map(|(from, to, kind)| PlanEdge {
                    from: from.to_string(),
                    to: to.to_string(),
                    kind: kind.to_string(),
                })
                .collect(),
        };
        println!("{}", serde_json::to_string_pretty(&view)?);
        return Ok(());
    }

    println!(
        "deployment `{}`: {} nodes, {} edges",
        deployment.name(),
        graph.node_count(),
        graph.edge_count(),
    );
    for (i, wave) in graph.creation_waves().iter().enumerate() {
        println!("\nwave {}:", i + 1);
        for key in wave {
            println!("  {key}");
        }
    }
    println!("\nedges:");
    for (from, to, kind) in graph.edges() {
        println!("  {from} -> {to} ({kind})");
    }
    Ok(())
}
