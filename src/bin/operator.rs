//! Operator binary

use clap::{Args, Parser, Subcommand};
use redcluster::cluster::{AdminSession, TcpConnector};
use redcluster::common::{ClusterConfig, Config};
use redcluster::operator::{
    Controller, DesiredSpec, NoopEnsurer, ReconcileOutcome, Reconciler, StaticEnumerator,
    TcpReadinessGate,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "redcluster-operator")]
#[command(about = "Forms a sharded, replicated cluster out of fresh nodes")]
#[command(version)]
struct Cli {
    /// Config file (defaults to ./redcluster.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level, overrides the config file
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconcile continuously until interrupted
    Run(ClusterArgs),

    /// Run a single reconcile pass
    Reconcile(ClusterArgs),

    /// Print what every member reports about itself, as JSON
    Status(ClusterArgs),
}

#[derive(Args, Clone)]
struct ClusterArgs {
    /// Cluster namespace
    #[arg(long)]
    namespace: Option<String>,

    /// Cluster name
    #[arg(long)]
    name: Option<String>,

    /// Number of masters
    #[arg(long)]
    masters: Option<usize>,

    /// Replicas per master
    #[arg(long)]
    replicas: Option<usize>,

    /// Member addresses in ordinal order (comma-separated)
    #[arg(long, value_delimiter = ',')]
    members: Vec<SocketAddr>,

    /// Password for node connections
    #[arg(long, env = "REDCLUSTER_PASSWORD")]
    password: Option<String>,
}

/// Merge flags over the loaded config (flags win).
fn merge(mut config: Config, args: &ClusterArgs) -> anyhow::Result<(Config, ClusterConfig)> {
    let mut cluster = match config.cluster.take() {
        Some(cluster) => cluster,
        None => {
            let name = args
                .name
                .clone()
                .ok_or_else(|| anyhow::anyhow!("--name is required without a [cluster] config"))?;
            let masters = args
                .masters
                .ok_or_else(|| anyhow::anyhow!("--masters is required without a [cluster] config"))?;
            ClusterConfig {
                namespace: "default".to_string(),
                name,
                masters,
                replicas_per_master: 0,
                members: Vec::new(),
                readiness_timeout: std::time::Duration::from_secs(5),
            }
        }
    };

    if let Some(namespace) = &args.namespace {
        cluster.namespace = namespace.clone();
    }
    if let Some(name) = &args.name {
        cluster.name = name.clone();
    }
    if let Some(masters) = args.masters {
        cluster.masters = masters;
    }
    if let Some(replicas) = args.replicas {
        cluster.replicas_per_master = replicas;
    }
    if !args.members.is_empty() {
        cluster.members = args.members.clone();
    }
    if args.password.is_some() {
        config.connection.password = args.password.clone();
    }

    config.cluster = Some(cluster.clone());
    config.validate()?;
    Ok((config, cluster))
}

fn init_tracing(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.log_level.clone().into());
    let registry = tracing_subscriber::registry().with(filter);
    if config.log_json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

fn build_reconciler(config: &Config, cluster: &ClusterConfig) -> (Reconciler, DesiredSpec) {
    let spec = DesiredSpec::from(cluster);
    let enumerator = StaticEnumerator::new(spec.identity.clone(), &cluster.members);
    let readiness = TcpReadinessGate::new(enumerator.clone(), cluster.readiness_timeout);
    let reconciler = Reconciler::new(
        Arc::new(NoopEnsurer),
        Arc::new(readiness),
        Arc::new(enumerator),
        Arc::new(TcpConnector),
        config.connection.clone(),
    );
    (reconciler, spec)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(level) = &cli.log_level {
        config.log_level = level.clone();
    }
    init_tracing(&config);

    match &cli.command {
        Commands::Run(args) => {
            let (config, cluster) = merge(config, args)?;
            let (reconciler, spec) = build_reconciler(&config, &cluster);

            let cancel = CancellationToken::new();
            let shutdown = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("Shutdown requested");
                    shutdown.cancel();
                }
            });

            Controller::new(reconciler, config.requeue.clone())
                .run(spec, cancel)
                .await;
        }

        Commands::Reconcile(args) => {
            let (config, cluster) = merge(config, args)?;
            let (reconciler, spec) = build_reconciler(&config, &cluster);

            match reconciler.reconcile(&spec, &CancellationToken::new()).await {
                Ok(ReconcileOutcome::Bootstrapped { masters, replicas }) => {
                    println!("Bootstrapped {}: {} masters, {} replicas", spec.identity, masters, replicas);
                }
                Ok(outcome) => println!("{}: {:?}", spec.identity, outcome),
                Err(e) => {
                    let delay = e.requeue_after(&config.requeue);
                    anyhow::bail!("{} (retry in {:?})", e, delay);
                }
            }
        }

        Commands::Status(args) => {
            let (config, cluster) = merge(config, args)?;
            let spec = DesiredSpec::from(&cluster);
            let members = StaticEnumerator::new(spec.identity.clone(), &cluster.members)
                .members()
                .to_vec();

            let mut session = AdminSession::open(&members, &TcpConnector, &config.connection).await?;
            let view = session.introspect().await;
            session.close().await;
            let view = view?;

            println!("{}", serde_json::to_string_pretty(&view)?);
            println!(
                "empty: {}, covered slots: {}",
                view.is_unconfigured(),
                view.coverage()
            );
        }
    }

    Ok(())
}
