//! failover-probe - graceful-restart connectivity harness CLI

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use failover_probe::cluster::KubeCluster;
use failover_probe::config::HarnessSettings;
use failover_probe::echo::EchoServer;
use failover_probe::endpoint::IpFamilyPolicy;
use failover_probe::harness::{Harness, ProbeMode};
use failover_probe::kube_utils::create_client;
use failover_probe::telemetry::{self, LogFormat};

/// Probe a load-balanced service while its backing pod is replaced
#[derive(Parser, Debug)]
#[command(name = "failover-probe", version, about, long_about = None)]
struct Cli {
    /// Log output format (text or json)
    #[arg(long, global = true, env = "FAILOVER_PROBE_LOG_FORMAT", default_value = "text")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the graceful-restart harness against a cluster
    Run(RunArgs),

    /// Serve a loopback echo target for local runs
    Echo {
        /// Address to listen on
        #[arg(long, default_value = "127.0.0.1:8080")]
        listen: SocketAddr,
    },
}

/// Harness arguments; flags override values from `--config`
#[derive(Parser, Debug)]
struct RunArgs {
    /// YAML settings file
    #[arg(short = 'f', long = "config", env = "FAILOVER_PROBE_CONFIG")]
    config_file: Option<PathBuf>,

    /// Kubeconfig path (defaults to in-cluster or KUBECONFIG)
    #[arg(long, env = "KUBECONFIG")]
    kubeconfig: Option<PathBuf>,

    /// Namespace of the service under test
    #[arg(long)]
    service_namespace: Option<String>,

    /// Name of the service under test
    #[arg(long)]
    service: Option<String>,

    /// Namespace of the backend pods
    #[arg(long)]
    backend_namespace: Option<String>,

    /// Label selector of the backend pods
    #[arg(long)]
    selector: Option<String>,

    /// Node whose backend pod is replaced
    #[arg(long)]
    node: Option<String>,

    /// Probe mode (single or multiple)
    #[arg(long)]
    mode: Option<ProbeMode>,

    /// Address families to probe (v4, v6 or dual)
    #[arg(long)]
    family: Option<IpFamilyPolicy>,

    /// Probe units per address family
    #[arg(long)]
    connections: Option<usize>,

    /// Global timeout for the run in seconds
    #[arg(long)]
    global_timeout_secs: Option<u64>,

    /// Write the verdict as JSON to this file
    #[arg(long)]
    report: Option<PathBuf>,

    /// Print the verdict as text or json
    #[arg(long, default_value = "text")]
    output: OutputFormat,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    telemetry::init(cli.log_format).map_err(|e| anyhow::anyhow!("{}", e))?;

    match cli.command {
        Commands::Run(args) => run(args).await,
        Commands::Echo { listen } => echo(listen).await,
    }
}

/// Merge file settings with flags
fn settings_from(args: &RunArgs) -> anyhow::Result<HarnessSettings> {
    let mut settings = match &args.config_file {
        Some(path) => HarnessSettings::load(path).map_err(|e| anyhow::anyhow!("{}", e))?,
        None => HarnessSettings::default(),
    };

    if let Some(ns) = &args.service_namespace {
        settings.service.namespace = ns.clone();
    }
    if let Some(name) = &args.service {
        settings.service.name = name.clone();
    }
    if let Some(ns) = &args.backend_namespace {
        settings.backends.namespace = ns.clone();
    }
    if let Some(selector) = &args.selector {
        settings.backends.label_selector = selector.clone();
    }
    if let Some(node) = &args.node {
        settings.backends.node = node.clone();
    }
    if let Some(mode) = args.mode {
        settings.mode = mode;
    }
    if let Some(family) = args.family {
        settings.families = family;
    }
    if let Some(connections) = args.connections {
        settings.connections_per_family = connections;
    }
    if let Some(secs) = args.global_timeout_secs {
        settings.global_timeout_secs = secs;
    }

    Ok(settings)
}

/// Run the harness and report the verdict
async fn run(args: RunArgs) -> anyhow::Result<()> {
    let config = settings_from(&args)?
        .into_config()
        .map_err(|e| anyhow::anyhow!("{}", e))?;

    // kube's rustls backend needs a process-wide crypto provider
    if rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .is_err()
    {
        tracing::debug!("Crypto provider already installed");
    }

    let client = create_client(args.kubeconfig.as_deref())
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create kube client: {}", e))?;

    let harness = Harness::new(Arc::new(KubeCluster::new(client)), config);
    let verdict = harness
        .run()
        .await
        .map_err(|e| anyhow::anyhow!("Harness aborted: {}", e))?;

    if let Some(path) = &args.report {
        let json = serde_json::to_string_pretty(&verdict)?;
        tokio::fs::write(path, json)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to write report {:?}: {}", path, e))?;
        tracing::info!(path = %path.display(), "Report written");
    }

    match args.output {
        OutputFormat::Text => print!("{verdict}"),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&verdict)?),
    }

    if verdict.passed {
        Ok(())
    } else {
        std::process::exit(1)
    }
}

/// Serve an echo target until Ctrl-C
async fn echo(listen: SocketAddr) -> anyhow::Result<()> {
    let server = EchoServer::bind(listen)
        .await
        .map_err(|e| anyhow::anyhow!("{}", e))?;
    println!("Echo target listening on {}", server.local_addr());

    let cancel = CancellationToken::new();
    let serve = tokio::spawn(server.serve(cancel.clone()));

    tokio::signal::ctrl_c().await?;
    cancel.cancel();
    serve.await?;
    Ok(())
}
