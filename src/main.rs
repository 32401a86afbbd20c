// Copyright 2025 The Kubernetes Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! frontend-operator - reconciles federated frontends on Kubernetes.
//!
//! `frontend-operator run` watches Frontend, FrontendEnvironment and Bundle
//! resources and keeps their Deployments, Ingresses and environment
//! ConfigMaps up to date. `frontend-operator crds` prints the
//! CustomResourceDefinitions to install.

#![warn(clippy::all)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Args as ClapArgs, Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use frontend_operator::config::OperatorConfig;
use frontend_operator::controller_manager::ControllerManager;
use frontend_operator::crd::crd_manifests;
use frontend_operator::frontend_controller::FrontendController;
use frontend_operator::health::HealthServer;
use frontend_operator::store::KubeStore;

/// Frontend Operator
///
/// Deploys frontend micro-applications into environments and maintains the
/// module federation and navigation documents every environment serves.
#[derive(Parser, Debug)]
#[command(name = "frontend-operator")]
#[command(version)]
#[command(about = "Kubernetes operator for federated frontends", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Enable JSON logging
    #[arg(long, global = true)]
    log_json: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the operator (default)
    Run(RunArgs),

    /// Print the CustomResourceDefinitions as YAML
    Crds,
}

#[derive(ClapArgs, Debug, Default)]
struct RunArgs {
    /// Path to the kubeconfig file
    #[arg(long, env = "KUBECONFIG")]
    kubeconfig: Option<PathBuf>,

    /// Master URL to build a client from
    #[arg(long)]
    master: Option<String>,

    /// Path to the configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Namespace to watch; all namespaces when empty
    #[arg(long, env = "WATCH_NAMESPACE")]
    namespace: Option<String>,

    /// Number of environments reconciled concurrently
    #[arg(long)]
    concurrent_syncs: Option<usize>,

    /// Period between full resyncs
    #[arg(long, value_parser = parse_duration)]
    resync_period: Option<Duration>,

    /// Deadline for a single reconcile
    #[arg(long, value_parser = parse_duration)]
    reconcile_timeout: Option<Duration>,

    /// The address to serve health checks on
    #[arg(long)]
    healthz_bind_address: Option<String>,

    /// Port for the health check server
    #[arg(long)]
    healthz_bind_port: Option<u16>,
}

fn parse_duration(s: &str) -> anyhow::Result<Duration> {
    humantime::parse_duration(s).map_err(|e| anyhow::anyhow!("invalid duration: {}", e))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    match args.command {
        Some(Command::Crds) => {
            print!("{}", crd_manifests().context("failed to render CRDs")?);
            Ok(())
        }
        Some(Command::Run(run_args)) => {
            init_logging(&args.log_level, args.log_json)?;
            run(run_args).await
        }
        None => {
            init_logging(&args.log_level, args.log_json)?;
            run(RunArgs::default()).await
        }
    }
}

async fn run(args: RunArgs) -> anyhow::Result<()> {
    info!(version = frontend_operator::VERSION, "starting frontend-operator");

    let config = Arc::new(load_config(args).await?);
    info!(
        namespace = config.generic.watch_namespace().unwrap_or("*"),
        concurrent_syncs = config.generic.concurrent_syncs,
        resync_period = %humantime::format_duration(config.generic.resync_period),
        "configuration loaded"
    );

    let client = create_client(&config).await?;
    let store = Arc::new(KubeStore::new(
        client,
        config.generic.watch_namespace().map(str::to_string),
    ));

    let controller = FrontendController::new(store.clone(), &config)?;
    let mut manager = ControllerManager::new(config.clone());
    manager.register(Arc::new(controller));

    let shutdown_token = manager.shutdown_token();

    let health = HealthServer::new(
        config.generic.healthz_bind_address.clone(),
        config.generic.healthz_bind_port,
    );
    manager.register_health_checks(health.registry()).await;
    let health_task = health.spawn(shutdown_token.clone());

    let watchers = {
        let store = store.clone();
        let cancel = shutdown_token.clone();
        tokio::spawn(async move { store.run_watchers(cancel).await })
    };

    {
        let shutdown_token = shutdown_token.clone();
        tokio::spawn(async move {
            wait_for_shutdown().await;
            shutdown_token.cancel();
        });
    }

    let result = manager.run().await;
    shutdown_token.cancel();

    if let Err(e) = watchers.await {
        error!(error = %e, "watcher task failed");
    }
    match health_task.await {
        Ok(Err(e)) => error!(error = %e, "health server failed"),
        Err(e) => error!(error = %e, "health server task failed"),
        Ok(Ok(())) => {}
    }

    if let Err(e) = result {
        error!("controller manager failed: {:#}", e);
        return Err(e.into());
    }

    info!("frontend-operator exited successfully");
    Ok(())
}

/// Initializes logging based on the provided level and format.
fn init_logging(level: &str, json: bool) -> anyhow::Result<()> {
    let env_filter = EnvFilter::builder()
        .with_default_directive(
            level
                .parse()
                .with_context(|| format!("invalid log level: {}", level))?,
        )
        .from_env_lossy();

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().pretty())
            .init();
    }
    Ok(())
}

/// Loads the configuration from file, then applies command-line overrides.
async fn load_config(mut args: RunArgs) -> anyhow::Result<OperatorConfig> {
    let mut config = if let Some(config_path) = args.config.take() {
        let content = tokio::fs::read_to_string(&config_path)
            .await
            .with_context(|| format!("failed to read config file: {:?}", config_path))?;

        serde_yaml::from_str::<OperatorConfig>(&content)
            .with_context(|| format!("failed to parse config file: {:?}", config_path))?
    } else {
        OperatorConfig::default()
    };

    if let Some(kubeconfig) = args.kubeconfig {
        config.generic.kubeconfig = Some(kubeconfig);
    }
    if let Some(master) = args.master {
        config.generic.master = Some(master);
    }
    if let Some(namespace) = args.namespace {
        config.generic.namespace = namespace;
    }
    if let Some(concurrent_syncs) = args.concurrent_syncs {
        config.generic.concurrent_syncs = concurrent_syncs;
    }
    if let Some(period) = args.resync_period {
        config.generic.resync_period = period;
    }
    if let Some(timeout) = args.reconcile_timeout {
        config.reconcile.timeout = timeout;
    }
    if let Some(address) = args.healthz_bind_address {
        config.generic.healthz_bind_address = address;
    }
    if let Some(port) = args.healthz_bind_port {
        config.generic.healthz_bind_port = port;
    }

    Ok(config)
}

/// Creates a Kubernetes client from the configuration.
async fn create_client(config: &OperatorConfig) -> anyhow::Result<kube::Client> {
    use kube::config::{KubeConfigOptions, Kubeconfig};
    use kube::Config;

    let kube_config = if let Some(kubeconfig_path) = &config.generic.kubeconfig {
        let kubeconfig = Kubeconfig::read_from(kubeconfig_path)
            .with_context(|| format!("failed to read kubeconfig from: {:?}", kubeconfig_path))?;
        Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .with_context(|| format!("failed to load kubeconfig from: {:?}", kubeconfig_path))?
    } else if let Some(master_url) = &config.generic.master {
        let uri = master_url
            .parse::<http::Uri>()
            .with_context(|| format!("invalid master URL: {}", master_url))?;
        Config::new(uri)
    } else {
        Config::infer().await.context("failed to load kubeconfig")?
    };

    kube::Client::try_from(kube_config).context("failed to create kubernetes client")
}

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn wait_for_shutdown() {
    use tokio::signal;

    #[cfg(unix)]
    {
        let sigterm = signal::unix::signal(signal::unix::SignalKind::terminate());
        let sigint = signal::unix::signal(signal::unix::SignalKind::interrupt());

        match (sigterm, sigint) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => {
                        info!("received SIGTERM, shutting down");
                    }
                    _ = sigint.recv() => {
                        info!("received SIGINT, shutting down");
                    }
                }
            }
            (Err(e), _) | (_, Err(e)) => {
                error!(error = %e, "failed to install signal handlers, falling back to ctrl-c");
                if signal::ctrl_c().await.is_ok() {
                    info!("received ctrl-c, shutting down");
                }
            }
        }
    }

    #[cfg(not(unix))]
    {
        if signal::ctrl_c().await.is_ok() {
            info!("received ctrl-c, shutting down");
        }
    }
}
