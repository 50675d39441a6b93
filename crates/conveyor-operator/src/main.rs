//! Conveyor Operator - CD pipeline stage provisioning

use std::sync::Arc;

use clap::{Parser, Subcommand};
use futures::StreamExt;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client};

use conveyor_common::config::{KIOSK_ENABLED_ENV, MANAGE_NAMESPACE_ENV, PLATFORM_TYPE_ENV};
use conveyor_common::crd::{all_crds, Stage};
use conveyor_common::telemetry::{init_telemetry, TelemetryConfig};
use conveyor_common::{Platform, PlatformConfig};
use conveyor_stage::{error_policy, reconcile, StageContext};

/// Conveyor - provisions and retires the stages of CD pipelines
#[derive(Parser, Debug)]
#[command(name = "conveyor", version, about, long_about = None)]
struct Cli {
    /// Generate CRD manifests and exit
    #[arg(long)]
    crd: bool,

    #[command(flatten)]
    platform: PlatformArgs,

    /// Emit human-readable logs instead of JSON
    #[arg(long, env = "LOG_PLAIN")]
    plain_logs: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Args, Debug)]
struct PlatformArgs {
    /// Platform stages are provisioned on: kubernetes or openshift
    #[arg(long, env = PLATFORM_TYPE_ENV, default_value_t = Platform::Openshift)]
    platform: Platform,

    /// Create and delete stage namespaces
    #[arg(
        long,
        env = MANAGE_NAMESPACE_ENV,
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    manage_namespace: bool,

    /// Request stage namespaces as kiosk spaces (kubernetes only)
    #[arg(
        long,
        env = KIOSK_ENABLED_ENV,
        default_value_t = false,
        action = clap::ArgAction::Set
    )]
    kiosk_enabled: bool,
}

impl From<PlatformArgs> for PlatformConfig {
    fn from(args: PlatformArgs) -> Self {
        Self {
            platform: args.platform,
            manage_namespace: args.manage_namespace,
            space_mode: args.kiosk_enabled,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the Stage controller (default mode)
    Controller,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.crd {
        for crd in all_crds() {
            let yaml = serde_yaml::to_string(&crd)
                .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
            println!("---\n{yaml}");
        }
        return Ok(());
    }

    init_telemetry(TelemetryConfig {
        json: !cli.plain_logs,
        ..Default::default()
    })?;

    match cli.command {
        Some(Commands::Controller) | None => run_controller(cli.platform.into()).await,
    }
}

async fn run_controller(config: PlatformConfig) -> anyhow::Result<()> {
    tracing::info!(
        platform = %config.platform,
        manage_namespace = config.manage_namespace,
        space_mode = config.space_mode,
        "starting stage controller"
    );

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    let stages: Api<Stage> = Api::all(client.clone());
    let ctx = Arc::new(StageContext::from_client(client, config));

    Controller::new(stages, WatcherConfig::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok(action) => {
                    tracing::debug!(?action, "Stage reconciliation completed");
                }
                Err(e) => {
                    tracing::error!(error = ?e, "Stage reconciliation error");
                }
            }
        })
        .await;

    tracing::info!("stage controller stopped");
    Ok(())
}
