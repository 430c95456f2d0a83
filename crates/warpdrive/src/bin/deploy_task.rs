/*
 * Warpdrive - Deploy Task Runner
 * Copyright (C) 2025 Warpdrive team
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published
 * by the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 */

//! Deploy Task Runner - executes one pipeline task against the cluster
//!
//! Reads a task payload, runs it through the plugin lifecycle and prints the
//! final payload to stdout. Logs go to stderr. Ctrl+C or SIGTERM cancels
//! the rollout watch. The process exits non-zero when the task ends in a
//! failure status; a disabled task exits zero with its status unchanged.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use warpdrive::{
    execute_task, plugin_for, KubeCluster, Payload, PipelineContext, PluginConfig, PluginDeps,
    ServiceClient,
};

#[derive(Parser)]
#[command(name = "deploy-task")]
#[command(about = "Update a service container image and wait for the rollout")]
#[command(version)]
struct Cli {
    /// Task payload JSON file.
    #[arg(long)]
    payload: PathBuf,

    /// Task type identifier (`deploy` or `reset_image`).
    #[arg(long, default_value = "deploy")]
    task_type: String,

    /// Plugin configuration file (or set `WARPDRIVE_CONFIG`).
    #[arg(long, env = "WARPDRIVE_CONFIG", default_value = "/config/warpdrive.yaml")]
    config: String,

    /// Pipeline the task belongs to.
    #[arg(long, default_value = "manual")]
    pipeline: String,

    #[arg(long, default_value_t = 0)]
    task_id: i64,

    /// Emit logs as JSON lines.
    #[arg(long)]
    log_json: bool,
}

fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| "info,warpdrive=debug".into());
    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| fmt::layer().json().with_writer(std::io::stderr)))
        .with((!json).then(|| fmt::layer().with_writer(std::io::stderr)))
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C, cancelling task");
        },
        () = terminate => {
            info!("Received SIGTERM, cancelling task");
        },
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    info!(
        "Starting deploy task runner v{}",
        env!("CARGO_PKG_VERSION")
    );

    let config = PluginConfig::from_mounted_file(&cli.config)?;
    config.validate()?;

    let raw = std::fs::read_to_string(&cli.payload)
        .with_context(|| format!("Failed to read payload {}", cli.payload.display()))?;
    let payload: Payload = serde_json::from_str(&raw).context("Payload is not a JSON object")?;

    let client = kube::Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;
    let deps = PluginDeps {
        cluster: Arc::new(KubeCluster::new(client)),
        catalog: Arc::new(ServiceClient::new(&config.service_api)?),
        config: Arc::new(config),
    };

    let mut plugin = plugin_for(&cli.task_type, &deps)?;
    let file_name = cli
        .payload
        .file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_default();
    plugin.init(&cli.pipeline, &file_name);
    plugin.set_task(payload)?;

    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_token.cancel();
    });

    let pipeline = PipelineContext {
        pipeline_name: cli.pipeline,
        task_id: cli.task_id,
    };
    let status = execute_task(plugin.as_mut(), &pipeline, &cancel).await;

    let output = plugin.get_task()?;
    println!("{}", serde_json::to_string_pretty(&output)?);

    if status.is_failure() {
        error!(status = %status, "Task failed");
        std::process::exit(1);
    }
    Ok(())
}
