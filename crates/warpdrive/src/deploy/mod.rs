//! # Deploy Task Plugin
//!
//! Replaces one service container's image in an environment and follows the
//! rollout until it converges:
//!
//! 1. **Run** refuses sleeping environments, resolves the controllers backing
//!    the service (by recorded kind, ownership labels, or rendered manifests)
//!    and patches the container image in the first match of each kind.
//! 2. **Wait** fingerprints the new controller generation and polls pods and
//!    controllers until ready, a pod fails terminally, the deadline passes or
//!    the caller cancels.
//!
//! Failures are recorded on the task at a single point per phase.

pub mod mutator;
pub mod readiness;
pub mod resolver;
pub mod watcher;


use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};

use crate::cluster::ClusterAccess;
use crate::config::PluginConfig;
use crate::error::{Error, Result};
use crate::plugin::{AckFn, PipelineContext, PluginDeps, TaskPlugin};
use crate::service::ServiceCatalog;
use crate::task::{DeployTask, Payload, TaskPayload, TaskStatus, TaskType};

use resolver::WorkloadResolver;
use watcher::{Conclusion, RolloutWatcher};

pub struct DeployTaskPlugin {
    task_type: TaskType,
    job_name: String,
    task: DeployTask,
    cluster: Arc<dyn ClusterAccess>,
    catalog: Arc<dyn ServiceCatalog>,
    config: Arc<PluginConfig>,
    ack: Option<AckFn>,
    span: Span,
}

impl DeployTaskPlugin {
    #[must_use]
    pub fn new(task_type: TaskType, deps: PluginDeps) -> Self {
        Self {
            task_type,
            job_name: String::new(),
            task: DeployTask::default(),
            cluster: deps.cluster,
            catalog: deps.catalog,
            config: deps.config,
            ack: None,
            span: Span::none(),
        }
    }

    #[must_use]
    pub fn task(&self) -> &DeployTask {
        &self.task
    }

    fn ack(&self) {
        if let Some(ack) = &self.ack {
            ack();
        }
    }

    /// Resolve the service's workloads and patch their image.
    async fn replace_image(&mut self) -> Result<()> {
        let cluster = Arc::clone(&self.cluster);
        let catalog = Arc::clone(&self.catalog);
        let config = Arc::clone(&self.config);

        let version = cluster.server_version().await?;

        let env = catalog
            .environment(&self.task.product_name, &self.task.env_name)
            .await?;
        if env.is_sleeping() {
            return Err(Error::precondition(format!(
                "product {}/{} is sleeping",
                self.task.product_name, self.task.env_name
            )));
        }

        let service = catalog
            .service_template(
                &self.task.service_name,
                &self.task.service_type,
                &self.task.product_name,
                0,
            )
            .await?;

        let resolver = WorkloadResolver::new(
            cluster.as_ref(),
            catalog.as_ref(),
            &config.labels,
            &self.task.namespace,
            version.uses_legacy_cron_jobs(),
        );
        let workloads = match service.workload_kind()? {
            Some(kind) => resolver.resolve_known(kind, &self.task.service_name).await?,
            None => {
                resolver
                    .discover(
                        &self.task.env_name,
                        &self.task.product_name,
                        &self.task.service_name,
                    )
                    .await?
            }
        };

        mutator::replace_images(cluster.as_ref(), &workloads, &mut self.task).await
    }

    /// Record a watch outcome on the task.
    fn conclude(&mut self, conclusion: Conclusion) {
        match conclusion {
            Conclusion::Passed => {
                info!("Rollout converged");
                self.task.set_status(TaskStatus::Passed);
            }
            Conclusion::Failed(err) => {
                error!(error = %err, kind = err.kind(), "Rollout failed");
                self.task.settle(&err);
            }
            Conclusion::Timeout(details) => {
                let err = Error::ReadinessTimeout {
                    details: details.unwrap_or_default(),
                };
                warn!(kind = err.kind(), timeout_secs = self.task.timeout, "Rollout timed out");
                self.task.settle(&err);
            }
            Conclusion::Cancelled => {
                info!(kind = Error::Cancelled.kind(), "Rollout watch cancelled");
                self.task.settle(&Error::Cancelled);
            }
        }
    }
}

#[async_trait]
impl TaskPlugin for DeployTaskPlugin {
    fn init(&mut self, job_name: &str, file_name: &str) {
        self.job_name = job_name.to_string();
        self.span = info_span!(
            "task_plugin",
            task_type = %self.task_type,
            job = %job_name,
            file = %file_name
        );
    }

    fn task_type(&self) -> TaskType {
        self.task_type
    }

    fn status(&self) -> TaskStatus {
        self.task.task_status
    }

    fn set_status(&mut self, status: TaskStatus) {
        self.task.set_status(status);
    }

    fn task_timeout(&mut self) -> u64 {
        self.task
            .effective_timeout(self.config.deploy.default_timeout_secs)
    }

    async fn run(&mut self, cancel: &CancellationToken, pipeline: &PipelineContext) {
        let span = self.span.clone();
        async {
            if cancel.is_cancelled() {
                info!("Cancelled before image replacement");
                self.task.settle(&Error::Cancelled);
                return;
            }

            info!(
                pipeline = %pipeline.pipeline_name,
                task_id = pipeline.task_id,
                env = %self.task.env_name,
                service = %self.task.service_name,
                container = %self.task.container_name,
                image = %self.task.image,
                "Replacing service image"
            );

            if let Err(err) = self.replace_image().await {
                error!(error = %err, kind = err.kind(), "Image replacement failed");
                self.task.fail(&err);
            }
            self.ack();
        }
        .instrument(span)
        .await;
    }

    async fn wait(&mut self, cancel: &CancellationToken) {
        let span = self.span.clone();
        async {
            if self.task.skip_waiting {
                debug!("Skipping rollout watch");
                self.task.set_status(TaskStatus::Passed);
                return;
            }

            let timeout = self.task_timeout();
            let deadline = Instant::now() + Duration::from_secs(timeout);

            let cluster = Arc::clone(&self.cluster);
            let config = Arc::clone(&self.config);
            let namespace = self.task.namespace.clone();
            let watcher = RolloutWatcher::new(cluster.as_ref(), &namespace, &config.deploy);

            let mut resources = self.task.replace_resources.clone();
            if let Err(err) = watcher.fingerprint(&mut resources, cancel).await {
                let err = Error::OwnerLookup(Box::new(err));
                error!(error = %err, kind = err.kind(), "Rollout fingerprint failed");
                self.task.fail(&err);
                return;
            }
            self.task.replace_resources = resources;

            let conclusion = watcher
                .watch(
                    &self.task.replace_resources,
                    &self.task.related_pod_labels,
                    deadline,
                    cancel,
                )
                .await;
            self.conclude(conclusion);
        }
        .instrument(span)
        .await;
    }

    async fn complete(&mut self, pipeline: &PipelineContext) {
        debug!(
            parent: &self.span,
            pipeline = %pipeline.pipeline_name,
            task_id = pipeline.task_id,
            job = %self.job_name,
            status = %self.task.task_status,
            "Deploy task complete"
        );
    }

    fn set_task(&mut self, payload: Payload) -> Result<()> {
        self.task = DeployTask::from_payload(payload)?;
        Ok(())
    }

    fn get_task(&self) -> Result<Payload> {
        self.task.to_payload()
    }

    fn is_task_enabled(&self) -> bool {
        self.task.enabled
    }

    fn set_start_time(&mut self) {
        self.task.start_time = chrono::Utc::now().timestamp();
    }

    fn set_end_time(&mut self) {
        self.task.end_time = chrono::Utc::now().timestamp();
    }

    fn reset_error(&mut self) {
        self.task.error.clear();
    }

    fn set_ack_func(&mut self, ack: Option<AckFn>) {
        self.ack = ack;
    }
}
