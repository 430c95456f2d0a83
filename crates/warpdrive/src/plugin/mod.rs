//! # Task Plugin Contract
//!
//! The uniform surface a pipeline scheduler drives every task type through.
//! A scheduler builds a plugin with [`initialize_task_plugin`], hands it the
//! persisted payload, then calls `run`, `wait` and `complete` in order
//! (see [`runner::execute_task`]). Plugin failures never escape as errors:
//! they end up in the task's status and error text, read back through
//! `get_task`.

pub mod runner;

use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::cluster::ClusterAccess;
use crate::config::PluginConfig;
use crate::deploy::DeployTaskPlugin;
use crate::error::Result;
use crate::service::ServiceCatalog;
use crate::task::{Payload, TaskStatus, TaskType};

pub use runner::execute_task;

/// Callback a plugin may invoke to push intermediate state upstream.
pub type AckFn = Arc<dyn Fn() + Send + Sync>;

/// Identity of the pipeline run a task belongs to.
#[derive(Debug, Clone, Default)]
pub struct PipelineContext {
    pub pipeline_name: String,
    pub task_id: i64,
}

/// Shared collaborators injected into every plugin.
#[derive(Clone)]
pub struct PluginDeps {
    pub cluster: Arc<dyn ClusterAccess>,
    pub catalog: Arc<dyn ServiceCatalog>,
    pub config: Arc<PluginConfig>,
}

#[async_trait]
pub trait TaskPlugin: Send + Sync {
    /// Bind the plugin to a job; sets up its log context.
    fn init(&mut self, job_name: &str, file_name: &str);

    fn task_type(&self) -> TaskType;

    fn status(&self) -> TaskStatus;

    /// Terminal statuses are sticky; later requests are ignored.
    fn set_status(&mut self, status: TaskStatus);

    /// Seconds the rollout may take; an unset timeout is replaced by the
    /// configured default and persisted on the task.
    fn task_timeout(&mut self) -> u64;

    async fn run(&mut self, cancel: &CancellationToken, pipeline: &PipelineContext);

    async fn wait(&mut self, cancel: &CancellationToken);

    async fn complete(&mut self, pipeline: &PipelineContext);

    fn set_task(&mut self, payload: Payload) -> Result<()>;

    fn get_task(&self) -> Result<Payload>;

    fn is_task_done(&self) -> bool {
        self.status().is_terminal()
    }

    fn is_task_failed(&self) -> bool {
        self.status().is_failure()
    }

    fn is_task_enabled(&self) -> bool;

    fn set_start_time(&mut self);

    fn set_end_time(&mut self);

    fn reset_error(&mut self);

    fn set_ack_func(&mut self, ack: Option<AckFn>);
}

/// Build the plugin registered for `task_type`.
#[must_use]
pub fn initialize_task_plugin(task_type: TaskType, deps: &PluginDeps) -> Box<dyn TaskPlugin> {
    match task_type {
        TaskType::Deploy | TaskType::ResetImage => {
            Box::new(DeployTaskPlugin::new(task_type, deps.clone()))
        }
    }
}

/// Build a plugin from its job-type identifier, e.g. `"deploy"`.
pub fn plugin_for(identifier: &str, deps: &PluginDeps) -> Result<Box<dyn TaskPlugin>> {
    let task_type = identifier.parse::<TaskType>()?;
    Ok(initialize_task_plugin(task_type, deps))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::service::MockServiceCatalog;
    use crate::testing::FakeCluster;

    fn deps() -> PluginDeps {
        PluginDeps {
            cluster: Arc::new(FakeCluster::default()),
            catalog: Arc::new(MockServiceCatalog::new()),
            config: Arc::new(PluginConfig::default()),
        }
    }

    #[test]
    fn factory_dispatches_on_task_type() {
        let deps = deps();
        let plugin = initialize_task_plugin(TaskType::Deploy, &deps);
        assert_eq!(plugin.task_type(), TaskType::Deploy);
        assert_eq!(plugin.status(), TaskStatus::Created);

        let plugin = plugin_for("reset_image", &deps).unwrap();
        assert_eq!(plugin.task_type(), TaskType::ResetImage);
    }

    #[test]
    fn unknown_identifier_is_rejected() {
        assert!(matches!(
            plugin_for("security_scan", &deps()),
            Err(Error::UnsupportedTaskType(_))
        ));
    }
}
