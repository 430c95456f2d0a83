//! Single-task lifecycle as a scheduler drives it.

use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use super::{PipelineContext, TaskPlugin};
use crate::task::TaskStatus;

/// Drive one task through run, wait and complete.
///
/// Disabled tasks and tasks restored in a terminal status are returned
/// untouched. Wait is skipped once Run has already settled the task. Start
/// and end times are stamped around the whole lifecycle.
#[instrument(skip_all, fields(task_type = %plugin.task_type(), task_id = pipeline.task_id))]
pub async fn execute_task(
    plugin: &mut dyn TaskPlugin,
    pipeline: &PipelineContext,
    cancel: &CancellationToken,
) -> TaskStatus {
    if !plugin.is_task_enabled() {
        info!("Task disabled, skipping");
        return plugin.status();
    }
    if plugin.is_task_done() {
        info!(status = %plugin.status(), "Task already settled, skipping");
        return plugin.status();
    }

    plugin.set_start_time();
    plugin.reset_error();
    plugin.set_status(TaskStatus::Running);

    plugin.run(cancel, pipeline).await;
    if !plugin.is_task_done() {
        plugin.wait(cancel).await;
    }
    plugin.complete(pipeline).await;

    plugin.set_end_time();
    let status = plugin.status();
    info!(status = %status, "Task finished");
    status
}
