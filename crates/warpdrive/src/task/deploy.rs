use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use super::payload::TaskPayload;
use super::status::TaskStatus;
use crate::error::Error;

/// Workload controller kinds the deploy plugin can mutate.
///
/// Legacy `batch/v1beta1` CronJobs are recorded as `CronJob`; they are
/// patched through the legacy API but are otherwise indistinguishable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkloadKind {
    Deployment,
    StatefulSet,
    CronJob,
}

impl WorkloadKind {
    /// Plural resource path segment, used in error messages.
    #[must_use]
    pub fn plural(self) -> &'static str {
        match self {
            Self::Deployment => "deployments",
            Self::StatefulSet => "statefulsets",
            Self::CronJob => "cronjobs",
        }
    }

    /// Whether Wait tracks this kind's rollout.
    ///
    /// CronJobs have no readiness notion and are only mutated.
    #[must_use]
    pub fn is_polled(self) -> bool {
        !matches!(self, Self::CronJob)
    }

    /// Parse the `kind` of a manifest or a service's workload type.
    #[must_use]
    pub fn from_kind(kind: &str) -> Option<Self> {
        match kind {
            "Deployment" => Some(Self::Deployment),
            "StatefulSet" => Some(Self::StatefulSet),
            "CronJob" => Some(Self::CronJob),
            _ => None,
        }
    }
}

impl std::fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Deployment => write!(f, "Deployment"),
            Self::StatefulSet => write!(f, "StatefulSet"),
            Self::CronJob => write!(f, "CronJob"),
        }
    }
}

/// One workload whose container image was replaced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub kind: WorkloadKind,
    pub name: String,
    pub container: String,
    /// Image before the patch; rollback material
    #[serde(rename = "origin")]
    pub original_image: String,
    /// UID of the controller generation created by the patch, set by Wait
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_owner_uid: Option<String>,
}

/// An image update of one service container in one environment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeployTask {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub env_name: String,
    pub product_name: String,
    pub namespace: String,
    pub service_name: String,
    #[serde(default)]
    pub service_type: String,
    pub container_name: String,
    pub image: String,
    /// Seconds; zero means the configured default
    #[serde(default)]
    pub timeout: u64,
    #[serde(default)]
    pub skip_waiting: bool,
    #[serde(default, rename = "status")]
    pub task_status: TaskStatus,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
    #[serde(default)]
    pub start_time: i64,
    #[serde(default)]
    pub end_time: i64,
    #[serde(default)]
    pub replace_resources: Vec<Resource>,
    #[serde(default)]
    pub related_pod_labels: Vec<BTreeMap<String, String>>,
}

fn default_enabled() -> bool {
    true
}

impl TaskPayload for DeployTask {
    const SCHEMA_VERSION: u32 = 1;
}

impl DeployTask {
    /// Container name as it appears in the workload spec.
    ///
    /// Configured names may carry a `_<service>` suffix that is not part of
    /// the container's identity.
    #[must_use]
    pub fn logical_container_name(&self) -> &str {
        let suffix = format!("_{}", self.service_name);
        self.container_name
            .strip_suffix(suffix.as_str())
            .unwrap_or(&self.container_name)
    }

    /// Move to `status` unless a terminal status is already recorded.
    ///
    /// Returns whether the status changed.
    pub fn set_status(&mut self, status: TaskStatus) -> bool {
        if self.task_status.is_terminal() {
            debug!(
                current = %self.task_status,
                requested = %status,
                "Ignoring status change on finished task"
            );
            return false;
        }
        self.task_status = status;
        true
    }

    /// Record a failure: status `Failed` and the error's text.
    pub fn fail(&mut self, err: &Error) {
        self.task_status = TaskStatus::Failed;
        self.error = err.to_string();
    }

    /// Record how a phase ended, by error class.
    ///
    /// A timeout keeps any earlier error text unless it carries pod
    /// diagnostics. Cancellation never touches the error text.
    pub fn settle(&mut self, err: &Error) {
        match err {
            Error::ReadinessTimeout { details } => {
                if self.set_status(TaskStatus::Timeout) && !details.is_empty() {
                    self.error.clone_from(details);
                }
            }
            Error::Cancelled => {
                self.set_status(TaskStatus::Cancelled);
            }
            other => self.fail(other),
        }
    }

    /// Configured timeout, substituting `default_secs` when unset.
    pub fn effective_timeout(&mut self, default_secs: u64) -> u64 {
        if self.timeout == 0 {
            self.timeout = default_secs;
        }
        self.timeout
    }
}
