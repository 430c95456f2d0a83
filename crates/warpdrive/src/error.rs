//! Error types for task plugins.

use thiserror::Error;

/// Errors raised while executing a task plugin.
///
/// None of these cross the plugin boundary: Run and Wait translate them into
/// a terminal task status plus the task's `error` text.
#[derive(Debug, Error)]
pub enum Error {
    /// Workload or service could not be found, or matched ambiguously
    #[error("{message}")]
    Resolution { message: String },

    /// The cluster rejected an image patch
    #[error("failed to update container image in {namespace}/{resource}/{name}/{container}: {source}")]
    Mutation {
        namespace: String,
        resource: String,
        name: String,
        container: String,
        #[source]
        source: kube::Error,
    },

    /// A pod of the new generation entered a terminal waiting state
    #[error("{message}")]
    PodFailure { message: String },

    /// The controller generation created by a patch could not be identified
    #[error("get resource owner info error: {0}")]
    OwnerLookup(#[source] Box<Error>),

    /// Rollout did not converge before the deadline
    #[error("rollout timed out: {details}")]
    ReadinessTimeout { details: String },

    /// Caller-initiated cancellation
    #[error("task cancelled")]
    Cancelled,

    /// Mutation refused before any discovery was attempted
    #[error("{message}")]
    Precondition { message: String },

    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("service API error: {status} - {message}")]
    ServiceApi { status: u16, message: String },

    #[error("invalid task payload: {0}")]
    Payload(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("unsupported task type: {0}")]
    UnsupportedTaskType(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn resolution(message: impl Into<String>) -> Self {
        Self::Resolution {
            message: message.into(),
        }
    }

    pub fn precondition(message: impl Into<String>) -> Self {
        Self::Precondition {
            message: message.into(),
        }
    }

    /// Short classification used as a structured log field.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Resolution { .. } => "resolution",
            Self::Mutation { .. } => "mutation",
            Self::PodFailure { .. } => "pod_failure",
            Self::OwnerLookup(_) => "owner_lookup",
            Self::ReadinessTimeout { .. } => "readiness_timeout",
            Self::Cancelled => "cancelled",
            Self::Precondition { .. } => "precondition",
            Self::Kube(_) => "kube",
            Self::Http(_) | Self::ServiceApi { .. } => "service_api",
            Self::Payload(_) | Self::Serialization(_) => "payload",
            Self::Config(_) => "config",
            Self::UnsupportedTaskType(_) => "task_type",
        }
    }
}
