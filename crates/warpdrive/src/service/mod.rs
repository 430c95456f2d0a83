//! Project/service API consumed by task plugins.

pub mod client;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::task::WorkloadKind;

pub use client::ServiceClient;

/// Environment status reported while the environment is scaled to zero.
pub const ENV_STATUS_SLEEPING: &str = "sleeping";

/// Service definition as known to the project.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceTemplate {
    #[serde(default)]
    pub service_name: String,
    #[serde(default)]
    pub product_name: String,
    #[serde(default, rename = "type")]
    pub service_type: String,
    #[serde(default)]
    pub revision: i64,
    /// Empty when the service's controller kind is not recorded
    #[serde(default)]
    pub workload_type: String,
}

impl ServiceTemplate {
    /// The recorded workload kind, or `None` when discovery is required.
    pub fn workload_kind(&self) -> Result<Option<WorkloadKind>> {
        if self.workload_type.is_empty() {
            return Ok(None);
        }
        WorkloadKind::from_kind(&self.workload_type)
            .map(Some)
            .ok_or_else(|| {
                Error::resolution(format!(
                    "unsupported workload type {} for service {}",
                    self.workload_type, self.service_name
                ))
            })
    }
}

/// Environment (product instance) summary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnvironmentInfo {
    #[serde(default)]
    pub product_name: String,
    #[serde(default)]
    pub env_name: String,
    #[serde(default)]
    pub status: String,
}

impl EnvironmentInfo {
    #[must_use]
    pub fn is_sleeping(&self) -> bool {
        self.status == ENV_STATUS_SLEEPING
    }
}

/// Lookups against the project/service API.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ServiceCatalog: Send + Sync {
    async fn service_template(
        &self,
        name: &str,
        service_type: &str,
        project: &str,
        revision: i64,
    ) -> Result<ServiceTemplate>;

    /// Raw manifests last applied for a service in an environment.
    async fn rendered_manifests(
        &self,
        project: &str,
        env: &str,
        service: &str,
    ) -> Result<Vec<String>>;

    async fn environment(&self, project: &str, env: &str) -> Result<EnvironmentInfo>;
}
