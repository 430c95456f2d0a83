//! # Cluster Access
//!
//! The narrow slice of the Kubernetes API the deploy plugin consumes:
//! get and list of workload controllers, pods and ReplicaSets, plus one
//! image patch per workload kind. `KubeCluster` is the production
//! implementation; tests substitute an in-memory one.

pub mod client;
pub mod selector;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::batch::v1::CronJob;
use k8s_openapi::api::core::v1::Pod;

use crate::error::Result;

pub use client::KubeCluster;
pub use selector::{selector_from_label_selector, selector_from_labels};

/// Kubernetes API server version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerVersion {
    pub major: u32,
    pub minor: u32,
}

impl ServerVersion {
    /// Parse the `major`/`minor` strings of the `/version` endpoint.
    ///
    /// Providers append markers such as `21+`; only leading digits count.
    #[must_use]
    pub fn parse(major: &str, minor: &str) -> Self {
        fn leading_number(s: &str) -> u32 {
            let digits: String = s.chars().take_while(char::is_ascii_digit).collect();
            digits.parse().unwrap_or(0)
        }
        Self {
            major: leading_number(major),
            minor: leading_number(minor),
        }
    }

    /// CronJobs are served from `batch/v1beta1` before 1.21.
    #[must_use]
    pub fn uses_legacy_cron_jobs(self) -> bool {
        (self.major, self.minor) < (1, 21)
    }
}

impl std::fmt::Display for ServerVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{}.{}", self.major, self.minor)
    }
}

/// Cluster operations used by task plugins.
///
/// Getters return `Ok(None)` when the object does not exist. Selectors use
/// the Kubernetes label selector string syntax. `legacy` selects the
/// `batch/v1beta1` CronJob API; legacy objects are returned in the
/// `batch/v1` shape.
#[async_trait]
pub trait ClusterAccess: Send + Sync {
    async fn server_version(&self) -> Result<ServerVersion>;

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Option<Deployment>>;

    async fn list_deployments(&self, namespace: &str, selector: &str) -> Result<Vec<Deployment>>;

    async fn get_stateful_set(&self, namespace: &str, name: &str) -> Result<Option<StatefulSet>>;

    async fn list_stateful_sets(&self, namespace: &str, selector: &str)
        -> Result<Vec<StatefulSet>>;

    async fn get_cron_job(
        &self,
        namespace: &str,
        name: &str,
        legacy: bool,
    ) -> Result<Option<CronJob>>;

    async fn list_cron_jobs(
        &self,
        namespace: &str,
        selector: &str,
        legacy: bool,
    ) -> Result<Vec<CronJob>>;

    async fn list_pods(&self, namespace: &str, selector: &str) -> Result<Vec<Pod>>;

    async fn list_replica_sets(&self, namespace: &str, selector: &str) -> Result<Vec<ReplicaSet>>;

    async fn patch_deployment_image(
        &self,
        namespace: &str,
        name: &str,
        container: &str,
        image: &str,
    ) -> Result<(), kube::Error>;

    async fn patch_stateful_set_image(
        &self,
        namespace: &str,
        name: &str,
        container: &str,
        image: &str,
    ) -> Result<(), kube::Error>;

    async fn patch_cron_job_image(
        &self,
        namespace: &str,
        name: &str,
        container: &str,
        image: &str,
        legacy: bool,
    ) -> Result<(), kube::Error>;
}
