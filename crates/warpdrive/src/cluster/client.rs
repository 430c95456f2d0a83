//! `ClusterAccess` over a live API server.

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::batch::v1::{CronJob, CronJobSpec};
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::core::{ApiResource, DynamicObject, GroupVersionKind};
use kube::Client;
use serde_json::{json, Value};
use tokio::sync::OnceCell;
use tracing::{debug, instrument};

use super::{ClusterAccess, ServerVersion};
use crate::error::Result;

/// Cluster access backed by a `kube::Client`.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
    version: OnceCell<ServerVersion>,
}

impl KubeCluster {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self {
            client,
            version: OnceCell::new(),
        }
    }

    fn legacy_cron_jobs(&self, namespace: &str) -> Api<DynamicObject> {
        let gvk = GroupVersionKind::gvk("batch", "v1beta1", "CronJob");
        let resource = ApiResource::from_gvk_with_plural(&gvk, "cronjobs");
        Api::namespaced_with(self.client.clone(), namespace, &resource)
    }
}

fn list_params(selector: &str) -> ListParams {
    if selector.is_empty() {
        ListParams::default()
    } else {
        ListParams::default().labels(selector)
    }
}

fn pod_template_image_patch(container: &str, image: &str) -> Value {
    json!({
        "spec": {
            "template": {
                "spec": {
                    "containers": [{ "name": container, "image": image }]
                }
            }
        }
    })
}

fn cron_job_image_patch(container: &str, image: &str) -> Value {
    json!({
        "spec": {
            "jobTemplate": {
                "spec": {
                    "template": {
                        "spec": {
                            "containers": [{ "name": container, "image": image }]
                        }
                    }
                }
            }
        }
    })
}

/// Re-shape a `batch/v1beta1` CronJob into the `batch/v1` type.
///
/// The two spec schemas agree on every field the plugin reads.
fn cron_job_from_legacy(object: DynamicObject) -> Result<CronJob> {
    let spec = object
        .data
        .get("spec")
        .cloned()
        .map(serde_json::from_value::<CronJobSpec>)
        .transpose()?;
    Ok(CronJob {
        metadata: object.metadata,
        spec,
        status: None,
    })
}

#[async_trait]
impl ClusterAccess for KubeCluster {
    async fn server_version(&self) -> Result<ServerVersion> {
        let version = self
            .version
            .get_or_try_init(|| async {
                let info = self.client.apiserver_version().await?;
                let version = ServerVersion::parse(&info.major, &info.minor);
                debug!(version = %version, git_version = %info.git_version, "Detected API server version");
                Ok::<_, crate::error::Error>(version)
            })
            .await?;
        Ok(*version)
    }

    #[instrument(skip(self))]
    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Option<Deployment>> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    #[instrument(skip(self))]
    async fn list_deployments(&self, namespace: &str, selector: &str) -> Result<Vec<Deployment>> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.list(&list_params(selector)).await?.items)
    }

    #[instrument(skip(self))]
    async fn get_stateful_set(&self, namespace: &str, name: &str) -> Result<Option<StatefulSet>> {
        let api: Api<StatefulSet> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    #[instrument(skip(self))]
    async fn list_stateful_sets(
        &self,
        namespace: &str,
        selector: &str,
    ) -> Result<Vec<StatefulSet>> {
        let api: Api<StatefulSet> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.list(&list_params(selector)).await?.items)
    }

    #[instrument(skip(self))]
    async fn get_cron_job(
        &self,
        namespace: &str,
        name: &str,
        legacy: bool,
    ) -> Result<Option<CronJob>> {
        if legacy {
            return self
                .legacy_cron_jobs(namespace)
                .get_opt(name)
                .await?
                .map(cron_job_from_legacy)
                .transpose();
        }
        let api: Api<CronJob> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    #[instrument(skip(self))]
    async fn list_cron_jobs(
        &self,
        namespace: &str,
        selector: &str,
        legacy: bool,
    ) -> Result<Vec<CronJob>> {
        if legacy {
            return self
                .legacy_cron_jobs(namespace)
                .list(&list_params(selector))
                .await?
                .items
                .into_iter()
                .map(cron_job_from_legacy)
                .collect();
        }
        let api: Api<CronJob> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.list(&list_params(selector)).await?.items)
    }

    #[instrument(skip(self))]
    async fn list_pods(&self, namespace: &str, selector: &str) -> Result<Vec<Pod>> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.list(&list_params(selector)).await?.items)
    }

    #[instrument(skip(self))]
    async fn list_replica_sets(&self, namespace: &str, selector: &str) -> Result<Vec<ReplicaSet>> {
        let api: Api<ReplicaSet> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.list(&list_params(selector)).await?.items)
    }

    #[instrument(skip(self))]
    async fn patch_deployment_image(
        &self,
        namespace: &str,
        name: &str,
        container: &str,
        image: &str,
    ) -> Result<(), kube::Error> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        let patch = pod_template_image_patch(container, image);
        api.patch(name, &PatchParams::default(), &Patch::Strategic(&patch))
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn patch_stateful_set_image(
        &self,
        namespace: &str,
        name: &str,
        container: &str,
        image: &str,
    ) -> Result<(), kube::Error> {
        let api: Api<StatefulSet> = Api::namespaced(self.client.clone(), namespace);
        let patch = pod_template_image_patch(container, image);
        api.patch(name, &PatchParams::default(), &Patch::Strategic(&patch))
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn patch_cron_job_image(
        &self,
        namespace: &str,
        name: &str,
        container: &str,
        image: &str,
        legacy: bool,
    ) -> Result<(), kube::Error> {
        let patch = cron_job_image_patch(container, image);
        if legacy {
            self.legacy_cron_jobs(namespace)
                .patch(name, &PatchParams::default(), &Patch::Strategic(&patch))
                .await?;
        } else {
            let api: Api<CronJob> = Api::namespaced(self.client.clone(), namespace);
            api.patch(name, &PatchParams::default(), &Patch::Strategic(&patch))
                .await?;
        }
        Ok(())
    }
}
