//! Container image replacement across resolved workloads.

use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::batch::v1::CronJob;
use k8s_openapi::api::core::v1::PodTemplateSpec;
use tracing::{debug, info, instrument};

use super::resolver::WorkloadSet;
use crate::cluster::ClusterAccess;
use crate::error::{Error, Result};
use crate::task::{DeployTask, Resource, WorkloadKind};

/// Workloads that stamp out pods from a template.
trait PodTemplated {
    fn workload_name(&self) -> &str;
    fn pod_template(&self) -> Option<&PodTemplateSpec>;
}

impl PodTemplated for Deployment {
    fn workload_name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    fn pod_template(&self) -> Option<&PodTemplateSpec> {
        self.spec.as_ref().map(|s| &s.template)
    }
}

impl PodTemplated for StatefulSet {
    fn workload_name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    fn pod_template(&self) -> Option<&PodTemplateSpec> {
        self.spec.as_ref().map(|s| &s.template)
    }
}

impl PodTemplated for CronJob {
    fn workload_name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    fn pod_template(&self) -> Option<&PodTemplateSpec> {
        self.spec
            .as_ref()
            .and_then(|s| s.job_template.spec.as_ref())
            .map(|j| &j.template)
    }
}

#[derive(Debug, Clone, Copy)]
enum PatchTarget {
    Deployment,
    StatefulSet,
    CronJob { legacy: bool },
}

impl PatchTarget {
    fn kind(self) -> WorkloadKind {
        match self {
            Self::Deployment => WorkloadKind::Deployment,
            Self::StatefulSet => WorkloadKind::StatefulSet,
            Self::CronJob { .. } => WorkloadKind::CronJob,
        }
    }

    async fn apply(
        self,
        cluster: &dyn ClusterAccess,
        namespace: &str,
        name: &str,
        container: &str,
        image: &str,
    ) -> Result<(), kube::Error> {
        match self {
            Self::Deployment => {
                cluster
                    .patch_deployment_image(namespace, name, container, image)
                    .await
            }
            Self::StatefulSet => {
                cluster
                    .patch_stateful_set_image(namespace, name, container, image)
                    .await
            }
            Self::CronJob { legacy } => {
                cluster
                    .patch_cron_job_image(namespace, name, container, image, legacy)
                    .await
            }
        }
    }
}

struct ImageChange {
    namespace: String,
    container: String,
    image: String,
}

/// Patch the task's container in the first matching workload of each kind.
///
/// Each patched workload is appended to `task.replace_resources` as its
/// patch lands; a later patch failure keeps the earlier records.
#[instrument(skip_all, fields(namespace = %task.namespace, image = %task.image))]
pub async fn replace_images(
    cluster: &dyn ClusterAccess,
    workloads: &WorkloadSet,
    task: &mut DeployTask,
) -> Result<()> {
    let change = ImageChange {
        namespace: task.namespace.clone(),
        container: task.logical_container_name().to_string(),
        image: task.image.clone(),
    };

    let mut replaced = false;
    replaced |= replace_first(
        cluster,
        PatchTarget::Deployment,
        &workloads.deployments,
        &change,
        task,
    )
    .await?;
    replaced |= replace_first(
        cluster,
        PatchTarget::StatefulSet,
        &workloads.stateful_sets,
        &change,
        task,
    )
    .await?;
    replaced |= replace_first(
        cluster,
        PatchTarget::CronJob { legacy: false },
        &workloads.cron_jobs,
        &change,
        task,
    )
    .await?;
    replaced |= replace_first(
        cluster,
        PatchTarget::CronJob { legacy: true },
        &workloads.legacy_cron_jobs,
        &change,
        task,
    )
    .await?;

    if !replaced {
        return Err(Error::resolution(format!(
            "container {} is not found in resources",
            change.container
        )));
    }
    Ok(())
}

async fn replace_first<W: PodTemplated + Sync>(
    cluster: &dyn ClusterAccess,
    target: PatchTarget,
    workloads: &[W],
    change: &ImageChange,
    task: &mut DeployTask,
) -> Result<bool> {
    let kind = target.kind();

    for workload in workloads {
        let Some(template) = workload.pod_template() else {
            continue;
        };
        let Some(current) = template
            .spec
            .as_ref()
            .and_then(|spec| spec.containers.iter().find(|c| c.name == change.container))
        else {
            continue;
        };

        let name = workload.workload_name();
        target
            .apply(cluster, &change.namespace, name, &change.container, &change.image)
            .await
            .map_err(|source| Error::Mutation {
                namespace: change.namespace.clone(),
                resource: kind.plural().to_string(),
                name: name.to_string(),
                container: change.container.clone(),
                source,
            })?;

        let original_image = current.image.clone().unwrap_or_default();
        info!(
            kind = %kind,
            name = %name,
            container = %change.container,
            from = %original_image,
            to = %change.image,
            "Replaced container image"
        );

        task.replace_resources.push(Resource {
            kind,
            name: name.to_string(),
            container: change.container.clone(),
            original_image,
            pod_owner_uid: None,
        });

        if kind.is_polled() {
            match template.metadata.as_ref().and_then(|m| m.labels.clone()) {
                Some(labels) if !labels.is_empty() => task.related_pod_labels.push(labels),
                _ => debug!(kind = %kind, name = %name, "Pod template carries no labels"),
            }
        }
        return Ok(true);
    }

    Ok(false)
}
