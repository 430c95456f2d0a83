//! Rollout tracking for patched workloads.

use k8s_openapi::api::apps::v1::Deployment;
use std::collections::{BTreeMap, HashSet};
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::readiness::{
    deployment_ready, is_controlled_by, is_owned_by, stateful_set_ready,
    terminal_waiting_failures,
};
use crate::cluster::{selector_from_label_selector, selector_from_labels, ClusterAccess};
use crate::config::DeployConfig;
use crate::error::{Error, Result};
use crate::task::{Resource, WorkloadKind};

/// How a watched rollout ended.
#[derive(Debug)]
pub enum Conclusion {
    Passed,
    /// A pod of the new generation can not start
    Failed(Error),
    /// Deadline reached; carries pod diagnostics when any were found
    Timeout(Option<String>),
    Cancelled,
}

pub struct RolloutWatcher<'a> {
    cluster: &'a dyn ClusterAccess,
    namespace: &'a str,
    settings: &'a DeployConfig,
}

impl<'a> RolloutWatcher<'a> {
    #[must_use]
    pub fn new(cluster: &'a dyn ClusterAccess, namespace: &'a str, settings: &'a DeployConfig) -> Self {
        Self {
            cluster,
            namespace,
            settings,
        }
    }

    /// Record which controller generation owns each resource's new pods.
    ///
    /// A Deployment is identified by the newest ReplicaSet it controls, looked
    /// up after a grace delay; a StatefulSet owns its pods directly. Returns
    /// early, leaving later resources unset, when `cancel` fires during the
    /// grace delay.
    pub async fn fingerprint(
        &self,
        resources: &mut [Resource],
        cancel: &CancellationToken,
    ) -> Result<()> {
        for resource in resources.iter_mut() {
            match resource.kind {
                WorkloadKind::StatefulSet => {
                    let stateful_set = self
                        .cluster
                        .get_stateful_set(self.namespace, &resource.name)
                        .await?
                        .ok_or_else(|| {
                            Error::resolution(format!("statefulset: {} not found", resource.name))
                        })?;
                    resource.pod_owner_uid = stateful_set.metadata.uid;
                }
                WorkloadKind::Deployment => {
                    let deployment = self
                        .cluster
                        .get_deployment(self.namespace, &resource.name)
                        .await?
                        .ok_or_else(|| {
                            Error::resolution(format!("deployment: {} not found", resource.name))
                        })?;

                    tokio::select! {
                        () = cancel.cancelled() => return Ok(()),
                        () = sleep(self.settings.replica_set_grace()) => {}
                    }
                    resource.pod_owner_uid = Some(self.latest_replica_set(&deployment).await?);
                }
                WorkloadKind::CronJob => continue,
            }
            debug!(
                kind = %resource.kind,
                name = %resource.name,
                owner_uid = ?resource.pod_owner_uid,
                "Fingerprinted rollout"
            );
        }
        Ok(())
    }

    async fn latest_replica_set(&self, deployment: &Deployment) -> Result<String> {
        let name = deployment.metadata.name.as_deref().unwrap_or_default();
        let uid = deployment
            .metadata
            .uid
            .as_deref()
            .ok_or_else(|| Error::resolution(format!("deployment: {name} has no uid")))?;
        let selector = deployment
            .spec
            .as_ref()
            .map(|spec| selector_from_label_selector(&spec.selector))
            .transpose()?
            .unwrap_or_default();

        self.cluster
            .list_replica_sets(self.namespace, &selector)
            .await?
            .into_iter()
            .filter(|rs| is_controlled_by(&rs.metadata, uid))
            .max_by_key(|rs| rs.metadata.creation_timestamp.as_ref().map(|t| t.0))
            .and_then(|rs| rs.metadata.uid)
            .ok_or_else(|| Error::resolution(format!("no replicaset found for deployment: {name}")))
    }

    /// Poll until every tracked resource is ready, a pod fails terminally,
    /// `deadline` passes or `cancel` fires.
    pub async fn watch(
        &self,
        resources: &[Resource],
        pod_labels: &[BTreeMap<String, String>],
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Conclusion {
        let mut tick: u64 = 0;
        loop {
            if cancel.is_cancelled() {
                info!(tick, "Rollout watch cancelled");
                return Conclusion::Cancelled;
            }
            if Instant::now() >= deadline {
                warn!(tick, "Rollout deadline reached");
                return Conclusion::Timeout(self.diagnose(pod_labels).await);
            }
            if let Some(conclusion) = self.evaluate(resources, pod_labels).await {
                return conclusion;
            }

            tick += 1;
            tokio::select! {
                () = cancel.cancelled() => {}
                () = sleep(self.settings.poll_interval()) => {}
            }
        }
    }

    /// One pass over the tracked resources in order. `None` means keep polling.
    async fn evaluate(
        &self,
        resources: &[Resource],
        pod_labels: &[BTreeMap<String, String>],
    ) -> Option<Conclusion> {
        for resource in resources.iter().filter(|r| r.kind.is_polled()) {
            match self.pod_failure(resource, pod_labels).await {
                Ok(Some(message)) => {
                    return Some(Conclusion::Failed(Error::PodFailure { message }));
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(name = %resource.name, error = %e, "Failed to list pods");
                    return None;
                }
            }

            if !self.is_ready(resource).await {
                debug!(kind = %resource.kind, name = %resource.name, "Waiting for rollout");
                return None;
            }
        }
        Some(Conclusion::Passed)
    }

    /// First terminal waiting state among pods owned by the new generation.
    async fn pod_failure(
        &self,
        resource: &Resource,
        pod_labels: &[BTreeMap<String, String>],
    ) -> Result<Option<String>> {
        let Some(owner_uid) = resource.pod_owner_uid.as_deref() else {
            return Ok(None);
        };

        for labels in pod_labels {
            let pods = self
                .cluster
                .list_pods(self.namespace, &selector_from_labels(labels))
                .await?;
            let failure = pods
                .iter()
                .filter(|pod| is_owned_by(&pod.metadata, owner_uid))
                .find_map(|pod| terminal_waiting_failures(pod).into_iter().next());
            if failure.is_some() {
                return Ok(failure);
            }
        }
        Ok(None)
    }

    async fn is_ready(&self, resource: &Resource) -> bool {
        let lookup = match resource.kind {
            WorkloadKind::Deployment => self
                .cluster
                .get_deployment(self.namespace, &resource.name)
                .await
                .map(|d| d.as_ref().map(deployment_ready)),
            WorkloadKind::StatefulSet => self
                .cluster
                .get_stateful_set(self.namespace, &resource.name)
                .await
                .map(|s| s.as_ref().map(stateful_set_ready)),
            WorkloadKind::CronJob => return true,
        };

        match lookup {
            Ok(Some(ready)) => ready,
            Ok(None) => {
                warn!(kind = %resource.kind, name = %resource.name, "Tracked workload disappeared");
                false
            }
            Err(e) => {
                warn!(kind = %resource.kind, name = %resource.name, error = %e, "Failed to get workload");
                false
            }
        }
    }

    /// Terminal waiting states of every related pod, one line per container.
    async fn diagnose(&self, pod_labels: &[BTreeMap<String, String>]) -> Option<String> {
        let mut seen = HashSet::new();
        let mut messages = Vec::new();

        for labels in pod_labels {
            let selector = selector_from_labels(labels);
            let pods = match self.cluster.list_pods(self.namespace, &selector).await {
                Ok(pods) => pods,
                Err(e) => {
                    warn!(selector = %selector, error = %e, "Failed to list pods for diagnostics");
                    continue;
                }
            };
            for pod in &pods {
                let name = pod.metadata.name.clone().unwrap_or_default();
                if seen.insert(name) {
                    messages.extend(terminal_waiting_failures(pod));
                }
            }
        }

        (!messages.is_empty()).then(|| messages.join("\n"))
    }
}
