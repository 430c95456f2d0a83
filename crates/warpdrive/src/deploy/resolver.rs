//! Workload resolution: which controllers back a service in a namespace.

use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::batch::v1::CronJob;
use kube::core::DynamicObject;
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::{debug, error, info, warn};

use crate::cluster::{selector_from_labels, ClusterAccess};
use crate::config::LabelConfig;
use crate::error::{Error, Result};
use crate::service::ServiceCatalog;
use crate::task::WorkloadKind;

/// Controllers found for a service, grouped by kind in discovery order.
#[derive(Debug, Default)]
pub struct WorkloadSet {
    pub deployments: Vec<Deployment>,
    pub stateful_sets: Vec<StatefulSet>,
    pub cron_jobs: Vec<CronJob>,
    /// Served from `batch/v1beta1`, already converted to the v1 shape
    pub legacy_cron_jobs: Vec<CronJob>,
}

impl WorkloadSet {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.deployments.len()
            + self.stateful_sets.len()
            + self.cron_jobs.len()
            + self.legacy_cron_jobs.len()
    }

    fn push_cron_job(&mut self, cron_job: CronJob, legacy: bool) {
        if legacy {
            self.legacy_cron_jobs.push(cron_job);
        } else {
            self.cron_jobs.push(cron_job);
        }
    }
}

pub struct WorkloadResolver<'a> {
    cluster: &'a dyn ClusterAccess,
    catalog: &'a dyn ServiceCatalog,
    labels: &'a LabelConfig,
    namespace: &'a str,
    legacy_cron_jobs: bool,
}

impl<'a> WorkloadResolver<'a> {
    #[must_use]
    pub fn new(
        cluster: &'a dyn ClusterAccess,
        catalog: &'a dyn ServiceCatalog,
        labels: &'a LabelConfig,
        namespace: &'a str,
        legacy_cron_jobs: bool,
    ) -> Self {
        Self {
            cluster,
            catalog,
            labels,
            namespace,
            legacy_cron_jobs,
        }
    }

    /// Fetch the single controller named after the service.
    pub async fn resolve_known(&self, kind: WorkloadKind, name: &str) -> Result<WorkloadSet> {
        let mut set = WorkloadSet::default();
        match kind {
            WorkloadKind::Deployment => {
                let deployment = self
                    .cluster
                    .get_deployment(self.namespace, name)
                    .await?
                    .ok_or_else(|| Error::resolution(format!("deployment: {name} not found")))?;
                set.deployments.push(deployment);
            }
            WorkloadKind::StatefulSet => {
                let stateful_set = self
                    .cluster
                    .get_stateful_set(self.namespace, name)
                    .await?
                    .ok_or_else(|| Error::resolution(format!("statefulset: {name} not found")))?;
                set.stateful_sets.push(stateful_set);
            }
            WorkloadKind::CronJob => {
                let cron_job = self
                    .cluster
                    .get_cron_job(self.namespace, name, self.legacy_cron_jobs)
                    .await?
                    .ok_or_else(|| Error::resolution(format!("cronjob: {name} not found")))?;
                set.push_cron_job(cron_job, self.legacy_cron_jobs);
            }
        }
        debug!(kind = %kind, name = %name, "Resolved workload by name");
        Ok(set)
    }

    /// Find a service's controllers by ownership labels, falling back to the
    /// manifests last rendered for it when nothing carries the labels.
    pub async fn discover(&self, env: &str, product: &str, service: &str) -> Result<WorkloadSet> {
        let labels = BTreeMap::from([
            (self.labels.product.clone(), product.to_string()),
            (self.labels.service.clone(), service.to_string()),
        ]);
        let selector = selector_from_labels(&labels);

        let (deployments, stateful_sets, cron_jobs) = tokio::try_join!(
            self.cluster.list_deployments(self.namespace, &selector),
            self.cluster.list_stateful_sets(self.namespace, &selector),
            self.cluster
                .list_cron_jobs(self.namespace, &selector, self.legacy_cron_jobs),
        )?;

        let mut set = WorkloadSet {
            deployments,
            stateful_sets,
            ..Default::default()
        };
        for cron_job in cron_jobs {
            set.push_cron_job(cron_job, self.legacy_cron_jobs);
        }

        if !set.is_empty() {
            debug!(selector = %selector, count = set.len(), "Discovered labelled workloads");
            return Ok(set);
        }

        info!(
            selector = %selector,
            "No labelled workloads found, resolving from rendered manifests"
        );
        self.from_manifests(env, product, service).await
    }

    async fn from_manifests(&self, env: &str, product: &str, service: &str) -> Result<WorkloadSet> {
        let manifests = self.catalog.rendered_manifests(product, env, service).await?;
        let named = manifests
            .iter()
            .flat_map(|manifest| named_workloads(manifest))
            .collect::<Vec<_>>();

        let mut set = WorkloadSet::default();
        for (kind, name) in &named {
            self.collect(&mut set, *kind, name).await;
        }

        debug!(count = set.len(), "Resolved workloads from manifests");
        Ok(set)
    }

    /// Look up one manifest-named controller; lookup failures skip it.
    async fn collect(&self, set: &mut WorkloadSet, kind: WorkloadKind, name: &str) {
        let namespace = self.namespace;
        match kind {
            WorkloadKind::Deployment => match self.cluster.get_deployment(namespace, name).await {
                Ok(Some(deployment)) => set.deployments.push(deployment),
                Ok(None) => error!(kind = %kind, name = %name, "Manifest workload not found"),
                Err(e) => error!(kind = %kind, name = %name, error = %e, "Failed to get workload"),
            },
            WorkloadKind::StatefulSet => match self.cluster.get_stateful_set(namespace, name).await
            {
                Ok(Some(stateful_set)) => set.stateful_sets.push(stateful_set),
                Ok(None) => error!(kind = %kind, name = %name, "Manifest workload not found"),
                Err(e) => error!(kind = %kind, name = %name, error = %e, "Failed to get workload"),
            },
            WorkloadKind::CronJob => match self
                .cluster
                .get_cron_job(namespace, name, self.legacy_cron_jobs)
                .await
            {
                Ok(Some(cron_job)) => set.push_cron_job(cron_job, self.legacy_cron_jobs),
                Ok(None) => error!(kind = %kind, name = %name, "Manifest workload not found"),
                Err(e) => error!(kind = %kind, name = %name, error = %e, "Failed to get workload"),
            },
        }
    }
}

/// Workload kinds and names declared in a multi-document manifest.
///
/// The YAML deserializer is not `Send`, so documents are decoded eagerly
/// before any lookup is awaited.
fn named_workloads(manifest: &str) -> Vec<(WorkloadKind, String)> {
    let mut named = Vec::new();
    for document in serde_yaml::Deserializer::from_str(manifest) {
        let object = match DynamicObject::deserialize(document) {
            Ok(object) => object,
            Err(e) => {
                warn!(error = %e, "Skipping unparsable manifest document");
                continue;
            }
        };
        let (Some(kind), Some(name)) = (
            object.types.as_ref().and_then(|t| WorkloadKind::from_kind(&t.kind)),
            object.metadata.name,
        ) else {
            continue;
        };
        named.push((kind, name));
    }
    named
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_workloads_reads_every_document() {
        let manifest = "\
apiVersion: v1
kind: Service
metadata:
  name: api
---
apiVersion: apps/v1
kind: Deployment
metadata:
  name: api
---
apiVersion: apps/v1
kind: StatefulSet
metadata:
  name: api-db
";
        assert_eq!(
            named_workloads(manifest),
            vec![
                (WorkloadKind::Deployment, "api".to_string()),
                (WorkloadKind::StatefulSet, "api-db".to_string()),
            ]
        );
    }

    #[test]
    fn discovery_future_is_send() {
        fn assert_send<T: Send>(_: T) {}

        let cluster = crate::testing::FakeCluster::default();
        let catalog = crate::service::MockServiceCatalog::new();
        let labels = LabelConfig::default();
        let resolver = WorkloadResolver::new(&cluster, &catalog, &labels, "demo-dev", false);

        assert_send(resolver.discover("dev", "demo", "api"));
    }

    #[test]
    fn named_workloads_skips_nameless_documents() {
        let manifest = "apiVersion: apps/v1\nkind: Deployment\nmetadata: {}\n";
        assert!(named_workloads(manifest).is_empty());
    }
}
