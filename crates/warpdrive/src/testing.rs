//! In-memory `ClusterAccess` and object builders for plugin tests.

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use k8s_openapi::api::apps::v1::{
    Deployment, DeploymentSpec, DeploymentStatus, ReplicaSet, StatefulSet, StatefulSetSpec,
    StatefulSetStatus,
};
use k8s_openapi::api::batch::v1::{CronJob, CronJobSpec, JobSpec, JobTemplateSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerState, ContainerStateWaiting, ContainerStatus, Pod, PodSpec, PodStatus,
    PodTemplateSpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{
    LabelSelector, ObjectMeta, OwnerReference, Time,
};
use kube::core::ErrorResponse;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use crate::cluster::{ClusterAccess, ServerVersion};
use crate::error::Result;

#[derive(Default)]
pub struct FakeState {
    /// Defaults to v1.31
    pub version: Option<ServerVersion>,
    pub deployments: Vec<Deployment>,
    pub stateful_sets: Vec<StatefulSet>,
    pub cron_jobs: Vec<CronJob>,
    pub legacy_cron_jobs: Vec<CronJob>,
    pub pods: Vec<Pod>,
    pub replica_sets: Vec<ReplicaSet>,
    /// `<plural>/<name>/<container>=<image>` per accepted patch
    pub patches: Vec<String>,
    pub reject_patches: bool,
    pub fail_pod_lists: bool,
    /// Gets of a patched controller before it reports the rollout done;
    /// `None` leaves the status untouched
    pub converge_after: Option<usize>,
    /// Caps available replicas when converging
    pub available_cap: Option<i32>,
    /// Get calls per `<plural>/<name>`
    pub gets: HashMap<String, usize>,
}

#[derive(Default)]
pub struct FakeCluster {
    state: Mutex<FakeState>,
}

impl FakeCluster {
    pub fn new(state: FakeState) -> Self {
        Self {
            state: Mutex::new(state),
        }
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }
}

fn api_error(code: u16, reason: &str, message: String) -> kube::Error {
    kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message,
        reason: reason.to_string(),
        code,
    })
}

fn matches_selector(labels: Option<&BTreeMap<String, String>>, selector: &str) -> bool {
    selector
        .split(',')
        .filter(|term| !term.is_empty())
        .all(|term| match term.split_once('=') {
            Some((k, v)) => labels.and_then(|l| l.get(k)).is_some_and(|x| x == v),
            None => false,
        })
}

fn set_image(spec: Option<&mut PodSpec>, container: &str, image: &str) -> bool {
    spec.and_then(|s| s.containers.iter_mut().find(|c| c.name == container))
        .map(|c| c.image = Some(image.to_string()))
        .is_some()
}

fn bump_generation(meta: &mut ObjectMeta) -> i64 {
    let generation = meta.generation.unwrap_or(1) + 1;
    meta.generation = Some(generation);
    generation
}

impl FakeState {
    fn count_get(&mut self, key: String) -> usize {
        let count = self.gets.entry(key).or_default();
        *count += 1;
        *count
    }

    fn converged(&self, count: usize) -> bool {
        self.converge_after.is_some_and(|n| count >= n)
    }
}

#[async_trait]
impl ClusterAccess for FakeCluster {
    async fn server_version(&self) -> Result<ServerVersion> {
        Ok(self
            .state()
            .version
            .unwrap_or(ServerVersion { major: 1, minor: 31 }))
    }

    async fn get_deployment(&self, _namespace: &str, name: &str) -> Result<Option<Deployment>> {
        let mut state = self.state();
        let count = state.count_get(format!("deployments/{name}"));
        let converged = state.converged(count);
        let cap = state.available_cap;
        let Some(deployment) = state
            .deployments
            .iter_mut()
            .find(|d| d.metadata.name.as_deref() == Some(name))
        else {
            return Ok(None);
        };
        if converged {
            let desired = deployment.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
            deployment.status = Some(DeploymentStatus {
                observed_generation: deployment.metadata.generation,
                replicas: Some(desired),
                updated_replicas: Some(desired),
                available_replicas: Some(cap.unwrap_or(desired).min(desired)),
                ..Default::default()
            });
        }
        Ok(Some(deployment.clone()))
    }

    async fn list_deployments(&self, _namespace: &str, selector: &str) -> Result<Vec<Deployment>> {
        Ok(self
            .state()
            .deployments
            .iter()
            .filter(|d| matches_selector(d.metadata.labels.as_ref(), selector))
            .cloned()
            .collect())
    }

    async fn get_stateful_set(&self, _namespace: &str, name: &str) -> Result<Option<StatefulSet>> {
        let mut state = self.state();
        let count = state.count_get(format!("statefulsets/{name}"));
        let converged = state.converged(count);
        let cap = state.available_cap;
        let Some(stateful_set) = state
            .stateful_sets
            .iter_mut()
            .find(|s| s.metadata.name.as_deref() == Some(name))
        else {
            return Ok(None);
        };
        if converged {
            let desired = stateful_set.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
            stateful_set.status = Some(StatefulSetStatus {
                observed_generation: stateful_set.metadata.generation,
                replicas: desired,
                updated_replicas: Some(desired),
                available_replicas: Some(cap.unwrap_or(desired).min(desired)),
                ..Default::default()
            });
        }
        Ok(Some(stateful_set.clone()))
    }

    async fn list_stateful_sets(
        &self,
        _namespace: &str,
        selector: &str,
    ) -> Result<Vec<StatefulSet>> {
        Ok(self
            .state()
            .stateful_sets
            .iter()
            .filter(|s| matches_selector(s.metadata.labels.as_ref(), selector))
            .cloned()
            .collect())
    }

    async fn get_cron_job(
        &self,
        _namespace: &str,
        name: &str,
        legacy: bool,
    ) -> Result<Option<CronJob>> {
        let state = self.state();
        let cron_jobs = if legacy {
            &state.legacy_cron_jobs
        } else {
            &state.cron_jobs
        };
        Ok(cron_jobs
            .iter()
            .find(|c| c.metadata.name.as_deref() == Some(name))
            .cloned())
    }

    async fn list_cron_jobs(
        &self,
        _namespace: &str,
        selector: &str,
        legacy: bool,
    ) -> Result<Vec<CronJob>> {
        let state = self.state();
        let cron_jobs = if legacy {
            &state.legacy_cron_jobs
        } else {
            &state.cron_jobs
        };
        Ok(cron_jobs
            .iter()
            .filter(|c| matches_selector(c.metadata.labels.as_ref(), selector))
            .cloned()
            .collect())
    }

    async fn list_pods(&self, _namespace: &str, selector: &str) -> Result<Vec<Pod>> {
        let state = self.state();
        if state.fail_pod_lists {
            let err = api_error(500, "InternalError", "etcdserver: request timed out".into());
            return Err(err.into());
        }
        Ok(state
            .pods
            .iter()
            .filter(|p| matches_selector(p.metadata.labels.as_ref(), selector))
            .cloned()
            .collect())
    }

    async fn list_replica_sets(&self, _namespace: &str, selector: &str) -> Result<Vec<ReplicaSet>> {
        Ok(self
            .state()
            .replica_sets
            .iter()
            .filter(|rs| matches_selector(rs.metadata.labels.as_ref(), selector))
            .cloned()
            .collect())
    }

    async fn patch_deployment_image(
        &self,
        _namespace: &str,
        name: &str,
        container: &str,
        image: &str,
    ) -> Result<(), kube::Error> {
        let mut state = self.state();
        if state.reject_patches {
            return Err(api_error(422, "Invalid", format!("deployment {name} is invalid")));
        }
        let Some(deployment) = state
            .deployments
            .iter_mut()
            .find(|d| d.metadata.name.as_deref() == Some(name))
        else {
            return Err(api_error(404, "NotFound", format!("deployments {name} not found")));
        };
        set_image(
            deployment.spec.as_mut().and_then(|s| s.template.spec.as_mut()),
            container,
            image,
        );
        let generation = bump_generation(&mut deployment.metadata);
        let owner_uid = deployment.metadata.uid.clone().unwrap_or_default();
        let labels = deployment
            .spec
            .as_ref()
            .and_then(|s| s.template.metadata.as_ref())
            .and_then(|m| m.labels.clone());

        // The controller rolls out a fresh ReplicaSet per template change
        let mut rs = replica_set(
            &format!("{name}-{generation}"),
            &owner_uid,
            1_700_000_000 + generation * 60,
        );
        rs.metadata.uid = Some(format!("{owner_uid}-rs-{generation}"));
        rs.metadata.labels = labels;
        state.replica_sets.push(rs);
        state.gets.remove(&format!("deployments/{name}"));
        state
            .patches
            .push(format!("deployments/{name}/{container}={image}"));
        Ok(())
    }

    async fn patch_stateful_set_image(
        &self,
        _namespace: &str,
        name: &str,
        container: &str,
        image: &str,
    ) -> Result<(), kube::Error> {
        let mut state = self.state();
        if state.reject_patches {
            return Err(api_error(422, "Invalid", format!("statefulset {name} is invalid")));
        }
        let Some(stateful_set) = state
            .stateful_sets
            .iter_mut()
            .find(|s| s.metadata.name.as_deref() == Some(name))
        else {
            return Err(api_error(404, "NotFound", format!("statefulsets {name} not found")));
        };
        set_image(
            stateful_set.spec.as_mut().and_then(|s| s.template.spec.as_mut()),
            container,
            image,
        );
        bump_generation(&mut stateful_set.metadata);
        state.gets.remove(&format!("statefulsets/{name}"));
        state
            .patches
            .push(format!("statefulsets/{name}/{container}={image}"));
        Ok(())
    }

    async fn patch_cron_job_image(
        &self,
        _namespace: &str,
        name: &str,
        container: &str,
        image: &str,
        legacy: bool,
    ) -> Result<(), kube::Error> {
        let mut state = self.state();
        if state.reject_patches {
            return Err(api_error(422, "Invalid", format!("cronjob {name} is invalid")));
        }
        let cron_jobs = if legacy {
            &mut state.legacy_cron_jobs
        } else {
            &mut state.cron_jobs
        };
        let Some(cron_job) = cron_jobs
            .iter_mut()
            .find(|c| c.metadata.name.as_deref() == Some(name))
        else {
            return Err(api_error(404, "NotFound", format!("cronjobs {name} not found")));
        };
        set_image(
            cron_job
                .spec
                .as_mut()
                .and_then(|s| s.job_template.spec.as_mut())
                .and_then(|j| j.template.spec.as_mut()),
            container,
            image,
        );
        let plural = if legacy { "cronjobs.v1beta1" } else { "cronjobs" };
        state
            .patches
            .push(format!("{plural}/{name}/{container}={image}"));
        Ok(())
    }
}

pub fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}

fn pod_template(app: &str, containers: &[(&str, &str)]) -> PodTemplateSpec {
    PodTemplateSpec {
        metadata: Some(ObjectMeta {
            labels: Some(labels(&[("app", app)])),
            ..Default::default()
        }),
        spec: Some(PodSpec {
            containers: containers
                .iter()
                .map(|(name, image)| Container {
                    name: (*name).to_string(),
                    image: Some((*image).to_string()),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        }),
    }
}

fn workload_meta(name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some("demo-dev".to_string()),
        uid: Some(format!("uid-{name}")),
        generation: Some(1),
        ..Default::default()
    }
}

/// Single-replica Deployment whose first generation is fully rolled out.
pub fn deployment(name: &str, containers: &[(&str, &str)]) -> Deployment {
    Deployment {
        metadata: workload_meta(name),
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(labels(&[("app", name)])),
                match_expressions: None,
            },
            template: pod_template(name, containers),
            ..Default::default()
        }),
        status: Some(DeploymentStatus {
            observed_generation: Some(1),
            replicas: Some(1),
            updated_replicas: Some(1),
            available_replicas: Some(1),
            ..Default::default()
        }),
    }
}

pub fn stateful_set(name: &str, replicas: i32, containers: &[(&str, &str)]) -> StatefulSet {
    StatefulSet {
        metadata: workload_meta(name),
        spec: Some(StatefulSetSpec {
            replicas: Some(replicas),
            selector: LabelSelector {
                match_labels: Some(labels(&[("app", name)])),
                match_expressions: None,
            },
            template: pod_template(name, containers),
            ..Default::default()
        }),
        status: Some(StatefulSetStatus {
            observed_generation: Some(1),
            replicas,
            updated_replicas: Some(replicas),
            available_replicas: Some(replicas),
            ..Default::default()
        }),
    }
}

pub fn cron_job(name: &str, containers: &[(&str, &str)]) -> CronJob {
    CronJob {
        metadata: workload_meta(name),
        spec: Some(CronJobSpec {
            schedule: "0 3 * * *".to_string(),
            job_template: JobTemplateSpec {
                metadata: None,
                spec: Some(JobSpec {
                    template: pod_template(name, containers),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        status: None,
    }
}

pub fn replica_set(name: &str, owner_uid: &str, created_at: i64) -> ReplicaSet {
    ReplicaSet {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            uid: Some(format!("uid-{name}")),
            creation_timestamp: Utc.timestamp_opt(created_at, 0).single().map(Time),
            owner_references: Some(vec![OwnerReference {
                api_version: "apps/v1".to_string(),
                kind: "Deployment".to_string(),
                name: name.to_string(),
                uid: owner_uid.to_string(),
                controller: Some(true),
                ..Default::default()
            }]),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Pod with the given labels and owner, optionally stuck waiting.
pub fn pod(
    name: &str,
    pod_labels: BTreeMap<String, String>,
    owner_uid: &str,
    waiting: Option<(&str, &str)>,
) -> Pod {
    let container_statuses = waiting.map(|(reason, message)| {
        vec![ContainerStatus {
            name: "api".to_string(),
            state: Some(ContainerState {
                waiting: Some(ContainerStateWaiting {
                    reason: Some(reason.to_string()),
                    message: Some(message.to_string()),
                }),
                ..Default::default()
            }),
            ..Default::default()
        }]
    });

    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(pod_labels),
            owner_references: Some(vec![OwnerReference {
                uid: owner_uid.to_string(),
                controller: Some(true),
                ..Default::default()
            }]),
            ..Default::default()
        },
        spec: None,
        status: Some(PodStatus {
            container_statuses,
            ..Default::default()
        }),
    }
}
