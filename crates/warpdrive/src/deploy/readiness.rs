//! Readiness and pod failure predicates.

use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

/// Waiting reasons after which a rollout will not converge on its own.
pub const TERMINAL_WAITING_REASONS: [&str; 4] = [
    "ImagePullBackOff",
    "ErrImagePull",
    "CrashLoopBackOff",
    "ErrImageNeverPull",
];

/// A Deployment is ready once the controller observed the latest spec and
/// every desired replica is both updated and available.
#[must_use]
pub fn deployment_ready(deployment: &Deployment) -> bool {
    let desired = deployment
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or(1);
    let generation = deployment.metadata.generation.unwrap_or(0);
    let Some(status) = &deployment.status else {
        return false;
    };

    status.observed_generation.unwrap_or(0) >= generation
        && status.updated_replicas.unwrap_or(0) == desired
        && status.available_replicas.unwrap_or(0) == desired
}

#[must_use]
pub fn stateful_set_ready(stateful_set: &StatefulSet) -> bool {
    let desired = stateful_set
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or(1);
    let generation = stateful_set.metadata.generation.unwrap_or(0);
    let Some(status) = &stateful_set.status else {
        return false;
    };

    status.observed_generation.unwrap_or(0) >= generation
        && status.updated_replicas.unwrap_or(0) == desired
        && status.available_replicas.unwrap_or(0) == desired
}

/// Whether any owner reference of `meta` carries `uid`.
#[must_use]
pub fn is_owned_by(meta: &ObjectMeta, uid: &str) -> bool {
    meta.owner_references
        .iter()
        .flatten()
        .any(|owner| owner.uid == uid)
}

/// Whether `meta`'s managing controller reference carries `uid`.
#[must_use]
pub fn is_controlled_by(meta: &ObjectMeta, uid: &str) -> bool {
    meta.owner_references
        .iter()
        .flatten()
        .any(|owner| owner.controller == Some(true) && owner.uid == uid)
}

/// Terminal waiting states of a pod's init and regular containers, in that
/// order, formatted as `pod: <name>, <reason>: <message>`.
#[must_use]
pub fn terminal_waiting_failures(pod: &Pod) -> Vec<String> {
    let pod_name = pod.metadata.name.as_deref().unwrap_or_default();
    let Some(status) = &pod.status else {
        return Vec::new();
    };

    status
        .init_container_statuses
        .iter()
        .flatten()
        .chain(status.container_statuses.iter().flatten())
        .filter_map(|cs| cs.state.as_ref()?.waiting.as_ref())
        .filter_map(|waiting| {
            let reason = waiting.reason.as_deref()?;
            TERMINAL_WAITING_REASONS.contains(&reason).then(|| {
                format!(
                    "pod: {pod_name}, {reason}: {}",
                    waiting.message.as_deref().unwrap_or_default()
                )
            })
        })
        .collect()
}
