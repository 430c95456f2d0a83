/*
 * Warpdrive - Pipeline Task Plugins for Kubernetes Rollouts
 * Copyright (C) 2025 Warpdrive team
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published
 * by the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 */

#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc, clippy::doc_markdown)]

//! Pipeline task plugins
//!
//! This crate provides the task plugin contract a pipeline scheduler drives,
//! and the deploy plugin that updates a service's container image in
//! Kubernetes and follows the rollout to completion.

pub mod cluster;
pub mod config;
pub mod deploy;
pub mod error;
pub mod plugin;
pub mod service;
pub mod task;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use cluster::{ClusterAccess, KubeCluster};
pub use config::PluginConfig;
pub use deploy::DeployTaskPlugin;
pub use error::{Error, Result};
pub use plugin::{
    execute_task, initialize_task_plugin, plugin_for, AckFn, PipelineContext, PluginDeps,
    TaskPlugin,
};
pub use service::{ServiceCatalog, ServiceClient};
pub use task::{DeployTask, Payload, TaskPayload, TaskStatus, TaskType};
