//! Task records shared between the scheduler and task plugins.

pub mod deploy;
pub mod payload;
pub mod status;

pub use deploy::{DeployTask, Resource, WorkloadKind};
pub use payload::{Payload, TaskPayload};
pub use status::{TaskStatus, TaskType};
