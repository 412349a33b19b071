//! Storage traits for tasks, viewpoints, and timelines.
//!
//! The storage layer is split into focused traits:
//! - `TaskStore`: task records and status transitions
//! - `ViewpointStore`: viewpoints and fingerprint lookup for reuse
//! - `TimelineStore`: consolidated events per viewpoint
//! - `Persistence`: composite trait combining all three

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::types::{Task, TaskStatus, TimelineEvent, Viewpoint};

/// Task records.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn create_task(&self, task: &Task) -> Result<()>;

    async fn get_task(&self, task_id: Uuid) -> Result<Option<Task>>;

    /// Persist the task's current fields and bump `updated_at`.
    async fn update_task(&self, task: &Task) -> Result<()>;

    /// Tasks still `Processing` whose `updated_at` is older than the
    /// cutoff. Used by the stuck-task sweep.
    async fn find_stale_processing(&self, older_than: DateTime<Utc>) -> Result<Vec<Task>>;
}

/// Viewpoints and reuse lookup.
#[async_trait]
pub trait ViewpointStore: Send + Sync {
    async fn create_viewpoint(&self, viewpoint: &Viewpoint) -> Result<()>;

    async fn get_viewpoint(&self, viewpoint_id: Uuid) -> Result<Option<Viewpoint>>;

    async fn update_viewpoint(&self, viewpoint: &Viewpoint) -> Result<()>;

    /// Find a viewpoint with the matching fingerprint in the given
    /// status, newest first on ties. Completed matches short-circuit the
    /// whole pipeline.
    async fn find_by_fingerprint(
        &self,
        fingerprint: &str,
        status: TaskStatus,
    ) -> Result<Option<Viewpoint>>;
}

/// Consolidated timelines.
#[async_trait]
pub trait TimelineStore: Send + Sync {
    /// Replace the stored timeline for a viewpoint.
    async fn store_timeline(&self, viewpoint_id: Uuid, events: &[TimelineEvent]) -> Result<()>;

    /// The stored timeline, in its persisted (chronological) order.
    async fn get_timeline(&self, viewpoint_id: Uuid) -> Result<Vec<TimelineEvent>>;
}

/// Composite persistence trait.
///
/// Implemented automatically for anything implementing all three parts.
pub trait Persistence: TaskStore + ViewpointStore + TimelineStore {}

impl<T: TaskStore + ViewpointStore + TimelineStore> Persistence for T {}
