//! In-memory persistence backed by `RwLock<HashMap>`.
//!
//! Suitable for tests and single-process use. Locks are held only for
//! the duration of a map operation, never across an await.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::traits::{TaskStore, TimelineStore, ViewpointStore};
use crate::types::{Task, TaskStatus, TimelineEvent, Viewpoint};

/// In-memory store implementing the full persistence surface.
#[derive(Default)]
pub struct MemoryStore {
    tasks: RwLock<HashMap<Uuid, Task>>,
    viewpoints: RwLock<HashMap<Uuid, Viewpoint>>,
    timelines: RwLock<HashMap<Uuid, Vec<TimelineEvent>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn task_count(&self) -> usize {
        self.tasks.read().unwrap().len()
    }

    pub fn viewpoint_count(&self) -> usize {
        self.viewpoints.read().unwrap().len()
    }
}

#[async_trait]
impl TaskStore for MemoryStore {
    async fn create_task(&self, task: &Task) -> Result<()> {
        self.tasks.write().unwrap().insert(task.id, task.clone());
        Ok(())
    }

    async fn get_task(&self, task_id: Uuid) -> Result<Option<Task>> {
        Ok(self.tasks.read().unwrap().get(&task_id).cloned())
    }

    async fn update_task(&self, task: &Task) -> Result<()> {
        self.tasks.write().unwrap().insert(task.id, task.clone());
        Ok(())
    }

    async fn find_stale_processing(&self, older_than: DateTime<Utc>) -> Result<Vec<Task>> {
        let mut stale: Vec<Task> = self
            .tasks
            .read()
            .unwrap()
            .values()
            .filter(|t| t.status == TaskStatus::Processing && t.updated_at < older_than)
            .cloned()
            .collect();
        stale.sort_by_key(|t| t.updated_at);
        Ok(stale)
    }
}

#[async_trait]
impl ViewpointStore for MemoryStore {
    async fn create_viewpoint(&self, viewpoint: &Viewpoint) -> Result<()> {
        self.viewpoints
            .write()
            .unwrap()
            .insert(viewpoint.id, viewpoint.clone());
        Ok(())
    }

    async fn get_viewpoint(&self, viewpoint_id: Uuid) -> Result<Option<Viewpoint>> {
        Ok(self.viewpoints.read().unwrap().get(&viewpoint_id).cloned())
    }

    async fn update_viewpoint(&self, viewpoint: &Viewpoint) -> Result<()> {
        self.viewpoints
            .write()
            .unwrap()
            .insert(viewpoint.id, viewpoint.clone());
        Ok(())
    }

    async fn find_by_fingerprint(
        &self,
        fingerprint: &str,
        status: TaskStatus,
    ) -> Result<Option<Viewpoint>> {
        Ok(self
            .viewpoints
            .read()
            .unwrap()
            .values()
            .filter(|v| v.fingerprint == fingerprint && v.status == status)
            .max_by_key(|v| v.updated_at)
            .cloned())
    }
}

#[async_trait]
impl TimelineStore for MemoryStore {
    async fn store_timeline(&self, viewpoint_id: Uuid, events: &[TimelineEvent]) -> Result<()> {
        self.timelines
            .write()
            .unwrap()
            .insert(viewpoint_id, events.to_vec());
        Ok(())
    }

    async fn get_timeline(&self, viewpoint_id: Uuid) -> Result<Vec<TimelineEvent>> {
        Ok(self
            .timelines
            .read()
            .unwrap()
            .get(&viewpoint_id)
            .cloned()
            .unwrap_or_default())
    }
}
