//! In-process stand-in for the hosted service.
//!
//! Keeps rows in memory, assigns `srv-N` ids, and records every call so callers can
//! assert on ordering. Latency, outages and hung requests can be simulated.

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use super::{RemoteCategory, RemoteClient, RemoteError, RemoteRecord, RemoteTask};
use crate::category::{CategoryPatch, NewCategory};
use crate::task::{NewTask, TaskPatch};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCall {
    ListTasks,
    CreateTask(NewTask),
    UpdateTask { id: String, patch: TaskPatch },
    DeleteTask { id: String },
    ListCategories,
    CreateCategory(NewCategory),
    UpdateCategory { id: String, patch: CategoryPatch },
    DeleteCategory { id: String },
}

impl RemoteCall {
    pub fn is_write(&self) -> bool {
        !matches!(self, RemoteCall::ListTasks | RemoteCall::ListCategories)
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    tasks: Vec<RemoteTask>,
    categories: Vec<RemoteCategory>,
    next_id: u64,
    calls: Vec<RemoteCall>,
    offline: bool,
    fail_next: usize,
    hang_next: usize,
}

impl MemoryState {
    fn allocate_id(&mut self) -> String {
        self.next_id += 1;
        format!("srv-{}", self.next_id)
    }
}

enum Fault {
    None,
    Fail(RemoteError),
    Hang,
}

#[derive(Debug, Default)]
pub struct MemoryRemote {
    state: Mutex<MemoryState>,
    latency: Duration,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(latency: Duration) -> Self {
        Self {
            state: Mutex::default(),
            latency,
        }
    }

    /// Every call fails with [`RemoteError::Transport`] while offline.
    pub fn set_offline(&self, offline: bool) {
        self.state.lock().offline = offline;
    }

    /// The next `n` calls fail with a service error.
    pub fn fail_next(&self, n: usize) {
        self.state.lock().fail_next = n;
    }

    /// The next `n` calls never complete.
    pub fn hang_next(&self, n: usize) {
        self.state.lock().hang_next = n;
    }

    pub fn insert_task(&self, fields: NewTask) -> String {
        let mut state = self.state.lock();
        let id = state.allocate_id();
        state.tasks.push(RemoteRecord {
            id: id.clone(),
            fields,
        });
        id
    }

    pub fn insert_category(&self, fields: NewCategory) -> String {
        let mut state = self.state.lock();
        let id = state.allocate_id();
        state.categories.push(RemoteRecord {
            id: id.clone(),
            fields,
        });
        id
    }

    pub fn tasks(&self) -> Vec<RemoteTask> {
        self.state.lock().tasks.clone()
    }

    pub fn categories(&self) -> Vec<RemoteCategory> {
        self.state.lock().categories.clone()
    }

    pub fn calls(&self) -> Vec<RemoteCall> {
        self.state.lock().calls.clone()
    }

    pub fn write_calls(&self) -> Vec<RemoteCall> {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|call| call.is_write())
            .cloned()
            .collect()
    }

    async fn begin(&self, call: RemoteCall) -> Result<(), RemoteError> {
        let fault = {
            let mut state = self.state.lock();
            debug!(?call, "memory remote call");
            state.calls.push(call);
            if state.hang_next > 0 {
                state.hang_next -= 1;
                Fault::Hang
            } else if state.offline {
                Fault::Fail(RemoteError::Transport("network unreachable".to_string()))
            } else if state.fail_next > 0 {
                state.fail_next -= 1;
                Fault::Fail(RemoteError::Service {
                    status: 503,
                    message: "service unavailable".to_string(),
                })
            } else {
                Fault::None
            }
        };

        match fault {
            Fault::Hang => std::future::pending::<Result<(), RemoteError>>().await,
            Fault::Fail(err) => {
                tokio::time::sleep(self.latency).await;
                Err(err)
            }
            Fault::None => {
                tokio::time::sleep(self.latency).await;
                Ok(())
            }
        }
    }
}

fn not_found(id: &str) -> RemoteError {
    RemoteError::Service {
        status: 404,
        message: format!("no row with id {id}"),
    }
}

#[async_trait]
impl RemoteClient for MemoryRemote {
    async fn list_tasks(&self) -> Result<Vec<RemoteTask>, RemoteError> {
        self.begin(RemoteCall::ListTasks).await?;
        Ok(self.tasks())
    }

    async fn create_task(&self, task: &NewTask) -> Result<RemoteTask, RemoteError> {
        self.begin(RemoteCall::CreateTask(task.clone())).await?;
        Ok(RemoteRecord {
            id: self.insert_task(task.clone()),
            fields: task.clone(),
        })
    }

    async fn update_task(&self, id: &str, patch: &TaskPatch) -> Result<RemoteTask, RemoteError> {
        self.begin(RemoteCall::UpdateTask {
            id: id.to_string(),
            patch: patch.clone(),
        })
        .await?;

        let mut state = self.state.lock();
        let row = state
            .tasks
            .iter_mut()
            .find(|row| row.id == id)
            .ok_or_else(|| not_found(id))?;
        patch.apply_to(&mut row.fields);
        Ok(row.clone())
    }

    async fn delete_task(&self, id: &str) -> Result<(), RemoteError> {
        self.begin(RemoteCall::DeleteTask { id: id.to_string() })
            .await?;
        self.state.lock().tasks.retain(|row| row.id != id);
        Ok(())
    }

    async fn list_categories(&self) -> Result<Vec<RemoteCategory>, RemoteError> {
        self.begin(RemoteCall::ListCategories).await?;
        Ok(self.categories())
    }

    async fn create_category(
        &self,
        category: &NewCategory,
    ) -> Result<RemoteCategory, RemoteError> {
        self.begin(RemoteCall::CreateCategory(category.clone()))
            .await?;
        Ok(RemoteRecord {
            id: self.insert_category(category.clone()),
            fields: category.clone(),
        })
    }

    async fn update_category(
        &self,
        id: &str,
        patch: &CategoryPatch,
    ) -> Result<RemoteCategory, RemoteError> {
        self.begin(RemoteCall::UpdateCategory {
            id: id.to_string(),
            patch: patch.clone(),
        })
        .await?;

        let mut state = self.state.lock();
        let row = state
            .categories
            .iter_mut()
            .find(|row| row.id == id)
            .ok_or_else(|| not_found(id))?;
        patch.apply_to(&mut row.fields);
        Ok(row.clone())
    }

    async fn delete_category(&self, id: &str) -> Result<(), RemoteError> {
        self.begin(RemoteCall::DeleteCategory { id: id.to_string() })
            .await?;
        self.state.lock().categories.retain(|row| row.id != id);
        Ok(())
    }
}
