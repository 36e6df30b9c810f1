//! User-facing mutations. Each one applies optimistically to the local store and then
//! queues the remote call that reconciles it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tracing::{debug, instrument, warn};

use crate::category::{ALL_CATEGORY, Category, CategoryPatch, NewCategory};
use crate::queue::{Applied, SyncAction};
use crate::remote::RemoteError;
use crate::session::{Session, SyncContext};
use crate::store::{CategoryMutation, Rollback, Snapshot, TaskMutation};
use crate::task::{CategoryRef, NewTask, Task, TaskPatch};

enum TaskOp {
    Create(NewTask),
    Update(TaskPatch),
    Delete,
}

struct TaskSync {
    ctx: SyncContext,
    local_id: String,
    op: TaskOp,
    snapshot: Snapshot<Task>,
    failure: &'static str,
    /// Set once the service no longer needs this task moved (member of a category delete).
    moved: Option<Arc<AtomicBool>>,
}

impl TaskSync {
    fn settle(&self) {
        self.ctx.store.lock().end_pending(&self.local_id);
        if let Some(moved) = &self.moved {
            moved.store(true, Ordering::SeqCst);
        }
    }

    fn server_id(&self) -> Option<String> {
        self.ctx.store.lock().resolve_remote_id(&self.local_id)
    }
}

#[async_trait]
impl SyncAction for TaskSync {
    fn label(&self) -> String {
        let verb = match self.op {
            TaskOp::Create(_) => "create",
            TaskOp::Update(_) => "update",
            TaskOp::Delete => "delete",
        };
        format!("task {verb} {}", self.local_id)
    }

    async fn attempt(&mut self) -> Result<Applied, RemoteError> {
        match &self.op {
            TaskOp::Create(payload) => {
                let mut payload = payload.clone();
                payload.category = self
                    .ctx
                    .store
                    .lock()
                    .resolve_remote_category(&payload.category);

                let record = self.ctx.remote.create_task(&payload).await?;

                let mut store = self.ctx.store.lock();
                store.commit_task(&self.local_id, &record);
                store.end_pending(&self.local_id);
                Ok(Applied::Committed)
            }
            TaskOp::Update(patch) => {
                let server_id = self.server_id();
                let Some(server_id) = server_id else {
                    self.settle();
                    return Ok(Applied::Skipped);
                };

                let mut patch = patch.clone();
                if let Some(category) = &patch.category {
                    let resolved = self.ctx.store.lock().resolve_remote_category(category);
                    patch.category = Some(resolved);
                }

                self.ctx.remote.update_task(&server_id, &patch).await?;
                self.settle();
                Ok(Applied::Committed)
            }
            TaskOp::Delete => {
                let server_id = self.server_id();
                let Some(server_id) = server_id else {
                    self.settle();
                    return Ok(Applied::Skipped);
                };

                self.ctx.remote.delete_task(&server_id).await?;
                self.settle();
                Ok(Applied::Committed)
            }
        }
    }

    fn abandon(self: Box<Self>, error: &RemoteError) {
        {
            let mut store = self.ctx.store.lock();
            store.rollback(Rollback::Task(self.snapshot));
            store.end_pending(&self.local_id);
        }
        self.ctx.notices.error(format!("{}: {error}", self.failure));
    }
}

enum CategoryOp {
    Create(NewCategory),
    Update(CategoryPatch),
    Delete(Vec<MemberMove>),
}

/// A task that a category delete moves to `all` through its own queued update.
struct MemberMove {
    task_id: String,
    category: CategoryRef,
    moved: Arc<AtomicBool>,
}

impl MemberMove {
    fn is_moved(&self) -> bool {
        self.moved.load(Ordering::SeqCst)
    }
}

struct CategorySync {
    ctx: SyncContext,
    local_id: String,
    op: CategoryOp,
    snapshot: Snapshot<Category>,
    failure: &'static str,
}

impl CategorySync {
    fn settle(&self) {
        self.ctx.store.lock().end_pending(&self.local_id);
    }
}

#[async_trait]
impl SyncAction for CategorySync {
    fn label(&self) -> String {
        let verb = match self.op {
            CategoryOp::Create(_) => "create",
            CategoryOp::Update(_) => "update",
            CategoryOp::Delete(_) => "delete",
        };
        format!("category {verb} {}", self.local_id)
    }

    async fn attempt(&mut self) -> Result<Applied, RemoteError> {
        if let CategoryOp::Create(payload) = &self.op {
            let record = self.ctx.remote.create_category(payload).await?;
            let mut store = self.ctx.store.lock();
            store.commit_category(&self.local_id, &record);
            store.end_pending(&self.local_id);
            return Ok(Applied::Committed);
        }

        let server_id = self.ctx.store.lock().resolve_remote_id(&self.local_id);
        let Some(server_id) = server_id else {
            self.settle();
            return Ok(Applied::Skipped);
        };

        match &self.op {
            CategoryOp::Update(patch) => {
                self.ctx.remote.update_category(&server_id, patch).await?;
            }
            CategoryOp::Delete(members) => {
                let stranded = members.iter().filter(|member| !member.is_moved()).count();
                if stranded > 0 {
                    return Err(RemoteError::Rejected(format!(
                        "{stranded} task(s) still belong to it"
                    )));
                }
                self.ctx.remote.delete_category(&server_id).await?;
            }
            CategoryOp::Create(_) => {}
        }
        self.settle();
        Ok(Applied::Committed)
    }

    fn abandon(self: Box<Self>, error: &RemoteError) {
        {
            let mut store = self.ctx.store.lock();
            store.rollback(Rollback::Category(self.snapshot));
            if let CategoryOp::Delete(members) = &self.op {
                for member in members.iter().filter(|member| !member.is_moved()) {
                    if !store.reattach_task(&member.task_id, &member.category) {
                        warn!(task = %member.task_id, "could not return task to restored category");
                    }
                }
            }
            store.end_pending(&self.local_id);
        }
        self.ctx.notices.error(format!("{}: {error}", self.failure));
    }
}

impl Session {
    /// Adds a task under a temporary id and queues its create call.
    #[instrument(skip(self, fields), fields(title = %fields.title))]
    pub fn create_task(&self, fields: NewTask) -> Option<Task> {
        let task = {
            let mut store = self.ctx.store.lock();
            let task = store.apply_task_mutation(TaskMutation::Create(fields))?;
            store.begin_pending(task.id.as_str());
            task
        };
        self.ctx.notices.success(format!("Added \"{}\"", task.title()));

        let local_id = task.id.as_str().to_string();
        self.queue.enqueue(Box::new(TaskSync {
            ctx: self.ctx.clone(),
            local_id: local_id.clone(),
            op: TaskOp::Create(task.fields.clone()),
            snapshot: Snapshot {
                id: local_id,
                before: None,
            },
            failure: "Could not add task",
            moved: None,
        }));
        Some(task)
    }

    #[instrument(skip(self, patch))]
    pub fn update_task(&self, id: &str, patch: TaskPatch) -> Option<Task> {
        self.update_task_with(id, patch, "Task updated")
    }

    #[instrument(skip(self))]
    pub fn toggle_task_completed(&self, id: &str) -> Option<Task> {
        let completed = self.ctx.store.lock().find_task(id)?.fields.is_completed;
        let message = if completed {
            "Task reopened"
        } else {
            "Task completed"
        };
        let patch = TaskPatch {
            is_completed: Some(!completed),
            ..TaskPatch::default()
        };
        self.update_task_with(id, patch, message)
    }

    #[instrument(skip(self))]
    pub fn toggle_task_favorite(&self, id: &str) -> Option<Task> {
        let favorite = self.ctx.store.lock().find_task(id)?.fields.is_favorite;
        let message = if favorite {
            "Removed from favorites"
        } else {
            "Added to favorites"
        };
        let patch = TaskPatch {
            is_favorite: Some(!favorite),
            ..TaskPatch::default()
        };
        self.update_task_with(id, patch, message)
    }

    #[instrument(skip(self))]
    pub fn delete_task(&self, id: &str) -> Option<Task> {
        let (snapshot, removed) = {
            let mut store = self.ctx.store.lock();
            let snapshot = store.snapshot_task(id)?;
            let removed = store.apply_task_mutation(TaskMutation::Delete {
                id: snapshot.id.clone(),
            })?;
            store.begin_pending(&snapshot.id);
            (snapshot, removed)
        };
        self.ctx
            .notices
            .success(format!("Deleted \"{}\"", removed.title()));

        self.queue.enqueue(Box::new(TaskSync {
            ctx: self.ctx.clone(),
            local_id: snapshot.id.clone(),
            op: TaskOp::Delete,
            snapshot,
            failure: "Could not delete task",
            moved: None,
        }));
        Some(removed)
    }

    #[instrument(skip(self, fields), fields(name = %fields.name))]
    pub fn create_category(&self, fields: NewCategory) -> Option<Category> {
        let category = {
            let mut store = self.ctx.store.lock();
            let category = store.apply_category_mutation(CategoryMutation::Create(fields))?;
            store.begin_pending(category.id.as_str());
            category
        };
        self.ctx
            .notices
            .success(format!("Category \"{}\" created", category.name()));

        let local_id = category.id.as_str().to_string();
        self.queue.enqueue(Box::new(CategorySync {
            ctx: self.ctx.clone(),
            local_id: local_id.clone(),
            op: CategoryOp::Create(category.fields.clone()),
            snapshot: Snapshot {
                id: local_id,
                before: None,
            },
            failure: "Could not create category",
        }));
        Some(category)
    }

    #[instrument(skip(self, patch))]
    pub fn update_category(&self, id: &str, patch: CategoryPatch) -> Option<Category> {
        if id == ALL_CATEGORY || patch.is_empty() {
            debug!(id, "category update is a no-op");
            return None;
        }
        let (snapshot, category) = {
            let mut store = self.ctx.store.lock();
            let snapshot = store.snapshot_category(id)?;
            let category = store.apply_category_mutation(CategoryMutation::Update {
                id: snapshot.id.clone(),
                patch: patch.clone(),
            })?;
            store.begin_pending(&snapshot.id);
            (snapshot, category)
        };
        self.ctx.notices.success("Category updated");

        self.queue.enqueue(Box::new(CategorySync {
            ctx: self.ctx.clone(),
            local_id: snapshot.id.clone(),
            op: CategoryOp::Update(patch),
            snapshot,
            failure: "Could not update category",
        }));
        Some(category)
    }

    /// Removes a category. Member tasks move to `all` first, each with its own queued
    /// update, so the service sees the reassignment before the delete. The delete is not
    /// sent while any member still sits in the category remotely; giving up restores the
    /// category and returns those members to it.
    #[instrument(skip(self))]
    pub fn delete_category(&self, id: &str) -> Option<Category> {
        if id == ALL_CATEGORY {
            debug!("the all category cannot be deleted");
            return None;
        }
        let (snapshot, members, removed) = {
            let mut store = self.ctx.store.lock();
            let snapshot = store.snapshot_category(id)?;
            let members: Vec<Snapshot<Task>> = store
                .tasks()
                .iter()
                .filter(|task| task.fields.category.id() == Some(snapshot.id.as_str()))
                .map(|task| Snapshot {
                    id: task.id.as_str().to_string(),
                    before: Some(task.clone()),
                })
                .collect();
            let removed = store.apply_category_mutation(CategoryMutation::Delete {
                id: snapshot.id.clone(),
            })?;
            for member in &members {
                store.begin_pending(&member.id);
            }
            store.begin_pending(&snapshot.id);
            (snapshot, members, removed)
        };
        self.ctx
            .notices
            .success(format!("Category \"{}\" deleted", removed.name()));

        let mut moves = Vec::with_capacity(members.len());
        for member in members {
            let moved = Arc::new(AtomicBool::new(false));
            moves.push(MemberMove {
                task_id: member.id.clone(),
                category: CategoryRef::Category(snapshot.id.clone()),
                moved: moved.clone(),
            });
            self.queue.enqueue(Box::new(TaskSync {
                ctx: self.ctx.clone(),
                local_id: member.id.clone(),
                op: TaskOp::Update(TaskPatch {
                    category: Some(CategoryRef::All),
                    ..TaskPatch::default()
                }),
                snapshot: member,
                failure: "Could not move task out of deleted category",
                moved: Some(moved),
            }));
        }
        self.queue.enqueue(Box::new(CategorySync {
            ctx: self.ctx.clone(),
            local_id: snapshot.id.clone(),
            op: CategoryOp::Delete(moves),
            snapshot,
            failure: "Could not delete category",
        }));
        Some(removed)
    }

    fn update_task_with(&self, id: &str, patch: TaskPatch, message: &str) -> Option<Task> {
        if patch.is_empty() {
            debug!(id, "empty task patch ignored");
            return None;
        }
        let (snapshot, task) = {
            let mut store = self.ctx.store.lock();
            let snapshot = store.snapshot_task(id)?;
            let task = store.apply_task_mutation(TaskMutation::Update {
                id: snapshot.id.clone(),
                patch: patch.clone(),
            })?;
            store.begin_pending(&snapshot.id);
            (snapshot, task)
        };
        self.ctx.notices.success(message);

        self.queue.enqueue(Box::new(TaskSync {
            ctx: self.ctx.clone(),
            local_id: snapshot.id.clone(),
            op: TaskOp::Update(patch),
            snapshot,
            failure: "Could not update task",
            moved: None,
        }));
        Some(task)
    }
}
