//! In-memory task and category collections, mirrored to the durable cache.
//!
//! Every mutation here is synchronous and never waits on the network. Callers share the
//! store as a [`SharedStore`]; the lock must never be held across an `.await`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};

use crate::cache::{CATEGORIES_COLLECTION, DurableCache, TASKS_COLLECTION};
use crate::category::{ALL_CATEGORY, Category, CategoryPatch, NewCategory};
use crate::id::{EntityId, is_temp_id};
use crate::remote::{RemoteCategory, RemoteTask};
use crate::task::{CategoryRef, NewTask, Task, TaskPatch};

pub type SharedStore = Arc<Mutex<LocalStore>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreEvent {
    Tasks,
    Categories,
    Cleared,
}

#[derive(Debug, Clone)]
pub enum TaskMutation {
    Create(NewTask),
    Update { id: String, patch: TaskPatch },
    Delete { id: String },
}

#[derive(Debug, Clone)]
pub enum CategoryMutation {
    Create(NewCategory),
    Update { id: String, patch: CategoryPatch },
    Delete { id: String },
}

/// State of one entity immediately before an optimistic mutation. `before == None`
/// means the entity did not exist yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot<T> {
    pub id: String,
    pub before: Option<T>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rollback {
    Task(Snapshot<Task>),
    Category(Snapshot<Category>),
}

trait Entity: Clone {
    fn entity_id(&self) -> &EntityId;

    fn set_id(&mut self, id: EntityId);

    fn restore_from(&mut self, snapshot: &Self);
}

impl Entity for Task {
    fn entity_id(&self) -> &EntityId {
        &self.id
    }

    fn set_id(&mut self, id: EntityId) {
        self.id = id;
    }

    fn restore_from(&mut self, snapshot: &Self) {
        self.fields = snapshot.fields.clone();
    }
}

impl Entity for Category {
    fn entity_id(&self) -> &EntityId {
        &self.id
    }

    fn set_id(&mut self, id: EntityId) {
        self.id = id;
    }

    fn restore_from(&mut self, snapshot: &Self) {
        self.fields = snapshot.fields.clone();
    }
}

fn position<T: Entity>(items: &[T], id: &str) -> Option<usize> {
    items.iter().position(|item| item.entity_id().as_str() == id)
}

pub struct LocalStore {
    tasks: Vec<Task>,
    categories: Vec<Category>,
    cache: Arc<dyn DurableCache>,
    aliases: HashMap<String, String>,
    pending: HashMap<String, usize>,
    counts_stale: bool,
    events: broadcast::Sender<StoreEvent>,
}

impl LocalStore {
    /// Hydrates both collections from the cache. A corrupt collection is logged and
    /// treated as empty.
    #[instrument(skip(cache))]
    pub fn open(cache: Arc<dyn DurableCache>) -> Self {
        let (events, _) = broadcast::channel(64);
        let tasks: Vec<Task> = hydrate(cache.as_ref(), TASKS_COLLECTION);
        let categories: Vec<Category> = hydrate(cache.as_ref(), CATEGORIES_COLLECTION);

        let mut store = Self {
            tasks,
            categories,
            cache,
            aliases: HashMap::new(),
            pending: HashMap::new(),
            counts_stale: false,
            events,
        };
        store.detach_dangling_categories();
        store.recompute_category_counts();

        info!(
            tasks = store.tasks.len(),
            categories = store.categories.len(),
            "hydrated local store"
        );
        store
    }

    pub fn shared(cache: Arc<dyn DurableCache>) -> SharedStore {
        Arc::new(Mutex::new(Self::open(cache)))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    /// Exact lookup. A temporary id stops resolving once its create is committed.
    pub fn task(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|task| task.id.as_str() == id)
    }

    /// Lookup that also follows a committed temporary id to its entity.
    pub fn find_task(&self, id: &str) -> Option<&Task> {
        self.task(self.current_id(id))
    }

    pub fn user_categories(&self) -> &[Category] {
        &self.categories
    }

    /// All categories for rendering, the `all` sentinel first.
    pub fn categories(&self) -> Vec<Category> {
        let mut out = Vec::with_capacity(self.categories.len() + 1);
        out.push(Category::sentinel(self.tasks.len()));
        out.extend(self.categories.iter().cloned());
        out
    }

    pub fn category(&self, id: &str) -> Option<Category> {
        if id == ALL_CATEGORY {
            return Some(Category::sentinel(self.tasks.len()));
        }
        self.categories
            .iter()
            .find(|category| category.id.as_str() == id)
            .cloned()
    }

    /// Follows temp→server aliases to the id the entity carries now.
    pub fn current_id<'a>(&'a self, id: &'a str) -> &'a str {
        self.aliases.get(id).map(String::as_str).unwrap_or(id)
    }

    /// Server id to address `id` remotely, or `None` while it is only known locally.
    pub fn resolve_remote_id(&self, id: &str) -> Option<String> {
        let current = self.current_id(id);
        (!is_temp_id(current)).then(|| current.to_string())
    }

    /// Category reference as the service should see it. A category that never got a
    /// server id degrades to uncategorized.
    pub fn resolve_remote_category(&self, category: &CategoryRef) -> CategoryRef {
        match category {
            CategoryRef::All => CategoryRef::All,
            CategoryRef::Category(id) => match self.resolve_remote_id(id) {
                Some(server) => CategoryRef::Category(server),
                None => CategoryRef::All,
            },
        }
    }

    pub fn snapshot_task(&self, id: &str) -> Option<Snapshot<Task>> {
        let current = self.current_id(id);
        self.task(current).map(|task| Snapshot {
            id: current.to_string(),
            before: Some(task.clone()),
        })
    }

    pub fn snapshot_category(&self, id: &str) -> Option<Snapshot<Category>> {
        let current = self.current_id(id);
        self.categories
            .iter()
            .find(|category| category.id.as_str() == current)
            .map(|category| Snapshot {
                id: current.to_string(),
                before: Some(category.clone()),
            })
    }

    #[instrument(skip(self, mutation))]
    pub fn apply_task_mutation(&mut self, mutation: TaskMutation) -> Option<Task> {
        let result = match mutation {
            TaskMutation::Create(mut fields) => {
                fields.category = self.normalize_category_ref(&fields.category)?;
                let task = Task {
                    id: EntityId::pending(),
                    fields,
                };
                debug!(id = %task.id, "optimistic task create");
                self.tasks.push(task.clone());
                task
            }
            TaskMutation::Update { id, mut patch } => {
                if let Some(category) = &patch.category {
                    patch.category = Some(self.normalize_category_ref(category)?);
                }
                let current = self.current_id(&id).to_string();
                let Some(idx) = position(&self.tasks, &current) else {
                    debug!(id = %id, "update for unknown task ignored");
                    return None;
                };
                patch.apply_to(&mut self.tasks[idx].fields);
                self.tasks[idx].clone()
            }
            TaskMutation::Delete { id } => {
                let current = self.current_id(&id).to_string();
                let Some(idx) = position(&self.tasks, &current) else {
                    debug!(id = %id, "delete for unknown task ignored");
                    return None;
                };
                self.tasks.remove(idx)
            }
        };

        self.tasks_changed();
        Some(result)
    }

    #[instrument(skip(self, mutation))]
    pub fn apply_category_mutation(&mut self, mutation: CategoryMutation) -> Option<Category> {
        let result = match mutation {
            CategoryMutation::Create(fields) => {
                if fields.name.trim().is_empty() {
                    debug!("category without a name ignored");
                    return None;
                }
                let category = Category::new(EntityId::pending(), fields);
                self.categories.push(category.clone());
                category
            }
            CategoryMutation::Update { id, patch } => {
                let current = self.current_id(&id).to_string();
                let Some(idx) = position(&self.categories, &current) else {
                    debug!(id = %id, "update for unknown category ignored");
                    return None;
                };
                patch.apply_to(&mut self.categories[idx].fields);
                self.categories[idx].clone()
            }
            CategoryMutation::Delete { id } => {
                let current = self.current_id(&id).to_string();
                let Some(idx) = position(&self.categories, &current) else {
                    debug!(id = %id, "delete for unknown category ignored");
                    return None;
                };
                let removed = self.categories.remove(idx);
                if self.reassign_members_to_all(&current) > 0 {
                    self.tasks_changed();
                }
                removed
            }
        };

        self.recompute_category_counts();
        self.persist_categories();
        self.emit(StoreEvent::Categories);
        Some(result)
    }

    pub fn recompute_category_counts(&mut self) {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for task in &self.tasks {
            if let Some(id) = task.fields.category.id() {
                *counts.entry(id).or_default() += 1;
            }
        }
        for category in &mut self.categories {
            category.count = counts.get(category.id.as_str()).copied().unwrap_or(0);
        }
    }

    /// Debounced follow-up to task mutations: re-derives counts and writes the
    /// categories collection if task edits left it stale.
    pub fn settle_category_counts(&mut self) {
        if !self.counts_stale {
            return;
        }
        self.recompute_category_counts();
        self.persist_categories();
        self.counts_stale = false;
        debug!("category counts settled");
    }

    #[instrument(skip(self, rollback))]
    pub fn rollback(&mut self, rollback: Rollback) {
        match rollback {
            Rollback::Task(snapshot) => {
                let (id, restored) = self.restore(snapshot, |store| &mut store.tasks);
                if restored {
                    if let Some(task) = self.task(&id)
                        && !self.category_ref_exists(&task.fields.category)
                        && let Some(idx) = position(&self.tasks, &id)
                    {
                        self.tasks[idx].fields.category = CategoryRef::All;
                    }
                }
                info!(id = %id, "rolled back task");
                self.tasks_changed();
            }
            Rollback::Category(snapshot) => {
                let (id, restored) = self.restore(snapshot, |store| &mut store.categories);
                if !restored && self.reassign_members_to_all(&id) > 0 {
                    self.tasks_changed();
                }
                info!(id = %id, "rolled back category");
                self.recompute_category_counts();
                self.persist_categories();
                self.emit(StoreEvent::Categories);
            }
        }
    }

    /// Puts a task back into `category` once a category delete has been given up. Only a
    /// task still sitting in `all` is moved.
    #[instrument(skip(self))]
    pub fn reattach_task(&mut self, id: &str, category: &CategoryRef) -> bool {
        let Some(category) = self.normalize_category_ref(category) else {
            return false;
        };
        let current = self.current_id(id).to_string();
        let Some(idx) = position(&self.tasks, &current) else {
            return false;
        };
        if self.tasks[idx].fields.category != CategoryRef::All {
            return false;
        }
        self.tasks[idx].fields.category = category;
        self.tasks_changed();
        true
    }

    /// Applies a snapshot to one collection. Returns the current id and whether the
    /// entity exists afterwards.
    fn restore<T, F>(&mut self, snapshot: Snapshot<T>, collection: F) -> (String, bool)
    where
        T: Entity,
        F: Fn(&mut Self) -> &mut Vec<T>,
    {
        let current = self.current_id(&snapshot.id).to_string();
        let items = collection(self);
        match (position(items, &current), snapshot.before) {
            (Some(idx), None) => {
                items.remove(idx);
                (current, false)
            }
            (None, None) => (current, false),
            (Some(idx), Some(before)) => {
                items[idx].restore_from(&before);
                (current, true)
            }
            (None, Some(mut before)) => {
                if !is_temp_id(&current) {
                    before.set_id(EntityId::Committed(current.clone()));
                }
                items.push(before);
                (current, true)
            }
        }
    }

    /// Swaps a task's temporary id for its server id. A task deleted in the meantime is
    /// not resurrected; only the alias is recorded.
    #[instrument(skip(self, record), fields(server_id = %record.id))]
    pub fn commit_task(&mut self, local_id: &str, record: &RemoteTask) -> Option<Task> {
        let current = self.current_id(local_id).to_string();
        self.record_alias(&current, &record.id);

        let idx = position(&self.tasks, &current)?;
        self.tasks[idx].id = EntityId::Committed(record.id.clone());
        let task = self.tasks[idx].clone();
        self.persist_tasks();
        self.emit(StoreEvent::Tasks);
        Some(task)
    }

    #[instrument(skip(self, record), fields(server_id = %record.id))]
    pub fn commit_category(&mut self, local_id: &str, record: &RemoteCategory) -> Option<Category> {
        let current = self.current_id(local_id).to_string();
        self.record_alias(&current, &record.id);

        let mut retargeted = 0;
        for task in &mut self.tasks {
            if task.fields.category.id() == Some(current.as_str()) {
                task.fields.category = CategoryRef::Category(record.id.clone());
                retargeted += 1;
            }
        }
        if retargeted > 0 {
            debug!(retargeted, "moved tasks onto committed category id");
            self.persist_tasks();
            self.emit(StoreEvent::Tasks);
        }

        let idx = position(&self.categories, &current)?;
        self.categories[idx].id = EntityId::Committed(record.id.clone());
        let category = self.categories[idx].clone();
        self.persist_categories();
        self.emit(StoreEvent::Categories);
        Some(category)
    }

    fn record_alias(&mut self, current: &str, server_id: &str) {
        if current == server_id {
            return;
        }
        for target in self.aliases.values_mut() {
            if target == current {
                *target = server_id.to_string();
            }
        }
        self.aliases
            .insert(current.to_string(), server_id.to_string());
        if let Some(count) = self.pending.remove(current) {
            *self.pending.entry(server_id.to_string()).or_default() += count;
        }
    }

    pub fn begin_pending(&mut self, id: &str) {
        let current = self.current_id(id).to_string();
        *self.pending.entry(current).or_default() += 1;
    }

    pub fn end_pending(&mut self, id: &str) {
        let current = self.current_id(id).to_string();
        if let Some(count) = self.pending.get_mut(&current) {
            *count -= 1;
            if *count == 0 {
                self.pending.remove(&current);
            }
        }
    }

    pub fn has_pending(&self, id: &str) -> bool {
        self.pending.contains_key(self.current_id(id))
    }

    /// Refresh apply step: the service's collections replace local ones, except that an
    /// entity with in-flight sync actions keeps its local state (including absence).
    #[instrument(skip_all, fields(tasks = tasks.len(), categories = categories.len()))]
    pub fn replace_from_remote(&mut self, tasks: Vec<RemoteTask>, categories: Vec<RemoteCategory>) {
        let remote_categories: Vec<Category> = categories
            .into_iter()
            .filter(|record| record.id != ALL_CATEGORY)
            .map(|record| Category::new(EntityId::Committed(record.id), record.fields))
            .collect();
        let remote_tasks: Vec<Task> = tasks
            .into_iter()
            .map(|record| Task {
                id: EntityId::Committed(record.id),
                fields: record.fields,
            })
            .collect();

        self.categories = merge_refresh(&self.categories, remote_categories, &self.pending);
        self.tasks = merge_refresh(&self.tasks, remote_tasks, &self.pending);
        self.detach_dangling_categories();

        self.recompute_category_counts();
        self.counts_stale = false;
        self.persist_tasks();
        self.persist_categories();
        self.emit(StoreEvent::Categories);
        self.emit(StoreEvent::Tasks);
    }

    /// Drops everything, including the cached collections (sign-out).
    #[instrument(skip(self))]
    pub fn clear(&mut self) {
        self.tasks.clear();
        self.categories.clear();
        self.aliases.clear();
        self.pending.clear();
        self.counts_stale = false;
        for name in [TASKS_COLLECTION, CATEGORIES_COLLECTION] {
            if let Err(err) = self.cache.remove_collection(name) {
                warn!(collection = name, error = %err, "failed to clear cached collection");
            }
        }
        self.emit(StoreEvent::Cleared);
    }

    fn normalize_category_ref(&self, category: &CategoryRef) -> Option<CategoryRef> {
        match category {
            CategoryRef::All => Some(CategoryRef::All),
            CategoryRef::Category(id) => {
                let current = self.current_id(id);
                if self.categories.iter().any(|c| c.id.as_str() == current) {
                    Some(CategoryRef::Category(current.to_string()))
                } else {
                    warn!(category = %id, "task references unknown category; ignoring mutation");
                    None
                }
            }
        }
    }

    fn category_ref_exists(&self, category: &CategoryRef) -> bool {
        match category.id() {
            None => true,
            Some(id) => self.categories.iter().any(|c| c.id.as_str() == id),
        }
    }

    fn reassign_members_to_all(&mut self, category_id: &str) -> usize {
        let mut moved = 0;
        for task in &mut self.tasks {
            if task.fields.category.id() == Some(category_id) {
                task.fields.category = CategoryRef::All;
                moved += 1;
            }
        }
        moved
    }

    fn detach_dangling_categories(&mut self) {
        let known: HashSet<String> = self
            .categories
            .iter()
            .map(|category| category.id.as_str().to_string())
            .collect();
        for task in &mut self.tasks {
            if let Some(id) = task.fields.category.id()
                && !known.contains(id)
            {
                debug!(task = %task.id, category = %id, "task category missing; moved to all");
                task.fields.category = CategoryRef::All;
            }
        }
    }

    fn tasks_changed(&mut self) {
        self.recompute_category_counts();
        self.counts_stale = true;
        self.persist_tasks();
        self.emit(StoreEvent::Tasks);
    }

    fn persist_tasks(&self) {
        persist(self.cache.as_ref(), TASKS_COLLECTION, &self.tasks);
    }

    fn persist_categories(&self) {
        persist(self.cache.as_ref(), CATEGORIES_COLLECTION, &self.categories);
    }

    fn emit(&self, event: StoreEvent) {
        let _ = self.events.send(event);
    }
}

fn merge_refresh<T: Entity>(local: &[T], remote: Vec<T>, pending: &HashMap<String, usize>) -> Vec<T> {
    let remote_ids: HashSet<String> = remote
        .iter()
        .map(|item| item.entity_id().as_str().to_string())
        .collect();

    let mut merged: Vec<T> = remote
        .into_iter()
        .filter_map(|item| {
            let id = item.entity_id().as_str();
            if !pending.contains_key(id) {
                return Some(item);
            }
            // In-flight: local state wins, and local absence means a pending delete.
            position(local, id).map(|idx| local[idx].clone())
        })
        .collect();

    merged.extend(
        local
            .iter()
            .filter(|item| {
                let id = item.entity_id().as_str();
                pending.contains_key(id) && !remote_ids.contains(id)
            })
            .cloned(),
    );
    merged
}

fn hydrate<T: DeserializeOwned>(cache: &dyn DurableCache, name: &str) -> Vec<T> {
    match cache.read_collection(name) {
        Ok(Some(value)) => match serde_json::from_value(value) {
            Ok(items) => items,
            Err(err) => {
                warn!(collection = name, error = %err, "cached collection is malformed; starting empty");
                Vec::new()
            }
        },
        Ok(None) => Vec::new(),
        Err(err) => {
            warn!(collection = name, error = %err, "failed to read cached collection; starting empty");
            Vec::new()
        }
    }
}

fn persist<T: Serialize>(cache: &dyn DurableCache, name: &str, items: &[T]) {
    let result = serde_json::to_value(items)
        .map_err(anyhow::Error::from)
        .and_then(|value| cache.write_collection(name, &value));
    if let Err(err) = result {
        warn!(collection = name, error = %err, "failed to persist collection; keeping in-memory state");
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::cache::MemoryCache;
    use crate::category::{CategoryColor, CategoryFields};
    use crate::remote::RemoteRecord;
    use crate::task::TaskFields;

    fn store() -> (LocalStore, Arc<MemoryCache>) {
        let cache = Arc::new(MemoryCache::new());
        (LocalStore::open(cache.clone()), cache)
    }

    fn fields(title: &str) -> TaskFields {
        TaskFields::new(title, NaiveDate::from_ymd_opt(2024, 1, 10).expect("valid date"))
    }

    fn home() -> CategoryFields {
        CategoryFields {
            name: "Home".to_string(),
            color: CategoryColor::Green,
        }
    }

    fn committed_category(store: &mut LocalStore, server_id: &str) -> String {
        let created = store
            .apply_category_mutation(CategoryMutation::Create(home()))
            .expect("create category");
        store.commit_category(
            created.id.as_str(),
            &RemoteRecord {
                id: server_id.to_string(),
                fields: home(),
            },
        );
        server_id.to_string()
    }

    #[test]
    fn create_assigns_temp_id_and_persists() {
        let (mut store, cache) = store();
        let task = store
            .apply_task_mutation(TaskMutation::Create(fields("Buy milk")))
            .expect("created");
        assert!(task.id.is_pending());
        assert_eq!(store.tasks().len(), 1);

        let cached = cache
            .read_collection(TASKS_COLLECTION)
            .expect("read")
            .expect("cached");
        assert_eq!(cached.as_array().map(Vec::len), Some(1));
    }

    #[test]
    fn counts_track_membership_and_sentinel() {
        let (mut store, _) = store();
        let home_id = committed_category(&mut store, "c-home");

        let mut at_home = fields("Water plants");
        at_home.category = CategoryRef::Category(home_id.clone());
        store.apply_task_mutation(TaskMutation::Create(at_home));
        store.apply_task_mutation(TaskMutation::Create(fields("Loose end")));

        let categories = store.categories();
        assert_eq!(categories[0].count, 2);
        assert!(categories[0].is_sentinel());
        assert_eq!(store.category(&home_id).map(|c| c.count), Some(1));
    }

    #[test]
    fn reattach_returns_task_to_restored_category() {
        let (mut store, _) = store();
        let home_id = committed_category(&mut store, "c-home");
        let mut chore = fields("Sweep");
        chore.category = CategoryRef::Category(home_id.clone());
        let chore = store
            .apply_task_mutation(TaskMutation::Create(chore))
            .expect("task");
        let category = store.snapshot_category(&home_id).expect("snapshot");

        store.apply_category_mutation(CategoryMutation::Delete {
            id: home_id.clone(),
        });
        let home_ref = CategoryRef::Category(home_id.clone());
        assert!(!store.reattach_task(chore.id.as_str(), &home_ref), "category is gone");

        store.rollback(Rollback::Category(category));
        assert!(store.reattach_task(chore.id.as_str(), &home_ref));
        assert_eq!(store.tasks()[0].fields.category, home_ref);
        assert_eq!(store.category(&home_id).map(|c| c.count), Some(1));
        assert!(!store.reattach_task("missing", &home_ref));
    }

    #[test]
    fn unknown_ids_and_dangling_categories_are_noops() {
        let (mut store, _) = store();
        assert!(
            store
                .apply_task_mutation(TaskMutation::Delete { id: "nope".to_string() })
                .is_none()
        );

        let mut orphan = fields("Orphan");
        orphan.category = CategoryRef::Category("missing".to_string());
        assert!(store.apply_task_mutation(TaskMutation::Create(orphan)).is_none());

        assert!(
            store
                .apply_category_mutation(CategoryMutation::Delete {
                    id: ALL_CATEGORY.to_string()
                })
                .is_none()
        );
        assert!(store.tasks().is_empty());
    }

    #[test]
    fn commit_swaps_id_and_retargets_members() {
        let (mut store, _) = store();
        let category = store
            .apply_category_mutation(CategoryMutation::Create(home()))
            .expect("category");
        let temp_category = category.id.as_str().to_string();

        let mut member = fields("Fix sink");
        member.category = CategoryRef::Category(temp_category.clone());
        let task = store
            .apply_task_mutation(TaskMutation::Create(member))
            .expect("task");

        store.commit_category(
            &temp_category,
            &RemoteRecord {
                id: "c-9".to_string(),
                fields: home(),
            },
        );
        assert_eq!(
            store.task(task.id.as_str()).map(|t| t.fields.category.clone()),
            Some(CategoryRef::Category("c-9".to_string()))
        );
        assert_eq!(store.resolve_remote_id(&temp_category).as_deref(), Some("c-9"));
        assert!(store.category(&temp_category).is_none());
    }

    #[test]
    fn commit_after_local_delete_does_not_resurrect() {
        let (mut store, _) = store();
        let task = store
            .apply_task_mutation(TaskMutation::Create(fields("Ghost")))
            .expect("task");
        let temp = task.id.as_str().to_string();
        store.apply_task_mutation(TaskMutation::Delete { id: temp.clone() });

        let committed = store.commit_task(
            &temp,
            &RemoteRecord {
                id: "srv-1".to_string(),
                fields: fields("Ghost"),
            },
        );
        assert!(committed.is_none());
        assert!(store.tasks().is_empty());
        assert_eq!(store.resolve_remote_id(&temp).as_deref(), Some("srv-1"));
    }

    #[test]
    fn rollback_restores_each_snapshot_shape() {
        let (mut store, _) = store();
        let created = store
            .apply_task_mutation(TaskMutation::Create(fields("Draft")))
            .expect("task");
        let id = created.id.as_str().to_string();

        let before = store.snapshot_task(&id).expect("snapshot");
        store.apply_task_mutation(TaskMutation::Update {
            id: id.clone(),
            patch: TaskPatch {
                title: Some("Final".to_string()),
                is_favorite: Some(true),
                ..TaskPatch::default()
            },
        });
        store.rollback(Rollback::Task(before.clone()));
        assert_eq!(store.task(&id), before.before.as_ref());

        store.apply_task_mutation(TaskMutation::Delete { id: id.clone() });
        store.rollback(Rollback::Task(before.clone()));
        assert_eq!(store.tasks().len(), 1);

        store.rollback(Rollback::Task(Snapshot { id, before: None }));
        assert!(store.tasks().is_empty());
    }

    #[test]
    fn refresh_keeps_entities_with_pending_actions() {
        let (mut store, _) = store();
        store.replace_from_remote(
            vec![
                RemoteRecord {
                    id: "srv-1".to_string(),
                    fields: fields("Remote one"),
                },
                RemoteRecord {
                    id: "srv-2".to_string(),
                    fields: fields("Remote two"),
                },
            ],
            vec![],
        );
        assert_eq!(store.tasks().len(), 2);

        store.apply_task_mutation(TaskMutation::Update {
            id: "srv-1".to_string(),
            patch: TaskPatch {
                title: Some("Edited locally".to_string()),
                ..TaskPatch::default()
            },
        });
        store.begin_pending("srv-1");
        store.apply_task_mutation(TaskMutation::Delete { id: "srv-2".to_string() });
        store.begin_pending("srv-2");
        let fresh = store
            .apply_task_mutation(TaskMutation::Create(fields("Brand new")))
            .expect("task");
        store.begin_pending(fresh.id.as_str());

        store.replace_from_remote(
            vec![
                RemoteRecord {
                    id: "srv-1".to_string(),
                    fields: fields("Remote one"),
                },
                RemoteRecord {
                    id: "srv-2".to_string(),
                    fields: fields("Remote two"),
                },
                RemoteRecord {
                    id: "srv-3".to_string(),
                    fields: fields("Remote three"),
                },
            ],
            vec![],
        );

        let titles: Vec<&str> = store.tasks().iter().map(Task::title).collect();
        assert_eq!(titles, vec!["Edited locally", "Remote three", "Brand new"]);
    }

    #[test]
    fn hydrates_from_cache_and_survives_corruption() {
        let cache = Arc::new(MemoryCache::new());
        {
            let mut store = LocalStore::open(cache.clone());
            store.apply_task_mutation(TaskMutation::Create(fields("Persisted")));
        }
        let reopened = LocalStore::open(cache.clone());
        assert_eq!(reopened.tasks().len(), 1);

        cache
            .write_collection(TASKS_COLLECTION, &serde_json::json!({"not": "a list"}))
            .expect("write");
        assert!(LocalStore::open(cache).tasks().is_empty());
    }

    #[test]
    fn clear_empties_store_and_cache() {
        let (mut store, cache) = store();
        store.apply_task_mutation(TaskMutation::Create(fields("Bye")));
        store.clear();
        assert!(store.tasks().is_empty());
        assert!(!cache.contains(TASKS_COLLECTION));
    }
}
