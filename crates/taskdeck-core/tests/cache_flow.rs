use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use taskdeck_core::cache::{DurableCache, FileCache, TASKS_COLLECTION};
use taskdeck_core::category::{CategoryColor, CategoryFields};
use taskdeck_core::id::is_temp_id;
use taskdeck_core::remote::memory::MemoryRemote;
use taskdeck_core::session::{Session, SyncSettings};
use taskdeck_core::store::LocalStore;
use taskdeck_core::task::{CategoryRef, TaskFields};
use tempfile::tempdir;

fn fields(title: &str) -> TaskFields {
    TaskFields::new(title, NaiveDate::from_ymd_opt(2024, 1, 10).expect("valid date"))
}

fn settings() -> SyncSettings {
    SyncSettings {
        refresh_interval: None,
        ..SyncSettings::default()
    }
}

fn open_cache(path: &std::path::Path) -> Arc<FileCache> {
    Arc::new(FileCache::open(path).expect("open cache"))
}

#[tokio::test(start_paused = true)]
async fn committed_state_survives_restart() {
    let temp = tempdir().expect("tempdir");
    let remote = Arc::new(MemoryRemote::new());

    let session = Session::start(remote.clone(), open_cache(temp.path()), settings());
    session.wait_idle().await;
    let category = session
        .create_category(CategoryFields {
            name: "Errands".to_string(),
            color: CategoryColor::Orange,
        })
        .expect("category");
    let mut task = fields("Post letter");
    task.category = CategoryRef::Category(category.id.as_str().to_string());
    session.create_task(task).expect("task");
    session.wait_idle().await;
    session.close();

    let store = LocalStore::open(open_cache(temp.path()));
    assert_eq!(store.tasks().len(), 1);
    let reloaded = &store.tasks()[0];
    assert_eq!(reloaded.id.as_str(), "srv-2");
    assert_eq!(
        reloaded.fields.category,
        CategoryRef::Category("srv-1".to_string())
    );
    assert_eq!(store.category("srv-1").map(|c| c.count), Some(1));
    assert_eq!(store.categories()[0].count, 1);
}

#[tokio::test(start_paused = true)]
async fn optimistic_state_is_cached_before_sync() {
    let temp = tempdir().expect("tempdir");
    let remote = Arc::new(MemoryRemote::with_latency(Duration::from_secs(30)));
    let cache = open_cache(temp.path());

    let session = Session::start(remote.clone(), cache.clone(), settings());
    let created = session.create_task(fields("Unsent")).expect("create");
    session.close();

    let raw = cache
        .read_collection(TASKS_COLLECTION)
        .expect("read")
        .expect("tasks cached");
    assert_eq!(raw[0]["title"], "Unsent");

    let store = LocalStore::open(open_cache(temp.path()));
    let reloaded = store.task(created.id.as_str()).expect("reloaded task");
    assert!(is_temp_id(reloaded.id.as_str()));
    assert_eq!(reloaded.fields, fields("Unsent"));
}

#[tokio::test(start_paused = true)]
async fn orphaned_temp_tasks_are_dropped_by_next_refresh() {
    let temp = tempdir().expect("tempdir");
    let slow = Arc::new(MemoryRemote::with_latency(Duration::from_secs(30)));
    let session = Session::start(slow, open_cache(temp.path()), settings());
    session.create_task(fields("Never sent")).expect("create");
    session.close();

    let remote = Arc::new(MemoryRemote::new());
    remote.insert_task(fields("On the server"));
    let session = Session::start(remote.clone(), open_cache(temp.path()), settings());
    assert_eq!(session.store().lock().tasks().len(), 1, "hydrated from cache");
    session.wait_idle().await;

    let store = session.store().lock();
    let titles: Vec<&str> = store.tasks().iter().map(|task| task.title()).collect();
    assert_eq!(titles, vec!["On the server"]);
}

#[test]
fn corrupt_cache_file_starts_empty() {
    let temp = tempdir().expect("tempdir");
    let cache = open_cache(temp.path());
    std::fs::write(cache.collection_path(TASKS_COLLECTION), "{not json").expect("write garbage");

    let store = LocalStore::open(cache);
    assert!(store.tasks().is_empty());
    assert_eq!(store.categories().len(), 1);
}
