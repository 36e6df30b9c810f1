use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use taskdeck_core::cache::{CATEGORIES_COLLECTION, DurableCache, MemoryCache, TASKS_COLLECTION};
use taskdeck_core::category::{CategoryColor, CategoryFields, CategoryPatch};
use taskdeck_core::id::is_temp_id;
use taskdeck_core::queue::{RetryPolicy, SyncOutcome};
use taskdeck_core::remote::memory::{MemoryRemote, RemoteCall};
use taskdeck_core::session::{Session, SyncSettings};
use taskdeck_core::task::{CategoryRef, Priority, Task, TaskFields, TaskPatch};

fn due() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 10).expect("valid date")
}

fn fields(title: &str) -> TaskFields {
    TaskFields::new(title, due())
}

fn home() -> CategoryFields {
    CategoryFields {
        name: "Home".to_string(),
        color: CategoryColor::Green,
    }
}

fn settings() -> SyncSettings {
    SyncSettings {
        refresh_interval: None,
        ..SyncSettings::default()
    }
}

async fn start(remote: &Arc<MemoryRemote>) -> (Session, Arc<MemoryCache>) {
    start_with(remote, settings()).await
}

async fn start_with(remote: &Arc<MemoryRemote>, settings: SyncSettings) -> (Session, Arc<MemoryCache>) {
    let cache = Arc::new(MemoryCache::new());
    let session = Session::start(remote.clone(), cache.clone(), settings);
    session.wait_idle().await;
    (session, cache)
}

fn titles(session: &Session) -> Vec<String> {
    let mut titles: Vec<String> = session
        .store()
        .lock()
        .tasks()
        .iter()
        .map(|task| task.title().to_string())
        .collect();
    titles.sort();
    titles
}

fn local_task(session: &Session, id: &str) -> Option<Task> {
    session.store().lock().task(id).cloned()
}

fn assert_counts_consistent(session: &Session) {
    let store = session.store().lock();
    let categories = store.categories();
    assert_eq!(categories[0].count, store.tasks().len(), "all counts every task");
    for category in &categories[1..] {
        let members = store
            .tasks()
            .iter()
            .filter(|task| task.fields.category.id() == Some(category.id.as_str()))
            .count();
        assert_eq!(category.count, members, "count of {}", category.name());
    }
}

#[tokio::test(start_paused = true)]
async fn rapid_operations_issue_one_call_each_in_order() {
    let remote = Arc::new(MemoryRemote::with_latency(Duration::from_millis(200)));
    let (session, _) = start(&remote).await;

    let a = session.create_task(fields("a")).expect("create a");
    let b = session.create_task(fields("b")).expect("create b");
    session
        .update_task(
            a.id.as_str(),
            TaskPatch {
                title: Some("a2".to_string()),
                ..TaskPatch::default()
            },
        )
        .expect("update a");
    session.delete_task(b.id.as_str()).expect("delete b");
    session.toggle_task_completed(a.id.as_str()).expect("toggle a");

    assert!(remote.write_calls().is_empty(), "nothing sent synchronously");
    assert_eq!(titles(&session), vec!["a2"]);

    session.wait_idle().await;

    let calls = remote.write_calls();
    assert_eq!(calls.len(), 5);
    assert_eq!(calls[0], RemoteCall::CreateTask(fields("a")));
    assert_eq!(calls[1], RemoteCall::CreateTask(fields("b")));
    assert!(matches!(&calls[2], RemoteCall::UpdateTask { id, patch } if id == "srv-1" && patch.title.as_deref() == Some("a2")));
    assert_eq!(
        calls[3],
        RemoteCall::DeleteTask {
            id: "srv-2".to_string()
        }
    );
    assert!(matches!(&calls[4], RemoteCall::UpdateTask { id, patch } if id == "srv-1" && patch.is_completed == Some(true)));
}

#[tokio::test(start_paused = true)]
async fn created_task_round_trips_from_temp_to_server_id() {
    let remote = Arc::new(MemoryRemote::with_latency(Duration::from_millis(50)));
    let (session, _) = start(&remote).await;

    let mut submitted = fields("Write report");
    submitted.priority = Priority::High;
    submitted.location = Some("Office".to_string());
    submitted.reminder = Some(15);

    let created = session.create_task(submitted.clone()).expect("create");
    let temp_id = created.id.as_str().to_string();
    assert!(!temp_id.is_empty());
    assert!(is_temp_id(&temp_id));
    assert_eq!(local_task(&session, &temp_id).map(|t| t.fields), Some(submitted.clone()));

    session.wait_idle().await;

    assert!(local_task(&session, &temp_id).is_none());
    let committed = local_task(&session, "srv-1").expect("committed task");
    assert_eq!(committed.fields, submitted);
    assert_eq!(remote.tasks()[0].fields, submitted);
}

#[tokio::test(start_paused = true)]
async fn failed_create_removes_temp_task_and_raises_error() {
    let remote = Arc::new(MemoryRemote::new());
    let (session, _) = start(&remote).await;
    let home_id = session.create_category(home()).expect("category").id;
    session.wait_idle().await;
    let home_id = session
        .store()
        .lock()
        .resolve_remote_id(home_id.as_str())
        .expect("home committed");

    remote.set_offline(true);
    let mut milk = fields("Buy milk");
    milk.category = CategoryRef::Category(home_id.clone());
    milk.priority = Priority::Low;
    session.create_task(milk).expect("optimistic create");

    assert_eq!(session.store().lock().tasks().len(), 1);
    assert_eq!(
        session.store().lock().category(&home_id).map(|c| c.count),
        Some(1)
    );

    let mut waited = Duration::ZERO;
    while !session.notices().has_active_error() {
        assert!(waited < Duration::from_secs(3), "no error notice within 3s");
        tokio::time::sleep(Duration::from_millis(100)).await;
        waited += Duration::from_millis(100);
    }

    assert!(session.store().lock().tasks().is_empty());
    assert_eq!(
        session.store().lock().category(&home_id).map(|c| c.count),
        Some(0)
    );
    assert_counts_consistent(&session);
}

#[tokio::test(start_paused = true)]
async fn failed_delete_reinserts_the_snapshot() {
    let remote = Arc::new(MemoryRemote::new());
    let mut seeded = fields("Keep me");
    seeded.is_favorite = true;
    let id = remote.insert_task(seeded);
    let (session, _) = start(&remote).await;
    let before = local_task(&session, &id).expect("refreshed task");

    remote.set_offline(true);
    session.delete_task(&id).expect("optimistic delete");
    assert!(local_task(&session, &id).is_none());

    session.wait_idle().await;
    assert_eq!(local_task(&session, &id), Some(before));
    assert!(session.notices().has_active_error());
}

#[tokio::test(start_paused = true)]
async fn failed_update_restores_previous_fields() {
    let remote = Arc::new(MemoryRemote::new());
    let id = remote.insert_task(fields("Original"));
    let (session, _) = start(&remote).await;
    let before = local_task(&session, &id).expect("refreshed task");

    remote.fail_next(3);
    session
        .update_task(
            &id,
            TaskPatch {
                title: Some("Changed".to_string()),
                priority: Some(Priority::High),
                due_time: Some(chrono::NaiveTime::from_hms_opt(8, 30, 0)),
                ..TaskPatch::default()
            },
        )
        .expect("optimistic update");
    assert_eq!(local_task(&session, &id).map(|t| t.fields.title), Some("Changed".to_string()));

    session.wait_idle().await;
    assert_eq!(local_task(&session, &id), Some(before));
}

#[tokio::test(start_paused = true)]
async fn counts_stay_consistent_through_mutations() {
    let remote = Arc::new(MemoryRemote::new());
    let (session, _) = start(&remote).await;

    let home = session.create_category(home()).expect("home");
    let work = session
        .create_category(CategoryFields {
            name: "Work".to_string(),
            color: CategoryColor::Blue,
        })
        .expect("work");
    assert_counts_consistent(&session);

    let mut chore = fields("Dishes");
    chore.category = CategoryRef::Category(home.id.as_str().to_string());
    let chore = session.create_task(chore).expect("chore");
    assert_counts_consistent(&session);

    let mut memo = fields("Memo");
    memo.category = CategoryRef::Category(work.id.as_str().to_string());
    session.create_task(memo).expect("memo");
    session.create_task(fields("Loose")).expect("loose");
    assert_counts_consistent(&session);

    session
        .update_task(
            chore.id.as_str(),
            TaskPatch {
                category: Some(CategoryRef::Category(work.id.as_str().to_string())),
                ..TaskPatch::default()
            },
        )
        .expect("move chore");
    assert_counts_consistent(&session);

    session.wait_idle().await;
    assert_counts_consistent(&session);

    let work_id = session
        .store()
        .lock()
        .resolve_remote_id(work.id.as_str())
        .expect("work committed");
    session.delete_category(&work_id).expect("delete work");
    assert_counts_consistent(&session);
    assert_eq!(session.store().lock().categories()[0].count, 3);

    session.wait_idle().await;
    assert!(
        remote
            .tasks()
            .iter()
            .all(|task| task.fields.category.id() != Some(work_id.as_str()))
    );
    assert_eq!(
        remote.write_calls().last(),
        Some(&RemoteCall::DeleteCategory { id: work_id })
    );
    assert_counts_consistent(&session);
}

#[tokio::test(start_paused = true)]
async fn two_rapid_toggles_send_two_updates_and_converge() {
    let remote = Arc::new(MemoryRemote::with_latency(Duration::from_millis(300)));
    let id = remote.insert_task(fields("Stretch"));
    let (session, _) = start(&remote).await;

    session.toggle_task_completed(&id).expect("first toggle");
    session.toggle_task_completed(&id).expect("second toggle");
    session.wait_idle().await;

    let toggles: Vec<Option<bool>> = remote
        .write_calls()
        .into_iter()
        .map(|call| match call {
            RemoteCall::UpdateTask { patch, .. } => patch.is_completed,
            other => panic!("unexpected call {other:?}"),
        })
        .collect();
    assert_eq!(toggles, vec![Some(true), Some(false)]);
    assert_eq!(
        remote.tasks()[0].fields,
        local_task(&session, &id).expect("task").fields
    );
}

#[tokio::test(start_paused = true)]
async fn task_under_new_category_is_sent_with_server_category_id() {
    let remote = Arc::new(MemoryRemote::with_latency(Duration::from_millis(100)));
    let (session, _) = start(&remote).await;

    let category = session.create_category(home()).expect("category");
    let mut task = fields("Water plants");
    task.category = CategoryRef::Category(category.id.as_str().to_string());
    let task = session.create_task(task).expect("task");

    session.wait_idle().await;

    let calls = remote.write_calls();
    assert_eq!(calls[0], RemoteCall::CreateCategory(home()));
    match &calls[1] {
        RemoteCall::CreateTask(sent) => {
            assert_eq!(sent.category, CategoryRef::Category("srv-1".to_string()))
        }
        other => panic!("unexpected call {other:?}"),
    }

    let store = session.store().lock();
    let local = store.find_task(task.id.as_str()).expect("committed task");
    assert_eq!(local.fields.category, CategoryRef::Category("srv-1".to_string()));
    assert_eq!(store.category("srv-1").map(|c| c.count), Some(1));
}

#[tokio::test(start_paused = true)]
async fn create_then_immediate_delete_never_resurrects() {
    let remote = Arc::new(MemoryRemote::with_latency(Duration::from_millis(100)));
    let (session, _) = start(&remote).await;

    let task = session.create_task(fields("Oops")).expect("create");
    session.delete_task(task.id.as_str()).expect("delete");
    assert!(session.store().lock().tasks().is_empty());

    session.wait_idle().await;

    assert!(session.store().lock().tasks().is_empty());
    assert!(remote.tasks().is_empty());
    assert_eq!(
        remote.write_calls(),
        vec![
            RemoteCall::CreateTask(fields("Oops")),
            RemoteCall::DeleteTask {
                id: "srv-1".to_string()
            },
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn refresh_keeps_in_flight_local_state() {
    let remote = Arc::new(MemoryRemote::with_latency(Duration::from_millis(100)));
    let keep = remote.insert_task(fields("Keep"));
    let doomed = remote.insert_task(fields("Doomed"));
    let (session, _) = start(&remote).await;

    remote.insert_task(fields("From elsewhere"));
    assert!(session.request_refresh());
    assert!(!session.request_refresh(), "one refresh queued at a time");
    session
        .update_task(
            &keep,
            TaskPatch {
                title: Some("Edited".to_string()),
                ..TaskPatch::default()
            },
        )
        .expect("update");
    session.delete_task(&doomed).expect("delete");
    session.create_task(fields("Fresh")).expect("create");

    let mut reports = session.queue().subscribe_reports();
    let first = reports.recv().await.expect("refresh report");
    assert_eq!(first.label, "refresh");
    assert_eq!(titles(&session), vec!["Edited", "Fresh", "From elsewhere"]);

    session.wait_idle().await;
    assert_eq!(titles(&session), vec!["Edited", "Fresh", "From elsewhere"]);

    let mut remote_titles: Vec<String> = remote
        .tasks()
        .into_iter()
        .map(|task| task.fields.title)
        .collect();
    remote_titles.sort();
    assert_eq!(remote_titles, vec!["Edited", "Fresh", "From elsewhere"]);
}

#[tokio::test(start_paused = true)]
async fn failed_refresh_keeps_local_state_quietly() {
    let remote = Arc::new(MemoryRemote::new());
    remote.insert_task(fields("Cached"));
    let (session, _) = start(&remote).await;

    remote.set_offline(true);
    session.refresh_now().await;

    assert_eq!(titles(&session), vec!["Cached"]);
    assert!(session.notices().history().is_empty());
}

#[tokio::test(start_paused = true)]
async fn hung_request_times_out_and_queue_moves_on() {
    let remote = Arc::new(MemoryRemote::new());
    let retry = RetryPolicy {
        attempt_timeout: Duration::from_secs(2),
        ..RetryPolicy::default()
    };
    let (session, _) = start_with(
        &remote,
        SyncSettings {
            retry,
            ..settings()
        },
    )
    .await;
    let mut reports = session.queue().subscribe_reports();

    remote.hang_next(1);
    session.create_task(fields("Patient")).expect("create");
    session.create_task(fields("Next")).expect("create");
    session.wait_idle().await;

    let first = reports.recv().await.expect("report");
    assert_eq!(first.outcome, SyncOutcome::Succeeded { attempts: 2 });
    let second = reports.recv().await.expect("report");
    assert_eq!(second.outcome, SyncOutcome::Succeeded { attempts: 1 });
    assert_eq!(remote.tasks().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn category_update_never_sends_count() {
    let remote = Arc::new(MemoryRemote::new());
    let category_id = remote.insert_category(home());
    let (session, _) = start(&remote).await;

    session
        .update_category(
            &category_id,
            CategoryPatch {
                color: Some(CategoryColor::Purple),
                ..CategoryPatch::default()
            },
        )
        .expect("update");
    assert!(session.update_category("all", CategoryPatch::default()).is_none());
    session.wait_idle().await;

    let calls = remote.write_calls();
    let RemoteCall::UpdateCategory { patch, .. } = &calls[0] else {
        panic!("unexpected call {:?}", calls[0]);
    };
    let payload = serde_json::to_value(patch).expect("serialize");
    assert_eq!(payload, serde_json::json!({"color": "purple"}));
    assert_eq!(remote.categories()[0].fields.color, CategoryColor::Purple);
}

#[tokio::test(start_paused = true)]
async fn category_counts_are_persisted_after_debounce() {
    let remote = Arc::new(MemoryRemote::new());
    let (session, cache) = start(&remote).await;
    session.create_category(home()).expect("category");
    session.wait_idle().await;

    let mut task = fields("Sweep");
    task.category = CategoryRef::Category("srv-1".to_string());
    session.create_task(task).expect("task");

    let cached_count = |cache: &MemoryCache| {
        cache
            .read_collection(CATEGORIES_COLLECTION)
            .expect("read")
            .and_then(|value| value[0]["count"].as_u64())
    };
    assert_eq!(cached_count(&cache), Some(0));

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(cached_count(&cache), Some(1));
}

#[tokio::test(start_paused = true)]
async fn sign_out_clears_store_and_cache() {
    let remote = Arc::new(MemoryRemote::new());
    remote.insert_task(fields("Private"));
    let (session, cache) = start(&remote).await;
    assert!(cache.contains(TASKS_COLLECTION));

    let store = session.store().clone();
    session.sign_out();

    assert!(store.lock().tasks().is_empty());
    assert!(!cache.contains(TASKS_COLLECTION));
    assert!(!cache.contains(CATEGORIES_COLLECTION));
}

fn homed(title: &str, category_id: &str) -> TaskFields {
    let mut task = fields(title);
    task.category = CategoryRef::Category(category_id.to_string());
    task
}

#[tokio::test(start_paused = true)]
async fn failed_category_delete_restores_category_and_members() {
    let remote = Arc::new(MemoryRemote::new());
    let category_id = remote.insert_category(home());
    let task_id = remote.insert_task(homed("Sweep", &category_id));
    let (session, _) = start(&remote).await;
    let before_task = local_task(&session, &task_id).expect("task");
    let before_category = session.store().lock().category(&category_id).expect("category");
    assert_eq!(before_category.count, 1);

    remote.set_offline(true);
    session.delete_category(&category_id).expect("optimistic delete");
    assert_eq!(
        local_task(&session, &task_id).map(|t| t.fields.category),
        Some(CategoryRef::All)
    );

    session.wait_idle().await;

    assert_eq!(local_task(&session, &task_id), Some(before_task));
    assert_eq!(
        session.store().lock().category(&category_id),
        Some(before_category)
    );
    assert_counts_consistent(&session);
    assert!(
        !remote
            .write_calls()
            .iter()
            .any(|call| matches!(call, RemoteCall::DeleteCategory { .. })),
        "delete is never sent while members still belong to the category"
    );
    assert!(session.notices().has_active_error());
}

#[tokio::test(start_paused = true)]
async fn category_delete_failing_after_members_moved_keeps_them_in_all() {
    let remote = Arc::new(MemoryRemote::with_latency(Duration::from_millis(100)));
    let category_id = remote.insert_category(home());
    let task_id = remote.insert_task(homed("Sweep", &category_id));
    let (session, _) = start(&remote).await;

    session.delete_category(&category_id).expect("optimistic delete");
    // The member update is already in flight; only the category delete goes offline.
    tokio::time::sleep(Duration::from_millis(50)).await;
    remote.set_offline(true);
    session.wait_idle().await;

    assert_eq!(remote.tasks()[0].fields.category, CategoryRef::All);
    assert_eq!(
        local_task(&session, &task_id).map(|t| t.fields.category),
        Some(CategoryRef::All)
    );
    assert_eq!(
        session.store().lock().category(&category_id).map(|c| c.count),
        Some(0)
    );
    assert_counts_consistent(&session);
}

#[tokio::test(start_paused = true)]
async fn failed_category_create_moves_members_to_all() {
    let remote = Arc::new(MemoryRemote::new());
    let (session, _) = start(&remote).await;

    remote.fail_next(3);
    let category = session.create_category(home()).expect("optimistic create");
    let task = session
        .create_task(homed("Water plants", category.id.as_str()))
        .expect("task");
    assert_eq!(
        session.store().lock().category(category.id.as_str()).map(|c| c.count),
        Some(1)
    );

    session.wait_idle().await;

    let store = session.store().lock();
    assert!(store.user_categories().is_empty());
    let local = store.find_task(task.id.as_str()).expect("task committed");
    assert_eq!(local.fields.category, CategoryRef::All);
    assert_eq!(remote.tasks()[0].fields.category, CategoryRef::All);
    assert!(remote.categories().is_empty());
    drop(store);
    assert_counts_consistent(&session);
}

#[tokio::test(start_paused = true)]
async fn failed_category_update_restores_name_and_color() {
    let remote = Arc::new(MemoryRemote::new());
    let category_id = remote.insert_category(home());
    let (session, _) = start(&remote).await;
    let before = session.store().lock().category(&category_id).expect("category");

    remote.fail_next(3);
    session
        .update_category(
            &category_id,
            CategoryPatch {
                name: Some("House".to_string()),
                color: Some(CategoryColor::Red),
            },
        )
        .expect("optimistic update");
    assert_eq!(
        session.store().lock().category(&category_id).map(|c| c.fields.name),
        Some("House".to_string())
    );

    session.wait_idle().await;
    assert_eq!(session.store().lock().category(&category_id), Some(before));
    assert_eq!(remote.categories()[0].fields, home());
}

#[tokio::test(start_paused = true)]
async fn periodic_refresh_pulls_remote_changes() {
    let remote = Arc::new(MemoryRemote::new());
    let (session, _) = start_with(&remote, SyncSettings::default()).await;
    let list_calls = || {
        remote
            .calls()
            .into_iter()
            .filter(|call| matches!(call, RemoteCall::ListTasks))
            .count()
    };
    assert_eq!(list_calls(), 1);

    remote.insert_task(fields("From elsewhere"));
    tokio::time::sleep(Duration::from_secs(29)).await;
    assert!(titles(&session).is_empty());

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(titles(&session), vec!["From elsewhere"]);
    assert_eq!(list_calls(), 2);

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(list_calls(), 4, "one refresh per tick");

    assert!(session.request_refresh());
    assert!(!session.request_refresh(), "one refresh queued at a time");
    session.wait_idle().await;
    assert_eq!(list_calls(), 5);
}
