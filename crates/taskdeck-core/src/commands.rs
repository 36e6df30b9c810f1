use anyhow::{Context, anyhow, bail};
use chrono::{Duration, Local, NaiveDate};
use tracing::{debug, info, instrument};

use crate::category::{ALL_CATEGORY, CategoryFields, CategoryPatch};
use crate::cli::{AddArgs, CategoryCommand, Command, EditArgs, ListArgs, TaskOptions};
use crate::datetime::{parse_clock_time, parse_due_date};
use crate::render::Renderer;
use crate::session::Session;
use crate::store::LocalStore;
use crate::task::{CategoryRef, NewTask, TaskPatch};
use crate::views::{self, Stats, TaskQuery, ViewMode, ViewSettings};

/// Runs one command. Returns the session unless the command ended it.
#[instrument(skip(session, renderer, views_cfg, command))]
pub async fn dispatch(
    session: Session,
    renderer: &mut Renderer,
    views_cfg: &ViewSettings,
    command: Command,
) -> anyhow::Result<Option<Session>> {
    let today = Local::now().date_naive();
    debug!(?command, %today, "dispatching command");

    match command {
        Command::List(args) => {
            settle_initial_refresh(&session).await;
            cmd_list(&session, renderer, views_cfg, args, today)?;
        }
        Command::Add(args) => cmd_add(&session, renderer, args, today)?,
        Command::Edit(args) => cmd_edit(&session, args, today)?,
        Command::Done { id } => {
            let id = resolve_task_id(&session.store().lock(), &id)?;
            session
                .toggle_task_completed(&id)
                .ok_or_else(|| anyhow!("task {id} was not changed"))?;
        }
        Command::Star { id } => {
            let id = resolve_task_id(&session.store().lock(), &id)?;
            session
                .toggle_task_favorite(&id)
                .ok_or_else(|| anyhow!("task {id} was not changed"))?;
        }
        Command::Rm { id } => {
            let id = resolve_task_id(&session.store().lock(), &id)?;
            session
                .delete_task(&id)
                .ok_or_else(|| anyhow!("task {id} was not deleted"))?;
        }
        Command::Info { id } => {
            settle_initial_refresh(&session).await;
            let store = session.store().lock();
            let id = resolve_task_id(&store, &id)?;
            let task = store
                .find_task(&id)
                .cloned()
                .ok_or_else(|| anyhow!("no task {id}"))?;
            let categories = store.categories();
            drop(store);
            renderer.print_task_info(&task, &categories)?;
        }
        Command::Category(sub) => cmd_category(&session, renderer, sub).await?,
        Command::Stats => {
            settle_initial_refresh(&session).await;
            let (tasks, categories) = {
                let store = session.store().lock();
                (store.tasks().to_vec(), store.categories())
            };
            let stats = Stats::compute(&tasks, &categories, today, views_cfg.week_start);
            renderer.print_stats(&stats)?;
        }
        Command::Reminders { hours } => {
            settle_initial_refresh(&session).await;
            let tasks = session.store().lock().tasks().to_vec();
            let reminders = views::due_reminders(
                &tasks,
                Local::now().naive_local(),
                Duration::hours(i64::from(hours)),
            );
            renderer.print_reminders(&reminders)?;
        }
        Command::Sync => {
            info!("manual sync requested");
            session.request_refresh();
            if !session.wait_idle_for(session.settings().exit_wait).await {
                bail!("sync did not finish within {:?}", session.settings().exit_wait);
            }
            renderer.print_queue_state(session.queue_state())?;
        }
        Command::Logout => {
            session.sign_out();
            println!("Signed out; local data removed.");
            return Ok(None);
        }
    }

    Ok(Some(session))
}

/// Gives the refresh queued at session start a chance to land before reading.
async fn settle_initial_refresh(session: &Session) {
    let limit = session.settings().retry.attempt_timeout;
    if !session.wait_idle_for(limit).await {
        debug!(?limit, "showing cached data; refresh still pending");
    }
}

#[instrument(skip(session, renderer, views_cfg, args))]
fn cmd_list(
    session: &Session,
    renderer: &mut Renderer,
    views_cfg: &ViewSettings,
    args: ListArgs,
    today: NaiveDate,
) -> anyhow::Result<()> {
    let focus = match args.date.as_deref() {
        Some(expr) => parse_due_date(expr, today).context("invalid --date")?,
        None => today,
    };
    let mode = args.view.unwrap_or(ViewMode::List);

    let store = session.store().lock();
    let category = args
        .category
        .as_deref()
        .map(|raw| resolve_category_ref(&store, raw))
        .transpose()?;
    let query = TaskQuery {
        category: category.map(|c| c.as_str().to_string()),
        search: args.search,
        favorites_only: args.favorites,
        completed: if args.completed {
            Some(true)
        } else if args.open {
            Some(false)
        } else {
            None
        },
        window: views::date_window(mode, focus, views_cfg),
    };
    let tasks = query.apply(store.tasks());
    let categories = store.categories();
    drop(store);

    match (mode, query.window) {
        (ViewMode::List, _) | (_, None) => renderer.print_task_table(&tasks, &categories, today),
        (_, Some(window)) => {
            let days = views::agenda(&tasks, &window);
            renderer.print_agenda(&days, &categories, today)
        }
    }
}

#[instrument(skip(session, renderer, args))]
fn cmd_add(
    session: &Session,
    renderer: &mut Renderer,
    args: AddArgs,
    today: NaiveDate,
) -> anyhow::Result<()> {
    let title = args.title.join(" ").trim().to_string();
    if title.is_empty() {
        bail!("a task needs a title");
    }

    let opts = args.options;
    let due_date = match opts.due.as_deref() {
        Some(expr) => parse_due_date(expr, today).context("invalid --due")?,
        None => today,
    };
    let mut task = NewTask::new(title, due_date);
    task.due_time = opts
        .at
        .as_deref()
        .map(parse_clock_time)
        .transpose()
        .context("invalid --at")?;
    if let Some(raw) = opts.category.as_deref() {
        task.category = resolve_category_ref(&session.store().lock(), raw)?;
    }
    task.priority = opts.priority.unwrap_or_default();
    task.location = opts.location.filter(|loc| !loc.trim().is_empty());
    task.reminder = opts.remind.filter(|minutes| *minutes > 0);
    task.repeat = opts.repeat.unwrap_or_default();
    task.description = opts.description.unwrap_or_default();

    let created = session
        .create_task(task)
        .ok_or_else(|| anyhow!("task was not created"))?;
    let categories = session.store().lock().categories();
    renderer.print_task_table(std::slice::from_ref(&created), &categories, today)?;
    Ok(())
}

#[instrument(skip(session, args))]
fn cmd_edit(session: &Session, args: EditArgs, today: NaiveDate) -> anyhow::Result<()> {
    let id = resolve_task_id(&session.store().lock(), &args.id)?;
    let mut patch = task_patch(session, &args.options, today)?;

    if let Some(title) = args.title {
        let title = title.trim().to_string();
        if title.is_empty() {
            bail!("a task needs a title");
        }
        patch.title = Some(title);
    }
    if args.clear_time {
        patch.due_time = Some(None);
    }
    if args.clear_location {
        patch.location = Some(None);
    }
    if args.clear_reminder {
        patch.reminder = Some(None);
    }
    if patch.is_empty() {
        bail!("nothing to change; pass at least one field option");
    }

    session
        .update_task(&id, patch)
        .ok_or_else(|| anyhow!("task {id} was not changed"))?;
    Ok(())
}

fn task_patch(session: &Session, opts: &TaskOptions, today: NaiveDate) -> anyhow::Result<TaskPatch> {
    let mut patch = TaskPatch::default();
    if let Some(expr) = opts.due.as_deref() {
        patch.due_date = Some(parse_due_date(expr, today).context("invalid --due")?);
    }
    if let Some(expr) = opts.at.as_deref() {
        patch.due_time = Some(Some(parse_clock_time(expr).context("invalid --at")?));
    }
    if let Some(raw) = opts.category.as_deref() {
        patch.category = Some(resolve_category_ref(&session.store().lock(), raw)?);
    }
    patch.priority = opts.priority;
    if let Some(location) = &opts.location {
        patch.location = Some(Some(location.clone()).filter(|loc| !loc.trim().is_empty()));
    }
    if let Some(minutes) = opts.remind {
        patch.reminder = Some((minutes > 0).then_some(minutes));
    }
    patch.repeat = opts.repeat;
    patch.description = opts.description.clone();
    Ok(patch)
}

#[instrument(skip(session, renderer, command))]
async fn cmd_category(
    session: &Session,
    renderer: &mut Renderer,
    command: CategoryCommand,
) -> anyhow::Result<()> {
    match command {
        CategoryCommand::List => {
            settle_initial_refresh(session).await;
            let categories = session.store().lock().categories();
            renderer.print_categories(&categories)?;
        }
        CategoryCommand::Add { name, color } => {
            let name = name.join(" ").trim().to_string();
            let created = session
                .create_category(CategoryFields {
                    name,
                    color: color.unwrap_or_default(),
                })
                .ok_or_else(|| anyhow!("category was not created; a name is required"))?;
            renderer.print_categories(std::slice::from_ref(&created))?;
        }
        CategoryCommand::Edit { id, name, color } => {
            let id = resolve_category_id(&session.store().lock(), &id)?;
            let patch = CategoryPatch {
                name: name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty()),
                color,
            };
            if patch.is_empty() {
                bail!("nothing to change; pass --name or --color");
            }
            session
                .update_category(&id, patch)
                .ok_or_else(|| anyhow!("category {id} was not changed"))?;
        }
        CategoryCommand::Rm { id } => {
            let id = resolve_category_id(&session.store().lock(), &id)?;
            session
                .delete_category(&id)
                .ok_or_else(|| anyhow!("category {id} was not deleted"))?;
        }
    }
    Ok(())
}

/// Exact id, then a unique id prefix.
pub fn resolve_task_id(store: &LocalStore, raw: &str) -> anyhow::Result<String> {
    let raw = raw.trim();
    if let Some(task) = store.find_task(raw) {
        return Ok(task.id.as_str().to_string());
    }

    let matches: Vec<&str> = store
        .tasks()
        .iter()
        .map(|task| task.id.as_str())
        .filter(|id| id.starts_with(raw))
        .collect();
    unique(matches, raw, "task")
}

/// Exact id, unique id prefix, then case-insensitive name. `all` is the sentinel.
pub fn resolve_category_id(store: &LocalStore, raw: &str) -> anyhow::Result<String> {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case(ALL_CATEGORY) {
        return Ok(ALL_CATEGORY.to_string());
    }
    let current = store.current_id(raw);
    if store.category(current).is_some() {
        return Ok(current.to_string());
    }

    let categories = store.user_categories();
    let by_prefix: Vec<&str> = categories
        .iter()
        .map(|category| category.id.as_str())
        .filter(|id| id.starts_with(raw))
        .collect();
    if !by_prefix.is_empty() {
        return unique(by_prefix, raw, "category");
    }

    let by_name: Vec<&str> = categories
        .iter()
        .filter(|category| category.name().eq_ignore_ascii_case(raw))
        .map(|category| category.id.as_str())
        .collect();
    unique(by_name, raw, "category")
}

fn resolve_category_ref(store: &LocalStore, raw: &str) -> anyhow::Result<CategoryRef> {
    let id = resolve_category_id(store, raw)?;
    Ok(CategoryRef::from(id))
}

fn unique(matches: Vec<&str>, raw: &str, kind: &str) -> anyhow::Result<String> {
    match matches.as_slice() {
        [only] => Ok((*only).to_string()),
        [] => Err(anyhow!("no {kind} matches {raw:?}")),
        many => Err(anyhow!(
            "{kind} {raw:?} is ambiguous ({} matches)",
            many.len()
        )),
    }
}
