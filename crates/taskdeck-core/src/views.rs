use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use chrono::{
  Datelike,
  Duration,
  NaiveDate,
  NaiveDateTime,
  NaiveTime,
  Weekday
};
use tracing::trace;

use crate::category::Category;
use crate::config::Config;
use crate::datetime::{
  add_days,
  first_day_of_month,
  last_day_of_month,
  parse_week_start,
  shift_months,
  start_of_week
};
use crate::task::{
  CategoryRef,
  Priority,
  Repeat,
  Task
};

/// Time of day assumed for reminders on
/// tasks without a due time.
pub const DEFAULT_REMINDER_TIME: (u32, u32) =
  (9, 0);

#[derive(
  Debug, Clone, Copy, PartialEq, Eq,
)]
pub enum ViewMode {
  List,
  Month,
  Week,
  Day,
  Agenda
}

impl FromStr for ViewMode {
  type Err = anyhow::Error;

  fn from_str(
    s: &str
  ) -> Result<Self, Self::Err> {
    match s
      .trim()
      .to_ascii_lowercase()
      .as_str()
    {
      | "list" => Ok(Self::List),
      | "month" => Ok(Self::Month),
      | "week" => Ok(Self::Week),
      | "day" => Ok(Self::Day),
      | "agenda" => Ok(Self::Agenda),
      | other => Err(anyhow!(
        "unknown view: {other}"
      ))
    }
  }
}

impl fmt::Display for ViewMode {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>
  ) -> fmt::Result {
    let name = match self {
      | Self::List => "list",
      | Self::Month => "month",
      | Self::Week => "week",
      | Self::Day => "day",
      | Self::Agenda => "agenda"
    };
    f.write_str(name)
  }
}

/// Inclusive range of calendar days.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq,
)]
pub struct DateWindow {
  pub start: NaiveDate,
  pub end:   NaiveDate
}

impl DateWindow {
  pub fn contains(
    &self,
    date: NaiveDate
  ) -> bool {
    self.start <= date
      && date <= self.end
  }

  pub fn days(
    &self
  ) -> impl Iterator<Item = NaiveDate>
  {
    let end = self.end;
    self
      .start
      .iter_days()
      .take_while(move |d| *d <= end)
  }
}

#[derive(
  Debug, Clone, Copy, PartialEq, Eq,
)]
pub struct ViewSettings {
  pub week_start:  Weekday,
  pub agenda_days: u32
}

impl Default for ViewSettings {
  fn default() -> Self {
    Self {
      week_start:  Weekday::Mon,
      agenda_days: 14
    }
  }
}

impl ViewSettings {
  pub fn from_config(
    cfg: &Config
  ) -> anyhow::Result<Self> {
    let week_start = cfg
      .get("calendar.week_start")
      .map(|raw| parse_week_start(&raw))
      .unwrap_or(Weekday::Mon);
    let agenda_days = cfg
      .get_u64("calendar.agenda_days")?
      .map(|n| n.clamp(1, 366) as u32)
      .unwrap_or(14);

    Ok(Self {
      week_start,
      agenda_days
    })
  }
}

/// The days a calendar view shows around
/// `focus`. The list view is unbounded.
pub fn date_window(
  mode: ViewMode,
  focus: NaiveDate,
  settings: &ViewSettings
) -> Option<DateWindow> {
  let window = match mode {
    | ViewMode::List => return None,
    | ViewMode::Month => DateWindow {
      start: first_day_of_month(
        focus.year(),
        focus.month()
      ),
      end:   last_day_of_month(
        focus.year(),
        focus.month()
      )
    },
    | ViewMode::Week => {
      let start = start_of_week(
        focus,
        settings.week_start
      );
      DateWindow {
        start,
        end: add_days(start, 6)
      }
    }
    | ViewMode::Day => DateWindow {
      start: focus,
      end:   focus
    },
    | ViewMode::Agenda => DateWindow {
      start: focus,
      end:   add_days(
        focus,
        i64::from(
          settings.agenda_days.max(1)
        ) - 1
      )
    }
  };
  Some(window)
}

#[derive(Debug, Clone, Default)]
pub struct TaskQuery {
  /// Category id; `None` or `all`
  /// matches every task.
  pub category:       Option<String>,
  pub search:         Option<String>,
  pub favorites_only: bool,
  pub completed:      Option<bool>,
  pub window:         Option<DateWindow>
}

impl TaskQuery {
  pub fn matches(
    &self,
    task: &Task
  ) -> bool {
    let fields = &task.fields;

    if let Some(category) =
      self.category.as_deref()
      && category != CategoryRef::All.as_str()
      && fields.category.id()
        != Some(category)
    {
      return false;
    }

    if self.favorites_only
      && !fields.is_favorite
    {
      return false;
    }

    if let Some(completed) = self.completed
      && fields.is_completed != completed
    {
      return false;
    }

    if let Some(needle) =
      self.search.as_deref()
    {
      let needle =
        needle.trim().to_lowercase();
      let hit = needle.is_empty()
        || fields
          .title
          .to_lowercase()
          .contains(&needle)
        || fields
          .description
          .to_lowercase()
          .contains(&needle)
        || fields
          .location
          .as_deref()
          .is_some_and(|loc| {
            loc
              .to_lowercase()
              .contains(&needle)
          });
      if !hit {
        return false;
      }
    }

    match self.window {
      | Some(window) => {
        !occurrences(task, &window)
          .is_empty()
      }
      | None => true
    }
  }

  /// Matching tasks in presentation order.
  #[tracing::instrument(skip_all)]
  pub fn apply(
    &self,
    tasks: &[Task]
  ) -> Vec<Task> {
    let mut out: Vec<Task> = tasks
      .iter()
      .filter(|task| self.matches(task))
      .cloned()
      .collect();
    sort_tasks(&mut out);
    trace!(
      matched = out.len(),
      total = tasks.len(),
      "applied task query"
    );
    out
  }
}

/// Due date, then due time (untimed
/// first), then priority (high first),
/// then title.
pub fn compare_tasks(
  a: &Task,
  b: &Task
) -> Ordering {
  a.fields
    .due_date
    .cmp(&b.fields.due_date)
    .then_with(|| {
      a.fields
        .due_time
        .cmp(&b.fields.due_time)
    })
    .then_with(|| {
      a.fields
        .priority
        .rank()
        .cmp(&b.fields.priority.rank())
    })
    .then_with(|| {
      a.fields
        .title
        .to_lowercase()
        .cmp(
          &b.fields.title.to_lowercase()
        )
    })
}

pub fn sort_tasks(tasks: &mut [Task]) {
  tasks.sort_by(compare_tasks);
}

/// Dates inside `window` on which `task`
/// falls, expanding its repeat rule.
/// Monthly repeats clamp to the last day
/// of shorter months.
pub fn occurrences(
  task: &Task,
  window: &DateWindow
) -> Vec<NaiveDate> {
  let due = task.fields.due_date;
  if due > window.end {
    return vec![];
  }

  match task.fields.repeat {
    | Repeat::None => {
      if window.contains(due) {
        vec![due]
      } else {
        vec![]
      }
    }
    | Repeat::Daily => window
      .days()
      .filter(|day| *day >= due)
      .collect(),
    | Repeat::Weekly => window
      .days()
      .filter(|day| {
        *day >= due
          && day.weekday() == due.weekday()
      })
      .collect(),
    | Repeat::Monthly => {
      let mut out = Vec::new();
      let skip = months_between(
        due,
        window.start
      )
      .saturating_sub(1);
      let mut k = skip;
      loop {
        let date = shift_months(due, k);
        if date > window.end {
          break;
        }
        if window.contains(date) {
          out.push(date);
        }
        k += 1;
      }
      out
    }
  }
}

fn months_between(
  from: NaiveDate,
  to: NaiveDate
) -> i32 {
  let months = (to.year() - from.year())
    * 12
    + to.month() as i32
    - from.month() as i32;
  months.max(0)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgendaDay {
  pub date:  NaiveDate,
  pub tasks: Vec<Task>
}

/// Tasks grouped per day over `window`,
/// skipping empty days.
pub fn agenda(
  tasks: &[Task],
  window: &DateWindow
) -> Vec<AgendaDay> {
  let mut days: Vec<AgendaDay> = window
    .days()
    .map(|date| AgendaDay {
      date,
      tasks: vec![]
    })
    .collect();

  for task in tasks {
    for date in occurrences(task, window) {
      let idx = (date - window.start)
        .num_days()
        as usize;
      if let Some(day) = days.get_mut(idx)
      {
        day.tasks.push(task.clone());
      }
    }
  }

  days.retain(|day| !day.tasks.is_empty());
  for day in &mut days {
    sort_tasks(&mut day.tasks);
  }
  days
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stats {
  pub total:           usize,
  pub completed:       usize,
  pub open:            usize,
  pub overdue:         usize,
  pub due_today:       usize,
  pub due_this_week:   usize,
  pub favorites:       usize,
  pub by_priority:     Vec<(Priority, usize)>,
  pub by_category:     Vec<(String, usize)>,
  pub completion_rate: f64
}

impl Stats {
  #[tracing::instrument(skip_all)]
  pub fn compute(
    tasks: &[Task],
    categories: &[Category],
    today: NaiveDate,
    week_start: Weekday
  ) -> Self {
    let week_from =
      start_of_week(today, week_start);
    let week = DateWindow {
      start: week_from,
      end:   add_days(week_from, 6)
    };

    let completed = tasks
      .iter()
      .filter(|t| t.fields.is_completed)
      .count();
    let open_tasks = || {
      tasks
        .iter()
        .filter(|t| !t.fields.is_completed)
    };

    let by_priority = Priority::ALL
      .iter()
      .map(|priority| {
        let n = tasks
          .iter()
          .filter(|t| {
            t.fields.priority == *priority
          })
          .count();
        (*priority, n)
      })
      .collect();

    let by_category = categories
      .iter()
      .map(|category| {
        let n = if category.is_sentinel() {
          tasks
            .iter()
            .filter(|t| {
              t.fields.category
                == CategoryRef::All
            })
            .count()
        } else {
          tasks
            .iter()
            .filter(|t| {
              t.fields.category.id()
                == Some(
                  category.id.as_str()
                )
            })
            .count()
        };
        let name = if category.is_sentinel()
        {
          "Uncategorized".to_string()
        } else {
          category.name().to_string()
        };
        (name, n)
      })
      .collect();

    let completion_rate = if tasks
      .is_empty()
    {
      0.0
    } else {
      completed as f64 / tasks.len() as f64
    };

    Self {
      total: tasks.len(),
      completed,
      open: tasks.len() - completed,
      overdue: open_tasks()
        .filter(|t| {
          t.fields.due_date < today
        })
        .count(),
      due_today: open_tasks()
        .filter(|t| {
          t.fields.due_date == today
        })
        .count(),
      due_this_week: open_tasks()
        .filter(|t| {
          week.contains(t.fields.due_date)
        })
        .count(),
      favorites: tasks
        .iter()
        .filter(|t| t.fields.is_favorite)
        .count(),
      by_priority,
      by_category,
      completion_rate
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reminder {
  pub task_id:  String,
  pub title:    String,
  pub due_at:   NaiveDateTime,
  pub fires_at: NaiveDateTime
}

/// Reminders that fire between `now` and
/// `now + horizon`, earliest first.
///
/// The fire time is the due moment minus
/// the reminder lead. Untimed tasks count
/// as due at 09:00. Repeating tasks
/// contribute one reminder per occurrence.
pub fn due_reminders(
  tasks: &[Task],
  now: NaiveDateTime,
  horizon: Duration
) -> Vec<Reminder> {
  let until = now + horizon;
  let default_time = NaiveTime::from_hms_opt(
    DEFAULT_REMINDER_TIME.0,
    DEFAULT_REMINDER_TIME.1,
    0
  )
  .unwrap_or(NaiveTime::MIN);

  let mut out = Vec::new();
  for task in tasks {
    let fields = &task.fields;
    let lead = match fields.reminder {
      | Some(minutes)
        if minutes > 0
          && !fields.is_completed =>
      {
        Duration::minutes(i64::from(
          minutes
        ))
      }
      | _ => continue
    };

    let window = DateWindow {
      start: now.date(),
      end:   (until + lead).date()
    };
    let time =
      fields.due_time.unwrap_or(default_time);
    for date in occurrences(task, &window) {
      let due_at = date.and_time(time);
      let fires_at = due_at - lead;
      if fires_at >= now
        && fires_at <= until
      {
        out.push(Reminder {
          task_id: task
            .id
            .as_str()
            .to_string(),
          title: fields.title.clone(),
          due_at,
          fires_at
        });
      }
    }
  }

  out.sort_by(|a, b| {
    a.fires_at
      .cmp(&b.fires_at)
      .then_with(|| a.title.cmp(&b.title))
  });
  out
}
