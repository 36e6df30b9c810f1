use std::io::{self, IsTerminal, Write};

use chrono::NaiveDate;
use unicode_width::UnicodeWidthStr;

use crate::category::{Category, CategoryColor};
use crate::config::Config;
use crate::notify::{Notice, NoticeKind};
use crate::queue::QueueState;
use crate::task::{Priority, Repeat, Task};
use crate::views::{AgendaDay, Reminder, Stats};

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
}

impl Renderer {
    pub fn new(cfg: &Config) -> anyhow::Result<Self> {
        let color = cfg.get_switch("color")?.unwrap_or(true);
        Ok(Self { color })
    }

    #[tracing::instrument(skip(self, tasks, categories))]
    pub fn print_task_table(
        &mut self,
        tasks: &[Task],
        categories: &[Category],
        today: NaiveDate,
    ) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        if tasks.is_empty() {
            writeln!(out, "No tasks.")?;
            return Ok(());
        }

        let headers = ["ID", "Due", "Time", "Pri", "Category", "Title", "Flags"]
            .map(str::to_string)
            .to_vec();
        let rows = tasks
            .iter()
            .map(|task| self.task_row(task, categories, today))
            .collect();

        write_table(&mut out, headers, rows)?;
        writeln!(out, "\n{} task(s)", tasks.len())?;
        Ok(())
    }

    #[tracing::instrument(skip(self, days, categories))]
    pub fn print_agenda(
        &mut self,
        days: &[AgendaDay],
        categories: &[Category],
        today: NaiveDate,
    ) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        if days.is_empty() {
            writeln!(out, "Nothing scheduled.")?;
            return Ok(());
        }

        for (idx, day) in days.iter().enumerate() {
            if idx > 0 {
                writeln!(out)?;
            }
            let heading = day.date.format("%A %Y-%m-%d").to_string();
            let heading = if day.date == today {
                self.paint(&heading, "1;36")
            } else {
                self.paint(&heading, "1")
            };
            writeln!(out, "{heading}")?;

            let headers = ["ID", "Time", "Pri", "Category", "Title", "Flags"]
                .map(str::to_string)
                .to_vec();
            let rows = day
                .tasks
                .iter()
                .map(|task| {
                    let mut row = self.task_row(task, categories, today);
                    row.remove(1);
                    row
                })
                .collect();
            write_table(&mut out, headers, rows)?;
        }
        Ok(())
    }

    #[tracing::instrument(skip(self, task, categories))]
    pub fn print_task_info(&mut self, task: &Task, categories: &[Category]) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        let fields = &task.fields;

        writeln!(out, "id          {}", task.id)?;
        writeln!(
            out,
            "sync        {}",
            if task.id.is_pending() {
                "pending"
            } else {
                "committed"
            }
        )?;
        writeln!(out, "title       {}", fields.title)?;
        if !fields.description.is_empty() {
            writeln!(out, "description {}", fields.description)?;
        }
        writeln!(out, "due         {}", fields.due_date.format("%Y-%m-%d"))?;
        if let Some(time) = fields.due_time {
            writeln!(out, "time        {}", time.format("%H:%M"))?;
        }
        writeln!(out, "category    {}", category_name(categories, task))?;
        writeln!(out, "priority    {}", fields.priority)?;
        if let Some(location) = &fields.location {
            writeln!(out, "location    {location}")?;
        }
        if let Some(minutes) = fields.reminder {
            writeln!(out, "reminder    {minutes} min before")?;
        }
        if fields.repeat != Repeat::None {
            writeln!(out, "repeat      {}", fields.repeat)?;
        }
        writeln!(out, "completed   {}", yes_no(fields.is_completed))?;
        writeln!(out, "favorite    {}", yes_no(fields.is_favorite))?;
        Ok(())
    }

    #[tracing::instrument(skip(self, categories))]
    pub fn print_categories(&mut self, categories: &[Category]) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        let headers = ["ID", "Name", "Color", "Tasks"].map(str::to_string).to_vec();
        let rows = categories
            .iter()
            .map(|category| {
                vec![
                    self.paint(category.id.as_str(), "33"),
                    self.paint_category(category.name(), category.fields.color),
                    category.fields.color.to_string(),
                    category.count.to_string(),
                ]
            })
            .collect();
        write_table(&mut out, headers, rows)?;
        Ok(())
    }

    #[tracing::instrument(skip(self, stats))]
    pub fn print_stats(&mut self, stats: &Stats) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        writeln!(out, "total          {}", stats.total)?;
        writeln!(out, "completed      {}", stats.completed)?;
        writeln!(out, "open           {}", stats.open)?;
        writeln!(
            out,
            "overdue        {}",
            if stats.overdue > 0 {
                self.paint(&stats.overdue.to_string(), "31")
            } else {
                "0".to_string()
            }
        )?;
        writeln!(out, "due today      {}", stats.due_today)?;
        writeln!(out, "due this week  {}", stats.due_this_week)?;
        writeln!(out, "favorites      {}", stats.favorites)?;
        writeln!(out, "completion     {:.0}%", stats.completion_rate * 100.0)?;

        writeln!(out)?;
        let rows = stats
            .by_priority
            .iter()
            .map(|(priority, n)| vec![self.paint_priority(*priority), n.to_string()])
            .collect();
        write_table(
            &mut out,
            vec!["Priority".to_string(), "Tasks".to_string()],
            rows,
        )?;

        writeln!(out)?;
        let rows = stats
            .by_category
            .iter()
            .map(|(name, n)| vec![name.clone(), n.to_string()])
            .collect();
        write_table(
            &mut out,
            vec!["Category".to_string(), "Tasks".to_string()],
            rows,
        )?;
        Ok(())
    }

    #[tracing::instrument(skip(self, reminders))]
    pub fn print_reminders(&mut self, reminders: &[Reminder]) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        if reminders.is_empty() {
            writeln!(out, "No upcoming reminders.")?;
            return Ok(());
        }
        let headers = ["At", "Due", "ID", "Title"].map(str::to_string).to_vec();
        let rows = reminders
            .iter()
            .map(|reminder| {
                vec![
                    self.paint(&reminder.fires_at.format("%Y-%m-%d %H:%M").to_string(), "35"),
                    reminder.due_at.format("%H:%M").to_string(),
                    self.paint(short_id(&reminder.task_id), "33"),
                    reminder.title.clone(),
                ]
            })
            .collect();
        write_table(&mut out, headers, rows)?;
        Ok(())
    }

    /// Banners go to stderr so stdout stays clean for tables.
    pub fn print_notices(&mut self, notices: &[Notice]) -> anyhow::Result<()> {
        let mut err = io::stderr().lock();
        for notice in notices {
            let tag = match notice.kind {
                NoticeKind::Success => self.paint_stderr("ok", "32"),
                NoticeKind::Error => self.paint_stderr("error", "31"),
            };
            writeln!(err, "[{tag}] {}", notice.message)?;
        }
        Ok(())
    }

    pub fn print_queue_state(&mut self, state: QueueState) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        writeln!(out, "sync queue {state}")?;
        Ok(())
    }

    fn task_row(&self, task: &Task, categories: &[Category], today: NaiveDate) -> Vec<String> {
        let fields = &task.fields;

        let due = fields.due_date.format("%Y-%m-%d").to_string();
        let due = if !fields.is_completed && fields.due_date < today {
            self.paint(&due, "31")
        } else {
            due
        };
        let time = fields
            .due_time
            .map(|time| time.format("%H:%M").to_string())
            .unwrap_or_default();

        let category = categories
            .iter()
            .find(|category| Some(category.id.as_str()) == fields.category.id());
        let category = match category {
            Some(category) => self.paint_category(category.name(), category.fields.color),
            None => String::new(),
        };

        let title = if fields.is_completed {
            self.paint(&fields.title, "2;9")
        } else {
            fields.title.clone()
        };

        let mut flags = String::new();
        if fields.is_completed {
            flags.push('x');
        }
        if fields.is_favorite {
            flags.push('*');
        }
        if fields.reminder.is_some() {
            flags.push('!');
        }
        if fields.repeat != Repeat::None {
            flags.push('r');
        }
        if task.id.is_pending() {
            flags.push('~');
        }

        vec![
            self.paint(short_id(task.id.as_str()), "33"),
            due,
            time,
            self.paint_priority(fields.priority),
            category,
            title,
            flags,
        ]
    }

    fn paint_priority(&self, priority: Priority) -> String {
        let code = match priority {
            Priority::High => "31",
            Priority::Medium => "33",
            Priority::Low => "32",
        };
        self.paint(priority.as_str(), code)
    }

    fn paint_category(&self, name: &str, color: CategoryColor) -> String {
        self.paint(name, color.ansi_code())
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color || !io::stdout().is_terminal() {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }

    fn paint_stderr(&self, text: &str, code: &str) -> String {
        if !self.color || !io::stderr().is_terminal() {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

/// Ids are long uuids; tables show enough to type back as a prefix.
pub fn short_id(id: &str) -> &str {
    const SHOWN: usize = 12;
    match id.char_indices().nth(SHOWN) {
        Some((idx, _)) => &id[..idx],
        None => id,
    }
}

fn category_name(categories: &[Category], task: &Task) -> String {
    match task.fields.category.id() {
        None => "-".to_string(),
        Some(id) => categories
            .iter()
            .find(|category| category.id.as_str() == id)
            .map(|category| category.name().to_string())
            .unwrap_or_else(|| id.to_string()),
    }
}

fn yes_no(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}

fn write_table<W: Write>(
    mut writer: W,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let widths = column_widths(&headers, &rows);

    for (idx, header) in headers.iter().enumerate() {
        write!(writer, "{:width$} ", header, width = widths[idx])?;
    }
    writeln!(writer)?;

    for width in &widths {
        write!(writer, "{:-<width$} ", "", width = *width)?;
    }
    writeln!(writer)?;

    for row in rows {
        for (idx, cell) in row.iter().enumerate().take(widths.len()) {
            let visible_width = UnicodeWidthStr::width(strip_ansi(cell).as_str());
            let padding = widths[idx].saturating_sub(visible_width);
            write!(writer, "{}{} ", cell, " ".repeat(padding))?;
        }
        writeln!(writer)?;
    }

    Ok(())
}

fn column_widths(headers: &[String], rows: &[Vec<String>]) -> Vec<usize> {
    let mut widths: Vec<usize> = headers
        .iter()
        .map(|header| UnicodeWidthStr::width(header.as_str()))
        .collect();

    for row in rows {
        for (idx, cell) in row.iter().enumerate().take(widths.len()) {
            widths[idx] = widths[idx].max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }
    widths
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            if ch == 'm' {
                escaped = false;
            }
            continue;
        }

        if ch == '\x1b' {
            escaped = true;
            continue;
        }

        out.push(ch);
    }

    out
}
