use std::ffi::OsString;
use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::anyhow;
use clap::builder::ValueParser;
use clap::{ArgAction, Args, Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::category::CategoryColor;
use crate::task::{Priority, Repeat};
use crate::views::ViewMode;

#[derive(Debug, Clone)]
pub struct PreprocessedArgs {
    pub cleaned_args: Vec<OsString>,
    pub rc_overrides: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct KeyVal {
    pub key: String,
    pub value: String,
}

impl std::str::FromStr for KeyVal {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (k, v) = s
            .split_once('=')
            .ok_or_else(|| anyhow!("expected KEY=VALUE, got: {s}"))?;
        Ok(Self {
            key: k.trim().to_string(),
            value: v.trim().to_string(),
        })
    }
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "taskdeck",
    version,
    about = "Taskdeck: tasks and calendar, synced in the background",
    disable_help_subcommand = true
)]
pub struct GlobalCli {
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[arg(short = 'q', long = "quiet", action = ArgAction::Count, global = true)]
    pub quiet: u8,

    #[arg(
        long = "rc",
        value_parser = ValueParser::new(|s: &str| s.parse::<KeyVal>()),
        action = ArgAction::Append,
        global = true
    )]
    pub rc_overrides: Vec<KeyVal>,

    #[arg(long = "config", global = true)]
    pub config: Option<PathBuf>,

    #[arg(long = "data", global = true)]
    pub data: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Show tasks, optionally as a calendar view
    List(ListArgs),
    /// Add a task
    Add(AddArgs),
    /// Change fields of a task
    Edit(EditArgs),
    /// Toggle completion
    Done { id: String },
    /// Toggle favorite
    Star { id: String },
    /// Delete a task
    Rm { id: String },
    /// Show every field of one task
    Info { id: String },
    #[command(subcommand)]
    Category(CategoryCommand),
    /// Totals, overdue and per-category counts
    Stats,
    /// Reminders firing soon
    Reminders {
        #[arg(long, default_value_t = 24)]
        hours: u32,
    },
    /// Pull fresh data from the service
    Sync,
    /// Forget all local data
    Logout,
}

#[derive(Args, Debug, Clone, Default)]
pub struct ListArgs {
    #[arg(long, value_parser = ValueParser::new(|s: &str| s.parse::<ViewMode>()))]
    pub view: Option<ViewMode>,

    /// Focus date for calendar views
    #[arg(long)]
    pub date: Option<String>,

    #[arg(long)]
    pub category: Option<String>,

    #[arg(long)]
    pub search: Option<String>,

    #[arg(long)]
    pub favorites: bool,

    #[arg(long, conflicts_with = "open")]
    pub completed: bool,

    #[arg(long)]
    pub open: bool,
}

#[derive(Args, Debug, Clone, Default)]
pub struct TaskOptions {
    /// Due date: today, tomorrow, friday, march, +3d, 2024-01-10
    #[arg(long)]
    pub due: Option<String>,

    /// Due time: 14:30, 3pm, 3:15pm
    #[arg(long)]
    pub at: Option<String>,

    #[arg(long)]
    pub category: Option<String>,

    #[arg(long, value_parser = ValueParser::new(|s: &str| s.parse::<Priority>()))]
    pub priority: Option<Priority>,

    #[arg(long)]
    pub location: Option<String>,

    /// Minutes before the due time
    #[arg(long)]
    pub remind: Option<u32>,

    #[arg(long, value_parser = ValueParser::new(|s: &str| s.parse::<Repeat>()))]
    pub repeat: Option<Repeat>,

    #[arg(long)]
    pub description: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct AddArgs {
    #[arg(required = true, num_args = 1..)]
    pub title: Vec<String>,

    #[command(flatten)]
    pub options: TaskOptions,
}

#[derive(Args, Debug, Clone)]
pub struct EditArgs {
    pub id: String,

    #[arg(long)]
    pub title: Option<String>,

    #[command(flatten)]
    pub options: TaskOptions,

    #[arg(long, conflicts_with = "at")]
    pub clear_time: bool,

    #[arg(long, conflicts_with = "location")]
    pub clear_location: bool,

    #[arg(long, conflicts_with = "remind")]
    pub clear_reminder: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum CategoryCommand {
    List,
    Add {
        #[arg(required = true, num_args = 1..)]
        name: Vec<String>,

        #[arg(long, value_parser = ValueParser::new(|s: &str| s.parse::<CategoryColor>()))]
        color: Option<CategoryColor>,
    },
    Edit {
        id: String,

        #[arg(long)]
        name: Option<String>,

        #[arg(long, value_parser = ValueParser::new(|s: &str| s.parse::<CategoryColor>()))]
        color: Option<CategoryColor>,
    },
    Rm {
        id: String,
    },
}

pub fn init_tracing(verbose: u8, quiet: u8) -> anyhow::Result<()> {
    let default_level = if quiet >= 2 {
        "error"
    } else if quiet == 1 {
        "warn"
    } else if verbose >= 3 {
        "trace"
    } else if verbose == 2 {
        "debug"
    } else if verbose == 1 {
        "info"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| anyhow!("invalid RUST_LOG / log filter: {e}"))?;

    let init_result = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true)
        .with_thread_ids(true)
        .with_ansi(std::io::stderr().is_terminal())
        .try_init();

    if let Err(err) = init_result {
        debug!(error = %err, "tracing subscriber already set, continuing");
    }

    Ok(())
}

/// Pulls positional `rc.key=value` (or `rc.key:value`) tokens out of the argument list.
#[tracing::instrument(skip_all)]
pub fn preprocess_args(raw: &[OsString]) -> anyhow::Result<PreprocessedArgs> {
    let mut cleaned = Vec::with_capacity(raw.len());
    let mut overrides: Vec<(String, String)> = Vec::new();

    let mut iter = raw.iter().cloned();
    if let Some(bin) = iter.next() {
        cleaned.push(bin);
    }

    for arg in iter {
        let s = arg.to_string_lossy();
        if let Some(rest) = s.strip_prefix("rc.") {
            let parsed = rest.split_once('=').or_else(|| rest.split_once(':'));
            if let Some((k, v)) = parsed {
                debug!(key = %k, "captured positional rc override");
                overrides.push((format!("rc.{k}"), v.to_string()));
                continue;
            }
        }

        cleaned.push(arg);
    }

    Ok(PreprocessedArgs {
        cleaned_args: cleaned,
        rc_overrides: overrides,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(raw: &[&str]) -> Vec<OsString> {
        raw.iter().map(OsString::from).collect()
    }

    #[test]
    fn positional_rc_overrides_are_extracted() {
        let pre = preprocess_args(&args(&["taskdeck", "rc.color=off", "list", "rc.sync.timeout_secs:5"]))
            .expect("preprocess");
        assert_eq!(pre.cleaned_args, args(&["taskdeck", "list"]));
        assert_eq!(
            pre.rc_overrides,
            vec![
                ("rc.color".to_string(), "off".to_string()),
                ("rc.sync.timeout_secs".to_string(), "5".to_string()),
            ]
        );
    }

    #[test]
    fn parses_add_with_options() {
        let cli = GlobalCli::try_parse_from(args(&[
            "taskdeck",
            "--rc",
            "color=off",
            "add",
            "Buy",
            "milk",
            "--due",
            "2024-01-10",
            "--priority",
            "low",
            "--category",
            "home",
        ]))
        .expect("parse");

        assert_eq!(cli.rc_overrides[0].key, "color");
        match cli.command {
            Some(Command::Add(add)) => {
                assert_eq!(add.title, vec!["Buy", "milk"]);
                assert_eq!(add.options.priority, Some(Priority::Low));
                assert_eq!(add.options.category.as_deref(), Some("home"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_view() {
        assert!(GlobalCli::try_parse_from(args(&["taskdeck", "list", "--view", "year"])).is_err());
    }
}
