pub mod cache;
pub mod category;
pub mod cli;
pub mod commands;
pub mod config;
pub mod datetime;
pub mod id;
pub mod mutations;
pub mod notify;
pub mod queue;
pub mod refresh;
pub mod remote;
pub mod render;
pub mod session;
pub mod store;
pub mod task;
pub mod views;

use std::ffi::OsString;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{debug, info, warn};

use crate::cli::{Command, ListArgs};

#[tracing::instrument(skip_all)]
pub fn run(raw_args: Vec<OsString>) -> anyhow::Result<()> {
    let pre = cli::preprocess_args(&raw_args)?;
    let cli = cli::GlobalCli::parse_from(pre.cleaned_args);

    cli::init_tracing(cli.verbose, cli.quiet)?;

    info!(
        verbose = cli.verbose,
        quiet = cli.quiet,
        "starting taskdeck CLI"
    );
    debug!(overrides = pre.rc_overrides.len(), "preprocessed rc overrides");

    let mut cfg = config::Config::load(cli.config.as_deref())?;
    cfg.apply_overrides(
        pre.rc_overrides
            .into_iter()
            .chain(cli.rc_overrides.into_iter().map(|kv| (kv.key, kv.value))),
    );

    let data_dir = config::resolve_data_dir(&cfg, cli.data.as_deref())
        .context("failed to resolve data directory")?;
    let settings =
        session::SyncSettings::from_config(&cfg).context("invalid sync settings")?;
    let views_cfg =
        views::ViewSettings::from_config(&cfg).context("invalid calendar settings")?;
    let renderer = render::Renderer::new(&cfg)?;

    let cache = cache::FileCache::open(&data_dir).with_context(|| {
        format!("failed to open local cache at {}", data_dir.display())
    })?;
    let remote = remote::rest::RestClient::from_config(&cfg, settings.retry.attempt_timeout)
        .context("failed to configure the remote service")?;

    let command = cli.command.unwrap_or(Command::List(ListArgs::default()));

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;

    runtime.block_on(run_session(
        remote,
        cache,
        settings,
        renderer,
        views_cfg,
        command,
    ))
}

async fn run_session(
    remote: remote::rest::RestClient,
    cache: cache::FileCache,
    settings: session::SyncSettings,
    mut renderer: render::Renderer,
    views_cfg: views::ViewSettings,
    command: Command,
) -> anyhow::Result<()> {
    let session = session::Session::start(Arc::new(remote), Arc::new(cache), settings);
    let notices = session.notices().clone();

    let outcome = commands::dispatch(session, &mut renderer, &views_cfg, command).await;
    let session = match outcome {
        Ok(session) => session,
        Err(err) => {
            renderer.print_notices(&notices.history())?;
            return Err(err);
        }
    };

    if let Some(session) = session {
        let limit = session.settings().exit_wait;
        tokio::select! {
            drained = session.wait_idle_for(limit) => {
                if !drained {
                    warn!(state = %session.queue_state(), "exiting before sync finished");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                warn!("interrupted; unsynced changes stay in the local cache");
            }
        }
        session.close();
    }

    renderer.print_notices(&notices.history())?;
    info!("done");
    Ok(())
}
