use std::collections::{
  HashMap,
  HashSet
};
use std::fs;
use std::path::{
  Path,
  PathBuf
};

use anyhow::{
  Context,
  anyhow,
  bail
};
use tracing::{
  debug,
  info,
  trace,
  warn
};

const RC_ENV_VAR: &str = "TASKDECKRC";

const DEFAULTS: [(&str, &str); 12] = [
  ("data.location", "~/.taskdeck"),
  ("sync.refresh_secs", "30"),
  ("sync.retry.attempts", "3"),
  ("sync.retry.base_ms", "500"),
  ("sync.retry.max_ms", "8000"),
  ("sync.timeout_secs", "15"),
  ("sync.exit_wait_secs", "20"),
  ("counts.debounce_ms", "1000"),
  ("notice.lifetime_ms", "3000"),
  ("calendar.week_start", "monday"),
  ("calendar.agenda_days", "14"),
  ("color", "on")
];

/// Flat `key = value` settings: built-in
/// defaults, then the rc file, then
/// command-line overrides.
#[derive(Debug, Clone)]
pub struct Config {
  map: HashMap<String, String>
}

impl Default for Config {
  fn default() -> Self {
    Self {
      map: DEFAULTS
        .iter()
        .map(|(k, v)| {
          (k.to_string(), v.to_string())
        })
        .collect()
    }
  }
}

/// One meaningful line of an rc file.
#[derive(Debug, Clone, PartialEq, Eq)]
enum RcLine<'a> {
  Include(&'a str),
  Entry {
    key: &'a str,
    value: &'a str
  }
}

/// `None` for blank and comment-only
/// lines. A `#` starts a comment anywhere
/// on the line.
fn parse_rc_line(
  raw: &str
) -> anyhow::Result<Option<RcLine<'_>>>
{
  let line = raw
    .split_once('#')
    .map_or(raw, |(before, _)| before)
    .trim();
  if line.is_empty() {
    return Ok(None);
  }

  if let Some(rest) =
    line.strip_prefix("include ")
  {
    let target = rest.trim();
    if target.is_empty() {
      bail!(
        "include path cannot be empty"
      );
    }
    return Ok(Some(RcLine::Include(
      target
    )));
  }

  let (key, value) = line
    .split_once('=')
    .ok_or_else(|| {
      anyhow!("expected key = value")
    })?;
  let key = key.trim();
  if key.is_empty() {
    bail!("missing key before '='");
  }
  Ok(Some(RcLine::Entry {
    key,
    value: value.trim()
  }))
}

impl Config {
  #[tracing::instrument(skip(
    rc_override
  ))]
  pub fn load(
    rc_override: Option<&Path>
  ) -> anyhow::Result<Self> {
    let mut cfg = Config::default();

    match resolve_rc_path(rc_override)? {
      | Some(path) => {
        info!(rc = %path.display(), "loading taskdeckrc");
        let mut visited = HashSet::new();
        cfg.load_file(
          &path,
          &mut visited
        )?;
      }
      | None => {
        debug!(
          "no taskdeckrc; using defaults"
        )
      }
    }

    Ok(cfg)
  }

  /// Applies `--rc` style overrides.
  /// A leading `rc.` is stripped.
  #[tracing::instrument(skip(
    self, overrides
  ))]
  pub fn apply_overrides<I>(
    &mut self,
    overrides: I
  ) where
    I: IntoIterator<
      Item = (String, String)
    >
  {
    for (k, v) in overrides {
      let key = k
        .strip_prefix("rc.")
        .unwrap_or(&k)
        .to_string();
      debug!(key = %key, "applying override");
      self.map.insert(key, v);
    }
  }

  pub fn get(
    &self,
    key: &str
  ) -> Option<String> {
    self.map.get(key).cloned()
  }

  /// Returns the value only when it is
  /// present and non-blank.
  pub fn get_nonempty(
    &self,
    key: &str
  ) -> Option<String> {
    self
      .map
      .get(key)
      .map(|v| v.trim().to_string())
      .filter(|v| !v.is_empty())
  }

  /// An on/off setting. Anything other
  /// than the usual spellings is an error.
  pub fn get_switch(
    &self,
    key: &str
  ) -> anyhow::Result<Option<bool>> {
    let Some(raw) = self.map.get(key)
    else {
      return Ok(None);
    };
    match raw
      .trim()
      .to_ascii_lowercase()
      .as_str()
    {
      | "on" | "yes" | "true" | "1" => {
        Ok(Some(true))
      }
      | "off" | "no" | "false" | "0" => {
        Ok(Some(false))
      }
      | other => Err(anyhow!(
        "config key {key} expects on or \
         off, got {other:?}"
      ))
    }
  }

  pub fn get_u64(
    &self,
    key: &str
  ) -> anyhow::Result<Option<u64>> {
    self
      .map
      .get(key)
      .map(|raw| {
        raw.trim().parse::<u64>().with_context(|| {
          format!(
            "config key {key} expects a \
             non-negative integer, got \
             {raw:?}"
          )
        })
      })
      .transpose()
  }

  #[tracing::instrument(skip(
    self, visited
  ))]
  fn load_file(
    &mut self,
    path: &Path,
    visited: &mut HashSet<PathBuf>
  ) -> anyhow::Result<()> {
    let path = expand_tilde(path);
    let canonical = fs::canonicalize(
      &path
    )
    .unwrap_or_else(|_| path.clone());
    if !visited.insert(canonical) {
      warn!(file = %path.display(), "include cycle; skipping");
      return Ok(());
    }

    let text =
      fs::read_to_string(&path)
        .with_context(|| {
          format!(
            "failed to read {}",
            path.display()
          )
        })?;
    let base_dir = path
      .parent()
      .map_or_else(
        || PathBuf::from("."),
        Path::to_path_buf
      );

    for (idx, raw) in
      text.lines().enumerate()
    {
      let parsed = parse_rc_line(raw)
        .with_context(|| {
          format!(
            "invalid config line {}:{}",
            path.display(),
            idx + 1
          )
        })?;

      match parsed {
        | None => {}
        | Some(RcLine::Include(
          target
        )) => {
          let include = base_dir
            .join(expand_tilde(
              Path::new(target)
            ));
          if include.exists() {
            self.load_file(
              &include, visited
            )?;
          } else {
            warn!(include = %include.display(), "include file does not exist; skipping");
          }
        }
        | Some(RcLine::Entry {
          key,
          value
        }) => {
          trace!(key, "loaded config key");
          self.map.insert(
            key.to_string(),
            value.to_string()
          );
        }
      }
    }

    Ok(())
  }
}

/// `--data`, then `data.location`, then
/// `~/.taskdeck`. The directory is
/// created when missing.
#[tracing::instrument(skip(
  cfg,
  override_dir
))]
pub fn resolve_data_dir(
  cfg: &Config,
  override_dir: Option<&Path>
) -> anyhow::Result<PathBuf> {
  let dir = match override_dir {
    | Some(path) => path.to_path_buf(),
    | None => match cfg
      .get_nonempty("data.location")
    {
      | Some(value) => {
        expand_tilde(Path::new(&value))
      }
      | None => {
        home_dir()?.join(".taskdeck")
      }
    }
  };

  if !dir.exists() {
    info!(dir = %dir.display(), "creating data directory");
    fs::create_dir_all(&dir)
      .with_context(|| {
        format!(
          "failed to create {}",
          dir.display()
        )
      })?;
  }

  Ok(dir)
}

fn resolve_rc_path(
  override_path: Option<&Path>
) -> anyhow::Result<Option<PathBuf>> {
  if let Some(path) = override_path {
    return Ok(Some(path.to_path_buf()));
  }

  if let Ok(rc_env) =
    std::env::var(RC_ENV_VAR)
  {
    return Ok(
      (rc_env != "/dev/null")
        .then(|| PathBuf::from(rc_env))
    );
  }

  let candidate =
    home_dir()?.join(".taskdeckrc");
  Ok(candidate.exists().then_some(
    candidate
  ))
}

fn home_dir() -> anyhow::Result<PathBuf>
{
  dirs::home_dir().ok_or_else(|| {
    anyhow!(
      "cannot determine home directory"
    )
  })
}

/// Absolute paths pass through
/// `Path::join` unchanged, so only `~/`
/// needs handling.
fn expand_tilde(
  path: &Path
) -> PathBuf {
  let text = path.to_string_lossy();
  if let Some(rest) =
    text.strip_prefix("~/")
    && let Some(home) = dirs::home_dir()
  {
    return home.join(rest);
  }
  path.to_path_buf()
}

#[cfg(test)]
mod tests {
  use std::fs;

  use tempfile::tempdir;

  use super::{
    Config,
    RcLine,
    parse_rc_line
  };

  #[test]
  fn parses_entries_includes_and_comments()
  {
    assert_eq!(
      parse_rc_line("  # note")
        .expect("comment"),
      None
    );
    assert_eq!(
      parse_rc_line(
        "color = off # plain output"
      )
      .expect("entry"),
      Some(RcLine::Entry {
        key: "color",
        value: "off"
      })
    );
    assert_eq!(
      parse_rc_line("include extra.rc")
        .expect("include"),
      Some(RcLine::Include("extra.rc"))
    );
    assert!(
      parse_rc_line("= value").is_err()
    );
    assert!(
      parse_rc_line("include   ").is_err()
    );
  }

  #[test]
  fn loads_file_with_includes_and_overrides() {
    let dir =
      tempdir().expect("tempdir");
    let extra = dir.path().join("extra.rc");
    fs::write(
      &extra,
      "remote.key = anon-key\n"
    )
    .expect("write include");
    let main = dir.path().join("main.rc");
    fs::write(
      &main,
      "# hosted service\nremote.url = https://example.test # trailing\ninclude extra.rc\nsync.refresh_secs=45\n"
    )
    .expect("write rc");

    let mut cfg = Config::load(Some(&main))
      .expect("load config");
    cfg.apply_overrides([(
      "rc.sync.refresh_secs".to_string(),
      "10".to_string()
    )]);

    assert_eq!(
      cfg.get("remote.url").as_deref(),
      Some("https://example.test")
    );
    assert_eq!(
      cfg.get("remote.key").as_deref(),
      Some("anon-key")
    );
    assert_eq!(
      cfg
        .get_u64("sync.refresh_secs")
        .expect("number"),
      Some(10)
    );
  }

  #[test]
  fn include_cycles_are_skipped() {
    let dir =
      tempdir().expect("tempdir");
    let a = dir.path().join("a.rc");
    let b = dir.path().join("b.rc");
    fs::write(
      &a,
      "include b.rc\ncolor = off\n"
    )
    .expect("write a");
    fs::write(
      &b,
      "include a.rc\nremote.key = k\n"
    )
    .expect("write b");

    let cfg = Config::load(Some(&a))
      .expect("load config");
    assert_eq!(
      cfg
        .get_switch("color")
        .expect("switch"),
      Some(false)
    );
    assert_eq!(
      cfg.get("remote.key").as_deref(),
      Some("k")
    );
  }

  #[test]
  fn rejects_malformed_values_and_lines() {
    let mut cfg = Config::default();
    cfg.apply_overrides([
      (
        "sync.timeout_secs".to_string(),
        "soon".to_string()
      ),
      (
        "color".to_string(),
        "sometimes".to_string()
      )
    ]);
    assert!(
      cfg
        .get_u64("sync.timeout_secs")
        .is_err()
    );
    assert!(
      cfg.get_switch("color").is_err()
    );

    let dir =
      tempdir().expect("tempdir");
    let bad = dir.path().join("bad.rc");
    fs::write(&bad, "no equals sign\n")
      .expect("write rc");
    assert!(
      Config::load(Some(&bad)).is_err()
    );
  }
}
