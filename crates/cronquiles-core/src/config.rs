use std::collections::HashMap;
use std::fs;
use std::path::{
  Path,
  PathBuf
};
use std::time::Duration;

use anyhow::{
  Context,
  anyhow
};
use tracing::{
  debug,
  info,
  trace,
  warn
};

use crate::i18n::Locale;

const RC_ENV_VAR: &str = "CRONQUILESRC";
const RC_FILE_NAME: &str =
  ".cronquilesrc";
const DEFAULT_DATA_DIR: &str =
  ".cronquiles";
const DEFAULT_FEED_TIMEOUT_SECS: u64 =
  30;

const DEFAULTS: [(&str, &str); 8] = [
  ("data.location", "~/.cronquiles"),
  ("feed.base", "."),
  ("feed.timeout", "30"),
  ("default.command", "month"),
  ("default.city", "mexico"),
  ("default.lang", "es"),
  ("calendar.past", "off"),
  ("color", "on")
];

#[derive(Debug, Clone)]
pub struct Config {
  map: HashMap<String, String>,
  pub loaded_files: Vec<PathBuf>
}

impl Default for Config {
  fn default() -> Self {
    Self {
      map:          DEFAULTS
        .iter()
        .map(|(k, v)| {
          (k.to_string(), v.to_string())
        })
        .collect(),
      loaded_files: vec![]
    }
  }
}

impl Config {
  #[tracing::instrument(skip(
    rc_override
  ))]
  pub fn load(
    rc_override: Option<&Path>
  ) -> anyhow::Result<Self> {
    let mut cfg = Config::default();

    let rcfile =
      resolve_rc_path(rc_override)?;
    if let Some(path) = rcfile {
      info!(rcfile = %path.display(), "loading rc file");
      cfg.load_file(&path)?;
    } else {
      debug!(
        "no rc file found; using \
         defaults"
      );
    }

    Ok(cfg)
  }

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
      debug!(key = %key, value = %v, "applying override");
      self.map.insert(key, v);
    }
  }

  pub fn get(
    &self,
    key: &str
  ) -> Option<String> {
    self.map.get(key).cloned()
  }

  pub fn get_bool(
    &self,
    key: &str
  ) -> Option<bool> {
    self
      .map
      .get(key)
      .map(|v| parse_bool(v))
  }

  pub fn iter(
    &self
  ) -> impl Iterator<Item = (&String, &String)>
  {
    self.map.iter()
  }

  pub fn feed_base(&self) -> String {
    self
      .get("feed.base")
      .map(|base| {
        expand_tilde(Path::new(&base))
          .display()
          .to_string()
      })
      .unwrap_or_else(|| ".".to_string())
  }

  pub fn feed_timeout(&self) -> Duration {
    let secs = self
      .get("feed.timeout")
      .and_then(|raw| {
        match raw.trim().parse::<u64>() {
          | Ok(secs) if secs > 0 => {
            Some(secs)
          }
          | _ => {
            warn!(value = %raw, "invalid feed.timeout; using default");
            None
          }
        }
      })
      .unwrap_or(
        DEFAULT_FEED_TIMEOUT_SECS
      );
    Duration::from_secs(secs)
  }

  pub fn default_city(&self) -> String {
    self
      .get("default.city")
      .map(|city| city.trim().to_string())
      .filter(|city| !city.is_empty())
      .unwrap_or_else(|| {
        "mexico".to_string()
      })
  }

  pub fn default_locale(&self) -> Locale {
    self
      .get("default.lang")
      .and_then(|tag| {
        match tag.parse::<Locale>() {
          | Ok(locale) => Some(locale),
          | Err(err) => {
            warn!(error = %err, "invalid default.lang");
            None
          }
        }
      })
      .unwrap_or_default()
  }

  pub fn show_past(&self) -> bool {
    self
      .get_bool("calendar.past")
      .unwrap_or(false)
  }

  #[tracing::instrument(skip(self))]
  fn load_file(
    &mut self,
    path: &Path
  ) -> anyhow::Result<()> {
    let path = expand_tilde(path);
    let text =
      fs::read_to_string(&path)
        .with_context(|| {
          format!(
            "failed to read {}",
            path.display()
          )
        })?;

    self
      .loaded_files
      .push(path.clone());

    let base_dir = path
      .parent()
      .map(|p| p.to_path_buf())
      .unwrap_or_else(|| {
        PathBuf::from(".")
      });

    for (line_num, raw_line) in
      text.lines().enumerate()
    {
      let mut line = raw_line.trim();
      if line.is_empty()
        || line.starts_with('#')
      {
        continue;
      }

      if let Some((before, _)) =
        line.split_once('#')
      {
        line = before.trim();
      }

      if line.is_empty() {
        continue;
      }

      if let Some(include_rest) =
        line.strip_prefix("include ")
      {
        let include_path =
          resolve_include_path(
            &base_dir,
            include_rest.trim()
          )?;
        debug!(
            file = %path.display(),
            include = %include_path.display(),
            line = line_num + 1,
            "processing include"
        );

        if include_path.exists() {
          self
            .load_file(&include_path)?;
        } else {
          warn!(include = %include_path.display(), "include file does not exist; skipping");
        }
        continue;
      }

      let (k, v) = line
        .split_once('=')
        .ok_or_else(|| {
          anyhow!(
            "invalid config line \
             {}:{}: {}",
            path.display(),
            line_num + 1,
            raw_line
          )
        })?;

      let key = k.trim().to_string();
      let value = v.trim().to_string();
      trace!(key = %key, value = %value, "loaded config key");
      self.map.insert(key, value);
    }

    Ok(())
  }
}

#[tracing::instrument(skip(
  cfg,
  override_dir
))]
pub fn resolve_data_dir(
  cfg: &Config,
  override_dir: Option<&Path>
) -> anyhow::Result<PathBuf> {
  let dir = if let Some(path) =
    override_dir
  {
    path.to_path_buf()
  } else if let Some(cfg_value) =
    cfg.get("data.location")
  {
    expand_tilde(Path::new(&cfg_value))
  } else {
    default_data_dir()?
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

#[tracing::instrument(skip(
  override_path
))]
fn resolve_rc_path(
  override_path: Option<&Path>
) -> anyhow::Result<Option<PathBuf>> {
  if let Some(path) = override_path {
    if path == Path::new("/dev/null") {
      return Ok(None);
    }
    return Ok(Some(path.to_path_buf()));
  }

  if let Ok(rc_env) =
    std::env::var(RC_ENV_VAR)
  {
    if rc_env == "/dev/null" {
      return Ok(None);
    }
    return Ok(Some(PathBuf::from(
      rc_env
    )));
  }

  let Some(home) = dirs::home_dir()
  else {
    warn!(
      "cannot determine home \
       directory; skipping rc file"
    );
    return Ok(None);
  };
  let candidate = home.join(RC_FILE_NAME);
  if candidate.exists() {
    return Ok(Some(candidate));
  }

  Ok(None)
}

fn default_data_dir()
-> anyhow::Result<PathBuf> {
  let home = dirs::home_dir()
    .ok_or_else(|| {
      anyhow!(
        "cannot determine home \
         directory"
      )
    })?;
  Ok(home.join(DEFAULT_DATA_DIR))
}

fn resolve_include_path(
  base_dir: &Path,
  include: &str
) -> anyhow::Result<PathBuf> {
  if include.trim().is_empty() {
    return Err(anyhow!(
      "include path cannot be empty"
    ));
  }

  let raw = PathBuf::from(include);
  let expanded = expand_tilde(&raw);
  if expanded.is_absolute() {
    Ok(expanded)
  } else {
    Ok(base_dir.join(expanded))
  }
}

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

fn parse_bool(s: &str) -> bool {
  matches!(
    s.trim()
      .to_ascii_lowercase()
      .as_str(),
    "1" | "y" | "yes" | "on" | "true"
  )
}

#[cfg(test)]
mod tests {
  use std::fs;
  use std::time::Duration;

  use tempfile::tempdir;

  use super::Config;
  use crate::i18n::Locale;

  #[test]
  fn reads_rc_with_includes_and_overrides()
  {
    let temp = tempdir().expect("tempdir");
    let extra = temp.path().join("extra.rc");
    fs::write(
      &extra,
      "feed.timeout = 5\n"
    )
    .expect("write include");
    let rc = temp.path().join("main.rc");
    fs::write(
      &rc,
      "# sample\ndefault.city = jalisco # tapatío\ninclude extra.rc\ndefault.lang=en\n"
    )
    .expect("write rc");

    let mut cfg = Config::load(Some(&rc))
      .expect("load rc");
    assert_eq!(cfg.loaded_files.len(), 2);
    assert_eq!(
      cfg.default_city(),
      "jalisco"
    );
    assert_eq!(
      cfg.default_locale(),
      Locale::En
    );
    assert_eq!(
      cfg.feed_timeout(),
      Duration::from_secs(5)
    );
    assert!(!cfg.show_past());

    cfg.apply_overrides([(
      "rc.calendar.past".to_string(),
      "yes".to_string()
    )]);
    assert!(cfg.show_past());
  }

  #[test]
  fn dev_null_disables_rc() {
    let cfg = Config::load(Some(
      std::path::Path::new("/dev/null")
    ))
    .expect("load");
    assert!(cfg.loaded_files.is_empty());
    assert_eq!(
      cfg.get("default.command")
        .as_deref(),
      Some("month")
    );
    assert_eq!(
      cfg.feed_timeout(),
      Duration::from_secs(30)
    );
  }

  #[test]
  fn rejects_lines_without_equals() {
    let temp = tempdir().expect("tempdir");
    let rc = temp.path().join("bad.rc");
    fs::write(&rc, "color on\n")
      .expect("write rc");
    assert!(Config::load(Some(&rc)).is_err());
  }
}
