use std::collections::BTreeMap;
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::i18n::Locale;

pub const STORAGE_KEY_LANG: &str = "cron-quiles-lang";
pub const STORAGE_KEY_CITY: &str = "cron-quiles-city";

const PREFERENCES_FILE: &str = "preferences.data";

/// Persisted preferences, one JSON-encoded value per key.
#[derive(Debug)]
pub struct PreferenceStore {
    pub data_dir: PathBuf,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Entry {
    key: String,
    value: String,
}

impl PreferenceStore {
    #[tracing::instrument(skip(data_dir))]
    pub fn open(data_dir: &Path) -> anyhow::Result<Self> {
        let data_dir = data_dir.to_path_buf();
        fs::create_dir_all(&data_dir)
            .with_context(|| format!("failed to create {}", data_dir.display()))?;

        let path = data_dir.join(PREFERENCES_FILE);
        if !path.exists() {
            fs::write(&path, "")?;
        }

        info!(
            data_dir = %data_dir.display(),
            preferences = %path.display(),
            "opened preference store"
        );

        Ok(Self { data_dir, path })
    }

    /// Decoded value for `key`. A stored value that is not valid JSON
    /// comes back as a plain string.
    #[tracing::instrument(skip(self))]
    pub fn get(&self, key: &str) -> anyhow::Result<Option<Value>> {
        let entries = load_entries(&self.path)?;
        Ok(entries.get(key).map(|raw| decode_value(raw)))
    }

    #[tracing::instrument(skip(self, value))]
    pub fn set(&self, key: &str, value: &Value) -> anyhow::Result<()> {
        let encoded = serde_json::to_string(value)
            .with_context(|| format!("failed to encode preference {key}"))?;
        self.set_raw(key, &encoded)
    }

    /// Store `raw` verbatim, without encoding it.
    #[tracing::instrument(skip(self, raw))]
    pub fn set_raw(&self, key: &str, raw: &str) -> anyhow::Result<()> {
        let mut entries = load_entries(&self.path)?;
        entries.insert(key.to_string(), raw.to_string());
        save_entries_atomic(&self.path, &entries).context("failed to save preferences")
    }

    pub fn saved_locale(&self) -> anyhow::Result<Option<Locale>> {
        let value = self.get(STORAGE_KEY_LANG)?;
        Ok(value
            .as_ref()
            .and_then(Value::as_str)
            .and_then(|tag| match tag.parse::<Locale>() {
                Ok(locale) => Some(locale),
                Err(err) => {
                    warn!(tag, error = %err, "ignoring saved language");
                    None
                }
            }))
    }

    pub fn save_locale(&self, locale: Locale) -> anyhow::Result<()> {
        self.set(STORAGE_KEY_LANG, &Value::from(locale.tag()))
    }

    pub fn saved_city(&self) -> anyhow::Result<Option<String>> {
        let value = self.get(STORAGE_KEY_CITY)?;
        Ok(value
            .as_ref()
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|city| !city.is_empty())
            .map(str::to_string))
    }

    pub fn save_city(&self, city: &str) -> anyhow::Result<()> {
        self.set(STORAGE_KEY_CITY, &Value::from(city))
    }
}

fn decode_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

#[tracing::instrument(skip(path))]
fn load_entries(path: &Path) -> anyhow::Result<BTreeMap<String, String>> {
    debug!(file = %path.display(), "loading preferences");
    let file = fs::File::open(path)
        .with_context(|| format!("failed reading {}", path.display()))?;
    let reader = BufReader::new(file);

    let mut out = BTreeMap::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let entry: Entry = serde_json::from_str(trimmed)
            .with_context(|| format!("failed parsing {} line {}", path.display(), idx + 1))?;
        out.insert(entry.key, entry.value);
    }

    debug!(count = out.len(), "loaded preferences");
    Ok(out)
}

#[tracing::instrument(skip(path, entries))]
fn save_entries_atomic(path: &Path, entries: &BTreeMap<String, String>) -> anyhow::Result<()> {
    debug!(file = %path.display(), count = entries.len(), "saving preferences atomically");

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = NamedTempFile::new_in(dir)?;
    for (key, value) in entries {
        let serialized = serde_json::to_string(&Entry {
            key: key.clone(),
            value: value.clone(),
        })?;
        writeln!(temp, "{serialized}")?;
    }
    temp.flush()?;

    temp.persist(path)
        .map_err(|err| anyhow!("failed to persist {}: {}", path.display(), err))?;

    Ok(())
}
