//! Flat key-value settings.
//!
//! A [`KeyValueSuite`] is a named, string-keyed store of JSON values.
//! [`SettingsService`] puts typed access and diagnostics on top; it has no
//! quota and no volatile cache.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::fs;
use tracing::debug;

use crate::config::{SearchPath, ROOT_DIR_NAME};
use crate::diagnostics::{Action, Diagnostics, TierKind};
use crate::error::{StowageError, StowageResult};
use crate::sanitize::sanitize;

/// Suite name used when none is given.
pub const DEFAULT_SUITE: &str = "standard";

#[async_trait]
pub trait KeyValueSuite: Send + Sync {
    fn name(&self) -> &str;

    async fn get(&self, key: &str) -> StowageResult<Option<Value>>;

    async fn set(&self, key: &str, value: Value) -> StowageResult<()>;

    /// Removing an absent key is not an error.
    async fn remove(&self, key: &str) -> StowageResult<()>;
}

/// Suite held in memory only.
#[derive(Debug, Default)]
pub struct MemorySuite {
    name: String,
    values: Mutex<BTreeMap<String, Value>>,
}

impl MemorySuite {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            values: Mutex::default(),
        }
    }
}

#[async_trait]
impl KeyValueSuite for MemorySuite {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &str) -> StowageResult<Option<Value>> {
        Ok(self
            .values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned())
    }

    async fn set(&self, key: &str, value: Value) -> StowageResult<()> {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> StowageResult<()> {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        Ok(())
    }
}

/// Suite persisted as one JSON document, rewritten atomically on change.
#[derive(Debug)]
pub struct FileSuite {
    name: String,
    path: PathBuf,
    // Serializes read-modify-write of the document.
    values: tokio::sync::Mutex<BTreeMap<String, Value>>,
}

impl FileSuite {
    /// Open the document at `path`; a missing file is an empty suite.
    pub async fn open(name: &str, path: impl Into<PathBuf>) -> StowageResult<Self> {
        let path = path.into();
        let values = match fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| StowageError::KeyValue {
                message: format!("suite '{name}' at {} is not a JSON object: {e}", path.display()),
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(StowageError::io(&path, e)),
        };
        debug!(suite = name, path = %path.display(), "opened key-value suite");
        Ok(Self {
            name: name.to_string(),
            path,
            values: tokio::sync::Mutex::new(values),
        })
    }

    /// Open suite `name` at `<base>/stowage/settings/<name>.json`.
    pub async fn for_suite(location: &SearchPath, name: &str) -> StowageResult<Self> {
        let file = sanitize(name);
        if file.is_empty() {
            return Err(StowageError::Resolution {
                message: format!("suite name '{name}' is empty after sanitization"),
            });
        }
        let path = location
            .resolve()?
            .join(ROOT_DIR_NAME)
            .join("settings")
            .join(format!("{file}.json"));
        Self::open(name, path).await
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, values: &BTreeMap<String, Value>) -> StowageResult<()> {
        let bytes = serde_json::to_vec_pretty(values).map_err(|e| StowageError::KeyValue {
            message: format!("suite '{}': {e}", self.name),
        })?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| StowageError::io(parent, e))?;
        }
        let temp_path = self.path.with_extension("json.tmp");
        fs::write(&temp_path, &bytes)
            .await
            .map_err(|e| StowageError::io(&temp_path, e))?;
        if let Err(e) = fs::rename(&temp_path, &self.path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(StowageError::io(&self.path, e));
        }
        Ok(())
    }
}

#[async_trait]
impl KeyValueSuite for FileSuite {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &str) -> StowageResult<Option<Value>> {
        Ok(self.values.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> StowageResult<()> {
        let mut values = self.values.lock().await;
        let previous = values.insert(key.to_string(), value);
        if let Err(err) = self.persist(&values).await {
            // Keep memory in step with what is on disk.
            match previous {
                Some(previous) => values.insert(key.to_string(), previous),
                None => values.remove(key),
            };
            return Err(err);
        }
        Ok(())
    }

    async fn remove(&self, key: &str) -> StowageResult<()> {
        let mut values = self.values.lock().await;
        let Some(previous) = values.remove(key) else {
            return Ok(());
        };
        if let Err(err) = self.persist(&values).await {
            values.insert(key.to_string(), previous);
            return Err(err);
        }
        Ok(())
    }
}

/// Typed settings over a suite.
#[derive(Debug)]
pub struct SettingsService<S> {
    suite: S,
    diagnostics: Diagnostics,
}

impl<S: KeyValueSuite> SettingsService<S> {
    pub fn new(suite: S) -> Self {
        Self {
            suite,
            diagnostics: Diagnostics::default(),
        }
    }

    pub fn with_diagnostics(mut self, diagnostics: Diagnostics) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    pub fn suite(&self) -> &S {
        &self.suite
    }

    fn emit(&self, action: Action, key: &str, error: Option<&StowageError>) {
        self.diagnostics.emit(
            action,
            TierKind::KeyValue,
            self.suite.name(),
            key,
            error.map(|e| e as &dyn std::fmt::Display),
        );
    }

    fn check_key(key: &str) -> StowageResult<String> {
        let sanitized = sanitize(key);
        if sanitized.is_empty() {
            return Err(StowageError::InvalidKey {
                key: key.to_string(),
            });
        }
        Ok(sanitized)
    }

    /// Absent keys are `NotFound`; values of another shape are `InvalidData`.
    pub async fn value<T: DeserializeOwned>(&self, key: &str) -> StowageResult<T> {
        let key = Self::check_key(key)?;
        let Some(value) = self.suite.get(&key).await? else {
            self.emit(Action::NotFound, &key, None);
            return Err(StowageError::NotFound {
                boundary: self.suite.name().to_string(),
                key,
            });
        };
        match serde_json::from_value(value) {
            Ok(value) => {
                self.emit(Action::Read, &key, None);
                Ok(value)
            }
            Err(e) => {
                let err = StowageError::InvalidData {
                    message: format!("setting '{key}': {e}"),
                };
                self.emit(Action::Read, &key, Some(&err));
                Err(err)
            }
        }
    }

    pub async fn set<T: Serialize + ?Sized + Sync>(&self, key: &str, value: &T) -> StowageResult<()> {
        let key = Self::check_key(key)?;
        let value = serde_json::to_value(value).map_err(|e| StowageError::Conversion {
            message: format!("setting '{key}': {e}"),
        })?;
        let result = self.suite.set(&key, value).await;
        self.emit(Action::Write, &key, result.as_ref().err());
        result
    }

    pub async fn remove(&self, key: &str) -> StowageResult<()> {
        let key = Self::check_key(key)?;
        let result = self.suite.remove(&key).await;
        self.emit(Action::Delete, &key, result.as_ref().err());
        result
    }
}

impl SettingsService<MemorySuite> {
    /// In-memory settings under the default suite name.
    pub fn in_memory() -> Self {
        Self::new(MemorySuite::new(DEFAULT_SUITE))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::sync::Arc;
    use tempfile::TempDir;

    use crate::diagnostics::{DiagnosticsFilter, MemorySink};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Window {
        width: u32,
        height: u32,
    }

    #[tokio::test]
    async fn test_typed_values() {
        let settings = SettingsService::in_memory();
        assert_eq!(settings.suite().name(), "standard");

        settings.set("Dark Mode", &true).await.unwrap();
        settings
            .set("window", &Window { width: 800, height: 600 })
            .await
            .unwrap();

        assert!(settings.value::<bool>("dark_mode").await.unwrap());
        assert_eq!(
            settings.value::<Window>("window").await.unwrap(),
            Window { width: 800, height: 600 }
        );
    }

    #[tokio::test]
    async fn test_absent_and_mistyped() {
        let settings = SettingsService::in_memory();
        settings.set("count", "three").await.unwrap();

        assert!(settings
            .value::<u32>("missing")
            .await
            .unwrap_err()
            .is_not_found());
        assert!(matches!(
            settings.value::<u32>("count").await,
            Err(StowageError::InvalidData { .. })
        ));
        assert!(matches!(
            settings.value::<u32>("???").await,
            Err(StowageError::InvalidKey { .. })
        ));
    }

    #[tokio::test]
    async fn test_remove() {
        let settings = SettingsService::in_memory();
        settings.set("token", "abc").await.unwrap();
        settings.remove("token").await.unwrap();
        settings.remove("token").await.unwrap();

        assert!(settings
            .value::<String>("token")
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn test_file_suite_persists() {
        let temp_dir = TempDir::new().unwrap();
        let location = SearchPath::Custom(temp_dir.path().to_path_buf());

        let settings = SettingsService::new(FileSuite::for_suite(&location, "standard").await.unwrap());
        settings.set("volume", &7u8).await.unwrap();
        settings.set("muted", &false).await.unwrap();
        settings.remove("muted").await.unwrap();
        let path = settings.suite().path().to_path_buf();
        drop(settings);

        assert!(path.ends_with("stowage/settings/standard.json"));
        let reopened = SettingsService::new(FileSuite::open("standard", &path).await.unwrap());
        assert_eq!(reopened.value::<u8>("volume").await.unwrap(), 7);
        assert!(reopened
            .value::<bool>("muted")
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn test_corrupt_document() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("broken.json");
        std::fs::write(&path, b"[1, 2").unwrap();

        let err = FileSuite::open("broken", &path).await.unwrap_err();
        assert!(matches!(err, StowageError::KeyValue { .. }));
    }

    #[tokio::test]
    async fn test_diagnostics_use_key_value_tier() {
        let sink = Arc::new(MemorySink::new());
        let settings = SettingsService::in_memory()
            .with_diagnostics(Diagnostics::new(sink.clone(), DiagnosticsFilter::all()));

        settings.set("a", &1).await.unwrap();
        let _ = settings.value::<i32>("b").await;

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.tier == TierKind::KeyValue));
        assert_eq!(events[0].boundary, "standard");
        assert_eq!(events[1].action, Action::NotFound);
    }
}
