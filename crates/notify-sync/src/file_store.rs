//! File-backed local store
//!
//! All keys live in one JSON object on disk. Writes go to a sibling temp
//! file which is then renamed over the original, so a crash mid-write leaves
//! either the old or the new document, never a torn one.

use crate::error::LocalStoreError;
use crate::store::LocalStore;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// Local store persisted as a single JSON file
#[derive(Debug)]
pub struct FileLocalStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileLocalStore {
    /// Store at `path`; the file is created on first write
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Backing file path
    #[inline]
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self) -> Result<Map<String, Value>, LocalStoreError> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Map::new()),
            Err(e) => return Err(e.into()),
        };
        if text.trim().is_empty() {
            return Ok(Map::new());
        }
        match serde_json::from_str::<Value>(&text)? {
            Value::Object(map) => Ok(map),
            other => Err(LocalStoreError::Unavailable(format!(
                "{} holds {} instead of an object",
                self.path.display(),
                json_kind(&other)
            ))),
        }
    }

    async fn write_all(&self, map: &Map<String, Value>) -> Result<(), LocalStoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let bytes = serde_json::to_vec_pretty(map)?;
        let temp = self.path.with_extension("json.tmp");
        tokio::fs::write(&temp, &bytes).await?;
        tokio::fs::rename(&temp, &self.path).await?;
        tracing::trace!(path = %self.path.display(), bytes = bytes.len(), "local store written");
        Ok(())
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[async_trait]
impl LocalStore for FileLocalStore {
    async fn get(&self, key: &str) -> Result<Option<String>, LocalStoreError> {
        let map = self.read_all().await?;
        Ok(match map.get(key) {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Null) | None => None,
            // tolerate hand-edited files holding raw JSON
            Some(other) => Some(other.to_string()),
        })
    }

    async fn set(&self, key: &str, value: String) -> Result<(), LocalStoreError> {
        let _guard = self.write_lock.lock().await;
        let mut map = self.read_all().await?;
        map.insert(key.to_string(), Value::String(value));
        self.write_all(&map).await
    }

    async fn remove(&self, key: &str) -> Result<(), LocalStoreError> {
        let _guard = self.write_lock.lock().await;
        let mut map = self.read_all().await?;
        if map.remove(key).is_some() {
            self.write_all(&map).await?;
        }
        Ok(())
    }
}
