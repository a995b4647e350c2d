//! Persistent storage for finished sessions and parameter templates.

use crate::optimizer::session::OptimizationSession;
use crate::optimizer::templates::ParameterTemplate;
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

/// Store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem failure.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Stored record could not be encoded.
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// A template with this name already exists.
    #[error("Template '{name}' already exists for tool '{tool}'")]
    Duplicate {
        /// Tool name.
        tool: String,
        /// Template name.
        name: String,
    },
}

impl StoreError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io { path: path.to_path_buf(), source }
    }
}

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Storage contract for session history and templates.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Inserts or replaces a session.
    async fn save_session(&self, session: &OptimizationSession) -> StoreResult<()>;

    /// Loads one session.
    async fn get_session(&self, session_id: &str) -> StoreResult<Option<OptimizationSession>>;

    /// Sessions of a project, oldest first.
    async fn sessions_for_project(&self, project_id: &str) -> StoreResult<Vec<OptimizationSession>>;

    /// Sessions for a tool across all projects, oldest first.
    async fn sessions_for_tool(&self, tool_name: &str) -> StoreResult<Vec<OptimizationSession>>;

    /// Stores a template.
    ///
    /// # Returns
    /// Returns `true` if an existing template was replaced.
    ///
    /// # Errors
    /// Returns `StoreError::Duplicate` if the name is taken and `overwrite` is false.
    async fn put_template(&self, template: &ParameterTemplate, overwrite: bool) -> StoreResult<bool>;

    /// Loads one template.
    async fn get_template(&self, tool_name: &str, name: &str) -> StoreResult<Option<ParameterTemplate>>;

    /// Templates for a tool, ordered by name.
    async fn templates_for_tool(&self, tool_name: &str) -> StoreResult<Vec<ParameterTemplate>>;
}

fn sort_sessions(sessions: &mut [OptimizationSession]) {
    sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.session_id.cmp(&b.session_id)));
}

/// In-memory store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    sessions: RwLock<HashMap<String, OptimizationSession>>,
    templates: RwLock<HashMap<(String, String), ParameterTemplate>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    async fn sessions_where(&self, predicate: impl Fn(&OptimizationSession) -> bool) -> Vec<OptimizationSession> {
        let mut sessions: Vec<_> = self.sessions.read().await.values().filter(|s| predicate(s)).cloned().collect();
        sort_sessions(&mut sessions);
        sessions
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn save_session(&self, session: &OptimizationSession) -> StoreResult<()> {
        self.sessions.write().await.insert(session.session_id.clone(), session.clone());
        Ok(())
    }

    async fn get_session(&self, session_id: &str) -> StoreResult<Option<OptimizationSession>> {
        Ok(self.sessions.read().await.get(session_id).cloned())
    }

    async fn sessions_for_project(&self, project_id: &str) -> StoreResult<Vec<OptimizationSession>> {
        Ok(self.sessions_where(|s| s.project_id == project_id).await)
    }

    async fn sessions_for_tool(&self, tool_name: &str) -> StoreResult<Vec<OptimizationSession>> {
        Ok(self.sessions_where(|s| s.tool_name == tool_name).await)
    }

    async fn put_template(&self, template: &ParameterTemplate, overwrite: bool) -> StoreResult<bool> {
        let key = (template.tool_name.clone(), template.name.clone());
        let mut templates = self.templates.write().await;
        if templates.contains_key(&key) && !overwrite {
            return Err(StoreError::Duplicate { tool: key.0, name: key.1 });
        }
        Ok(templates.insert(key, template.clone()).is_some())
    }

    async fn get_template(&self, tool_name: &str, name: &str) -> StoreResult<Option<ParameterTemplate>> {
        Ok(self.templates.read().await.get(&(tool_name.to_string(), name.to_string())).cloned())
    }

    async fn templates_for_tool(&self, tool_name: &str) -> StoreResult<Vec<ParameterTemplate>> {
        let mut templates: Vec<_> =
            self.templates.read().await.values().filter(|t| t.tool_name == tool_name).cloned().collect();
        templates.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(templates)
    }
}

/// Directory-backed store.
///
/// Layout: `sessions/<session_id>.json` and `templates/<tool>/<name>.json`,
/// with each id percent-encoded so distinct ids never share a file. Every
/// write goes to a temporary file that is then renamed into place.
#[derive(Debug)]
pub struct JsonFileStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    /// Creates a store rooted at `root`. Directories are created on first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), write_lock: Mutex::new(()) }
    }

    /// Root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn sessions_dir(&self) -> PathBuf {
        self.root.join("sessions")
    }

    fn template_path(&self, tool_name: &str, name: &str) -> PathBuf {
        self.root.join("templates").join(file_stem(tool_name)).join(format!("{}.json", file_stem(name)))
    }

    async fn atomic_write<T: Serialize + Sync>(&self, path: &Path, value: &T) -> StoreResult<()> {
        let json = serde_json::to_vec_pretty(value)?;
        let parent = path.parent().unwrap_or(&self.root);
        fs::create_dir_all(parent).await.map_err(|e| StoreError::io(parent, e))?;

        let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("record");
        let temp_path = parent.join(format!("{stem}.tmp.{}", Uuid::new_v4()));
        if let Err(e) = fs::write(&temp_path, &json).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(StoreError::io(&temp_path, e));
        }
        if let Err(e) = fs::rename(&temp_path, path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(StoreError::io(path, e));
        }
        debug!(path = %path.display(), "Record written");
        Ok(())
    }

    async fn read_one<T: DeserializeOwned>(path: &Path) -> StoreResult<Option<T>> {
        match fs::read(path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::io(path, e)),
        }
    }

    /// Reads every `*.json` record in a directory, skipping unreadable ones.
    async fn read_all<T: DeserializeOwned>(dir: &Path) -> StoreResult<Vec<T>> {
        let mut entries = match fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::io(dir, e)),
        };

        let mut records = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| StoreError::io(dir, e))? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match Self::read_one(&path).await {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable record"),
            }
        }
        Ok(records)
    }

    async fn all_sessions(&self) -> StoreResult<Vec<OptimizationSession>> {
        let mut sessions: Vec<OptimizationSession> = Self::read_all(&self.sessions_dir()).await?;
        sort_sessions(&mut sessions);
        Ok(sessions)
    }
}

/// Maps an identifier to a file name component, one-to-one.
///
/// ASCII alphanumerics, `-` and `_` are kept; every other byte becomes `%XX`.
/// The empty id maps to `%`, which no other id can produce.
fn file_stem(id: &str) -> String {
    if id.is_empty() {
        return "%".to_string();
    }
    let mut stem = String::with_capacity(id.len());
    for byte in id.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            stem.push(char::from(byte));
        } else {
            stem.push_str(&format!("%{byte:02X}"));
        }
    }
    stem
}

#[async_trait]
impl SessionStore for JsonFileStore {
    async fn save_session(&self, session: &OptimizationSession) -> StoreResult<()> {
        let path = self.sessions_dir().join(format!("{}.json", file_stem(&session.session_id)));
        let _guard = self.write_lock.lock().await;
        self.atomic_write(&path, session).await
    }

    async fn get_session(&self, session_id: &str) -> StoreResult<Option<OptimizationSession>> {
        Self::read_one(&self.sessions_dir().join(format!("{}.json", file_stem(session_id)))).await
    }

    async fn sessions_for_project(&self, project_id: &str) -> StoreResult<Vec<OptimizationSession>> {
        Ok(self.all_sessions().await?.into_iter().filter(|s| s.project_id == project_id).collect())
    }

    async fn sessions_for_tool(&self, tool_name: &str) -> StoreResult<Vec<OptimizationSession>> {
        Ok(self.all_sessions().await?.into_iter().filter(|s| s.tool_name == tool_name).collect())
    }

    async fn put_template(&self, template: &ParameterTemplate, overwrite: bool) -> StoreResult<bool> {
        let path = self.template_path(&template.tool_name, &template.name);
        let _guard = self.write_lock.lock().await;
        let exists = fs::try_exists(&path).await.map_err(|e| StoreError::io(&path, e))?;
        if exists && !overwrite {
            return Err(StoreError::Duplicate { tool: template.tool_name.clone(), name: template.name.clone() });
        }
        self.atomic_write(&path, template).await?;
        Ok(exists)
    }

    async fn get_template(&self, tool_name: &str, name: &str) -> StoreResult<Option<ParameterTemplate>> {
        Self::read_one(&self.template_path(tool_name, name)).await
    }

    async fn templates_for_tool(&self, tool_name: &str) -> StoreResult<Vec<ParameterTemplate>> {
        let dir = self.root.join("templates").join(file_stem(tool_name));
        let mut templates: Vec<ParameterTemplate> = Self::read_all(&dir).await?;
        templates.retain(|t| t.tool_name == tool_name);
        templates.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(templates)
    }
}
