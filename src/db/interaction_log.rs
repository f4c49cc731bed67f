use std::fs::File;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tokio::sync::{Mutex, RwLock};

use crate::error::{AppError, AppResult};
use crate::models::Interaction;

/// Append-only durable record of interactions
///
/// Readers always observe a complete snapshot of what has been flushed so far;
/// an absent log reads as empty.
#[async_trait::async_trait]
pub trait InteractionLog: Send + Sync {
    /// Reads every flushed row, in append order
    async fn read_all(&self) -> AppResult<Vec<Interaction>>;

    /// Merges `rows` after the existing contents and persists the result
    async fn append(&self, rows: Vec<Interaction>) -> AppResult<()>;

    /// Removes the log entirely
    async fn reset(&self) -> AppResult<()>;
}

/// Interaction log kept as a CSV file
///
/// Every write replaces the whole file through a sibling temp file and a
/// rename, so a concurrent reader never sees a torn file.
pub struct CsvInteractionLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl CsvInteractionLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_file(path: &Path) -> AppResult<Vec<Interaction>> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut reader = csv::Reader::from_reader(file);
        let mut rows = Vec::new();
        for row in reader.deserialize::<Interaction>() {
            rows.push(row?);
        }
        Ok(rows)
    }

    fn replace_file(path: &Path, rows: &[Interaction]) -> AppResult<()> {
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;

        let mut tmp = NamedTempFile::new_in(&dir)?;
        {
            let mut writer = csv::Writer::from_writer(tmp.as_file_mut());
            for row in rows {
                writer.serialize(row)?;
            }
            writer.flush()?;
        }
        tmp.as_file_mut().flush()?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| AppError::Io(e.error))?;
        Ok(())
    }
}

async fn blocking<T, F>(f: F) -> AppResult<T>
where
    F: FnOnce() -> AppResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AppError::Internal(format!("interaction log task failed: {}", e)))?
}

#[async_trait::async_trait]
impl InteractionLog for CsvInteractionLog {
    async fn read_all(&self) -> AppResult<Vec<Interaction>> {
        let path = self.path.clone();
        blocking(move || Self::read_file(&path)).await
    }

    async fn append(&self, rows: Vec<Interaction>) -> AppResult<()> {
        if rows.is_empty() {
            return Ok(());
        }

        let _guard = self.write_lock.lock().await;
        let path = self.path.clone();
        let appended = rows.len();

        let total = blocking(move || {
            let mut merged = Self::read_file(&path)?;
            merged.extend(rows);
            Self::replace_file(&path, &merged)?;
            Ok(merged.len())
        })
        .await?;

        tracing::debug!(appended, total, path = %self.path.display(), "Interaction log replaced");
        Ok(())
    }

    async fn reset(&self) -> AppResult<()> {
        let _guard = self.write_lock.lock().await;
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                tracing::info!(path = %self.path.display(), "Removed interaction log");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Interaction log held in memory, for tests and ephemeral runs
#[derive(Default)]
pub struct MemoryInteractionLog {
    rows: RwLock<Vec<Interaction>>,
}

impl MemoryInteractionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rows(rows: Vec<Interaction>) -> Self {
        Self {
            rows: RwLock::new(rows),
        }
    }
}

#[async_trait::async_trait]
impl InteractionLog for MemoryInteractionLog {
    async fn read_all(&self) -> AppResult<Vec<Interaction>> {
        Ok(self.rows.read().await.clone())
    }

    async fn append(&self, rows: Vec<Interaction>) -> AppResult<()> {
        self.rows.write().await.extend(rows);
        Ok(())
    }

    async fn reset(&self) -> AppResult<()> {
        self.rows.write().await.clear();
        Ok(())
    }
}
