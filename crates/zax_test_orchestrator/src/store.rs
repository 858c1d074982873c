//! `SQLite` results cache.
//!
//! Remembers, per project and file, how long the last run took and whether
//! it failed. The sequencer reads it to order the next run.

use crate::task::File;
use refinery::embed_migrations;
use rusqlite::{params, Connection};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

embed_migrations!("migrations");

const DB_FILE: &str = "results.sqlite";

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("migration error: {0}")]
    Migration(#[from] refinery::Error),
    #[error("cannot create cache dir {path}: {source}")]
    CacheDir {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Identifies one file within one project.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    pub project: String,
    pub file: PathBuf,
}

impl CacheKey {
    pub fn new(project: impl Into<String>, file: impl Into<PathBuf>) -> Self {
        Self {
            project: project.into(),
            file: file.into(),
        }
    }
}

/// Outcome of the last run of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStats {
    pub duration_ms: u64,
    pub failed: bool,
}

pub struct ResultsCache {
    conn: Connection,
}

impl ResultsCache {
    /// Opens (and migrates) `<cache_dir>/results.sqlite`.
    pub fn open(cache_dir: &Path) -> Result<Self, StoreError> {
        std::fs::create_dir_all(cache_dir).map_err(|source| StoreError::CacheDir {
            path: cache_dir.to_path_buf(),
            source,
        })?;
        let conn = Connection::open(cache_dir.join(DB_FILE))?;
        Self::from_connection(conn)
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(mut conn: Connection) -> Result<Self, StoreError> {
        migrations::runner().run(&mut conn)?;
        Ok(Self { conn })
    }

    /// Upserts the outcome of every file, in one transaction.
    pub fn record(&mut self, files: &[File], now: i64) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO file_results (project, file, duration_ms, failed, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5) \
                 ON CONFLICT (project, file) DO UPDATE SET \
                 duration_ms = excluded.duration_ms, failed = excluded.failed, \
                 updated_at = excluded.updated_at",
            )?;
            for file in files {
                let duration_ms = i64::try_from(file.duration().as_millis()).unwrap_or(i64::MAX);
                stmt.execute(params![
                    file.project_name,
                    file.filepath.to_string_lossy(),
                    duration_ms,
                    file.has_failed(),
                    now
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn load(&self) -> Result<HashMap<CacheKey, FileStats>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT project, file, duration_ms, failed FROM file_results")?;
        let rows = stmt.query_map([], |row| {
            let project: String = row.get(0)?;
            let file: String = row.get(1)?;
            let duration_ms: i64 = row.get(2)?;
            Ok((
                CacheKey::new(project, file),
                FileStats {
                    duration_ms: u64::try_from(duration_ms).unwrap_or(0),
                    failed: row.get(3)?,
                },
            ))
        })?;
        rows.collect::<Result<HashMap<_, _>, _>>()
            .map_err(StoreError::from)
    }

    /// Forgets a file in every project.
    pub fn remove(&self, file: &Path) -> Result<usize, StoreError> {
        Ok(self.conn.execute(
            "DELETE FROM file_results WHERE file = ?1",
            params![file.to_string_lossy()],
        )?)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::task::{create_file_task, TaskError, TaskResult};
    use std::time::Duration;
    use tempfile::tempdir;

    fn file(path: &str, project: &str, millis: u64, failed: bool) -> File {
        let mut file = create_file_task(Path::new(path), Path::new("/ws"), project, "forks");
        file.collect_duration = Some(Duration::from_millis(millis));
        if failed {
            file.result = Some(TaskResult::fail(TaskError::new("Error", "boom")));
        }
        file
    }

    #[test]
    fn open_creates_database_and_migrates() {
        let dir = tempdir().unwrap();
        let cache_dir = dir.path().join("nested/cache");
        let cache = ResultsCache::open(&cache_dir).unwrap();
        assert!(cache_dir.join(DB_FILE).exists());
        assert!(cache.load().unwrap().is_empty());

        // Reopening runs no migration twice.
        drop(cache);
        ResultsCache::open(&cache_dir).unwrap();
    }

    #[test]
    fn record_upserts_per_project() {
        let mut cache = ResultsCache::in_memory().unwrap();
        cache
            .record(
                &[
                    file("/ws/a.test.ts", "", 40, false),
                    file("/ws/a.test.ts", "browser", 90, true),
                ],
                1,
            )
            .unwrap();
        cache.record(&[file("/ws/a.test.ts", "", 10, true)], 2).unwrap();

        let stats = cache.load().unwrap();
        assert_eq!(stats.len(), 2);
        assert_eq!(
            stats[&CacheKey::new("", "/ws/a.test.ts")],
            FileStats { duration_ms: 10, failed: true }
        );
        assert_eq!(stats[&CacheKey::new("browser", "/ws/a.test.ts")].duration_ms, 90);
    }

    #[test]
    fn remove_forgets_file_everywhere() {
        let mut cache = ResultsCache::in_memory().unwrap();
        cache
            .record(
                &[
                    file("/ws/a.test.ts", "", 1, false),
                    file("/ws/a.test.ts", "browser", 1, false),
                    file("/ws/b.test.ts", "", 1, false),
                ],
                1,
            )
            .unwrap();

        assert_eq!(cache.remove(Path::new("/ws/a.test.ts")).unwrap(), 2);
        let stats = cache.load().unwrap();
        assert_eq!(stats.len(), 1);
        assert!(stats.contains_key(&CacheKey::new("", "/ws/b.test.ts")));
    }
}
