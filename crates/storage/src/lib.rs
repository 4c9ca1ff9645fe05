//! SQLite store for benchmark results.

use llmbench_benchmark::{BenchmarkResult, ResultRepository};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    DatabaseError(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("not found: {0}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, StorageError>;

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open or create the database at `path`, creating parent directories.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Self {
            conn: Mutex::new(Connection::open(path)?),
        };
        db.init_schema()?;
        tracing::debug!(path = ?path, "results database opened");
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let db = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        db.init_schema()?;
        Ok(db)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn().execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS results (
                model_name TEXT PRIMARY KEY,
                saved_at INTEGER NOT NULL,
                result_json TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_results_saved_at ON results(saved_at);
            "#,
        )?;
        Ok(())
    }

    /// Remove every stored result. Returns how many were removed.
    pub fn clear(&self) -> Result<usize> {
        let removed = self.conn().execute("DELETE FROM results", [])?;
        tracing::info!(removed, "stored results cleared");
        Ok(removed)
    }
}

impl ResultRepository for Database {
    type Error = StorageError;

    fn save(&self, result: &BenchmarkResult) -> Result<()> {
        let json = serde_json::to_string(result)?;
        self.conn().execute(
            "INSERT OR REPLACE INTO results (model_name, saved_at, result_json) VALUES (?1, ?2, ?3)",
            (
                result.model_name(),
                chrono::Utc::now().timestamp_millis(),
                json,
            ),
        )?;
        tracing::debug!(model = %result.model_name(), "result saved");
        Ok(())
    }

    fn get(&self, model_name: &str) -> Result<BenchmarkResult> {
        let json: String = self
            .conn()
            .query_row(
                "SELECT result_json FROM results WHERE model_name = ?1",
                [model_name],
                |row| row.get(0),
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => {
                    StorageError::NotFound(format!("result {model_name}"))
                }
                other => StorageError::DatabaseError(other),
            })?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Results in the order they were saved. Rows that no longer parse are
    /// skipped.
    fn list(&self) -> Result<Vec<BenchmarkResult>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT result_json FROM results ORDER BY saved_at, rowid")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut results = Vec::new();
        for row in rows {
            let json = row?;
            match serde_json::from_str(&json) {
                Ok(result) => results.push(result),
                Err(e) => tracing::warn!(error = %e, "skipping unreadable result row"),
            }
        }
        Ok(results)
    }

    fn delete(&self, model_name: &str) -> Result<()> {
        let affected = self
            .conn()
            .execute("DELETE FROM results WHERE model_name = ?1", [model_name])?;
        if affected == 0 {
            return Err(StorageError::NotFound(format!("result {model_name}")));
        }
        Ok(())
    }
}
