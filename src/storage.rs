//! Session-scoped persistence: threads, job state, and reports.
//!
//! Everything is keyed by session id. Thread payloads are serialized JSON
//! blobs beside an `analyzed` flag so re-runs can select the not-yet-analyzed
//! remainder without deserializing the whole session.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use std::path::Path;
use tracing::info;

use crate::error::Result;
use crate::types::{JobState, Report, Thread, ThreadSummary};

struct Migration {
    version: i32,
    name: &'static str,
    sql: &'static str,
}

fn migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        name: "initial_schema",
        sql: include_str!("../migrations/001_initial_schema.sql"),
    }]
}

#[async_trait]
pub trait Storage: Send + Sync {
    /// Insert or update threads in input order. The `analyzed` flag of a
    /// thread that already exists is preserved.
    async fn save_threads(&self, session_id: &str, threads: &[Thread]) -> Result<()>;
    async fn load_threads(&self, session_id: &str) -> Result<Vec<Thread>>;
    async fn load_thread(&self, session_id: &str, thread_id: &str) -> Result<Option<Thread>>;
    async fn list_threads(
        &self,
        session_id: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<ThreadSummary>>;
    async fn load_unanalyzed_threads(&self, session_id: &str) -> Result<Vec<Thread>>;
    async fn mark_analyzed(&self, session_id: &str, thread_ids: &[String]) -> Result<()>;
    async fn count_threads(&self, session_id: &str) -> Result<(usize, usize)>;

    async fn save_job_state(&self, state: &JobState) -> Result<()>;
    async fn load_job_state(&self, session_id: &str) -> Result<Option<JobState>>;

    async fn save_report(&self, session_id: &str, report: &Report) -> Result<()>;
    async fn load_report(&self, session_id: &str) -> Result<Option<Report>>;
}

pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    pub async fn new(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
        info!("Opening storage at {}", db_path.display());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&db_url)
            .await?;
        Self::run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    /// In-memory database, mostly for tests. A single connection keeps every
    /// query on the same in-memory instance.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Self::run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    async fn run_migrations(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                applied_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(pool)
        .await?;

        let applied: Vec<i32> = sqlx::query("SELECT version FROM schema_migrations")
            .fetch_all(pool)
            .await?
            .into_iter()
            .map(|row| row.get("version"))
            .collect();

        for migration in migrations() {
            if !applied.contains(&migration.version) {
                info!("Applying migration {}: {}", migration.version, migration.name);
                let mut tx = pool.begin().await?;
                sqlx::raw_sql(migration.sql).execute(&mut *tx).await?;
                sqlx::query("INSERT INTO schema_migrations (version, name) VALUES (?, ?)")
                    .bind(migration.version)
                    .bind(migration.name)
                    .execute(&mut *tx)
                    .await?;
                tx.commit().await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn save_threads(&self, session_id: &str, threads: &[Thread]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for (position, thread) in threads.iter().enumerate() {
            let data = serde_json::to_string(thread)?;
            sqlx::query(
                r#"
                INSERT INTO threads (session_id, thread_id, position, data)
                VALUES (?, ?, ?, ?)
                ON CONFLICT (session_id, thread_id)
                DO UPDATE SET position = excluded.position, data = excluded.data
                "#,
            )
            .bind(session_id)
            .bind(&thread.id)
            .bind(position as i64)
            .bind(data)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn load_threads(&self, session_id: &str) -> Result<Vec<Thread>> {
        let rows = sqlx::query(
            "SELECT data FROM threads WHERE session_id = ? ORDER BY position",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| Ok(serde_json::from_str(&row.get::<String, _>("data"))?))
            .collect()
    }

    async fn load_thread(&self, session_id: &str, thread_id: &str) -> Result<Option<Thread>> {
        let row = sqlx::query(
            "SELECT data FROM threads WHERE session_id = ? AND thread_id = ?",
        )
        .bind(session_id)
        .bind(thread_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(serde_json::from_str(&row.get::<String, _>("data"))?)),
            None => Ok(None),
        }
    }

    async fn list_threads(
        &self,
        session_id: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<ThreadSummary>> {
        let rows = sqlx::query(
            r#"
            SELECT data, analyzed FROM threads
            WHERE session_id = ?
            ORDER BY position
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(session_id)
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let thread: Thread = serde_json::from_str(&row.get::<String, _>("data"))?;
                Ok(ThreadSummary {
                    id: thread.id.clone(),
                    title: thread.title.clone(),
                    status: thread.status,
                    message_count: thread.message_count(),
                    first_message_time: thread.first_message_time.clone(),
                    last_message_time: thread.last_message_time.clone(),
                    preview: thread.preview(),
                    analyzed: row.get::<i64, _>("analyzed") != 0,
                })
            })
            .collect()
    }

    async fn load_unanalyzed_threads(&self, session_id: &str) -> Result<Vec<Thread>> {
        let rows = sqlx::query(
            r#"
            SELECT data FROM threads
            WHERE session_id = ? AND analyzed = 0
            ORDER BY position
            "#,
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| Ok(serde_json::from_str(&row.get::<String, _>("data"))?))
            .collect()
    }

    async fn mark_analyzed(&self, session_id: &str, thread_ids: &[String]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for thread_id in thread_ids {
            sqlx::query(
                "UPDATE threads SET analyzed = 1 WHERE session_id = ? AND thread_id = ?",
            )
            .bind(session_id)
            .bind(thread_id)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn count_threads(&self, session_id: &str) -> Result<(usize, usize)> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS total, COALESCE(SUM(analyzed), 0) AS analyzed
            FROM threads WHERE session_id = ?
            "#,
        )
        .bind(session_id)
        .fetch_one(&self.pool)
        .await?;
        Ok((
            row.get::<i64, _>("total") as usize,
            row.get::<i64, _>("analyzed") as usize,
        ))
    }

    async fn save_job_state(&self, state: &JobState) -> Result<()> {
        let data = serde_json::to_string(state)?;
        sqlx::query(
            r#"
            INSERT INTO job_states (session_id, data, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT (session_id)
            DO UPDATE SET data = excluded.data, updated_at = excluded.updated_at
            "#,
        )
        .bind(&state.session_id)
        .bind(data)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_job_state(&self, session_id: &str) -> Result<Option<JobState>> {
        let row = sqlx::query("SELECT data FROM job_states WHERE session_id = ?")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(Some(serde_json::from_str(&row.get::<String, _>("data"))?)),
            None => Ok(None),
        }
    }

    async fn save_report(&self, session_id: &str, report: &Report) -> Result<()> {
        let data = serde_json::to_string(report)?;
        sqlx::query(
            r#"
            INSERT INTO reports (session_id, data, generated_at)
            VALUES (?, ?, ?)
            ON CONFLICT (session_id)
            DO UPDATE SET data = excluded.data, generated_at = excluded.generated_at
            "#,
        )
        .bind(session_id)
        .bind(data)
        .bind(report.generated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_report(&self, session_id: &str) -> Result<Option<Report>> {
        let row = sqlx::query("SELECT data FROM reports WHERE session_id = ?")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(Some(serde_json::from_str(&row.get::<String, _>("data"))?)),
            None => Ok(None),
        }
    }
}
