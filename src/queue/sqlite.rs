//! Fila durável em SQLite.
//!
//! Um job recebido fica invisível durante o timeout de visibilidade. Se o
//! worker morrer antes de confirmar, o job volta a aparecer e é entregue
//! de novo, com o contador de tentativas incrementado.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::Mutex;

use crate::store::format_timestamp;
use crate::CacheFieldResult;

use super::{Delivery, JobSource, RecalculationJob, Received, TaskQueue};

const JOBS_TABLE: &str = "cachefield_jobs";

/// Job pendente na fila durável.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedJob {
    pub id: i64,
    pub job: RecalculationJob,
    pub attempts: u32,
    pub enqueued_at: String,
    pub visible_at: String,
}

/// Fila SQLite (tabela `cachefield_jobs`).
pub struct SqliteQueue {
    conn: Mutex<Connection>,
    visibility_timeout: Duration,
}

impl SqliteQueue {
    /// Abre a fila no banco informado, criando a tabela se necessário.
    pub fn open(db_path: &Path, visibility_timeout: Duration) -> CacheFieldResult<Self> {
        let conn = Connection::open(db_path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Self::from_connection(conn, visibility_timeout)
    }

    /// Fila em memória.
    pub fn in_memory(visibility_timeout: Duration) -> CacheFieldResult<Self> {
        Self::from_connection(Connection::open_in_memory()?, visibility_timeout)
    }

    pub fn from_connection(conn: Connection, visibility_timeout: Duration) -> CacheFieldResult<Self> {
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {JOBS_TABLE} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                job_id TEXT NOT NULL,
                store_kind TEXT NOT NULL,
                record_kind TEXT NOT NULL,
                record_id INTEGER NOT NULL,
                attempts INTEGER NOT NULL DEFAULT 0,
                enqueued_at TEXT NOT NULL,
                visible_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_{JOBS_TABLE}_visible ON {JOBS_TABLE}(visible_at);"
        ))?;

        Ok(Self {
            conn: Mutex::new(conn),
            visibility_timeout,
        })
    }

    /// Número de jobs na fila (visíveis ou não).
    pub async fn len(&self) -> CacheFieldResult<usize> {
        let conn = self.conn.lock().await;
        let count: i64 =
            conn.query_row(&format!("SELECT COUNT(*) FROM {JOBS_TABLE}"), [], |row| {
                row.get(0)
            })?;
        Ok(count as usize)
    }

    pub async fn is_empty(&self) -> CacheFieldResult<bool> {
        Ok(self.len().await? == 0)
    }

    /// Lista até `limit` jobs, mais antigos primeiro.
    pub async fn pending(&self, limit: usize) -> CacheFieldResult<Vec<QueuedJob>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT id, job_id, store_kind, record_kind, record_id, attempts, enqueued_at, visible_at
             FROM {JOBS_TABLE} ORDER BY id LIMIT ?1"
        ))?;

        let jobs = stmt
            .query_map(params![limit as i64], |row| {
                Ok(QueuedJob {
                    id: row.get(0)?,
                    job: RecalculationJob {
                        job_id: row.get(1)?,
                        store_kind: row.get(2)?,
                        record_kind: row.get(3)?,
                        record_id: row.get(4)?,
                    },
                    attempts: row.get(5)?,
                    enqueued_at: row.get(6)?,
                    visible_at: row.get(7)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(jobs)
    }

    fn visibility_deadline(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        chrono::Duration::from_std(self.visibility_timeout)
            .ok()
            .and_then(|timeout| now.checked_add_signed(timeout))
            .unwrap_or(now)
    }

    /// Reserva o próximo job visível.
    async fn claim(&self) -> CacheFieldResult<Received> {
        let now = Utc::now();
        let deadline = format_timestamp(&self.visibility_deadline(now));
        let now = format_timestamp(&now);

        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;

        let row = tx
            .query_row(
                &format!(
                    "SELECT id, job_id, store_kind, record_kind, record_id, attempts
                     FROM {JOBS_TABLE} WHERE visible_at <= ?1 ORDER BY id LIMIT 1"
                ),
                params![now],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        RecalculationJob {
                            job_id: row.get(1)?,
                            store_kind: row.get(2)?,
                            record_kind: row.get(3)?,
                            record_id: row.get(4)?,
                        },
                        row.get::<_, u32>(5)?,
                    ))
                },
            )
            .optional()?;

        let Some((id, job, attempts)) = row else {
            return Ok(Received::Idle);
        };

        tx.execute(
            &format!("UPDATE {JOBS_TABLE} SET attempts = attempts + 1, visible_at = ?1 WHERE id = ?2"),
            params![deadline, id],
        )?;
        tx.commit()?;

        Ok(Received::Job(Delivery {
            job,
            attempt: attempts + 1,
            receipt: Some(id),
        }))
    }
}

#[async_trait]
impl TaskQueue for SqliteQueue {
    async fn enqueue(&self, job: RecalculationJob) -> CacheFieldResult<()> {
        let now = format_timestamp(&Utc::now());
        let conn = self.conn.lock().await;
        conn.execute(
            &format!(
                "INSERT INTO {JOBS_TABLE} (job_id, store_kind, record_kind, record_id, attempts, enqueued_at, visible_at)
                 VALUES (?1, ?2, ?3, ?4, 0, ?5, ?5)"
            ),
            params![job.job_id, job.store_kind, job.record_kind, job.record_id, now],
        )?;

        tracing::debug!(
            job_id = %job.job_id,
            store_kind = %job.store_kind,
            record_kind = %job.record_kind,
            record_id = job.record_id,
            "Job enqueued"
        );
        Ok(())
    }
}

#[async_trait]
impl JobSource for SqliteQueue {
    async fn receive(&self) -> CacheFieldResult<Received> {
        self.claim().await
    }

    async fn try_receive(&self) -> CacheFieldResult<Received> {
        self.claim().await
    }

    async fn complete(&self, delivery: &Delivery) -> CacheFieldResult<()> {
        if let Some(id) = delivery.receipt {
            let conn = self.conn.lock().await;
            conn.execute(
                &format!("DELETE FROM {JOBS_TABLE} WHERE id = ?1"),
                params![id],
            )?;
        }
        Ok(())
    }

    async fn retry(&self, delivery: Delivery) -> CacheFieldResult<()> {
        match delivery.receipt {
            Some(id) => {
                // Tentativas já foram contadas no claim.
                let now = format_timestamp(&Utc::now());
                let conn = self.conn.lock().await;
                conn.execute(
                    &format!("UPDATE {JOBS_TABLE} SET visible_at = ?1 WHERE id = ?2"),
                    params![now, id],
                )?;
                Ok(())
            }
            None => self.enqueue(delivery.job).await,
        }
    }
}
