use super::{dt_to_ms, duration_ms, map_sqlite_err, ms_to_dt, write_tx, SqliteStore};
use crate::traits::TaskStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use searchkit_core::{DeadLetterRecord, EntityRef, SearchkitResult, Task, TaskKey};
use std::time::Duration;

const DEFAULT_LEASE: Duration = Duration::from_secs(30);
const MIN_BACKOFF: Duration = Duration::from_secs(1);

const TASK_COLUMNS: &str = "entity_type, entity_id, model, language, reason, attempts, \
     next_run_at_ms, started_at_ms, created_at_ms, updated_at_ms";

fn row_to_task(row: &Row<'_>) -> rusqlite::Result<Task> {
    Ok(Task {
        key: TaskKey::new(
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)?,
        ),
        reason: row.get(4)?,
        attempts: row.get::<_, i64>(5)?.max(0) as u32,
        next_run_at: ms_to_dt(row.get(6)?),
        started_at: row.get::<_, Option<i64>>(7)?.map(ms_to_dt),
        created_at: ms_to_dt(row.get(8)?),
        updated_at: ms_to_dt(row.get(9)?),
    })
}

fn reason_or_unknown(reason: &str) -> &str {
    let reason = reason.trim();
    if reason.is_empty() {
        "unknown"
    } else {
        reason
    }
}

fn upsert_task(conn: &Connection, key: &TaskKey, reason: &str, now_ms: i64) -> SearchkitResult<()> {
    conn.execute(
        "INSERT INTO embedding_tasks (entity_type, entity_id, model, language, reason, attempts,
                                      next_run_at_ms, started_at_ms, created_at_ms, updated_at_ms)
         VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, NULL, ?6, ?6)
         ON CONFLICT(entity_type, entity_id, model, language) DO UPDATE SET
           reason = excluded.reason,
           next_run_at_ms = MIN(embedding_tasks.next_run_at_ms, excluded.next_run_at_ms),
           updated_at_ms = excluded.updated_at_ms",
        params![
            key.entity_type,
            key.entity_id,
            key.model,
            key.language,
            reason_or_unknown(reason),
            now_ms
        ],
    )
    .map_err(map_sqlite_err)?;
    Ok(())
}

#[async_trait]
impl TaskStore for SqliteStore {
    async fn enqueue(&self, key: &TaskKey, reason: &str) -> SearchkitResult<()> {
        key.validate()?;
        let now = self.now_ms();
        self.with_conn(|conn| upsert_task(conn, key, reason, now))
    }

    async fn enqueue_many(
        &self,
        entity_type: &str,
        ids: &[String],
        model: &str,
        language: &str,
        reason: &str,
    ) -> SearchkitResult<usize> {
        // Validate the shared fields once with a placeholder id.
        TaskKey::new(entity_type, "-", model, language).validate()?;
        let now = self.now_ms();
        self.with_conn(|conn| {
            let tx = write_tx(conn)?;
            let mut written = 0;
            for id in ids.iter().filter(|id| !id.trim().is_empty()) {
                let key = TaskKey::new(entity_type, id.as_str(), model, language);
                upsert_task(&tx, &key, reason, now)?;
                written += 1;
            }
            tx.commit().map_err(map_sqlite_err)?;
            Ok(written)
        })
    }

    async fn fetch_ready(&self, limit: usize, lease: Duration) -> SearchkitResult<Vec<Task>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let lease = if lease.is_zero() { DEFAULT_LEASE } else { lease };
        let now = self.now();
        let now_ms = dt_to_ms(now);
        let token_ms = now_ms.saturating_add(duration_ms(lease));
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        self.with_conn(|conn| {
            let tx = write_tx(conn)?;
            let due: Vec<Task> = {
                let mut stmt = tx
                    .prepare(&format!(
                        "SELECT {TASK_COLUMNS} FROM embedding_tasks
                         WHERE next_run_at_ms <= ?1
                         ORDER BY next_run_at_ms, entity_type, entity_id, model, language
                         LIMIT ?2"
                    ))
                    .map_err(map_sqlite_err)?;
                let rows = stmt
                    .query_map(params![now_ms, limit], row_to_task)
                    .map_err(map_sqlite_err)?;
                rows.collect::<Result<_, _>>().map_err(map_sqlite_err)?
            };

            let mut leased = Vec::with_capacity(due.len());
            for mut task in due {
                tx.execute(
                    "UPDATE embedding_tasks
                     SET next_run_at_ms = ?5,
                         started_at_ms = COALESCE(started_at_ms, ?6),
                         updated_at_ms = ?6
                     WHERE entity_type = ?1 AND entity_id = ?2 AND model = ?3 AND language = ?4",
                    params![
                        task.key.entity_type,
                        task.key.entity_id,
                        task.key.model,
                        task.key.language,
                        token_ms,
                        now_ms
                    ],
                )
                .map_err(map_sqlite_err)?;
                task.next_run_at = ms_to_dt(token_ms);
                task.started_at = Some(task.started_at.unwrap_or(ms_to_dt(now_ms)));
                task.updated_at = ms_to_dt(now_ms);
                leased.push(task);
            }
            tx.commit().map_err(map_sqlite_err)?;
            Ok(leased)
        })
    }

    async fn complete(&self, key: &TaskKey, token: DateTime<Utc>) -> SearchkitResult<bool> {
        let token = dt_to_ms(token);
        self.with_conn(|conn| {
            let n = conn
                .execute(
                    "DELETE FROM embedding_tasks
                     WHERE entity_type = ?1 AND entity_id = ?2 AND model = ?3 AND language = ?4
                       AND next_run_at_ms = ?5",
                    params![key.entity_type, key.entity_id, key.model, key.language, token],
                )
                .map_err(map_sqlite_err)?;
            Ok(n > 0)
        })
    }

    async fn fail(
        &self,
        key: &TaskKey,
        token: DateTime<Utc>,
        backoff: Duration,
    ) -> SearchkitResult<bool> {
        let token = dt_to_ms(token);
        let now = self.now_ms();
        let next = now.saturating_add(duration_ms(backoff.max(MIN_BACKOFF)));
        self.with_conn(|conn| {
            let n = conn
                .execute(
                    "UPDATE embedding_tasks
                     SET attempts = attempts + 1, next_run_at_ms = ?6, updated_at_ms = ?7
                     WHERE entity_type = ?1 AND entity_id = ?2 AND model = ?3 AND language = ?4
                       AND next_run_at_ms = ?5",
                    params![
                        key.entity_type,
                        key.entity_id,
                        key.model,
                        key.language,
                        token,
                        next,
                        now
                    ],
                )
                .map_err(map_sqlite_err)?;
            Ok(n > 0)
        })
    }

    async fn dead_letter(
        &self,
        task: &Task,
        token: DateTime<Utc>,
        error: &str,
    ) -> SearchkitResult<bool> {
        let token = dt_to_ms(token);
        let now = self.now_ms();
        let key = &task.key;
        self.with_conn(|conn| {
            let tx = write_tx(conn)?;
            let removed = tx
                .execute(
                    "DELETE FROM embedding_tasks
                     WHERE entity_type = ?1 AND entity_id = ?2 AND model = ?3 AND language = ?4
                       AND next_run_at_ms = ?5",
                    params![key.entity_type, key.entity_id, key.model, key.language, token],
                )
                .map_err(map_sqlite_err)?;
            if removed == 0 {
                // Dropping the transaction rolls it back.
                return Ok(false);
            }
            tx.execute(
                "INSERT INTO embedding_dead_letters
                   (entity_type, entity_id, model, language, reason, error, attempts, failed_at_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(entity_type, entity_id, model, language) DO UPDATE SET
                   reason = excluded.reason,
                   error = excluded.error,
                   attempts = excluded.attempts,
                   failed_at_ms = excluded.failed_at_ms",
                params![
                    key.entity_type,
                    key.entity_id,
                    key.model,
                    key.language,
                    reason_or_unknown(&task.reason),
                    error,
                    i64::from(task.attempts),
                    now
                ],
            )
            .map_err(map_sqlite_err)?;
            tx.commit().map_err(map_sqlite_err)?;
            Ok(true)
        })
    }

    async fn delete_all_for_entity(&self, entity: &EntityRef) -> SearchkitResult<usize> {
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM embedding_tasks
                 WHERE entity_type = ?1 AND entity_id = ?2 AND language = ?3",
                params![entity.entity_type, entity.entity_id, entity.language],
            )
            .map_err(map_sqlite_err)
        })
    }

    async fn get_task(&self, key: &TaskKey) -> SearchkitResult<Option<Task>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!(
                    "SELECT {TASK_COLUMNS} FROM embedding_tasks
                     WHERE entity_type = ?1 AND entity_id = ?2 AND model = ?3 AND language = ?4"
                ),
                params![key.entity_type, key.entity_id, key.model, key.language],
                row_to_task,
            )
            .optional()
            .map_err(map_sqlite_err)
        })
    }

    async fn pending_count(&self) -> SearchkitResult<usize> {
        self.with_conn(|conn| {
            conn.query_row("SELECT COUNT(*) FROM embedding_tasks", [], |r| {
                r.get::<_, i64>(0)
            })
            .map(|n| n.max(0) as usize)
            .map_err(map_sqlite_err)
        })
    }

    async fn list_dead_letters(&self, limit: usize) -> SearchkitResult<Vec<DeadLetterRecord>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT entity_type, entity_id, model, language, reason, error, attempts, failed_at_ms
                     FROM embedding_dead_letters
                     ORDER BY failed_at_ms DESC, entity_type, entity_id, model, language
                     LIMIT ?1",
                )
                .map_err(map_sqlite_err)?;
            let rows = stmt
                .query_map(params![limit], |row| {
                    Ok(DeadLetterRecord {
                        key: TaskKey::new(
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, String>(3)?,
                        ),
                        reason: row.get(4)?,
                        error: row.get(5)?,
                        attempts: row.get::<_, i64>(6)?.max(0) as u32,
                        failed_at: ms_to_dt(row.get(7)?),
                    })
                })
                .map_err(map_sqlite_err)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(map_sqlite_err)
        })
    }

    async fn requeue_dead_letter(&self, key: &TaskKey) -> SearchkitResult<bool> {
        key.validate()?;
        let now = self.now_ms();
        self.with_conn(|conn| {
            let tx = write_tx(conn)?;
            let removed = tx
                .execute(
                    "DELETE FROM embedding_dead_letters
                     WHERE entity_type = ?1 AND entity_id = ?2 AND model = ?3 AND language = ?4",
                    params![key.entity_type, key.entity_id, key.model, key.language],
                )
                .map_err(map_sqlite_err)?;
            if removed == 0 {
                return Ok(false);
            }
            tx.execute(
                "INSERT INTO embedding_tasks (entity_type, entity_id, model, language, reason, attempts,
                                              next_run_at_ms, started_at_ms, created_at_ms, updated_at_ms)
                 VALUES (?1, ?2, ?3, ?4, 'replay', 0, ?5, NULL, ?5, ?5)
                 ON CONFLICT(entity_type, entity_id, model, language) DO UPDATE SET
                   reason = 'replay',
                   attempts = 0,
                   next_run_at_ms = ?5,
                   updated_at_ms = ?5",
                params![key.entity_type, key.entity_id, key.model, key.language, now],
            )
            .map_err(map_sqlite_err)?;
            tx.commit().map_err(map_sqlite_err)?;
            tracing::info!(task = %key, "Dead letter requeued");
            Ok(true)
        })
    }
}
