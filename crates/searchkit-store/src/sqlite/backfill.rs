use super::{map_sqlite_err, ms_to_dt, SqliteStore};
use crate::traits::BackfillStore;
use async_trait::async_trait;
use rusqlite::{params, Connection, Row};
use searchkit_core::{BackfillState, BackfillStatus, SearchkitResult};

fn row_to_state(
    row: &Row<'_>,
    model: Option<String>,
    offset: usize,
) -> rusqlite::Result<BackfillState> {
    Ok(BackfillState {
        model,
        entity_type: row.get(offset)?,
        language: row.get(offset + 1)?,
        cursor: row.get(offset + 2)?,
        state: BackfillStatus::parse(&row.get::<_, String>(offset + 3)?),
        last_error: row.get(offset + 4)?,
        updated_at: ms_to_dt(row.get(offset + 5)?),
    })
}

fn load(
    conn: &Connection,
    model: Option<&str>,
    entity_type: &str,
    language: &str,
) -> SearchkitResult<BackfillState> {
    match model {
        Some(model) => conn.query_row(
            "SELECT entity_type, language, cursor, state, last_error, updated_at_ms
             FROM vector_backfill_state WHERE model = ?1 AND entity_type = ?2 AND language = ?3",
            params![model, entity_type, language],
            |r| row_to_state(r, Some(model.to_string()), 0),
        ),
        None => conn.query_row(
            "SELECT entity_type, language, cursor, state, last_error, updated_at_ms
             FROM document_backfill_state WHERE entity_type = ?1 AND language = ?2",
            params![entity_type, language],
            |r| row_to_state(r, None, 0),
        ),
    }
    .map_err(map_sqlite_err)
}

/// Applies `set_clause` to the vector partition when `model` is set, else to
/// the document partition. `values` bind `?1..?n` of the clause.
fn update(
    conn: &Connection,
    model: Option<&str>,
    entity_type: &str,
    language: &str,
    set_clause: &str,
    values: &[&dyn rusqlite::ToSql],
) -> SearchkitResult<usize> {
    let n = values.len();
    let sql = match model {
        Some(_) => format!(
            "UPDATE vector_backfill_state SET {set_clause}
             WHERE model = ?{} AND entity_type = ?{} AND language = ?{}",
            n + 1,
            n + 2,
            n + 3
        ),
        None => format!(
            "UPDATE document_backfill_state SET {set_clause}
             WHERE entity_type = ?{} AND language = ?{}",
            n + 1,
            n + 2
        ),
    };
    let mut params: Vec<&dyn rusqlite::ToSql> = values.to_vec();
    if let Some(model) = &model {
        params.push(model);
    }
    params.push(&entity_type);
    params.push(&language);
    conn.execute(&sql, params.as_slice()).map_err(map_sqlite_err)
}

#[async_trait]
impl BackfillStore for SqliteStore {
    async fn ensure_backfill_state(
        &self,
        model: Option<&str>,
        entity_type: &str,
        language: &str,
    ) -> SearchkitResult<BackfillState> {
        let now = self.now_ms();
        self.with_conn(|conn| {
            match model {
                Some(model) => conn.execute(
                    "INSERT OR IGNORE INTO vector_backfill_state
                       (model, entity_type, language, cursor, state, last_error, updated_at_ms)
                     VALUES (?1, ?2, ?3, '', 'running', NULL, ?4)",
                    params![model, entity_type, language, now],
                ),
                None => conn.execute(
                    "INSERT OR IGNORE INTO document_backfill_state
                       (entity_type, language, cursor, state, last_error, updated_at_ms)
                     VALUES (?1, ?2, '', 'running', NULL, ?3)",
                    params![entity_type, language, now],
                ),
            }
            .map_err(map_sqlite_err)?;
            load(conn, model, entity_type, language)
        })
    }

    async fn advance_backfill(
        &self,
        model: Option<&str>,
        entity_type: &str,
        language: &str,
        cursor: &str,
        done: bool,
    ) -> SearchkitResult<()> {
        let now = self.now_ms();
        let state = if done {
            BackfillStatus::Done
        } else {
            BackfillStatus::Running
        }
        .as_str();
        self.with_conn(|conn| {
            update(
                conn,
                model,
                entity_type,
                language,
                "cursor = ?1, state = ?2, last_error = NULL, updated_at_ms = ?3",
                &[&cursor, &state, &now],
            )?;
            Ok(())
        })
    }

    async fn fail_backfill(
        &self,
        model: Option<&str>,
        entity_type: &str,
        language: &str,
        error: &str,
    ) -> SearchkitResult<()> {
        let now = self.now_ms();
        let state = BackfillStatus::Failed.as_str();
        self.with_conn(|conn| {
            update(
                conn,
                model,
                entity_type,
                language,
                "state = ?1, last_error = ?2, updated_at_ms = ?3",
                &[&state, &error, &now],
            )?;
            Ok(())
        })
    }

    async fn reset_backfill_state(
        &self,
        model: Option<&str>,
        entity_type: &str,
        language: &str,
    ) -> SearchkitResult<bool> {
        let now = self.now_ms();
        let state = BackfillStatus::Running.as_str();
        self.with_conn(|conn| {
            let n = update(
                conn,
                model,
                entity_type,
                language,
                "cursor = '', state = ?1, last_error = NULL, updated_at_ms = ?2",
                &[&state, &now],
            )?;
            Ok(n > 0)
        })
    }

    async fn list_backfill_states(&self) -> SearchkitResult<Vec<BackfillState>> {
        self.with_conn(|conn| {
            let mut out = Vec::new();
            let mut stmt = conn
                .prepare(
                    "SELECT model, entity_type, language, cursor, state, last_error, updated_at_ms
                     FROM vector_backfill_state ORDER BY model, entity_type, language",
                )
                .map_err(map_sqlite_err)?;
            let rows = stmt
                .query_map([], |r| row_to_state(r, Some(r.get(0)?), 1))
                .map_err(map_sqlite_err)?;
            for row in rows {
                out.push(row.map_err(map_sqlite_err)?);
            }

            let mut stmt = conn
                .prepare(
                    "SELECT entity_type, language, cursor, state, last_error, updated_at_ms
                     FROM document_backfill_state ORDER BY entity_type, language",
                )
                .map_err(map_sqlite_err)?;
            let rows = stmt
                .query_map([], |r| row_to_state(r, None, 0))
                .map_err(map_sqlite_err)?;
            for row in rows {
                out.push(row.map_err(map_sqlite_err)?);
            }
            Ok(out)
        })
    }
}
