use super::{dt_to_ms, map_sqlite_err, ms_to_dt, write_tx, SqliteStore};
use crate::traits::DirtyStore;
use async_trait::async_trait;
use rusqlite::params;
use searchkit_core::{DirtyMarker, EntityRef, SearchkitError, SearchkitResult};

#[async_trait]
impl DirtyStore for SqliteStore {
    async fn mark_dirty(
        &self,
        entity: &EntityRef,
        is_deleted: bool,
        reason: &str,
    ) -> SearchkitResult<()> {
        if entity.is_blank() {
            return Err(SearchkitError::Validation(format!(
                "dirty marker requires entity_type, entity_id and language: {}/{}/{}",
                entity.entity_type, entity.entity_id, entity.language
            )));
        }
        let now = self.now_ms();
        self.with_conn(|conn| {
            // A re-flag always moves updated_at forward so in-flight clears miss it.
            conn.execute(
                "INSERT INTO dirty_markers (entity_type, entity_id, language, is_deleted, reason, updated_at_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(entity_type, entity_id, language) DO UPDATE SET
                   is_deleted = excluded.is_deleted,
                   reason = excluded.reason,
                   updated_at_ms = MAX(excluded.updated_at_ms, dirty_markers.updated_at_ms + 1)",
                params![
                    entity.entity_type,
                    entity.entity_id,
                    entity.language,
                    is_deleted,
                    reason.trim(),
                    now
                ],
            )
            .map_err(map_sqlite_err)?;
            Ok(())
        })
    }

    async fn fetch_dirty(&self, limit: usize) -> SearchkitResult<Vec<DirtyMarker>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT entity_type, entity_id, language, is_deleted, reason, updated_at_ms
                     FROM dirty_markers
                     ORDER BY updated_at_ms, entity_type, entity_id, language
                     LIMIT ?1",
                )
                .map_err(map_sqlite_err)?;
            let rows = stmt
                .query_map(params![limit], |r| {
                    Ok(DirtyMarker {
                        entity: EntityRef::new(
                            r.get::<_, String>(0)?,
                            r.get::<_, String>(1)?,
                            r.get::<_, String>(2)?,
                        ),
                        is_deleted: r.get(3)?,
                        reason: r.get(4)?,
                        updated_at: ms_to_dt(r.get(5)?),
                    })
                })
                .map_err(map_sqlite_err)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(map_sqlite_err)
        })
    }

    async fn clear_dirty(&self, markers: &[DirtyMarker]) -> SearchkitResult<usize> {
        if markers.is_empty() {
            return Ok(0);
        }
        self.with_conn(|conn| {
            let tx = write_tx(conn)?;
            let mut cleared = 0;
            for marker in markers {
                cleared += tx
                    .execute(
                        "DELETE FROM dirty_markers
                         WHERE entity_type = ?1 AND entity_id = ?2 AND language = ?3
                           AND updated_at_ms = ?4",
                        params![
                            marker.entity.entity_type,
                            marker.entity.entity_id,
                            marker.entity.language,
                            dt_to_ms(marker.updated_at)
                        ],
                    )
                    .map_err(map_sqlite_err)?;
            }
            tx.commit().map_err(map_sqlite_err)?;
            Ok(cleared)
        })
    }

    async fn dirty_count(&self) -> SearchkitResult<usize> {
        self.with_conn(|conn| {
            conn.query_row("SELECT COUNT(*) FROM dirty_markers", [], |r| {
                r.get::<_, i64>(0)
            })
            .map(|n| n.max(0) as usize)
            .map_err(map_sqlite_err)
        })
    }
}
