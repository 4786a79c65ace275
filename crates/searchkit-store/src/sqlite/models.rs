use super::{map_sqlite_err, placeholders, write_tx, SqliteStore};
use crate::records::PruneReport;
use crate::traits::ModelRegistry;
use async_trait::async_trait;
use rusqlite::{params, params_from_iter, Transaction};
use searchkit_core::{Modality, ModelSpec, SearchkitError, SearchkitResult};

/// Deletes rows of `table` whose `model_column` is not in `keep`.
fn prune(
    tx: &Transaction<'_>,
    table: &str,
    model_column: &str,
    keep: &[&str],
) -> SearchkitResult<usize> {
    let sql = if keep.is_empty() {
        format!("DELETE FROM {table}")
    } else {
        format!(
            "DELETE FROM {table} WHERE {model_column} NOT IN ({})",
            placeholders(1, keep.len())
        )
    };
    tx.execute(&sql, params_from_iter(keep.iter()))
        .map_err(map_sqlite_err)
}

#[async_trait]
impl ModelRegistry for SqliteStore {
    async fn upsert_models(&self, specs: &[ModelSpec]) -> SearchkitResult<PruneReport> {
        for spec in specs {
            spec.validate()?;
        }
        let now = self.now_ms();
        let keep: Vec<&str> = specs.iter().map(|s| s.name.trim()).collect();

        let report = self.with_conn(|conn| {
            let tx = write_tx(conn)?;
            let mut report = PruneReport::default();
            for spec in specs {
                tx.execute(
                    "INSERT INTO embedding_models (name, dims, modality, updated_at_ms)
                     VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(name) DO UPDATE SET
                       dims = excluded.dims,
                       modality = excluded.modality,
                       updated_at_ms = excluded.updated_at_ms",
                    params![
                        spec.name.trim(),
                        i64::try_from(spec.dims).unwrap_or(i64::MAX),
                        spec.modality.as_str(),
                        now
                    ],
                )
                .map_err(map_sqlite_err)?;
                report.upserted += 1;
            }
            report.models_removed = prune(&tx, "embedding_models", "name", &keep)?;
            report.tasks_removed = prune(&tx, "embedding_tasks", "model", &keep)?;
            report.backfill_states_removed = prune(&tx, "vector_backfill_state", "model", &keep)?;
            report.dead_letters_removed = prune(&tx, "embedding_dead_letters", "model", &keep)?;
            tx.commit().map_err(map_sqlite_err)?;
            Ok(report)
        })?;

        tracing::info!(
            upserted = report.upserted,
            models_removed = report.models_removed,
            tasks_removed = report.tasks_removed,
            backfill_states_removed = report.backfill_states_removed,
            dead_letters_removed = report.dead_letters_removed,
            "Model registry synced"
        );
        Ok(report)
    }

    async fn active_models(&self) -> SearchkitResult<Vec<ModelSpec>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT name, dims, modality FROM embedding_models ORDER BY name")
                .map_err(map_sqlite_err)?;
            let rows = stmt
                .query_map([], |r| {
                    Ok((
                        r.get::<_, String>(0)?,
                        r.get::<_, i64>(1)?,
                        r.get::<_, String>(2)?,
                    ))
                })
                .map_err(map_sqlite_err)?;
            let mut models = Vec::new();
            for row in rows {
                let (name, dims, modality) = row.map_err(map_sqlite_err)?;
                let modality: Modality = modality.parse().map_err(|e: SearchkitError| {
                    SearchkitError::Store(format!("model '{name}' has bad modality: {e}"))
                })?;
                models.push(ModelSpec::new(name, dims.max(0) as usize, modality));
            }
            Ok(models)
        })
    }
}
