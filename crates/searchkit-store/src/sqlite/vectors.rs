use super::{map_sqlite_err, placeholders, SqliteStore};
use crate::knn::{self, cosine_similarity};
use crate::records::{VectorCandidate, VectorMatch, VectorQuery};
use crate::traits::VectorStore;
use async_trait::async_trait;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use searchkit_core::{EntityRef, SearchkitError, SearchkitResult, TaskKey};
use std::collections::BTreeSet;

/// Ids per `IN (...)` lookup.
const ID_CHUNK: usize = 500;

/// Streams every vector of `query.model` that passes the filter and has the
/// query's dimension.
fn scan_partition(
    conn: &Connection,
    query: &VectorQuery,
    with_full: bool,
    mut visit: impl FnMut(EntityRef, Vec<u8>, Option<Vec<f32>>),
) -> SearchkitResult<()> {
    let dims = i64::try_from(query.vector.len()).unwrap_or(i64::MAX);
    let column = if with_full { "embedding" } else { "quantized" };
    let mut stmt = conn
        .prepare(&format!(
            "SELECT entity_type, entity_id, language, quantized, {column}
             FROM embedding_vectors WHERE model = ?1 AND dims = ?2"
        ))
        .map_err(map_sqlite_err)?;
    let mut rows = stmt
        .query(params![query.model, dims])
        .map_err(map_sqlite_err)?;
    while let Some(row) = rows.next().map_err(map_sqlite_err)? {
        let entity = EntityRef::new(
            row.get::<_, String>(0).map_err(map_sqlite_err)?,
            row.get::<_, String>(1).map_err(map_sqlite_err)?,
            row.get::<_, String>(2).map_err(map_sqlite_err)?,
        );
        if !query.filter.accepts(&entity) {
            continue;
        }
        let quantized: Vec<u8> = row.get(3).map_err(map_sqlite_err)?;
        let full = if with_full {
            let bytes: Vec<u8> = row.get(4).map_err(map_sqlite_err)?;
            Some(knn::decode_vector(&bytes))
        } else {
            None
        };
        visit(entity, quantized, full);
    }
    Ok(())
}

#[async_trait]
impl VectorStore for SqliteStore {
    async fn upsert_vector(&self, key: &TaskKey, vector: &[f32]) -> SearchkitResult<()> {
        key.validate()?;
        if vector.is_empty() {
            return Err(SearchkitError::Validation(format!(
                "empty embedding for {key}"
            )));
        }
        let now = self.now_ms();
        let dims = i64::try_from(vector.len()).unwrap_or(i64::MAX);
        let embedding = knn::encode_vector(vector);
        let quantized = knn::quantize(vector);
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO embedding_vectors
                   (entity_type, entity_id, model, language, dims, embedding, quantized, updated_at_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(entity_type, entity_id, model, language) DO UPDATE SET
                   dims = excluded.dims,
                   embedding = excluded.embedding,
                   quantized = excluded.quantized,
                   updated_at_ms = excluded.updated_at_ms",
                params![
                    key.entity_type,
                    key.entity_id,
                    key.model,
                    key.language,
                    dims,
                    embedding,
                    quantized,
                    now
                ],
            )
            .map_err(map_sqlite_err)?;
            Ok(())
        })
    }

    async fn get_vector(&self, key: &TaskKey) -> SearchkitResult<Option<Vec<f32>>> {
        self.with_conn(|conn| {
            let bytes: Option<Vec<u8>> = conn
                .query_row(
                    "SELECT embedding FROM embedding_vectors
                     WHERE entity_type = ?1 AND entity_id = ?2 AND model = ?3 AND language = ?4",
                    params![key.entity_type, key.entity_id, key.model, key.language],
                    |r| r.get(0),
                )
                .optional()
                .map_err(map_sqlite_err)?;
            Ok(bytes.map(|b| knn::decode_vector(&b)))
        })
    }

    async fn delete_vectors_for_entity(&self, entity: &EntityRef) -> SearchkitResult<usize> {
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM embedding_vectors
                 WHERE entity_type = ?1 AND entity_id = ?2 AND language = ?3",
                params![entity.entity_type, entity.entity_id, entity.language],
            )
            .map_err(map_sqlite_err)
        })
    }

    async fn existing_vector_ids(
        &self,
        model: &str,
        entity_type: &str,
        language: &str,
        ids: &[String],
    ) -> SearchkitResult<BTreeSet<String>> {
        if ids.is_empty() {
            return Ok(BTreeSet::new());
        }
        self.with_conn(|conn| {
            let mut found = BTreeSet::new();
            for chunk in ids.chunks(ID_CHUNK) {
                let sql = format!(
                    "SELECT entity_id FROM embedding_vectors
                     WHERE model = ?1 AND entity_type = ?2 AND language = ?3
                       AND entity_id IN ({})",
                    placeholders(4, chunk.len())
                );
                let mut stmt = conn.prepare(&sql).map_err(map_sqlite_err)?;
                let values = [model, entity_type, language]
                    .into_iter()
                    .chain(chunk.iter().map(String::as_str));
                let rows = stmt
                    .query_map(params_from_iter(values), |r| r.get::<_, String>(0))
                    .map_err(map_sqlite_err)?;
                for id in rows {
                    found.insert(id.map_err(map_sqlite_err)?);
                }
            }
            Ok(found)
        })
    }

    async fn knn(&self, query: &VectorQuery) -> SearchkitResult<Vec<VectorMatch>> {
        if query.vector.is_empty() || query.limit == 0 {
            return Ok(Vec::new());
        }
        let floor = query.min_similarity;
        self.with_conn(|conn| {
            let mut matches = Vec::new();
            scan_partition(conn, query, true, |entity, _, full| {
                let Some(vector) = full else { return };
                let similarity = cosine_similarity(&query.vector, &vector);
                if floor > 0.0 && similarity < floor {
                    return;
                }
                matches.push(VectorMatch { entity, similarity });
            })?;
            Ok(knn::top_by_similarity(matches, query.limit))
        })
    }

    async fn hamming_candidates(
        &self,
        query: &VectorQuery,
        n: usize,
    ) -> SearchkitResult<Vec<VectorCandidate>> {
        if query.vector.is_empty() || n == 0 {
            return Ok(Vec::new());
        }
        let query_bits = knn::quantize(&query.vector);
        let top = self.with_conn(|conn| {
            let mut candidates = Vec::new();
            scan_partition(conn, query, false, |entity, quantized, _| {
                candidates.push(VectorCandidate {
                    hamming: knn::hamming(&query_bits, &quantized),
                    entity,
                    vector: Vec::new(),
                });
            })?;
            Ok(knn::top_by_hamming(candidates, n))
        })?;

        // Full vectors are loaded for survivors only.
        let mut out = Vec::with_capacity(top.len());
        for mut candidate in top {
            let key = candidate.entity.with_model(query.model.as_str());
            if let Some(vector) = self.get_vector(&key).await? {
                candidate.vector = vector;
                out.push(candidate);
            }
        }
        Ok(out)
    }

    async fn vector_count(&self, model: Option<&str>) -> SearchkitResult<usize> {
        self.with_conn(|conn| {
            let n: i64 = match model {
                Some(model) => conn.query_row(
                    "SELECT COUNT(*) FROM embedding_vectors WHERE model = ?1",
                    params![model],
                    |r| r.get(0),
                ),
                None => conn.query_row("SELECT COUNT(*) FROM embedding_vectors", [], |r| r.get(0)),
            }
            .map_err(map_sqlite_err)?;
            Ok(n.max(0) as usize)
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::records::VectorFilter;

    fn query(vector: Vec<f32>, limit: usize, min_similarity: f32) -> VectorQuery {
        VectorQuery {
            model: "m".into(),
            vector,
            limit,
            min_similarity,
            filter: VectorFilter::default(),
        }
    }

    async fn seeded() -> SqliteStore {
        let store = SqliteStore::open_in_memory().unwrap();
        let rows: [(&str, [f32; 2]); 4] = [
            ("east", [1.0, 0.0]),
            ("north", [0.0, 1.0]),
            ("west", [-1.0, 0.0]),
            ("northeast", [0.7071, 0.7071]),
        ];
        for (id, v) in rows {
            store
                .upsert_vector(&TaskKey::new("place", id, "m", "en"), &v)
                .await
                .unwrap();
        }
        store
            .upsert_vector(&TaskKey::new("place", "east", "other", "en"), &[1.0, 0.0])
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_upsert_and_get_vector() {
        let store = seeded().await;
        let v = store
            .get_vector(&TaskKey::new("place", "north", "m", "en"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(v, vec![0.0, 1.0]);
        assert_eq!(store.vector_count(Some("m")).await.unwrap(), 4);
        assert_eq!(store.vector_count(None).await.unwrap(), 5);
        assert!(store
            .upsert_vector(&TaskKey::new("place", "x", "m", "en"), &[])
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_knn_single_stage_floor_only_when_positive() {
        let store = seeded().await;
        let all = store.knn(&query(vec![1.0, 0.0], 10, 0.0)).await.unwrap();
        assert_eq!(all.len(), 4);
        assert_eq!(all[0].entity.entity_id, "east");
        assert_eq!(all[1].entity.entity_id, "northeast");
        assert_eq!(all[3].entity.entity_id, "west");

        let floored = store.knn(&query(vec![1.0, 0.0], 10, 0.5)).await.unwrap();
        let ids: Vec<&str> = floored.iter().map(|m| m.entity.entity_id.as_str()).collect();
        assert_eq!(ids, vec!["east", "northeast"]);
    }

    #[tokio::test]
    async fn test_knn_filters() {
        let store = seeded().await;
        let mut q = query(vec![1.0, 0.0], 10, 0.0);
        q.filter.exclude_ids.insert("east".into());
        q.filter.language = Some("en".into());
        let hits = store.knn(&q).await.unwrap();
        assert!(hits.iter().all(|h| h.entity.entity_id != "east"));

        q.filter.language = Some("ja".into());
        assert!(store.knn(&q).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_hamming_candidates_limit_and_vectors() {
        let store = seeded().await;
        let candidates = store
            .hamming_candidates(&query(vec![1.0, 0.0], 1, 0.0), 2)
            .await
            .unwrap();
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].entity.entity_id, "east");
        assert_eq!(candidates[0].hamming, 0);
        assert!(candidates.iter().all(|c| c.vector.len() == 2));
    }

    #[tokio::test]
    async fn test_existing_vector_ids() {
        let store = seeded().await;
        let ids = vec!["east".to_string(), "missing".to_string(), "west".to_string()];
        let found = store
            .existing_vector_ids("m", "place", "en", &ids)
            .await
            .unwrap();
        assert_eq!(
            found.into_iter().collect::<Vec<_>>(),
            vec!["east".to_string(), "west".to_string()]
        );
    }

    #[tokio::test]
    async fn test_delete_vectors_for_entity_all_models() {
        let store = seeded().await;
        let removed = store
            .delete_vectors_for_entity(&EntityRef::new("place", "east", "en"))
            .await
            .unwrap();
        assert_eq!(removed, 2);
    }
}
