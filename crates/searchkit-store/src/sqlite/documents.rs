use super::{map_sqlite_err, ms_to_dt, placeholders, write_tx, SqliteStore};
use crate::lexical;
use crate::records::{DocumentMatch, DocumentWrite, LexicalQuery, SearchDocument};
use crate::traits::DocumentStore;
use async_trait::async_trait;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use searchkit_core::{EntityRef, SearchkitError, SearchkitResult};
use std::collections::BTreeMap;

fn delete_row(conn: &Connection, entity: &EntityRef, fts: bool) -> SearchkitResult<bool> {
    let id: Option<i64> = conn
        .query_row(
            "SELECT id FROM search_documents
             WHERE entity_type = ?1 AND entity_id = ?2 AND language = ?3",
            params![entity.entity_type, entity.entity_id, entity.language],
            |r| r.get(0),
        )
        .optional()
        .map_err(map_sqlite_err)?;
    let Some(id) = id else {
        return Ok(false);
    };
    conn.execute("DELETE FROM search_documents WHERE id = ?1", params![id])
        .map_err(map_sqlite_err)?;
    if fts {
        conn.execute("DELETE FROM search_documents_fts WHERE rowid = ?1", params![id])
            .map_err(map_sqlite_err)?;
    }
    Ok(true)
}

/// `(entity, text)` for every document of the query's language and types.
fn scan_language(
    conn: &Connection,
    query: &LexicalQuery,
    column: &str,
) -> SearchkitResult<Vec<(EntityRef, String)>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT entity_type, entity_id, language, {column}
             FROM search_documents WHERE language = ?1"
        ))
        .map_err(map_sqlite_err)?;
    let rows = stmt
        .query_map(params![query.language], |r| {
            Ok((
                EntityRef::new(
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                ),
                r.get::<_, String>(3)?,
            ))
        })
        .map_err(map_sqlite_err)?;
    let mut out = Vec::new();
    for row in rows {
        let (entity, text) = row.map_err(map_sqlite_err)?;
        if query.accepts_type(&entity.entity_type) {
            out.push((entity, text));
        }
    }
    Ok(out)
}

fn rank(mut hits: Vec<DocumentMatch>, limit: usize) -> Vec<DocumentMatch> {
    hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.entity.cmp(&b.entity)));
    hits.truncate(limit);
    hits
}

impl SqliteStore {
    fn keyword_fts(
        &self,
        conn: &Connection,
        query: &LexicalQuery,
        expression: &str,
    ) -> SearchkitResult<Vec<DocumentMatch>> {
        let mut values: Vec<Value> = vec![
            Value::Text(expression.to_string()),
            Value::Text(query.language.clone()),
        ];
        let type_clause = if query.entity_types.is_empty() {
            String::new()
        } else {
            let clause = format!(
                " AND d.entity_type IN ({})",
                placeholders(values.len() + 1, query.entity_types.len())
            );
            values.extend(query.entity_types.iter().cloned().map(Value::Text));
            clause
        };
        values.push(Value::Integer(
            i64::try_from(query.limit).unwrap_or(i64::MAX),
        ));
        let sql = format!(
            "SELECT d.entity_type, d.entity_id, d.language, bm25(search_documents_fts) AS rank
             FROM search_documents_fts
             JOIN search_documents d ON d.id = search_documents_fts.rowid
             WHERE search_documents_fts MATCH ?1 AND d.language = ?2{type_clause}
             ORDER BY rank, d.entity_type, d.entity_id
             LIMIT ?{}",
            values.len()
        );
        let mut stmt = conn.prepare(&sql).map_err(map_sqlite_err)?;
        let rows = stmt
            .query_map(params_from_iter(values), |r| {
                Ok(DocumentMatch {
                    entity: EntityRef::new(
                        r.get::<_, String>(0)?,
                        r.get::<_, String>(1)?,
                        r.get::<_, String>(2)?,
                    ),
                    score: -(r.get::<_, f64>(3)? as f32),
                })
            })
            .map_err(map_sqlite_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(map_sqlite_err)
    }

    /// Whole-word term frequency with AND semantics, used without FTS5.
    fn keyword_scan(
        &self,
        conn: &Connection,
        query: &LexicalQuery,
        normalized: &str,
    ) -> SearchkitResult<Vec<DocumentMatch>> {
        let terms: Vec<&str> = normalized.split_whitespace().collect();
        let mut hits = Vec::new();
        for (entity, document) in scan_language(conn, query, "document")? {
            let words: Vec<&str> = document.split_whitespace().collect();
            let mut score = 0usize;
            let mut all = true;
            for term in &terms {
                let n = words.iter().filter(|w| *w == term).count();
                if n == 0 {
                    all = false;
                    break;
                }
                score += n;
            }
            if all {
                hits.push(DocumentMatch {
                    entity,
                    score: score as f32,
                });
            }
        }
        Ok(rank(hits, query.limit))
    }
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn upsert_documents(
        &self,
        entity_type: &str,
        language: &str,
        documents: &BTreeMap<String, String>,
    ) -> SearchkitResult<DocumentWrite> {
        if EntityRef::new(entity_type, "-", language).is_blank() {
            return Err(SearchkitError::Validation(
                "documents require entity_type and language".into(),
            ));
        }
        let now = self.now_ms();
        let prepared: Vec<(EntityRef, String, String)> = documents
            .iter()
            .filter(|(id, _)| !id.trim().is_empty())
            .map(|(id, text)| {
                let raw = text.trim().to_string();
                let normalized = self.normalizer().normalize(&raw);
                (EntityRef::new(entity_type, id.as_str(), language), raw, normalized)
            })
            .collect();

        self.with_conn(|conn| {
            let fts = self.fts5_with(conn);
            let tx = write_tx(conn)?;
            let mut report = DocumentWrite::default();
            for (entity, raw, normalized) in &prepared {
                if normalized.is_empty() {
                    if delete_row(&tx, entity, fts)? {
                        report.deleted += 1;
                    }
                    continue;
                }
                let id: i64 = tx
                    .query_row(
                        "INSERT INTO search_documents
                           (entity_type, entity_id, language, raw_document, document, updated_at_ms)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                         ON CONFLICT(entity_type, entity_id, language) DO UPDATE SET
                           raw_document = excluded.raw_document,
                           document = excluded.document,
                           updated_at_ms = excluded.updated_at_ms
                         RETURNING id",
                        params![
                            entity.entity_type,
                            entity.entity_id,
                            entity.language,
                            raw,
                            normalized,
                            now
                        ],
                        |r| r.get(0),
                    )
                    .map_err(map_sqlite_err)?;
                if fts {
                    tx.execute("DELETE FROM search_documents_fts WHERE rowid = ?1", params![id])
                        .map_err(map_sqlite_err)?;
                    tx.execute(
                        "INSERT INTO search_documents_fts(rowid, document) VALUES (?1, ?2)",
                        params![id, normalized],
                    )
                    .map_err(map_sqlite_err)?;
                }
                report.upserted += 1;
            }
            tx.commit().map_err(map_sqlite_err)?;
            Ok(report)
        })
    }

    async fn delete_document(&self, entity: &EntityRef) -> SearchkitResult<bool> {
        self.with_conn(|conn| {
            let fts = self.fts5_with(conn);
            let tx = write_tx(conn)?;
            let removed = delete_row(&tx, entity, fts)?;
            tx.commit().map_err(map_sqlite_err)?;
            Ok(removed)
        })
    }

    async fn get_document(&self, entity: &EntityRef) -> SearchkitResult<Option<SearchDocument>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT raw_document, document, updated_at_ms FROM search_documents
                 WHERE entity_type = ?1 AND entity_id = ?2 AND language = ?3",
                params![entity.entity_type, entity.entity_id, entity.language],
                |r| {
                    Ok(SearchDocument {
                        entity: entity.clone(),
                        raw_document: r.get(0)?,
                        document: r.get(1)?,
                        updated_at: ms_to_dt(r.get(2)?),
                    })
                },
            )
            .optional()
            .map_err(map_sqlite_err)
        })
    }

    async fn keyword_search(&self, query: &LexicalQuery) -> SearchkitResult<Vec<DocumentMatch>> {
        if query.limit == 0 {
            return Ok(Vec::new());
        }
        let normalized = self.normalizer().normalize(&query.query);
        let Some(expression) = lexical::fts_match_expression(&normalized) else {
            return Ok(Vec::new());
        };
        self.with_conn(|conn| {
            if self.fts5_with(conn) {
                self.keyword_fts(conn, query, &expression)
            } else {
                self.keyword_scan(conn, query, &normalized)
            }
        })
    }

    async fn trigram_search(
        &self,
        query: &LexicalQuery,
        min_similarity: f32,
    ) -> SearchkitResult<Vec<DocumentMatch>> {
        if query.limit == 0 {
            return Ok(Vec::new());
        }
        let query_grams = lexical::trigrams(&self.normalizer().normalize(&query.query));
        if query_grams.is_empty() {
            return Ok(Vec::new());
        }
        self.with_conn(|conn| {
            let mut hits = Vec::new();
            for (entity, document) in scan_language(conn, query, "document")? {
                let grams = lexical::trigrams(&document);
                let score = lexical::trigram_similarity(&query_grams, &grams);
                if score > 0.0 && score >= min_similarity {
                    hits.push(DocumentMatch { entity, score });
                }
            }
            Ok(rank(hits, query.limit))
        })
    }

    async fn native_search(
        &self,
        query: &LexicalQuery,
        prefix: bool,
        score_k: f32,
    ) -> SearchkitResult<Vec<DocumentMatch>> {
        let tokens = lexical::query_tokens(&query.query);
        if tokens.is_empty() || query.limit == 0 {
            return Ok(Vec::new());
        }
        self.with_conn(|conn| {
            let mut hits = Vec::new();
            for (entity, raw) in scan_language(conn, query, "raw_document")? {
                if let Some(count) = lexical::native_raw_score(&raw, &tokens, prefix) {
                    hits.push(DocumentMatch {
                        entity,
                        score: lexical::normalize_native_score(count as f32, score_k),
                    });
                }
            }
            Ok(rank(hits, query.limit))
        })
    }

    async fn document_count(&self) -> SearchkitResult<usize> {
        self.with_conn(|conn| {
            conn.query_row("SELECT COUNT(*) FROM search_documents", [], |r| {
                r.get::<_, i64>(0)
            })
            .map(|n| n.max(0) as usize)
            .map_err(map_sqlite_err)
        })
    }
}
