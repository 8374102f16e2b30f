//! Vector similarity search using pgvector
//!
//! The query is embedded through the [`Embedder`] collaborator and bound
//! as a pgvector text literal. Scores are `1 - cosine distance`.

use super::bm25::ChunkRow;
use super::{filter_clause, VectorIndex};
use async_trait::async_trait;
use citeforge_common::db::DbPool;
use citeforge_common::embeddings::Embedder;
use citeforge_common::errors::{AppError, Result};
use citeforge_common::metrics;
use citeforge_common::models::{IndexHit, SearchFilters};
use sea_orm::{DbBackend, FromQueryResult, Statement};
use std::sync::Arc;

/// Vector index over `chunks.embedding`
pub struct PgVectorIndex {
    db: Arc<DbPool>,
    embedder: Arc<dyn Embedder>,
}

impl PgVectorIndex {
    pub fn new(db: Arc<DbPool>, embedder: Arc<dyn Embedder>) -> Self {
        Self { db, embedder }
    }
}

/// Format an embedding as a pgvector literal: `[0.1,0.2,...]`
pub(crate) fn vector_literal(embedding: &[f32]) -> String {
    let parts: Vec<String> = embedding.iter().map(|f| f.to_string()).collect();
    format!("[{}]", parts.join(","))
}

#[async_trait]
impl VectorIndex for PgVectorIndex {
    async fn search(&self, query: &str, filters: &SearchFilters, limit: usize) -> Result<Vec<IndexHit>> {
        if query.trim().is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let embedding = self.embedder.embed(query).await;
        metrics::record_embedding(self.embedder.model_name(), embedding.is_ok());
        let embedding = embedding?;
        if embedding.iter().any(|v| !v.is_finite()) {
            return Err(AppError::index("vector", "query embedding contains non-finite values"));
        }

        let mut values: Vec<sea_orm::Value> = vec![vector_literal(&embedding).into()];
        let predicates = filter_clause(filters, &mut values);
        values.push((limit as i64).into());
        let limit_param = values.len();

        let sql = format!(
            r#"
            SELECT
                c.document_id::text AS document_id,
                c.id::text AS chunk_id,
                c.chunk_index,
                c.content,
                d.title,
                d.doc_type,
                c.page_range,
                c.section_title,
                d.date_published,
                (1 - (c.embedding <=> CAST($1 AS vector)))::float8 AS score
            FROM chunks c
            INNER JOIN documents d ON c.document_id = d.id
            WHERE c.embedding IS NOT NULL{predicates}
            ORDER BY c.embedding <=> CAST($1 AS vector)
            LIMIT ${limit_param}
            "#
        );

        let rows = ChunkRow::find_by_statement(Statement::from_sql_and_values(
            DbBackend::Postgres,
            sql,
            values,
        ))
        .all(self.db.read())
        .await
        .map_err(|e| AppError::index("vector", format!("similarity search failed: {}", e)))?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let score = row.score as f32;
                row.into_index_hit(score)
            })
            .collect())
    }

    fn name(&self) -> &str {
        "vector"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedding_format() {
        assert_eq!(vector_literal(&[0.1, 0.2, 0.3]), "[0.1,0.2,0.3]");
        assert_eq!(vector_literal(&[]), "[]");
    }
}
