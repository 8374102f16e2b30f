//! Lexical search using PostgreSQL full-text search
//!
//! `ts_rank_cd` is unbounded, so scores are mapped into `[0, 1]` with
//! `s / (s + 1)`.

use super::{filter_clause, LexicalIndex};
use async_trait::async_trait;
use chrono::NaiveDate;
use citeforge_common::db::DbPool;
use citeforge_common::errors::{AppError, Result};
use citeforge_common::models::{DocType, IndexHit, SearchFilters};
use sea_orm::{DbBackend, FromQueryResult, Statement};
use std::sync::Arc;

/// Lexical index over the `chunks` table
pub struct PgLexicalIndex {
    db: Arc<DbPool>,
}

impl PgLexicalIndex {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }
}

/// Row shape shared by both Postgres adapters
#[derive(Debug, FromQueryResult)]
pub(crate) struct ChunkRow {
    pub document_id: String,
    pub chunk_id: String,
    pub chunk_index: i32,
    pub content: String,
    pub title: String,
    pub doc_type: String,
    pub page_range: Option<String>,
    pub section_title: Option<String>,
    pub date_published: Option<NaiveDate>,
    pub score: f64,
}

impl ChunkRow {
    pub(crate) fn into_index_hit(self, score: f32) -> IndexHit {
        let score = if score.is_finite() { score.clamp(0.0, 1.0) } else { 0.0 };
        IndexHit {
            document_id: self.document_id,
            chunk_id: self.chunk_id,
            chunk_index: self.chunk_index.max(0) as u32,
            score,
            content: self.content,
            title: self.title,
            doc_type: DocType::parse(&self.doc_type),
            page_range: self.page_range,
            section_title: self.section_title,
            date_published: self.date_published,
        }
    }
}

/// Map an unbounded rank into `[0, 1)`
pub(crate) fn normalize_rank(rank: f64) -> f32 {
    if rank <= 0.0 || !rank.is_finite() {
        return 0.0;
    }
    (rank / (rank + 1.0)) as f32
}

#[async_trait]
impl LexicalIndex for PgLexicalIndex {
    async fn search(&self, query: &str, filters: &SearchFilters, limit: usize) -> Result<Vec<IndexHit>> {
        if query.split_whitespace().next().is_none() || limit == 0 {
            return Ok(Vec::new());
        }

        let mut values: Vec<sea_orm::Value> = vec![query.into()];
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
                ts_rank_cd(
                    to_tsvector('english', c.content),
                    plainto_tsquery('english', $1)
                )::float8 AS score
            FROM chunks c
            INNER JOIN documents d ON c.document_id = d.id
            WHERE to_tsvector('english', c.content) @@ plainto_tsquery('english', $1){predicates}
            ORDER BY score DESC
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
        .map_err(|e| AppError::index("bm25", format!("full-text search failed: {}", e)))?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let score = normalize_rank(row.score);
                row.into_index_hit(score)
            })
            .collect())
    }

    fn name(&self) -> &str {
        "bm25"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rank_normalisation() {
        assert_eq!(normalize_rank(0.0), 0.0);
        assert_eq!(normalize_rank(f64::NAN), 0.0);
        assert!((normalize_rank(1.0) - 0.5).abs() < 1e-6);
        assert!(normalize_rank(1e6) < 1.0);
    }
}
