//! SQLite-backed [`DocumentStore`].
//!
//! All access goes through one `Mutex<Connection>`; async callers hop onto
//! the blocking pool so the runtime is never stalled on disk IO.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::{Map, Value};

use crate::error::StoreError;
use crate::model::{
    Classification, Document, DocumentStatus, NOT_IDENTIFIED, PROCESSING_ERROR_CATEGORY,
    UNCLASSIFIED,
};
use crate::store::{migrations, DocumentStore};

const COLUMNS: &str = "id, storage_key, bucket_name, file_name, file_size, content_type,
     uploader_id, uploaded_at, updated_at, status, category, attributes";

#[derive(Clone)]
pub struct SqliteDocumentStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteDocumentStore {
    /// Opens (or creates) the database at `path` and runs pending migrations.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        migrations::run_all(&conn)?;

        log::info!("Document store opened at {}", path.display());

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        migrations::run_all(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Provides locked access to the underlying connection.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, StoreError>,
    {
        let conn = self.conn.lock().map_err(|_| StoreError::LockPoisoned)?;
        f(&conn)
    }

    /// Runs `f` with the connection on the blocking thread pool.
    async fn blocking<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.with_conn(f))
            .await
            .map_err(|e| StoreError::Join(e.to_string()))?
    }
}

/// Returns the default database path: `~/.docintake/data/docintake.db`.
pub fn default_database_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".docintake").join("data").join("docintake.db"))
}

/// Fixed-width UTC timestamps so that text ordering matches time ordering.
fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(id: &str, raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::CorruptRow {
            id: id.to_string(),
            reason: format!("bad timestamp '{}': {}", raw, e),
        })
}

/// A raw `documents` row.
struct DocumentRow {
    id: String,
    storage_key: String,
    bucket_name: String,
    file_name: String,
    file_size: i64,
    content_type: String,
    uploader_id: String,
    uploaded_at: String,
    updated_at: String,
    status: String,
    category: Option<String>,
    attributes: Option<String>,
}

impl DocumentRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            storage_key: row.get("storage_key")?,
            bucket_name: row.get("bucket_name")?,
            file_name: row.get("file_name")?,
            file_size: row.get("file_size")?,
            content_type: row.get("content_type")?,
            uploader_id: row.get("uploader_id")?,
            uploaded_at: row.get("uploaded_at")?,
            updated_at: row.get("updated_at")?,
            status: row.get("status")?,
            category: row.get("category")?,
            attributes: row.get("attributes")?,
        })
    }

    fn into_document(self) -> Result<Document, StoreError> {
        let corrupt = |reason: String| StoreError::CorruptRow {
            id: self.id.clone(),
            reason,
        };

        let status: DocumentStatus = self.status.parse().map_err(corrupt)?;
        let file_size = u64::try_from(self.file_size)
            .map_err(|_| corrupt(format!("negative file size {}", self.file_size)))?;

        let classification = match self.category {
            Some(category) => {
                let attributes = match self.attributes.as_deref() {
                    Some(raw) => serde_json::from_str::<Map<String, Value>>(raw)
                        .map_err(|e| corrupt(format!("bad attributes JSON: {}", e)))?,
                    None => Map::new(),
                };
                Some(Classification::new(category, attributes))
            }
            None => None,
        };

        Ok(Document {
            uploaded_at: parse_ts(&self.id, &self.uploaded_at)?,
            updated_at: parse_ts(&self.id, &self.updated_at)?,
            id: self.id,
            storage_key: self.storage_key,
            bucket_name: self.bucket_name,
            file_name: self.file_name,
            file_size,
            content_type: self.content_type,
            uploader_id: self.uploader_id,
            status,
            classification,
        })
    }
}

fn find_by_id_sync(conn: &Connection, id: &str) -> Result<Option<Document>, StoreError> {
    let sql = format!("SELECT {} FROM documents WHERE id = ?1", COLUMNS);
    conn.query_row(&sql, params![id], DocumentRow::from_row)
        .optional()?
        .map(DocumentRow::into_document)
        .transpose()
}

fn query_documents(
    conn: &Connection,
    sql: &str,
    params: &[&dyn rusqlite::types::ToSql],
) -> Result<Vec<Document>, StoreError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, DocumentRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(DocumentRow::into_document).collect()
}

fn status_list(statuses: &[DocumentStatus]) -> String {
    statuses
        .iter()
        .map(|s| format!("'{}'", s.as_str()))
        .collect::<Vec<_>>()
        .join(", ")
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn insert(&self, document: &Document) -> Result<(), StoreError> {
        let doc = document.clone();
        let attributes = doc
            .classification
            .as_ref()
            .map(|c| serde_json::to_string(&c.attributes))
            .transpose()
            .map_err(|e| StoreError::CorruptRow {
                id: doc.id.clone(),
                reason: e.to_string(),
            })?;
        let file_size = i64::try_from(doc.file_size).map_err(|_| StoreError::CorruptRow {
            id: doc.id.clone(),
            reason: format!("file size {} out of range", doc.file_size),
        })?;

        self.blocking(move |conn| {
            conn.execute(
                &format!(
                    "INSERT INTO documents ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                    COLUMNS
                ),
                params![
                    doc.id,
                    doc.storage_key,
                    doc.bucket_name,
                    doc.file_name,
                    file_size,
                    doc.content_type,
                    doc.uploader_id,
                    format_ts(&doc.uploaded_at),
                    format_ts(&doc.updated_at),
                    doc.status.as_str(),
                    doc.classification.as_ref().map(|c| c.category.clone()),
                    attributes,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn update_status_and_classification(
        &self,
        id: &str,
        status: DocumentStatus,
        classification: Option<&Classification>,
    ) -> Result<Document, StoreError> {
        let id = id.to_string();
        let (category, attributes) = match classification {
            Some(c) if status.carries_classification() => (
                Some(c.category.clone()),
                Some(serde_json::to_string(&c.attributes).map_err(|e| {
                    StoreError::CorruptRow {
                        id: id.clone(),
                        reason: e.to_string(),
                    }
                })?),
            ),
            _ => (None, None),
        };

        self.blocking(move |conn| {
            let predecessors = status.predecessors();
            let changed = if predecessors.is_empty() {
                0
            } else {
                conn.execute(
                    &format!(
                        "UPDATE documents SET status = ?2, category = ?3, attributes = ?4, updated_at = ?5
                         WHERE id = ?1 AND status IN ({})",
                        status_list(predecessors)
                    ),
                    params![
                        id,
                        status.as_str(),
                        category,
                        attributes,
                        format_ts(&Utc::now())
                    ],
                )?
            };

            match find_by_id_sync(conn, &id)? {
                None => Err(StoreError::NotFound(id)),
                Some(doc) if changed == 0 => Err(StoreError::InvalidTransition {
                    id,
                    from: doc.status,
                    to: status,
                }),
                Some(doc) => Ok(doc),
            }
        })
        .await
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Document>, StoreError> {
        let id = id.to_string();
        self.blocking(move |conn| find_by_id_sync(conn, &id)).await
    }

    async fn find_oldest(&self, n: usize) -> Result<Vec<Document>, StoreError> {
        let limit = i64::try_from(n).unwrap_or(i64::MAX);
        self.blocking(move |conn| {
            query_documents(
                conn,
                &format!(
                    "SELECT {} FROM documents ORDER BY uploaded_at ASC, id ASC LIMIT ?1",
                    COLUMNS
                ),
                params![limit],
            )
        })
        .await
    }

    async fn sum_file_sizes(&self) -> Result<u64, StoreError> {
        self.blocking(|conn| {
            let total: i64 = conn.query_row(
                "SELECT COALESCE(SUM(file_size), 0) FROM documents",
                [],
                |r| r.get(0),
            )?;
            Ok(u64::try_from(total).unwrap_or(0))
        })
        .await
    }

    async fn delete_by_id(&self, id: &str) -> Result<bool, StoreError> {
        let id = id.to_string();
        self.blocking(move |conn| {
            let removed = conn.execute("DELETE FROM documents WHERE id = ?1", params![id])?;
            Ok(removed > 0)
        })
        .await
    }

    async fn known_categories(&self) -> Result<Vec<String>, StoreError> {
        self.blocking(|conn| {
            let mut stmt = conn.prepare(
                "SELECT DISTINCT category FROM documents
                 WHERE status = 'PROCESSED' AND category IS NOT NULL
                   AND category NOT IN (?1, ?2, ?3)
                 ORDER BY category",
            )?;
            let categories = stmt
                .query_map(
                    params![UNCLASSIFIED, NOT_IDENTIFIED, PROCESSING_ERROR_CATEGORY],
                    |r| r.get::<_, String>(0),
                )?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(categories)
        })
        .await
    }

    async fn find_stale_processing(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Document>, StoreError> {
        let cutoff = format_ts(&cutoff);
        self.blocking(move |conn| {
            query_documents(
                conn,
                &format!(
                    "SELECT {} FROM documents
                     WHERE status = 'PROCESSING' AND updated_at < ?1
                     ORDER BY updated_at ASC",
                    COLUMNS
                ),
                params![cutoff],
            )
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Upload;
    use chrono::Duration;

    fn doc(name: &str, size: usize) -> Document {
        Document::new_uploaded(&Upload::pdf(name, "u1", vec![0; size]), "documents")
    }

    fn aged(mut d: Document, minutes_ago: i64) -> Document {
        let t = Utc::now() - Duration::minutes(minutes_ago);
        d.uploaded_at = t;
        d.updated_at = t;
        d
    }

    #[tokio::test]
    async fn test_insert_and_find() {
        let store = SqliteDocumentStore::open_in_memory().unwrap();
        let d = doc("a.pdf", 10);
        store.insert(&d).await.unwrap();

        let found = store.find_by_id(&d.id).await.unwrap().unwrap();
        assert_eq!(found.id, d.id);
        assert_eq!(found.status, DocumentStatus::Uploaded);
        assert_eq!(found.file_size, 10);
        assert!(found.classification.is_none());
        assert!(store.find_by_id("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_forward_transitions_and_classification() {
        let store = SqliteDocumentStore::open_in_memory().unwrap();
        let d = doc("a.pdf", 10);
        store.insert(&d).await.unwrap();

        let cls = Classification::new("Invoice", Map::new());
        let p = store
            .update_status_and_classification(&d.id, DocumentStatus::Processing, Some(&cls))
            .await
            .unwrap();
        assert_eq!(p.status, DocumentStatus::Processing);
        assert!(p.classification.is_none());

        let done = store
            .update_status_and_classification(&d.id, DocumentStatus::Processed, Some(&cls))
            .await
            .unwrap();
        assert_eq!(done.status, DocumentStatus::Processed);
        assert_eq!(done.classification, Some(cls));
    }

    #[tokio::test]
    async fn test_regression_rejected() {
        let store = SqliteDocumentStore::open_in_memory().unwrap();
        let d = doc("a.pdf", 10);
        store.insert(&d).await.unwrap();
        store
            .update_status_and_classification(&d.id, DocumentStatus::Processing, None)
            .await
            .unwrap();
        store
            .update_status_and_classification(&d.id, DocumentStatus::Processed, None)
            .await
            .unwrap();

        for to in [
            DocumentStatus::Processing,
            DocumentStatus::Uploaded,
            DocumentStatus::Failed,
            DocumentStatus::Processed,
        ] {
            let err = store
                .update_status_and_classification(&d.id, to, None)
                .await
                .unwrap_err();
            assert!(
                matches!(err, StoreError::InvalidTransition { from: DocumentStatus::Processed, .. }),
                "{} accepted",
                to
            );
        }

        let still = store.find_by_id(&d.id).await.unwrap().unwrap();
        assert_eq!(still.status, DocumentStatus::Processed);
    }

    #[tokio::test]
    async fn test_update_missing_is_not_found() {
        let store = SqliteDocumentStore::open_in_memory().unwrap();
        let err = store
            .update_status_and_classification("nope", DocumentStatus::Processing, None)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_find_oldest_and_sum() {
        let store = SqliteDocumentStore::open_in_memory().unwrap();
        let newest = aged(doc("new.pdf", 1), 1);
        let oldest = aged(doc("old.pdf", 100), 30);
        let middle = aged(doc("mid.pdf", 10), 10);
        for d in [&newest, &oldest, &middle] {
            store.insert(d).await.unwrap();
        }

        let found = store.find_oldest(2).await.unwrap();
        let names: Vec<_> = found.iter().map(|d| d.file_name.as_str()).collect();
        assert_eq!(names, vec!["old.pdf", "mid.pdf"]);
        assert_eq!(store.sum_file_sizes().await.unwrap(), 111);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let store = SqliteDocumentStore::open_in_memory().unwrap();
        let d = doc("a.pdf", 5);
        store.insert(&d).await.unwrap();

        assert!(store.delete_by_id(&d.id).await.unwrap());
        assert!(!store.delete_by_id(&d.id).await.unwrap());
        assert_eq!(store.sum_file_sizes().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_known_categories_skip_sentinels_and_failures() {
        let store = SqliteDocumentStore::open_in_memory().unwrap();
        for (name, category, failed) in [
            ("a.pdf", "Invoice", false),
            ("b.pdf", "Contract", false),
            ("c.pdf", "Invoice", false),
            ("d.pdf", UNCLASSIFIED, false),
            ("e.pdf", NOT_IDENTIFIED, false),
            ("f.pdf", PROCESSING_ERROR_CATEGORY, true),
        ] {
            let d = doc(name, 1);
            store.insert(&d).await.unwrap();
            store
                .update_status_and_classification(&d.id, DocumentStatus::Processing, None)
                .await
                .unwrap();
            let to = if failed {
                DocumentStatus::Failed
            } else {
                DocumentStatus::Processed
            };
            store
                .update_status_and_classification(
                    &d.id,
                    to,
                    Some(&Classification::new(category, Map::new())),
                )
                .await
                .unwrap();
        }

        assert_eq!(
            store.known_categories().await.unwrap(),
            vec!["Contract".to_string(), "Invoice".to_string()]
        );
    }

    #[tokio::test]
    async fn test_find_stale_processing() {
        let store = SqliteDocumentStore::open_in_memory().unwrap();
        let stale = aged(doc("stale.pdf", 1), 60);
        let fresh = doc("fresh.pdf", 1);
        store.insert(&stale).await.unwrap();
        store.insert(&fresh).await.unwrap();

        // Move both to PROCESSING, then backdate the stale one.
        for d in [&stale, &fresh] {
            store
                .update_status_and_classification(&d.id, DocumentStatus::Processing, None)
                .await
                .unwrap();
        }
        let old_ts = format_ts(&(Utc::now() - Duration::minutes(60)));
        let stale_id = stale.id.clone();
        store
            .with_conn(move |conn| {
                conn.execute(
                    "UPDATE documents SET updated_at = ?1 WHERE id = ?2",
                    params![old_ts, stale_id],
                )?;
                Ok(())
            })
            .unwrap();

        let found = store
            .find_stale_processing(Utc::now() - Duration::minutes(30))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, stale.id);
    }

    #[test]
    fn test_open_file_db() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("test.db");
        SqliteDocumentStore::open(&path).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_timestamp_format_is_fixed_width() {
        let a = format_ts(&DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z").unwrap().with_timezone(&Utc));
        let b = format_ts(&Utc::now());
        assert_eq!(a.len(), b.len());
        assert_eq!(a, "2026-01-01T00:00:00.000000Z");
    }

    #[test]
    fn test_default_database_path() {
        let path = default_database_path().unwrap();
        assert!(path.ends_with("docintake.db"));
        assert!(path.to_string_lossy().contains(".docintake"));
    }
}
