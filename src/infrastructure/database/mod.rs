//! SQLite-backed document store
//!
//! Documents are stored as JSON text in a single `documents` table keyed by
//! `(collection, id)`. Filters carrying `_id` read that one row; any other
//! filter scans the collection and matches after decoding. Rows that fail to
//! decode are logged and skipped.

use async_trait::async_trait;
use rusqlite::{params, Connection, ErrorCode};
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::application::errors::StorageError;
use crate::domain::traits::store::{apply_set, matches, upserted};
use crate::domain::traits::{Document, DocumentStore};
use crate::infrastructure::storage::ensure_id;

pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    pub fn in_memory() -> Result<Self, StorageError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StorageError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS documents (
                collection TEXT NOT NULL,
                id TEXT NOT NULL,
                body TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now')),
                PRIMARY KEY (collection, id)
            )",
            [],
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool
    async fn run<F, T>(&self, f: F) -> Result<T, StorageError>
    where
        F: FnOnce(&Connection) -> Result<T, StorageError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|_| StorageError::Database("Connection lock poisoned".to_string()))?;
            f(&conn)
        })
        .await
        .map_err(|e| StorageError::Database(e.to_string()))?
    }
}

fn id_of(document: &Document) -> String {
    match document.get("_id") {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

/// Rows of `collection` that may match `filter`, decoded
fn candidates(conn: &Connection, collection: &str, filter: &Document) -> Result<Vec<(String, Document)>, StorageError> {
    let rows: Vec<(String, String)> = if filter.contains_key("_id") {
        let mut stmt = conn.prepare("SELECT id, body FROM documents WHERE collection = ?1 AND id = ?2")?;
        let rows = stmt.query_map(params![collection, id_of(filter)], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let rows = rows.collect::<Result<Vec<_>, _>>()?;
        rows
    } else {
        let mut stmt = conn.prepare("SELECT id, body FROM documents WHERE collection = ?1 ORDER BY rowid")?;
        let rows = stmt.query_map([collection], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let rows = rows.collect::<Result<Vec<_>, _>>()?;
        rows
    };

    let mut out = Vec::new();
    for (id, body) in rows {
        match serde_json::from_str::<Document>(&body) {
            Ok(document) if matches(&document, filter) => out.push((id, document)),
            Ok(_) => {}
            Err(e) => tracing::error!(collection, id = %id, "Skipping undecodable document: {}", e),
        }
    }
    Ok(out)
}

fn insert_row(conn: &Connection, collection: &str, document: &Document) -> Result<(), StorageError> {
    let body = serde_json::to_string(document)?;
    let id = id_of(document);
    match conn.execute(
        "INSERT INTO documents (collection, id, body) VALUES (?1, ?2, ?3)",
        params![collection, id, body],
    ) {
        Ok(_) => Ok(()),
        Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
            Err(StorageError::Conflict(format!("{} {}", collection, id)))
        }
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn find_one(&self, collection: &str, filter: &Document) -> Result<Option<Document>, StorageError> {
        let collection = collection.to_string();
        let filter = filter.clone();
        self.run(move |conn| {
            Ok(candidates(conn, &collection, &filter)?
                .into_iter()
                .map(|(_, d)| d)
                .next())
        })
        .await
    }

    async fn insert(&self, collection: &str, mut document: Document) -> Result<(), StorageError> {
        ensure_id(&mut document);
        let collection = collection.to_string();
        self.run(move |conn| insert_row(conn, &collection, &document)).await
    }

    async fn update_set(
        &self,
        collection: &str,
        filter: &Document,
        set: &Document,
        upsert: bool,
    ) -> Result<bool, StorageError> {
        let collection = collection.to_string();
        let filter = filter.clone();
        let set = set.clone();

        self.run(move |conn| {
            let existing = candidates(conn, &collection, &filter)?.into_iter().next();

            match existing {
                Some((id, mut document)) => {
                    apply_set(&mut document, &set);
                    conn.execute(
                        "UPDATE documents SET body = ?1, updated_at = datetime('now')
                         WHERE collection = ?2 AND id = ?3",
                        params![serde_json::to_string(&document)?, collection, id],
                    )?;
                    Ok(true)
                }
                None if upsert => {
                    let mut document = upserted(&filter, &set);
                    ensure_id(&mut document);
                    insert_row(conn, &collection, &document)?;
                    Ok(true)
                }
                None => Ok(false),
            }
        })
        .await
    }

    async fn delete(&self, collection: &str, filter: &Document) -> Result<bool, StorageError> {
        let collection = collection.to_string();
        let filter = filter.clone();
        self.run(move |conn| {
            let Some((id, _)) = candidates(conn, &collection, &filter)?.into_iter().next() else {
                return Ok(false);
            };
            conn.execute(
                "DELETE FROM documents WHERE collection = ?1 AND id = ?2",
                params![collection, id],
            )?;
            Ok(true)
        })
        .await
    }

    async fn count(&self, collection: &str, filter: &Document) -> Result<usize, StorageError> {
        let collection = collection.to_string();
        let filter = filter.clone();
        self.run(move |conn| {
            Ok(candidates(conn, &collection, &filter)?.len())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::traits::store::doc;
    use serde_json::json;

    #[tokio::test]
    async fn documents_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("guildhost.db");

        {
            let store = SqliteStore::open(&path).unwrap();
            store
                .update_set("guilds", &doc(json!({"_id": "g"})), &doc(json!({"settings.language": "pt"})), true)
                .await
                .unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        let found = store.find_one("guilds", &doc(json!({"_id": "g"}))).await.unwrap().unwrap();
        assert_eq!(found["settings"]["language"], "pt");
    }

    #[tokio::test]
    async fn insert_conflict_and_delete() {
        let store = SqliteStore::in_memory().unwrap();
        store.insert("guilds", doc(json!({"_id": "g", "settings": {}}))).await.unwrap();
        assert!(matches!(
            store.insert("guilds", doc(json!({"_id": "g"}))).await,
            Err(StorageError::Conflict(_))
        ));

        assert_eq!(store.count("guilds", &doc(json!({}))).await.unwrap(), 1);
        assert!(store.delete("guilds", &doc(json!({"_id": "g"}))).await.unwrap());
        assert_eq!(store.count("guilds", &doc(json!({}))).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn update_merges_nested_fields() {
        let store = SqliteStore::in_memory().unwrap();
        let filter = doc(json!({"_id": "g"}));
        store.insert("guilds", doc(json!({"_id": "g", "settings": {"a": 1}}))).await.unwrap();
        store.update_set("guilds", &filter, &doc(json!({"settings.b": 2})), false).await.unwrap();

        let found = store.find_one("guilds", &filter).await.unwrap().unwrap();
        assert_eq!(found["settings"], json!({"a": 1, "b": 2}));
    }

    #[tokio::test]
    async fn corrupt_rows_do_not_hide_other_documents() {
        let store = SqliteStore::in_memory().unwrap();
        store.insert("guilds", doc(json!({"_id": "A", "settings": {"a": 1}}))).await.unwrap();
        store
            .run(|conn| {
                conn.execute(
                    "INSERT INTO documents (collection, id, body) VALUES ('guilds', 'B', '{not json')",
                    [],
                )?;
                Ok(())
            })
            .await
            .unwrap();

        let filter = doc(json!({"_id": "A"}));
        let found = store.find_one("guilds", &filter).await.unwrap().unwrap();
        assert_eq!(found["settings"]["a"], 1);
        assert!(store.update_set("guilds", &filter, &doc(json!({"settings.b": 2})), false).await.unwrap());

        // scans skip the broken row instead of failing
        assert_eq!(store.count("guilds", &doc(json!({}))).await.unwrap(), 1);
        let by_field = store.find_one("guilds", &doc(json!({"settings.b": 2}))).await.unwrap();
        assert_eq!(by_field.unwrap()["_id"], "A");
        assert!(store.find_one("guilds", &doc(json!({"_id": "B"}))).await.unwrap().is_none());
    }
}
