use async_trait::async_trait;
use serde_json::Value;

use crate::application::errors::StorageError;

/// Schemaless stored document
pub type Document = serde_json::Map<String, Value>;

/// Store trait - abstraction for document persistence.
///
/// Filters match on field equality; dotted keys reach into nested objects.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn find_one(&self, collection: &str, filter: &Document) -> Result<Option<Document>, StorageError>;

    /// Insert a new document; a duplicate `_id` is a conflict
    async fn insert(&self, collection: &str, document: Document) -> Result<(), StorageError>;

    /// Set dotted-path fields on the first match, creating it from the
    /// filter when `upsert` is set. Returns whether a document was written.
    async fn update_set(
        &self,
        collection: &str,
        filter: &Document,
        set: &Document,
        upsert: bool,
    ) -> Result<bool, StorageError>;

    async fn delete(&self, collection: &str, filter: &Document) -> Result<bool, StorageError>;

    async fn count(&self, collection: &str, filter: &Document) -> Result<usize, StorageError>;
}

/// Document from a JSON object; anything else yields an empty document
pub fn doc(value: Value) -> Document {
    match value {
        Value::Object(map) => map,
        _ => Document::new(),
    }
}

/// Field at a dotted path
pub fn get_path<'a>(document: &'a Document, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = document.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

pub fn matches(document: &Document, filter: &Document) -> bool {
    filter
        .iter()
        .all(|(key, expected)| get_path(document, key) == Some(expected))
}

/// Apply a `$set` of dotted paths, replacing non-object intermediates
pub fn apply_set(document: &mut Document, set: &Document) {
    for (path, value) in set {
        let segments: Vec<&str> = path.split('.').collect();
        set_path(document, &segments, value.clone());
    }
}

fn set_path(map: &mut Document, segments: &[&str], value: Value) {
    match segments {
        [] => {}
        [last] => {
            map.insert(last.to_string(), value);
        }
        [first, rest @ ..] => {
            let entry = map
                .entry(first.to_string())
                .or_insert_with(|| Value::Object(Document::new()));
            if !entry.is_object() {
                *entry = Value::Object(Document::new());
            }
            if let Value::Object(child) = entry {
                set_path(child, rest, value);
            }
        }
    }
}

/// New document for an upsert: filter fields plus the `$set`
pub fn upserted(filter: &Document, set: &Document) -> Document {
    let mut document = Document::new();
    apply_set(&mut document, filter);
    apply_set(&mut document, set);
    document
}
