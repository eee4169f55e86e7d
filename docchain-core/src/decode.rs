//! Decoding query results into caller-supplied targets.

use bson::Document;
use futures::{StreamExt, stream::BoxStream};
use serde::de::DeserializeOwned;

use crate::error::{DocumentStoreError, DocumentStoreResult};

/// A server-side result iterator. Dropping it closes the cursor.
pub type DocumentCursor = BoxStream<'static, DocumentStoreResult<Document>>;

fn decode<T: DeserializeOwned>(document: Document) -> DocumentStoreResult<T> {
    bson::deserialize_from_document(document)
        .map_err(|e| DocumentStoreError::ShapeMismatch(e.to_string()))
}

/// Decodes a single document into `target`. On failure `target` is left as it was.
pub fn decode_one<T: DeserializeOwned>(document: Document, target: &mut T) -> DocumentStoreResult<()> {
    *target = decode(document)?;
    Ok(())
}

/// Drains `cursor`, decoding every document, and replaces `target` with the results.
///
/// Pre-existing elements of `target` are discarded. If any document fails to decode, or the
/// cursor reports an error, `target` is left as it was. The cursor is closed on every path.
pub async fn decode_many<T: DeserializeOwned>(
    mut cursor: DocumentCursor,
    target: &mut Vec<T>,
) -> DocumentStoreResult<()> {
    let mut items = Vec::new();

    while let Some(document) = cursor.next().await {
        items.push(decode(document?)?);
    }

    *target = items;
    Ok(())
}
