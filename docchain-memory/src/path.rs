//! Dotted field paths (`address.city`, `tags.0`) over BSON documents.

use bson::{Bson, Document};

use docchain_core::error::{DocumentStoreError, DocumentStoreResult};

/// Resolves `path` inside `document`. Numeric segments index into arrays.
pub(crate) fn get_path<'a>(document: &'a Document, path: &str) -> Option<&'a Bson> {
    let mut segments = path.split('.');
    let mut current = document.get(segments.next()?)?;

    for segment in segments {
        current = match current {
            Bson::Document(child) => child.get(segment)?,
            Bson::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }

    Some(current)
}

/// Sets `path` to `value`, creating intermediate documents as needed.
pub(crate) fn set_path(document: &mut Document, path: &str, value: Bson) -> DocumentStoreResult<()> {
    let Some((head, rest)) = path.split_once('.') else {
        document.insert(path, value);
        return Ok(());
    };

    if !document.contains_key(head) {
        document.insert(head, Document::new());
    }

    match document.get_mut(head) {
        Some(Bson::Document(child)) => set_path(child, rest, value),
        _ => Err(DocumentStoreError::InvalidDocument(format!(
            "cannot create field '{rest}' in non-document field '{head}'"
        ))),
    }
}

/// Removes `path` and returns its previous value.
pub(crate) fn remove_path(document: &mut Document, path: &str) -> Option<Bson> {
    match path.split_once('.') {
        None => document.remove(path),
        Some((head, rest)) => match document.get_mut(head) {
            Some(Bson::Document(child)) => remove_path(child, rest),
            _ => None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn nested_paths_resolve_through_documents_and_arrays() {
        let document = doc! { "address": { "city": "Lyon" }, "tags": ["a", "b"] };

        assert_eq!(get_path(&document, "address.city"), Some(&Bson::String("Lyon".into())));
        assert_eq!(get_path(&document, "tags.1"), Some(&Bson::String("b".into())));
        assert_eq!(get_path(&document, "address.zip"), None);
        assert_eq!(get_path(&document, "tags.city"), None);
    }

    #[test]
    fn set_path_creates_intermediate_documents() {
        let mut document = doc! { "name": "pi" };
        set_path(&mut document, "meta.source.kind", Bson::String("math".into())).unwrap();

        assert_eq!(document, doc! { "name": "pi", "meta": { "source": { "kind": "math" } } });
    }

    #[test]
    fn set_path_refuses_to_descend_into_scalars() {
        let mut document = doc! { "name": "pi" };

        assert!(set_path(&mut document, "name.first", Bson::Null).is_err());
    }

    #[test]
    fn remove_path_returns_the_removed_value() {
        let mut document = doc! { "meta": { "kind": "math", "rank": 1 } };

        assert_eq!(remove_path(&mut document, "meta.kind"), Some(Bson::String("math".into())));
        assert_eq!(document, doc! { "meta": { "rank": 1 } });
        assert_eq!(remove_path(&mut document, "missing.kind"), None);
    }
}
