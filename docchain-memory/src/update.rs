//! Applying updates and building upsert documents.

use bson::{Bson, Document};

use docchain_core::{
    backend::Update,
    error::{DocumentStoreError, DocumentStoreResult},
    marshal::ID_KEY,
};

use crate::{
    filter::operator_document,
    path::{get_path, remove_path, set_path},
    pipeline::{add_fields, stage_entry, unset_fields},
};

fn is_operator_update(update: &Document) -> bool {
    update.keys().next().is_some_and(|key| key.starts_with('$'))
}

fn modifier_fields<'b>(operator: &str, fields: &'b Bson) -> DocumentStoreResult<&'b Document> {
    fields
        .as_document()
        .ok_or_else(|| DocumentStoreError::InvalidDocument(format!("{operator} requires a document")))
}

fn increment(path: &str, current: Option<&Bson>, by: &Bson) -> DocumentStoreResult<Bson> {
    let overflow = || DocumentStoreError::InvalidDocument(format!("$inc overflows the value of field '{path}'"));

    let sum = match (current.unwrap_or(&Bson::Int32(0)), by) {
        (Bson::Int32(a), Bson::Int32(b)) => match a.checked_add(*b) {
            Some(sum) => Bson::Int32(sum),
            None => Bson::Int64(i64::from(*a) + i64::from(*b)),
        },
        (Bson::Int32(a), Bson::Int64(b)) => i64::from(*a)
            .checked_add(*b)
            .map(Bson::Int64)
            .ok_or_else(overflow)?,
        (Bson::Int64(a), Bson::Int32(b)) => a
            .checked_add(i64::from(*b))
            .map(Bson::Int64)
            .ok_or_else(overflow)?,
        (Bson::Int64(a), Bson::Int64(b)) => a
            .checked_add(*b)
            .map(Bson::Int64)
            .ok_or_else(overflow)?,
        (Bson::Double(a), Bson::Double(b)) => Bson::Double(a + b),
        (Bson::Double(a), Bson::Int32(b)) => Bson::Double(a + f64::from(*b)),
        (Bson::Double(a), Bson::Int64(b)) => Bson::Double(a + *b as f64),
        (Bson::Int32(a), Bson::Double(b)) => Bson::Double(f64::from(*a) + b),
        (Bson::Int64(a), Bson::Double(b)) => Bson::Double(*a as f64 + b),
        _ => {
            return Err(DocumentStoreError::InvalidDocument(format!(
                "cannot apply $inc to non-numeric field '{path}'"
            )));
        }
    };

    Ok(sum)
}

fn apply_modifiers(document: &mut Document, modifiers: &Document) -> DocumentStoreResult<()> {
    for (operator, fields) in modifiers {
        let fields = modifier_fields(operator, fields)?;

        match operator.as_str() {
            "$set" => {
                for (path, value) in fields {
                    set_path(document, path, value.clone())?;
                }
            }
            "$unset" => {
                for path in fields.keys() {
                    remove_path(document, path);
                }
            }
            "$inc" => {
                for (path, by) in fields {
                    let sum = increment(path, get_path(document, path), by)?;
                    set_path(document, path, sum)?;
                }
            }
            other => {
                return Err(DocumentStoreError::Unsupported(format!("update operator {other}")));
            }
        }
    }

    Ok(())
}

fn replace(document: &mut Document, replacement: &Document) {
    let id = document.get(ID_KEY).cloned();
    let mut replaced = Document::new();

    if let Some(id) = id {
        replaced.insert(ID_KEY, id);
    }
    for (key, value) in replacement {
        if key != ID_KEY {
            replaced.insert(key, value.clone());
        }
    }

    *document = replaced;
}

fn apply_stage(document: &mut Document, stage: &Document) -> DocumentStoreResult<()> {
    match stage_entry(stage)? {
        ("$set" | "$addFields", Bson::Document(fields)) => add_fields(document, fields),
        ("$unset", spec) => unset_fields(document, spec),
        (name @ ("$set" | "$addFields"), _) => Err(DocumentStoreError::InvalidDocument(format!(
            "{name} requires a document"
        ))),
        (other, _) => Err(DocumentStoreError::Unsupported(format!("update pipeline stage {other}"))),
    }
}

/// Applies `update` to `document` in place.
///
/// Operator documents support `$set`, `$unset` and `$inc`; documents without operators replace
/// everything but `_id`; pipelines support `$set`, `$addFields` and `$unset` stages.
pub(crate) fn apply_update(document: &mut Document, update: &Update) -> DocumentStoreResult<()> {
    match update {
        Update::Modifiers(modifiers) if modifiers.is_empty() => Err(DocumentStoreError::InvalidDocument(
            "update document must not be empty".to_string(),
        )),
        Update::Modifiers(modifiers) if is_operator_update(modifiers) => apply_modifiers(document, modifiers),
        Update::Modifiers(replacement) => {
            replace(document, replacement);
            Ok(())
        }
        Update::Pipeline(stages) => {
            for stage in stages {
                apply_stage(document, stage)?;
            }
            Ok(())
        }
    }
}

fn collect_equalities(filter: &Document, seed: &mut Document) -> DocumentStoreResult<()> {
    for (key, value) in filter {
        match key.as_str() {
            "$and" => {
                for clause in value.as_array().into_iter().flatten() {
                    if let Bson::Document(clause) = clause {
                        collect_equalities(clause, seed)?;
                    }
                }
            }
            operator if operator.starts_with('$') => {}
            field => match operator_document(value) {
                Some(operators) => {
                    if let Some(equal) = operators.get("$eq") {
                        set_path(seed, field, equal.clone())?;
                    }
                }
                None => set_path(seed, field, value.clone())?,
            },
        }
    }

    Ok(())
}

/// Builds the document an upsert inserts when `filter` matched nothing: the filter's equality
/// fields with `update` applied on top.
pub(crate) fn upsert_document(filter: &Document, update: &Update) -> DocumentStoreResult<Document> {
    let mut document = Document::new();
    collect_equalities(filter, &mut document)?;

    match update {
        Update::Modifiers(replacement) if !replacement.is_empty() && !is_operator_update(replacement) => {
            let mut replaced = replacement.clone();
            if let (false, Some(id)) = (replaced.contains_key(ID_KEY), document.get(ID_KEY)) {
                replaced.insert(ID_KEY, id.clone());
            }
            Ok(replaced)
        }
        update => {
            apply_update(&mut document, update)?;
            Ok(document)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn set_unset_and_inc() {
        let mut document = doc! { "_id": 1, "name": "pi", "hits": 1, "stale": true };
        apply_update(
            &mut document,
            &Update::Modifiers(doc! {
                "$set": { "value": 3.14159, "meta.kind": "irrational" },
                "$unset": { "stale": "" },
                "$inc": { "hits": 2, "misses": 1 },
            }),
        )
        .unwrap();

        assert_eq!(
            document,
            doc! {
                "_id": 1,
                "name": "pi",
                "hits": 3,
                "value": 3.14159,
                "meta": { "kind": "irrational" },
                "misses": 1,
            }
        );
    }

    #[test]
    fn inc_widens_on_overflow() {
        let mut document = doc! { "count": i32::MAX };
        apply_update(&mut document, &Update::Modifiers(doc! { "$inc": { "count": 1 } })).unwrap();

        assert_eq!(document.get("count"), Some(&Bson::Int64(i64::from(i32::MAX) + 1)));
    }

    #[test]
    fn inc_rejects_int64_overflow() {
        let mut document = doc! { "count": i64::MAX };
        let err = apply_update(&mut document, &Update::Modifiers(doc! { "$inc": { "count": 1_i64 } }))
            .unwrap_err();

        assert!(matches!(err, DocumentStoreError::InvalidDocument(_)));
        assert_eq!(document.get("count"), Some(&Bson::Int64(i64::MAX)));
    }

    #[test]
    fn replacement_keeps_id() {
        let mut document = doc! { "_id": 1, "name": "pi", "value": 3.14 };
        apply_update(&mut document, &Update::Modifiers(doc! { "name": "tau" })).unwrap();

        assert_eq!(document, doc! { "_id": 1, "name": "tau" });
    }

    #[test]
    fn pipeline_stages_apply_in_order() {
        let mut document = doc! { "_id": 1, "name": "pi", "value": 3.14 };
        apply_update(
            &mut document,
            &Update::Pipeline(vec![
                doc! { "$set": { "previous": "$value", "value": 3.14159 } },
                doc! { "$unset": "name" },
            ]),
        )
        .unwrap();

        assert_eq!(document, doc! { "_id": 1, "value": 3.14159, "previous": 3.14 });
    }

    #[test]
    fn unknown_operators_are_unsupported() {
        let mut document = doc! { "tags": [] };

        assert!(matches!(
            apply_update(&mut document, &Update::Modifiers(doc! { "$push": { "tags": "a" } })),
            Err(DocumentStoreError::Unsupported(_))
        ));
    }

    #[test]
    fn upsert_seeds_from_filter_equalities() {
        let document = upsert_document(
            &doc! { "name": "pi", "value": { "$gt": 3 }, "$and": [{ "kind": { "$eq": "irrational" } }] },
            &Update::Pipeline(vec![doc! { "$set": { "value": 3.14159 } }]),
        )
        .unwrap();

        assert_eq!(document, doc! { "name": "pi", "kind": "irrational", "value": 3.14159 });
    }

    #[test]
    fn upsert_replacement_inherits_filter_id() {
        let document = upsert_document(
            &doc! { "_id": 7 },
            &Update::Modifiers(doc! { "name": "pi" }),
        )
        .unwrap();

        assert_eq!(document, doc! { "name": "pi", "_id": 7 });
    }
}
