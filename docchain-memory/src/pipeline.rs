//! Projection, aggregation stages, and the expression subset both of them share with
//! pipeline updates.

use bson::{Bson, Document, doc};

use docchain_core::{
    error::{DocumentStoreError, DocumentStoreResult},
    marshal::ID_KEY,
};

use crate::{
    evaluator::{matches, sort_documents},
    filter::parse_filter,
    path::{get_path, remove_path, set_path},
};

fn unsupported_stage(stage: &str) -> DocumentStoreError {
    DocumentStoreError::Unsupported(format!("pipeline stage {stage}"))
}

/// Splits a `{ "$stage": spec }` document.
pub(crate) fn stage_entry(stage: &Document) -> DocumentStoreResult<(&str, &Bson)> {
    let mut entries = stage.iter();

    match (entries.next(), entries.next()) {
        (Some((name, spec)), None) => Ok((name.as_str(), spec)),
        _ => Err(DocumentStoreError::InvalidDocument(
            "a pipeline stage must have exactly one field".to_string(),
        )),
    }
}

fn stage_document<'b>(name: &str, spec: &'b Bson) -> DocumentStoreResult<&'b Document> {
    spec.as_document()
        .ok_or_else(|| DocumentStoreError::InvalidDocument(format!("{name} requires a document")))
}

fn stage_count(name: &str, spec: &Bson) -> DocumentStoreResult<usize> {
    let count = match spec {
        Bson::Int32(value) => i64::from(*value),
        Bson::Int64(value) => *value,
        Bson::Double(value) if value.fract() == 0.0 => *value as i64,
        _ => -1,
    };

    usize::try_from(count)
        .map_err(|_| DocumentStoreError::InvalidDocument(format!("{name} requires a non-negative integer")))
}

/// Evaluates an aggregation expression against `input`. `None` means the value is missing.
///
/// Supports literals, `"$field.path"` references, `{ "$literal": v }`, and documents or arrays
/// built from those.
pub(crate) fn evaluate_expression(input: &Document, expression: &Bson) -> DocumentStoreResult<Option<Bson>> {
    match expression {
        Bson::String(reference) if reference.starts_with("$$") => Err(DocumentStoreError::Unsupported(
            format!("aggregation variable {reference}"),
        )),
        Bson::String(reference) if reference.starts_with('$') => Ok(get_path(input, &reference[1..]).cloned()),
        Bson::Document(document) => {
            if let Some(literal) = document.get("$literal") {
                return Ok(Some(literal.clone()));
            }
            if let Some(operator) = document.keys().find(|key| key.starts_with('$')) {
                return Err(DocumentStoreError::Unsupported(format!("expression operator {operator}")));
            }

            let mut evaluated = Document::new();
            for (key, value) in document {
                if let Some(value) = evaluate_expression(input, value)? {
                    evaluated.insert(key, value);
                }
            }
            Ok(Some(Bson::Document(evaluated)))
        }
        Bson::Array(items) => Ok(Some(Bson::Array(
            items
                .iter()
                .map(|item| Ok(evaluate_expression(input, item)?.unwrap_or(Bson::Null)))
                .collect::<DocumentStoreResult<Vec<_>>>()?,
        ))),
        literal => Ok(Some(literal.clone())),
    }
}

/// Applies a `$set`/`$addFields` specification. Expressions see the document as it was
/// before the stage.
pub(crate) fn add_fields(document: &mut Document, fields: &Document) -> DocumentStoreResult<()> {
    let input = document.clone();

    for (path, expression) in fields {
        match evaluate_expression(&input, expression)? {
            Some(value) => set_path(document, path, value)?,
            None => {
                remove_path(document, path);
            }
        }
    }

    Ok(())
}

/// Applies an `$unset` specification: one path or an array of paths.
pub(crate) fn unset_fields(document: &mut Document, spec: &Bson) -> DocumentStoreResult<()> {
    let paths = match spec {
        Bson::String(path) => vec![path.as_str()],
        Bson::Array(items) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .ok_or_else(|| DocumentStoreError::InvalidDocument("$unset paths must be strings".to_string()))
            })
            .collect::<DocumentStoreResult<Vec<_>>>()?,
        _ => {
            return Err(DocumentStoreError::InvalidDocument(
                "$unset requires a path or an array of paths".to_string(),
            ));
        }
    };

    for path in paths {
        remove_path(document, path);
    }

    Ok(())
}

fn projection_flag(field: &str, flag: &Bson) -> DocumentStoreResult<bool> {
    match flag {
        Bson::Boolean(flag) => Ok(*flag),
        Bson::Int32(flag) => Ok(*flag != 0),
        Bson::Int64(flag) => Ok(*flag != 0),
        Bson::Double(flag) => Ok(*flag != 0.0),
        _ => Err(DocumentStoreError::Unsupported(format!("projection expression for '{field}'"))),
    }
}

/// Applies an inclusion or exclusion projection. `_id` is kept unless excluded explicitly.
pub(crate) fn project(document: &Document, projection: &Document) -> DocumentStoreResult<Document> {
    let mut include_id = true;
    let mut inclusions = Vec::new();
    let mut exclusions = Vec::new();

    for (field, flag) in projection {
        let included = projection_flag(field, flag)?;
        if field == ID_KEY {
            include_id = included;
        } else if included {
            inclusions.push(field.as_str());
        } else {
            exclusions.push(field.as_str());
        }
    }

    if !inclusions.is_empty() && !exclusions.is_empty() {
        return Err(DocumentStoreError::InvalidDocument(
            "a projection cannot mix inclusion and exclusion".to_string(),
        ));
    }

    if inclusions.is_empty() {
        let mut projected = document.clone();
        for field in exclusions {
            remove_path(&mut projected, field);
        }
        if !include_id {
            projected.remove(ID_KEY);
        }
        return Ok(projected);
    }

    let mut projected = Document::new();
    if let (true, Some(id)) = (include_id, document.get(ID_KEY)) {
        projected.insert(ID_KEY, id.clone());
    }
    for field in inclusions {
        if let Some(value) = get_path(document, field) {
            set_path(&mut projected, field, value.clone())?;
        }
    }

    Ok(projected)
}

/// Runs an aggregation pipeline over `documents`.
pub(crate) fn aggregate(mut documents: Vec<Document>, pipeline: &[Document]) -> DocumentStoreResult<Vec<Document>> {
    for stage in pipeline {
        let (name, spec) = stage_entry(stage)?;

        documents = match name {
            "$match" => {
                let expr = parse_filter(stage_document(name, spec)?)?;
                let mut matched = Vec::with_capacity(documents.len());
                for document in documents {
                    if matches(&document, &expr)? {
                        matched.push(document);
                    }
                }
                matched
            }
            "$sort" => {
                sort_documents(&mut documents, stage_document(name, spec)?)?;
                documents
            }
            "$skip" => {
                let count = stage_count(name, spec)?;
                documents.into_iter().skip(count).collect()
            }
            "$limit" => {
                let count = stage_count(name, spec)?;
                documents.into_iter().take(count).collect()
            }
            "$project" => {
                let projection = stage_document(name, spec)?;
                documents
                    .iter()
                    .map(|document| project(document, projection))
                    .collect::<DocumentStoreResult<Vec<_>>>()?
            }
            "$set" | "$addFields" => {
                let fields = stage_document(name, spec)?;
                for document in &mut documents {
                    add_fields(document, fields)?;
                }
                documents
            }
            "$unset" => {
                for document in &mut documents {
                    unset_fields(document, spec)?;
                }
                documents
            }
            "$count" => {
                let field = spec
                    .as_str()
                    .filter(|field| !field.is_empty() && !field.starts_with('$'))
                    .ok_or_else(|| DocumentStoreError::InvalidDocument("$count requires a field name".to_string()))?;

                match documents.len() {
                    0 => Vec::new(),
                    count => vec![doc! { field: count as i32 }],
                }
            }
            other => return Err(unsupported_stage(other)),
        };
    }

    Ok(documents)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constants() -> Vec<Document> {
        vec![
            doc! { "_id": 1, "name": "pi", "value": 3.14159, "kind": "irrational" },
            doc! { "_id": 2, "name": "e", "value": 2.71828, "kind": "irrational" },
            doc! { "_id": 3, "name": "one", "value": 1.0, "kind": "integer" },
        ]
    }

    #[test]
    fn inclusion_projection_keeps_id_by_default() {
        let projected = project(&constants()[0], &doc! { "name": 1 }).unwrap();

        assert_eq!(projected, doc! { "_id": 1, "name": "pi" });
    }

    #[test]
    fn exclusion_projection_can_drop_id() {
        let projected = project(&constants()[0], &doc! { "_id": 0, "kind": 0 }).unwrap();

        assert_eq!(projected, doc! { "name": "pi", "value": 3.14159 });
    }

    #[test]
    fn mixed_projection_is_rejected() {
        assert!(matches!(
            project(&constants()[0], &doc! { "name": 1, "kind": 0 }),
            Err(DocumentStoreError::InvalidDocument(_))
        ));
    }

    #[test]
    fn match_sort_limit_project() {
        let results = aggregate(
            constants(),
            &[
                doc! { "$match": { "kind": "irrational" } },
                doc! { "$sort": { "value": 1 } },
                doc! { "$limit": 1 },
                doc! { "$project": { "_id": 0, "name": 1 } },
            ],
        )
        .unwrap();

        assert_eq!(results, vec![doc! { "name": "e" }]);
    }

    #[test]
    fn count_stage_reports_matches() {
        let results = aggregate(
            constants(),
            &[doc! { "$match": { "value": { "$gt": 2 } } }, doc! { "$count": "total" }],
        )
        .unwrap();

        assert_eq!(results, vec![doc! { "total": 2 }]);
    }

    #[test]
    fn add_fields_copies_references_and_literals() {
        let results = aggregate(
            constants(),
            &[
                doc! { "$skip": 2 },
                doc! { "$addFields": { "label": "$name", "meta.flag": { "$literal": "$raw" } } },
                doc! { "$unset": ["kind", "value"] },
            ],
        )
        .unwrap();

        assert_eq!(
            results,
            vec![doc! { "_id": 3, "name": "one", "label": "one", "meta": { "flag": "$raw" } }]
        );
    }

    #[test]
    fn unknown_stages_and_operators_are_unsupported() {
        assert!(matches!(
            aggregate(constants(), &[doc! { "$group": { "_id": "$kind" } }]),
            Err(DocumentStoreError::Unsupported(_))
        ));
        assert!(matches!(
            aggregate(constants(), &[doc! { "$set": { "double": { "$multiply": ["$value", 2] } } }]),
            Err(DocumentStoreError::Unsupported(_))
        ));
    }
}
