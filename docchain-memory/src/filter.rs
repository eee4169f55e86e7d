//! Parsing MongoDB filter documents into [`Expr`] trees.

use bson::{Bson, Document};

use docchain_core::{
    error::{DocumentStoreError, DocumentStoreResult},
    query::{Expr, FieldOp},
};

fn unsupported(operator: &str) -> DocumentStoreError {
    DocumentStoreError::Unsupported(format!("query operator {operator}"))
}

/// Returns the document when every key of `value` is an operator.
pub(crate) fn operator_document(value: &Bson) -> Option<&Document> {
    match value {
        Bson::Document(document) if document.keys().next().is_some_and(|key| key.starts_with('$')) => Some(document),
        _ => None,
    }
}

fn truthy(value: &Bson) -> bool {
    match value {
        Bson::Boolean(value) => *value,
        Bson::Int32(value) => *value != 0,
        Bson::Int64(value) => *value != 0,
        Bson::Double(value) => *value != 0.0,
        Bson::Null => false,
        _ => true,
    }
}

/// Parses a filter document. The empty document matches everything.
pub(crate) fn parse_filter(filter: &Document) -> DocumentStoreResult<Expr> {
    let mut clauses = Vec::with_capacity(filter.len());

    for (key, value) in filter {
        clauses.push(match key.as_str() {
            "$and" => Expr::And(parse_clauses(key, value)?),
            "$or" => Expr::Or(parse_clauses(key, value)?),
            "$nor" => Expr::Or(parse_clauses(key, value)?).not(),
            operator if operator.starts_with('$') => return Err(unsupported(operator)),
            field => match operator_document(value) {
                Some(operators) => parse_operators(field, operators)?,
                None => Expr::field(field.to_string(), FieldOp::Eq, value.clone()),
            },
        });
    }

    Ok(Expr::And(clauses))
}

fn parse_clauses(operator: &str, value: &Bson) -> DocumentStoreResult<Vec<Expr>> {
    let clauses = match value {
        Bson::Array(clauses) if !clauses.is_empty() => clauses,
        _ => {
            return Err(DocumentStoreError::InvalidDocument(format!(
                "{operator} requires a non-empty array"
            )));
        }
    };

    clauses
        .iter()
        .map(|clause| match clause {
            Bson::Document(clause) => parse_filter(clause),
            _ => Err(DocumentStoreError::InvalidDocument(format!(
                "{operator} entries must be documents"
            ))),
        })
        .collect()
}

fn parse_operators(field: &str, operators: &Document) -> DocumentStoreResult<Expr> {
    let options = operators.get_str("$options").unwrap_or_default();
    let mut clauses = Vec::with_capacity(operators.len());

    for (operator, operand) in operators {
        let op = match operator.as_str() {
            "$eq" => FieldOp::Eq,
            "$ne" => FieldOp::Ne,
            "$gt" => FieldOp::Gt,
            "$gte" => FieldOp::Gte,
            "$lt" => FieldOp::Lt,
            "$lte" => FieldOp::Lte,
            "$in" => FieldOp::AnyOf,
            "$nin" => FieldOp::NoneOf,
            "$all" => FieldOp::Contains,
            "$regex" => FieldOp::Matches(options.to_string()),
            "$options" if operators.contains_key("$regex") => continue,
            "$exists" => {
                clauses.push(Expr::Exists(field.to_string(), truthy(operand)));
                continue;
            }
            "$not" => {
                let Some(inner) = operator_document(operand) else {
                    return Err(DocumentStoreError::InvalidDocument("$not requires an operator document".to_string()));
                };
                clauses.push(parse_operators(field, inner)?.not());
                continue;
            }
            other => return Err(unsupported(other)),
        };

        if matches!(op, FieldOp::AnyOf | FieldOp::NoneOf | FieldOp::Contains) && !matches!(operand, Bson::Array(_)) {
            return Err(DocumentStoreError::InvalidDocument(format!("{operator} requires an array")));
        }

        clauses.push(Expr::field(field.to_string(), op, operand.clone()));
    }

    Ok(match clauses.len() {
        1 => clauses.remove(0),
        _ => Expr::And(clauses),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn empty_filter_is_an_empty_conjunction() {
        assert_eq!(parse_filter(&Document::new()).unwrap(), Expr::And(vec![]));
    }

    #[test]
    fn implicit_equality_and_operator_documents() {
        let expr = parse_filter(&doc! { "name": "pi", "value": { "$gt": 3, "$lt": 4 } }).unwrap();

        assert_eq!(
            expr,
            Expr::And(vec![
                Expr::field("name".into(), FieldOp::Eq, Bson::String("pi".into())),
                Expr::And(vec![
                    Expr::field("value".into(), FieldOp::Gt, Bson::Int32(3)),
                    Expr::field("value".into(), FieldOp::Lt, Bson::Int32(4)),
                ]),
            ])
        );
    }

    #[test]
    fn embedded_documents_without_operators_are_equality() {
        let expr = parse_filter(&doc! { "meta": { "kind": "math" } }).unwrap();

        assert_eq!(
            expr,
            Expr::And(vec![Expr::field("meta".into(), FieldOp::Eq, Bson::Document(doc! { "kind": "math" }))])
        );
    }

    #[test]
    fn regex_carries_its_options() {
        let expr = parse_filter(&doc! { "name": { "$regex": "^p", "$options": "i" } }).unwrap();

        assert_eq!(
            expr,
            Expr::And(vec![Expr::field("name".into(), FieldOp::Matches("i".into()), Bson::String("^p".into()))])
        );
    }

    #[test]
    fn nor_and_not_become_negations() {
        let expr = parse_filter(&doc! {
            "$nor": [{ "name": "pi" }],
            "value": { "$not": { "$gt": 3 } },
        })
        .unwrap();

        let Expr::And(clauses) = expr else { panic!("expected a conjunction") };
        assert!(matches!(clauses[0], Expr::Not(_)));
        assert!(matches!(clauses[1], Expr::Not(_)));
    }

    #[test]
    fn unknown_operators_are_unsupported() {
        assert!(matches!(
            parse_filter(&doc! { "tags": { "$size": 2 } }),
            Err(DocumentStoreError::Unsupported(_))
        ));
        assert!(matches!(
            parse_filter(&doc! { "$where": "true" }),
            Err(DocumentStoreError::Unsupported(_))
        ));
    }

    #[test]
    fn membership_operators_require_arrays() {
        assert!(matches!(
            parse_filter(&doc! { "name": { "$in": "pi" } }),
            Err(DocumentStoreError::InvalidDocument(_))
        ));
    }
}
