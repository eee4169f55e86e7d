//! Query expression evaluation for in-memory document filtering.
//!
//! This module provides the evaluation engine for query expressions and the ordering used
//! by sort stages. Arrays fan out the way MongoDB's do: `{ tags: "a" }` matches a document
//! whose `tags` array contains `"a"`.

use bson::{Bson, Document, datetime::DateTime, oid::ObjectId};
use regex::{Regex, RegexBuilder};
use std::{cmp::Ordering, collections::HashMap};

use docchain_core::{
    error::{DocumentStoreError, DocumentStoreResult},
    query::{Expr, FieldOp, QueryVisitor},
};

use crate::path::get_path;

static NULL: Bson = Bson::Null;

/// Type-erased, comparable representation of BSON values.
///
/// Numeric types are normalized to f64 so `1`, `1i64` and `1.0` compare equal.
#[derive(Debug)]
pub(crate) enum Comparable<'a> {
    /// Null value
    Null,
    /// Boolean value
    Bool(bool),
    /// Numeric value (all integers and floats normalized to f64)
    Number(f64),
    /// DateTime value
    DateTime(DateTime),
    /// String value
    String(&'a str),
    /// ObjectId value
    ObjectId(ObjectId),
    /// Array of comparable values
    Array(Vec<Comparable<'a>>),
    /// Map/Object of comparable values
    Map(HashMap<&'a str, Comparable<'a>>),
    /// Anything else, compared structurally
    Other(&'a Bson),
}

impl<'a> From<&'a Bson> for Comparable<'a> {
    fn from(bson: &'a Bson) -> Self {
        match bson {
            Bson::Null => Comparable::Null,
            Bson::Boolean(value) => Comparable::Bool(*value),
            Bson::Int32(value) => Comparable::Number(*value as f64),
            Bson::Int64(value) => Comparable::Number(*value as f64),
            Bson::Double(value) => Comparable::Number(*value),
            Bson::DateTime(value) => Comparable::DateTime(*value),
            Bson::String(value) => Comparable::String(value),
            Bson::ObjectId(value) => Comparable::ObjectId(*value),
            Bson::Array(arr) => Comparable::Array(
                arr
                    .iter()
                    .map(Comparable::from)
                    .collect::<Vec<_>>()
            ),
            Bson::Document(doc) => Comparable::Map(
                doc
                    .iter()
                    .map(|(k, v)| (k.as_str(), Comparable::from(v)))
                    .collect::<HashMap<_, _>>()
            ),
            other => Comparable::Other(other),
        }
    }
}

impl<'a> PartialEq for Comparable<'a> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Comparable::Null, Comparable::Null) => true,
            (Comparable::Bool(a), Comparable::Bool(b)) => a == b,
            (Comparable::Number(a), Comparable::Number(b)) => a == b,
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a == b,
            (Comparable::String(a), Comparable::String(b)) => a == b,
            (Comparable::ObjectId(a), Comparable::ObjectId(b)) => a == b,
            (Comparable::Array(a), Comparable::Array(b)) => a == b,
            (Comparable::Map(a), Comparable::Map(b)) => a == b,
            (Comparable::Other(a), Comparable::Other(b)) => a == b,
            _ => false,
        }
    }
}

impl<'a> PartialOrd for Comparable<'a> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Comparable::Null, Comparable::Null) => Some(Ordering::Equal),
            (Comparable::Bool(a), Comparable::Bool(b)) => a.partial_cmp(b),
            (Comparable::Number(a), Comparable::Number(b)) => a.partial_cmp(b),
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a.partial_cmp(b),
            (Comparable::String(a), Comparable::String(b)) => a.partial_cmp(b),
            (Comparable::ObjectId(a), Comparable::ObjectId(b)) => a.bytes().partial_cmp(&b.bytes()),
            (Comparable::Array(a), Comparable::Array(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

/// Whether two values are equal, treating all numeric types alike.
pub(crate) fn values_equal(left: &Bson, right: &Bson) -> bool {
    Comparable::from(left) == Comparable::from(right)
}

/// Position of a value's type in MongoDB's cross-type sort order.
fn type_rank(value: &Bson) -> u8 {
    match value {
        Bson::MinKey => 0,
        Bson::Null => 1,
        Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) | Bson::Decimal128(_) => 2,
        Bson::String(_) => 3,
        Bson::Document(_) => 4,
        Bson::Array(_) => 5,
        Bson::Binary(_) => 6,
        Bson::ObjectId(_) => 7,
        Bson::Boolean(_) => 8,
        Bson::DateTime(_) => 9,
        Bson::Timestamp(_) => 10,
        Bson::RegularExpression(_) => 11,
        Bson::MaxKey => 13,
        _ => 12,
    }
}

/// Total order over optional values; a missing field sorts like `null`.
pub(crate) fn compare_values(left: Option<&Bson>, right: Option<&Bson>) -> Ordering {
    let left = left.unwrap_or(&NULL);
    let right = right.unwrap_or(&NULL);

    type_rank(left)
        .cmp(&type_rank(right))
        .then_with(|| {
            Comparable::from(left)
                .partial_cmp(&Comparable::from(right))
                .unwrap_or(Ordering::Equal)
        })
}

fn sort_descending(field: &str, direction: &Bson) -> DocumentStoreResult<bool> {
    let direction = match direction {
        Bson::Int32(value) => *value as f64,
        Bson::Int64(value) => *value as f64,
        Bson::Double(value) => *value,
        _ => f64::NAN,
    };

    if direction == 1.0 {
        Ok(false)
    } else if direction == -1.0 {
        Ok(true)
    } else {
        Err(DocumentStoreError::InvalidDocument(format!(
            "sort direction for '{field}' must be 1 or -1"
        )))
    }
}

/// Stable multi-key sort by a MongoDB sort document.
pub(crate) fn sort_documents(documents: &mut [Document], sort: &Document) -> DocumentStoreResult<()> {
    let keys = sort
        .iter()
        .map(|(field, direction)| Ok((field.as_str(), sort_descending(field, direction)?)))
        .collect::<DocumentStoreResult<Vec<_>>>()?;

    documents.sort_by(|a, b| {
        keys.iter()
            .map(|(field, descending)| {
                let ordering = compare_values(get_path(a, field), get_path(b, field));
                if *descending { ordering.reverse() } else { ordering }
            })
            .find(|ordering| ordering.is_ne())
            .unwrap_or(Ordering::Equal)
    });

    Ok(())
}

fn build_regex(pattern: &str, options: &str) -> DocumentStoreResult<Regex> {
    let mut builder = RegexBuilder::new(pattern);
    for option in options.chars() {
        match option {
            'i' => builder.case_insensitive(true),
            'm' => builder.multi_line(true),
            's' => builder.dot_matches_new_line(true),
            'x' => builder.ignore_whitespace(true),
            other => {
                return Err(DocumentStoreError::Unsupported(format!("regex option '{other}'")));
            }
        };
    }

    builder
        .build()
        .map_err(|e| DocumentStoreError::InvalidDocument(format!("invalid regex '{pattern}': {e}")))
}

/// The value itself, followed by its elements when it is an array.
fn candidates(value: &Bson) -> impl Iterator<Item = &Bson> {
    let elements = match value {
        Bson::Array(items) => items.as_slice(),
        _ => &[],
    };

    std::iter::once(value).chain(elements)
}

fn strings(value: &Bson) -> impl Iterator<Item = &str> {
    candidates(value).filter_map(Bson::as_str)
}

fn operand_array<'b>(op: &str, value: &'b Bson) -> DocumentStoreResult<&'b [Bson]> {
    value
        .as_array()
        .map(Vec::as_slice)
        .ok_or_else(|| DocumentStoreError::InvalidDocument(format!("{op} requires an array")))
}

pub(crate) struct DocumentEvaluator<'a> {
    document: &'a Document,
}

impl<'a> DocumentEvaluator<'a> {
    pub fn new(document: &'a Document) -> Self {
        Self { document }
    }

    pub fn evaluate(&mut self, expr: &Expr) -> DocumentStoreResult<bool> {
        self.visit_expr(expr)
    }

    fn equals(field_value: &Bson, operand: &Bson) -> bool {
        candidates(field_value).any(|candidate| values_equal(candidate, operand))
    }

    fn any_of(field_value: Option<&Bson>, operands: &[Bson]) -> bool {
        match field_value {
            Some(value) => operands.iter().any(|operand| Self::equals(value, operand)),
            None => operands.iter().any(|operand| matches!(operand, Bson::Null)),
        }
    }

    fn compare(field_value: &Bson, op: &FieldOp, operand: &Bson) -> bool {
        let operand = Comparable::from(operand);

        candidates(field_value).any(|candidate| {
            match Comparable::from(candidate).partial_cmp(&operand) {
                Some(ordering) => match op {
                    FieldOp::Gt => ordering.is_gt(),
                    FieldOp::Gte => ordering.is_ge(),
                    FieldOp::Lt => ordering.is_lt(),
                    FieldOp::Lte => ordering.is_le(),
                    _ => false,
                },
                None => false,
            }
        })
    }

    fn contains(field_value: &Bson, operand: &Bson) -> bool {
        match (field_value, operand) {
            (Bson::Array(items), Bson::Array(required)) => required
                .iter()
                .all(|value| items.iter().any(|item| values_equal(item, value))),
            (_, Bson::String(needle)) => {
                let needle = needle.to_lowercase();
                strings(field_value).any(|haystack| haystack.to_lowercase().contains(&needle))
            }
            (Bson::Array(items), value) => items.iter().any(|item| values_equal(item, value)),
            _ => false,
        }
    }
}

impl<'a> QueryVisitor for DocumentEvaluator<'a> {
    type Output = bool;
    type Error = DocumentStoreError;

    fn visit_and(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        for expr in exprs {
            if !self.visit_expr(expr)? {
                return Ok(false);
            }
        }

        Ok(true)
    }

    fn visit_or(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        for expr in exprs {
            if self.visit_expr(expr)? {
                return Ok(true);
            }
        }

        Ok(false)
    }

    fn visit_not(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error> {
        Ok(!self.visit_expr(expr)?)
    }

    fn visit_exists(&mut self, field: &str, should_exist: bool) -> Result<Self::Output, Self::Error> {
        Ok(get_path(self.document, field).is_some() == should_exist)
    }

    fn visit_field(&mut self, field: &str, op: &FieldOp, value: &Bson) -> Result<Self::Output, Self::Error> {
        let field_value = get_path(self.document, field);

        match op {
            FieldOp::Eq => Ok(Self::equals(field_value.unwrap_or(&NULL), value)),
            FieldOp::Ne => Ok(!Self::equals(field_value.unwrap_or(&NULL), value)),
            FieldOp::AnyOf => Ok(Self::any_of(field_value, operand_array("$in", value)?)),
            FieldOp::NoneOf => Ok(!Self::any_of(field_value, operand_array("$nin", value)?)),
            FieldOp::Matches(options) => {
                let pattern = value
                    .as_str()
                    .ok_or_else(|| DocumentStoreError::InvalidDocument("$regex requires a string".to_string()))?;
                let regex = build_regex(pattern, options)?;

                Ok(field_value.is_some_and(|value| strings(value).any(|s| regex.is_match(s))))
            }
            _ => {
                let Some(field_value) = field_value else {
                    return Ok(matches!(op, FieldOp::NotContains));
                };

                Ok(match op {
                    FieldOp::Gt | FieldOp::Gte | FieldOp::Lt | FieldOp::Lte => Self::compare(field_value, op, value),
                    FieldOp::Contains => Self::contains(field_value, value),
                    FieldOp::NotContains => !Self::contains(field_value, value),
                    FieldOp::StartsWith | FieldOp::EndsWith => {
                        let affix = value
                            .as_str()
                            .map(str::to_lowercase)
                            .unwrap_or_default();

                        strings(field_value).any(|s| {
                            let s = s.to_lowercase();
                            match op {
                                FieldOp::StartsWith => s.starts_with(&affix),
                                _ => s.ends_with(&affix),
                            }
                        })
                    }
                    _ => false,
                })
            }
        }
    }
}

/// Whether `document` satisfies `expr`.
pub(crate) fn matches(document: &Document, expr: &Expr) -> DocumentStoreResult<bool> {
    DocumentEvaluator::new(document).evaluate(expr)
}
