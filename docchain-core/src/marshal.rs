//! Record marshaling for insert and update payloads.
//!
//! Values submitted for writing are turned into tagged maps ([`bson::Document`]) just before
//! they reach the backend. The [`Marshal`] trait is the dispatch boundary:
//!
//! - **records** (types deriving [`Record`]) serialize field by field under their wire names;
//!   the update path drops fields tagged `#[record(skip_update)]` and an unset identifier, the
//!   insert path assigns a fresh identifier when the record's identifier is unset
//! - **raw maps** ([`Document`]) pass through; the insert path adds `_id` in place when missing
//! - **sequences** (`Vec<T>`, `[T]`) marshal element by element, order preserved
//! - **pointers** (`&mut T`, `Box<T>`) are dereferenced
//! - **scalars** (any other [`Bson`]) pass through unchanged
//!
//! # Example
//!
//! ```ignore
//! use docchain::{Record, marshal::{marshal_for_insert, marshal_for_update}};
//! use bson::oid::ObjectId;
//! use serde::Serialize;
//!
//! #[derive(Serialize, Record)]
//! struct Constant {
//!     #[serde(rename = "_id")]
//!     id: Option<ObjectId>,
//!     name: String,
//!     #[record(skip_update)]
//!     created_at: i64,
//! }
//!
//! let mut pi = Constant { id: None, name: "pi".into(), created_at: 0 };
//! let insert = marshal_for_insert(&mut pi)?;   // has a generated `_id`
//! let update = marshal_for_update(&mut pi)?;   // has no `created_at`
//! ```

use bson::{Bson, Document, oid::ObjectId};
use serde::Serialize;

use crate::error::{DocumentStoreError, DocumentStoreResult};

/// Wire name under which the generated identifier is stored.
pub const ID_KEY: &str = "_id";

/// Which payload a value is being marshaled for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarshalMode {
    /// Insert payload: identifiers are generated when unset.
    Insert,
    /// Update payload: fields tagged `skip_update` and an unset identifier are left out.
    Update,
}

/// Declared type of a record's identifier field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentifierKind {
    /// `ObjectId` or `Option<ObjectId>`.
    ObjectId,
    /// `String` or `Option<String>`.
    String,
    /// Anything else. Never generated.
    Other,
}

/// Describes a record's identifier field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identifier {
    /// The field's wire name.
    pub wire_name: &'static str,
    /// The field's declared type.
    pub kind: IdentifierKind,
}

/// A typed value with a compile-time wire-name table.
///
/// Usually derived with `#[derive(Record)]`, which reads `#[serde(rename = "...")]` for wire
/// names, `#[record(id)]` for the identifier and `#[record(skip_update)]` for update exclusions.
pub trait Record: Serialize {
    /// The identifier field, if the record has one.
    const IDENTIFIER: Option<Identifier> = None;

    /// Wire names that never appear in update payloads.
    const UPDATE_EXCLUDED: &'static [&'static str] = &[];
}

/// A value that can be turned into a write payload.
pub trait Marshal {
    /// Produces the tagged representation of `self` for `mode`.
    fn marshal(&mut self, mode: MarshalMode) -> DocumentStoreResult<Bson>;
}

/// Marshals `value` for an insert.
pub fn marshal_for_insert<M: Marshal + ?Sized>(value: &mut M) -> DocumentStoreResult<Bson> {
    value.marshal(MarshalMode::Insert)
}

/// Marshals `value` for an update.
pub fn marshal_for_update<M: Marshal + ?Sized>(value: &mut M) -> DocumentStoreResult<Bson> {
    value.marshal(MarshalMode::Update)
}

/// Marshals a [`Record`]. The record itself is never modified.
pub fn marshal_record<R: Record + ?Sized>(record: &R, mode: MarshalMode) -> DocumentStoreResult<Bson> {
    let mut map = bson::serialize_to_document(record)?;

    match mode {
        MarshalMode::Update => {
            for excluded in R::UPDATE_EXCLUDED {
                map.remove(*excluded);
            }
            if let Some(identifier) = R::IDENTIFIER.filter(|identifier| is_unset(&map, *identifier)) {
                map.remove(identifier.wire_name);
            }
        }
        MarshalMode::Insert => {
            if let Some(identifier) = R::IDENTIFIER {
                assign_identifier(&mut map, identifier);
            }
        }
    }

    Ok(Bson::Document(map))
}

fn assign_identifier(map: &mut Document, identifier: Identifier) {
    if !is_unset(map, identifier) {
        return;
    }

    match identifier.kind {
        IdentifierKind::ObjectId => {
            map.insert(ID_KEY, ObjectId::new());
        }
        IdentifierKind::String => {
            map.insert(ID_KEY, ObjectId::new().to_hex());
        }
        IdentifierKind::Other => {}
    }
}

/// Whether the identifier holds no caller-chosen value. `Other` identifiers are always set.
fn is_unset(map: &Document, identifier: Identifier) -> bool {
    let current = map.get(identifier.wire_name);

    match identifier.kind {
        IdentifierKind::ObjectId => is_unset_object_id(current),
        IdentifierKind::String => is_empty_string(current),
        IdentifierKind::Other => false,
    }
}

fn is_unset_object_id(value: Option<&Bson>) -> bool {
    match value {
        None | Some(Bson::Null) => true,
        Some(Bson::ObjectId(oid)) => oid.bytes() == [0u8; 12],
        Some(_) => false,
    }
}

fn is_empty_string(value: Option<&Bson>) -> bool {
    match value {
        None | Some(Bson::Null) => true,
        Some(Bson::String(s)) => s.is_empty(),
        Some(_) => false,
    }
}

/// Unwraps a marshaled value that must be a single document.
pub(crate) fn expect_document(value: Bson) -> DocumentStoreResult<Document> {
    match value {
        Bson::Document(document) => Ok(document),
        other => Err(DocumentStoreError::InvalidDocument(format!(
            "expected a document, got {:?}",
            other.element_type()
        ))),
    }
}

/// Unwraps a marshaled value that must be a sequence of documents.
pub(crate) fn expect_documents(value: Bson) -> DocumentStoreResult<Vec<Document>> {
    match value {
        Bson::Array(items) => items
            .into_iter()
            .map(expect_document)
            .collect(),
        other => Err(DocumentStoreError::InvalidDocument(format!(
            "expected a sequence of documents, got {:?}",
            other.element_type()
        ))),
    }
}

impl Marshal for Document {
    fn marshal(&mut self, mode: MarshalMode) -> DocumentStoreResult<Bson> {
        if mode == MarshalMode::Insert && !self.contains_key(ID_KEY) {
            self.insert(ID_KEY, ObjectId::new());
        }

        Ok(Bson::Document(self.clone()))
    }
}

impl Marshal for Bson {
    fn marshal(&mut self, mode: MarshalMode) -> DocumentStoreResult<Bson> {
        match self {
            Bson::Document(document) => document.marshal(mode),
            Bson::Array(items) => items.as_mut_slice().marshal(mode),
            scalar => Ok(scalar.clone()),
        }
    }
}

impl<T: Marshal> Marshal for [T] {
    fn marshal(&mut self, mode: MarshalMode) -> DocumentStoreResult<Bson> {
        let mut items = Vec::with_capacity(self.len());
        for item in self.iter_mut() {
            items.push(item.marshal(mode)?);
        }

        Ok(Bson::Array(items))
    }
}

impl<T: Marshal> Marshal for Vec<T> {
    fn marshal(&mut self, mode: MarshalMode) -> DocumentStoreResult<Bson> {
        self.as_mut_slice().marshal(mode)
    }
}

impl<T: Marshal + ?Sized> Marshal for &mut T {
    fn marshal(&mut self, mode: MarshalMode) -> DocumentStoreResult<Bson> {
        (**self).marshal(mode)
    }
}

impl<T: Marshal + ?Sized> Marshal for Box<T> {
    fn marshal(&mut self, mode: MarshalMode) -> DocumentStoreResult<Bson> {
        (**self).marshal(mode)
    }
}
