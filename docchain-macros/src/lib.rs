//! Procedural macros for the docchain project.
//!
//! ## Macros
//!
//! ### `Record`
//!
//! Derives `docchain::marshal::Record` and `docchain::marshal::Marshal` for a struct with named
//! fields, so it can be passed to `insert_one`, `insert_many`, `update_one` and `update_many`.
//!
//! - **Supported for**: Structs with named fields only
//! - **Wire names**: taken from `#[serde(rename = "...")]` and `#[serde(rename_all = "...")]`
//! - **Field attribute**: `#[record(id)]` marks the identifier field
//! - **Field attribute**: `#[record(skip_update)]` keeps a field out of update payloads
//!
//! Without `#[record(id)]`, the identifier is the field whose wire name is `_id`, else a field
//! named `id`.
//!
//! # Examples
//!
//! ```rust,ignore
//! use docchain::prelude::*;
//!
//! #[derive(Serialize, Deserialize, Record)]
//! pub struct Constant {
//!     #[record(id)]
//!     #[serde(rename = "_id")]
//!     pub id: Option<ObjectId>,
//!     pub name: String,
//!     #[record(skip_update)]
//!     pub created_by: String,
//! }
//! ```

extern crate proc_macro;
mod record;

use crate::record::generate_record_for_struct;
use proc_macro::TokenStream;
use syn::{Data, DeriveInput};

/// Derives `Record` and `Marshal` for a struct with named fields.
///
/// The struct must also derive (or implement) `serde::Serialize`.
///
/// # Attributes
///
/// - `#[record(id)]` - Marks the identifier field (at most one)
/// - `#[record(skip_update)]` - Excludes the field from update payloads
///
/// # Errors
///
/// Returns a compile error if:
/// - Applied to an enum, a union, a tuple struct or a unit struct
/// - More than one field is marked `#[record(id)]`
/// - An unknown `record` attribute is used
#[proc_macro_derive(Record, attributes(record))]
pub fn derive_record(input: TokenStream) -> TokenStream {
    let ast = syn::parse_macro_input!(input as DeriveInput);

    match ast.data {
        Data::Struct(ref data) => match generate_record_for_struct(&ast, data) {
            Ok(token_stream) => token_stream,
            Err(e) => e.to_compile_error().into(),
        },
        Data::Enum(_) => {
            let error = syn::Error::new_spanned(
                &ast,
                "Cannot derive Record for enums. Only structs with named fields are supported.",
            );
            error.to_compile_error().into()
        }
        Data::Union(_) => {
            let error = syn::Error::new_spanned(
                &ast,
                "Cannot derive Record for unions. Only structs with named fields are supported.",
            );
            error.to_compile_error().into()
        }
    }
}
