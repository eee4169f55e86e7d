use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{Attribute, DataStruct, DeriveInput, Fields, LitStr, Result, Token, meta::ParseNestedMeta};

const ID_KEY: &str = "_id";

#[derive(Default)]
struct SerdeField {
    rename: Option<String>,
    skipped: bool,
}

#[derive(Default)]
struct RecordField {
    id: bool,
    skip_update: bool,
}

/// Consumes the value of a serde attribute we do not interpret.
fn skip_meta_value(meta: &ParseNestedMeta) -> Result<()> {
    if meta.input.peek(Token![=]) {
        meta.value()?.parse::<syn::Expr>()?;
    } else if meta.input.peek(syn::token::Paren) {
        let content;
        syn::parenthesized!(content in meta.input);
        content.parse::<TokenStream2>()?;
    }
    Ok(())
}

fn parse_rename_all(attrs: &[Attribute]) -> Result<Option<String>> {
    let mut rule = None;

    for attr in attrs.iter().filter(|attr| attr.path().is_ident("serde")) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("rename_all") {
                if meta.input.peek(Token![=]) {
                    let s: LitStr = meta.value()?.parse()?;
                    rule = Some(s.value());
                    Ok(())
                } else {
                    meta.parse_nested_meta(|meta| {
                        if meta.path.is_ident("serialize") {
                            let s: LitStr = meta.value()?.parse()?;
                            rule = Some(s.value());
                            Ok(())
                        } else {
                            skip_meta_value(&meta)
                        }
                    })
                }
            } else {
                skip_meta_value(&meta)
            }
        })?;
    }

    Ok(rule)
}

fn parse_serde_field(attrs: &[Attribute]) -> Result<SerdeField> {
    let mut field = SerdeField::default();

    for attr in attrs.iter().filter(|attr| attr.path().is_ident("serde")) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("rename") {
                if meta.input.peek(Token![=]) {
                    let s: LitStr = meta.value()?.parse()?;
                    field.rename = Some(s.value());
                    Ok(())
                } else {
                    meta.parse_nested_meta(|meta| {
                        if meta.path.is_ident("serialize") {
                            let s: LitStr = meta.value()?.parse()?;
                            field.rename = Some(s.value());
                            Ok(())
                        } else {
                            skip_meta_value(&meta)
                        }
                    })
                }
            } else if meta.path.is_ident("skip") || meta.path.is_ident("skip_serializing") {
                field.skipped = true;
                Ok(())
            } else {
                skip_meta_value(&meta)
            }
        })?;
    }

    Ok(field)
}

fn parse_record_field(attrs: &[Attribute]) -> Result<RecordField> {
    let mut field = RecordField::default();

    for attr in attrs.iter().filter(|attr| attr.path().is_ident("record")) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("id") {
                field.id = true;
                Ok(())
            } else if meta.path.is_ident("skip_update") {
                field.skip_update = true;
                Ok(())
            } else {
                Err(meta.error("Unknown record attribute, expected `id` or `skip_update`"))
            }
        })?;
    }

    Ok(field)
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn apply_rename_all(rule: &str, field: &str) -> Option<String> {
    let renamed = match rule {
        "lowercase" => field.to_lowercase(),
        "UPPERCASE" | "SCREAMING_SNAKE_CASE" => field.to_uppercase(),
        "snake_case" => field.to_string(),
        "kebab-case" => field.replace('_', "-"),
        "SCREAMING-KEBAB-CASE" => field.to_uppercase().replace('_', "-"),
        "PascalCase" => field.split('_').map(capitalize).collect(),
        "camelCase" => {
            let pascal: String = field.split('_').map(capitalize).collect();
            let mut chars = pascal.chars();
            match chars.next() {
                Some(first) => first.to_lowercase().chain(chars).collect(),
                None => String::new(),
            }
        }
        _ => return None,
    };
    Some(renamed)
}

/// Last path segment of `ty`, looking through `Option<T>`.
fn identifier_segment(ty: &syn::Type) -> Option<&syn::PathSegment> {
    let syn::Type::Path(path) = ty else {
        return None;
    };
    let segment = path.path.segments.last()?;

    if segment.ident != "Option" {
        return Some(segment);
    }
    match &segment.arguments {
        syn::PathArguments::AngleBracketed(args) => match args.args.first()? {
            syn::GenericArgument::Type(inner) => identifier_segment(inner),
            _ => None,
        },
        _ => None,
    }
}

/// Maps the declared type of an identifier field to an `IdentifierKind` variant.
fn identifier_kind(ty: &syn::Type) -> TokenStream2 {
    let segment = identifier_segment(ty).filter(|segment| segment.arguments.is_empty());

    match segment.map(|segment| segment.ident.to_string()).as_deref() {
        Some("ObjectId") => quote!(::docchain::marshal::IdentifierKind::ObjectId),
        Some("String") => quote!(::docchain::marshal::IdentifierKind::String),
        _ => quote!(::docchain::marshal::IdentifierKind::Other),
    }
}

pub(crate) fn generate_record_for_struct(ast: &DeriveInput, data: &DataStruct) -> Result<TokenStream> {
    let name = &ast.ident;
    let (impl_generics, ty_generics, where_clause) = ast.generics.split_for_impl();

    let Fields::Named(fields) = &data.fields else {
        return Err(syn::Error::new_spanned(
            ast,
            format!(
                "Cannot derive Record for '{}': only structs with named fields are supported",
                name
            ),
        ));
    };

    let rename_all = parse_rename_all(&ast.attrs)?;
    let mut identifier: Option<(String, TokenStream2)> = None;
    let mut implicit_identifier: Option<(String, TokenStream2)> = None;
    let mut named_identifier: Option<(String, TokenStream2)> = None;
    let mut update_excluded = Vec::new();

    for field in &fields.named {
        let serde = parse_serde_field(&field.attrs)?;
        let record = parse_record_field(&field.attrs)?;

        let Some(ident) = field.ident.as_ref() else {
            continue;
        };
        let declared = ident.to_string();
        let declared = declared.trim_start_matches("r#");

        let wire_name = match (serde.rename, &rename_all) {
            (Some(rename), _) => rename,
            (None, Some(rule)) => apply_rename_all(rule, declared).ok_or_else(|| {
                syn::Error::new_spanned(ast, format!("Unsupported serde rename_all rule '{}'", rule))
            })?,
            (None, None) => declared.to_string(),
        };

        if record.id {
            if identifier.is_some() {
                return Err(syn::Error::new_spanned(field, "Multiple #[record(id)] fields are not allowed"));
            }
            identifier = Some((wire_name.clone(), identifier_kind(&field.ty)));
        } else if wire_name == ID_KEY && !serde.skipped {
            implicit_identifier = Some((wire_name.clone(), identifier_kind(&field.ty)));
        } else if declared == "id" && !serde.skipped {
            named_identifier = Some((wire_name.clone(), identifier_kind(&field.ty)));
        }

        if record.skip_update && !serde.skipped {
            update_excluded.push(wire_name);
        }
    }

    let identifier_code = match identifier.or(implicit_identifier).or(named_identifier) {
        Some((wire_name, kind)) => quote! {
            ::core::option::Option::Some(::docchain::marshal::Identifier {
                wire_name: #wire_name,
                kind: #kind,
            })
        },
        None => quote!(::core::option::Option::None),
    };

    let generated = quote! {
        impl #impl_generics ::docchain::marshal::Record for #name #ty_generics #where_clause {
            const IDENTIFIER: ::core::option::Option<::docchain::marshal::Identifier> = #identifier_code;
            const UPDATE_EXCLUDED: &'static [&'static str] = &[#(#update_excluded),*];
        }

        impl #impl_generics ::docchain::marshal::Marshal for #name #ty_generics #where_clause {
            fn marshal(
                &mut self,
                mode: ::docchain::marshal::MarshalMode,
            ) -> ::docchain::error::DocumentStoreResult<::docchain::bson::Bson> {
                ::docchain::marshal::marshal_record(&*self, mode)
            }
        }
    };

    Ok(generated.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rename_all_rules_follow_serde() {
        assert_eq!(apply_rename_all("camelCase", "created_at").as_deref(), Some("createdAt"));
        assert_eq!(apply_rename_all("PascalCase", "created_at").as_deref(), Some("CreatedAt"));
        assert_eq!(apply_rename_all("kebab-case", "created_at").as_deref(), Some("created-at"));
        assert_eq!(apply_rename_all("SCREAMING_SNAKE_CASE", "created_at").as_deref(), Some("CREATED_AT"));
        assert_eq!(apply_rename_all("Title Case", "created_at"), None);
    }

    fn first_field(item: syn::ItemStruct) -> syn::Field {
        item.fields.into_iter().next().unwrap()
    }

    #[test]
    fn serde_attributes_yield_wire_names() {
        let field = first_field(syn::parse_quote! {
            struct Constant {
                #[serde(default, rename = "_id", skip_serializing_if = "Option::is_none")]
                id: Option<ObjectId>,
            }
        });
        let serde = parse_serde_field(&field.attrs).unwrap();

        assert_eq!(serde.rename.as_deref(), Some("_id"));
        assert!(!serde.skipped);
    }

    #[test]
    fn unknown_record_attributes_are_rejected() {
        let field = first_field(syn::parse_quote! {
            struct Constant {
                #[record(primary)]
                id: String,
            }
        });

        assert!(parse_record_field(&field.attrs).is_err());
    }

    fn kind_of(ty: syn::Type) -> String {
        identifier_kind(&ty).to_string().replace(' ', "")
    }

    #[test]
    fn identifier_kind_reads_the_last_path_segment() {
        assert!(kind_of(syn::parse_quote!(ObjectId)).ends_with("IdentifierKind::ObjectId"));
        assert!(kind_of(syn::parse_quote!(Option<bson::oid::ObjectId>)).ends_with("IdentifierKind::ObjectId"));
        assert!(kind_of(syn::parse_quote!(String)).ends_with("IdentifierKind::String"));
        assert!(kind_of(syn::parse_quote!(::std::option::Option<String>)).ends_with("IdentifierKind::String"));

        assert!(kind_of(syn::parse_quote!(Vec<String>)).ends_with("IdentifierKind::Other"));
        assert!(kind_of(syn::parse_quote!(ObjectIdList)).ends_with("IdentifierKind::Other"));
        assert!(kind_of(syn::parse_quote!(Option<Vec<ObjectId>>)).ends_with("IdentifierKind::Other"));
        assert!(kind_of(syn::parse_quote!(i64)).ends_with("IdentifierKind::Other"));
    }
}
