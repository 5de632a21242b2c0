//! Derive macro support for `subject-core`.
//!
//! The property table itself is declared at runtime through
//! `SubjectCore::builder` (there is no compile-time source generator in
//! scope here); what this crate saves is the handful of lines every subject
//! type would otherwise repeat to implement the `Subject` trait over its
//! embedded `SubjectCore` field.

use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, Data, DeriveInput, Error, Fields};

/// Implements `subject_core::Subject` for a struct with a `SubjectCore`
/// field.
///
/// The field is located by `#[subject(core)]`, or by falling back to a
/// field literally named `core` if no attribute is present.
///
/// ```ignore
/// #[derive(Subject)]
/// struct Sensor {
///     #[subject(core)]
///     core: SubjectCore,
/// }
/// ```
#[proc_macro_derive(Subject, attributes(subject))]
pub fn derive_subject(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    expand_derive(input)
        .unwrap_or_else(|err| err.to_compile_error())
        .into()
}

fn expand_derive(input: DeriveInput) -> Result<proc_macro2::TokenStream, Error> {
    let ident = input.ident.clone();
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let fields = match &input.data {
        Data::Struct(data) => &data.fields,
        _ => {
            return Err(Error::new_spanned(
                &input.ident,
                "#[derive(Subject)] only supports structs",
            ));
        }
    };

    let core_field = find_core_field(fields)?;

    Ok(quote! {
        impl #impl_generics ::subject_core::Subject for #ident #ty_generics #where_clause {
            fn core(&self) -> &::subject_core::subject::SubjectCore {
                &self.#core_field
            }

            fn as_any(&self) -> &dyn ::std::any::Any {
                self
            }
        }
    })
}

fn find_core_field(fields: &Fields) -> Result<syn::Ident, Error> {
    let named = match fields {
        Fields::Named(named) => named,
        _ => {
            return Err(Error::new_spanned(
                fields,
                "#[derive(Subject)] requires a struct with named fields",
            ));
        }
    };

    let mut attributed = None;
    let mut fallback = None;

    for field in &named.named {
        let ident = field
            .ident
            .clone()
            .expect("Fields::Named always has an ident");

        if has_core_attr(field) {
            if attributed.is_some() {
                return Err(Error::new_spanned(
                    field,
                    "only one field may be marked #[subject(core)]",
                ));
            }
            attributed = Some(ident.clone());
        }

        if ident == "core" {
            fallback = Some(ident);
        }
    }

    attributed.or(fallback).ok_or_else(|| {
        Error::new_spanned(
            named,
            "#[derive(Subject)] needs a field marked #[subject(core)], or a field named `core`",
        )
    })
}

fn has_core_attr(field: &syn::Field) -> bool {
    field.attrs.iter().any(|attr| {
        if !attr.path().is_ident("subject") {
            return false;
        }
        let mut found = false;
        let _ = attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("core") {
                found = true;
            }
            Ok(())
        });
        found
    })
}
