//! Derive macro for the `Trace` trait.

use proc_macro2::TokenStream;
use quote::{format_ident, quote, quote_spanned};
use syn::{
    parse_macro_input, parse_quote, spanned::Spanned, Attribute, Data, DeriveInput, Field, Fields,
    GenericParam, Generics, Ident, Index, Path,
};

/// Derives `stw_gc::Trace` by tracing every field in declaration order.
///
/// Fields annotated with `#[stw_gc(skip)]` are not traced; use it for fields
/// that can never hold an `ObjRef`. The crate path can be overridden with
/// `#[stw_gc(crate = path::to::stw_gc)]` on the type.
#[proc_macro_derive(Trace, attributes(stw_gc))]
pub fn derive_trace(input: proc_macro::TokenStream) -> proc_macro::TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let mut stw_gc: Path = parse_quote!(::stw_gc);

    for attr in &input.attrs {
        if !attr.path().is_ident("stw_gc") {
            continue;
        }

        let result = attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("crate") {
                stw_gc = meta.value()?.parse()?;
                Ok(())
            } else {
                Err(meta.error("unsupported attribute"))
            }
        });

        if let Err(err) = result {
            return err.into_compile_error().into();
        }
    }

    let name = &input.ident;
    let generics = add_trait_bounds(&stw_gc, input.generics);
    let (impl_generics, ty_generics, where_clause) = generics.split_for_impl();
    let trace_body = match generate_trace_body(&stw_gc, name, &input.data) {
        Ok(body) => body,
        Err(err) => return err.into_compile_error().into(),
    };

    let generated = quote! {
        impl #impl_generics #stw_gc::Trace for #name #ty_generics #where_clause {
            #[inline]
            #[allow(unused_variables)]
            fn trace(&self, visitor: &mut dyn #stw_gc::Visitor) {
                #trace_body
            }
        }
    };

    generated.into()
}

fn add_trait_bounds(stw_gc: &Path, mut generics: Generics) -> Generics {
    for param in &mut generics.params {
        if let GenericParam::Type(ref mut type_param) = *param {
            let has_trace = type_param.bounds.iter().any(|b| {
                if let syn::TypeParamBound::Trait(t) = b {
                    t.path.segments.last().is_some_and(|s| s.ident == "Trace")
                } else {
                    false
                }
            });

            if !has_trace {
                type_param.bounds.push(parse_quote!(#stw_gc::Trace));
            }
        }
    }
    generics
}

fn is_skipped(attrs: &[Attribute]) -> syn::Result<bool> {
    let mut skip = false;
    for attr in attrs {
        if !attr.path().is_ident("stw_gc") {
            continue;
        }
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("skip") {
                skip = true;
                Ok(())
            } else {
                Err(meta.error("unsupported field attribute, expected `skip`"))
            }
        })?;
    }
    Ok(skip)
}

fn traced_fields<'a>(
    fields: impl Iterator<Item = &'a Field>,
) -> syn::Result<Vec<(usize, &'a Field)>> {
    let mut traced = Vec::new();
    for (i, field) in fields.enumerate() {
        if !is_skipped(&field.attrs)? {
            traced.push((i, field));
        }
    }
    Ok(traced)
}

fn generate_trace_body(stw_gc: &Path, name: &Ident, data: &Data) -> syn::Result<TokenStream> {
    match data {
        Data::Struct(data) => generate_struct_trace(stw_gc, &data.fields),
        Data::Enum(data) => generate_enum_trace(stw_gc, name, data),
        Data::Union(u) => Ok(quote_spanned! {
            u.union_token.span => compile_error!("`Trace` must be manually implemented for unions");
        }),
    }
}

fn generate_struct_trace(stw_gc: &Path, fields: &Fields) -> syn::Result<TokenStream> {
    match fields {
        Fields::Named(f) => {
            let trace_calls = traced_fields(f.named.iter())?
                .into_iter()
                .map(|(_, field)| {
                    let name = &field.ident;
                    quote_spanned! {field.span() =>
                        #stw_gc::Trace::trace(&self.#name, visitor);
                    }
                })
                .collect::<Vec<_>>();
            Ok(quote! { #(#trace_calls)* })
        }
        Fields::Unnamed(f) => {
            let trace_calls = traced_fields(f.unnamed.iter())?
                .into_iter()
                .map(|(i, field)| {
                    let index = Index::from(i);
                    quote_spanned! {field.span() =>
                        #stw_gc::Trace::trace(&self.#index, visitor);
                    }
                })
                .collect::<Vec<_>>();
            Ok(quote! { #(#trace_calls)* })
        }
        Fields::Unit => Ok(quote! {}),
    }
}

fn generate_enum_trace(
    stw_gc: &Path,
    name: &Ident,
    data: &syn::DataEnum,
) -> syn::Result<TokenStream> {
    let mut match_arms = Vec::with_capacity(data.variants.len());

    for variant in &data.variants {
        let var_name = &variant.ident;
        let arm = match &variant.fields {
            Fields::Named(f) => {
                let traced = traced_fields(f.named.iter())?;
                let bindings = traced.iter().map(|(i, field)| {
                    let binding = format_ident!("field{}", i);
                    let ident = &field.ident;
                    quote! { #ident: #binding }
                });
                let trace_calls = traced.iter().map(|(i, _)| {
                    let binding = format_ident!("field{}", i);
                    quote! { #stw_gc::Trace::trace(#binding, visitor); }
                });

                quote! {
                    #name::#var_name { #(#bindings,)* .. } => {
                        #(#trace_calls)*
                    }
                }
            }
            Fields::Unnamed(f) => {
                let traced = traced_fields(f.unnamed.iter())?;
                let patterns = (0..f.unnamed.len()).map(|i| {
                    if traced.iter().any(|(t, _)| *t == i) {
                        let binding = format_ident!("field{}", i);
                        quote! { #binding }
                    } else {
                        quote! { _ }
                    }
                });
                let trace_calls = traced.iter().map(|(i, _)| {
                    let binding = format_ident!("field{}", i);
                    quote! { #stw_gc::Trace::trace(#binding, visitor); }
                });

                quote! {
                    #name::#var_name(#(#patterns),*) => {
                        #(#trace_calls)*
                    }
                }
            }
            Fields::Unit => {
                quote! {
                    #name::#var_name => {}
                }
            }
        };
        match_arms.push(arm);
    }

    if match_arms.is_empty() {
        return Ok(quote! {});
    }

    Ok(quote! {
        match self {
            #(#match_arms)*
        }
    })
}
