//! AspectMetadata 派生实现

use proc_macro2::TokenStream;
use quote::quote;
use syn::{DeriveInput, Error, Expr, LitStr, Result};

use crate::utils::to_camel_case;

/// `#[aspect(...)]` 中的配置
#[derive(Default)]
struct AspectAttrs {
    name: Option<String>,
    order: Option<Expr>,
    per_this: Option<LitStr>,
    per_target: Option<LitStr>,
    register: bool,
}

fn parse_aspect_attrs(input: &DeriveInput) -> Result<AspectAttrs> {
    let mut attrs = AspectAttrs::default();
    for attr in &input.attrs {
        if !attr.path().is_ident("aspect") {
            continue;
        }
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("name") {
                attrs.name = Some(meta.value()?.parse::<LitStr>()?.value());
            } else if meta.path.is_ident("order") {
                attrs.order = Some(meta.value()?.parse()?);
            } else if meta.path.is_ident("per_this") {
                attrs.per_this = Some(meta.value()?.parse()?);
            } else if meta.path.is_ident("per_target") {
                attrs.per_target = Some(meta.value()?.parse()?);
            } else if meta.path.is_ident("register") {
                attrs.register = true;
            } else {
                return Err(meta.error("unsupported aspect attribute"));
            }
            Ok(())
        })?;
    }
    if attrs.per_this.is_some() && attrs.per_target.is_some() {
        return Err(Error::new_spanned(
            &input.ident,
            "an aspect can declare at most one of `per_this` and `per_target`",
        ));
    }
    Ok(attrs)
}

pub fn impl_aspect_metadata(input: &DeriveInput) -> Result<TokenStream> {
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();
    let attrs = parse_aspect_attrs(input)?;

    let aspect_name = attrs.name.unwrap_or_else(|| to_camel_case(&name.to_string()));

    let order = attrs.order.map(|order| {
        quote! {
            fn aspect_order() -> ::std::option::Option<i32> {
                ::std::option::Option::Some(#order)
            }
        }
    });

    let model = match (attrs.per_this, attrs.per_target) {
        (Some(expr), _) => Some(quote! {
            fn instantiation_model() -> ::weaver_aop::InstantiationModel {
                ::weaver_aop::InstantiationModel::PerThis(::std::string::String::from(#expr))
            }
        }),
        (_, Some(expr)) => Some(quote! {
            fn instantiation_model() -> ::weaver_aop::InstantiationModel {
                ::weaver_aop::InstantiationModel::PerTarget(::std::string::String::from(#expr))
            }
        }),
        _ => None,
    };

    let registration = if attrs.register {
        if !input.generics.params.is_empty() {
            return Err(Error::new_spanned(
                &input.generics,
                "`register` is not supported on generic aspects",
            ));
        }
        Some(quote! {
            ::weaver_aop::register_aspect!(#name);
        })
    } else {
        None
    };

    Ok(quote! {
        impl #impl_generics ::weaver_aop::aspect::AspectMetadata for #name #ty_generics #where_clause {
            fn aspect_name() -> &'static str {
                #aspect_name
            }

            #order

            #model
        }

        #registration
    })
}
