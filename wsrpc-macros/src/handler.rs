//! Expansion of `#[handler]`
//!
//! The attributed function is moved, unchanged, into a private inner
//! `async fn`. The public item becomes a factory that wraps the inner
//! function with the matching constructor from `wsrpc_server`:
//!
//! | signature                         | constructor         |
//! |-----------------------------------|---------------------|
//! | `async fn f(ctx: Context)`        | `from_fn`           |
//! | `async fn f(ctx: Context, p: P)`  | `from_typed_ctx_fn` |
//! | `async fn f(p: P)`                | `from_typed_fn`     |
//! | `async fn f()`                    | `from_typed_fn` over `()` |

use proc_macro2::TokenStream;
use quote::quote;
use syn::spanned::Spanned;
use syn::{FnArg, ItemFn, Type};

enum Shape {
    Raw,
    Typed,
    TypedWithContext,
    NoParams,
}

pub fn expand(input: ItemFn) -> TokenStream {
    match expand_inner(input) {
        Ok(tokens) => tokens,
        Err(e) => e.to_compile_error(),
    }
}

fn expand_inner(input: ItemFn) -> syn::Result<TokenStream> {
    let sig = &input.sig;
    if sig.asyncness.is_none() {
        return Err(syn::Error::new(
            sig.fn_token.span(),
            "#[handler] requires an async fn",
        ));
    }
    if !sig.generics.params.is_empty() {
        return Err(syn::Error::new(
            sig.generics.span(),
            "#[handler] functions cannot be generic",
        ));
    }

    let shape = shape_of(&input)?;

    let attrs = &input.attrs;
    let vis = &input.vis;
    let name = &sig.ident;
    let inputs = &sig.inputs;
    let output = &sig.output;
    let body = &input.block;

    let wrap = match shape {
        Shape::Raw => quote! { ::wsrpc_server::from_fn(__handler) },
        Shape::Typed => quote! { ::wsrpc_server::from_typed_fn(__handler) },
        Shape::TypedWithContext => quote! { ::wsrpc_server::from_typed_ctx_fn(__handler) },
        Shape::NoParams => quote! {
            ::wsrpc_server::from_typed_fn(|_: ()| __handler())
        },
    };

    Ok(quote! {
        #(#attrs)*
        #vis fn #name() -> ::std::boxed::Box<dyn ::wsrpc_server::Handler> {
            async fn __handler(#inputs) #output #body
            #wrap
        }
    })
}

fn shape_of(input: &ItemFn) -> syn::Result<Shape> {
    let mut types = Vec::new();
    for arg in &input.sig.inputs {
        match arg {
            FnArg::Receiver(r) => {
                return Err(syn::Error::new(
                    r.span(),
                    "#[handler] cannot be used on methods",
                ))
            }
            FnArg::Typed(pat) => types.push(&*pat.ty),
        }
    }

    match types.as_slice() {
        [] => Ok(Shape::NoParams),
        [only] if is_context(only) => Ok(Shape::Raw),
        [_] => Ok(Shape::Typed),
        [first, _] if is_context(first) => Ok(Shape::TypedWithContext),
        _ => Err(syn::Error::new(
            input.sig.inputs.span(),
            "#[handler] takes (params), (ctx: Context), or (ctx: Context, params)",
        )),
    }
}

/// `Context` by its last path segment, so both `Context` and
/// `wsrpc_server::Context` are recognised.
fn is_context(ty: &Type) -> bool {
    match ty {
        Type::Path(path) if path.qself.is_none() => path
            .path
            .segments
            .last()
            .map(|seg| seg.ident == "Context" && seg.arguments.is_empty())
            .unwrap_or(false),
        _ => false,
    }
}
