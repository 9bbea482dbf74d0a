//! Procedural macros for wsrpc
//!
//! `#[handler]` turns a plain async function into a factory returning
//! `Box<dyn wsrpc_server::Handler>`, ready to hand to
//! `ServerBuilder::handler` or `HandlerGroup::handler`.
//!
//! ```ignore
//! use serde::Deserialize;
//! use wsrpc_core::Result;
//! use wsrpc_server::Context;
//!
//! #[derive(Deserialize)]
//! struct AddParams {
//!     a: i32,
//!     b: i32,
//! }
//!
//! #[wsrpc::handler]
//! async fn add(params: AddParams) -> Result<i32> {
//!     Ok(params.a + params.b)
//! }
//!
//! #[wsrpc::handler]
//! async fn login(ctx: Context, user: String) -> Result<bool> {
//!     ctx.set("user", user);
//!     Ok(true)
//! }
//!
//! let server = WsrpcServer::builder()
//!     .handler("add", add())
//!     .handler("login", login());
//! ```

mod handler;

use proc_macro::TokenStream;
use syn::{parse_macro_input, ItemFn};

/// Turn an async function into a handler factory
///
/// Accepted signatures:
///
/// - `async fn f(params: P) -> Result<R>`: params are decoded into `P`
///   (a decode failure is answered with 400), `Ok` is the result, `Err`
///   becomes the error reply
/// - `async fn f(ctx: Context, params: P) -> Result<R>`: the same, with
///   the request context
/// - `async fn f(ctx: Context)`: raw handler; the function replies itself
/// - `async fn f() -> Result<R>`: no params
///
/// The generated function keeps the original name, visibility and
/// attributes, and takes no arguments. It refers to `::wsrpc_server`, so the
/// calling crate must depend on `wsrpc-server`.
#[proc_macro_attribute]
pub fn handler(_attr: TokenStream, item: TokenStream) -> TokenStream {
    let input = parse_macro_input!(item as ItemFn);
    handler::expand(input).into()
}
