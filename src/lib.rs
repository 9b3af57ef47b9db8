//! # Runtime Component Compiler
//!
//! Compiles component declarations into view factories at runtime.
//!
//! ## Pipeline
//!
//! 1. **Resolve**: declarations become compiler metadata (`resolver`).
//! 2. **Normalize**: templates are fetched and inline styles lifted out (`normalizer`).
//! 3. **Parse**: template text becomes a bound AST (`template_parser`, `expression`).
//! 4. **Compile**: styles and views become output programs (`style_compiler`, `view_compiler`).
//! 5. **Materialize**: programs are interpreted or emitted and loaded (`output`).
//!
//! `runtime_compiler` drives the pipeline per component, memoizes the result
//! per component identity and links child components through proxy factories,
//! so recursive and mutually recursive components compile.
//!
//! ## Invariants
//!
//! 1. **Identity**: components are cached by declaration identity, never by name.
//! 2. **One compile per identity**: a compiled template and its completion
//!    token are cached before the first suspension point of its compile.
//! 3. **One fetch per stylesheet**: each `url` (or `url.shim`) is loaded once
//!    until the caches are cleared.
//! 4. **Declaration order**: styles are bound in declaration order whatever
//!    order their fetches complete in.
//! 5. **Cycles are linked, not awaited**: a child already on the compile path
//!    is bound through its proxy and its completion is not awaited.

#[cfg(feature = "napi")]
use napi_derive::napi;

pub mod bridge;
pub mod config;
pub mod error;
pub mod expression;
pub mod loader;
pub mod metadata;
pub mod normalizer;
pub mod output;
pub mod pipes;
pub mod resolver;
pub mod runtime_compiler;
pub mod selector;
pub mod style_compiler;
pub mod template_parser;
pub mod view;
pub mod view_compiler;

#[cfg(test)]
mod materialize_tests;
#[cfg(test)]
mod runtime_compiler_tests;

pub use bridge::{compile_and_render, compile_and_render_json, RenderRequest, RenderResult};
pub use config::{CompilerConfig, PlatformCapabilities};
pub use error::{CompileError, Result};
pub use loader::{DirectoryResourceLoader, InMemoryResourceLoader, ResourceLoader};
pub use metadata::{ComponentType, DirectiveDecl, PipeType, ViewEncapsulation};
pub use output::value::{Function, Value};
pub use output::MaterializeStrategy;
pub use resolver::{MetadataResolver, RuntimeMetadataResolver};
pub use runtime_compiler::{CompiledTemplate, RuntimeCompiler};
pub use view::{HostViewFactory, StaticInjector, ViewManager, ViewRef};

#[cfg(feature = "napi")]
pub use bridge::compile_and_render_native;

#[cfg(feature = "napi")]
#[napi]
pub fn compiler_bridge_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}
