//! Runtime Compiler Module
//!
//! Orchestrates the compilation of a component tree:
//!
//! 1. metadata for the requested component is resolved and wrapped in a
//!    synthetic host component
//! 2. each component's styles are resolved and its view directives are
//!    normalized concurrently
//! 3. the template is parsed and compiled into a view program
//! 4. every child component is compiled recursively and bound to the view
//!    program through its proxy factory
//! 5. the program is materialized and the compiled template initialized
//!
//! Compiled templates and their completion tokens are cached per component
//! identity. A compiled template is inserted into the cache before any
//! suspension point, so a component reached again while it is still
//! compiling resolves to the same template. A child that is already on the
//! current compile path is a cycle: its proxy is bound but it is not awaited.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use futures::future::{self, FutureExt, LocalBoxFuture, Shared};
use futures::{try_join, TryFutureExt};
use tracing::{debug, debug_span, error, trace, warn, Instrument};

use crate::config::{CompilerConfig, PlatformCapabilities};
use crate::error::{CompileError, Result};
use crate::loader::ResourceLoader;
use crate::metadata::{
    create_host_component_meta, CompileDirectiveMetadata, CompilePipeMetadata, ComponentType,
};
use crate::normalizer::DirectiveNormalizer;
use crate::output::ast::{external, ExternalRef};
use crate::output::value::{Function, Value};
use crate::output::{select_materializer, MaterializeStrategy, Materializer};
use crate::resolver::MetadataResolver;
use crate::style_compiler::{StyleCompiler, StylesCompileResult, StylesheetDependency, STYLES_VAR};
use crate::template_parser::{TemplateAst, TemplateParser};
use crate::view::HostViewFactory;
use crate::view_compiler::{view_factory_name, ViewCompiler};

type SharedResult<T> = Shared<LocalBoxFuture<'static, Result<T>>>;

// ═══════════════════════════════════════════════════════════════════════════════
// CACHE KEYS & COMPILED TEMPLATES
// ═══════════════════════════════════════════════════════════════════════════════

/// Opaque key of the synthetic host wrapper of one component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HostKey(u64);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    Component(ComponentType),
    Host(HostKey),
}

/// A view factory slot plus a stable proxy forwarding to it.
///
/// The proxy exists as soon as the template is allocated, so parents can be
/// linked to a child (even a cyclic one) before the child is compiled.
pub struct CompiledTemplate {
    name: String,
    slot: Rc<RefCell<Option<Function>>>,
    proxy: Function,
}

impl CompiledTemplate {
    fn new(name: &str) -> Self {
        let slot: Rc<RefCell<Option<Function>>> = Rc::new(RefCell::new(None));
        let proxy_slot = slot.clone();
        let proxy_name = name.to_string();
        let proxy = Function::new(&view_factory_name(name), move |args| {
            let factory = proxy_slot.borrow().clone();
            match factory {
                Some(factory) => factory.call(args),
                None => Err(CompileError::FactoryNotReady {
                    name: proxy_name.clone(),
                }),
            }
        });
        Self {
            name: name.to_string(),
            slot,
            proxy,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_compiled(&self) -> bool {
        self.slot.borrow().is_some()
    }

    pub fn view_factory(&self) -> Option<Function> {
        self.slot.borrow().clone()
    }

    pub fn proxy_view_factory(&self) -> &Function {
        &self.proxy
    }

    fn init(&self, view_factory: Function) {
        let mut slot = self.slot.borrow_mut();
        if slot.is_some() {
            warn!(component = %self.name, "compiled template initialized twice; keeping the first factory");
            return;
        }
        *slot = Some(view_factory);
    }
}

impl fmt::Debug for CompiledTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledTemplate")
            .field("name", &self.name)
            .field("compiled", &self.is_compiled())
            .finish()
    }
}

#[derive(Default)]
struct CompilerCaches {
    styles: HashMap<String, SharedResult<String>>,
    host_keys: HashMap<ComponentType, HostKey>,
    templates: HashMap<CacheKey, Rc<CompiledTemplate>>,
    done: HashMap<CacheKey, SharedResult<Rc<CompiledTemplate>>>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// RUNTIME COMPILER
// ═══════════════════════════════════════════════════════════════════════════════

struct Inner {
    resolver: Rc<dyn MetadataResolver>,
    normalizer: DirectiveNormalizer,
    parser: TemplateParser,
    style_compiler: StyleCompiler,
    view_compiler: ViewCompiler,
    loader: Rc<dyn ResourceLoader>,
    materializer: Rc<dyn Materializer>,
    strategy: MaterializeStrategy,
    caches: RefCell<CompilerCaches>,
    next_host_key: Cell<u64>,
}

/// Compiles components on demand. Clones share caches.
#[derive(Clone)]
pub struct RuntimeCompiler {
    inner: Rc<Inner>,
}

impl RuntimeCompiler {
    pub fn new(
        resolver: Rc<dyn MetadataResolver>,
        loader: Rc<dyn ResourceLoader>,
        config: &CompilerConfig,
        platform: &PlatformCapabilities,
    ) -> Self {
        let strategy = MaterializeStrategy::select(config, platform);
        debug!(?strategy, "creating runtime compiler");
        Self {
            inner: Rc::new(Inner {
                resolver,
                normalizer: DirectiveNormalizer::new(loader.clone()),
                parser: TemplateParser::new(),
                style_compiler: StyleCompiler::new(),
                view_compiler: ViewCompiler::new(),
                loader,
                materializer: select_materializer(config, platform),
                strategy,
                caches: RefCell::new(CompilerCaches::default()),
                next_host_key: Cell::new(0),
            }),
        }
    }

    pub fn strategy(&self) -> MaterializeStrategy {
        self.inner.strategy
    }

    /// Compile `component` wrapped in a host view. Requests for the same
    /// component share one compilation until [`clear_cache`](Self::clear_cache).
    pub fn compile_in_host(
        &self,
        component: &ComponentType,
    ) -> LocalBoxFuture<'static, Result<HostViewFactory>> {
        match Inner::start_host_compile(&self.inner, component) {
            Ok((selector, done)) => async move {
                let template = done.await?;
                let view_factory =
                    template
                        .view_factory()
                        .ok_or_else(|| CompileError::FactoryNotReady {
                            name: template.name().to_string(),
                        })?;
                Ok::<_, CompileError>(HostViewFactory {
                    selector,
                    view_factory,
                })
            }
            .boxed_local(),
            Err(err) => future::ready(Err(err)).boxed_local(),
        }
    }

    /// Drop every cached stylesheet, host key, compiled template and
    /// completion token. Compilations in flight run to completion but are
    /// no longer reachable from the cache.
    pub fn clear_cache(&self) {
        {
            let mut caches = self.inner.caches.borrow_mut();
            caches.styles.clear();
            caches.host_keys.clear();
            caches.templates.clear();
            caches.done.clear();
        }
        self.inner.resolver.clear_cache();
        debug!("runtime compiler caches cleared");
    }

    /// Compiled template of `component` if it has been requested as a child.
    pub fn compiled_template(&self, component: &ComponentType) -> Option<Rc<CompiledTemplate>> {
        self.inner
            .caches
            .borrow()
            .templates
            .get(&CacheKey::Component(component.clone()))
            .cloned()
    }

    /// Compiled template of the host wrapper of `component`.
    pub fn host_template(&self, component: &ComponentType) -> Option<Rc<CompiledTemplate>> {
        let caches = self.inner.caches.borrow();
        let key = caches.host_keys.get(component)?;
        caches.templates.get(&CacheKey::Host(*key)).cloned()
    }
}

impl Inner {
    fn start_host_compile(
        inner: &Rc<Inner>,
        component: &ComponentType,
    ) -> Result<(String, SharedResult<Rc<CompiledTemplate>>)> {
        let comp_meta = inner.resolver.get_directive_metadata(component)?;
        if !comp_meta.is_component {
            error!(directive = comp_meta.name(), "host compile requested for a non-component");
            return Err(CompileError::NotAComponent {
                name: comp_meta.name().to_string(),
            });
        }

        let existing = inner.caches.borrow().host_keys.get(component).copied();
        let host_key = match existing {
            Some(key) => {
                trace!(component = comp_meta.name(), "host cache hit");
                key
            }
            None => {
                let host_meta = create_host_component_meta(&comp_meta)?;
                let key = HostKey(inner.next_host_key.get());
                inner.next_host_key.set(key.0 + 1);
                inner
                    .caches
                    .borrow_mut()
                    .host_keys
                    .insert(component.clone(), key);
                Inner::load_and_compile(
                    inner,
                    CacheKey::Host(key),
                    Rc::new(host_meta),
                    vec![comp_meta.clone()],
                    Vec::new(),
                    Vec::new(),
                );
                key
            }
        };

        let done = inner
            .caches
            .borrow()
            .done
            .get(&CacheKey::Host(host_key))
            .cloned()
            .ok_or_else(|| CompileError::FactoryNotReady {
                name: comp_meta.name().to_string(),
            })?;
        Ok((comp_meta.selector.clone(), done))
    }

    /// Return the cached template for `key`, or allocate one and register
    /// its completion token. Never suspends.
    fn load_and_compile(
        inner: &Rc<Inner>,
        key: CacheKey,
        meta: Rc<CompileDirectiveMetadata>,
        view_directives: Vec<Rc<CompileDirectiveMetadata>>,
        pipes: Vec<Rc<CompilePipeMetadata>>,
        path: Vec<CacheKey>,
    ) -> Rc<CompiledTemplate> {
        if let Some(template) = inner.caches.borrow().templates.get(&key) {
            trace!(component = meta.name(), "template cache hit");
            return template.clone();
        }

        debug!(component = meta.name(), depth = path.len(), "template cache miss");
        let template = Rc::new(CompiledTemplate::new(meta.name()));
        let span = debug_span!("compile_component", component = meta.name());
        let done = Inner::compile_component(
            inner.clone(),
            template.clone(),
            meta,
            view_directives,
            pipes,
            path,
        )
        .instrument(span)
        .boxed_local()
        .shared();

        let mut caches = inner.caches.borrow_mut();
        caches.templates.insert(key.clone(), template.clone());
        caches.done.insert(key, done);
        template
    }

    async fn compile_component(
        inner: Rc<Inner>,
        template: Rc<CompiledTemplate>,
        meta: Rc<CompileDirectiveMetadata>,
        view_directives: Vec<Rc<CompileDirectiveMetadata>>,
        pipes: Vec<Rc<CompilePipeMetadata>>,
        path: Vec<CacheKey>,
    ) -> Result<Rc<CompiledTemplate>> {
        let styles_result = inner.style_compiler.compile_component(&meta);
        let styles = Inner::resolve_styles_compile_result(
            inner.clone(),
            meta.name().to_string(),
            styles_result,
        )
        .map_ok(|value| flatten_styles(&value));
        let normalized = future::try_join_all(
            view_directives
                .iter()
                .map(|d| inner.normalizer.normalize_directive(d.clone())),
        );
        let (styles, normalized) = try_join!(styles, normalized)?;

        let source = meta
            .template
            .as_ref()
            .and_then(|t| t.template.clone())
            .ok_or_else(|| CompileError::MissingTemplate {
                name: meta.name().to_string(),
            })?;
        let parsed = inner
            .parser
            .parse(&meta, &source, &normalized, &pipes, meta.name())?;

        let mut children = Vec::new();
        let view_factory =
            Inner::compile_view(&inner, &meta, &parsed, styles, &pipes, &path, &mut children)?;
        template.init(view_factory);

        future::try_join_all(children).await?;
        debug!(component = meta.name(), "component compiled");
        Ok(template)
    }

    /// Compile the parsed view, link child components and materialize the
    /// program. Children that are not cycles are appended to `children`.
    fn compile_view(
        inner: &Rc<Inner>,
        meta: &CompileDirectiveMetadata,
        parsed: &[TemplateAst],
        styles: Value,
        pipes: &[Rc<CompilePipeMetadata>],
        path: &[CacheKey],
        children: &mut Vec<SharedResult<Rc<CompiledTemplate>>>,
    ) -> Result<Function> {
        let styles_ref = ExternalRef::bound(STYLES_VAR, styles);
        let result = inner
            .view_compiler
            .compile_component(meta, parsed, external(&styles_ref), pipes)?;

        for dep in &result.dependencies {
            let child_type = dep.comp.runtime_type().cloned().ok_or_else(|| {
                CompileError::InvalidDeclaration {
                    message: format!("'{}' has no declaration to compile", dep.comp.name()),
                }
            })?;
            let child_key = CacheKey::Component(child_type.clone());
            let child_view_directives = inner.resolver.get_view_directives_metadata(&child_type)?;
            let child_pipes = inner.resolver.get_view_pipes_metadata(&child_type)?;
            let is_recursive = path.contains(&child_key);
            let mut child_path = path.to_vec();
            child_path.push(child_key.clone());

            let child = Inner::load_and_compile(
                inner,
                child_key.clone(),
                dep.comp.clone(),
                child_view_directives,
                child_pipes,
                child_path,
            );
            dep.factory_placeholder.bind(
                &view_factory_name(dep.comp.name()),
                Value::Function(child.proxy_view_factory().clone()),
            );

            if is_recursive {
                debug!(
                    component = meta.name(),
                    child = dep.comp.name(),
                    "cyclic child; linked through its proxy without waiting"
                );
            } else if let Some(done) = inner.caches.borrow().done.get(&child_key) {
                children.push(done.clone());
            }
        }

        let module_name = format!("{}.template.js", meta.name());
        let factory =
            inner
                .materializer
                .materialize(&module_name, &result.program, &result.view_factory_var)?;
        factory
            .as_function()
            .cloned()
            .ok_or_else(|| CompileError::ModuleLoad {
                module: module_name,
                message: format!("{} is not a function", result.view_factory_var),
            })
    }

    /// Load every stylesheet the result depends on, compile those sheets
    /// recursively, bind them in declaration order and materialize.
    fn resolve_styles_compile_result(
        inner: Rc<Inner>,
        source_url: String,
        result: StylesCompileResult,
    ) -> LocalBoxFuture<'static, Result<Value>> {
        let css_texts: Vec<_> = result
            .dependencies
            .iter()
            .map(|dep| inner.load_stylesheet_dep(dep))
            .collect();

        async move {
            let css_texts = future::try_join_all(css_texts).await?;
            let nested: Vec<_> = result
                .dependencies
                .iter()
                .zip(css_texts.iter())
                .map(|(dep, css)| {
                    let nested =
                        inner
                            .style_compiler
                            .compile_stylesheet(&dep.source_url, css, dep.is_shimmed);
                    Inner::resolve_styles_compile_result(
                        inner.clone(),
                        dep.source_url.clone(),
                        nested,
                    )
                })
                .collect();
            let nested_styles = future::try_join_all(nested).await?;

            for (i, (dep, styles)) in result
                .dependencies
                .iter()
                .zip(nested_styles)
                .enumerate()
            {
                dep.value_placeholder
                    .bind(&format!("importedStyles{}", i), styles);
            }
            inner.materializer.materialize(
                &format!("{}.css.js", source_url),
                &result.program,
                &result.styles_var,
            )
        }
        .boxed_local()
    }

    fn load_stylesheet_dep(&self, dep: &StylesheetDependency) -> SharedResult<String> {
        let key = format!(
            "{}{}",
            dep.source_url,
            if dep.is_shimmed { ".shim" } else { "" }
        );
        if let Some(css) = self.caches.borrow().styles.get(&key) {
            trace!(stylesheet = %key, "stylesheet cache hit");
            return css.clone();
        }
        debug!(url = %dep.source_url, shimmed = dep.is_shimmed, "fetching stylesheet");
        let css = self.loader.get(&dep.source_url).shared();
        self.caches.borrow_mut().styles.insert(key, css.clone());
        css
    }
}

/// Nested style arrays flattened in declaration order.
fn flatten_styles(value: &Value) -> Value {
    fn collect(value: &Value, out: &mut Vec<Value>) {
        match value {
            Value::List(items) => items.iter().for_each(|i| collect(i, out)),
            Value::Null => {}
            other => out.push(Value::from(other.to_display_string())),
        }
    }
    let mut out = Vec::new();
    collect(value, &mut out);
    Value::from(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constant(value: &str) -> Function {
        let value = value.to_string();
        Function::new("constant", move |_| Ok(Value::from(value.as_str())))
    }

    #[test]
    fn test_proxy_before_init() {
        let template = CompiledTemplate::new("Pending");
        assert!(!template.is_compiled());
        assert_eq!(
            template.proxy_view_factory().call(&[]).unwrap_err(),
            CompileError::FactoryNotReady {
                name: "Pending".to_string()
            }
        );
    }

    #[test]
    fn test_proxy_forwards_after_init() {
        let template = CompiledTemplate::new("Ready");
        let proxy = template.proxy_view_factory().clone();
        template.init(constant("first"));
        template.init(constant("second"));
        assert_eq!(proxy.call(&[]).unwrap(), Value::from("first"));
        assert_eq!(proxy.name(), "viewFactory_Ready");
    }

    #[test]
    fn test_flatten_styles() {
        let nested = Value::from(vec![
            Value::from("a"),
            Value::from(vec![Value::from("b"), Value::Null, Value::from(vec![Value::from("c")])]),
        ]);
        assert_eq!(
            flatten_styles(&nested),
            Value::from(vec![Value::from("a"), Value::from("b"), Value::from("c")])
        );
    }
}
