//! Runtime Compiler Tests
//!
//! End-to-end behaviour of `compile_in_host`: memoization, cache clearing,
//! recursive components, style resolution order and fetch deduplication.

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use futures::executor::block_on;
    use futures::future::try_join;

    use crate::config::{CompilerConfig, PlatformCapabilities};
    use crate::error::CompileError;
    use crate::loader::InMemoryResourceLoader;
    use crate::metadata::{ComponentType, DirectiveDecl, ViewEncapsulation};
    use crate::output::value::Value;
    use crate::resolver::RuntimeMetadataResolver;
    use crate::runtime_compiler::RuntimeCompiler;
    use crate::view::{HostViewFactory, StaticInjector, ViewManager, ViewRef};

    fn compiler(loader: &InMemoryResourceLoader, config: CompilerConfig) -> RuntimeCompiler {
        RuntimeCompiler::new(
            Rc::new(RuntimeMetadataResolver::new()),
            Rc::new(loader.clone()),
            &config,
            &PlatformCapabilities::default(),
        )
    }

    fn render(factory: &HostViewFactory, injector: StaticInjector) -> (ViewRef, Rc<ViewManager>) {
        let vm = ViewManager::new();
        let view = factory.create(&vm, &Rc::new(injector)).unwrap();
        (view, vm)
    }

    fn plain(name: &str, selector: &str, template: &str) -> DirectiveDecl {
        DirectiveDecl::component(name, selector)
            .with_template(template)
            .with_encapsulation(ViewEncapsulation::None)
    }

    /// `a-cmp` shows `b-cmp` while `showB`; `b-cmp` shows an `a-cmp` with `showB` off.
    fn mutually_recursive_pair() -> (ComponentType, ComponentType) {
        let a = plain("A", "a-cmp", r#"<b-cmp *if="showB"></b-cmp>"#)
            .with_inputs(&["showB"])
            .into_type();
        let b = plain("B", "b-cmp", r#"<a-cmp *if="again" [showB]="false"></a-cmp>"#).into_type();
        a.set_view_directives(vec![b.clone()]);
        b.set_view_directives(vec![a.clone()]);
        (a, b)
    }

    fn pair_injector() -> StaticInjector {
        StaticInjector::new()
            .with("A", Value::map(vec![("showB".to_string(), Value::Bool(true))]))
            .with("B", Value::map(vec![("again".to_string(), Value::Bool(true))]))
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // MEMOIZATION
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_repeated_requests_share_one_template() {
        let loader = InMemoryResourceLoader::new();
        let compiler = compiler(&loader, CompilerConfig::default());
        let app = plain("App", "my-app", "<p>hi</p>").into_type();

        let first = block_on(compiler.compile_in_host(&app)).unwrap();
        let second = block_on(compiler.compile_in_host(&app)).unwrap();
        assert!(first.view_factory.ptr_eq(&second.view_factory));
        assert_eq!(first.selector, "my-app");

        let host = compiler.host_template(&app).unwrap();
        assert!(Rc::ptr_eq(&host, &compiler.host_template(&app).unwrap()));
        assert!(host.is_compiled());
    }

    #[test]
    fn test_concurrent_requests_share_one_compile() {
        let loader = InMemoryResourceLoader::new().with_file("app.html", "<p>{{x}}</p>");
        loader.set_delay("app.html", 3);
        let compiler = compiler(&loader, CompilerConfig::interpreted());
        let app = DirectiveDecl::component("App", "my-app")
            .with_template_url("app.html")
            .into_type();

        let (a, b) = block_on(try_join(
            compiler.compile_in_host(&app),
            compiler.compile_in_host(&app),
        ))
        .unwrap();
        assert!(a.view_factory.ptr_eq(&b.view_factory));
        assert_eq!(loader.request_count("app.html"), 1);
    }

    #[test]
    fn test_clear_cache_recompiles() {
        let loader = InMemoryResourceLoader::new()
            .with_file("app.html", "<p>hi</p>")
            .with_file("app.css", "p { color: red; }");
        let compiler = compiler(&loader, CompilerConfig::default());
        let app = DirectiveDecl::component("App", "my-app")
            .with_template_url("app.html")
            .with_style_urls(&["app.css"])
            .into_type();

        let before = block_on(compiler.compile_in_host(&app)).unwrap();
        block_on(compiler.compile_in_host(&app)).unwrap();
        assert_eq!(loader.request_count("app.html"), 1);
        assert_eq!(loader.request_count("app.css"), 1);

        compiler.clear_cache();
        assert!(compiler.host_template(&app).is_none());

        let after = block_on(compiler.compile_in_host(&app)).unwrap();
        assert!(!before.view_factory.ptr_eq(&after.view_factory));
        assert_eq!(loader.request_count("app.html"), 2);
        assert_eq!(loader.request_count("app.css"), 2);
    }

    #[test]
    fn test_failures_are_shared_not_retried() {
        let loader = InMemoryResourceLoader::new();
        let compiler = compiler(&loader, CompilerConfig::default());
        let app = DirectiveDecl::component("App", "my-app")
            .with_template_url("missing.html")
            .into_type();

        let first = block_on(compiler.compile_in_host(&app)).unwrap_err();
        let second = block_on(compiler.compile_in_host(&app)).unwrap_err();
        assert!(matches!(first, CompileError::ResourceFetch { .. }));
        assert_eq!(first, second);
        assert_eq!(loader.request_count("missing.html"), 1);
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // RECURSION
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_mutual_recursion_terminates() {
        let loader = InMemoryResourceLoader::new();
        let compiler = compiler(&loader, CompilerConfig::default());
        let (a, b) = mutually_recursive_pair();

        let factory = block_on(compiler.compile_in_host(&a)).unwrap();
        assert!(compiler.compiled_template(&a).unwrap().is_compiled());
        assert!(compiler.compiled_template(&b).unwrap().is_compiled());

        let (view, _) = render(&factory, pair_injector());
        assert_eq!(
            view.render_html(),
            "<a-cmp><b-cmp><a-cmp></a-cmp></b-cmp></a-cmp>"
        );
    }

    #[test]
    fn test_self_recursive_component() {
        let loader = InMemoryResourceLoader::new();
        let compiler = compiler(&loader, CompilerConfig::interpreted());
        let node = plain(
            "TreeNode",
            "tree-node",
            r#"<i>{{label}}</i><tree-node *if="child" [label]="child.label" [child]="child.child"></tree-node>"#,
        )
        .with_inputs(&["label", "child"])
        .into_type();
        node.set_view_directives(vec![node.clone()]);

        let factory = block_on(compiler.compile_in_host(&node)).unwrap();
        let injector = StaticInjector::from_json(&serde_json::json!({
            "TreeNode": { "label": "root", "child": { "label": "leaf" } }
        }));
        let (view, vm) = render(&factory, injector);
        assert_eq!(
            view.render_html(),
            "<tree-node><i>root</i><tree-node><i>leaf</i></tree-node></tree-node>"
        );
        assert_eq!(vm.views_created(), 3);
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // STYLES
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_styles_keep_declaration_order() {
        let loader = InMemoryResourceLoader::new()
            .with_file("a.css", "a {}")
            .with_file("b.css", "b {}");
        loader.set_delay("a.css", 5);
        let compiler = compiler(&loader, CompilerConfig::interpreted());
        let app = plain("App", "my-app", "<p></p>")
            .with_styles(&["x {}"])
            .with_style_urls(&["a.css", "b.css"])
            .into_type();

        let factory = block_on(compiler.compile_in_host(&app)).unwrap();
        let (_, vm) = render(&factory, StaticInjector::new());
        assert_eq!(
            vm.registered_styles(),
            vec!["x {}".to_string(), "a {}".to_string(), "b {}".to_string()]
        );
    }

    #[test]
    fn test_nested_imports_follow_importing_sheet() {
        let loader = InMemoryResourceLoader::new()
            .with_file("css/main.css", "@import 'base.css';\nmain {}")
            .with_file("css/base.css", "base {}");
        loader.set_delay("css/base.css", 2);
        let compiler = compiler(&loader, CompilerConfig::default());
        let app = plain("App", "my-app", "<main></main>")
            .with_style_urls(&["css/main.css"])
            .into_type();

        let factory = block_on(compiler.compile_in_host(&app)).unwrap();
        let (_, vm) = render(&factory, StaticInjector::new());
        let styles = vm.registered_styles();
        let base = styles.iter().position(|s| s.contains("base {}")).unwrap();
        let main = styles.iter().position(|s| s.contains("main {}")).unwrap();
        assert!(main < base);
        assert_eq!(loader.request_count("css/base.css"), 1);
    }

    #[test]
    fn test_stylesheet_fetched_once_per_url_and_shim() {
        let loader = InMemoryResourceLoader::new().with_file("shared.css", "p {}");
        let compiler = compiler(&loader, CompilerConfig::default());

        let emulated = DirectiveDecl::component("A", "x-a")
            .with_template("<p></p>")
            .with_style_urls(&["shared.css"])
            .into_type();
        let unshimmed = plain("B", "x-b", "<p></p>")
            .with_style_urls(&["shared.css"])
            .into_type();
        let app = DirectiveDecl::component("App", "my-app")
            .with_template("<x-a></x-a><x-b></x-b>")
            .with_style_urls(&["shared.css"])
            .into_type();
        app.set_view_directives(vec![emulated.clone(), unshimmed.clone()]);

        let factory = block_on(compiler.compile_in_host(&app)).unwrap();
        assert_eq!(loader.request_count("shared.css"), 2);

        let (view, vm) = render(&factory, StaticInjector::new());
        let styles = vm.registered_styles();
        assert!(styles.contains(&"p {}".to_string()));
        assert!(styles.iter().any(|s| s.starts_with("p[_ngcontent-c")));
        assert!(view.render_html().contains("_nghost-c"));
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // MATERIALIZATION & ERRORS
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_interpreter_and_jit_render_identically() {
        let item = DirectiveDecl::component("Item", "list-item")
            .with_template(r#"<li [title]="label | uppercase">{{label}} ({{index}})</li>"#)
            .with_inputs(&["label", "index"])
            .with_styles(&["li { margin: 0; }"])
            .into_type();
        let app = DirectiveDecl::component("App", "my-app")
            .with_template(concat!(
                r#"<h1 class="title">{{title | lowercase}}</h1>"#,
                r#"<ul><list-item [label]="first" [index]="1"></list-item>"#,
                r#"<list-item *if="showSecond" [label]="second" index="2{{suffix}}"></list-item></ul>"#,
                r#"<p>{{ready ? 'ready' : 'waiting'}}</p>"#,
            ))
            .with_styles(&[":host { display: block; }", "h1 { color: red; }"])
            .into_type();
        app.set_view_directives(vec![item]);

        let injector = || {
            StaticInjector::from_json(&serde_json::json!({
                "App": {
                    "title": "Hello",
                    "first": "one",
                    "second": "two",
                    "showSecond": true,
                    "suffix": "!",
                    "ready": false
                }
            }))
        };

        let loader = InMemoryResourceLoader::new();
        let interpreted = compiler(&loader, CompilerConfig::interpreted());
        let jit = compiler(&loader, CompilerConfig::default());
        let a = block_on(interpreted.compile_in_host(&app)).unwrap();
        let b = block_on(jit.compile_in_host(&app)).unwrap();

        let (view_a, vm_a) = render(&a, injector());
        let (view_b, vm_b) = render(&b, injector());
        assert_eq!(view_a.to_json(), view_b.to_json());
        assert_eq!(view_a.render_html(), view_b.render_html());
        assert_eq!(vm_a.registered_styles(), vm_b.registered_styles());
        assert!(view_a.render_html().contains("<h1 class=\"title\""));
        assert!(view_a.render_html().contains("title=\"ONE\""));
        assert!(view_a.render_html().contains("waiting"));
    }

    #[test]
    fn test_platform_without_dynamic_code_interprets() {
        let loader = InMemoryResourceLoader::new();
        let locked = RuntimeCompiler::new(
            Rc::new(RuntimeMetadataResolver::new()),
            Rc::new(loader),
            &CompilerConfig::default(),
            &PlatformCapabilities {
                dynamic_code: false,
            },
        );
        assert_eq!(
            locked.strategy(),
            crate::output::MaterializeStrategy::Interpret
        );
    }

    #[test]
    fn test_non_component_rejected_by_name() {
        let loader = InMemoryResourceLoader::new();
        let compiler = compiler(&loader, CompilerConfig::default());
        let dir = DirectiveDecl::directive("Tooltip", "[tooltip]").into_type();

        let err = block_on(compiler.compile_in_host(&dir)).unwrap_err();
        assert_eq!(
            err,
            CompileError::NotAComponent {
                name: "Tooltip".to_string()
            }
        );
        assert!(compiler.host_template(&dir).is_none());
    }

    #[test]
    fn test_unknown_pipe_fails_compile() {
        let loader = InMemoryResourceLoader::new();
        let compiler = compiler(&loader, CompilerConfig::default());
        let app = plain("App", "my-app", "<p>{{name | shout}}</p>").into_type();

        let err = block_on(compiler.compile_in_host(&app)).unwrap_err();
        assert_eq!(
            err,
            CompileError::PipeNotFound {
                name: "shout".to_string(),
                component: "App".to_string()
            }
        );
    }

    #[test]
    fn test_child_errors_fail_the_parent() {
        let loader = InMemoryResourceLoader::new();
        let compiler = compiler(&loader, CompilerConfig::default());
        let child = DirectiveDecl::component("Child", "x-child")
            .with_template_url("child.html")
            .into_type();
        let app = plain("App", "my-app", "<x-child></x-child>").into_type();
        app.set_view_directives(vec![child]);

        let err = block_on(compiler.compile_in_host(&app)).unwrap_err();
        assert_eq!(err, CompileError::fetch("child.html", "not found"));
    }
}
