//! Materialization Tests
//!
//! The interpreter and the compile-and-load path must build the same values
//! from the same program: view programs produced by the view compiler and
//! style programs produced by the style compiler.

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use crate::metadata::{DirectiveDecl, ViewEncapsulation};
    use crate::output::ast::{external, literal_str, ExternalRef, Program};
    use crate::output::interpreter::interpret_statements;
    use crate::output::jit::jit_statements;
    use crate::output::value::Value;
    use crate::resolver::{MetadataResolver, RuntimeMetadataResolver};
    use crate::style_compiler::StyleCompiler;
    use crate::template_parser::TemplateParser;
    use crate::view::{StaticInjector, ViewManager, ViewRef};
    use crate::view_compiler::ViewCompiler;

    /// Compile `template` as the view of a standalone component and return
    /// the program with its factory variable.
    fn view_program(template: &str, encapsulation: ViewEncapsulation) -> (Program, String) {
        let ty = DirectiveDecl::component("Probe", "x-probe")
            .with_template(template)
            .with_encapsulation(encapsulation)
            .into_type();
        let resolver = RuntimeMetadataResolver::new();
        let meta = resolver.get_directive_metadata(&ty).unwrap();
        let pipes = resolver.get_view_pipes_metadata(&ty).unwrap();
        let ast = TemplateParser::new()
            .parse(&meta, template, &[], &pipes, "Probe")
            .unwrap();
        let styles = ExternalRef::bound("styles", Value::from(vec![Value::from("p {}")]));
        let result = ViewCompiler::new()
            .compile_component(&meta, &ast, external(&styles), &pipes)
            .unwrap();
        assert!(result.dependencies.is_empty());
        (result.program, result.view_factory_var)
    }

    fn run_view(factory: &Value, instance: serde_json::Value) -> (ViewRef, Rc<ViewManager>) {
        let vm = ViewManager::new();
        let injector = Rc::new(StaticInjector::from_json(
            &serde_json::json!({ "Probe": instance }),
        ));
        let view = factory
            .call(&[Value::Object(vm.clone()), Value::Object(injector), Value::Null])
            .unwrap();
        (ViewRef::new(view), vm)
    }

    fn assert_same_view(template: &str, encapsulation: ViewEncapsulation, instance: serde_json::Value) -> ViewRef {
        let (program, var) = view_program(template, encapsulation);
        let interpreted = interpret_statements(&program, &var).unwrap();
        let loaded = jit_statements("Probe.template.js", &program, &var).unwrap();

        let (a, vm_a) = run_view(&interpreted, instance.clone());
        let (b, vm_b) = run_view(&loaded, instance);
        assert_eq!(a.to_json(), b.to_json());
        assert_eq!(a.value(), b.value());
        assert_eq!(vm_a.registered_styles(), vm_b.registered_styles());
        a
    }

    #[test]
    fn test_static_markup() {
        let view = assert_same_view(
            r#"<section id="main"><h1 class="big">Title</h1><p>a &amp; "b"</p></section>"#,
            ViewEncapsulation::None,
            serde_json::json!({}),
        );
        assert_eq!(
            view.render_html(),
            r#"<section id="main"><h1 class="big">Title</h1><p>a &amp; &quot;b&quot;</p></section>"#
        );
    }

    #[test]
    fn test_bindings_and_operators() {
        let view = assert_same_view(
            concat!(
                r#"<p [title]="user.name + '!'">{{user.name}} has {{items.length}} items</p>"#,
                r#"<i *if="!hidden && (count == 2 || flag)">{{count != 3 ? 'yes' : 'no'}}</i>"#,
                r#"<b *if="hidden">never</b>"#,
            ),
            ViewEncapsulation::None,
            serde_json::json!({
                "user": { "name": "Ada" },
                "items": [1, 2, 3],
                "hidden": false,
                "count": 2,
                "flag": false
            }),
        );
        assert_eq!(
            view.render_html(),
            r#"<p title="Ada!">Ada has 3 items</p><i>yes</i>"#
        );
    }

    #[test]
    fn test_pipes_with_arguments() {
        let view = assert_same_view(
            r#"<p>{{name | uppercase}} {{name | lowercase}}</p><pre>{{data | json}}</pre>"#,
            ViewEncapsulation::None,
            serde_json::json!({ "name": "MiXed", "data": { "n": 1 } }),
        );
        let html = view.render_html();
        assert!(html.starts_with("<p>MIXED mixed</p><pre>"));
        assert!(html.contains("&quot;n&quot;: 1"));
    }

    #[test]
    fn test_emulated_content_attributes() {
        let view = assert_same_view(
            r#"<div><span>x</span></div>"#,
            ViewEncapsulation::Emulated,
            serde_json::json!({}),
        );
        let html = view.render_html();
        assert_eq!(html.matches("_ngcontent-c").count(), 2);
    }

    #[test]
    fn test_style_programs() {
        let compiler = StyleCompiler::new();
        let result = compiler.compile_stylesheet(
            "css/theme.css",
            "@import 'reset.css';\n.card:hover { color: red; }",
            true,
        );
        assert_eq!(result.dependencies.len(), 1);
        assert_eq!(result.dependencies[0].source_url, "css/reset.css");
        result.dependencies[0]
            .value_placeholder
            .bind("importedStyles0", Value::from(vec![Value::from("* {}")]));

        let interpreted = interpret_statements(&result.program, &result.styles_var).unwrap();
        let loaded = jit_statements("css/theme.css.css.js", &result.program, &result.styles_var).unwrap();
        assert_eq!(interpreted, loaded);

        let list = interpreted.as_list().unwrap();
        assert_eq!(list.len(), 2);
        assert!(list[0]
            .as_str()
            .unwrap()
            .contains(".card[_ngcontent-%COMP%]:hover"));
    }

    #[test]
    fn test_string_literals_survive_emission() {
        let program = Program::new(vec![crate::output::ast::declare_var(
            "out",
            literal_str("quote \" backslash \\ newline \n tab \t unicode \u{e9}"),
        )]);
        assert_eq!(
            interpret_statements(&program, "out").unwrap(),
            jit_statements("literal.js", &program, "out").unwrap()
        );
    }
}
