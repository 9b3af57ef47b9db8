//! JavaScript source emitter for intermediate programs.
//!
//! External references are rendered as free identifiers; the caller receives
//! the identifier chosen for each reference so the loader can provide them.

use crate::output::ast::{BinaryOp, Expr, ExternalRef, Literal, Program, Stmt};
use crate::output::value::format_number;

#[derive(Debug, Clone)]
pub struct EmittedModule {
    pub source: String,
    /// Identifier used in `source` for each external reference.
    pub externals: Vec<(String, ExternalRef)>,
}

struct Emitter {
    out: String,
    indent: usize,
    externals: Vec<(String, ExternalRef)>,
}

/// Name of the function wrapping every emitted module body.
pub const MODULE_ENTRY: &str = "__module";

/// Render `program` as a script declaring [`MODULE_ENTRY`], which runs the
/// statements and returns `result_var`.
pub fn emit_module(module_name: &str, program: &Program, result_var: &str) -> EmittedModule {
    let externals = program
        .externals()
        .into_iter()
        .enumerate()
        .map(|(i, ext)| (format!("{}$ext{}", sanitize_identifier(&ext.name()), i), ext))
        .collect();

    let mut emitter = Emitter {
        out: format!("// {}\n", module_name),
        indent: 0,
        externals,
    };
    emitter.line(&format!("function {}() {{", MODULE_ENTRY));
    emitter.indent += 1;
    for stmt in &program.statements {
        emitter.stmt(stmt);
    }
    emitter.line(&format!("return {};", result_var));
    emitter.indent -= 1;
    emitter.line("}");

    EmittedModule {
        source: emitter.out,
        externals: emitter.externals,
    }
}

fn sanitize_identifier(name: &str) -> String {
    let mut out: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if out.is_empty() || out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

fn string_literal(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "\"\"".to_string())
}

impl Emitter {
    fn line(&mut self, text: &str) {
        for _ in 0..self.indent {
            self.out.push_str("  ");
        }
        self.out.push_str(text);
        self.out.push('\n');
    }

    fn block(&mut self, stmts: &[Stmt]) {
        self.indent += 1;
        for s in stmts {
            self.stmt(s);
        }
        self.indent -= 1;
    }

    fn stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::DeclareVar { name, value } => {
                let value = self.expr(value);
                self.line(&format!("var {} = {};", name, value));
            }
            Stmt::DeclareFunction { name, params, body } => {
                self.line(&format!("function {}({}) {{", name, params.join(", ")));
                self.block(body);
                self.line("}");
            }
            Stmt::Return(e) => {
                let value = self.expr(e);
                self.line(&format!("return {};", value));
            }
            Stmt::Expression(e) => {
                let value = self.expr(e);
                if matches!(e, Expr::LiteralMap(_) | Expr::Function { .. }) {
                    self.line(&format!("({});", value));
                } else {
                    self.line(&format!("{};", value));
                }
            }
            Stmt::If {
                condition,
                true_case,
                false_case,
            } => {
                let cond = self.expr(condition);
                self.line(&format!("if ({}) {{", cond));
                self.block(true_case);
                if false_case.is_empty() {
                    self.line("}");
                } else {
                    self.line("} else {");
                    self.block(false_case);
                    self.line("}");
                }
            }
        }
    }

    fn external_name(&self, ext: &ExternalRef) -> String {
        self.externals
            .iter()
            .find(|(_, e)| e.ptr_eq(ext))
            .map(|(name, _)| name.clone())
            .unwrap_or_else(|| sanitize_identifier(&ext.name()))
    }

    fn exprs(&mut self, exprs: &[Expr]) -> String {
        exprs
            .iter()
            .map(|e| self.expr(e))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn expr(&mut self, expr: &Expr) -> String {
        match expr {
            Expr::Literal(Literal::Null) => "null".to_string(),
            Expr::Literal(Literal::Bool(b)) => b.to_string(),
            Expr::Literal(Literal::Number(n)) => format_number(*n),
            Expr::Literal(Literal::String(s)) => string_literal(s),
            Expr::ReadVar(name) => name.clone(),
            Expr::External(ext) => self.external_name(ext),
            Expr::ReadProp { receiver, name } => {
                let recv = self.expr(receiver);
                if is_identifier(name) {
                    format!("{}.{}", recv, name)
                } else {
                    format!("{}[{}]", recv, string_literal(name))
                }
            }
            Expr::InvokeMethod {
                receiver,
                method,
                args,
            } => {
                let recv = self.expr(receiver);
                let args = self.exprs(args);
                format!("{}.{}({})", recv, method, args)
            }
            Expr::InvokeFunction { callee, args } => {
                let callee = self.expr(callee);
                let args = self.exprs(args);
                format!("{}({})", callee, args)
            }
            Expr::LiteralArray(items) => format!("[{}]", self.exprs(items)),
            Expr::LiteralMap(entries) => {
                let parts: Vec<String> = entries
                    .iter()
                    .map(|(k, v)| format!("{}: {}", string_literal(k), self.expr(v)))
                    .collect();
                format!("{{{}}}", parts.join(", "))
            }
            Expr::Binary { op, lhs, rhs } => {
                let op = match op {
                    BinaryOp::Plus => "+",
                    BinaryOp::Equals => "==",
                    BinaryOp::NotEquals => "!=",
                    BinaryOp::And => "&&",
                    BinaryOp::Or => "||",
                };
                format!("({} {} {})", self.expr(lhs), op, self.expr(rhs))
            }
            Expr::Not(inner) => format!("!({})", self.expr(inner)),
            Expr::Conditional {
                condition,
                true_case,
                false_case,
            } => format!(
                "({} ? {} : {})",
                self.expr(condition),
                self.expr(true_case),
                self.expr(false_case)
            ),
            Expr::Function { params, body } => {
                // Rendered inline; the body is emitted with the current indent.
                let saved = std::mem::take(&mut self.out);
                self.block(body);
                let body_src = std::mem::replace(&mut self.out, saved);
                format!("(function ({}) {{\n{}}})", params.join(", "), body_src)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::ast::*;
    use crate::output::value::Value;

    #[test]
    fn test_emits_function_and_result() {
        let styles = ExternalRef::bound("styles", Value::from(vec![]));
        let program = Program::new(vec![declare_fn(
            "viewFactory_App",
            &["viewManager", "parentInjector", "contextEl"],
            vec![variable("viewManager")
                .call_method("registerStyles", vec![literal_str("c1"), external(&styles)])
                .to_return()],
        )]);
        let module = emit_module("App.template.js", &program, "viewFactory_App");
        assert!(module.source.starts_with("// App.template.js\n"));
        assert!(module
            .source
            .contains("function viewFactory_App(viewManager, parentInjector, contextEl) {"));
        assert!(module
            .source
            .contains("return viewManager.registerStyles(\"c1\", styles$ext0);"));
        assert!(module.source.ends_with("  return viewFactory_App;\n}\n"));
        assert_eq!(module.externals.len(), 1);
        assert_eq!(module.externals[0].0, "styles$ext0");
    }

    #[test]
    fn test_string_escaping_and_property_access() {
        let program = Program::new(vec![declare_var(
            "x",
            literal_map(vec![(
                "a-b".to_string(),
                literal_str("say \"hi\"\n").binary(BinaryOp::Plus, variable("y").prop("data-x")),
            )]),
        )]);
        let module = emit_module("m.js", &program, "x");
        assert!(module
            .source
            .contains(r#"var x = {"a-b": ("say \"hi\"\n" + y["data-x"])};"#));
    }
}
