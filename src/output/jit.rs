//! Generate-and-load materializer.
//!
//! The program is rendered to JavaScript source, parsed back with oxc under a
//! synthetic module name, and the resulting AST is compiled into a tree of
//! Rust closures. The closures own everything they need, so the arena the AST
//! lived in is released as soon as loading finishes.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use oxc_allocator::Allocator;
use oxc_ast::ast::{
    BindingPattern, Expression, Function as JsFunction, ObjectPropertyKind, PropertyKey,
    Statement,
};
use oxc_codegen::Codegen;
use oxc_parser::Parser;
use oxc_span::SourceType;
use oxc_syntax::operator::{BinaryOperator, LogicalOperator, UnaryOperator};
use tracing::trace;

use crate::error::{CompileError, Result};
use crate::output::ast::Program;
use crate::output::emitter::{emit_module, MODULE_ENTRY};
use crate::output::value::{Function, Value};
use crate::output::Materializer;

// ═══════════════════════════════════════════════════════════════════════════════
// ENVIRONMENT
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Default)]
struct Env {
    vars: RefCell<HashMap<String, Value>>,
    parent: Option<Rc<Env>>,
}

impl Env {
    fn child(parent: &Rc<Env>) -> Rc<Env> {
        Rc::new(Env {
            vars: RefCell::new(HashMap::new()),
            parent: Some(parent.clone()),
        })
    }

    fn declare(&self, name: &str, value: Value) {
        self.vars.borrow_mut().insert(name.to_string(), value);
    }

    fn lookup(&self, name: &str) -> Result<Value> {
        if let Some(v) = self.vars.borrow().get(name) {
            return Ok(v.clone());
        }
        match &self.parent {
            Some(parent) => parent.lookup(name),
            None => Err(CompileError::evaluation(format!("{} is not defined", name))),
        }
    }
}

type ExprFn = Rc<dyn Fn(&Rc<Env>) -> Result<Value>>;
type StmtFn = Rc<dyn Fn(&Rc<Env>) -> Result<Option<Value>>>;

// ═══════════════════════════════════════════════════════════════════════════════
// LOADED MODULES
// ═══════════════════════════════════════════════════════════════════════════════

/// A module whose source has been parsed and compiled to closures.
pub struct LoadedModule {
    pub name: String,
    /// Canonical source, kept only when debug info is requested.
    pub source: Option<String>,
    globals: Rc<Env>,
    body: Rc<Vec<StmtFn>>,
}

impl LoadedModule {
    /// Run the module body and return its exported value.
    pub fn run(&self) -> Result<Value> {
        let local = Env::child(&self.globals);
        Ok(exec_block(&self.body, &local)?.unwrap_or(Value::Null))
    }
}

impl std::fmt::Debug for LoadedModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedModule")
            .field("name", &self.name)
            .field("has_source", &self.source.is_some())
            .finish()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct JitLoader {
    pub keep_source: bool,
}

impl JitLoader {
    pub fn new(keep_source: bool) -> Self {
        Self { keep_source }
    }

    /// Emit, parse and compile without running.
    pub fn load(&self, module_name: &str, program: &Program, result_var: &str) -> Result<LoadedModule> {
        let emitted = emit_module(module_name, program, result_var);

        let globals = Rc::new(Env::default());
        for (ident, ext) in &emitted.externals {
            globals.declare(ident, ext.value()?);
        }

        let allocator = Allocator::default();
        let source_type = SourceType::default();
        let ret = Parser::new(&allocator, &emitted.source, source_type).parse();
        if ret.panicked || !ret.errors.is_empty() {
            return Err(CompileError::ModuleLoad {
                module: module_name.to_string(),
                message: format!("{:?}", ret.errors),
            });
        }

        let load_err = |message: String| CompileError::ModuleLoad {
            module: module_name.to_string(),
            message,
        };

        let entry = ret
            .program
            .body
            .iter()
            .find_map(|stmt| match stmt {
                Statement::FunctionDeclaration(func)
                    if func.id.as_ref().map(|id| id.name.as_str()) == Some(MODULE_ENTRY) =>
                {
                    Some(func)
                }
                _ => None,
            })
            .ok_or_else(|| load_err(format!("missing `{}` entry", MODULE_ENTRY)))?;

        let body = match &entry.body {
            Some(body) => compile_block(&body.statements).map_err(|e| load_err(e.to_string()))?,
            None => Vec::new(),
        };

        let source = if self.keep_source {
            let code = Codegen::new().build(&ret.program).code;
            trace!(module = module_name, source = %code, "loaded module");
            Some(code)
        } else {
            None
        };

        Ok(LoadedModule {
            name: module_name.to_string(),
            source,
            globals,
            body: Rc::new(body),
        })
    }
}

impl Materializer for JitLoader {
    fn materialize(&self, module_name: &str, program: &Program, result_var: &str) -> Result<Value> {
        trace!(module = module_name, "loading generated module");
        self.load(module_name, program, result_var)?.run()
    }
}

/// Emit, load and run `program` in one step.
pub fn jit_statements(module_name: &str, program: &Program, result_var: &str) -> Result<Value> {
    JitLoader::default().materialize(module_name, program, result_var)
}

// ═══════════════════════════════════════════════════════════════════════════════
// AST → CLOSURES
// ═══════════════════════════════════════════════════════════════════════════════

fn unsupported(what: &str) -> CompileError {
    CompileError::evaluation(format!("unsupported syntax in generated module: {}", what))
}

fn expr_fn(f: impl Fn(&Rc<Env>) -> Result<Value> + 'static) -> ExprFn {
    Rc::new(f)
}

fn stmt_fn(f: impl Fn(&Rc<Env>) -> Result<Option<Value>> + 'static) -> StmtFn {
    Rc::new(f)
}

fn exec_block(stmts: &[StmtFn], env: &Rc<Env>) -> Result<Option<Value>> {
    for stmt in stmts {
        if let Some(ret) = stmt(env)? {
            return Ok(Some(ret));
        }
    }
    Ok(None)
}

fn compile_block(stmts: &[Statement]) -> Result<Vec<StmtFn>> {
    stmts.iter().map(compile_stmt).collect()
}

fn binding_name(pattern: &BindingPattern) -> Result<String> {
    match pattern {
        BindingPattern::BindingIdentifier(id) => Ok(id.name.to_string()),
        _ => Err(unsupported("destructuring pattern")),
    }
}

fn compile_stmt(stmt: &Statement) -> Result<StmtFn> {
    match stmt {
        Statement::VariableDeclaration(var_decl) => {
            let mut decls: Vec<(String, Option<ExprFn>)> = Vec::new();
            for decl in &var_decl.declarations {
                let name = binding_name(&decl.id)?;
                let init = decl.init.as_ref().map(compile_expr).transpose()?;
                decls.push((name, init));
            }
            Ok(stmt_fn(move |env| {
                for (name, init) in &decls {
                    let value = match init {
                        Some(init) => init(env)?,
                        None => Value::Null,
                    };
                    env.declare(name, value);
                }
                Ok(None)
            }))
        }
        Statement::FunctionDeclaration(func) => {
            let (name, make) = compile_function(func)?;
            Ok(stmt_fn(move |env| {
                env.declare(&name, Value::Function(make(env)));
                Ok(None)
            }))
        }
        Statement::ReturnStatement(ret) => {
            let arg = ret.argument.as_ref().map(compile_expr).transpose()?;
            Ok(stmt_fn(move |env| {
                let value = match &arg {
                    Some(arg) => arg(env)?,
                    None => Value::Null,
                };
                Ok(Some(value))
            }))
        }
        Statement::ExpressionStatement(expr_stmt) => {
            let expr = compile_expr(&expr_stmt.expression)?;
            Ok(stmt_fn(move |env| {
                expr(env)?;
                Ok(None)
            }))
        }
        Statement::BlockStatement(block) => {
            let body = compile_block(&block.body)?;
            Ok(stmt_fn(move |env| exec_block(&body, &Env::child(env))))
        }
        Statement::IfStatement(if_stmt) => {
            let test = compile_expr(&if_stmt.test)?;
            let consequent = compile_stmt(&if_stmt.consequent)?;
            let alternate = if_stmt.alternate.as_ref().map(compile_stmt).transpose()?;
            Ok(stmt_fn(move |env| {
                if test(env)?.is_truthy() {
                    consequent(env)
                } else if let Some(alt) = &alternate {
                    alt(env)
                } else {
                    Ok(None)
                }
            }))
        }
        _ => Err(unsupported("statement")),
    }
}

type FunctionMaker = Rc<dyn Fn(&Rc<Env>) -> Function>;

fn compile_function(func: &JsFunction) -> Result<(String, FunctionMaker)> {
    let name = func
        .id
        .as_ref()
        .map(|id| id.name.to_string())
        .unwrap_or_else(|| "anonymous".to_string());
    let params: Vec<String> = func
        .params
        .items
        .iter()
        .map(|param| binding_name(&param.pattern))
        .collect::<Result<_>>()?;
    let body = match &func.body {
        Some(body) => compile_block(&body.statements)?,
        None => Vec::new(),
    };
    let params = Rc::new(params);
    let body = Rc::new(body);
    let fn_name = name.clone();

    let make: FunctionMaker = Rc::new(move |env: &Rc<Env>| {
        let params = params.clone();
        let body = body.clone();
        let closure_env = env.clone();
        Function::new(&fn_name, move |args| {
            let local = Env::child(&closure_env);
            for (i, param) in params.iter().enumerate() {
                local.declare(param, args.get(i).cloned().unwrap_or(Value::Null));
            }
            Ok(exec_block(&body, &local)?.unwrap_or(Value::Null))
        })
    });
    Ok((name, make))
}

fn compile_args<'b, 'a: 'b, I>(exprs: I) -> Result<Vec<ExprFn>>
where
    I: IntoIterator<Item = Option<&'b Expression<'a>>>,
{
    exprs
        .into_iter()
        .map(|e| e.ok_or_else(|| unsupported("spread argument")).and_then(compile_expr))
        .collect()
}

fn eval_args(args: &[ExprFn], env: &Rc<Env>) -> Result<Vec<Value>> {
    args.iter().map(|a| a(env)).collect()
}

fn compile_expr(expr: &Expression) -> Result<ExprFn> {
    match expr {
        Expression::NullLiteral(_) => Ok(expr_fn(|_| Ok(Value::Null))),
        Expression::BooleanLiteral(b) => {
            let v = b.value;
            Ok(expr_fn(move |_| Ok(Value::Bool(v))))
        }
        Expression::NumericLiteral(n) => {
            let v = n.value;
            Ok(expr_fn(move |_| Ok(Value::Number(v))))
        }
        Expression::StringLiteral(s) => {
            let v = s.value.to_string();
            Ok(expr_fn(move |_| Ok(Value::String(v.clone()))))
        }
        Expression::Identifier(id) => {
            let name = id.name.to_string();
            Ok(expr_fn(move |env| env.lookup(&name)))
        }
        Expression::ParenthesizedExpression(paren) => compile_expr(&paren.expression),
        Expression::ArrayExpression(arr) => {
            let items = compile_args(arr.elements.iter().map(|el| el.as_expression()))?;
            Ok(expr_fn(move |env| Ok(Value::from(eval_args(&items, env)?))))
        }
        Expression::ObjectExpression(obj) => {
            let mut entries: Vec<(String, ExprFn)> = Vec::new();
            for prop in &obj.properties {
                match prop {
                    ObjectPropertyKind::ObjectProperty(p) => {
                        let key = match &p.key {
                            PropertyKey::StaticIdentifier(id) => id.name.to_string(),
                            PropertyKey::StringLiteral(s) => s.value.to_string(),
                            _ => return Err(unsupported("computed object key")),
                        };
                        entries.push((key, compile_expr(&p.value)?));
                    }
                    ObjectPropertyKind::SpreadProperty(_) => {
                        return Err(unsupported("object spread"))
                    }
                }
            }
            Ok(expr_fn(move |env| {
                let mut out = Vec::with_capacity(entries.len());
                for (k, v) in &entries {
                    out.push((k.clone(), v(env)?));
                }
                Ok(Value::map(out))
            }))
        }
        Expression::StaticMemberExpression(member) => {
            let object = compile_expr(&member.object)?;
            let name = member.property.name.to_string();
            Ok(expr_fn(move |env| object(env)?.get_property(&name)))
        }
        Expression::ComputedMemberExpression(member) => {
            let object = compile_expr(&member.object)?;
            let key = compile_expr(&member.expression)?;
            Ok(expr_fn(move |env| {
                let target = object(env)?;
                let key = key(env)?.to_display_string();
                target.get_property(&key)
            }))
        }
        Expression::CallExpression(call) => {
            let args = compile_args(call.arguments.iter().map(|a| a.as_expression()))?;
            match &call.callee {
                Expression::StaticMemberExpression(member) => {
                    let receiver = compile_expr(&member.object)?;
                    let method = member.property.name.to_string();
                    Ok(expr_fn(move |env| {
                        let target = receiver(env)?;
                        let args = eval_args(&args, env)?;
                        target.invoke_method(&method, &args)
                    }))
                }
                callee => {
                    let callee = compile_expr(callee)?;
                    Ok(expr_fn(move |env| {
                        let f = callee(env)?;
                        let args = eval_args(&args, env)?;
                        f.call(&args)
                    }))
                }
            }
        }
        Expression::BinaryExpression(bin) => {
            let left = compile_expr(&bin.left)?;
            let right = compile_expr(&bin.right)?;
            match bin.operator {
                BinaryOperator::Addition => {
                    Ok(expr_fn(move |env| Ok(left(env)?.add(&right(env)?))))
                }
                BinaryOperator::Equality | BinaryOperator::StrictEquality => {
                    Ok(expr_fn(move |env| Ok(Value::Bool(left(env)? == right(env)?))))
                }
                BinaryOperator::Inequality | BinaryOperator::StrictInequality => {
                    Ok(expr_fn(move |env| Ok(Value::Bool(left(env)? != right(env)?))))
                }
                _ => Err(unsupported("binary operator")),
            }
        }
        Expression::LogicalExpression(logical) => {
            let left = compile_expr(&logical.left)?;
            let right = compile_expr(&logical.right)?;
            match logical.operator {
                LogicalOperator::And => Ok(expr_fn(move |env| {
                    let l = left(env)?;
                    if l.is_truthy() {
                        right(env)
                    } else {
                        Ok(l)
                    }
                })),
                LogicalOperator::Or => Ok(expr_fn(move |env| {
                    let l = left(env)?;
                    if l.is_truthy() {
                        Ok(l)
                    } else {
                        right(env)
                    }
                })),
                _ => Err(unsupported("logical operator")),
            }
        }
        Expression::UnaryExpression(unary) => match unary.operator {
            UnaryOperator::LogicalNot => {
                let arg = compile_expr(&unary.argument)?;
                Ok(expr_fn(move |env| Ok(Value::Bool(!arg(env)?.is_truthy()))))
            }
            _ => Err(unsupported("unary operator")),
        },
        Expression::ConditionalExpression(cond) => {
            let test = compile_expr(&cond.test)?;
            let consequent = compile_expr(&cond.consequent)?;
            let alternate = compile_expr(&cond.alternate)?;
            Ok(expr_fn(move |env| {
                if test(env)?.is_truthy() {
                    consequent(env)
                } else {
                    alternate(env)
                }
            }))
        }
        Expression::FunctionExpression(func) => {
            let (_, make) = compile_function(func)?;
            Ok(expr_fn(move |env| Ok(Value::Function(make(env)))))
        }
        _ => Err(unsupported("expression")),
    }
}
