//! Tree-walking materializer.
//!
//! Executes a [`Program`] directly. Function declarations become closures
//! over the scope they were declared in, so generated view factories stay
//! callable after `materialize` returns.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use tracing::trace;

use crate::error::{CompileError, Result};
use crate::output::ast::{BinaryOp, Expr, Literal, Program, Stmt};
use crate::output::value::{Function, Value};
use crate::output::Materializer;

#[derive(Default)]
struct Scope {
    vars: RefCell<HashMap<String, Value>>,
    parent: Option<Rc<Scope>>,
}

impl Scope {
    fn child(parent: &Rc<Scope>) -> Rc<Scope> {
        Rc::new(Scope {
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

#[derive(Debug, Default, Clone, Copy)]
pub struct Interpreter;

impl Materializer for Interpreter {
    fn materialize(&self, module_name: &str, program: &Program, result_var: &str) -> Result<Value> {
        trace!(module = module_name, "interpreting program");
        interpret_statements(program, result_var)
    }
}

/// Run `program` in a fresh global scope and return the value of `result_var`.
pub fn interpret_statements(program: &Program, result_var: &str) -> Result<Value> {
    for ext in program.externals() {
        ext.value()?;
    }
    let global = Rc::new(Scope::default());
    exec_block(&program.statements, &global)?;
    global.lookup(result_var)
}

fn exec_block(stmts: &[Stmt], scope: &Rc<Scope>) -> Result<Option<Value>> {
    for stmt in stmts {
        if let Some(ret) = exec_stmt(stmt, scope)? {
            return Ok(Some(ret));
        }
    }
    Ok(None)
}

fn exec_stmt(stmt: &Stmt, scope: &Rc<Scope>) -> Result<Option<Value>> {
    match stmt {
        Stmt::DeclareVar { name, value } => {
            let v = eval(value, scope)?;
            scope.declare(name, v);
            Ok(None)
        }
        Stmt::DeclareFunction { name, params, body } => {
            let f = make_function(name, params, body, scope);
            scope.declare(name, Value::Function(f));
            Ok(None)
        }
        Stmt::Return(expr) => Ok(Some(eval(expr, scope)?)),
        Stmt::Expression(expr) => {
            eval(expr, scope)?;
            Ok(None)
        }
        Stmt::If {
            condition,
            true_case,
            false_case,
        } => {
            let branch = if eval(condition, scope)?.is_truthy() {
                true_case
            } else {
                false_case
            };
            exec_block(branch, &Scope::child(scope))
        }
    }
}

fn make_function(name: &str, params: &[String], body: &[Stmt], scope: &Rc<Scope>) -> Function {
    let params: Rc<Vec<String>> = Rc::new(params.to_vec());
    let body: Rc<Vec<Stmt>> = Rc::new(body.to_vec());
    let closure_scope = scope.clone();
    Function::new(name, move |args| {
        let local = Scope::child(&closure_scope);
        for (i, param) in params.iter().enumerate() {
            local.declare(param, args.get(i).cloned().unwrap_or(Value::Null));
        }
        Ok(exec_block(&body, &local)?.unwrap_or(Value::Null))
    })
}

fn eval(expr: &Expr, scope: &Rc<Scope>) -> Result<Value> {
    match expr {
        Expr::Literal(lit) => Ok(match lit {
            Literal::Null => Value::Null,
            Literal::Bool(b) => Value::Bool(*b),
            Literal::Number(n) => Value::Number(*n),
            Literal::String(s) => Value::String(s.clone()),
        }),
        Expr::ReadVar(name) => scope.lookup(name),
        Expr::External(ext) => ext.value(),
        Expr::ReadProp { receiver, name } => eval(receiver, scope)?.get_property(name),
        Expr::InvokeMethod {
            receiver,
            method,
            args,
        } => {
            let target = eval(receiver, scope)?;
            let args = eval_all(args, scope)?;
            target.invoke_method(method, &args)
        }
        Expr::InvokeFunction { callee, args } => {
            let f = eval(callee, scope)?;
            let args = eval_all(args, scope)?;
            f.call(&args)
        }
        Expr::LiteralArray(items) => Ok(Value::from(eval_all(items, scope)?)),
        Expr::LiteralMap(entries) => {
            let mut out = Vec::with_capacity(entries.len());
            for (k, v) in entries {
                out.push((k.clone(), eval(v, scope)?));
            }
            Ok(Value::map(out))
        }
        Expr::Binary { op, lhs, rhs } => {
            let left = eval(lhs, scope)?;
            match op {
                BinaryOp::And if !left.is_truthy() => Ok(left),
                BinaryOp::Or if left.is_truthy() => Ok(left),
                BinaryOp::And | BinaryOp::Or => eval(rhs, scope),
                BinaryOp::Plus => Ok(left.add(&eval(rhs, scope)?)),
                BinaryOp::Equals => Ok(Value::Bool(left == eval(rhs, scope)?)),
                BinaryOp::NotEquals => Ok(Value::Bool(left != eval(rhs, scope)?)),
            }
        }
        Expr::Not(inner) => Ok(Value::Bool(!eval(inner, scope)?.is_truthy())),
        Expr::Conditional {
            condition,
            true_case,
            false_case,
        } => {
            if eval(condition, scope)?.is_truthy() {
                eval(true_case, scope)
            } else {
                eval(false_case, scope)
            }
        }
        Expr::Function { params, body } => {
            Ok(Value::Function(make_function("anonymous", params, body, scope)))
        }
    }
}

fn eval_all(exprs: &[Expr], scope: &Rc<Scope>) -> Result<Vec<Value>> {
    exprs.iter().map(|e| eval(e, scope)).collect()
}
