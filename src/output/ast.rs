//! Intermediate program representation.
//!
//! A program is a list of statements over a small expression language. It is
//! consumed unchanged by the interpreter and by the source emitter, so nothing
//! in here knows how it will be executed.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::error::{CompileError, Result};
use crate::output::value::Value;

// ═══════════════════════════════════════════════════════════════════════════════
// EXTERNAL REFERENCES
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Default)]
struct Placeholder {
    name: String,
    runtime: Option<Value>,
}

/// A value supplied from outside the program, possibly after the program was
/// built (child view factories, resolved imported styles).
#[derive(Clone)]
pub struct ExternalRef(Rc<RefCell<Placeholder>>);

impl ExternalRef {
    /// Unbound placeholder.
    pub fn placeholder(name: &str) -> Self {
        Self(Rc::new(RefCell::new(Placeholder {
            name: name.to_string(),
            runtime: None,
        })))
    }

    /// Already bound reference.
    pub fn bound(name: &str, value: Value) -> Self {
        Self(Rc::new(RefCell::new(Placeholder {
            name: name.to_string(),
            runtime: Some(value),
        })))
    }

    pub fn bind(&self, name: &str, value: Value) {
        let mut slot = self.0.borrow_mut();
        slot.name = name.to_string();
        slot.runtime = Some(value);
    }

    pub fn name(&self) -> String {
        self.0.borrow().name.clone()
    }

    pub fn is_bound(&self) -> bool {
        self.0.borrow().runtime.is_some()
    }

    pub fn value(&self) -> Result<Value> {
        let slot = self.0.borrow();
        slot.runtime
            .clone()
            .ok_or_else(|| CompileError::UnboundPlaceholder {
                name: slot.name.clone(),
            })
    }

    pub fn ptr_eq(&self, other: &ExternalRef) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for ExternalRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slot = self.0.borrow();
        write!(f, "External({}, bound: {})", slot.name, slot.runtime.is_some())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// EXPRESSIONS & STATEMENTS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Plus,
    Equals,
    NotEquals,
    And,
    Or,
}

#[derive(Debug, Clone)]
pub enum Expr {
    Literal(Literal),
    ReadVar(String),
    External(ExternalRef),
    ReadProp {
        receiver: Box<Expr>,
        name: String,
    },
    InvokeMethod {
        receiver: Box<Expr>,
        method: String,
        args: Vec<Expr>,
    },
    InvokeFunction {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    LiteralArray(Vec<Expr>),
    LiteralMap(Vec<(String, Expr)>),
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Not(Box<Expr>),
    Conditional {
        condition: Box<Expr>,
        true_case: Box<Expr>,
        false_case: Box<Expr>,
    },
    Function {
        params: Vec<String>,
        body: Vec<Stmt>,
    },
}

#[derive(Debug, Clone)]
pub enum Stmt {
    DeclareVar {
        name: String,
        value: Expr,
    },
    DeclareFunction {
        name: String,
        params: Vec<String>,
        body: Vec<Stmt>,
    },
    Return(Expr),
    Expression(Expr),
    If {
        condition: Expr,
        true_case: Vec<Stmt>,
        false_case: Vec<Stmt>,
    },
}

#[derive(Debug, Clone, Default)]
pub struct Program {
    pub statements: Vec<Stmt>,
}

impl Program {
    pub fn new(statements: Vec<Stmt>) -> Self {
        Self { statements }
    }

    /// Every external reference in declaration order, duplicates removed.
    pub fn externals(&self) -> Vec<ExternalRef> {
        let mut found: Vec<ExternalRef> = Vec::new();
        for stmt in &self.statements {
            collect_stmt_externals(stmt, &mut found);
        }
        found
    }
}

fn collect_stmt_externals(stmt: &Stmt, found: &mut Vec<ExternalRef>) {
    match stmt {
        Stmt::DeclareVar { value, .. } => collect_expr_externals(value, found),
        Stmt::DeclareFunction { body, .. } => {
            for s in body {
                collect_stmt_externals(s, found);
            }
        }
        Stmt::Return(e) | Stmt::Expression(e) => collect_expr_externals(e, found),
        Stmt::If {
            condition,
            true_case,
            false_case,
        } => {
            collect_expr_externals(condition, found);
            for s in true_case.iter().chain(false_case) {
                collect_stmt_externals(s, found);
            }
        }
    }
}

fn collect_expr_externals(expr: &Expr, found: &mut Vec<ExternalRef>) {
    match expr {
        Expr::Literal(_) | Expr::ReadVar(_) => {}
        Expr::External(ext) => {
            if !found.iter().any(|f| f.ptr_eq(ext)) {
                found.push(ext.clone());
            }
        }
        Expr::ReadProp { receiver, .. } => collect_expr_externals(receiver, found),
        Expr::InvokeMethod { receiver, args, .. } => {
            collect_expr_externals(receiver, found);
            for a in args {
                collect_expr_externals(a, found);
            }
        }
        Expr::InvokeFunction { callee, args } => {
            collect_expr_externals(callee, found);
            for a in args {
                collect_expr_externals(a, found);
            }
        }
        Expr::LiteralArray(items) => {
            for i in items {
                collect_expr_externals(i, found);
            }
        }
        Expr::LiteralMap(entries) => {
            for (_, v) in entries {
                collect_expr_externals(v, found);
            }
        }
        Expr::Binary { lhs, rhs, .. } => {
            collect_expr_externals(lhs, found);
            collect_expr_externals(rhs, found);
        }
        Expr::Not(e) => collect_expr_externals(e, found),
        Expr::Conditional {
            condition,
            true_case,
            false_case,
        } => {
            collect_expr_externals(condition, found);
            collect_expr_externals(true_case, found);
            collect_expr_externals(false_case, found);
        }
        Expr::Function { body, .. } => {
            for s in body {
                collect_stmt_externals(s, found);
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// BUILDERS
// ═══════════════════════════════════════════════════════════════════════════════

pub fn variable(name: &str) -> Expr {
    Expr::ReadVar(name.to_string())
}

pub fn literal_str(value: &str) -> Expr {
    Expr::Literal(Literal::String(value.to_string()))
}

pub fn literal_num(value: f64) -> Expr {
    Expr::Literal(Literal::Number(value))
}

pub fn literal_bool(value: bool) -> Expr {
    Expr::Literal(Literal::Bool(value))
}

pub fn null() -> Expr {
    Expr::Literal(Literal::Null)
}

pub fn external(ext: &ExternalRef) -> Expr {
    Expr::External(ext.clone())
}

pub fn literal_arr(items: Vec<Expr>) -> Expr {
    Expr::LiteralArray(items)
}

pub fn literal_map(entries: Vec<(String, Expr)>) -> Expr {
    Expr::LiteralMap(entries)
}

pub fn not(expr: Expr) -> Expr {
    Expr::Not(Box::new(expr))
}

pub fn conditional(condition: Expr, true_case: Expr, false_case: Expr) -> Expr {
    Expr::Conditional {
        condition: Box::new(condition),
        true_case: Box::new(true_case),
        false_case: Box::new(false_case),
    }
}

pub fn declare_var(name: &str, value: Expr) -> Stmt {
    Stmt::DeclareVar {
        name: name.to_string(),
        value,
    }
}

pub fn declare_fn(name: &str, params: &[&str], body: Vec<Stmt>) -> Stmt {
    Stmt::DeclareFunction {
        name: name.to_string(),
        params: params.iter().map(|p| p.to_string()).collect(),
        body,
    }
}

impl Expr {
    pub fn prop(self, name: &str) -> Expr {
        Expr::ReadProp {
            receiver: Box::new(self),
            name: name.to_string(),
        }
    }

    pub fn call_method(self, method: &str, args: Vec<Expr>) -> Expr {
        Expr::InvokeMethod {
            receiver: Box::new(self),
            method: method.to_string(),
            args,
        }
    }

    pub fn call_fn(self, args: Vec<Expr>) -> Expr {
        Expr::InvokeFunction {
            callee: Box::new(self),
            args,
        }
    }

    pub fn binary(self, op: BinaryOp, rhs: Expr) -> Expr {
        Expr::Binary {
            op,
            lhs: Box::new(self),
            rhs: Box::new(rhs),
        }
    }

    pub fn to_return(self) -> Stmt {
        Stmt::Return(self)
    }

    pub fn to_stmt(self) -> Stmt {
        Stmt::Expression(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder_binding() {
        let ext = ExternalRef::placeholder("dep");
        assert!(matches!(
            ext.value(),
            Err(CompileError::UnboundPlaceholder { .. })
        ));
        ext.bind("importedStyles0", Value::from("a"));
        assert_eq!(ext.name(), "importedStyles0");
        assert_eq!(ext.value().unwrap(), Value::from("a"));
    }

    #[test]
    fn test_externals_deduplicated_in_order() {
        let a = ExternalRef::placeholder("a");
        let b = ExternalRef::placeholder("b");
        let program = Program::new(vec![
            declare_var("x", literal_arr(vec![external(&a), external(&b)])),
            external(&a).call_fn(vec![]).to_return(),
        ]);
        let names: Vec<String> = program.externals().iter().map(|e| e.name()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }
}
