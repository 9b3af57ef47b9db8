//! Runtime values shared by both materialization strategies.

use std::fmt;
use std::rc::Rc;

use crate::error::{CompileError, Result};

/// Object provided by the host (view manager, injector) and reachable from
/// generated code through property reads and method calls.
pub trait HostObject {
    fn type_name(&self) -> &str;

    fn get_property(&self, _name: &str) -> Option<Value> {
        None
    }

    fn invoke_method(&self, name: &str, args: &[Value]) -> Result<Value>;
}

type NativeFn = dyn Fn(&[Value]) -> Result<Value>;

/// A callable value. Clones share the same underlying closure.
#[derive(Clone)]
pub struct Function {
    name: Rc<str>,
    inner: Rc<NativeFn>,
}

impl Function {
    pub fn new(name: &str, f: impl Fn(&[Value]) -> Result<Value> + 'static) -> Self {
        Self {
            name: Rc::from(name),
            inner: Rc::new(f),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn call(&self, args: &[Value]) -> Result<Value> {
        (self.inner)(args)
    }

    pub fn ptr_eq(&self, other: &Function) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl PartialEq for Function {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[Function {}]", self.name)
    }
}

#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    List(Rc<Vec<Value>>),
    /// Insertion-ordered map.
    Map(Rc<Vec<(String, Value)>>),
    Function(Function),
    Object(Rc<dyn HostObject>),
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", n),
            Value::String(s) => write!(f, "{:?}", s),
            Value::List(items) => f.debug_list().entries(items.iter()).finish(),
            Value::Map(entries) => f
                .debug_map()
                .entries(entries.iter().map(|(k, v)| (k, v)))
                .finish(),
            Value::Function(func) => write!(f, "{:?}", func),
            Value::Object(obj) => write!(f, "[object {}]", obj.type_name()),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::Function(a), Value::Function(b)) => a.ptr_eq(b),
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(Rc::new(items))
    }
}

impl From<Function> for Value {
    fn from(f: Function) -> Self {
        Value::Function(f)
    }
}

impl Value {
    pub fn map(entries: Vec<(String, Value)>) -> Self {
        Value::Map(Rc::new(entries))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::String(s) => !s.is_empty(),
            _ => true,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&Function> {
        match self {
            Value::Function(f) => Some(f),
            _ => None,
        }
    }

    /// Map lookup that never fails; missing keys and non-maps give `None`.
    pub fn entry(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Map(entries) => entries.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    /// Property read with script semantics: missing map keys read as null,
    /// reading through null is an error.
    pub fn get_property(&self, name: &str) -> Result<Value> {
        match self {
            Value::Map(_) => Ok(self.entry(name).cloned().unwrap_or(Value::Null)),
            Value::List(items) if name == "length" => Ok(Value::Number(items.len() as f64)),
            Value::String(s) if name == "length" => Ok(Value::Number(s.chars().count() as f64)),
            Value::Object(obj) => Ok(obj.get_property(name).unwrap_or(Value::Null)),
            Value::Null => Err(CompileError::evaluation(format!(
                "Cannot read property '{}' of null",
                name
            ))),
            _ => Ok(Value::Null),
        }
    }

    pub fn invoke_method(&self, name: &str, args: &[Value]) -> Result<Value> {
        match self {
            Value::Object(obj) => obj.invoke_method(name, args),
            Value::Map(_) => match self.entry(name) {
                Some(Value::Function(f)) => f.call(args),
                _ => Err(CompileError::evaluation(format!("{} is not a function", name))),
            },
            other => Err(CompileError::evaluation(format!(
                "Cannot call method '{}' on {:?}",
                name, other
            ))),
        }
    }

    pub fn call(&self, args: &[Value]) -> Result<Value> {
        match self {
            Value::Function(f) => f.call(args),
            other => Err(CompileError::evaluation(format!(
                "{:?} is not a function",
                other
            ))),
        }
    }

    /// String conversion used by interpolation: null renders as empty text.
    pub fn to_display_string(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => format_number(*n),
            Value::String(s) => s.clone(),
            Value::List(items) => items
                .iter()
                .map(|v| v.to_display_string())
                .collect::<Vec<_>>()
                .join(","),
            Value::Map(_) => "[object Object]".to_string(),
            Value::Function(f) => format!("function {}", f.name()),
            Value::Object(obj) => format!("[object {}]", obj.type_name()),
        }
    }

    /// `+` with string concatenation when either side is a string.
    pub fn add(&self, other: &Value) -> Value {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) => Value::Number(a + b),
            (Value::String(_), _) | (_, Value::String(_)) => Value::String(format!(
                "{}{}",
                self.to_concat_string(),
                other.to_concat_string()
            )),
            _ => Value::Number(self.to_number() + other.to_number()),
        }
    }

    fn to_concat_string(&self) -> String {
        match self {
            Value::Null => "null".to_string(),
            other => other.to_display_string(),
        }
    }

    fn to_number(&self) -> f64 {
        match self {
            Value::Null => 0.0,
            Value::Bool(b) => f64::from(u8::from(*b)),
            Value::Number(n) => *n,
            Value::String(s) => s.trim().parse().unwrap_or(f64::NAN),
            _ => f64::NAN,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => serde_json::Number::from_f64(*n)
                .map(|num| {
                    if n.fract() == 0.0 && n.abs() < 9.0e15 {
                        serde_json::Value::from(*n as i64)
                    } else {
                        serde_json::Value::Number(num)
                    }
                })
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::List(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Map(entries) => {
                let mut obj = serde_json::Map::new();
                for (k, v) in entries.iter() {
                    obj.insert(k.clone(), v.to_json());
                }
                serde_json::Value::Object(obj)
            }
            Value::Function(f) => serde_json::Value::String(format!("[Function {}]", f.name())),
            Value::Object(obj) => serde_json::Value::String(format!("[object {}]", obj.type_name())),
        }
    }

    pub fn from_json(json: &serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::String(s.clone()),
            serde_json::Value::Array(items) => {
                Value::List(Rc::new(items.iter().map(Value::from_json).collect()))
            }
            serde_json::Value::Object(obj) => Value::Map(Rc::new(
                obj.iter()
                    .map(|(k, v)| (k.clone(), Value::from_json(v)))
                    .collect(),
            )),
        }
    }
}

pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e21 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truthiness() {
        assert!(!Value::Null.is_truthy());
        assert!(!Value::from("").is_truthy());
        assert!(Value::from("x").is_truthy());
        assert!(!Value::Number(0.0).is_truthy());
        assert!(Value::from(vec![]).is_truthy());
    }

    #[test]
    fn test_property_reads() {
        let user = Value::map(vec![("name".to_string(), Value::from("Ada"))]);
        assert_eq!(user.get_property("name").unwrap(), Value::from("Ada"));
        assert_eq!(user.get_property("missing").unwrap(), Value::Null);
        assert!(Value::Null.get_property("name").is_err());
    }

    #[test]
    fn test_add_and_display() {
        assert_eq!(Value::from("a").add(&Value::Number(1.0)), Value::from("a1"));
        assert_eq!(Value::Number(1.0).add(&Value::Number(2.5)), Value::Number(3.5));
        assert_eq!(Value::Null.to_display_string(), "");
        assert_eq!(Value::Number(3.0).to_display_string(), "3");
    }

    #[test]
    fn test_json_round_trip_keeps_order() {
        let json = serde_json::json!({ "b": 1, "a": [true, null, "x"] });
        let value = Value::from_json(&json);
        assert_eq!(value.to_json(), json);
    }
}
