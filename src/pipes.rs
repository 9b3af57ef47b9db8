//! Built-in pipes available to every component.

use crate::error::{CompileError, Result};
use crate::metadata::PipeType;
use crate::output::value::Value;

fn piped_value(args: &[Value]) -> &Value {
    args.first().unwrap_or(&Value::Null)
}

fn uppercase(args: &[Value]) -> Result<Value> {
    match piped_value(args) {
        Value::Null => Ok(Value::Null),
        Value::String(s) => Ok(Value::from(s.to_uppercase())),
        other => Err(CompileError::evaluation(format!(
            "Invalid argument '{:?}' for pipe 'uppercase'",
            other
        ))),
    }
}

fn lowercase(args: &[Value]) -> Result<Value> {
    match piped_value(args) {
        Value::Null => Ok(Value::Null),
        Value::String(s) => Ok(Value::from(s.to_lowercase())),
        other => Err(CompileError::evaluation(format!(
            "Invalid argument '{:?}' for pipe 'lowercase'",
            other
        ))),
    }
}

fn json(args: &[Value]) -> Result<Value> {
    serde_json::to_string_pretty(&piped_value(args).to_json())
        .map(Value::from)
        .map_err(|e| CompileError::evaluation(e.to_string()))
}

pub fn builtin_pipes() -> Vec<PipeType> {
    vec![
        PipeType::new("uppercase", uppercase),
        PipeType::new("lowercase", lowercase),
        PipeType::new("json", json).impure(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(name: &str, value: Value) -> Result<Value> {
        let pipes = builtin_pipes();
        let pipe = pipes.iter().find(|p| p.name() == name).unwrap();
        pipe.transform().call(&[value])
    }

    #[test]
    fn test_case_pipes() {
        assert_eq!(run("uppercase", Value::from("abc")).unwrap(), Value::from("ABC"));
        assert_eq!(run("lowercase", Value::from("AbC")).unwrap(), Value::from("abc"));
        assert_eq!(run("uppercase", Value::Null).unwrap(), Value::Null);
        assert!(run("lowercase", Value::Number(1.0)).is_err());
    }

    #[test]
    fn test_json_pipe() {
        let value = Value::map(vec![("a".to_string(), Value::Number(1.0))]);
        assert_eq!(run("json", value).unwrap(), Value::from("{\n  \"a\": 1\n}"));
    }
}
