//! Output Module for the Runtime Compiler
//!
//! Intermediate programs and the two ways of turning them into values:
//! direct interpretation, or emitting source text and loading it.

pub mod ast;
pub mod emitter;
pub mod interpreter;
pub mod jit;
pub mod value;

use std::rc::Rc;

use crate::config::{CompilerConfig, PlatformCapabilities};
use crate::error::Result;
use ast::Program;
use value::Value;

/// Turns a program into the value bound to `result_var` once it has run.
/// For view programs that value is the view factory.
pub trait Materializer {
    fn materialize(&self, module_name: &str, program: &Program, result_var: &str) -> Result<Value>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaterializeStrategy {
    Interpret,
    CompileAndLoad,
}

impl MaterializeStrategy {
    pub fn select(config: &CompilerConfig, platform: &PlatformCapabilities) -> Self {
        if config.use_jit && platform.dynamic_code {
            MaterializeStrategy::CompileAndLoad
        } else {
            MaterializeStrategy::Interpret
        }
    }
}

pub fn select_materializer(
    config: &CompilerConfig,
    platform: &PlatformCapabilities,
) -> Rc<dyn Materializer> {
    match MaterializeStrategy::select(config, platform) {
        MaterializeStrategy::CompileAndLoad => Rc::new(jit::JitLoader::new(config.gen_debug_info)),
        MaterializeStrategy::Interpret => Rc::new(interpreter::Interpreter),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_selection() {
        let jit = CompilerConfig::default();
        let interp = CompilerConfig::interpreted();
        let dynamic = PlatformCapabilities { dynamic_code: true };
        let locked = PlatformCapabilities { dynamic_code: false };

        assert_eq!(
            MaterializeStrategy::select(&jit, &dynamic),
            MaterializeStrategy::CompileAndLoad
        );
        assert_eq!(
            MaterializeStrategy::select(&jit, &locked),
            MaterializeStrategy::Interpret
        );
        assert_eq!(
            MaterializeStrategy::select(&interp, &dynamic),
            MaterializeStrategy::Interpret
        );
    }
}
