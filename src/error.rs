//! Error Module for the Runtime Compiler
//!
//! One error type flows through every stage. It is `Clone` because the same
//! failure is observed by every holder of a shared completion token.

use thiserror::Error;

// ═══════════════════════════════════════════════════════════════════════════════
// ERROR CODES
// ═══════════════════════════════════════════════════════════════════════════════

pub const ERR_NOT_A_COMPONENT: &str = "RC-ERR-NOT-COMPONENT";
pub const ERR_PIPE_NOT_FOUND: &str = "RC-ERR-PIPE-NOT-FOUND";
pub const ERR_INTERPOLATION: &str = "RC-ERR-INTERPOLATION";
pub const ERR_MULTIPLE_COMPONENTS: &str = "RC-ERR-MULTIPLE-COMPONENTS";
pub const ERR_NO_TEMPLATE: &str = "RC-ERR-NO-TEMPLATE";
pub const ERR_TEMPLATE_PARSE: &str = "RC-ERR-TEMPLATE-PARSE";
pub const ERR_FETCH: &str = "RC-ERR-FETCH";
pub const ERR_MODULE_LOAD: &str = "RC-ERR-MODULE-LOAD";
pub const ERR_EVAL: &str = "RC-ERR-EVAL";
pub const ERR_UNBOUND: &str = "RC-ERR-UNBOUND";
pub const ERR_NOT_READY: &str = "RC-ERR-NOT-READY";
pub const ERR_DECLARATION: &str = "RC-ERR-DECLARATION";

pub type Result<T, E = CompileError> = std::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompileError {
    #[error("Could not compile '{name}' because it is not a component.")]
    NotAComponent { name: String },

    #[error("The pipe '{name}' could not be found (used in '{component}')")]
    PipeNotFound { name: String, component: String },

    #[error("Does not support more than 9 expressions (found {count})")]
    TooManyInterpolations { count: usize },

    #[error("More than one component matched element <{element}>: {}", components.join(", "))]
    MultipleComponents {
        element: String,
        components: Vec<String>,
    },

    #[error("Component '{name}' has neither a template nor a templateUrl")]
    MissingTemplate { name: String },

    #[error("Template parse errors in '{component}': {message}")]
    TemplateParse { component: String, message: String },

    #[error("Failed to load {url}: {message}")]
    ResourceFetch { url: String, message: String },

    #[error("Failed to load module {module}: {message}")]
    ModuleLoad { module: String, message: String },

    #[error("Evaluation failed: {message}")]
    Evaluation { message: String },

    #[error("External reference '{name}' was used before it was bound")]
    UnboundPlaceholder { name: String },

    #[error("View factory for '{name}' was invoked before compilation finished")]
    FactoryNotReady { name: String },

    #[error("Invalid declaration: {message}")]
    InvalidDeclaration { message: String },
}

impl CompileError {
    pub fn evaluation(message: impl Into<String>) -> Self {
        CompileError::Evaluation {
            message: message.into(),
        }
    }

    pub fn fetch(url: &str, message: impl Into<String>) -> Self {
        CompileError::ResourceFetch {
            url: url.to_string(),
            message: message.into(),
        }
    }

    /// Stable code for this failure class.
    pub fn code(&self) -> &'static str {
        match self {
            CompileError::NotAComponent { .. } => ERR_NOT_A_COMPONENT,
            CompileError::PipeNotFound { .. } => ERR_PIPE_NOT_FOUND,
            CompileError::TooManyInterpolations { .. } => ERR_INTERPOLATION,
            CompileError::MultipleComponents { .. } => ERR_MULTIPLE_COMPONENTS,
            CompileError::MissingTemplate { .. } => ERR_NO_TEMPLATE,
            CompileError::TemplateParse { .. } => ERR_TEMPLATE_PARSE,
            CompileError::ResourceFetch { .. } => ERR_FETCH,
            CompileError::ModuleLoad { .. } => ERR_MODULE_LOAD,
            CompileError::Evaluation { .. } => ERR_EVAL,
            CompileError::UnboundPlaceholder { .. } => ERR_UNBOUND,
            CompileError::FactoryNotReady { .. } => ERR_NOT_READY,
            CompileError::InvalidDeclaration { .. } => ERR_DECLARATION,
        }
    }

    /// Configuration errors point at a mistake in a component declaration
    /// and are never worth retrying.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            CompileError::NotAComponent { .. }
                | CompileError::PipeNotFound { .. }
                | CompileError::TooManyInterpolations { .. }
                | CompileError::MultipleComponents { .. }
                | CompileError::MissingTemplate { .. }
                | CompileError::TemplateParse { .. }
        )
    }

    /// Short remediation hint shown next to the message by hosts.
    pub fn hint(&self) -> &'static str {
        match self.code() {
            ERR_NOT_A_COMPONENT => "Only components can be bootstrapped in a host view.",
            ERR_PIPE_NOT_FOUND => "Add the pipe to the component's `pipes` list.",
            ERR_INTERPOLATION => "Split the text into several bindings of at most 9 values.",
            ERR_MULTIPLE_COMPONENTS => "Make component selectors mutually exclusive.",
            ERR_NO_TEMPLATE => "Declare `template` or `templateUrl` on the component.",
            ERR_TEMPLATE_PARSE => "Check the template syntax around the reported binding.",
            ERR_FETCH => "The resource loader could not provide the file.",
            ERR_MODULE_LOAD => "The generated module did not parse; this is a compiler bug.",
            ERR_UNBOUND | ERR_NOT_READY => "A dependency was used before compilation finished.",
            _ => "",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_and_classes() {
        let err = CompileError::NotAComponent {
            name: "SomeDirective".to_string(),
        };
        assert_eq!(err.code(), ERR_NOT_A_COMPONENT);
        assert!(err.is_configuration());
        assert!(err.to_string().contains("SomeDirective"));

        let fetch = CompileError::fetch("a.css", "404");
        assert_eq!(fetch.code(), ERR_FETCH);
        assert!(!fetch.is_configuration());
    }

    #[test]
    fn test_multiple_components_message() {
        let err = CompileError::MultipleComponents {
            element: "x-a".to_string(),
            components: vec!["A".to_string(), "B".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "More than one component matched element <x-a>: A, B"
        );
    }
}
