//! Metadata resolution.
//!
//! Turns declarations into compile metadata. Resolution is synchronous and
//! deterministic; results are memoized per component identity.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use tracing::trace;

use crate::error::{CompileError, Result};
use crate::metadata::{
    CompileDirectiveMetadata, CompilePipeMetadata, CompileTemplateMetadata,
    CompileTypeMetadata, ComponentType, PipeType,
};
use crate::pipes::builtin_pipes;

pub trait MetadataResolver {
    fn get_directive_metadata(&self, ty: &ComponentType) -> Result<Rc<CompileDirectiveMetadata>>;

    /// Platform directives followed by the component's own view directives.
    fn get_view_directives_metadata(
        &self,
        ty: &ComponentType,
    ) -> Result<Vec<Rc<CompileDirectiveMetadata>>>;

    /// Platform pipes followed by the component's own pipes. Later entries
    /// win on name clashes.
    fn get_view_pipes_metadata(&self, ty: &ComponentType) -> Result<Vec<Rc<CompilePipeMetadata>>>;

    fn clear_cache(&self) {}
}

pub struct RuntimeMetadataResolver {
    platform_directives: Vec<ComponentType>,
    platform_pipes: Vec<PipeType>,
    directive_cache: RefCell<HashMap<ComponentType, Rc<CompileDirectiveMetadata>>>,
    resolved: Cell<usize>,
}

impl Default for RuntimeMetadataResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl RuntimeMetadataResolver {
    /// Resolver with the built-in pipes and no platform directives.
    pub fn new() -> Self {
        Self {
            platform_directives: Vec::new(),
            platform_pipes: builtin_pipes(),
            directive_cache: RefCell::new(HashMap::new()),
            resolved: Cell::new(0),
        }
    }

    pub fn with_platform_directives(mut self, directives: Vec<ComponentType>) -> Self {
        self.platform_directives = directives;
        self
    }

    pub fn with_platform_pipes(mut self, pipes: Vec<PipeType>) -> Self {
        self.platform_pipes = pipes;
        self
    }

    /// Number of cache misses since construction.
    pub fn resolved_count(&self) -> usize {
        self.resolved.get()
    }

    fn resolve(&self, ty: &ComponentType) -> Result<CompileDirectiveMetadata> {
        let decl = ty.decl();
        if decl.name.trim().is_empty() {
            return Err(CompileError::InvalidDeclaration {
                message: "directive declarations need a name".to_string(),
            });
        }

        let template = if decl.is_component {
            if decl.template.is_none() && decl.template_url.is_none() {
                return Err(CompileError::MissingTemplate {
                    name: decl.name.clone(),
                });
            }
            Some(CompileTemplateMetadata {
                encapsulation: decl.encapsulation,
                template: decl.template.clone(),
                template_url: decl.template_url.clone(),
                styles: decl.styles.clone(),
                style_urls: decl.style_urls.clone(),
            })
        } else {
            None
        };

        Ok(CompileDirectiveMetadata {
            ty: CompileTypeMetadata {
                name: decl.name.clone(),
                module_url: decl.module_url.clone(),
                id: ty.id(),
                runtime: Some(ty.clone()),
            },
            is_component: decl.is_component,
            selector: decl.selector.clone(),
            inputs: decl.inputs.clone(),
            template,
        })
    }
}

fn pipe_metadata(pipe: &PipeType) -> Rc<CompilePipeMetadata> {
    Rc::new(CompilePipeMetadata {
        name: pipe.name().to_string(),
        pure: pipe.is_pure(),
        transform: pipe.transform().clone(),
    })
}

impl MetadataResolver for RuntimeMetadataResolver {
    fn get_directive_metadata(&self, ty: &ComponentType) -> Result<Rc<CompileDirectiveMetadata>> {
        if let Some(meta) = self.directive_cache.borrow().get(ty) {
            trace!(directive = ty.name(), "metadata cache hit");
            return Ok(meta.clone());
        }
        let meta = Rc::new(self.resolve(ty)?);
        self.resolved.set(self.resolved.get() + 1);
        self.directive_cache
            .borrow_mut()
            .insert(ty.clone(), meta.clone());
        Ok(meta)
    }

    fn get_view_directives_metadata(
        &self,
        ty: &ComponentType,
    ) -> Result<Vec<Rc<CompileDirectiveMetadata>>> {
        self.platform_directives
            .iter()
            .cloned()
            .chain(ty.view_directives())
            .map(|d| self.get_directive_metadata(&d))
            .collect()
    }

    fn get_view_pipes_metadata(&self, ty: &ComponentType) -> Result<Vec<Rc<CompilePipeMetadata>>> {
        Ok(self
            .platform_pipes
            .iter()
            .chain(ty.pipes().iter())
            .map(pipe_metadata)
            .collect())
    }

    fn clear_cache(&self) {
        self.directive_cache.borrow_mut().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::DirectiveDecl;
    use crate::output::value::Value;

    #[test]
    fn test_component_metadata_is_memoized() {
        let resolver = RuntimeMetadataResolver::new();
        let ty = DirectiveDecl::component("App", "my-app")
            .with_template("<p></p>")
            .into_type();
        let first = resolver.get_directive_metadata(&ty).unwrap();
        let second = resolver.get_directive_metadata(&ty).unwrap();
        assert!(Rc::ptr_eq(&first, &second));
        assert_eq!(resolver.resolved_count(), 1);
        assert_eq!(first.runtime_type(), Some(&ty));

        resolver.clear_cache();
        resolver.get_directive_metadata(&ty).unwrap();
        assert_eq!(resolver.resolved_count(), 2);
    }

    #[test]
    fn test_component_without_template() {
        let resolver = RuntimeMetadataResolver::new();
        let ty = DirectiveDecl::component("Empty", "x-empty").into_type();
        assert_eq!(
            resolver.get_directive_metadata(&ty).unwrap_err(),
            CompileError::MissingTemplate {
                name: "Empty".to_string()
            }
        );
    }

    #[test]
    fn test_directive_has_no_template() {
        let resolver = RuntimeMetadataResolver::new();
        let ty = DirectiveDecl::directive("Tooltip", "[tooltip]").into_type();
        let meta = resolver.get_directive_metadata(&ty).unwrap();
        assert!(!meta.is_component);
        assert!(meta.template.is_none());
    }

    #[test]
    fn test_view_pipes_put_component_pipes_last() {
        let resolver = RuntimeMetadataResolver::new();
        let ty = DirectiveDecl::component("App", "my-app")
            .with_template("")
            .into_type();
        ty.set_pipes(vec![PipeType::new("shout", |args| {
            Ok(Value::from(format!(
                "{}!",
                args.first().map(Value::to_display_string).unwrap_or_default()
            )))
        })]);
        let pipes = resolver.get_view_pipes_metadata(&ty).unwrap();
        assert_eq!(pipes.last().map(|p| p.name.as_str()), Some("shout"));
        assert!(pipes.iter().any(|p| p.name == "uppercase"));
    }
}
