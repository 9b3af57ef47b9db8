//! Metadata Module for the Runtime Compiler
//!
//! Declarations as authored (`DirectiveDecl`, `ComponentType`, `PipeType`)
//! and the resolved, compiler-facing metadata derived from them.
//!
//! A `ComponentType` is the identity of a declaration. Two handles are equal
//! only when they point at the same declaration; names never participate.

use std::cell::RefCell;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::{CompileError, Result};
use crate::output::value::{Function, Value};
use crate::selector::CssSelector;

static TYPE_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

fn next_type_id() -> u64 {
    TYPE_ID_COUNTER.fetch_add(1, Ordering::SeqCst)
}

// ═══════════════════════════════════════════════════════════════════════════════
// DECLARATIONS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ViewEncapsulation {
    /// Styles are rewritten to only match elements of the declaring component.
    #[default]
    Emulated,
    None,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectiveDecl {
    pub name: String,
    #[serde(default)]
    pub selector: String,
    #[serde(default)]
    pub is_component: bool,
    #[serde(default)]
    pub template: Option<String>,
    #[serde(default)]
    pub template_url: Option<String>,
    #[serde(default)]
    pub styles: Vec<String>,
    #[serde(default)]
    pub style_urls: Vec<String>,
    #[serde(default)]
    pub encapsulation: ViewEncapsulation,
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub module_url: Option<String>,
}

impl DirectiveDecl {
    pub fn component(name: &str, selector: &str) -> Self {
        Self {
            name: name.to_string(),
            selector: selector.to_string(),
            is_component: true,
            ..Default::default()
        }
    }

    pub fn directive(name: &str, selector: &str) -> Self {
        Self {
            name: name.to_string(),
            selector: selector.to_string(),
            is_component: false,
            ..Default::default()
        }
    }

    pub fn with_template(mut self, template: &str) -> Self {
        self.template = Some(template.to_string());
        self
    }

    pub fn with_template_url(mut self, url: &str) -> Self {
        self.template_url = Some(url.to_string());
        self
    }

    pub fn with_styles(mut self, styles: &[&str]) -> Self {
        self.styles = styles.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_style_urls(mut self, urls: &[&str]) -> Self {
        self.style_urls = urls.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_encapsulation(mut self, encapsulation: ViewEncapsulation) -> Self {
        self.encapsulation = encapsulation;
        self
    }

    pub fn with_inputs(mut self, inputs: &[&str]) -> Self {
        self.inputs = inputs.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_module_url(mut self, url: &str) -> Self {
        self.module_url = Some(url.to_string());
        self
    }

    pub fn into_type(self) -> ComponentType {
        ComponentType::new(self)
    }
}

struct TypeInner {
    id: u64,
    decl: DirectiveDecl,
    view_directives: RefCell<Vec<ComponentType>>,
    pipes: RefCell<Vec<PipeType>>,
}

/// Identity of a component or directive declaration.
///
/// View directives are attached after construction so that mutually
/// recursive components can reference each other.
#[derive(Clone)]
pub struct ComponentType(Rc<TypeInner>);

impl ComponentType {
    pub fn new(decl: DirectiveDecl) -> Self {
        Self(Rc::new(TypeInner {
            id: next_type_id(),
            decl,
            view_directives: RefCell::new(Vec::new()),
            pipes: RefCell::new(Vec::new()),
        }))
    }

    pub fn id(&self) -> u64 {
        self.0.id
    }

    pub fn name(&self) -> &str {
        &self.0.decl.name
    }

    pub fn decl(&self) -> &DirectiveDecl {
        &self.0.decl
    }

    pub fn set_view_directives(&self, directives: Vec<ComponentType>) {
        *self.0.view_directives.borrow_mut() = directives;
    }

    pub fn view_directives(&self) -> Vec<ComponentType> {
        self.0.view_directives.borrow().clone()
    }

    pub fn set_pipes(&self, pipes: Vec<PipeType>) {
        *self.0.pipes.borrow_mut() = pipes;
    }

    pub fn pipes(&self) -> Vec<PipeType> {
        self.0.pipes.borrow().clone()
    }
}

impl PartialEq for ComponentType {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for ComponentType {}

impl Hash for ComponentType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Rc::as_ptr(&self.0) as usize).hash(state);
    }
}

impl fmt::Debug for ComponentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.0.decl.name, self.0.id)
    }
}

struct PipeInner {
    name: String,
    pure: bool,
    transform: Function,
}

/// A named value transform usable as `expr | name:arg` in templates.
#[derive(Clone)]
pub struct PipeType(Rc<PipeInner>);

impl PipeType {
    /// `transform` receives the piped value followed by the pipe arguments.
    pub fn new(name: &str, transform: impl Fn(&[Value]) -> Result<Value> + 'static) -> Self {
        Self(Rc::new(PipeInner {
            name: name.to_string(),
            pure: true,
            transform: Function::new(name, transform),
        }))
    }

    pub fn impure(mut self) -> Self {
        if let Some(inner) = Rc::get_mut(&mut self.0) {
            inner.pure = false;
        }
        self
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn is_pure(&self) -> bool {
        self.0.pure
    }

    pub fn transform(&self) -> &Function {
        &self.0.transform
    }
}

impl PartialEq for PipeType {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for PipeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pipe({})", self.0.name)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// COMPILE METADATA
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq)]
pub struct CompileTypeMetadata {
    pub name: String,
    pub module_url: Option<String>,
    /// Serial of the declaration this metadata describes.
    pub id: u64,
    /// `None` for synthesized host wrappers.
    pub runtime: Option<ComponentType>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompileTemplateMetadata {
    pub encapsulation: ViewEncapsulation,
    pub template: Option<String>,
    pub template_url: Option<String>,
    pub styles: Vec<String>,
    pub style_urls: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompileDirectiveMetadata {
    pub ty: CompileTypeMetadata,
    pub is_component: bool,
    pub selector: String,
    pub inputs: Vec<String>,
    /// Present for components only.
    pub template: Option<CompileTemplateMetadata>,
}

impl CompileDirectiveMetadata {
    pub fn name(&self) -> &str {
        &self.ty.name
    }

    pub fn runtime_type(&self) -> Option<&ComponentType> {
        self.ty.runtime.as_ref()
    }

    pub fn selectors(&self) -> Vec<CssSelector> {
        CssSelector::parse(&self.selector)
    }

    pub fn has_input(&self, name: &str) -> bool {
        self.inputs.iter().any(|i| i.eq_ignore_ascii_case(name))
    }
}

#[derive(Clone, PartialEq)]
pub struct CompilePipeMetadata {
    pub name: String,
    pub pure: bool,
    pub transform: Function,
}

impl fmt::Debug for CompilePipeMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompilePipeMetadata")
            .field("name", &self.name)
            .field("pure", &self.pure)
            .finish()
    }
}

/// Metadata for the synthetic component that hosts `comp` at the top level.
/// Its template is the smallest element matching `comp`'s selector.
pub fn create_host_component_meta(comp: &CompileDirectiveMetadata) -> Result<CompileDirectiveMetadata> {
    let selector = comp.selectors().into_iter().next().ok_or_else(|| {
        CompileError::InvalidDeclaration {
            message: format!(
                "Component '{}' has no usable selector '{}'",
                comp.name(),
                comp.selector
            ),
        }
    })?;
    Ok(CompileDirectiveMetadata {
        ty: CompileTypeMetadata {
            name: format!("{}_Host", comp.name()),
            module_url: comp.ty.module_url.clone(),
            id: comp.ty.id,
            runtime: None,
        },
        is_component: true,
        selector: "*".to_string(),
        inputs: Vec::new(),
        template: Some(CompileTemplateMetadata {
            encapsulation: ViewEncapsulation::None,
            template: Some(selector.matching_element_template()),
            template_url: None,
            styles: Vec::new(),
            style_urls: Vec::new(),
        }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_is_by_pointer_not_name() {
        let a = DirectiveDecl::component("Same", "x-a").into_type();
        let b = DirectiveDecl::component("Same", "x-a").into_type();
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
        assert_ne!(a.id(), b.id());

        let mut set = std::collections::HashSet::new();
        set.insert(a.clone());
        set.insert(b);
        set.insert(a);
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_mutual_view_directives() {
        let a = DirectiveDecl::component("A", "x-a").into_type();
        let b = DirectiveDecl::component("B", "x-b").into_type();
        a.set_view_directives(vec![b.clone()]);
        b.set_view_directives(vec![a.clone()]);
        assert_eq!(a.view_directives()[0], b);
        assert_eq!(b.view_directives()[0], a);
    }

    #[test]
    fn test_host_meta_wraps_selector() {
        let comp = CompileDirectiveMetadata {
            ty: CompileTypeMetadata {
                name: "Tree".to_string(),
                module_url: None,
                id: 7,
                runtime: None,
            },
            is_component: true,
            selector: "tree-view, [tree]".to_string(),
            inputs: vec![],
            template: Some(CompileTemplateMetadata::default()),
        };
        let host = create_host_component_meta(&comp).unwrap();
        assert_eq!(host.name(), "Tree_Host");
        assert_eq!(
            host.template.unwrap().template.as_deref(),
            Some("<tree-view></tree-view>")
        );
    }

    #[test]
    fn test_host_meta_requires_selector() {
        let comp = CompileDirectiveMetadata {
            ty: CompileTypeMetadata {
                name: "NoSel".to_string(),
                module_url: None,
                id: 1,
                runtime: None,
            },
            is_component: true,
            selector: String::new(),
            inputs: vec![],
            template: None,
        };
        assert!(matches!(
            create_host_component_meta(&comp),
            Err(CompileError::InvalidDeclaration { .. })
        ));
    }
}
