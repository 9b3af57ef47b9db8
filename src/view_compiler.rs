//! View Compiler Module
//!
//! Turns a parsed template into a program declaring one view factory:
//!
//! ```text
//! function viewFactory_App(viewManager, parentInjector, contextEl) {
//!   var comp = viewManager.createComponent("App", parentInjector, contextEl);
//!   viewManager.registerStyles("c1a2b3c4", styles$ext0);
//!   return viewManager.createView("App", comp, contextEl, null, [ ...nodes ]);
//! }
//! ```
//!
//! Child components are reached through unbound externals (one per component
//! element, in document order) that the runtime compiler later binds to the
//! child's view factory.

use std::rc::Rc;

use sha2::{Digest, Sha256};
use tracing::{error, trace};

use crate::error::{CompileError, Result};
use crate::expression::BindingExpr;
use crate::metadata::{
    CompileDirectiveMetadata, CompilePipeMetadata, CompileTypeMetadata, ViewEncapsulation,
};
use crate::output::ast::{
    conditional, declare_fn, declare_var, external, literal_arr, literal_map, literal_num,
    literal_str, not, null, variable, Expr, ExternalRef, Program, Stmt,
};
use crate::output::value::Value;
use crate::style_compiler::{COMPONENT_VARIABLE, CONTENT_ATTR, HOST_ATTR};
use crate::template_parser::{BoundPropertyAst, BoundValue, ElementAst, Interpolation, TemplateAst};

pub const VIEW_MANAGER_VAR: &str = "viewManager";
pub const PARENT_INJECTOR_VAR: &str = "parentInjector";
pub const CONTEXT_EL_VAR: &str = "contextEl";
pub const COMPONENT_VAR: &str = "comp";

/// Largest number of values a single interpolation may contain.
pub const MAX_INTERPOLATION_VALUES: usize = 9;

#[derive(Debug, Clone)]
pub struct ViewFactoryDependency {
    pub comp: Rc<CompileDirectiveMetadata>,
    pub factory_placeholder: ExternalRef,
}

#[derive(Debug, Clone)]
pub struct ViewCompileResult {
    pub program: Program,
    pub dependencies: Vec<ViewFactoryDependency>,
    pub view_factory_var: String,
}

pub fn view_factory_name(component_name: &str) -> String {
    let sanitized: String = component_name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    format!("viewFactory_{}", sanitized)
}

/// Stable per-component id substituted for `%COMP%` in emulated styles.
pub fn content_id(ty: &CompileTypeMetadata) -> String {
    let digest = Sha256::digest(format!("{}:{}", ty.name, ty.id).as_bytes());
    let hex: String = digest.iter().take(4).map(|b| format!("{:02x}", b)).collect();
    format!("c{}", hex)
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ViewCompiler;

struct ViewBuilder<'a> {
    component: &'a CompileDirectiveMetadata,
    pipes: &'a [Rc<CompilePipeMetadata>],
    content_attr: Option<String>,
    pipe_refs: Vec<(String, ExternalRef)>,
    dependencies: Vec<ViewFactoryDependency>,
}

impl ViewCompiler {
    pub fn new() -> Self {
        ViewCompiler
    }

    pub fn compile_component(
        &self,
        component: &CompileDirectiveMetadata,
        template: &[TemplateAst],
        styles: Expr,
        pipes: &[Rc<CompilePipeMetadata>],
    ) -> Result<ViewCompileResult> {
        let id = content_id(&component.ty);
        let encapsulated = component
            .template
            .as_ref()
            .map_or(false, |t| t.encapsulation == ViewEncapsulation::Emulated);

        let mut builder = ViewBuilder {
            component,
            pipes,
            content_attr: encapsulated.then(|| CONTENT_ATTR.replace(COMPONENT_VARIABLE, &id)),
            pipe_refs: Vec::new(),
            dependencies: Vec::new(),
        };
        let nodes = builder.nodes(template)?;

        let vm = || variable(VIEW_MANAGER_VAR);
        let host_attr = if encapsulated {
            literal_str(&HOST_ATTR.replace(COMPONENT_VARIABLE, &id))
        } else {
            null()
        };
        let view_factory_var = view_factory_name(component.name());
        let body: Vec<Stmt> = vec![
            declare_var(
                COMPONENT_VAR,
                vm().call_method(
                    "createComponent",
                    vec![
                        literal_str(component.name()),
                        variable(PARENT_INJECTOR_VAR),
                        variable(CONTEXT_EL_VAR),
                    ],
                ),
            ),
            vm().call_method("registerStyles", vec![literal_str(&id), styles])
                .to_stmt(),
            vm().call_method(
                "createView",
                vec![
                    literal_str(component.name()),
                    variable(COMPONENT_VAR),
                    variable(CONTEXT_EL_VAR),
                    host_attr,
                    literal_arr(nodes),
                ],
            )
            .to_return(),
        ];

        trace!(
            component = component.name(),
            dependencies = builder.dependencies.len(),
            "compiled view"
        );
        Ok(ViewCompileResult {
            program: Program::new(vec![declare_fn(
                &view_factory_var,
                &[VIEW_MANAGER_VAR, PARENT_INJECTOR_VAR, CONTEXT_EL_VAR],
                body,
            )]),
            dependencies: builder.dependencies,
            view_factory_var,
        })
    }
}

impl<'a> ViewBuilder<'a> {
    fn nodes(&mut self, nodes: &[TemplateAst]) -> Result<Vec<Expr>> {
        nodes.iter().map(|n| self.node(n)).collect()
    }

    fn node(&mut self, node: &TemplateAst) -> Result<Expr> {
        let vm = variable(VIEW_MANAGER_VAR);
        match node {
            TemplateAst::Text(text) => Ok(vm.call_method("createText", vec![literal_str(text)])),
            TemplateAst::BoundText(interpolation) => {
                let value = self.interpolation(interpolation)?;
                Ok(vm.call_method("createText", vec![value]))
            }
            TemplateAst::Element(element) => self.element(element),
            TemplateAst::EmbeddedTemplate {
                condition,
                children,
            } => {
                let condition = self.binding(condition);
                let children = self.nodes(children)?;
                Ok(conditional(condition, literal_arr(children), literal_arr(vec![])))
            }
        }
    }

    fn element(&mut self, element: &ElementAst) -> Result<Expr> {
        let vm = variable(VIEW_MANAGER_VAR);
        let mut attrs: Vec<(String, Expr)> = element
            .attrs
            .iter()
            .map(|a| (a.name.clone(), literal_str(&a.value)))
            .collect();
        if let Some(content_attr) = &self.content_attr {
            attrs.push((content_attr.clone(), literal_str("")));
        }
        for prop in &element.properties {
            attrs.push((prop.name.clone(), self.bound_value(&prop.value)?));
        }

        match &element.component {
            Some(child) => {
                let inputs = self.inputs(child, &element.inputs)?;
                let placeholder = ExternalRef::placeholder(&view_factory_name(child.name()));
                self.dependencies.push(ViewFactoryDependency {
                    comp: child.clone(),
                    factory_placeholder: placeholder.clone(),
                });
                let host_element = variable(VIEW_MANAGER_VAR).call_method(
                    "createHostElement",
                    vec![literal_str(&element.name), literal_map(attrs), literal_map(inputs)],
                );
                let child_view = external(&placeholder).call_fn(vec![
                    variable(VIEW_MANAGER_VAR),
                    variable(PARENT_INJECTOR_VAR),
                    host_element,
                ]);
                Ok(vm.call_method("attachView", vec![child_view]))
            }
            None => {
                let children = self.nodes(&element.children)?;
                Ok(vm.call_method(
                    "createElement",
                    vec![
                        literal_str(&element.name),
                        literal_map(attrs),
                        literal_arr(children),
                    ],
                ))
            }
        }
    }

    /// Input bindings keyed by the input's declared spelling.
    fn inputs(
        &mut self,
        child: &CompileDirectiveMetadata,
        bindings: &[BoundPropertyAst],
    ) -> Result<Vec<(String, Expr)>> {
        bindings
            .iter()
            .map(|b| {
                let name = child
                    .inputs
                    .iter()
                    .find(|i| i.eq_ignore_ascii_case(&b.name))
                    .cloned()
                    .unwrap_or_else(|| b.name.clone());
                Ok((name, self.bound_value(&b.value)?))
            })
            .collect()
    }

    fn bound_value(&mut self, value: &BoundValue) -> Result<Expr> {
        match value {
            BoundValue::Expression(expr) => Ok(self.binding(expr)),
            BoundValue::Interpolation(interpolation) => self.interpolation(interpolation),
        }
    }

    fn interpolation(&mut self, interpolation: &Interpolation) -> Result<Expr> {
        let count = interpolation.expressions.len();
        if count > MAX_INTERPOLATION_VALUES {
            error!(component = self.component.name(), count, "too many interpolations");
            return Err(CompileError::TooManyInterpolations { count });
        }
        let mut args = vec![literal_num(count as f64)];
        for (i, s) in interpolation.strings.iter().enumerate() {
            args.push(literal_str(s));
            if let Some(expr) = interpolation.expressions.get(i) {
                args.push(self.binding(expr));
            }
        }
        Ok(variable(VIEW_MANAGER_VAR).call_method("interpolate", args))
    }

    fn pipe_ref(&mut self, name: &str) -> ExternalRef {
        if let Some((_, ext)) = self.pipe_refs.iter().find(|(n, _)| n == name) {
            return ext.clone();
        }
        // Checked by the template parser; an unknown name only arrives here
        // from hand-built ASTs and fails when the program is materialized.
        let ext = match self.pipes.iter().rev().find(|p| p.name == name) {
            Some(pipe) => ExternalRef::bound(name, Value::Function(pipe.transform.clone())),
            None => ExternalRef::placeholder(name),
        };
        self.pipe_refs.push((name.to_string(), ext.clone()));
        ext
    }

    fn binding(&mut self, expr: &BindingExpr) -> Expr {
        match expr {
            BindingExpr::Literal(lit) => Expr::Literal(lit.clone()),
            BindingExpr::PropertyRead { receiver, name } => {
                self.receiver(receiver.as_deref()).prop(name)
            }
            BindingExpr::MethodCall {
                receiver,
                name,
                args,
            } => {
                let args = args.iter().map(|a| self.binding(a)).collect();
                self.receiver(receiver.as_deref()).call_method(name, args)
            }
            BindingExpr::Binary { op, lhs, rhs } => {
                let lhs = self.binding(lhs);
                lhs.binary(*op, self.binding(rhs))
            }
            BindingExpr::Not(inner) => not(self.binding(inner)),
            BindingExpr::Conditional {
                condition,
                true_exp,
                false_exp,
            } => conditional(
                self.binding(condition),
                self.binding(true_exp),
                self.binding(false_exp),
            ),
            BindingExpr::Pipe { exp, name, args } => {
                let pipe = self.pipe_ref(name);
                let mut call_args = vec![self.binding(exp)];
                call_args.extend(args.iter().map(|a| self.binding(a)));
                external(&pipe).call_fn(call_args)
            }
            BindingExpr::LiteralArray(items) => {
                literal_arr(items.iter().map(|i| self.binding(i)).collect())
            }
            BindingExpr::LiteralMap(entries) => literal_map(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), self.binding(v)))
                    .collect(),
            ),
        }
    }

    fn receiver(&mut self, receiver: Option<&BindingExpr>) -> Expr {
        match receiver {
            Some(r) => self.binding(r),
            None => variable(COMPONENT_VAR),
        }
    }
}
