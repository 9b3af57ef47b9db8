//! Template Parser Module
//!
//! Parses normalized template text with html5ever and produces a
//! [`TemplateAst`] tree with bindings parsed, directives matched and pipes
//! checked against the component's view.
//!
//! Supported syntax:
//! - static attributes, text and `{{ }}` interpolation (in text and attribute values)
//! - property bindings `[name]="expr"`; names matching a component input are
//!   routed to the component, everything else is bound on the element
//! - `*if="expr"` wrapping an element in an embedded template
//!
//! Children of component elements are not projected and are dropped.

use std::rc::Rc;

use html5ever::parse_document;
use html5ever::tendril::TendrilSink;
use markup5ever_rcdom::{Handle, NodeData, RcDom};
use tracing::{error, trace};

use crate::error::{CompileError, Result};
use crate::expression::{parse_binding, split_interpolation, BindingExpr, ExpressionError};
use crate::metadata::{CompileDirectiveMetadata, CompilePipeMetadata};
use crate::selector::matches_any;

// ═══════════════════════════════════════════════════════════════════════════════
// AST
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq)]
pub struct Interpolation {
    pub strings: Vec<String>,
    pub expressions: Vec<BindingExpr>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BoundValue {
    Expression(BindingExpr),
    Interpolation(Interpolation),
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttrAst {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BoundPropertyAst {
    pub name: String,
    pub value: BoundValue,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ElementAst {
    pub name: String,
    pub attrs: Vec<AttrAst>,
    /// Bindings set on the element itself.
    pub properties: Vec<BoundPropertyAst>,
    /// Bindings routed to the component's inputs.
    pub inputs: Vec<BoundPropertyAst>,
    pub component: Option<Rc<CompileDirectiveMetadata>>,
    /// Matched non-component directives.
    pub directives: Vec<Rc<CompileDirectiveMetadata>>,
    pub children: Vec<TemplateAst>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TemplateAst {
    Text(String),
    BoundText(Interpolation),
    Element(ElementAst),
    EmbeddedTemplate {
        condition: BindingExpr,
        children: Vec<TemplateAst>,
    },
}

impl TemplateAst {
    /// Component elements in document order.
    pub fn component_elements(nodes: &[TemplateAst]) -> Vec<&ElementAst> {
        let mut found = Vec::new();
        collect_components(nodes, &mut found);
        found
    }
}

fn collect_components<'a>(nodes: &'a [TemplateAst], found: &mut Vec<&'a ElementAst>) {
    for node in nodes {
        match node {
            TemplateAst::Element(el) => {
                if el.component.is_some() {
                    found.push(el);
                }
                collect_components(&el.children, found);
            }
            TemplateAst::EmbeddedTemplate { children, .. } => collect_components(children, found),
            TemplateAst::Text(_) | TemplateAst::BoundText(_) => {}
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PARSER
// ═══════════════════════════════════════════════════════════════════════════════

const IGNORED_ELEMENTS: &[&str] = &["script", "style", "link", "meta"];
const IF_ATTR: &str = "*if";

#[derive(Debug, Default, Clone, Copy)]
pub struct TemplateParser;

struct ParseContext<'a> {
    component: &'a CompileDirectiveMetadata,
    directives: &'a [Rc<CompileDirectiveMetadata>],
    pipes: &'a [Rc<CompilePipeMetadata>],
    debug_name: &'a str,
}

impl TemplateParser {
    pub fn new() -> Self {
        TemplateParser
    }

    pub fn parse(
        &self,
        component: &CompileDirectiveMetadata,
        template: &str,
        directives: &[Rc<CompileDirectiveMetadata>],
        pipes: &[Rc<CompilePipeMetadata>],
        debug_name: &str,
    ) -> Result<Vec<TemplateAst>> {
        let ctx = ParseContext {
            component,
            directives,
            pipes,
            debug_name,
        };
        let dom = parse_document(RcDom::default(), Default::default())
            .from_utf8()
            .read_from(&mut template.as_bytes())
            .map_err(|e| ctx.parse_error(format!("Failed to parse HTML: {}", e)))?;

        let mut nodes = Vec::new();
        collect_template_content(&dom.document, &ctx, &mut nodes)?;
        trace!(template = debug_name, nodes = nodes.len(), "parsed template");
        Ok(nodes)
    }
}

impl<'a> ParseContext<'a> {
    fn parse_error(&self, message: String) -> CompileError {
        error!(template = self.debug_name, %message, "template parse error");
        CompileError::TemplateParse {
            component: self.component.name().to_string(),
            message,
        }
    }

    fn expression_error(&self, err: ExpressionError) -> CompileError {
        self.parse_error(err.to_string())
    }

    fn check_pipes(&self, expr: &BindingExpr) -> Result<()> {
        for name in expr.pipe_names() {
            if !self.pipes.iter().any(|p| p.name == name) {
                error!(pipe = %name, component = self.component.name(), "unknown pipe");
                return Err(CompileError::PipeNotFound {
                    name,
                    component: self.component.name().to_string(),
                });
            }
        }
        Ok(())
    }

    fn binding(&self, source: &str) -> Result<BindingExpr> {
        let expr = parse_binding(source).map_err(|e| self.expression_error(e))?;
        self.check_pipes(&expr)?;
        Ok(expr)
    }

    fn interpolation(&self, text: &str) -> Result<Option<Interpolation>> {
        let Some(split) = split_interpolation(text).map_err(|e| self.expression_error(e))? else {
            return Ok(None);
        };
        let expressions = split
            .expressions
            .iter()
            .map(|e| self.binding(e))
            .collect::<Result<Vec<_>>>()?;
        Ok(Some(Interpolation {
            strings: split.strings,
            expressions,
        }))
    }
}

/// html5ever wraps fragments in html/head/body; flatten those wrappers.
fn collect_template_content(
    handle: &Handle,
    ctx: &ParseContext<'_>,
    nodes: &mut Vec<TemplateAst>,
) -> Result<()> {
    match &handle.data {
        NodeData::Document => {
            for child in handle.children.borrow().iter() {
                collect_template_content(child, ctx, nodes)?;
            }
        }
        NodeData::Element { name, .. } => {
            let tag = name.local.to_string();
            if tag == "html" || tag == "head" || tag == "body" {
                for child in handle.children.borrow().iter() {
                    collect_template_content(child, ctx, nodes)?;
                }
            } else {
                nodes.extend(parse_dom_node(handle, ctx)?);
            }
        }
        NodeData::Text { .. } => nodes.extend(parse_dom_node(handle, ctx)?),
        _ => {}
    }
    Ok(())
}

fn parse_dom_node(handle: &Handle, ctx: &ParseContext<'_>) -> Result<Option<TemplateAst>> {
    match &handle.data {
        NodeData::Text { contents } => {
            let text = contents.borrow().to_string();
            if text.trim().is_empty() {
                return Ok(None);
            }
            match ctx.interpolation(&text)? {
                Some(interpolation) => Ok(Some(TemplateAst::BoundText(interpolation))),
                None => Ok(Some(TemplateAst::Text(text))),
            }
        }
        NodeData::Element { name, attrs, .. } => {
            let tag = name.local.to_string();
            if IGNORED_ELEMENTS.contains(&tag.as_str()) {
                return Ok(None);
            }

            let mut static_attrs = Vec::new();
            let mut bound = Vec::new();
            let mut condition = None;
            for attr in attrs.borrow().iter() {
                let attr_name = attr.name.local.to_string();
                let attr_value = attr.value.to_string();
                if attr_name == IF_ATTR {
                    condition = Some(ctx.binding(&attr_value)?);
                } else if let Some(prop) = attr_name
                    .strip_prefix('[')
                    .and_then(|n| n.strip_suffix(']'))
                {
                    bound.push(BoundPropertyAst {
                        name: prop.to_string(),
                        value: BoundValue::Expression(ctx.binding(&attr_value)?),
                    });
                } else if let Some(interpolation) = ctx.interpolation(&attr_value)? {
                    bound.push(BoundPropertyAst {
                        name: attr_name,
                        value: BoundValue::Interpolation(interpolation),
                    });
                } else {
                    static_attrs.push(AttrAst {
                        name: attr_name,
                        value: attr_value,
                    });
                }
            }

            // Bound property names take part in selector matching too.
            let match_attrs: Vec<(String, String)> = static_attrs
                .iter()
                .map(|a| (a.name.clone(), a.value.clone()))
                .chain(bound.iter().map(|b| (b.name.clone(), String::new())))
                .collect();
            let matched: Vec<Rc<CompileDirectiveMetadata>> = ctx
                .directives
                .iter()
                .filter(|d| matches_any(&d.selectors(), &tag, &match_attrs))
                .cloned()
                .collect();
            let (components, directives): (Vec<_>, Vec<_>) =
                matched.into_iter().partition(|d| d.is_component);
            if components.len() > 1 {
                let names: Vec<String> = components.iter().map(|c| c.name().to_string()).collect();
                error!(element = %tag, components = ?names, "multiple components matched");
                return Err(CompileError::MultipleComponents {
                    element: tag,
                    components: names,
                });
            }
            let component = components.into_iter().next();

            let (inputs, properties): (Vec<_>, Vec<_>) = bound
                .into_iter()
                .partition(|b| component.as_ref().map_or(false, |c| c.has_input(&b.name)));

            let mut children = Vec::new();
            if component.is_none() {
                for child in handle.children.borrow().iter() {
                    children.extend(parse_dom_node(child, ctx)?);
                }
            }

            let element = TemplateAst::Element(ElementAst {
                name: tag,
                attrs: static_attrs,
                properties,
                inputs,
                component,
                directives,
                children,
            });
            Ok(Some(match condition {
                Some(condition) => TemplateAst::EmbeddedTemplate {
                    condition,
                    children: vec![element],
                },
                None => element,
            }))
        }
        _ => Ok(None),
    }
}
