//! View Runtime Module
//!
//! Host objects that generated view factories call into. Views are plain
//! [`Value`] trees so the output of two factories can be compared directly:
//!
//! - element: `{type: "element", name, attrs, children}` (host elements also carry `inputs`, `component`)
//! - text: `{type: "text", value}`
//! - view: `{type: "view", component, context, host, hostAttr, nodes}`

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use tracing::trace;

use crate::error::{CompileError, Result};
use crate::output::value::{Function, HostObject, Value};
use crate::style_compiler::COMPONENT_VARIABLE;
use crate::view_compiler::MAX_INTERPOLATION_VALUES;

fn arg(args: &[Value], index: usize) -> Value {
    args.get(index).cloned().unwrap_or(Value::Null)
}

fn string_arg(args: &[Value], index: usize, method: &str) -> Result<String> {
    match args.get(index) {
        Some(Value::String(s)) => Ok(s.clone()),
        other => Err(CompileError::evaluation(format!(
            "{} expects a string as argument {}, got {:?}",
            method, index, other
        ))),
    }
}

/// Flatten nested lists of nodes (embedded templates yield lists) and drop nulls.
fn flatten_nodes(value: &Value, out: &mut Vec<Value>) {
    match value {
        Value::List(items) => items.iter().for_each(|i| flatten_nodes(i, out)),
        Value::Null => {}
        other => out.push(other.clone()),
    }
}

fn flattened(value: &Value) -> Value {
    let mut out = Vec::new();
    flatten_nodes(value, &mut out);
    Value::from(out)
}

fn map_entries(value: &Value) -> Vec<(String, Value)> {
    match value {
        Value::Map(entries) => entries.as_ref().clone(),
        _ => Vec::new(),
    }
}

fn set_entry(entries: &mut Vec<(String, Value)>, key: &str, value: Value) {
    match entries.iter_mut().find(|(k, _)| k == key) {
        Some(slot) => slot.1 = value,
        None => entries.push((key.to_string(), value)),
    }
}

fn entry(name: &str, value: impl Into<Value>) -> (String, Value) {
    (name.to_string(), value.into())
}

// ═══════════════════════════════════════════════════════════════════════════════
// VIEW MANAGER
// ═══════════════════════════════════════════════════════════════════════════════

/// Builds view trees and collects component styles.
#[derive(Default)]
pub struct ViewManager {
    styles: RefCell<Vec<(String, Vec<String>)>>,
    views_created: Cell<usize>,
}

impl ViewManager {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub fn views_created(&self) -> usize {
        self.views_created.get()
    }

    /// All registered styles in registration order, `%COMP%` substituted.
    pub fn registered_styles(&self) -> Vec<String> {
        self.styles
            .borrow()
            .iter()
            .flat_map(|(_, styles)| styles.iter().cloned())
            .collect()
    }

    pub fn styles_for(&self, content_id: &str) -> Option<Vec<String>> {
        self.styles
            .borrow()
            .iter()
            .find(|(id, _)| id == content_id)
            .map(|(_, styles)| styles.clone())
    }

    fn create_component(&self, args: &[Value]) -> Result<Value> {
        let name = string_arg(args, 0, "createComponent")?;
        let defaults = match arg(args, 1) {
            Value::Object(injector) => injector.invoke_method("get", &[Value::from(name.as_str())])?,
            _ => Value::Null,
        };
        let mut entries = map_entries(&defaults);
        if let Some(inputs) = arg(args, 2).entry("inputs") {
            for (k, v) in map_entries(inputs) {
                set_entry(&mut entries, &k, v);
            }
        }
        Ok(Value::map(entries))
    }

    fn register_styles(&self, args: &[Value]) -> Result<Value> {
        let id = string_arg(args, 0, "registerStyles")?;
        let mut styles = Vec::new();
        flatten_nodes(&arg(args, 1), &mut styles);
        let mut registry = self.styles.borrow_mut();
        if !registry.iter().any(|(existing, _)| existing == &id) {
            let resolved: Vec<String> = styles
                .iter()
                .map(|s| s.to_display_string().replace(COMPONENT_VARIABLE, &id))
                .collect();
            trace!(content_id = %id, count = resolved.len(), "registered styles");
            registry.push((id.clone(), resolved));
        }
        Ok(Value::from(id))
    }

    fn create_element(&self, args: &[Value]) -> Result<Value> {
        Ok(Value::map(vec![
            entry("type", "element"),
            entry("name", string_arg(args, 0, "createElement")?),
            ("attrs".to_string(), arg(args, 1)),
            ("children".to_string(), flattened(&arg(args, 2))),
        ]))
    }

    fn create_host_element(&self, args: &[Value]) -> Result<Value> {
        Ok(Value::map(vec![
            entry("type", "element"),
            entry("name", string_arg(args, 0, "createHostElement")?),
            ("attrs".to_string(), arg(args, 1)),
            ("inputs".to_string(), arg(args, 2)),
            entry("children", Vec::<Value>::new()),
        ]))
    }

    fn create_view(&self, args: &[Value]) -> Result<Value> {
        self.views_created.set(self.views_created.get() + 1);
        Ok(Value::map(vec![
            entry("type", "view"),
            entry("component", string_arg(args, 0, "createView")?),
            ("context".to_string(), arg(args, 1)),
            ("host".to_string(), arg(args, 2)),
            ("hostAttr".to_string(), arg(args, 3)),
            ("nodes".to_string(), flattened(&arg(args, 4))),
        ]))
    }

    /// Merge a component view into the host element it was created for.
    fn attach_view(&self, args: &[Value]) -> Result<Value> {
        let view = arg(args, 0);
        let host = view.entry("host").cloned().unwrap_or(Value::Null);
        if host.is_null() {
            return Err(CompileError::evaluation(
                "attachView called with a view that has no host element",
            ));
        }
        let mut element = map_entries(&host);
        if let Some(Value::String(host_attr)) = view.entry("hostAttr") {
            let mut attrs = map_entries(host.entry("attrs").unwrap_or(&Value::Null));
            set_entry(&mut attrs, host_attr, Value::from(""));
            set_entry(&mut element, "attrs", Value::map(attrs));
        }
        set_entry(
            &mut element,
            "component",
            view.entry("component").cloned().unwrap_or(Value::Null),
        );
        set_entry(
            &mut element,
            "children",
            view.entry("nodes").cloned().unwrap_or_else(|| Value::from(vec![])),
        );
        Ok(Value::map(element))
    }
}

/// Text with `count` interpolated values: `c0 + a1 + c1 + ... + cN`.
/// Null values render as empty text.
pub fn interpolate(args: &[Value]) -> Result<Value> {
    let count = match args.first() {
        Some(Value::Number(n)) if *n >= 0.0 => *n as usize,
        other => {
            return Err(CompileError::evaluation(format!(
                "interpolate expects a value count, got {:?}",
                other
            )))
        }
    };
    if count > MAX_INTERPOLATION_VALUES {
        return Err(CompileError::TooManyInterpolations { count });
    }
    let mut out = String::new();
    for value in args.iter().skip(1).take(count * 2 + 1) {
        out.push_str(&value.to_display_string());
    }
    Ok(Value::from(out))
}

impl HostObject for ViewManager {
    fn type_name(&self) -> &str {
        "ViewManager"
    }

    fn invoke_method(&self, name: &str, args: &[Value]) -> Result<Value> {
        match name {
            "createComponent" => self.create_component(args),
            "registerStyles" => self.register_styles(args),
            "createElement" => self.create_element(args),
            "createHostElement" => self.create_host_element(args),
            "createText" => Ok(Value::map(vec![
                entry("type", "text"),
                entry("value", arg(args, 0).to_display_string()),
            ])),
            "createView" => self.create_view(args),
            "attachView" => self.attach_view(args),
            "interpolate" => interpolate(args),
            other => Err(CompileError::evaluation(format!(
                "ViewManager has no method '{}'",
                other
            ))),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// INJECTOR
// ═══════════════════════════════════════════════════════════════════════════════

/// Supplies the initial component instance for each component name.
#[derive(Default)]
pub struct StaticInjector {
    instances: HashMap<String, Value>,
}

impl StaticInjector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, component: &str, instance: Value) -> Self {
        self.instances.insert(component.to_string(), instance);
        self
    }

    /// `{ "ComponentName": { ...instance fields } }`
    pub fn from_json(json: &serde_json::Value) -> Self {
        let instances = json
            .as_object()
            .map(|obj| {
                obj.iter()
                    .map(|(k, v)| (k.clone(), Value::from_json(v)))
                    .collect()
            })
            .unwrap_or_default();
        Self { instances }
    }
}

impl HostObject for StaticInjector {
    fn type_name(&self) -> &str {
        "StaticInjector"
    }

    fn invoke_method(&self, name: &str, args: &[Value]) -> Result<Value> {
        match name {
            "get" => {
                let key = string_arg(args, 0, "get")?;
                Ok(self.instances.get(&key).cloned().unwrap_or(Value::Null))
            }
            other => Err(CompileError::evaluation(format!(
                "StaticInjector has no method '{}'",
                other
            ))),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// VIEW REFS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq)]
pub struct ViewRef {
    view: Value,
}

impl ViewRef {
    pub fn new(view: Value) -> Self {
        Self { view }
    }

    pub fn value(&self) -> &Value {
        &self.view
    }

    pub fn root_nodes(&self) -> Vec<Value> {
        self.view
            .entry("nodes")
            .and_then(Value::as_list)
            .map(|nodes| nodes.to_vec())
            .unwrap_or_default()
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Array(self.root_nodes().iter().map(node_json).collect())
    }

    pub fn render_html(&self) -> String {
        let mut out = String::new();
        for node in self.root_nodes() {
            render_node(&node, &mut out);
        }
        out
    }
}

/// Node tree without component contexts, for snapshots.
fn node_json(node: &Value) -> serde_json::Value {
    let mut obj = serde_json::Map::new();
    for key in ["type", "name", "value", "component", "attrs", "inputs"] {
        if let Some(v) = node.entry(key) {
            if !v.is_null() {
                obj.insert(key.to_string(), v.to_json());
            }
        }
    }
    if let Some(children) = node.entry("children").and_then(Value::as_list) {
        obj.insert(
            "children".to_string(),
            serde_json::Value::Array(children.iter().map(node_json).collect()),
        );
    }
    serde_json::Value::Object(obj)
}

fn escape_html(text: &str, out: &mut String) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            other => out.push(other),
        }
    }
}

fn render_node(node: &Value, out: &mut String) {
    match node.entry("type").and_then(Value::as_str) {
        Some("text") => {
            let text = node.entry("value").map(Value::to_display_string).unwrap_or_default();
            escape_html(&text, out);
        }
        Some("element") => {
            let name = node.entry("name").and_then(Value::as_str).unwrap_or("div");
            out.push('<');
            out.push_str(name);
            if let Some(Value::Map(attrs)) = node.entry("attrs") {
                for (attr, value) in attrs.iter() {
                    if value.is_null() || matches!(value, Value::Bool(false)) {
                        continue;
                    }
                    out.push(' ');
                    out.push_str(attr);
                    let text = value.to_display_string();
                    if !text.is_empty() && !matches!(value, Value::Bool(true)) {
                        out.push_str("=\"");
                        escape_html(&text, out);
                        out.push('"');
                    }
                }
            }
            out.push('>');
            if let Some(children) = node.entry("children").and_then(Value::as_list) {
                for child in children {
                    render_node(child, out);
                }
            }
            out.push_str("</");
            out.push_str(name);
            out.push('>');
        }
        _ => {}
    }
}

/// Entry point for instantiating a compiled component at the top level.
#[derive(Debug, Clone)]
pub struct HostViewFactory {
    pub selector: String,
    pub view_factory: Function,
}

impl HostViewFactory {
    pub fn create(
        &self,
        view_manager: &Rc<ViewManager>,
        injector: &Rc<StaticInjector>,
    ) -> Result<ViewRef> {
        let view = self.view_factory.call(&[
            Value::Object(view_manager.clone()),
            Value::Object(injector.clone()),
            Value::Null,
        ])?;
        Ok(ViewRef::new(view))
    }
}
