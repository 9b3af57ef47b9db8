//! Native bridge.
//!
//! Accepts a JSON description of a component set (declarations, inline
//! resources or a resource directory, compiler options and component
//! instances), compiles the root component in a host view and renders it.

use std::collections::HashMap;
use std::rc::Rc;

use futures::executor::block_on;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[cfg(feature = "napi")]
use napi_derive::napi;

use crate::config::{CompilerConfig, PlatformCapabilities};
use crate::error::{CompileError, Result};
use crate::loader::{DirectoryResourceLoader, InMemoryResourceLoader, ResourceLoader};
use crate::metadata::{ComponentType, DirectiveDecl, PipeType};
use crate::pipes::builtin_pipes;
use crate::resolver::RuntimeMetadataResolver;
use crate::runtime_compiler::RuntimeCompiler;
use crate::view::{StaticInjector, ViewManager};

// ═══════════════════════════════════════════════════════════════════════════════
// REQUEST / RESULT
// ═══════════════════════════════════════════════════════════════════════════════

/// One declaration plus the names of the directives and pipes its view uses.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeclarationEntry {
    #[serde(flatten)]
    pub decl: DirectiveDecl,
    #[serde(default)]
    pub directives: Vec<String>,
    #[serde(default)]
    pub pipes: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderRequest {
    /// Name of the component to bootstrap.
    pub root: String,
    pub declarations: Vec<DeclarationEntry>,
    /// Inline resources keyed by URL. Ignored when `resource_root` is set.
    #[serde(default)]
    pub resources: HashMap<String, String>,
    #[serde(default)]
    pub resource_root: Option<String>,
    #[serde(default)]
    pub config: CompilerConfig,
    #[serde(default)]
    pub platform: PlatformCapabilities,
    /// `{ "ComponentName": { ...instance fields } }`
    #[serde(default)]
    pub instances: serde_json::Value,
}

impl RenderRequest {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| CompileError::InvalidDeclaration {
            message: format!("render request: {}", e),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderResult {
    pub selector: String,
    pub html: String,
    pub tree: serde_json::Value,
    pub styles: Vec<String>,
    pub jit: bool,
}

#[derive(Debug, Serialize)]
struct BridgeError {
    code: &'static str,
    message: String,
    hint: &'static str,
}

impl From<&CompileError> for BridgeError {
    fn from(err: &CompileError) -> Self {
        Self {
            code: err.code(),
            message: err.to_string(),
            hint: err.hint(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ENTRY POINTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Build component identities for every declaration and link their views by name.
pub fn declare_types(entries: &[DeclarationEntry]) -> Result<HashMap<String, ComponentType>> {
    let mut types: HashMap<String, ComponentType> = HashMap::new();
    for entry in entries {
        if types.contains_key(&entry.decl.name) {
            return Err(CompileError::InvalidDeclaration {
                message: format!("'{}' is declared twice", entry.decl.name),
            });
        }
        types.insert(entry.decl.name.clone(), ComponentType::new(entry.decl.clone()));
    }

    let pipes = builtin_pipes();
    for entry in entries {
        let ty = &types[&entry.decl.name];
        let directives = entry
            .directives
            .iter()
            .map(|name| {
                types.get(name).cloned().ok_or_else(|| CompileError::InvalidDeclaration {
                    message: format!("'{}' uses undeclared directive '{}'", entry.decl.name, name),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let view_pipes = entry
            .pipes
            .iter()
            .map(|name| {
                pipes
                    .iter()
                    .find(|p| p.name() == name)
                    .cloned()
                    .ok_or_else(|| CompileError::PipeNotFound {
                        name: name.clone(),
                        component: entry.decl.name.clone(),
                    })
            })
            .collect::<Result<Vec<PipeType>>>()?;
        ty.set_view_directives(directives);
        ty.set_pipes(view_pipes);
    }
    Ok(types)
}

pub fn compile_and_render(request: &RenderRequest) -> Result<RenderResult> {
    let types = declare_types(&request.declarations)?;
    let root = types
        .get(&request.root)
        .cloned()
        .ok_or_else(|| CompileError::InvalidDeclaration {
            message: format!("root '{}' is not declared", request.root),
        })?;

    let loader: Rc<dyn ResourceLoader> = match &request.resource_root {
        Some(dir) => Rc::new(DirectoryResourceLoader::new(dir)?),
        None => {
            let loader = InMemoryResourceLoader::new();
            for (url, text) in &request.resources {
                loader.insert(url, text);
            }
            Rc::new(loader)
        }
    };

    let compiler = RuntimeCompiler::new(
        Rc::new(RuntimeMetadataResolver::new()),
        loader,
        &request.config,
        &request.platform,
    );
    debug!(root = %request.root, strategy = ?compiler.strategy(), "bridge render");
    let factory = block_on(compiler.compile_in_host(&root))?;

    let view_manager = ViewManager::new();
    let injector = Rc::new(StaticInjector::from_json(&request.instances));
    let view = factory.create(&view_manager, &injector)?;

    Ok(RenderResult {
        selector: factory.selector.clone(),
        html: view.render_html(),
        tree: view.to_json(),
        styles: view_manager.registered_styles(),
        jit: compiler.strategy() == crate::output::MaterializeStrategy::CompileAndLoad,
    })
}

/// JSON in, JSON out. Failures are reported as `{ "error": { code, message, hint } }`.
pub fn compile_and_render_json(request_json: &str) -> String {
    let outcome = RenderRequest::from_json(request_json).and_then(|r| compile_and_render(&r));
    let json = match &outcome {
        Ok(result) => serde_json::to_value(result),
        Err(err) => serde_json::to_value(BridgeError::from(err))
            .map(|e| serde_json::json!({ "error": e })),
    };
    json.map(|v| v.to_string())
        .unwrap_or_else(|e| serde_json::json!({ "error": { "message": e.to_string() } }).to_string())
}

// ═══════════════════════════════════════════════════════════════════════════════
// NAPI EXPORTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(feature = "napi")]
#[napi]
pub fn compile_and_render_native(request_json: String) -> napi::Result<serde_json::Value> {
    let request = RenderRequest::from_json(&request_json)
        .map_err(|e| napi::Error::from_reason(e.to_string()))?;
    let result = compile_and_render(&request)
        .map_err(|e| napi::Error::from_reason(format!("[{}] {}", e.code(), e)))?;
    serde_json::to_value(result).map_err(|e| napi::Error::from_reason(e.to_string()))
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    const APP_REQUEST: &str = r#"{
        "root": "App",
        "declarations": [
            {
                "name": "App",
                "selector": "my-app",
                "isComponent": true,
                "template": "<h1>{{title | uppercase}}</h1><child-cmp [name]=\"title\"></child-cmp>",
                "encapsulation": "None",
                "directives": ["Child"],
                "pipes": ["uppercase"]
            },
            {
                "name": "Child",
                "selector": "child-cmp",
                "isComponent": true,
                "templateUrl": "child.html",
                "moduleUrl": "app/child.js",
                "inputs": ["name"],
                "encapsulation": "None"
            }
        ],
        "resources": { "app/child.html": "<span>{{name}}</span>" },
        "config": { "useJit": false },
        "instances": { "App": { "title": "hello" } }
    }"#;

    #[test]
    fn test_render_from_json() {
        let request = RenderRequest::from_json(APP_REQUEST).unwrap();
        let result = compile_and_render(&request).unwrap();
        assert_eq!(result.selector, "my-app");
        assert!(!result.jit);
        assert_eq!(
            result.html,
            "<my-app><h1>HELLO</h1><child-cmp><span>hello</span></child-cmp></my-app>"
        );
    }

    #[test]
    fn test_undeclared_root() {
        let mut request = RenderRequest::from_json(APP_REQUEST).unwrap();
        request.root = "Missing".to_string();
        let err = compile_and_render(&request).unwrap_err();
        assert!(matches!(err, CompileError::InvalidDeclaration { .. }));
    }

    #[test]
    fn test_undeclared_directive() {
        let mut request = RenderRequest::from_json(APP_REQUEST).unwrap();
        request.declarations[0].directives.push("Nope".to_string());
        let err = compile_and_render(&request).unwrap_err();
        assert!(err.to_string().contains("Nope"));
    }

    #[test]
    fn test_json_errors_carry_codes() {
        let out = compile_and_render_json(r#"{ "root": "X", "declarations": [] }"#);
        let parsed: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed["error"]["code"], "RC-ERR-DECLARATION");

        let out = compile_and_render_json("not json");
        let parsed: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed["error"]["code"], "RC-ERR-DECLARATION");
    }

    #[test]
    fn test_resource_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("app")).unwrap();
        std::fs::write(dir.path().join("app/child.html"), "<b>{{name}}</b>").unwrap();

        let mut request = RenderRequest::from_json(APP_REQUEST).unwrap();
        request.resources.clear();
        request.resource_root = Some(dir.path().display().to_string());
        let result = compile_and_render(&request).unwrap();
        assert!(result.html.contains("<child-cmp><b>hello</b></child-cmp>"));
    }
}
