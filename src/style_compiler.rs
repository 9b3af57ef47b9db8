//! Style Compiler Module
//!
//! Produces a program declaring a `styles` array for a component or a single
//! stylesheet. Plain styles become string literals (shimmed for emulated
//! encapsulation); every imported or referenced stylesheet becomes an
//! unbound external the runtime compiler fills in once the sheet is loaded.

use lazy_static::lazy_static;
use regex::{Captures, Regex};

use crate::loader::resolve_url;
use crate::metadata::{CompileDirectiveMetadata, ViewEncapsulation};
use crate::output::ast::{declare_var, external, literal_arr, literal_str, ExternalRef, Program};

/// Replaced by the view runtime with the component's content id.
pub const COMPONENT_VARIABLE: &str = "%COMP%";
pub const HOST_ATTR: &str = "_nghost-%COMP%";
pub const CONTENT_ATTR: &str = "_ngcontent-%COMP%";

pub const STYLES_VAR: &str = "styles";

lazy_static! {
    static ref CSS_IMPORT_RE: Regex =
        Regex::new(r#"@import\s+(?:url\()?\s*(?:(?:['"]([^'"]*))|([^;\)\s]*))[^;]*;?"#).unwrap();
    static ref HOST_RE: Regex = Regex::new(r":host(?:\(([^)]*)\))?").unwrap();
}

#[derive(Debug, Clone)]
pub struct StylesheetDependency {
    pub source_url: String,
    pub is_shimmed: bool,
    pub value_placeholder: ExternalRef,
}

#[derive(Debug, Clone)]
pub struct StylesCompileResult {
    pub program: Program,
    pub styles_var: String,
    pub dependencies: Vec<StylesheetDependency>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StyleWithImports {
    pub style: String,
    pub style_urls: Vec<String>,
}

/// Remove resolvable `@import` rules from `css`, returning them as URLs
/// resolved against `base_url`. Imports with a scheme stay in the text.
pub fn extract_style_urls(base_url: Option<&str>, css: &str) -> StyleWithImports {
    let mut style_urls = Vec::new();
    let style = CSS_IMPORT_RE
        .replace_all(css, |caps: &Captures| {
            let url = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map(|m| m.as_str())
                .unwrap_or("");
            if url.is_empty() || url.contains("://") {
                return caps[0].to_string();
            }
            style_urls.push(resolve_url(base_url, url));
            String::new()
        })
        .into_owned();
    StyleWithImports { style, style_urls }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct StyleCompiler;

impl StyleCompiler {
    pub fn new() -> Self {
        StyleCompiler
    }

    pub fn compile_component(&self, comp: &CompileDirectiveMetadata) -> StylesCompileResult {
        let (styles, style_urls, shim) = match &comp.template {
            Some(t) => (
                t.styles.clone(),
                t.style_urls.clone(),
                t.encapsulation == ViewEncapsulation::Emulated,
            ),
            None => (Vec::new(), Vec::new(), false),
        };
        self.compile_styles(STYLES_VAR, &styles, &style_urls, shim)
    }

    pub fn compile_stylesheet(
        &self,
        stylesheet_url: &str,
        css_text: &str,
        is_shimmed: bool,
    ) -> StylesCompileResult {
        let with_imports = extract_style_urls(Some(stylesheet_url), css_text);
        self.compile_styles(
            STYLES_VAR,
            &[with_imports.style],
            &with_imports.style_urls,
            is_shimmed,
        )
    }

    fn compile_styles(
        &self,
        styles_var: &str,
        plain_styles: &[String],
        absolute_urls: &[String],
        shim: bool,
    ) -> StylesCompileResult {
        let mut expressions: Vec<_> = plain_styles
            .iter()
            .map(|style| {
                if shim {
                    literal_str(&shim_css(style))
                } else {
                    literal_str(style)
                }
            })
            .collect();

        let mut dependencies = Vec::with_capacity(absolute_urls.len());
        for url in absolute_urls {
            let placeholder = ExternalRef::placeholder(STYLES_VAR);
            expressions.push(external(&placeholder));
            dependencies.push(StylesheetDependency {
                source_url: url.clone(),
                is_shimmed: shim,
                value_placeholder: placeholder,
            });
        }

        StylesCompileResult {
            program: Program::new(vec![declare_var(styles_var, literal_arr(expressions))]),
            styles_var: styles_var.to_string(),
            dependencies,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SHIMMING
// ═══════════════════════════════════════════════════════════════════════════════

/// Scope every rule of `css` to elements carrying the content attribute.
pub fn shim_css(css: &str) -> String {
    let mut out = String::with_capacity(css.len() + 32);
    let mut rest = css;
    while let Some(open) = rest.find('{') {
        let Some(close) = matching_brace(rest, open) else {
            break;
        };
        let mut head = &rest[..open];
        if let Some(semi) = head.rfind(';') {
            out.push_str(&head[..=semi]);
            head = &head[semi + 1..];
        }
        let body = &rest[open + 1..close];
        let selector = head.trim();
        let leading = &head[..head.len() - head.trim_start().len()];
        out.push_str(leading);

        if selector.starts_with("@media") || selector.starts_with("@supports") {
            out.push_str(selector);
            out.push_str(" {");
            out.push_str(&shim_css(body));
            out.push('}');
        } else if selector.starts_with('@') {
            out.push_str(selector);
            out.push(' ');
            out.push_str(&rest[open..=close]);
        } else {
            out.push_str(&shim_selector_list(selector));
            out.push_str(" {");
            out.push_str(body);
            out.push('}');
        }
        rest = &rest[close + 1..];
    }
    out.push_str(rest);
    out
}

fn matching_brace(text: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (i, c) in text[open..].char_indices() {
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(open + i);
                }
            }
            _ => {}
        }
    }
    None
}

fn shim_selector_list(selectors: &str) -> String {
    selectors
        .split(',')
        .map(|s| shim_complex_selector(s.trim()))
        .collect::<Vec<_>>()
        .join(", ")
}

fn shim_complex_selector(selector: &str) -> String {
    selector
        .split_whitespace()
        .map(|part| match part {
            ">" | "+" | "~" => part.to_string(),
            compound => shim_compound_selector(compound),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn shim_compound_selector(compound: &str) -> String {
    let host_attr = format!("[{}]", HOST_ATTR);
    if compound.starts_with(":host") {
        return HOST_RE
            .replace(compound, |caps: &Captures| match caps.get(1) {
                Some(inner) => format!("{}{}", inner.as_str(), host_attr),
                None => host_attr.clone(),
            })
            .into_owned();
    }
    let content_attr = format!("[{}]", CONTENT_ATTR);
    // Insert before the first pseudo class/element outside brackets.
    let mut in_brackets = false;
    for (i, c) in compound.char_indices() {
        match c {
            '[' => in_brackets = true,
            ']' => in_brackets = false,
            ':' if !in_brackets => {
                return format!("{}{}{}", &compound[..i], content_attr, &compound[i..]);
            }
            _ => {}
        }
    }
    format!("{}{}", compound, content_attr)
}
