//! Template normalization.
//!
//! Brings a component's template into its final form before parsing: the
//! template text is fetched when declared by URL, inline `<style>` blocks and
//! `<link rel="stylesheet">` references are lifted into the style lists, and
//! style URLs are made absolute.

use std::rc::Rc;

use futures::future::{self, FutureExt, LocalBoxFuture};
use lazy_static::lazy_static;
use regex::Regex;
use tracing::debug;

use crate::error::Result;
use crate::loader::{resolve_url, ResourceLoader};
use crate::metadata::{CompileDirectiveMetadata, CompileTemplateMetadata, ViewEncapsulation};
use crate::style_compiler::extract_style_urls;

lazy_static! {
    static ref STYLE_ELEMENT_RE: Regex = Regex::new(r"(?is)<style\b[^>]*>(.*?)</style\s*>").unwrap();
    static ref LINK_ELEMENT_RE: Regex = Regex::new(r"(?is)<link\b([^>]*)/?>").unwrap();
    static ref ATTR_RE: Regex =
        Regex::new(r#"(?is)([-\w]+)\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s>]+))"#).unwrap();
}

pub struct DirectiveNormalizer {
    loader: Rc<dyn ResourceLoader>,
}

impl DirectiveNormalizer {
    pub fn new(loader: Rc<dyn ResourceLoader>) -> Self {
        Self { loader }
    }

    /// Directives are returned unchanged. Components come back with an
    /// inline template and absolute style URLs.
    pub fn normalize_directive(
        &self,
        directive: Rc<CompileDirectiveMetadata>,
    ) -> LocalBoxFuture<'static, Result<Rc<CompileDirectiveMetadata>>> {
        let template = match (&directive.template, directive.is_component) {
            (Some(template), true) => template.clone(),
            _ => return future::ready(Ok(directive)).boxed_local(),
        };

        if let Some(text) = &template.template {
            let normalized = normalize_loaded_template(&directive, &template, text, None);
            return future::ready(Ok(normalized)).boxed_local();
        }

        let url = template.template_url.clone().unwrap_or_default();
        let absolute = resolve_url(directive.ty.module_url.as_deref(), &url);
        debug!(component = directive.name(), url = %absolute, "fetching template");
        let fetch = self.loader.get(&absolute);
        async move {
            let text = fetch.await?;
            Ok(normalize_loaded_template(
                &directive,
                &template,
                &text,
                Some(absolute),
            ))
        }
        .boxed_local()
    }
}

fn link_stylesheet_href(attrs: &str) -> Option<String> {
    let mut rel = None;
    let mut href = None;
    for caps in ATTR_RE.captures_iter(attrs) {
        let value = caps
            .get(2)
            .or_else(|| caps.get(3))
            .or_else(|| caps.get(4))
            .map(|m| m.as_str().to_string())
            .unwrap_or_default();
        match caps[1].to_ascii_lowercase().as_str() {
            "rel" => rel = Some(value),
            "href" => href = Some(value),
            _ => {}
        }
    }
    match rel {
        Some(rel) if rel.eq_ignore_ascii_case("stylesheet") => href.filter(|h| !h.is_empty()),
        _ => None,
    }
}

fn normalize_loaded_template(
    directive: &CompileDirectiveMetadata,
    template: &CompileTemplateMetadata,
    text: &str,
    template_url: Option<String>,
) -> Rc<CompileDirectiveMetadata> {
    let module_url = directive.ty.module_url.as_deref();
    let base_url = template_url.as_deref().or(module_url);

    let mut inline_styles = Vec::new();
    let without_styles = STYLE_ELEMENT_RE.replace_all(text, |caps: &regex::Captures| {
        inline_styles.push(caps[1].to_string());
        String::new()
    });

    let mut linked = Vec::new();
    let body = LINK_ELEMENT_RE.replace_all(&without_styles, |caps: &regex::Captures| {
        match link_stylesheet_href(&caps[1]) {
            Some(href) if !href.contains("://") => {
                linked.push(resolve_url(base_url, &href));
                String::new()
            }
            _ => caps[0].to_string(),
        }
    });

    let mut styles = Vec::new();
    let mut style_urls = linked;
    style_urls.extend(
        template
            .style_urls
            .iter()
            .map(|url| resolve_url(module_url, url)),
    );
    for style in template.styles.iter().chain(inline_styles.iter()) {
        let extracted = extract_style_urls(module_url, style);
        styles.push(extracted.style);
        style_urls.extend(extracted.style_urls);
    }

    let mut encapsulation = template.encapsulation;
    if encapsulation == ViewEncapsulation::Emulated && styles.is_empty() && style_urls.is_empty() {
        encapsulation = ViewEncapsulation::None;
    }

    let mut normalized = directive.clone();
    normalized.template = Some(CompileTemplateMetadata {
        encapsulation,
        template: Some(body.into_owned()),
        template_url: template_url.or_else(|| template.template_url.clone()),
        styles,
        style_urls,
    });
    Rc::new(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::InMemoryResourceLoader;
    use crate::metadata::CompileTypeMetadata;
    use futures::executor::block_on;

    fn component(template: CompileTemplateMetadata) -> Rc<CompileDirectiveMetadata> {
        Rc::new(CompileDirectiveMetadata {
            ty: CompileTypeMetadata {
                name: "Panel".to_string(),
                module_url: Some("app/panel.js".to_string()),
                id: 0,
                runtime: None,
            },
            is_component: true,
            selector: "x-panel".to_string(),
            inputs: vec![],
            template: Some(template),
        })
    }

    #[test]
    fn test_inline_template_lifts_styles() {
        let loader = Rc::new(InMemoryResourceLoader::new());
        let normalizer = DirectiveNormalizer::new(loader.clone());
        let meta = component(CompileTemplateMetadata {
            template: Some(
                "<style>p { color: red; }</style><link rel=\"stylesheet\" href=\"panel.css\"><p>hi</p>"
                    .to_string(),
            ),
            styles: vec!["@import 'theme.css'; h1 {}".to_string()],
            style_urls: vec!["../shared.css".to_string()],
            ..Default::default()
        });

        let normalized = block_on(normalizer.normalize_directive(meta)).unwrap();
        let template = normalized.template.as_ref().unwrap();
        assert_eq!(template.template.as_deref(), Some("<p>hi</p>"));
        assert_eq!(
            template.style_urls,
            vec!["app/panel.css", "shared.css", "app/theme.css"]
        );
        assert_eq!(template.styles, vec![" h1 {}", "p { color: red; }"]);
        assert_eq!(template.encapsulation, ViewEncapsulation::Emulated);
        assert!(loader.requests().is_empty());
    }

    #[test]
    fn test_template_url_is_fetched_and_resolved() {
        let loader = Rc::new(
            InMemoryResourceLoader::new()
                .with_file("app/panel.html", "<link rel=stylesheet href=\"x.css\"><b>x</b>"),
        );
        let normalizer = DirectiveNormalizer::new(loader.clone());
        let meta = component(CompileTemplateMetadata {
            template_url: Some("panel.html".to_string()),
            ..Default::default()
        });
        let normalized = block_on(normalizer.normalize_directive(meta)).unwrap();
        let template = normalized.template.as_ref().unwrap();
        assert_eq!(template.template.as_deref(), Some("<b>x</b>"));
        assert_eq!(template.template_url.as_deref(), Some("app/panel.html"));
        assert_eq!(template.style_urls, vec!["app/x.css"]);
        assert_eq!(loader.request_count("app/panel.html"), 1);
    }

    #[test]
    fn test_emulated_without_styles_becomes_none() {
        let normalizer = DirectiveNormalizer::new(Rc::new(InMemoryResourceLoader::new()));
        let meta = component(CompileTemplateMetadata {
            template: Some("<p></p>".to_string()),
            ..Default::default()
        });
        let normalized = block_on(normalizer.normalize_directive(meta)).unwrap();
        assert_eq!(
            normalized.template.as_ref().unwrap().encapsulation,
            ViewEncapsulation::None
        );
    }

    #[test]
    fn test_missing_template_url_fails_with_fetch_error() {
        let normalizer = DirectiveNormalizer::new(Rc::new(InMemoryResourceLoader::new()));
        let meta = component(CompileTemplateMetadata {
            template_url: Some("gone.html".to_string()),
            ..Default::default()
        });
        let err = block_on(normalizer.normalize_directive(meta)).unwrap_err();
        assert_eq!(err.code(), crate::error::ERR_FETCH);
    }
}
