//! Directive selectors.
//!
//! Supports element selectors (`my-cmp`), attribute selectors (`[tooltip]`,
//! `[role=button]`), their combination (`button[primary]`) and
//! comma-separated alternatives.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref SELECTOR_PART_RE: Regex = Regex::new(
        r#"^([-\w]+)?((?:\[[-\w]+(?:=(?:"[^"]*"|'[^']*'|[^\]]*))?\])*)$"#
    )
    .unwrap();
    static ref ATTR_PART_RE: Regex =
        Regex::new(r#"\[([-\w]+)(?:=(?:"([^"]*)"|'([^']*)'|([^\]]*)))?\]"#).unwrap();
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CssSelector {
    pub element: Option<String>,
    /// Attribute name and required value (empty means any value).
    pub attrs: Vec<(String, String)>,
}

impl CssSelector {
    /// Parse a selector list; unparseable alternatives are skipped.
    pub fn parse(selector: &str) -> Vec<CssSelector> {
        selector
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .filter_map(Self::parse_one)
            .collect()
    }

    fn parse_one(part: &str) -> Option<CssSelector> {
        let caps = SELECTOR_PART_RE.captures(part)?;
        let element = caps.get(1).map(|m| m.as_str().to_ascii_lowercase());
        let attrs = caps
            .get(2)
            .map(|m| {
                ATTR_PART_RE
                    .captures_iter(m.as_str())
                    .map(|a| {
                        let name = a[1].to_ascii_lowercase();
                        let value = a
                            .get(2)
                            .or_else(|| a.get(3))
                            .or_else(|| a.get(4))
                            .map(|v| v.as_str().to_string())
                            .unwrap_or_default();
                        (name, value)
                    })
                    .collect()
            })
            .unwrap_or_default();
        if element.is_none() && Vec::is_empty(&attrs) {
            return None;
        }
        Some(CssSelector { element, attrs })
    }

    pub fn matches(&self, element: &str, attrs: &[(String, String)]) -> bool {
        if let Some(name) = &self.element {
            if !name.eq_ignore_ascii_case(element) {
                return false;
            }
        }
        self.attrs.iter().all(|(name, value)| {
            attrs.iter().any(|(attr_name, attr_value)| {
                attr_name.eq_ignore_ascii_case(name) && (value.is_empty() || attr_value == value)
            })
        })
    }

    /// Smallest element that this selector matches, e.g. `<div tooltip></div>`.
    pub fn matching_element_template(&self) -> String {
        let tag = self.element.as_deref().unwrap_or("div");
        let mut attrs = String::new();
        for (name, value) in &self.attrs {
            attrs.push(' ');
            attrs.push_str(name);
            if !value.is_empty() {
                attrs.push_str(&format!("=\"{}\"", value));
            }
        }
        format!("<{}{}></{}>", tag, attrs, tag)
    }
}

/// True if any alternative in `selectors` matches.
pub fn matches_any(selectors: &[CssSelector], element: &str, attrs: &[(String, String)]) -> bool {
    selectors.iter().any(|s| s.matches(element, attrs))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_element_and_attribute_selectors() {
        let sels = CssSelector::parse("my-cmp, [tooltip], button[kind=primary]");
        assert_eq!(sels.len(), 3);
        assert!(sels[0].matches("my-cmp", &[]));
        assert!(!sels[0].matches("div", &[]));
        assert!(sels[1].matches("span", &attrs(&[("tooltip", "hi")])));
        assert!(sels[2].matches("button", &attrs(&[("kind", "primary")])));
        assert!(!sels[2].matches("button", &attrs(&[("kind", "ghost")])));
    }

    #[test]
    fn test_matching_element_template() {
        assert_eq!(
            CssSelector::parse("my-cmp")[0].matching_element_template(),
            "<my-cmp></my-cmp>"
        );
        assert_eq!(
            CssSelector::parse("[tooltip]")[0].matching_element_template(),
            "<div tooltip></div>"
        );
    }
}
