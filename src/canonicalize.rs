//! Markup canonicalizer for XHTML content documents.
//!
//! A pure tree-to-tree transform:
//!
//! 1. drop the root's default namespace declaration
//! 2. remove excluded elements and print-pagination scaffolding
//!    (`nav` page lists, `span` page breaks); with images disabled, replace
//!    each `img` by a paragraph of its alternate text
//! 3. remove excluded attributes (`nav` keeps its `epub:type`)
//! 4. declare the XHTML namespace on the root, exactly once
//! 5. drop prefixed namespace declarations nothing uses any more
//! 6. compact pretty-printing whitespace
//!
//! Entity normalization happens while parsing; see
//! [`markup::entities`](crate::markup::entities).

use std::collections::HashSet;

use crate::classify::Escalation;
use crate::config::CrushConfig;
use crate::error::Result;
use crate::markup::{Attribute, Document, Element, Node, XHTML_NS, compact_whitespace};

/// Tags removed under every configuration.
const ALWAYS_EXCLUDED_TAGS: &[&str] = &["script", "embed", "object", "meta", "audio", "video"];

/// Tags removed when styles are disabled.
const STYLE_TAGS: &[&str] = &["style", "link"];

/// Tags removed when images are disabled (`img` is replaced, not removed).
const IMAGE_TAGS: &[&str] = &["img", "image", "svg", "picture"];

/// Attributes removed when styles are disabled, besides `epub:type`.
const STYLE_ATTRIBUTES: &[&str] = &["class", "style"];

/// Alternate text that only says "there is an image here".
const PLACEHOLDER_ALT: &str = "Image";

/// Elements and attributes to strip from one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExclusionSet {
    tags: HashSet<&'static str>,
    attributes: HashSet<&'static str>,
    strip_semantic_types: bool,
    replace_images: bool,
}

impl ExclusionSet {
    /// Base exclusions implied by the configuration.
    pub fn for_config(config: &CrushConfig) -> Self {
        let mut tags: HashSet<&'static str> = ALWAYS_EXCLUDED_TAGS.iter().copied().collect();
        let mut attributes = HashSet::new();

        if !config.styles {
            tags.extend(STYLE_TAGS);
            attributes.extend(STYLE_ATTRIBUTES);
        }
        if !config.images {
            tags.extend(IMAGE_TAGS);
        }

        Self {
            tags,
            attributes,
            strip_semantic_types: !config.styles,
            replace_images: !config.images,
        }
    }

    /// Add the tag family a classifier escalation calls for.
    pub fn escalate(&mut self, escalation: &Escalation) {
        self.tags.extend(escalation.extra_tags());
    }

    pub fn excludes_tag(&self, local_name: &str) -> bool {
        self.tags.contains(local_name)
    }

    pub fn excludes_attribute(&self, attr: &Attribute) -> bool {
        if attr.is_namespace_declaration() {
            return false;
        }
        (self.strip_semantic_types && attr.is_semantic_type())
            || (attr.namespace.is_none() && self.attributes.contains(attr.name.as_str()))
    }
}

/// Canonicalize raw content-document bytes under `config`.
///
/// ```
/// use epubcrush::{CrushConfig, canonicalize};
///
/// let config = CrushConfig::default();
/// let out = canonicalize(b"<html><p class=\"a\">test</p></html>", &config)?;
/// assert_eq!(out, br#"<html xmlns="http://www.w3.org/1999/xhtml"><p>test</p></html>"#);
/// # Ok::<(), epubcrush::Error>(())
/// ```
pub fn canonicalize(bytes: &[u8], config: &CrushConfig) -> Result<Vec<u8>> {
    let mut doc = Document::parse(bytes)?;
    canonicalize_document(&mut doc, &ExclusionSet::for_config(config));
    Ok(doc.to_bytes())
}

/// Canonicalize a parsed content document in place.
pub fn canonicalize_document(doc: &mut Document, exclusions: &ExclusionSet) {
    let root = &mut doc.root;

    root.remove_attr("xmlns");
    prune(root, exclusions);
    strip_attributes(root, exclusions);
    root.attributes.insert(0, Attribute::new("xmlns", XHTML_NS));
    drop_unused_namespaces(root);
    compact_whitespace(root);
}

fn prune(element: &mut Element, exclusions: &ExclusionSet) {
    let children = std::mem::take(&mut element.children);
    element.children.reserve(children.len());

    for child in children {
        let mut child = match child {
            Node::Element(e) => e,
            text => {
                element.children.push(text);
                continue;
            }
        };

        let local = child.local_name();
        if exclusions.replace_images && local == "img" {
            if let Some(paragraph) = alt_paragraph(&child, exclusions) {
                element.children.push(Node::Element(paragraph));
            }
            continue;
        }
        if exclusions.excludes_tag(local) || is_print_scaffolding(&child) {
            continue;
        }

        prune(&mut child, exclusions);
        strip_attributes(&mut child, exclusions);
        element.children.push(Node::Element(child));
    }
}

/// `<p>alt</p>` for an image with meaningful alternate text.
fn alt_paragraph(img: &Element, exclusions: &ExclusionSet) -> Option<Element> {
    let alt = img.attr("alt")?;
    let trimmed = alt.trim();
    if trimmed.is_empty() || trimmed == PLACEHOLDER_ALT || exclusions.excludes_tag("p") {
        return None;
    }
    Some(Element::with_text("p", alt))
}

/// Page lists and page-break markers only matter for print pagination.
fn is_print_scaffolding(element: &Element) -> bool {
    let role = element.attr("role");
    match element.local_name() {
        "nav" => element.has_semantic_type("page-list") || role == Some("doc-pagelist"),
        "span" => element.has_semantic_type("pagebreak") || role == Some("doc-pagebreak"),
        _ => false,
    }
}

fn strip_attributes(element: &mut Element, exclusions: &ExclusionSet) {
    // EPUB 3 reading systems find the table of contents by `nav epub:type`
    let keep_semantic_types = element.local_name() == "nav";
    element.attributes.retain(|attr| {
        (keep_semantic_types && attr.is_semantic_type()) || !exclusions.excludes_attribute(attr)
    });
}

/// Remove `xmlns:prefix` declarations whose prefix no longer appears in
/// their subtree.
fn drop_unused_namespaces(element: &mut Element) {
    let unused: Vec<String> = element
        .attributes
        .iter()
        .filter_map(|a| a.name.strip_prefix("xmlns:"))
        .filter(|prefix| !uses_prefix(element, prefix))
        .map(|prefix| format!("xmlns:{prefix}"))
        .collect();
    element.attributes.retain(|a| !unused.contains(&a.name));

    for child in &mut element.children {
        if let Node::Element(e) = child {
            drop_unused_namespaces(e);
        }
    }
}

fn uses_prefix(element: &Element, prefix: &str) -> bool {
    let has_prefix = |name: &str| {
        name.strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with(':'))
    };

    has_prefix(&element.name)
        || element
            .attributes
            .iter()
            .any(|a| !a.is_namespace_declaration() && has_prefix(&a.name))
        || element.child_elements().any(|e| uses_prefix(e, prefix))
}
