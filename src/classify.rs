//! Content classifier: finds pages whose text is not worth keeping.
//!
//! Two independent heuristics look at a parsed content document:
//!
//! - **link density**: a page that is mostly anchors (an index, an in-book
//!   contents page, a list of footnote backlinks) is a link page;
//! - **semantic role**: a `nav`, `body`, `section` or `div` typed as one of
//!   the policy's low-value roles (cover, title page, copyright page,
//!   dedication, index, imprint).
//!
//! A positive result does not delete the file. It escalates the exclusion
//! set for that one document with the text-bearing tag family, leaving a
//! well-formed shell that keeps manifest, spine and navigation references
//! valid.

use crate::config::ClassifierPolicy;
use crate::error::Result;
use crate::markup::{Document, Element, Node};

/// Tag family removed from an escalated document.
pub const TEXT_TAGS: &[&str] = &[
    "p", "span", "a", "ul", "ol", "li", "dl", "dt", "dd", "table", "thead", "tbody", "tfoot",
    "tr", "th", "td", "caption", "h1", "h2", "h3", "h4", "h5", "h6",
];

/// Elements whose semantic type can mark a whole page.
const PAGE_ELEMENTS: &[&str] = &["nav", "body", "section", "div"];

/// Elements whose text is never rendered as page content.
const UNRENDERED: &[&str] = &["head", "script", "style", "noscript", "template"];

/// Outcome of classifying one content document.
#[derive(Debug, Clone, PartialEq)]
pub enum Escalation {
    /// Ordinary content; the base exclusion set applies.
    Keep,
    /// Mostly links.
    LinkPage(LinkDensity),
    /// Typed as a low-value page role.
    LowValueRole(String),
}

impl Escalation {
    pub fn is_escalated(&self) -> bool {
        !matches!(self, Escalation::Keep)
    }

    /// Tags this escalation adds to the exclusion set.
    pub fn extra_tags(&self) -> &'static [&'static str] {
        if self.is_escalated() { TEXT_TAGS } else { &[] }
    }
}

/// Anchor count against non-anchor text length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkDensity {
    pub anchors: usize,
    /// Characters of whitespace-collapsed text outside anchors.
    pub text_chars: usize,
}

impl LinkDensity {
    /// Anchors per character of non-anchor text.
    pub fn ratio(self) -> f64 {
        match (self.anchors, self.text_chars) {
            (0, _) => 0.0,
            (_, 0) => f64::INFINITY,
            (a, t) => a as f64 / t as f64,
        }
    }
}

/// Classify raw content-document bytes.
pub fn classify(bytes: &[u8], policy: &ClassifierPolicy) -> Result<Escalation> {
    let doc = Document::parse(bytes)?;
    Ok(classify_document(&doc, policy))
}

/// Classify a parsed content document with both heuristics.
pub fn classify_document(doc: &Document, policy: &ClassifierPolicy) -> Escalation {
    classify_role(doc, policy).unwrap_or_else(|| classify_links(doc, policy))
}

/// Semantic-role heuristic.
///
/// Must see the document before canonicalization, which may strip the
/// `epub:type` attributes it reads.
pub fn classify_role(doc: &Document, policy: &ClassifierPolicy) -> Option<Escalation> {
    low_value_role(&doc.root, policy).map(|role| Escalation::LowValueRole(role.to_string()))
}

/// Link-density heuristic. The EPUB 3 table of contents is never a link
/// page.
pub fn classify_links(doc: &Document, policy: &ClassifierPolicy) -> Escalation {
    if is_toc_navigation(&doc.root) {
        return Escalation::Keep;
    }

    let density = link_density(&doc.root);
    if density.ratio() > policy.link_density_threshold {
        Escalation::LinkPage(density)
    } else {
        Escalation::Keep
    }
}

fn low_value_role<'a>(root: &'a Element, policy: &ClassifierPolicy) -> Option<&'a str> {
    root.descendants()
        .filter(|e| PAGE_ELEMENTS.contains(&e.local_name()))
        .flat_map(|e| e.semantic_types())
        .find(|token| policy.is_excluded_role(token))
}

/// The EPUB 3 navigation document carries `<nav epub:type="toc">`.
fn is_toc_navigation(root: &Element) -> bool {
    root.descendants()
        .any(|e| e.local_name() == "nav" && e.has_semantic_type("toc"))
}

/// Count anchors and the length of the rendered text outside them.
///
/// Text in `head`, `script` and `style` bodies does not count.
pub fn link_density(root: &Element) -> LinkDensity {
    let mut anchors = 0;
    let mut text = String::new();
    walk_text(root, &mut anchors, &mut text);

    let text_chars = text
        .split_whitespace()
        .map(|word| word.chars().count())
        .sum::<usize>()
        + text.split_whitespace().count().saturating_sub(1);

    LinkDensity {
        anchors,
        text_chars,
    }
}

fn walk_text(element: &Element, anchors: &mut usize, text: &mut String) {
    for child in &element.children {
        match child {
            Node::Element(e) if e.local_name() == "a" => {
                *anchors += 1;
                // Nested anchors are invalid but still counted
                *anchors += e.descendants().skip(1).filter(|d| d.local_name() == "a").count();
                text.push(' ');
            }
            Node::Element(e) if UNRENDERED.contains(&e.local_name()) => {}
            Node::Element(e) => walk_text(e, anchors, text),
            Node::Text(t) => text.push_str(t),
        }
    }
}
