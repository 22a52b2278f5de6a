//! Manifest rewriter: keeps the package and NCX documents consistent with
//! the entries the archive transformer retains.
//!
//! Manifest items are filtered by the same suffix allow-list that selects
//! archive entries, never by the files actually present, so both passes of
//! the transform agree by construction.

use std::collections::HashSet;

use crate::config::CrushConfig;
use crate::entry::RetainedSuffixes;
use crate::error::Result;
use crate::markup::{Document, Element, Node, compact_whitespace};

/// Prefix of reading-system bookkeeping metadata (`calibre:timestamp`, ...).
const VENDOR_META_PREFIX: &str = "calibre:";

/// Manifest item attributes that refer to other items by id.
const ITEM_ID_REFS: &[&str] = &["fallback", "media-overlay"];

/// Rewrite an OPF package document.
pub fn rewrite_manifest(
    bytes: &[u8],
    retained: &RetainedSuffixes,
    config: &CrushConfig,
) -> Result<Vec<u8>> {
    let mut doc = Document::parse(bytes)?;
    rewrite_package(&mut doc, retained, config);
    Ok(doc.to_bytes())
}

/// Rewrite a parsed package document in place.
pub fn rewrite_package(doc: &mut Document, retained: &RetainedSuffixes, config: &CrushConfig) {
    let removed: HashSet<String> = doc
        .root
        .descendants()
        .filter(|e| e.local_name() == "item")
        .filter(|e| e.attr_local("href").is_some_and(|href| !retained.matches(href)))
        .filter_map(|e| e.attr_local("id").map(str::to_string))
        .collect();

    retain_elements(&mut doc.root, &mut |e: &Element| {
        keep_package_element(e, retained, &removed)
    });

    if !config.images || !removed.is_empty() {
        fix_items(&mut doc.root, config, &removed);
    }
    compact_whitespace(&mut doc.root);
}

fn keep_package_element(e: &Element, retained: &RetainedSuffixes, removed: &HashSet<String>) -> bool {
    let refers_to_removed = |name: &str| e.attr_local(name).is_some_and(|id| removed.contains(id));

    match e.local_name() {
        "item" => e.attr_local("href").is_none_or(|href| retained.matches(href)),
        "itemref" => !refers_to_removed("idref"),
        "reference" => e.attr_local("href").is_none_or(|href| retained.matches(href)),
        "meta" => {
            let name = e.attr_local("name");
            if name.is_some_and(|n| n.starts_with(VENDOR_META_PREFIX)) {
                return false;
            }
            if name == Some("cover") && refers_to_removed("content") {
                return false;
            }
            !e.attr_local("refines")
                .and_then(|r| r.strip_prefix('#'))
                .is_some_and(|id| removed.contains(id))
        }
        _ => true,
    }
}

/// Drop `svg` from item properties when images are gone, and id references
/// to removed items.
fn fix_items(element: &mut Element, config: &CrushConfig, removed: &HashSet<String>) {
    if element.local_name() == "item" {
        if !config.images {
            drop_svg_property(element);
        }
        for attr in ITEM_ID_REFS {
            if element.attr(attr).is_some_and(|id| removed.contains(id)) {
                element.remove_attr(attr);
            }
        }
    }

    for child in &mut element.children {
        if let Node::Element(e) = child {
            fix_items(e, config, removed);
        }
    }
}

fn drop_svg_property(item: &mut Element) {
    let Some(properties) = item.attr("properties") else {
        return;
    };
    if !properties.split_ascii_whitespace().any(|p| p == "svg") {
        return;
    }

    let kept: Vec<&str> = properties
        .split_ascii_whitespace()
        .filter(|&p| p != "svg")
        .collect();
    if kept.is_empty() {
        item.remove_attr("properties");
    } else {
        let kept = kept.join(" ");
        item.set_attr("properties", kept);
    }
}

/// Rewrite a legacy NCX navigation-control document.
pub fn rewrite_navigation(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut doc = Document::parse(bytes)?;
    retain_elements(&mut doc.root, &mut |e: &Element| e.local_name() != "pageList");
    compact_whitespace(&mut doc.root);
    Ok(doc.to_bytes())
}

/// Recursively drop every element for which `keep` returns false.
fn retain_elements(element: &mut Element, keep: &mut impl FnMut(&Element) -> bool) {
    element.children.retain(|child| match child {
        Node::Element(e) => keep(e),
        Node::Text(_) => true,
    });
    for child in &mut element.children {
        if let Node::Element(e) = child {
            retain_elements(e, keep);
        }
    }
}
