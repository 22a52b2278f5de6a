//! A small owned XML tree for content and package documents.
//!
//! Documents are parsed with `quick-xml` into [`Element`]/[`Node`] values,
//! transformed in place by the rewrite stages, and written back out in a
//! canonical form:
//!
//! - no XML declaration, DOCTYPE, comments or processing instructions
//! - empty elements as start/end pairs (`<p></p>`)
//! - attributes ordered: `xmlns`, `xmlns:*`, unprefixed, prefixed
//! - text escapes `&`, `<`, `>`; attribute values escape `&`, `<`, `"`
//!   and literal tab/newline/carriage return
//!
//! The serializer is deterministic: the same tree always produces the same
//! bytes.

pub mod entities;

use quick_xml::Reader;
use quick_xml::escape::partial_escape;
use quick_xml::events::{BytesStart, Event};

use crate::error::{Error, Result};
use crate::util::{decode_xml, local_name, name_prefix, strip_bom};

pub const XHTML_NS: &str = "http://www.w3.org/1999/xhtml";
pub const OPS_NS: &str = "http://www.idpf.org/2007/ops";
const XML_NS: &str = "http://www.w3.org/XML/1998/namespace";

/// A parsed XML document: exactly one root element.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub root: Element,
}

/// One element: qualified name, ordered unique attributes, ordered children.
#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub name: String,
    pub attributes: Vec<Attribute>,
    pub children: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    /// Qualified name as written (`class`, `epub:type`, `xmlns:epub`).
    pub name: String,
    /// Unescaped value.
    pub value: String,
    /// Namespace URI bound to the attribute's prefix, if it has one.
    pub namespace: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Element(Element),
    Text(String),
}

impl Attribute {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            namespace: None,
        }
    }

    pub fn local_name(&self) -> &str {
        local_name(&self.name)
    }

    /// `xmlns` or `xmlns:prefix`.
    pub fn is_namespace_declaration(&self) -> bool {
        self.name == "xmlns" || self.name.starts_with("xmlns:")
    }

    /// An OPS `type` attribute, i.e. `epub:type` under whatever prefix.
    pub fn is_semantic_type(&self) -> bool {
        self.local_name() == "type" && self.namespace.as_deref() == Some(OPS_NS)
    }

    fn sort_key(&self) -> (u8, &str) {
        let rank = if self.name == "xmlns" {
            0
        } else if self.name.starts_with("xmlns:") {
            1
        } else if self.name.contains(':') {
            3
        } else {
            2
        };
        (rank, &self.name)
    }
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Element with a single text child.
    pub fn with_text(name: impl Into<String>, text: impl Into<String>) -> Self {
        let mut element = Self::new(name);
        element.children.push(Node::Text(text.into()));
        element
    }

    pub fn local_name(&self) -> &str {
        local_name(&self.name)
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.name == name)
            .map(|a| a.value.as_str())
    }

    /// First attribute with the given local name, regardless of prefix.
    pub fn attr_local(&self, local: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.local_name() == local)
            .map(|a| a.value.as_str())
    }

    /// Set an attribute, replacing any existing one of the same name.
    pub fn set_attr(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.attributes.iter_mut().find(|a| a.name == name) {
            Some(attr) => attr.value = value,
            None => self.attributes.push(Attribute::new(name, value)),
        }
    }

    pub fn remove_attr(&mut self, name: &str) -> Option<String> {
        let pos = self.attributes.iter().position(|a| a.name == name)?;
        Some(self.attributes.remove(pos).value)
    }

    /// Whitespace-separated tokens of every `epub:type` attribute.
    pub fn semantic_types(&self) -> impl Iterator<Item = &str> {
        self.attributes
            .iter()
            .filter(|a| a.is_semantic_type())
            .flat_map(|a| a.value.split_ascii_whitespace())
    }

    pub fn has_semantic_type(&self, token: &str) -> bool {
        self.semantic_types().any(|t| t == token)
    }

    /// Child elements, skipping text.
    pub fn child_elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|n| match n {
            Node::Element(e) => Some(e),
            Node::Text(_) => None,
        })
    }

    /// This element and every element below it, in document order.
    pub fn descendants(&self) -> Descendants<'_> {
        Descendants { stack: vec![self] }
    }

    /// Concatenated text of the subtree.
    pub fn text_content(&self) -> String {
        let mut text = String::new();
        self.collect_text(&mut text);
        text
    }

    fn collect_text(&self, out: &mut String) {
        for child in &self.children {
            match child {
                Node::Text(t) => out.push_str(t),
                Node::Element(e) => e.collect_text(out),
            }
        }
    }

    /// Append text, merging with a trailing text node.
    pub fn push_text(&mut self, text: &str) {
        if let Some(Node::Text(last)) = self.children.last_mut() {
            last.push_str(text);
        } else {
            self.children.push(Node::Text(text.to_string()));
        }
    }
}

/// Pre-order iterator over an element subtree.
pub struct Descendants<'a> {
    stack: Vec<&'a Element>,
}

impl<'a> Iterator for Descendants<'a> {
    type Item = &'a Element;

    fn next(&mut self) -> Option<Self::Item> {
        let element = self.stack.pop()?;
        self.stack
            .extend(element.children.iter().rev().filter_map(|n| match n {
                Node::Element(e) => Some(e),
                Node::Text(_) => None,
            }));
        Some(element)
    }
}

// ============================================================================
// Parsing
// ============================================================================

/// Prefix bindings of the open elements, innermost last.
#[derive(Default)]
struct NamespaceScopes {
    frames: Vec<Vec<(String, String)>>,
}

impl NamespaceScopes {
    fn resolve(&self, prefix: &str) -> Option<String> {
        if prefix == "xml" {
            return Some(XML_NS.to_string());
        }
        let bound = self
            .frames
            .iter()
            .rev()
            .flat_map(|frame| frame.iter().rev())
            .find(|(p, _)| p == prefix)
            .map(|(_, uri)| uri.clone());
        // Sloppy books use epub:type without declaring the prefix
        bound.or_else(|| (prefix == "epub").then(|| OPS_NS.to_string()))
    }
}

impl Document {
    /// Parse raw document bytes.
    ///
    /// The bytes are decoded (UTF-8, then the declared encoding, then
    /// Windows-1252) and must form a well-formed XML document with a single
    /// root element. HTML entity names are accepted in text and attribute
    /// values.
    pub fn parse(bytes: &[u8]) -> Result<Document> {
        let text = decode_xml(strip_bom(bytes));
        Self::parse_str(&text)
    }

    /// Parse an already-decoded XML string.
    pub fn parse_str(text: &str) -> Result<Document> {
        let mut reader = Reader::from_str(text);
        let mut scopes = NamespaceScopes::default();
        let mut stack: Vec<Element> = Vec::new();
        let mut root: Option<Element> = None;

        loop {
            match reader.read_event()? {
                Event::Start(e) => {
                    if stack.is_empty() && root.is_some() {
                        return Err(Error::MalformedXml("multiple root elements".into()));
                    }
                    let element = read_start(&reader, &e, &mut scopes)?;
                    stack.push(element);
                }
                Event::Empty(e) => {
                    let element = read_start(&reader, &e, &mut scopes)?;
                    scopes.frames.pop();
                    attach(element, &mut stack, &mut root)?;
                }
                Event::End(_) => {
                    let element = stack
                        .pop()
                        .ok_or_else(|| Error::MalformedXml("unmatched end tag".into()))?;
                    scopes.frames.pop();
                    attach(element, &mut stack, &mut root)?;
                }
                Event::Text(t) => {
                    let content = t.xml10_content()?;
                    push_text(&mut stack, &content)?;
                }
                Event::CData(c) => {
                    let content = c.decode()?;
                    push_text(&mut stack, &content)?;
                }
                Event::GeneralRef(r) => match r.resolve_char_ref()? {
                    Some(ch) => {
                        let ch = entities::normalize_char(ch);
                        push_text(&mut stack, ch.encode_utf8(&mut [0; 4]))?;
                    }
                    None => {
                        let name = r.decode()?;
                        let resolved = entities::resolve_entity(&name).ok_or_else(|| {
                            Error::MalformedXml(format!("undefined entity &{name};"))
                        })?;
                        push_text(&mut stack, resolved)?;
                    }
                },
                Event::Comment(_) | Event::PI(_) | Event::Decl(_) | Event::DocType(_) => {}
                Event::Eof => break,
            }
        }

        if let Some(open) = stack.last() {
            return Err(Error::MalformedXml(format!("unclosed element <{}>", open.name)));
        }

        root.map(|root| Document { root })
            .ok_or_else(|| Error::MalformedXml("no root element".into()))
    }

    /// Serialize in canonical form.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }
}

impl std::fmt::Display for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut out = String::new();
        write_element(&mut out, &self.root);
        f.write_str(&out)
    }
}

fn read_start(
    reader: &Reader<&[u8]>,
    start: &BytesStart<'_>,
    scopes: &mut NamespaceScopes,
) -> Result<Element> {
    let decoder = reader.decoder();
    let mut element = Element::new(decoder.decode(start.name().as_ref())?);

    for attr in start.attributes() {
        let attr = attr?;
        let name = decoder.decode(attr.key.as_ref())?.into_owned();
        let value = attr
            .decode_and_unescape_value_with(decoder, entities::resolve_entity)?
            .into_owned();
        element.attributes.push(Attribute::new(name, value));
    }

    let frame = element
        .attributes
        .iter()
        .filter_map(|a| {
            a.name
                .strip_prefix("xmlns:")
                .map(|prefix| (prefix.to_string(), a.value.clone()))
        })
        .collect();
    scopes.frames.push(frame);

    for attr in &mut element.attributes {
        if attr.is_namespace_declaration() {
            continue;
        }
        if let Some(prefix) = name_prefix(&attr.name) {
            attr.namespace = scopes.resolve(prefix);
        }
    }

    Ok(element)
}

fn attach(element: Element, stack: &mut [Element], root: &mut Option<Element>) -> Result<()> {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(Node::Element(element));
        Ok(())
    } else if root.is_none() {
        *root = Some(element);
        Ok(())
    } else {
        Err(Error::MalformedXml("multiple root elements".into()))
    }
}

fn push_text(stack: &mut [Element], text: &str) -> Result<()> {
    match stack.last_mut() {
        Some(parent) => {
            parent.push_text(text);
            Ok(())
        }
        None if text.trim().is_empty() => Ok(()),
        None => Err(Error::MalformedXml("text outside the root element".into())),
    }
}

// ============================================================================
// Serialization
// ============================================================================

fn write_element(out: &mut String, element: &Element) {
    out.push('<');
    out.push_str(&element.name);

    let mut attributes: Vec<&Attribute> = element.attributes.iter().collect();
    attributes.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
    for attr in attributes {
        out.push(' ');
        out.push_str(&attr.name);
        out.push_str("=\"");
        escape_attribute(out, &attr.value);
        out.push('"');
    }
    out.push('>');

    for child in &element.children {
        match child {
            Node::Element(e) => write_element(out, e),
            Node::Text(t) => escape_text(out, t),
        }
    }

    out.push_str("</");
    out.push_str(&element.name);
    out.push('>');
}

fn escape_text(out: &mut String, text: &str) {
    let escaped = partial_escape(text);
    if escaped.contains('\r') {
        out.push_str(&escaped.replace('\r', "&#xD;"));
    } else {
        out.push_str(&escaped);
    }
}

fn escape_attribute(out: &mut String, value: &str) {
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '"' => out.push_str("&quot;"),
            '\t' => out.push_str("&#x9;"),
            '\n' => out.push_str("&#xA;"),
            '\r' => out.push_str("&#xD;"),
            c => out.push(c),
        }
    }
}

// ============================================================================
// Whitespace
// ============================================================================

/// Collapse pretty-printing whitespace in every text node outside `pre`.
///
/// Adjacent text nodes (left behind when the elements between them were
/// removed) are merged first, so the result reads back as the same tree.
/// A run starting with a newline, carriage return or tab, together with any
/// further such characters and spaces that follow, becomes one `\n`.
/// Non-whitespace text is never touched.
pub fn compact_whitespace(element: &mut Element) {
    if element.local_name() == "pre" {
        return;
    }
    merge_adjacent_text(element);
    for child in &mut element.children {
        match child {
            Node::Element(e) => compact_whitespace(e),
            Node::Text(t) => {
                if let Some(compacted) = compact_text(t) {
                    *t = compacted;
                }
            }
        }
    }
}

fn merge_adjacent_text(element: &mut Element) {
    let children = std::mem::take(&mut element.children);
    element.children.reserve(children.len());
    for child in children {
        match child {
            Node::Text(t) if t.is_empty() => {}
            Node::Text(t) => element.push_text(&t),
            e @ Node::Element(_) => element.children.push(e),
        }
    }
}

fn compact_text(text: &str) -> Option<String> {
    let is_break = |c: char| matches!(c, '\n' | '\r' | '\t');
    if !text.contains(is_break) {
        return None;
    }

    let mut out = String::with_capacity(text.len());
    let mut in_run = false;
    for ch in text.chars() {
        if in_run && (is_break(ch) || ch == ' ') {
            continue;
        }
        in_run = is_break(ch);
        out.push(if in_run { '\n' } else { ch });
    }
    Some(out)
}
