//! HTML named character references.
//!
//! XHTML content in the wild uses HTML entity names (`&nbsp;`, `&copy;`,
//! `&rsquo;`) that strict XML does not define. The parser resolves them
//! against the full HTML5 table while reading text and attribute values, so
//! CDATA sections and comments are never touched. Non-breaking space, named
//! or numeric, collapses to a plain space.

use quick_xml::escape::resolve_html5_entity;

const NBSP: char = '\u{A0}';

/// Replacement text for a named reference, or `None` if HTML does not
/// define it either.
///
/// ```
/// use epubcrush::markup::entities::resolve_entity;
///
/// assert_eq!(resolve_entity("nbsp"), Some(" "));
/// assert_eq!(resolve_entity("alpha"), Some("\u{3B1}"));
/// assert_eq!(resolve_entity("amp"), Some("&"));
/// assert_eq!(resolve_entity("bogus"), None);
/// ```
pub fn resolve_entity(name: &str) -> Option<&'static str> {
    match name {
        "nbsp" | "NonBreakingSpace" => Some(" "),
        _ => resolve_html5_entity(name),
    }
}

/// A resolved numeric reference, with non-breaking space collapsed.
pub fn normalize_char(ch: char) -> char {
    if ch == NBSP { ' ' } else { ch }
}
