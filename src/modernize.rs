//! Lexical modernizer: swaps archaic or dated words for current ones.
//!
//! Substitution is whole-word only and runs over text nodes of a parsed
//! document, so tag and attribute names are never touched. The case shape
//! of each replaced word (lower, Title, UPPER) carries over to its
//! replacement; words in any other casing are left alone.

use std::borrow::Cow;

use crate::markup::{Document, Element, Node};

/// Modern replacement for a lowercase word, if it has one.
fn replacement(word: &str) -> Option<&'static str> {
    Some(match word {
        "gay" => "happy",
        "queer" => "strange",
        "intercourse" => "conversation",
        "ejaculated" => "exclaimed",
        "fireman" => "firefighter",
        "mailman" => "mail carrier",
        "policeman" => "police officer",
        "stewardess" => "flight attendant",
        "thee" | "thou" => "you",
        "thy" => "your",
        "hath" => "has",
        "doth" => "does",
        "whilst" => "while",
        "amongst" => "among",
        "oft" => "often",
        "ere" => "before",
        "nay" => "no",
        "naught" => "nothing",
        "betwixt" => "between",
        _ => return None,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CaseShape {
    Lower,
    Title,
    Upper,
}

impl CaseShape {
    fn of(word: &str) -> Option<CaseShape> {
        let mut chars = word.chars();
        let first = chars.next()?;
        let rest = chars.as_str();

        if word.chars().all(|c| !c.is_uppercase()) {
            Some(CaseShape::Lower)
        } else if first.is_uppercase() && rest.chars().all(|c| !c.is_uppercase()) {
            Some(CaseShape::Title)
        } else if word.chars().all(|c| !c.is_lowercase()) {
            Some(CaseShape::Upper)
        } else {
            None
        }
    }

    fn apply(self, word: &str) -> String {
        match self {
            CaseShape::Lower => word.to_string(),
            CaseShape::Upper => word.to_uppercase(),
            CaseShape::Title => {
                let mut chars = word.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars).collect(),
                    None => String::new(),
                }
            }
        }
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn modernize_word(word: &str) -> Option<String> {
    let shape = CaseShape::of(word)?;
    let modern = replacement(&word.to_lowercase())?;
    Some(shape.apply(modern))
}

/// Substitute modern terms in plain text, keeping every separator as is.
///
/// ```
/// use epubcrush::modernize::modernize;
///
/// assert_eq!(modernize("She was feeling gay."), "She was feeling happy.");
/// assert_eq!(modernize("Gay children played."), "Happy children played.");
/// ```
pub fn modernize(text: &str) -> String {
    modernize_cow(text).into_owned()
}

fn modernize_cow(text: &str) -> Cow<'_, str> {
    let mut out: Option<String> = None;
    let mut copied = 0;
    let mut start = None;

    // One trailing separator flushes the last word
    for (i, c) in text.char_indices().chain(std::iter::once((text.len(), ' '))) {
        match (start, is_word_char(c) && i < text.len()) {
            (None, true) => start = Some(i),
            (Some(s), false) => {
                start = None;
                if let Some(modern) = modernize_word(&text[s..i]) {
                    let buf = out.get_or_insert_with(|| String::with_capacity(text.len()));
                    buf.push_str(&text[copied..s]);
                    buf.push_str(&modern);
                    copied = i;
                }
            }
            _ => {}
        }
    }

    match out {
        Some(mut buf) => {
            buf.push_str(&text[copied..]);
            Cow::Owned(buf)
        }
        None => Cow::Borrowed(text),
    }
}

/// Modernize every text node of a document.
pub fn modernize_document(doc: &mut Document) {
    modernize_element(&mut doc.root);
}

fn modernize_element(element: &mut Element) {
    for child in &mut element.children {
        match child {
            Node::Element(e) => modernize_element(e),
            Node::Text(t) => {
                if let Cow::Owned(modern) = modernize_cow(t) {
                    *t = modern;
                }
            }
        }
    }
}
