//! Small byte and text helpers shared by the rewrite stages.

use std::borrow::Cow;

use memchr::memmem;

// ============================================================================
// Text Decoding
// ============================================================================

/// Strip UTF-8 BOM if present.
pub fn strip_bom(data: &[u8]) -> &[u8] {
    data.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(data)
}

/// Decode bytes to a string, handling various encodings.
///
/// This function:
/// 1. First tries UTF-8 (handles BOM automatically via encoding_rs)
/// 2. If malformed, tries the hint encoding (from `<?xml encoding="..."?>`)
/// 3. Falls back to Windows-1252 (common in old ebooks)
///
/// Uses `Cow<str>` to avoid allocation when the input is valid UTF-8.
pub fn decode_text<'a>(bytes: &'a [u8], hint_encoding: Option<&str>) -> Cow<'a, str> {
    let (result, _encoding, malformed) = encoding_rs::UTF_8.decode(bytes);

    if !malformed {
        return result;
    }

    if let Some(name) = hint_encoding
        && let Some(encoding) = encoding_rs::Encoding::for_label(name.as_bytes())
    {
        let (result, _, _) = encoding.decode(bytes);
        return result;
    }

    let (result, _, _) = encoding_rs::WINDOWS_1252.decode(bytes);
    result
}

/// Decode an XML document, using its own declaration as the encoding hint.
pub fn decode_xml(bytes: &[u8]) -> Cow<'_, str> {
    decode_text(bytes, extract_xml_encoding(bytes))
}

/// Extract encoding from XML declaration.
///
/// Parses `<?xml ... encoding="..." ?>` within the first 100 bytes.
pub fn extract_xml_encoding(bytes: &[u8]) -> Option<&str> {
    let prefix = &bytes[..bytes.len().min(100)];

    let xml_start = memmem::find(prefix, b"<?xml")?;
    let after_xml = &prefix[xml_start..];

    let enc_pos = after_xml
        .windows(9)
        .position(|w| w.eq_ignore_ascii_case(b"encoding="))?;
    let after_enc = &after_xml[enc_pos + 9..];

    let (&quote, rest) = after_enc.split_first()?;
    if quote != b'"' && quote != b'\'' {
        return None;
    }

    let value_end = memchr::memchr(quote, rest)?;
    std::str::from_utf8(&rest[..value_end]).ok()
}

// ============================================================================
// Names and Paths
// ============================================================================

/// Extract local name from namespaced XML name (e.g., "dc:title" -> "title").
pub fn local_name(name: &str) -> &str {
    name.rsplit_once(':').map_or(name, |(_, local)| local)
}

/// Extract the prefix of a namespaced XML name (e.g., "epub:type" -> "epub").
pub fn name_prefix(name: &str) -> Option<&str> {
    name.split_once(':').map(|(prefix, _)| prefix)
}

/// Case-insensitive (ASCII) suffix test, used for every filename-pattern match.
pub fn ends_with_ignore_ascii_case(haystack: &str, suffix: &str) -> bool {
    let (h, s) = (haystack.as_bytes(), suffix.as_bytes());
    h.len() >= s.len() && h[h.len() - s.len()..].eq_ignore_ascii_case(s)
}

/// Directory portion of an archive path, without trailing slash.
pub fn parent_dir(path: &str) -> &str {
    path.rsplit_once('/').map_or("", |(dir, _)| dir)
}

/// Resolve a relative href against a base directory inside the archive.
///
/// Handles `.` and `..` segments and percent-encoding, and drops any
/// fragment. The result never starts with `/`.
pub fn resolve_href(base_dir: &str, href: &str) -> String {
    let href = href.split('#').next().unwrap_or(href);
    let href = percent_encoding::percent_decode_str(href).decode_utf8_lossy();

    let mut parts: Vec<&str> = if href.starts_with('/') {
        Vec::new()
    } else {
        base_dir.split('/').filter(|s| !s.is_empty()).collect()
    };

    for segment in href.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            s => parts.push(s),
        }
    }

    parts.join("/")
}

// ============================================================================
// Raster Format Sniffing
// ============================================================================

/// Raster image formats the re-encoders understand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RasterFormat {
    Jpeg,
    Png,
    Gif,
    WebP,
}

impl RasterFormat {
    /// File extension used for temporary files handed to external tools.
    pub fn extension(self) -> &'static str {
        match self {
            RasterFormat::Jpeg => "jpg",
            RasterFormat::Png => "png",
            RasterFormat::Gif => "gif",
            RasterFormat::WebP => "webp",
        }
    }
}

/// Detect a raster format from magic bytes, falling back to the extension.
pub fn sniff_raster(path: &str, data: &[u8]) -> Option<RasterFormat> {
    if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return Some(RasterFormat::Jpeg);
    }
    if data.starts_with(&[0x89, b'P', b'N', b'G']) {
        return Some(RasterFormat::Png);
    }
    if data.starts_with(b"GIF8") {
        return Some(RasterFormat::Gif);
    }
    if data.len() >= 12 && data.starts_with(b"RIFF") && &data[8..12] == b"WEBP" {
        return Some(RasterFormat::WebP);
    }

    if ends_with_ignore_ascii_case(path, ".jpg") || ends_with_ignore_ascii_case(path, ".jpeg") {
        Some(RasterFormat::Jpeg)
    } else if ends_with_ignore_ascii_case(path, ".png") {
        Some(RasterFormat::Png)
    } else if ends_with_ignore_ascii_case(path, ".gif") {
        Some(RasterFormat::Gif)
    } else if ends_with_ignore_ascii_case(path, ".webp") {
        Some(RasterFormat::WebP)
    } else {
        None
    }
}

// ============================================================================
// Tests
// ============================================================================
