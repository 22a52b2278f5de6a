//! Archive entry roles and the configuration-driven allow-list.
//!
//! Every entry of the input archive maps to exactly one [`EntryRole`].
//! The mapping is a suffix table filtered by the configuration; the same
//! table feeds [`RetainedSuffixes`], which the manifest rewriter uses so
//! that the entries it keeps references to are exactly the entries the
//! archive transformer writes.

use crate::config::CrushConfig;
use crate::util::ends_with_ignore_ascii_case;

/// Fixed name of the EPUB mimetype descriptor.
pub const MIMETYPE_PATH: &str = "mimetype";

/// Payload of the mimetype descriptor.
pub const EPUB_MIMETYPE: &[u8] = b"application/epub+zip";

/// What an archive entry is, as far as the rewrite is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryRole {
    /// The `mimetype` entry; always stored, always first.
    Mimetype,
    /// OPF package document.
    Package,
    /// Legacy NCX navigation-control document.
    Navigation,
    /// XHTML/HTML content document (including the EPUB 3 nav document).
    ContentDocument,
    /// Any other XML (`META-INF/container.xml`, display options, ...).
    XmlDocument,
    RasterImage,
    VectorImage,
    Stylesheet,
    Font,
    /// Not in the allow-list for this configuration; never written.
    Excluded,
}

/// Suffix table, checked in order. Longer suffixes come before any
/// shorter suffix they end with (`.xhtml` before `.xml`).
const ROLE_SUFFIXES: &[(&str, EntryRole)] = &[
    (".opf", EntryRole::Package),
    (".ncx", EntryRole::Navigation),
    (".xhtml", EntryRole::ContentDocument),
    (".html", EntryRole::ContentDocument),
    (".htm", EntryRole::ContentDocument),
    (".xml", EntryRole::XmlDocument),
    (".jpg", EntryRole::RasterImage),
    (".jpeg", EntryRole::RasterImage),
    (".png", EntryRole::RasterImage),
    (".gif", EntryRole::RasterImage),
    (".webp", EntryRole::RasterImage),
    (".svg", EntryRole::VectorImage),
    (".css", EntryRole::Stylesheet),
    (".ttf", EntryRole::Font),
    (".otf", EntryRole::Font),
    (".woff", EntryRole::Font),
    (".woff2", EntryRole::Font),
];

impl EntryRole {
    /// Whether entries of this role survive under `config`.
    pub fn is_enabled(self, config: &CrushConfig) -> bool {
        match self {
            EntryRole::Mimetype
            | EntryRole::Package
            | EntryRole::Navigation
            | EntryRole::ContentDocument
            | EntryRole::XmlDocument => true,
            EntryRole::RasterImage | EntryRole::VectorImage => config.images,
            EntryRole::Stylesheet => config.styles,
            EntryRole::Font => config.fonts,
            EntryRole::Excluded => false,
        }
    }

    /// Role implied by the path alone, before the allow-list is applied.
    fn from_path(path: &str) -> EntryRole {
        if path.eq_ignore_ascii_case(MIMETYPE_PATH) {
            return EntryRole::Mimetype;
        }
        if path.ends_with('/') {
            return EntryRole::Excluded;
        }
        ROLE_SUFFIXES
            .iter()
            .find(|(suffix, _)| ends_with_ignore_ascii_case(path, suffix))
            .map_or(EntryRole::Excluded, |&(_, role)| role)
    }
}

/// Map an archive path to its role under `config`.
///
/// ```
/// use epubcrush::{CrushConfig, EntryRole, classify_path};
///
/// let config = CrushConfig::default();
/// assert_eq!(classify_path("OEBPS/ch1.xhtml", &config), EntryRole::ContentDocument);
/// assert_eq!(classify_path("OEBPS/style.css", &config), EntryRole::Excluded);
/// ```
pub fn classify_path(path: &str, config: &CrushConfig) -> EntryRole {
    let role = EntryRole::from_path(path);
    if role.is_enabled(config) {
        role
    } else {
        EntryRole::Excluded
    }
}

/// The filename suffixes retained under one configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetainedSuffixes {
    suffixes: Vec<&'static str>,
}

impl RetainedSuffixes {
    pub fn for_config(config: &CrushConfig) -> Self {
        let suffixes = ROLE_SUFFIXES
            .iter()
            .filter(|(_, role)| role.is_enabled(config))
            .map(|&(suffix, _)| suffix)
            .collect();
        Self { suffixes }
    }

    /// Case-insensitive suffix match of a path or manifest href.
    pub fn matches(&self, href: &str) -> bool {
        let href = href.split(['#', '?']).next().unwrap_or(href);
        self.suffixes
            .iter()
            .any(|suffix| ends_with_ignore_ascii_case(href, suffix))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_always_retained() {
        let config = CrushConfig::default();
        assert_eq!(classify_path("mimetype", &config), EntryRole::Mimetype);
        assert_eq!(classify_path("OEBPS/content.opf", &config), EntryRole::Package);
        assert_eq!(classify_path("OEBPS/toc.ncx", &config), EntryRole::Navigation);
        assert_eq!(
            classify_path("META-INF/container.xml", &config),
            EntryRole::XmlDocument
        );
        assert_eq!(classify_path("a/b.HTM", &config), EntryRole::ContentDocument);
        assert_eq!(classify_path("a/b.xhtml", &config), EntryRole::ContentDocument);
    }

    #[test]
    fn test_optional_roles_follow_config() {
        let off = CrushConfig::default();
        let on = CrushConfig::default()
            .with_images(true)
            .with_styles(true)
            .with_fonts(true);

        for (path, role) in [
            ("img/cover.JPG", EntryRole::RasterImage),
            ("img/map.svg", EntryRole::VectorImage),
            ("css/core.css", EntryRole::Stylesheet),
            ("fonts/a.woff2", EntryRole::Font),
        ] {
            assert_eq!(classify_path(path, &off), EntryRole::Excluded, "{path}");
            assert_eq!(classify_path(path, &on), role, "{path}");
        }
    }

    #[test]
    fn test_unmatched_is_excluded() {
        let config = CrushConfig::default().with_images(true);
        assert_eq!(classify_path("OEBPS/", &config), EntryRole::Excluded);
        assert_eq!(classify_path("audio/track.mp3", &config), EntryRole::Excluded);
        assert_eq!(classify_path("script.js", &config), EntryRole::Excluded);
        assert_eq!(classify_path("OEBPS/mimetype", &config), EntryRole::Excluded);
    }

    #[test]
    fn test_retained_suffixes_agree_with_roles() {
        let config = CrushConfig::default().with_styles(true);
        let retained = RetainedSuffixes::for_config(&config);

        assert!(retained.matches("Styles/main.CSS"));
        assert!(retained.matches("Text/ch1.xhtml#start"));
        assert!(!retained.matches("Images/cover.jpg"));
        assert!(!retained.matches("Fonts/a.otf"));

        for path in ["a.css", "b.xhtml", "c.jpg", "d.ttf", "e.ncx"] {
            assert_eq!(
                retained.matches(path),
                classify_path(path, &config) != EntryRole::Excluded,
                "{path}"
            );
        }
    }
}
