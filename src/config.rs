//! Per-run configuration.
//!
//! A [`CrushConfig`] is built once, before an archive is opened, and only
//! ever borrowed immutably by the rewrite stages.

use std::time::Duration;

/// Low-value page roles whose text is blanked by the classifier.
pub const DEFAULT_EXCLUDED_ROLES: &[&str] = &[
    "cover",
    "titlepage",
    "copyright-page",
    "dedication",
    "index",
    "imprint",
];

/// Anchors per character of non-link text above which a page is an index.
pub const DEFAULT_LINK_DENSITY_THRESHOLD: f64 = 0.10;

/// Tunable constants of the content classifier.
///
/// The defaults are empirical; changing them changes output bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifierPolicy {
    /// Anchors per character of non-anchor text that marks a link page.
    pub link_density_threshold: f64,
    /// Semantic types (`epub:type` tokens) of structurally excluded pages.
    pub excluded_roles: Vec<String>,
}

impl Default for ClassifierPolicy {
    fn default() -> Self {
        Self {
            link_density_threshold: DEFAULT_LINK_DENSITY_THRESHOLD,
            excluded_roles: DEFAULT_EXCLUDED_ROLES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl ClassifierPolicy {
    /// Check whether a semantic type token names a low-value page.
    pub fn is_excluded_role(&self, token: &str) -> bool {
        self.excluded_roles.iter().any(|r| r == token)
    }
}

/// Options for one archive rewrite.
///
/// # Example
///
/// ```
/// use epubcrush::CrushConfig;
///
/// let config = CrushConfig::default().with_images(true).with_quality(70);
/// assert!(config.images);
/// assert!(config.reencodes_images());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct CrushConfig {
    /// Keep raster and vector images (default: off).
    pub images: bool,
    /// Keep stylesheets and styling markup (default: off).
    pub styles: bool,
    /// Keep embedded fonts (default: off).
    pub fonts: bool,
    /// Lossy re-encode target for raster images; 100 disables re-encoding.
    pub quality: u8,
    /// Apply lexical modernization to text nodes (default: off).
    pub modernize: bool,
    /// Run the whole-archive recompressor after the rewrite (default: on).
    pub recompress: bool,
    /// Upper bound for any single external tool invocation.
    pub tool_timeout: Duration,
    /// Deflate level for every entry except `mimetype` (0-9).
    pub compression_level: i64,
    /// Classifier heuristics.
    pub policy: ClassifierPolicy,
}

impl Default for CrushConfig {
    fn default() -> Self {
        Self {
            images: false,
            styles: false,
            fonts: false,
            quality: 100,
            modernize: false,
            recompress: true,
            tool_timeout: Duration::from_secs(60),
            compression_level: 9,
            policy: ClassifierPolicy::default(),
        }
    }
}

impl CrushConfig {
    pub fn with_images(mut self, images: bool) -> Self {
        self.images = images;
        self
    }

    pub fn with_styles(mut self, styles: bool) -> Self {
        self.styles = styles;
        self
    }

    pub fn with_fonts(mut self, fonts: bool) -> Self {
        self.fonts = fonts;
        self
    }

    /// Set the re-encode quality, clamped to 0-100.
    pub fn with_quality(mut self, quality: u8) -> Self {
        self.quality = quality.min(100);
        self
    }

    pub fn with_modernize(mut self, modernize: bool) -> Self {
        self.modernize = modernize;
        self
    }

    pub fn with_recompress(mut self, recompress: bool) -> Self {
        self.recompress = recompress;
        self
    }

    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = timeout;
        self
    }

    pub fn with_policy(mut self, policy: ClassifierPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Raster images are handed to an external re-encoder.
    pub fn reencodes_images(&self) -> bool {
        self.images && self.quality < 100
    }
}
