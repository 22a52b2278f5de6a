//! # epubcrush
//!
//! Deterministic, content-aware size reduction for EPUB files.
//!
//! An EPUB is rewritten into a smaller, still-valid EPUB:
//!
//! - entries outside a configuration-driven allow-list (images, styles,
//!   fonts, scripts, audio) are dropped, and the package manifest is
//!   rewritten so nothing references them
//! - XHTML content documents are parsed into a tree, stripped of excluded
//!   elements and attributes, and written back in a canonical form
//! - pages that are mostly links or typed as cover, title or copyright
//!   pages are blanked in place, keeping spine and navigation intact
//! - the result is deflated at maximum effort with `mimetype` stored first
//!
//! ## Quick Start
//!
//! ```no_run
//! use epubcrush::{CrushConfig, crush_file};
//!
//! let config = CrushConfig::default().with_images(true).with_quality(70);
//! let report = crush_file("book.epub", &config)?;
//! println!("saved {:.1}%", report.savings_percent());
//! # Ok::<(), epubcrush::Error>(())
//! ```
//!
//! Working in memory:
//!
//! ```no_run
//! use epubcrush::{CrushConfig, check_archive, crush};
//!
//! let input = std::fs::read("book.epub")?;
//! let output = crush(&input, &CrushConfig::default())?;
//! check_archive(&output)?;
//! # Ok::<(), epubcrush::Error>(())
//! ```

pub mod canonicalize;
pub mod classify;
pub mod config;
pub mod crush;
pub mod entry;
pub mod error;
pub mod external;
pub mod manifest;
pub mod markup;
pub mod modernize;
pub(crate) mod util;

pub use canonicalize::{ExclusionSet, canonicalize, canonicalize_document};
pub use classify::{Escalation, classify, classify_document, classify_links, classify_role};
pub use config::{ClassifierPolicy, CrushConfig};
pub use crush::{CrushReport, backup_path, check_archive, crush, crush_file, crush_with_report};
pub use entry::{EntryRole, RetainedSuffixes, classify_path};
pub use error::{Error, Result};
pub use manifest::{rewrite_manifest, rewrite_navigation};
pub use modernize::modernize;
