//! Archive transformer: the end-to-end EPUB rewrite.
//!
//! The rewrite runs in two passes over an in-memory archive:
//!
//! 1. read every entry and map its path to an [`EntryRole`]; excluded
//!    entries are dropped here and never read again
//! 2. rewrite each retained entry by role and write a new archive,
//!    `mimetype` first and stored, everything else deflated in input order
//!
//! Timestamps are pinned to the ZIP epoch so identical input and
//! configuration always give identical bytes.

use std::collections::HashSet;
use std::fs;
use std::io::{Cursor, Read, Seek, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipArchive, ZipWriter};

use crate::canonicalize::{ExclusionSet, canonicalize_document};
use crate::classify::{Escalation, classify_links, classify_role};
use crate::config::CrushConfig;
use crate::entry::{EPUB_MIMETYPE, EntryRole, MIMETYPE_PATH, RetainedSuffixes, classify_path};
use crate::error::{Error, Result};
use crate::external::{recompress_archive, reencode_image};
use crate::manifest::{rewrite_manifest, rewrite_navigation};
use crate::markup::Document;
use crate::modernize::modernize_document;
use crate::util::{ends_with_ignore_ascii_case, parent_dir, resolve_href};

/// Suffix appended to the input path for the pre-rewrite copy.
pub const BACKUP_SUFFIX: &str = ".bak.epub";

/// What one archive rewrite did.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "cli", derive(serde::Serialize))]
pub struct CrushReport {
    pub entries_kept: usize,
    pub entries_dropped: usize,
    /// Content documents blanked by the classifier.
    pub documents_blanked: usize,
    pub images_reencoded: usize,
    pub input_size: usize,
    pub output_size: usize,
    /// Whether the final recompression pass was kept.
    pub recompressed: bool,
    /// Copy of the original, once the file has been replaced.
    pub backup: Option<PathBuf>,
}

impl CrushReport {
    /// Size reduction as a percentage of the input.
    pub fn savings_percent(&self) -> f64 {
        if self.input_size == 0 {
            return 0.0;
        }
        (1.0 - self.output_size as f64 / self.input_size as f64) * 100.0
    }
}

/// A retained archive entry between the two passes.
struct Entry {
    path: String,
    role: EntryRole,
    data: Vec<u8>,
}

/// Rewrite an EPUB held in memory.
///
/// Fails without producing anything if the input is not a ZIP archive, has
/// no `mimetype` entry, or any content document is not well-formed.
pub fn crush(input: &[u8], config: &CrushConfig) -> Result<Vec<u8>> {
    crush_with_report(input, config).map(|(bytes, _)| bytes)
}

/// [`crush`], also returning what was done.
pub fn crush_with_report(input: &[u8], config: &CrushConfig) -> Result<(Vec<u8>, CrushReport)> {
    let mut report = CrushReport {
        input_size: input.len(),
        ..CrushReport::default()
    };

    let entries = read_entries(input, config, &mut report)?;
    let retained = RetainedSuffixes::for_config(config);
    let output = write_entries(entries, &retained, config, &mut report)?;

    report.output_size = output.len();
    Ok((output, report))
}

/// Pass 1: read the retained entries, with their roles.
fn read_entries(input: &[u8], config: &CrushConfig, report: &mut CrushReport) -> Result<Vec<Entry>> {
    let mut archive = ZipArchive::new(Cursor::new(input))?;
    let mut entries = Vec::with_capacity(archive.len());
    let mut has_mimetype = false;

    for i in 0..archive.len() {
        let mut file = archive.by_index(i)?;
        let path = file.name().to_string();
        if file.is_dir() {
            continue;
        }

        let role = match classify_path(&path, config) {
            EntryRole::Mimetype if has_mimetype => EntryRole::Excluded,
            role => role,
        };
        if role == EntryRole::Excluded {
            debug!(path = path.as_str(), "dropping entry");
            report.entries_dropped += 1;
            continue;
        }
        has_mimetype |= role == EntryRole::Mimetype;

        let mut data = Vec::with_capacity(file.size() as usize);
        file.read_to_end(&mut data)
            .map_err(|e| Error::from(e).in_entry(&path))?;
        entries.push(Entry { path, role, data });
    }

    if !has_mimetype {
        return Err(Error::MissingMimetype);
    }
    Ok(entries)
}

/// Pass 2: rewrite each entry by role and assemble the output archive.
fn write_entries(
    entries: Vec<Entry>,
    retained: &RetainedSuffixes,
    config: &CrushConfig,
    report: &mut CrushReport,
) -> Result<Vec<u8>> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));

    let stored = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Stored)
        .last_modified_time(DateTime::default());
    let deflated = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .compression_level(Some(config.compression_level))
        .last_modified_time(DateTime::default());

    let (mimetype, rest): (Vec<Entry>, Vec<Entry>) = entries
        .into_iter()
        .partition(|e| e.role == EntryRole::Mimetype);

    for entry in &mimetype {
        zip.start_file(entry.path.as_str(), stored)?;
        zip.write_all(&entry.data)?;
    }

    for entry in rest {
        let data = rewrite_entry(&entry, retained, config, report)
            .map_err(|e| e.in_entry(&entry.path))?;
        zip.start_file(entry.path.as_str(), deflated)?;
        zip.write_all(&data)?;
        report.entries_kept += 1;
    }
    report.entries_kept += mimetype.len();

    Ok(zip.finish()?.into_inner())
}

/// Role dispatch for one retained entry.
fn rewrite_entry(
    entry: &Entry,
    retained: &RetainedSuffixes,
    config: &CrushConfig,
    report: &mut CrushReport,
) -> Result<Vec<u8>> {
    match entry.role {
        EntryRole::ContentDocument => {
            let (data, escalation) = rewrite_content(&entry.data, config)?;
            if escalation.is_escalated() {
                debug!(path = entry.path.as_str(), ?escalation, "blanking low-value page");
                report.documents_blanked += 1;
            }
            Ok(data)
        }
        EntryRole::Package => rewrite_manifest(&entry.data, retained, config),
        EntryRole::Navigation => rewrite_navigation(&entry.data),
        EntryRole::RasterImage if config.reencodes_images() => {
            match reencode_image(&entry.path, &entry.data, config) {
                Some(data) => {
                    report.images_reencoded += 1;
                    Ok(data)
                }
                None => Ok(entry.data.clone()),
            }
        }
        EntryRole::Mimetype
        | EntryRole::XmlDocument
        | EntryRole::RasterImage
        | EntryRole::VectorImage
        | EntryRole::Stylesheet
        | EntryRole::Font
        | EntryRole::Excluded => Ok(entry.data.clone()),
    }
}

/// Classify, canonicalize and optionally modernize one content document.
pub fn rewrite_content(data: &[u8], config: &CrushConfig) -> Result<(Vec<u8>, Escalation)> {
    let mut doc = Document::parse(data)?;
    let mut exclusions = ExclusionSet::for_config(config);

    let role = classify_role(&doc, &config.policy);
    if let Some(escalation) = &role {
        exclusions.escalate(escalation);
    }
    canonicalize_document(&mut doc, &exclusions);

    // Link density is measured on the canonical tree, without the text of
    // removed scripts, styles and print scaffolding
    let escalation = match role {
        Some(escalation) => escalation,
        None => {
            let escalation = classify_links(&doc, &config.policy);
            if escalation.is_escalated() {
                exclusions.escalate(&escalation);
                canonicalize_document(&mut doc, &exclusions);
            }
            escalation
        }
    };

    if config.modernize {
        modernize_document(&mut doc);
    }
    Ok((doc.to_bytes(), escalation))
}

// ============================================================================
// Validation
// ============================================================================

/// Check the structural invariants of a rewritten archive.
///
/// The first entry must be an uncompressed `mimetype` holding
/// `application/epub+zip`, and every manifest item of every package
/// document must resolve to an entry that is present.
pub fn check_archive(bytes: &[u8]) -> Result<()> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))?;
    check_mimetype(&mut archive)?;

    let names: HashSet<String> = archive.file_names().map(str::to_string).collect();
    let packages: Vec<String> = names
        .iter()
        .filter(|n| ends_with_ignore_ascii_case(n, ".opf"))
        .cloned()
        .collect();

    for opf_path in packages {
        let mut data = Vec::new();
        archive.by_name(&opf_path)?.read_to_end(&mut data)?;
        let doc = Document::parse(&data).map_err(|e| e.in_entry(&opf_path))?;
        let base = parent_dir(&opf_path);

        for href in doc
            .root
            .descendants()
            .filter(|e| e.local_name() == "item")
            .filter_map(|e| e.attr_local("href"))
        {
            let target = resolve_href(base, href);
            if !names.contains(&target) {
                return Err(Error::InvalidEpub(format!(
                    "{opf_path}: manifest item {href} has no entry {target}"
                )));
            }
        }
    }

    Ok(())
}

fn check_mimetype<R: Read + Seek>(archive: &mut ZipArchive<R>) -> Result<()> {
    if archive.is_empty() {
        return Err(Error::MissingMimetype);
    }
    let mut first = archive.by_index(0)?;
    if first.name() != MIMETYPE_PATH {
        return Err(Error::InvalidEpub(format!(
            "first entry is {}, not {MIMETYPE_PATH}",
            first.name()
        )));
    }
    if first.compression() != CompressionMethod::Stored {
        return Err(Error::InvalidEpub("mimetype entry is compressed".into()));
    }

    let mut payload = Vec::new();
    first.read_to_end(&mut payload)?;
    if payload != EPUB_MIMETYPE {
        return Err(Error::InvalidEpub(format!(
            "mimetype is {:?}",
            String::from_utf8_lossy(&payload)
        )));
    }
    Ok(())
}

// ============================================================================
// In-place File Rewrite
// ============================================================================

/// `<path>.bak.epub`, next to the original.
pub fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(BACKUP_SUFFIX);
    PathBuf::from(name)
}

/// Rewrite an EPUB file in place, keeping a backup of the original.
///
/// The new archive is built entirely in memory, written to a temporary file
/// in the same directory and then renamed over the original. On any error
/// the original file is left byte-for-byte as it was.
pub fn crush_file(path: impl AsRef<Path>, config: &CrushConfig) -> Result<CrushReport> {
    let path = path.as_ref();
    let input = fs::read(path)?;
    let (mut output, mut report) = crush_with_report(&input, config)?;

    if config.recompress {
        if let Some(smaller) = recompress(&output, config) {
            output = smaller;
            report.output_size = output.len();
            report.recompressed = true;
        }
    }

    let backup = backup_path(path);
    fs::copy(path, &backup)?;
    replace_file(path, &output)?;
    report.backup = Some(backup);

    info!(
        path = %path.display(),
        kept = report.entries_kept,
        dropped = report.entries_dropped,
        blanked = report.documents_blanked,
        before = report.input_size,
        after = report.output_size,
        "crushed {:.1}%",
        report.savings_percent()
    );
    Ok(report)
}

/// Final `advzip` pass, kept only if the result is still a valid EPUB and
/// no larger.
fn recompress(archive: &[u8], config: &CrushConfig) -> Option<Vec<u8>> {
    let recompressed = match recompress_archive(archive, config.tool_timeout) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(error = %e, "skipping final recompression");
            return None;
        }
    };

    let valid = ZipArchive::new(Cursor::new(recompressed.as_slice()))
        .map_err(Error::from)
        .and_then(|mut a| check_mimetype(&mut a));
    match valid {
        Ok(()) if recompressed.len() <= archive.len() => Some(recompressed),
        Ok(()) => {
            debug!(
                before = archive.len(),
                after = recompressed.len(),
                "recompression did not help"
            );
            None
        }
        Err(e) => {
            warn!(error = %e, "recompressed archive rejected");
            None
        }
    }
}

/// Atomically replace `path` with `data`, keeping its permissions.
fn replace_file(path: &Path, data: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };

    let mut tmp = tempfile::Builder::new()
        .prefix(".epubcrush-")
        .suffix(".tmp")
        .tempfile_in(dir)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    fs::set_permissions(tmp.path(), fs::metadata(path)?.permissions())?;
    tmp.persist(path).map_err(|e| Error::Io(e.error))?;
    Ok(())
}
