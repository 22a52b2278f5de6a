//! External collaborators: lossy image re-encoders and the whole-archive
//! recompressor.
//!
//! Every tool runs on private temporary files under a bounded timeout.
//! Nothing here is fatal. A missing binary, a non-zero exit or a timeout is
//! reported as a [`ToolError`], logged by the caller, and the entry falls
//! back to its original bytes.

use std::ffi::{OsStr, OsString};
use std::fs;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::PathBuf;
use std::process::{Command, ExitStatus, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, warn};

use crate::config::CrushConfig;
pub use crate::util::RasterFormat;
use crate::util::sniff_raster;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Width of the pngquant quality range below the target quality.
const PNG_QUALITY_SPREAD: u8 = 25;

#[derive(Error, Debug)]
pub enum ToolError {
    #[error("{0} is not installed")]
    Unavailable(&'static str),

    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("{program} exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: ExitStatus,
        stderr: String,
    },

    #[error("{program} timed out after {timeout:?}")]
    TimedOut { program: String, timeout: Duration },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

// ============================================================================
// Process Runner
// ============================================================================

/// Command builder for one external tool invocation.
pub struct Cmd {
    program: OsString,
    args: Vec<OsString>,
    timeout: Duration,
}

impl Cmd {
    pub fn new<S: AsRef<OsStr>>(program: S) -> Self {
        Self {
            program: program.as_ref().to_owned(),
            args: Vec::new(),
            timeout: CrushConfig::default().tool_timeout,
        }
    }

    pub fn arg<S: AsRef<OsStr>>(mut self, arg: S) -> Self {
        self.args.push(arg.as_ref().to_owned());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_owned()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run to completion and require a zero exit status.
    pub fn run(self) -> Result<Output, ToolError> {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        let output = run_with_timeout(&mut command, self.timeout)?;

        if !output.status.success() {
            return Err(ToolError::Failed {
                program: self.program.to_string_lossy().into_owned(),
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(output)
    }
}

/// Run a command, killing it if it outlives `timeout`.
///
/// Standard output and error go to anonymous temporary files rather than
/// pipes, so a chatty child can never block on a full pipe while we poll.
pub fn run_with_timeout(command: &mut Command, timeout: Duration) -> Result<Output, ToolError> {
    let program = command.get_program().to_string_lossy().into_owned();
    let mut stdout = tempfile::tempfile()?;
    let mut stderr = tempfile::tempfile()?;

    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::from(stdout.try_clone()?))
        .stderr(Stdio::from(stderr.try_clone()?))
        .spawn()
        .map_err(|source| ToolError::Spawn {
            program: program.clone(),
            source,
        })?;

    let started = Instant::now();
    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        let elapsed = started.elapsed();
        if elapsed >= timeout {
            // The child may exit between try_wait and kill
            let _ = child.kill();
            let _ = child.wait();
            return Err(ToolError::TimedOut { program, timeout });
        }
        thread::sleep(POLL_INTERVAL.min(timeout - elapsed));
    };

    Ok(Output {
        status,
        stdout: read_all(&mut stdout)?,
        stderr: read_all(&mut stderr)?,
    })
}

fn read_all(file: &mut fs::File) -> io::Result<Vec<u8>> {
    file.seek(SeekFrom::Start(0))?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)?;
    Ok(buf)
}

/// Locate the first of `names` on `PATH`.
fn find_program(names: &[&str]) -> Option<PathBuf> {
    names.iter().find_map(|name| which::which(name).ok())
}

// ============================================================================
// Image Re-encoders
// ============================================================================

/// A lossy raster re-encoder.
pub trait Reencoder {
    /// Tool name for logs.
    fn name(&self) -> &'static str;

    /// Whether the tool can be found on this machine.
    fn is_available(&self) -> bool;

    fn supports(&self, format: RasterFormat) -> bool;

    /// Re-encode `data` at `quality` (0-100).
    fn reencode(
        &self,
        data: &[u8],
        format: RasterFormat,
        quality: u8,
        timeout: Duration,
    ) -> Result<Vec<u8>, ToolError>;
}

/// Private scratch directory holding the input image.
struct Scratch {
    dir: tempfile::TempDir,
    input: PathBuf,
}

impl Scratch {
    fn with_input(data: &[u8], format: RasterFormat) -> Result<Self, ToolError> {
        let dir = tempfile::Builder::new().prefix("epubcrush-").tempdir()?;
        let input = dir.path().join(format!("input.{}", format.extension()));
        fs::write(&input, data)?;
        Ok(Self { dir, input })
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }
}

/// `jpegoptim`, rewriting a JPEG in place with a maximum quality.
#[derive(Debug, Clone, Copy, Default)]
pub struct JpegOptim;

impl Reencoder for JpegOptim {
    fn name(&self) -> &'static str {
        "jpegoptim"
    }

    fn is_available(&self) -> bool {
        find_program(&["jpegoptim"]).is_some()
    }

    fn supports(&self, format: RasterFormat) -> bool {
        format == RasterFormat::Jpeg
    }

    fn reencode(
        &self,
        data: &[u8],
        format: RasterFormat,
        quality: u8,
        timeout: Duration,
    ) -> Result<Vec<u8>, ToolError> {
        let program = find_program(&["jpegoptim"]).ok_or(ToolError::Unavailable(self.name()))?;
        let scratch = Scratch::with_input(data, format)?;

        Cmd::new(program)
            .arg(format!("--max={quality}"))
            .args(["--strip-all", "--quiet"])
            .arg(&scratch.input)
            .timeout(timeout)
            .run()?;

        Ok(fs::read(&scratch.input)?)
    }
}

/// `pngquant`, quantizing a PNG into a quality range ending at the target.
#[derive(Debug, Clone, Copy, Default)]
pub struct PngQuant;

impl Reencoder for PngQuant {
    fn name(&self) -> &'static str {
        "pngquant"
    }

    fn is_available(&self) -> bool {
        find_program(&["pngquant"]).is_some()
    }

    fn supports(&self, format: RasterFormat) -> bool {
        format == RasterFormat::Png
    }

    fn reencode(
        &self,
        data: &[u8],
        format: RasterFormat,
        quality: u8,
        timeout: Duration,
    ) -> Result<Vec<u8>, ToolError> {
        let program = find_program(&["pngquant"]).ok_or(ToolError::Unavailable(self.name()))?;
        let scratch = Scratch::with_input(data, format)?;
        let output = scratch.path("output.png");
        let min = quality.saturating_sub(PNG_QUALITY_SPREAD);

        Cmd::new(program)
            .arg(format!("--quality={min}-{quality}"))
            .args(["--force", "--strip", "--output"])
            .arg(&output)
            .arg(&scratch.input)
            .timeout(timeout)
            .run()?;

        Ok(fs::read(&output)?)
    }
}

/// ImageMagick (`magick`, or `convert` for version 6). Only understands a
/// single quality value, so it is the fallback for both formats.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageMagick;

impl ImageMagick {
    fn program() -> Option<PathBuf> {
        find_program(&["magick", "convert"])
    }
}

impl Reencoder for ImageMagick {
    fn name(&self) -> &'static str {
        "imagemagick"
    }

    fn is_available(&self) -> bool {
        Self::program().is_some()
    }

    fn supports(&self, format: RasterFormat) -> bool {
        matches!(
            format,
            RasterFormat::Jpeg | RasterFormat::Png | RasterFormat::WebP
        )
    }

    fn reencode(
        &self,
        data: &[u8],
        format: RasterFormat,
        quality: u8,
        timeout: Duration,
    ) -> Result<Vec<u8>, ToolError> {
        let program = Self::program().ok_or(ToolError::Unavailable(self.name()))?;
        let scratch = Scratch::with_input(data, format)?;
        let output = scratch.path(&format!("output.{}", format.extension()));

        Cmd::new(program)
            .arg(&scratch.input)
            .arg("-strip")
            .arg("-quality")
            .arg(quality.to_string())
            .arg(&output)
            .timeout(timeout)
            .run()?;

        Ok(fs::read(&output)?)
    }
}

const JPEG_CHAIN: &[&dyn Reencoder] = &[&JpegOptim, &ImageMagick];
const PNG_CHAIN: &[&dyn Reencoder] = &[&PngQuant, &ImageMagick];
const WEBP_CHAIN: &[&dyn Reencoder] = &[&ImageMagick];

/// Primary tool first, then the fallback with reduced option support.
/// GIF has no lossy re-encoder.
fn default_chain(format: RasterFormat) -> &'static [&'static dyn Reencoder] {
    match format {
        RasterFormat::Jpeg => JPEG_CHAIN,
        RasterFormat::Png => PNG_CHAIN,
        RasterFormat::WebP => WEBP_CHAIN,
        RasterFormat::Gif => &[],
    }
}

/// Re-encode one archive image with the installed tools.
///
/// Returns `None` when the entry should pass through unchanged: unknown
/// format, no usable tool, or no tool produced a smaller result.
pub fn reencode_image(path: &str, data: &[u8], config: &CrushConfig) -> Option<Vec<u8>> {
    let format = sniff_raster(path, data)?;
    reencode_with(default_chain(format), path, data, format, config)
}

/// Try each re-encoder in order; first smaller, non-empty result wins.
pub fn reencode_with(
    chain: &[&dyn Reencoder],
    path: &str,
    data: &[u8],
    format: RasterFormat,
    config: &CrushConfig,
) -> Option<Vec<u8>> {
    if !chain.iter().any(|t| t.supports(format)) {
        debug!(path, format = format.extension(), "no re-encoder for format");
        return None;
    }

    for tool in chain.iter().filter(|t| t.supports(format)) {
        if !tool.is_available() {
            debug!(tool = tool.name(), path, "re-encoder unavailable");
            continue;
        }

        match tool.reencode(data, format, config.quality, config.tool_timeout) {
            Ok(out) if !out.is_empty() && out.len() < data.len() => {
                debug!(
                    tool = tool.name(),
                    path,
                    before = data.len(),
                    after = out.len(),
                    "re-encoded image"
                );
                return Some(out);
            }
            Ok(out) => {
                debug!(tool = tool.name(), path, size = out.len(), "re-encode did not shrink image");
                return None;
            }
            Err(e) => warn!(tool = tool.name(), path, error = %e, "re-encode failed"),
        }
    }

    warn!(path, "image left at original quality");
    None
}

// ============================================================================
// Archive Recompressor
// ============================================================================

/// Recompress a whole archive with `advzip -z -4`.
///
/// Returns the recompressed bytes; the caller decides whether to keep them.
pub fn recompress_archive(archive: &[u8], timeout: Duration) -> Result<Vec<u8>, ToolError> {
    let program = find_program(&["advzip"]).ok_or(ToolError::Unavailable("advzip"))?;
    let dir = tempfile::Builder::new().prefix("epubcrush-").tempdir()?;
    let path = dir.path().join("archive.epub");
    fs::write(&path, archive)?;

    Cmd::new(program)
        .args(["-z", "-4", "-q"])
        .arg(&path)
        .timeout(timeout)
        .run()?;

    Ok(fs::read(&path)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct Fake {
        available: bool,
        result: fn(&[u8]) -> Result<Vec<u8>, ToolError>,
        calls: Cell<usize>,
    }

    impl Fake {
        fn new(available: bool, result: fn(&[u8]) -> Result<Vec<u8>, ToolError>) -> Self {
            Self {
                available,
                result,
                calls: Cell::new(0),
            }
        }
    }

    impl Reencoder for Fake {
        fn name(&self) -> &'static str {
            "fake"
        }

        fn is_available(&self) -> bool {
            self.available
        }

        fn supports(&self, format: RasterFormat) -> bool {
            format != RasterFormat::Gif
        }

        fn reencode(
            &self,
            data: &[u8],
            _format: RasterFormat,
            _quality: u8,
            _timeout: Duration,
        ) -> Result<Vec<u8>, ToolError> {
            self.calls.set(self.calls.get() + 1);
            (self.result)(data)
        }
    }

    fn halve(data: &[u8]) -> Result<Vec<u8>, ToolError> {
        Ok(data[..data.len() / 2].to_vec())
    }

    fn grow(data: &[u8]) -> Result<Vec<u8>, ToolError> {
        Ok([data, data].concat())
    }

    fn fail(_: &[u8]) -> Result<Vec<u8>, ToolError> {
        Err(ToolError::Unavailable("fake"))
    }

    const JPEG: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 1, 2, 3, 4, 5, 6, 7, 8];

    fn config() -> CrushConfig {
        CrushConfig::default().with_images(true).with_quality(60)
    }

    #[test]
    fn test_first_available_tool_wins() {
        let missing = Fake::new(false, halve);
        let primary = Fake::new(true, halve);
        let fallback = Fake::new(true, halve);

        let out = reencode_with(&[&missing, &primary, &fallback], "a.jpg", JPEG, RasterFormat::Jpeg, &config());
        assert_eq!(out.as_deref(), Some(&JPEG[..JPEG.len() / 2]));
        assert_eq!(missing.calls.get(), 0);
        assert_eq!(primary.calls.get(), 1);
        assert_eq!(fallback.calls.get(), 0);
    }

    #[test]
    fn test_failure_falls_back() {
        let primary = Fake::new(true, fail);
        let fallback = Fake::new(true, halve);

        let out = reencode_with(&[&primary, &fallback], "a.jpg", JPEG, RasterFormat::Jpeg, &config());
        assert!(out.is_some());
        assert_eq!(fallback.calls.get(), 1);
    }

    #[test]
    fn test_larger_output_passes_through() {
        let primary = Fake::new(true, grow);
        let out = reencode_with(&[&primary], "a.jpg", JPEG, RasterFormat::Jpeg, &config());
        assert!(out.is_none());
    }

    #[test]
    fn test_nothing_available_passes_through() {
        let a = Fake::new(false, halve);
        let b = Fake::new(false, halve);
        assert!(reencode_with(&[&a, &b], "a.jpg", JPEG, RasterFormat::Jpeg, &config()).is_none());
        assert!(reencode_with(&[], "a.jpg", JPEG, RasterFormat::Jpeg, &config()).is_none());
    }

    #[test]
    fn test_unknown_format_is_skipped() {
        assert!(reencode_image("a.bin", b"not an image", &config()).is_none());
    }

    #[test]
    fn test_default_chains() {
        let names = |f| default_chain(f).iter().map(|t| t.name()).collect::<Vec<_>>();
        assert_eq!(names(RasterFormat::Jpeg), ["jpegoptim", "imagemagick"]);
        assert_eq!(names(RasterFormat::Png), ["pngquant", "imagemagick"]);
        assert_eq!(names(RasterFormat::WebP), ["imagemagick"]);
        assert!(names(RasterFormat::Gif).is_empty());
    }

    #[test]
    fn test_unsupported_format_is_never_attempted() {
        let tool = Fake::new(true, halve);
        let gif = b"GIF89a\x01\x00\x01\x00\x00\x00\x00";
        assert!(reencode_with(&[&tool], "a.gif", gif, RasterFormat::Gif, &config()).is_none());
        assert_eq!(tool.calls.get(), 0);

        for tool in default_chain(RasterFormat::Gif) {
            assert!(!tool.supports(RasterFormat::Gif));
        }
        assert!(ImageMagick.supports(RasterFormat::WebP));
        assert!(!ImageMagick.supports(RasterFormat::Gif));
    }

    #[test]
    fn test_missing_program_is_spawn_error() {
        let err = Cmd::new("epubcrush-no-such-tool-xyz").run().unwrap_err();
        assert!(matches!(err, ToolError::Spawn { .. }), "{err}");
    }

    #[cfg(unix)]
    #[test]
    fn test_output_is_captured() {
        let out = Cmd::new("sh")
            .args(["-c", "echo out; echo err >&2"])
            .run()
            .unwrap();
        assert_eq!(out.stdout, b"out\n");
        assert_eq!(out.stderr, b"err\n");
    }

    #[cfg(unix)]
    #[test]
    fn test_non_zero_exit_is_failure() {
        let err = Cmd::new("sh").args(["-c", "echo bad >&2; exit 3"]).run().unwrap_err();
        match err {
            ToolError::Failed { stderr, status, .. } => {
                assert_eq!(stderr, "bad");
                assert_eq!(status.code(), Some(3));
            }
            other => panic!("expected failure, got {other}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_timeout_kills_the_child() {
        let started = Instant::now();
        let err = Cmd::new("sleep")
            .arg("5")
            .timeout(Duration::from_millis(100))
            .run()
            .unwrap_err();
        assert!(matches!(err, ToolError::TimedOut { .. }), "{err}");
        assert!(started.elapsed() < Duration::from_secs(4));
    }
}
