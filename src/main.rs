//! epubcrush - Shrink EPUB files in place

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tracing::error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use epubcrush::{CrushConfig, crush_file};

#[derive(Parser)]
#[command(name = "epubcrush")]
#[command(version, about = "Shrink EPUB files in place", long_about = None)]
#[command(after_help = "EXAMPLES:
    epubcrush book.epub                Keep text only (backup: book.epub.bak.epub)
    epubcrush -i -Q 60 *.epub          Keep images, re-encode them at quality 60
    epubcrush -s -f --fast book.epub   Keep styles and fonts, skip recompression")]
struct Cli {
    /// EPUB files to rewrite
    #[arg(value_name = "FILES", required = true)]
    files: Vec<PathBuf>,

    /// Keep images
    #[arg(short, long)]
    images: bool,

    /// Lossy re-encode quality for kept raster images (100 = untouched)
    #[arg(short = 'Q', long, default_value_t = 100,
          value_parser = clap::value_parser!(u8).range(0..=100))]
    quality: u8,

    /// Keep stylesheets and styling attributes
    #[arg(short, long)]
    styles: bool,

    /// Keep embedded fonts
    #[arg(short, long)]
    fonts: bool,

    /// Replace archaic and dated words with modern equivalents
    #[arg(short, long)]
    modernize: bool,

    /// Skip the final advzip recompression pass
    #[arg(long)]
    fast: bool,

    /// Timeout for each external tool invocation
    #[arg(long, value_name = "SECS", default_value_t = 60)]
    tool_timeout: u64,

    /// Print a JSON report line per file on stdout
    #[arg(long)]
    json: bool,

    /// Only log warnings and errors
    #[arg(short, long)]
    quiet: bool,
}

impl Cli {
    fn config(&self) -> CrushConfig {
        CrushConfig::default()
            .with_images(self.images)
            .with_quality(self.quality)
            .with_styles(self.styles)
            .with_fonts(self.fonts)
            .with_modernize(self.modernize)
            .with_recompress(!self.fast)
            .with_tool_timeout(Duration::from_secs(self.tool_timeout))
    }
}

fn init_logging(quiet: bool) {
    let default = if quiet { "epubcrush=warn" } else { "epubcrush=info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.quiet);

    let config = cli.config();
    let mut failed = 0usize;

    for path in &cli.files {
        match crush_file(path, &config) {
            Ok(report) if cli.json => {
                let line = serde_json::json!({ "path": path, "report": report });
                println!("{line}");
            }
            Ok(_) => {}
            Err(e) => {
                error!(path = %path.display(), "{e}");
                failed += 1;
            }
        }
    }

    if failed > 0 {
        error!("{failed} of {} files failed", cli.files.len());
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
