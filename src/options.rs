use crate::length::Length;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Named paper sizes accepted by `--format`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum PaperFormat {
    #[default]
    #[value(name = "A4")]
    A4,
    #[value(name = "A3")]
    A3,
    #[value(name = "Letter")]
    Letter,
    #[value(name = "Legal")]
    Legal,
    #[value(name = "Tabloid")]
    Tabloid,
}

impl PaperFormat {
    /// Portrait width and height in inches.
    pub fn dimensions(self) -> (f64, f64) {
        match self {
            PaperFormat::A4 => (8.27, 11.7),
            PaperFormat::A3 => (11.7, 16.54),
            PaperFormat::Letter => (8.5, 11.0),
            PaperFormat::Legal => (8.5, 14.0),
            PaperFormat::Tabloid => (11.0, 17.0),
        }
    }
}

impl fmt::Display for PaperFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PaperFormat::A4 => "A4",
            PaperFormat::A3 => "A3",
            PaperFormat::Letter => "Letter",
            PaperFormat::Legal => "Legal",
            PaperFormat::Tabloid => "Tabloid",
        })
    }
}

/// Page dimensions come either from a named format or from an explicit
/// width/height pair, never both.
#[derive(Debug, Clone, PartialEq)]
pub enum PageSize {
    Format(PaperFormat),
    Custom { width: Length, height: Length },
}

impl Default for PageSize {
    fn default() -> Self {
        PageSize::Format(PaperFormat::default())
    }
}

impl fmt::Display for PageSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PageSize::Format(format) => format.fmt(f),
            PageSize::Custom { width, height } => write!(f, "{width}x{height}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Margins {
    pub top: Length,
    pub bottom: Length,
    pub left: Length,
    pub right: Length,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConversionOptions {
    pub input: PathBuf,
    /// Absolute destination path.
    pub output: PathBuf,
    pub page_size: PageSize,
    pub landscape: bool,
    pub margins: Margins,
    pub print_background: bool,
    pub scale: f64,
    pub wait: Duration,
    pub wait_for: Option<String>,
    pub extra_css: Option<String>,
    pub header: bool,
    pub footer: bool,
    pub page_ranges: Option<String>,
    pub prefer_css_page_size: bool,
}

impl ConversionOptions {
    /// Options with the command line defaults for everything except the paths.
    pub fn new(input: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        ConversionOptions {
            input: input.into(),
            output: output.into(),
            page_size: PageSize::default(),
            landscape: false,
            margins: Margins::default(),
            print_background: true,
            scale: 1.0,
            wait: Duration::from_millis(1000),
            wait_for: None,
            extra_css: None,
            header: false,
            footer: false,
            page_ranges: None,
            prefer_css_page_size: false,
        }
    }

    pub fn orientation(&self) -> &'static str {
        if self.landscape {
            "landscape"
        } else {
            "portrait"
        }
    }
}

/// `<input-basename>.pdf`, relative to the current directory.
pub fn default_output(input: &Path) -> PathBuf {
    let stem = input.file_stem().unwrap_or(input.as_os_str());
    let mut name = stem.to_os_string();
    name.push(".pdf");
    PathBuf::from(name)
}

pub fn absolutize(path: &Path) -> io::Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}
