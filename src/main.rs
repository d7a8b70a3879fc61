use crate::convert::convert;
use crate::length::Length;
use crate::options::{absolutize, default_output, ConversionOptions, Margins, PageSize, PaperFormat};
use crate::pdf::LaunchConfig;
use anyhow::Context;
use clap::ArgAction;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

mod convert;
mod error;
mod length;
mod options;
mod pdf;

/// Convert a local HTML file to PDF with headless Chrome.
#[derive(Debug, clap::Parser)]
#[command(version, disable_version_flag = true)]
struct Options {
    /// Input HTML file path
    input: PathBuf,
    /// Output PDF file path [default: <input name>.pdf]
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Page format
    #[arg(short, long, value_enum, ignore_case = true, default_value_t)]
    format: PaperFormat,
    /// Use landscape orientation
    #[arg(short, long)]
    landscape: bool,
    #[arg(long, default_value = "0")]
    margin_top: Length,
    #[arg(long, default_value = "0")]
    margin_bottom: Length,
    #[arg(long, default_value = "0")]
    margin_left: Length,
    #[arg(long, default_value = "0")]
    margin_right: Length,
    /// Print background graphics (default)
    #[arg(short, long, overrides_with = "no_background")]
    background: bool,
    /// Do not print background graphics
    #[arg(long)]
    no_background: bool,
    /// Scale of the webpage rendering
    #[arg(long, default_value_t = 1.0, value_parser = parse_scale)]
    scale: f64,
    /// Paper width, overrides --format
    #[arg(short, long, requires = "height")]
    width: Option<Length>,
    /// Paper height, overrides --format
    #[arg(long, requires = "width")]
    height: Option<Length>,
    /// Wait time in milliseconds before generating the PDF
    #[arg(long, default_value_t = 1000)]
    wait: u64,
    /// Wait for an element matching this CSS selector before the --wait delay
    #[arg(long, value_name = "SELECTOR")]
    wait_for: Option<String>,
    /// Additional CSS to inject
    #[arg(long)]
    css: Option<String>,
    /// Display a header with the document title
    #[arg(long)]
    header: bool,
    /// Display a footer with page numbers
    #[arg(long)]
    footer: bool,
    /// Page ranges to print, e.g. "1-5, 8, 11-13"
    #[arg(long)]
    range: Option<String>,
    /// Use the page size defined by the document's CSS
    #[arg(long)]
    prefer_css_page_size: bool,
    /// Chrome executable to launch
    #[arg(long, env = "CHROME", value_name = "PATH")]
    chrome: Option<PathBuf>,
    /// Keep the browser's OS sandbox enabled
    #[arg(long)]
    sandbox: bool,
    /// Log every conversion step to stderr
    #[arg(long)]
    verbose: bool,
    /// Print version
    #[arg(short = 'v', long, action = ArgAction::Version)]
    version: Option<bool>,
}

fn parse_scale(s: &str) -> Result<f64, String> {
    match s.parse::<f64>() {
        Ok(scale) if scale.is_finite() && scale > 0.0 => Ok(scale),
        _ => Err(format!("{s:?} is not a positive number")),
    }
}

impl Options {
    fn page_size(&self) -> PageSize {
        match (&self.width, &self.height) {
            (Some(width), Some(height)) => PageSize::Custom {
                width: width.clone(),
                height: height.clone(),
            },
            _ => PageSize::Format(self.format),
        }
    }

    fn launch_config(&self) -> LaunchConfig {
        LaunchConfig {
            executable: self.chrome.clone(),
            sandbox: self.sandbox,
            idle_timeout: Duration::from_millis(self.wait) + Duration::from_secs(60),
        }
    }

    fn conversion_options(&self) -> io::Result<ConversionOptions> {
        let output = match &self.output {
            Some(output) => output.clone(),
            None => default_output(&self.input),
        };

        let mut options = ConversionOptions::new(&self.input, absolutize(&output)?);
        options.page_size = self.page_size();
        options.landscape = self.landscape;
        options.margins = Margins {
            top: self.margin_top.clone(),
            bottom: self.margin_bottom.clone(),
            left: self.margin_left.clone(),
            right: self.margin_right.clone(),
        };
        options.print_background = self.background || !self.no_background;
        options.scale = self.scale;
        options.wait = Duration::from_millis(self.wait);
        options.wait_for = self.wait_for.clone();
        options.extra_css = self.css.clone();
        options.header = self.header;
        options.footer = self.footer;
        options.page_ranges = self.range.clone();
        options.prefer_css_page_size = self.prefer_css_page_size;
        Ok(options)
    }
}

fn settings_line(options: &ConversionOptions) -> String {
    let margins = &options.margins;
    format!(
        "⚙️  Settings: {} {}, margins: {}/{}/{}/{}",
        options.page_size,
        options.orientation(),
        margins.top,
        margins.right,
        margins.bottom,
        margins.left,
    )
}

fn run(opts: &Options) -> anyhow::Result<()> {
    let options = opts
        .conversion_options()
        .context("Failed to resolve the output path")?;

    println!("📄 Converting {} to PDF...", options.input.display());
    println!("{}", settings_line(&options));

    let written = convert(&options, &opts.launch_config())?;

    println!("✅ PDF generated successfully: {}", written.path.display());
    println!("📄 File size: {:.2} MB", written.size_mb());
    Ok(())
}

fn main() -> ExitCode {
    let opts: Options = clap::Parser::parse();

    let filter = if opts.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    match run(&opts) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("❌ Error generating PDF: {err:#}");
            ExitCode::FAILURE
        }
    }
}
