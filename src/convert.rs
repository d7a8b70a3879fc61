use crate::error::ConversionError;
use crate::options::{absolutize, ConversionOptions};
use crate::pdf::{Chrome, LaunchConfig, Page, RenderRequest, PRINT_COLOR_CSS};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::thread;
use tempfile::NamedTempFile;
use tracing::{debug, info};
use url::Url;

/// A PDF that was completely written to disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PdfFileWritten {
    pub path: PathBuf,
    pub size: u64,
}

impl PdfFileWritten {
    pub fn size_mb(&self) -> f64 {
        self.size as f64 / 1024.0 / 1024.0
    }
}

/// Resolves `input` to an absolute path of an existing file.
pub fn resolve_input(input: &Path) -> Result<PathBuf, ConversionError> {
    let not_found = || ConversionError::InputNotFound {
        path: input.to_path_buf(),
    };

    let path = absolutize(input).map_err(|_| not_found())?;
    if !path.is_file() {
        return Err(ConversionError::InputNotFound { path });
    }
    Ok(path)
}

/// Converts `options.input` to a PDF at `options.output` using a fresh
/// browser, which is shut down again before this returns.
pub fn convert(
    options: &ConversionOptions,
    launch: &LaunchConfig,
) -> Result<PdfFileWritten, ConversionError> {
    let input = resolve_input(&options.input)?;

    let chrome = Chrome::launch(launch).map_err(ConversionError::EngineLaunch)?;
    let page = chrome.new_page().map_err(ConversionError::EngineLaunch)?;

    render(&page, &input, options)
}

/// Runs the load, style, settle, print and persist steps on an open page.
pub fn render<P: Page>(
    page: &P,
    input: &Path,
    options: &ConversionOptions,
) -> Result<PdfFileWritten, ConversionError> {
    let url = Url::from_file_path(input).map_err(|_| ConversionError::InputNotFound {
        path: input.to_path_buf(),
    })?;

    let navigation = |source: anyhow::Error| ConversionError::Navigation {
        url: url.clone(),
        source,
    };

    info!(%url, "loading document");
    page.navigate(&url).map_err(navigation)?;

    if let Some(css) = &options.extra_css {
        debug!("injecting extra stylesheet");
        page.add_style(css).map_err(navigation)?;
    }
    page.add_style(PRINT_COLOR_CSS).map_err(navigation)?;

    if let Some(selector) = &options.wait_for {
        debug!(%selector, "waiting for element");
        page.wait_for_selector(selector).map_err(navigation)?;
    }

    if !options.wait.is_zero() {
        debug!(wait_ms = options.wait.as_millis() as u64, "letting the page settle");
        thread::sleep(options.wait);
    }

    let request = RenderRequest::from_options(options);
    debug!(?request, "printing to pdf");
    let bytes = page
        .print_to_pdf(&request)
        .map_err(ConversionError::Render)?;

    if !bytes.starts_with(b"%PDF-") {
        return Err(ConversionError::Render(anyhow::anyhow!(
            "browser returned {} bytes that are not a PDF document",
            bytes.len()
        )));
    }

    persist(&options.output, &bytes).map_err(|source| ConversionError::Write {
        path: options.output.clone(),
        source,
    })?;
    info!(path = %options.output.display(), size = bytes.len(), "pdf written");

    Ok(PdfFileWritten {
        path: options.output.clone(),
        size: bytes.len() as u64,
    })
}

/// Writes `bytes` next to `path` first and renames it into place, so `path`
/// is either the complete PDF or untouched. A replaced file keeps its
/// permissions; a new one gets the usual umask-filtered mode.
fn persist(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let dir = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    let mut file = temp_file_in(dir)?;
    file.write_all(bytes)?;
    if let Ok(existing) = fs::metadata(path) {
        file.as_file().set_permissions(existing.permissions())?;
    }
    file.as_file().sync_all()?;
    file.persist(path).map_err(|err| err.error)?;
    Ok(())
}

fn temp_file_in(dir: &Path) -> io::Result<NamedTempFile> {
    let mut builder = tempfile::Builder::new();
    builder.prefix(".html2pdf-").suffix(".pdf");

    // The mode is applied at open(2), so the process umask still filters it.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        builder.permissions(fs::Permissions::from_mode(0o666));
    }

    builder.tempfile_in(dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::{PageSize, PaperFormat};
    use std::cell::RefCell;
    use std::time::Duration;

    const PDF: &[u8] = b"%PDF-1.4\n%fake\n%%EOF\n";

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Navigate(Url),
        AddStyle(String),
        WaitFor(String),
        Print(RenderRequest),
    }

    #[derive(Default)]
    struct FakePage {
        calls: RefCell<Vec<Call>>,
        fail_navigation: bool,
        fail_print: bool,
        output: Option<Vec<u8>>,
    }

    impl FakePage {
        fn calls(&self) -> Vec<Call> {
            self.calls.borrow().clone()
        }
    }

    impl Page for FakePage {
        fn navigate(&self, url: &Url) -> anyhow::Result<()> {
            self.calls.borrow_mut().push(Call::Navigate(url.clone()));
            if self.fail_navigation {
                anyhow::bail!("net::ERR_FAILED");
            }
            Ok(())
        }

        fn add_style(&self, css: &str) -> anyhow::Result<()> {
            self.calls.borrow_mut().push(Call::AddStyle(css.to_string()));
            Ok(())
        }

        fn wait_for_selector(&self, selector: &str) -> anyhow::Result<()> {
            self.calls
                .borrow_mut()
                .push(Call::WaitFor(selector.to_string()));
            Ok(())
        }

        fn print_to_pdf(&self, request: &RenderRequest) -> anyhow::Result<Vec<u8>> {
            self.calls.borrow_mut().push(Call::Print(request.clone()));
            if self.fail_print {
                anyhow::bail!("Printing failed");
            }
            Ok(self.output.clone().unwrap_or_else(|| PDF.to_vec()))
        }
    }

    struct Fixture {
        dir: tempfile::TempDir,
        input: PathBuf,
        options: ConversionOptions,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("report.html");
        fs::write(&input, "<html><body>Hello</body></html>").unwrap();

        let mut options = ConversionOptions::new(&input, dir.path().join("report.pdf"));
        options.wait = Duration::ZERO;

        Fixture {
            dir,
            input,
            options,
        }
    }

    #[test]
    fn test_render_defaults() {
        let fixture = fixture();
        let page = FakePage::default();

        let written = render(&page, &fixture.input, &fixture.options).unwrap();

        assert_eq!(written.path, fixture.dir.path().join("report.pdf"));
        assert_eq!(written.size, PDF.len() as u64);
        assert_eq!(fs::read(&written.path).unwrap(), PDF);

        let url = Url::from_file_path(&fixture.input).unwrap();
        let request = RenderRequest::from_options(&fixture.options);
        assert_eq!(request.format, Some(PaperFormat::A4));
        assert_eq!(
            page.calls(),
            vec![
                Call::Navigate(url),
                Call::AddStyle(PRINT_COLOR_CSS.to_string()),
                Call::Print(request),
            ]
        );
    }

    #[test]
    fn test_render_injects_extra_css_before_print_colors() {
        let mut fixture = fixture();
        fixture.options.extra_css = Some("body { color: red; }".to_string());
        fixture.options.wait_for = Some("#chart".to_string());
        let page = FakePage::default();

        render(&page, &fixture.input, &fixture.options).unwrap();

        let calls = page.calls();
        assert_eq!(calls.len(), 5);
        assert_eq!(calls[1], Call::AddStyle("body { color: red; }".to_string()));
        assert_eq!(calls[2], Call::AddStyle(PRINT_COLOR_CSS.to_string()));
        assert_eq!(calls[3], Call::WaitFor("#chart".to_string()));
        assert!(matches!(calls[4], Call::Print(_)));
    }

    #[test]
    fn test_render_passes_request() {
        let mut fixture = fixture();
        fixture.options.page_size = PageSize::Custom {
            width: "8in".parse().unwrap(),
            height: "4in".parse().unwrap(),
        };
        fixture.options.header = true;
        let page = FakePage::default();

        render(&page, &fixture.input, &fixture.options).unwrap();

        let request = page
            .calls()
            .into_iter()
            .find_map(|call| match call {
                Call::Print(request) => Some(request),
                _ => None,
            })
            .unwrap();
        assert_eq!(request.format, None);
        assert!(request.display_header_footer);
        assert!(request.header_template.is_some());
        assert!(request.footer_template.is_none());
    }

    #[test]
    fn test_render_navigation_failure() {
        let fixture = fixture();
        let page = FakePage {
            fail_navigation: true,
            ..Default::default()
        };

        let err = render(&page, &fixture.input, &fixture.options).unwrap_err();
        assert!(matches!(err, ConversionError::Navigation { .. }));
        assert_eq!(page.calls().len(), 1);
        assert!(!fixture.options.output.exists());
    }

    #[test]
    fn test_render_failure() {
        let fixture = fixture();
        let page = FakePage {
            fail_print: true,
            ..Default::default()
        };

        let err = render(&page, &fixture.input, &fixture.options).unwrap_err();
        assert!(matches!(err, ConversionError::Render(_)));
        assert!(!fixture.options.output.exists());
    }

    #[test]
    fn test_render_rejects_non_pdf_output() {
        let fixture = fixture();
        let page = FakePage {
            output: Some(b"<html>".to_vec()),
            ..Default::default()
        };

        let err = render(&page, &fixture.input, &fixture.options).unwrap_err();
        assert!(matches!(err, ConversionError::Render(_)));
        assert!(!fixture.options.output.exists());
    }

    #[test]
    fn test_render_write_failure() {
        let mut fixture = fixture();
        fixture.options.output = fixture.dir.path().join("missing").join("report.pdf");
        let page = FakePage::default();

        let err = render(&page, &fixture.input, &fixture.options).unwrap_err();
        assert!(matches!(err, ConversionError::Write { .. }));
        assert!(!fixture.options.output.exists());
    }

    #[test]
    fn test_render_replaces_existing_output() {
        let fixture = fixture();
        fs::write(&fixture.options.output, "stale").unwrap();

        render(&FakePage::default(), &fixture.input, &fixture.options).unwrap();
        assert_eq!(fs::read(&fixture.options.output).unwrap(), PDF);
    }

    #[test]
    fn test_convert_missing_input() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("missing.html");
        let options = ConversionOptions::new(&input, dir.path().join("missing.pdf"));

        // Fails before a browser is launched, so this needs no Chrome install.
        let err = convert(&options, &LaunchConfig::default()).unwrap_err();
        match err {
            ConversionError::InputNotFound { path } => assert_eq!(path, input),
            err => panic!("unexpected error: {err}"),
        }
        assert!(!options.output.exists());
    }

    #[test]
    fn test_convert_launch_failure() {
        let fixture = fixture();
        let launch = LaunchConfig {
            executable: Some(fixture.dir.path().join("no-such-chrome")),
            ..Default::default()
        };

        let err = convert(&fixture.options, &launch).unwrap_err();
        assert!(matches!(err, ConversionError::EngineLaunch(_)), "{err:?}");
        assert!(!fixture.options.output.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_render_output_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let fixture = fixture();
        render(&FakePage::default(), &fixture.input, &fixture.options).unwrap();

        // Same mode a plain file write gets under the current umask.
        let reference = fixture.dir.path().join("reference.pdf");
        fs::write(&reference, PDF).unwrap();

        let mode = |path: &Path| fs::metadata(path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode(&fixture.options.output), mode(&reference));
    }

    #[cfg(unix)]
    #[test]
    fn test_render_keeps_permissions_of_replaced_output() {
        use std::os::unix::fs::PermissionsExt;

        let fixture = fixture();
        fs::write(&fixture.options.output, "stale").unwrap();
        fs::set_permissions(&fixture.options.output, fs::Permissions::from_mode(0o640)).unwrap();

        render(&FakePage::default(), &fixture.input, &fixture.options).unwrap();

        let mode = fs::metadata(&fixture.options.output)
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o640);
        assert_eq!(fs::read(&fixture.options.output).unwrap(), PDF);
    }

    #[test]
    fn test_resolve_input_rejects_directories() {
        let dir = tempfile::tempdir().unwrap();
        let err = resolve_input(dir.path()).unwrap_err();
        assert!(matches!(err, ConversionError::InputNotFound { .. }));
    }

    #[test]
    fn test_size_mb() {
        let written = PdfFileWritten {
            path: PathBuf::from("/tmp/report.pdf"),
            size: 3 * 1024 * 1024 / 2,
        };
        assert_eq!(format!("{:.2}", written.size_mb()), "1.50");
    }
}
