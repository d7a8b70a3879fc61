use crate::length::Length;
use crate::options::{ConversionOptions, PageSize, PaperFormat};
use anyhow::{anyhow, Context};
use headless_chrome::protocol::cdp::types::Event;
use headless_chrome::protocol::cdp::Network;
use headless_chrome::protocol::cdp::Runtime::{RemoteObject, RemoteObjectSubtype};
use headless_chrome::types::PrintToPdfOptions;
use headless_chrome::{Browser, LaunchOptions, Tab};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info};
use url::Url;

pub const VIEWPORT: (u32, u32) = (1920, 1080);

const NAVIGATION_TIMEOUT: Duration = Duration::from_secs(30);
const NETWORK_QUIET_PERIOD: Duration = Duration::from_millis(500);
const NETWORK_POLL_INTERVAL: Duration = Duration::from_millis(100);

pub const HEADER_TEMPLATE: &str = r#"<div style="font-size: 10px; width: 100%; text-align: center;"><span class="title"></span></div>"#;
pub const FOOTER_TEMPLATE: &str = r#"<div style="font-size: 10px; width: 100%; text-align: center;">Page <span class="pageNumber"></span> of <span class="totalPages"></span></div>"#;

// Keeps Chrome from substituting its default date/url header or footer.
const EMPTY_TEMPLATE: &str = "<span></span>";

pub const PRINT_COLOR_CSS: &str = "@media print { * { -webkit-print-color-adjust: exact !important; print-color-adjust: exact !important; color-adjust: exact !important; } }";

/// The operations a conversion needs from a loaded browser page.
pub trait Page {
    /// Loads `url` and blocks until its resource loading has gone idle.
    fn navigate(&self, url: &Url) -> anyhow::Result<()>;

    fn add_style(&self, css: &str) -> anyhow::Result<()>;

    fn wait_for_selector(&self, selector: &str) -> anyhow::Result<()>;

    fn print_to_pdf(&self, request: &RenderRequest) -> anyhow::Result<Vec<u8>>;
}

#[derive(Debug, Clone, Default)]
pub struct LaunchConfig {
    pub executable: Option<PathBuf>,
    pub sandbox: bool,
    /// Longest stretch the browser may stay silent, see `--wait`.
    pub idle_timeout: Duration,
}

/// A headless Chrome process. The process is killed when this is dropped.
pub struct Chrome {
    browser: Browser,
}

impl Chrome {
    pub fn launch(config: &LaunchConfig) -> anyhow::Result<Chrome> {
        let options = LaunchOptions {
            headless: true,
            sandbox: config.sandbox,
            window_size: Some(VIEWPORT),
            path: config.executable.clone(),
            idle_browser_timeout: config.idle_timeout.max(NAVIGATION_TIMEOUT),
            ..Default::default()
        };

        let browser = Browser::new(options)?;
        info!(sandbox = config.sandbox, "browser started");
        Ok(Chrome { browser })
    }

    pub fn new_page(&self) -> anyhow::Result<ChromePage> {
        let tab = self.browser.new_tab()?;
        tab.set_default_timeout(NAVIGATION_TIMEOUT);
        Ok(ChromePage { tab })
    }
}

impl Drop for Chrome {
    fn drop(&mut self) {
        info!("closing browser");
    }
}

pub struct ChromePage {
    tab: Arc<Tab>,
}

impl ChromePage {
    fn evaluate(&self, expression: &str) -> anyhow::Result<RemoteObject> {
        let result = self.tab.evaluate(expression, false)?;
        check_script_result(result.subtype.as_ref(), result.description.as_deref())?;
        Ok(result)
    }

    fn load(&self, url: &Url, activity: &Mutex<NetworkActivity>) -> anyhow::Result<()> {
        self.tab.navigate_to(url.as_str())?;
        self.tab.wait_until_navigated()?;
        self.wait_for_network_idle(activity)
    }

    /// Waits until the document has loaded and no request has been in flight
    /// for `NETWORK_QUIET_PERIOD`.
    fn wait_for_network_idle(&self, activity: &Mutex<NetworkActivity>) -> anyhow::Result<()> {
        let started = Instant::now();

        loop {
            let ready = self
                .evaluate("document.readyState === 'complete'")?
                .value
                .and_then(|value| value.as_bool())
                .unwrap_or(false);

            let idle = activity
                .lock()
                .map_err(|_| anyhow!("network activity tracker was poisoned"))?
                .is_idle(Instant::now(), NETWORK_QUIET_PERIOD);

            if ready && idle {
                debug!("network idle");
                return Ok(());
            }

            if started.elapsed() >= NAVIGATION_TIMEOUT {
                return Err(anyhow!(
                    "network did not go idle within {}s",
                    NAVIGATION_TIMEOUT.as_secs()
                ));
            }
            thread::sleep(NETWORK_POLL_INTERVAL);
        }
    }
}

impl Page for ChromePage {
    fn navigate(&self, url: &Url) -> anyhow::Result<()> {
        let activity = Arc::new(Mutex::new(NetworkActivity::new(Instant::now())));

        let listener = {
            let activity = Arc::clone(&activity);
            self.tab.add_event_listener(Arc::new(move |event: &Event| {
                let Ok(mut activity) = activity.lock() else {
                    return;
                };
                match event {
                    Event::NetworkRequestWillBeSent(event) => {
                        activity.started(&event.params.request_id)
                    }
                    Event::NetworkLoadingFinished(event) => {
                        activity.finished(&event.params.request_id, Instant::now())
                    }
                    Event::NetworkLoadingFailed(event) => {
                        activity.finished(&event.params.request_id, Instant::now())
                    }
                    _ => {}
                }
            }))?
        };

        self.tab.call_method(Network::Enable {
            max_total_buffer_size: None,
            max_resource_buffer_size: None,
            max_post_data_size: None,
        })?;

        let result = self.load(url, &activity);
        self.tab.remove_event_listener(&listener)?;
        result
    }

    fn add_style(&self, css: &str) -> anyhow::Result<()> {
        let css = serde_json::to_string(css)?;
        let script = format!(
            "(() => {{ const style = document.createElement('style'); \
             style.textContent = {css}; \
             (document.head || document.documentElement).appendChild(style); }})()"
        );
        self.evaluate(&script).context("Failed to inject stylesheet")?;
        Ok(())
    }

    fn wait_for_selector(&self, selector: &str) -> anyhow::Result<()> {
        self.tab
            .wait_for_element(selector)
            .with_context(|| format!("No element matched {selector:?}"))?;
        Ok(())
    }

    fn print_to_pdf(&self, request: &RenderRequest) -> anyhow::Result<Vec<u8>> {
        self.tab.print_to_pdf(Some(request.to_print_options()))
    }
}

/// `Runtime.evaluate` reports a thrown exception as an `Error` object
/// instead of failing the call.
fn check_script_result(
    subtype: Option<&RemoteObjectSubtype>,
    description: Option<&str>,
) -> anyhow::Result<()> {
    match subtype {
        Some(RemoteObjectSubtype::Error) => Err(anyhow!(
            "script threw: {}",
            description.unwrap_or("unknown error")
        )),
        _ => Ok(()),
    }
}

/// Requests the page has started but not finished or failed yet.
#[derive(Debug)]
pub struct NetworkActivity {
    in_flight: HashSet<String>,
    quiet_since: Instant,
}

impl NetworkActivity {
    pub fn new(now: Instant) -> NetworkActivity {
        NetworkActivity {
            in_flight: HashSet::new(),
            quiet_since: now,
        }
    }

    pub fn started(&mut self, request_id: &str) {
        self.in_flight.insert(request_id.to_string());
    }

    /// Ids that were never seen starting are ignored.
    pub fn finished(&mut self, request_id: &str, now: Instant) {
        if self.in_flight.remove(request_id) && self.in_flight.is_empty() {
            self.quiet_since = now;
        }
    }

    pub fn is_idle(&self, now: Instant, quiet_period: Duration) -> bool {
        self.in_flight.is_empty() && now.saturating_duration_since(self.quiet_since) >= quiet_period
    }
}

/// The print settings sent to the browser for one document.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderRequest {
    /// `None` when explicit `width`/`height` are given.
    pub format: Option<PaperFormat>,
    pub width: Option<Length>,
    pub height: Option<Length>,
    pub landscape: bool,
    pub print_background: bool,
    pub scale: f64,
    pub margin_top: Length,
    pub margin_bottom: Length,
    pub margin_left: Length,
    pub margin_right: Length,
    pub display_header_footer: bool,
    pub header_template: Option<String>,
    pub footer_template: Option<String>,
    pub page_ranges: Option<String>,
    pub prefer_css_page_size: bool,
}

impl RenderRequest {
    pub fn from_options(options: &ConversionOptions) -> RenderRequest {
        let (format, width, height) = match &options.page_size {
            PageSize::Format(format) => (Some(*format), None, None),
            PageSize::Custom { width, height } => {
                (None, Some(width.clone()), Some(height.clone()))
            }
        };

        let display_header_footer = options.header || options.footer;

        let mut request = RenderRequest {
            format,
            width,
            height,
            landscape: options.landscape,
            print_background: options.print_background,
            scale: options.scale,
            margin_top: options.margins.top.clone(),
            margin_bottom: options.margins.bottom.clone(),
            margin_left: options.margins.left.clone(),
            margin_right: options.margins.right.clone(),
            display_header_footer,
            header_template: None,
            footer_template: None,
            page_ranges: options.page_ranges.clone(),
            prefer_css_page_size: options.prefer_css_page_size,
        };

        if display_header_footer {
            if options.header {
                request.header_template = Some(HEADER_TEMPLATE.to_string());
            }
            if options.footer {
                request.footer_template = Some(FOOTER_TEMPLATE.to_string());
            }
        }

        request
    }

    /// Paper width and height in inches, before orientation is applied.
    pub fn paper_size(&self) -> (f64, f64) {
        match (&self.width, &self.height) {
            (Some(width), Some(height)) => (width.to_inches(), height.to_inches()),
            _ => self.format.unwrap_or_default().dimensions(),
        }
    }

    pub fn to_print_options(&self) -> PrintToPdfOptions {
        let (paper_width, paper_height) = self.paper_size();

        let template = |template: &Option<String>| {
            self.display_header_footer.then(|| {
                template
                    .clone()
                    .unwrap_or_else(|| EMPTY_TEMPLATE.to_string())
            })
        };

        PrintToPdfOptions {
            landscape: Some(self.landscape),
            display_header_footer: Some(self.display_header_footer),
            print_background: Some(self.print_background),
            scale: Some(self.scale),
            paper_width: Some(paper_width),
            paper_height: Some(paper_height),
            margin_top: Some(self.margin_top.to_inches()),
            margin_bottom: Some(self.margin_bottom.to_inches()),
            margin_left: Some(self.margin_left.to_inches()),
            margin_right: Some(self.margin_right.to_inches()),
            page_ranges: self.page_ranges.clone(),
            header_template: template(&self.header_template),
            footer_template: template(&self.footer_template),
            prefer_css_page_size: Some(self.prefer_css_page_size),
            ..Default::default()
        }
    }
}
