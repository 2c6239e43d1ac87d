//! Chrome over the DevTools protocol via `headless_chrome`.
//!
//! `headless_chrome` is a blocking API, so every call runs on the blocking
//! pool through a per-context [`CallLane`] and the async side only ever
//! holds an `Arc<Tab>`. The tab's own default timeout bounds each blocking
//! wait, so a call abandoned by its caller still ends.

use std::ffi::OsStr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use browserclaw_config::BrowserConfig;
use browserclaw_core::capability::{BrowserCapability, BrowserLauncher, PageState};
use browserclaw_core::error::CapabilityError;
use headless_chrome::browser::tab::point::Point;
use headless_chrome::protocol::cdp::Page::CaptureScreenshotFormatOption;
use headless_chrome::{Browser, LaunchOptions, Tab};
use tracing::{debug, info, warn};

use crate::lane::CallLane;

/// How long Chrome may sit without DevTools traffic before the
/// connection is dropped. Sessions can idle for a long time between
/// chat messages.
const IDLE_BROWSER_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

const CHROME_ARGS: &[&str] = &[
    "--no-first-run",
    "--no-default-browser-check",
    "--disable-blink-features=AutomationControlled",
    "--disable-infobars",
    "--password-store=basic",
];

/// Find the Chrome binary the launcher would use.
pub fn locate_chrome(config: &BrowserConfig) -> Result<PathBuf, String> {
    match &config.chrome_path {
        Some(path) if path.exists() => Ok(path.clone()),
        Some(path) => Err(format!("configured chrome_path {} does not exist", path.display())),
        None => headless_chrome::browser::default_executable(),
    }
}

/// Default bound on any single DevTools wait inside a tab.
const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Launches one Chrome process per browsing context.
pub struct ChromeLauncher {
    config: Arc<BrowserConfig>,
    call_timeout: Duration,
}

impl ChromeLauncher {
    pub fn new(config: BrowserConfig) -> Self {
        Self {
            config: Arc::new(config),
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    /// Bound every blocking wait inside the tab (navigation, element and
    /// protocol round trips).
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    fn launch_options(config: &BrowserConfig) -> LaunchOptions<'static> {
        LaunchOptions {
            headless: config.headless,
            window_size: Some((config.viewport_width, config.viewport_height)),
            path: config.chrome_path.clone(),
            args: CHROME_ARGS.iter().map(OsStr::new).collect(),
            idle_browser_timeout: IDLE_BROWSER_TIMEOUT,
            ..Default::default()
        }
    }

    fn launch_blocking(
        config: &BrowserConfig,
        call_timeout: Duration,
    ) -> Result<(Browser, Arc<Tab>), CapabilityError> {
        let browser = Browser::new(Self::launch_options(config))
            .map_err(|e| CapabilityError::Launch(format!("{e:#}")))?;
        let tab = browser
            .new_tab()
            .map_err(|e| CapabilityError::Launch(format!("could not open a tab: {e:#}")))?;
        tab.set_default_timeout(call_timeout);

        if !config.user_agent.trim().is_empty() {
            tab.set_user_agent(&config.user_agent, Some("en-US,en"), None)
                .map_err(|e| CapabilityError::Launch(format!("could not set user agent: {e:#}")))?;
        }

        Ok((browser, tab))
    }
}

#[async_trait]
impl BrowserLauncher for ChromeLauncher {
    fn name(&self) -> &str {
        "chrome"
    }

    async fn launch(&self) -> Result<Box<dyn BrowserCapability>, CapabilityError> {
        let config = Arc::clone(&self.config);
        let call_timeout = self.call_timeout;
        let (browser, tab) = tokio::task::spawn_blocking(move || Self::launch_blocking(&config, call_timeout))
            .await
            .map_err(|e| CapabilityError::Launch(format!("launch task failed: {e}")))??;

        info!(
            headless = self.config.headless,
            width = self.config.viewport_width,
            height = self.config.viewport_height,
            call_timeout = ?self.call_timeout,
            "Chrome context launched"
        );
        Ok(Box::new(ChromeContext::new(
            browser,
            tab,
            Arc::clone(&self.config),
        )))
    }
}

struct Live {
    browser: Browser,
    tab: Arc<Tab>,
}

/// One Chrome process with a single active tab.
pub struct ChromeContext {
    live: Mutex<Option<Live>>,
    config: Arc<BrowserConfig>,
    /// Tab calls run strictly one after another, abandoned ones included.
    lane: CallLane,
}

impl ChromeContext {
    fn new(browser: Browser, tab: Arc<Tab>, config: Arc<BrowserConfig>) -> Self {
        Self {
            live: Mutex::new(Some(Live { browser, tab })),
            config,
            lane: CallLane::new(),
        }
    }

    fn tab(&self) -> Result<Arc<Tab>, CapabilityError> {
        let live = self.live.lock().unwrap_or_else(|p| p.into_inner());
        live.as_ref()
            .map(|l| Arc::clone(&l.tab))
            .ok_or(CapabilityError::Closed)
    }

    fn settle(&self) -> Duration {
        Duration::from_millis(self.config.settle_ms)
    }

    /// Run `f` against the tab in this context's call lane, mapping
    /// worker failures into an action failure named `action`.
    async fn with_tab<T, F>(&self, action: &'static str, f: F) -> Result<T, CapabilityError>
    where
        T: Send + 'static,
        F: FnOnce(&Tab) -> Result<T, CapabilityError> + Send + 'static,
    {
        let tab = self.tab()?;
        self.lane
            .run(move || f(tab.as_ref()))
            .await
            .map_err(|e| action_error(action, format!("worker failed: {e}")))?
    }
}

fn action_error(action: &str, reason: impl Into<String>) -> CapabilityError {
    CapabilityError::Action {
        action: action.to_string(),
        reason: reason.into(),
    }
}

fn scroll_script(dy: i32) -> String {
    format!("window.scrollBy(0, {dy})")
}

#[async_trait]
impl BrowserCapability for ChromeContext {
    async fn navigate(&self, url: &str) -> Result<PageState, CapabilityError> {
        let target = url.to_string();
        let settle = self.settle();
        let page = self
            .with_tab("navigation", move |tab| {
                tab.navigate_to(&target)
                    .and_then(|t| t.wait_until_navigated())
                    .map_err(|e| CapabilityError::Navigation {
                        url: target.clone(),
                        reason: format!("{e:#}"),
                    })?;
                std::thread::sleep(settle);
                Ok(PageState {
                    url: tab.get_url(),
                    title: tab.get_title().unwrap_or_default(),
                })
            })
            .await?;
        debug!(url = %page.url, title = %page.title, "Navigated");
        Ok(page)
    }

    async fn screenshot(&self) -> Result<Vec<u8>, CapabilityError> {
        let quality = self.config.screenshot_quality.min(100);
        self.with_tab("screenshot", move |tab| {
            tab.capture_screenshot(CaptureScreenshotFormatOption::Jpeg, Some(quality), None, true)
                .map_err(|e| CapabilityError::Screenshot(format!("{e:#}")))
        })
        .await
    }

    async fn click(&self, x: u32, y: u32) -> Result<(), CapabilityError> {
        let settle = self.settle();
        self.with_tab("click", move |tab| {
            tab.click_point(Point {
                x: f64::from(x),
                y: f64::from(y),
            })
            .map_err(|e| action_error("click", format!("{e:#}")))?;
            std::thread::sleep(settle);
            Ok(())
        })
        .await
    }

    async fn type_text(&self, text: &str) -> Result<(), CapabilityError> {
        let text = text.to_string();
        self.with_tab("type", move |tab| {
            tab.type_str(&text)
                .map_err(|e| action_error("type", format!("{e:#}")))?;
            Ok(())
        })
        .await
    }

    async fn press_key(&self, key: &str) -> Result<(), CapabilityError> {
        let key = key.to_string();
        let settle = self.settle();
        self.with_tab("key press", move |tab| {
            tab.press_key(&key)
                .map_err(|e| action_error("key press", format!("{key}: {e:#}")))?;
            std::thread::sleep(settle);
            Ok(())
        })
        .await
    }

    async fn scroll(&self, dy: i32) -> Result<(), CapabilityError> {
        self.with_tab("scroll", move |tab| {
            tab.evaluate(&scroll_script(dy), false)
                .map_err(|e| action_error("scroll", format!("{e:#}")))?;
            Ok(())
        })
        .await
    }

    async fn close(&self) -> Result<(), CapabilityError> {
        let taken = self.live.lock().unwrap_or_else(|p| p.into_inner()).take();
        let Some(live) = taken else {
            return Ok(());
        };

        // Dropping the Browser kills the process, which can block briefly.
        tokio::task::spawn_blocking(move || {
            if let Err(e) = live.tab.close(false) {
                warn!(error = %format!("{e:#}"), "Tab close failed, killing browser anyway");
            }
            drop(live.browser);
        })
        .await
        .map_err(|e| CapabilityError::Launch(format!("shutdown task failed: {e}")))?;

        debug!("Chrome context closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn launch_options_follow_config() {
        let config = BrowserConfig {
            headless: false,
            viewport_width: 1024,
            viewport_height: 768,
            chrome_path: Some(PathBuf::from("/opt/chrome/chrome")),
            ..Default::default()
        };
        let options = ChromeLauncher::launch_options(&config);
        assert!(!options.headless);
        assert_eq!(options.window_size, Some((1024, 768)));
        assert_eq!(options.path, Some(PathBuf::from("/opt/chrome/chrome")));
        assert!(options.args.contains(&OsStr::new("--no-first-run")));
        assert_eq!(options.idle_browser_timeout, IDLE_BROWSER_TIMEOUT);
    }

    #[test]
    fn scroll_script_is_signed() {
        assert_eq!(scroll_script(500), "window.scrollBy(0, 500)");
        assert_eq!(scroll_script(-500), "window.scrollBy(0, -500)");
    }

    #[test]
    fn missing_configured_binary_is_reported() {
        let config = BrowserConfig {
            chrome_path: Some(PathBuf::from("/definitely/not/here/chrome")),
            ..Default::default()
        };
        let err = locate_chrome(&config).unwrap_err();
        assert!(err.contains("does not exist"));
    }

    #[test]
    fn launcher_name() {
        assert_eq!(ChromeLauncher::new(BrowserConfig::default()).name(), "chrome");
    }

    #[test]
    fn call_timeout_is_configurable() {
        let launcher = ChromeLauncher::new(BrowserConfig::default());
        assert_eq!(launcher.call_timeout, DEFAULT_CALL_TIMEOUT);
        let launcher = launcher.with_call_timeout(Duration::from_secs(5));
        assert_eq!(launcher.call_timeout, Duration::from_secs(5));
    }
}
