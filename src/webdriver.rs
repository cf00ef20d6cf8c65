use anyhow::{Context, Result};
use async_trait::async_trait;
use fantoccini::elements::Element;
use fantoccini::error::CmdError;
use fantoccini::key::Key;
use fantoccini::{Client, ClientBuilder, Locator};
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info};

use crate::driver::{PageDriver, Query, ScrollTarget};
use crate::types::{ElementDescriptor, ViewportSize};

/// Supported browser types
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum BrowserType {
    /// Mozilla Firefox
    Firefox,
    /// Google Chrome/Chromium
    Chrome,
}

impl std::str::FromStr for BrowserType {
    type Err = anyhow::Error;

    /// Parse browser type from string (case-insensitive)
    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "firefox" => Ok(BrowserType::Firefox),
            "chrome" | "chromium" => Ok(BrowserType::Chrome),
            _ => anyhow::bail!("Unsupported browser: {}", s),
        }
    }
}

impl BrowserType {
    /// Default WebDriver address for this browser type
    pub fn default_webdriver_url(&self) -> &'static str {
        match self {
            BrowserType::Firefox => "http://localhost:4444",
            BrowserType::Chrome => "http://localhost:9515",
        }
    }

    fn driver_name(&self) -> &'static str {
        match self {
            BrowserType::Firefox => "geckodriver",
            BrowserType::Chrome => "chromedriver",
        }
    }
}

/// How to open a browser session
#[derive(Debug, Clone)]
pub struct BrowserOptions {
    pub browser_type: BrowserType,
    /// Overrides the browser's default WebDriver address
    pub webdriver_url: Option<String>,
    pub viewport: Option<ViewportSize>,
    pub headless: bool,
}

impl BrowserOptions {
    pub fn new(browser_type: BrowserType) -> Self {
        Self {
            browser_type,
            webdriver_url: None,
            viewport: None,
            headless: true,
        }
    }

    pub fn webdriver_url(&self) -> String {
        self.webdriver_url
            .clone()
            .unwrap_or_else(|| self.browser_type.default_webdriver_url().to_string())
    }

    /// WebDriver capabilities for the session
    pub fn capabilities(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut caps = serde_json::Map::new();

        match self.browser_type {
            BrowserType::Firefox => {
                let mut args = Vec::new();
                if self.headless {
                    args.push("--headless".to_string());
                }
                if let Some(vp) = &self.viewport {
                    args.push(format!("--width={}", vp.width));
                    args.push(format!("--height={}", vp.height));
                }
                caps.insert("moz:firefoxOptions".to_string(), json!({ "args": args }));
            }
            BrowserType::Chrome => {
                let mut args = vec!["--no-sandbox".to_string()];
                if self.headless {
                    args.push("--headless=new".to_string());
                    args.push("--disable-gpu".to_string());
                    // Prevent shared memory issues
                    args.push("--disable-dev-shm-usage".to_string());
                }
                if let Some(vp) = &self.viewport {
                    args.push(format!("--window-size={},{}", vp.width, vp.height));
                }
                caps.insert("goog:chromeOptions".to_string(), json!({ "args": args }));
            }
        }

        caps
    }
}

/// Fresh attributes and geometry of one element, in [`ElementDescriptor`] shape
const DESCRIBE_SCRIPT: &str = r#"
    const el = arguments[0];
    const rect = el.getBoundingClientRect();
    const attr = (name) => el.getAttribute(name) || '';
    const cls = typeof el.className === 'string' ? el.className : attr('class');
    return {
        tag: el.tagName.toLowerCase(),
        role: attr('role'),
        type: attr('type'),
        class: cls || '',
        id: el.id || '',
        text: (el.innerText || el.textContent || '').trim(),
        placeholder: attr('placeholder'),
        value: typeof el.value === 'string' ? el.value : '',
        title: attr('title'),
        aria_label: attr('aria-label'),
        href: attr('href'),
        y: rect.top + window.scrollY,
        width: rect.width,
        height: rect.height,
        displayed: rect.width > 0 && rect.height > 0,
        enabled: !el.disabled
    };
"#;

/// Positional XPath from the document root, e.g. `/html[1]/body[1]/div[3]/button[1]`
const STRUCTURAL_PATH_SCRIPT: &str = r#"
    const parts = [];
    for (let el = arguments[0]; el && el.nodeType === 1; el = el.parentNode) {
        let index = 1;
        for (let s = el.previousElementSibling; s; s = s.previousElementSibling) {
            if (s.tagName === el.tagName) index++;
        }
        parts.unshift(el.tagName.toLowerCase() + '[' + index + ']');
    }
    return '/' + parts.join('/');
"#;

const READY_SCRIPT: &str = "return document.readyState === 'complete';";

/// DOM-level click, delivered even when an overlay covers the element
const SCRIPT_CLICK: &str = "arguments[0].click();";

/// WebDriver error codes of a native click that an overlay or layout swallowed
pub fn is_click_blocked(code: &str) -> bool {
    matches!(code, "element click intercepted" | "element not interactable")
}

/// Window scroll statement for a target
pub fn scroll_script(target: ScrollTarget) -> String {
    match target {
        ScrollTarget::Top => "window.scrollTo(0, 0);".to_string(),
        ScrollTarget::Bottom => "window.scrollTo(0, document.body.scrollHeight);".to_string(),
        ScrollTarget::Fraction(f) => format!(
            "window.scrollTo(0, document.body.scrollHeight * {});",
            f.clamp(0.0, 1.0)
        ),
        ScrollTarget::By(dy) => format!("window.scrollBy(0, {});", dy),
    }
}

/// WebDriver-backed browser session.
///
/// The WebDriver server (geckodriver or chromedriver) must already be running.
pub struct Browser {
    pub(crate) client: Client,
    browser_type: BrowserType,
}

impl Browser {
    /// Connect to a running WebDriver and open a session
    pub async fn connect(options: &BrowserOptions) -> Result<Self> {
        let webdriver_url = options.webdriver_url();
        info!("Connecting to {:?} WebDriver at {}", options.browser_type, webdriver_url);

        if !Self::is_webdriver_running(&webdriver_url).await {
            let driver_name = options.browser_type.driver_name();
            anyhow::bail!(
                "Cannot connect to {} WebDriver at {}.\n\
                Please ensure {} is running:\n\
                  For Firefox: geckodriver --port 4444\n\
                  For Chrome: chromedriver --port 9515",
                driver_name,
                webdriver_url,
                driver_name
            );
        }

        let client = ClientBuilder::rustls()
            .capabilities(options.capabilities())
            .connect(&webdriver_url)
            .await
            .context("Failed to connect to WebDriver")?;

        if let Some(vp) = &options.viewport {
            debug!("Setting viewport to {}x{}", vp.width, vp.height);
            if let Err(e) = client.set_window_size(vp.width, vp.height).await {
                debug!("Note: Could not set window size: {}", e);
            }
        }

        Ok(Browser {
            client,
            browser_type: options.browser_type,
        })
    }

    async fn is_webdriver_running(url: &str) -> bool {
        let status_url = format!("{}/status", url.trim_end_matches('/'));

        match reqwest::get(&status_url).await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    pub fn browser_type(&self) -> BrowserType {
        self.browser_type
    }

    /// Run a script with one element argument
    async fn execute_on(&self, script: &str, element: &Element) -> Result<serde_json::Value> {
        let arg = serde_json::to_value(element)?;
        self.client
            .execute(script, vec![arg])
            .await
            .context("Failed to execute script")
    }

    pub async fn close(self) -> Result<()> {
        self.client.close().await?;
        Ok(())
    }
}

#[async_trait]
impl PageDriver for Browser {
    type Node = Element;

    async fn find_nodes(&self, query: &Query) -> Result<Vec<Element>> {
        let locator = match query {
            Query::XPath(expr) => Locator::XPath(expr),
            Query::Css(selector) => Locator::Css(selector),
        };
        self.client
            .find_all(locator)
            .await
            .with_context(|| format!("Query failed: {}", query))
    }

    async fn describe(&self, node: &Element) -> Result<ElementDescriptor> {
        let raw = self.execute_on(DESCRIBE_SCRIPT, node).await?;
        let mut descriptor: ElementDescriptor =
            serde_json::from_value(raw).context("Unexpected element description")?;
        descriptor.text = ElementDescriptor::truncate_text(&descriptor.text);
        // The WebDriver visibility check also accounts for CSS and overflow
        descriptor.displayed = node.is_displayed().await?;
        Ok(descriptor)
    }

    async fn screenshot(&self, node: &Element) -> Result<Vec<u8>> {
        Ok(node.screenshot().await?)
    }

    async fn click(&self, node: &Element) -> Result<()> {
        match node.click().await {
            Ok(_) => Ok(()),
            Err(CmdError::Standard(e)) if is_click_blocked(e.error()) => {
                debug!("Native click blocked ({}), clicking via script", e);
                self.execute_on(SCRIPT_CLICK, node).await?;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn type_text(&self, node: &Element, text: &str, clear: bool) -> Result<()> {
        if clear {
            node.clear().await?;
        }
        node.send_keys(text).await?;
        Ok(())
    }

    async fn submit(&self, node: &Element) -> Result<()> {
        let enter: char = Key::Enter.into();
        node.send_keys(&enter.to_string()).await?;
        Ok(())
    }

    async fn current_address(&self) -> Result<String> {
        Ok(self.client.current_url().await?.to_string())
    }

    async fn viewport_height(&self) -> Result<f64> {
        let value = self
            .client
            .execute("return window.innerHeight;", vec![])
            .await?;
        value
            .as_f64()
            .context("window.innerHeight is not a number")
    }

    async fn structural_path(&self, node: &Element) -> Result<String> {
        let value = self.execute_on(STRUCTURAL_PATH_SCRIPT, node).await?;
        value
            .as_str()
            .map(str::to_string)
            .context("Structural path is not a string")
    }

    async fn scroll(&self, target: ScrollTarget) -> Result<()> {
        let script = scroll_script(target);
        debug!("Executing scroll: {}", script);
        self.client.execute(&script, vec![]).await?;
        Ok(())
    }

    async fn reload(&self) -> Result<()> {
        info!("Reloading page");
        self.client.refresh().await?;
        Ok(())
    }

    async fn goto(&self, url: &str) -> Result<()> {
        self.client.goto(url).await?;

        // Wait for the page to be ready; this helps avoid stale element references
        for _ in 0..20 {
            if self.is_page_ready().await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        Ok(())
    }

    async fn is_page_ready(&self) -> bool {
        match self.client.execute(READY_SCRIPT, vec![]).await {
            Ok(value) => value.as_bool().unwrap_or(false),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
#[path = "webdriver_test.rs"]
mod webdriver_test;
