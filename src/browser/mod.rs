use anyhow::{anyhow, Context, Result};
use chromiumoxide::browser::{Browser, BrowserConfigBuilder, HeadlessMode};
use chromiumoxide::cdp::browser_protocol::network::{EventResponseReceived, ResourceType};
use chromiumoxide::listeners::EventStream;
use chromiumoxide::Page;
use futures::StreamExt;
use std::collections::HashMap;
use std::time::Duration;
use tempfile::TempDir;
use tokio::task::{self, JoinHandle};
use tokio::time::timeout;
use tracing::{debug, error, trace, warn};

use crate::config::{CrawlerConfig, WaitUntil};

// Extra headroom over the per-fetch deadline for CDP round trips.
const CDP_TIMEOUT_MARGIN: Duration = Duration::from_secs(5);
// Settle window after load when waiting for network idle.
const NETWORK_IDLE_QUIESCE: Duration = Duration::from_millis(500);
// How long to keep draining buffered response events after a navigation.
const EVENT_DRAIN_TIMEOUT: Duration = Duration::from_millis(200);
// Poll interval for document.readyState checks.
const READY_STATE_POLL: Duration = Duration::from_millis(50);
// Deadline for the post-failure health probe.
const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// What one rendered navigation produced.
#[derive(Debug)]
pub struct PageCapture {
    /// URL the browser actually landed on.
    pub final_url: String,
    /// Rendered markup of the landed page.
    pub markup: String,
    /// Main-document status code, when a matching response was observed.
    pub status: Option<u16>,
    /// Main-document response headers, keys lowercased.
    pub headers: HashMap<String, String>,
    /// URL of the hop that redirected to the final document, if any.
    pub redirected_from: Option<String>,
}

/// An isolated, stateful browser automation handle, exclusively owned by one
/// worker for the life of a crawl.
///
/// Each context is a dedicated headless Chrome process with its own
/// temporary profile directory — its own cookie and storage jar — plus the
/// CDP handler task driving it and a single reused page. Never shared
/// between workers.
pub struct BrowserContext {
    id: usize,
    browser: Browser,
    handler: JoinHandle<()>,
    page: Page,
    // Held so the profile directory outlives the browser process.
    _user_data_dir: TempDir,
}

impl BrowserContext {
    /// Launches a fresh browser process for one worker. Failure here is the
    /// crawl's one unrecoverable precondition.
    pub async fn launch(id: usize, config: &CrawlerConfig) -> Result<Self> {
        let user_data_dir = TempDir::new().context("Failed to create browser profile dir")?;
        debug!(
            "Launching browser context {} (headless: {}, profile: {})",
            id,
            config.headless,
            user_data_dir.path().display()
        );

        let mut builder = BrowserConfigBuilder::default()
            .request_timeout(config.request_timeout + CDP_TIMEOUT_MARGIN)
            .window_size(config.viewport_width, config.viewport_height)
            .user_data_dir(user_data_dir.path());

        builder = if config.headless {
            builder.headless_mode(HeadlessMode::default())
        } else {
            builder.with_head()
        };

        if let Some(ref chrome) = config.chrome_executable {
            builder = builder.chrome_executable(chrome);
        }

        for arg in browser_arguments() {
            builder = builder.arg(arg);
        }

        let browser_config = builder
            .build()
            .map_err(|e| anyhow!("Failed to build browser config: {e}"))?;

        let (browser, mut cdp_handler) = Browser::launch(browser_config)
            .await
            .context("Failed to launch browser")?;

        let handler = task::spawn(async move {
            while let Some(event) = cdp_handler.next().await {
                if let Err(e) = event {
                    let message = e.to_string();
                    // Chrome emits CDP events chromiumoxide does not model;
                    // those deserialization misses are not failures.
                    if message.contains("data did not match any variant of untagged enum Message") {
                        trace!("Suppressed benign CDP serialization error: {}", message);
                    } else {
                        error!("Browser handler error: {:?}", e);
                    }
                }
            }
            trace!("Browser handler stream ended");
        });

        let page = match browser.new_page("about:blank").await {
            Ok(page) => page,
            Err(e) => {
                let mut browser = browser;
                if let Err(close_err) = browser.close().await {
                    warn!("Failed to close browser after page setup error: {}", close_err);
                }
                handler.abort();
                return Err(e).context("Failed to open initial page");
            }
        };

        debug!("Browser context {} ready", id);
        Ok(Self {
            id,
            browser,
            handler,
            page,
            _user_data_dir: user_data_dir,
        })
    }

    /// Navigates to a URL, waits for the configured readiness condition, and
    /// captures the rendered markup plus main-document response metadata.
    ///
    /// The navigation and readiness wait share one deadline; exceeding it is
    /// reported as an error, as is any navigation failure. Both are per-page
    /// conditions the caller records rather than propagates.
    pub async fn fetch(
        &self,
        url: &str,
        wait_until: WaitUntil,
        deadline: Duration,
    ) -> Result<PageCapture> {
        trace!("Context {} fetching {}", self.id, url);

        // Subscribe before navigating so no response event is missed.
        let mut responses = self
            .page
            .event_listener::<EventResponseReceived>()
            .await
            .context("Failed to attach response listener")?;

        let navigation = async {
            self.page
                .goto(url)
                .await
                .with_context(|| format!("Failed to navigate to {}", url))?;

            match wait_until {
                WaitUntil::DomReady => self.wait_for_dom_ready().await?,
                WaitUntil::Load => {
                    self.page
                        .wait_for_navigation()
                        .await
                        .context("Failed to wait for page load")?;
                }
                WaitUntil::NetworkIdle => {
                    self.page
                        .wait_for_navigation()
                        .await
                        .context("Failed to wait for page load")?;
                    tokio::time::sleep(NETWORK_IDLE_QUIESCE).await;
                }
            }
            Ok::<(), anyhow::Error>(())
        };

        timeout(deadline, navigation)
            .await
            .map_err(|_| anyhow!("Fetch timed out after {:?}", deadline))??;

        let final_url = self
            .page
            .url()
            .await
            .context("Failed to read current URL")?
            .unwrap_or_else(|| url.to_string());

        let markup = self
            .page
            .content()
            .await
            .context("Failed to read page content")?;

        let (status, headers, redirected_from) =
            summarize_responses(&mut responses, url, &final_url).await;

        trace!(
            "Context {} fetched {} (status: {:?}, {} bytes)",
            self.id,
            final_url,
            status,
            markup.len()
        );

        Ok(PageCapture {
            final_url,
            markup,
            status,
            headers,
            redirected_from,
        })
    }

    async fn wait_for_dom_ready(&self) -> Result<()> {
        loop {
            let state: String = self
                .page
                .evaluate("document.readyState")
                .await
                .context("Failed to query document.readyState")?
                .into_value()
                .unwrap_or_default();

            if state != "loading" && !state.is_empty() {
                return Ok(());
            }
            tokio::time::sleep(READY_STATE_POLL).await;
        }
    }

    /// Probes whether the context can still execute trivial script. Used
    /// after a failed fetch to decide between a per-page error and a dead
    /// context.
    pub async fn is_healthy(&self) -> bool {
        match timeout(HEALTH_CHECK_TIMEOUT, self.page.evaluate("document.readyState")).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                debug!("Context {} failed health probe: {}", self.id, e);
                false
            }
            Err(_) => {
                debug!("Context {} health probe timed out", self.id);
                false
            }
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Tears the context down: browser process, CDP handler task, and (via
    /// drop) the temporary profile directory.
    pub async fn close(mut self) {
        debug!("Closing browser context {}", self.id);
        if let Err(e) = self.browser.close().await {
            warn!("Failed to close browser for context {}: {}", self.id, e);
        }
        self.handler.abort();
    }
}

/// Picks the main-document response out of the drained event stream.
///
/// Returns the status and lowercased headers of the response for the landed
/// URL (falling back to the requested URL), and the origin of the last
/// redirect hop when the navigation was redirected. Stops draining as soon
/// as the landed document's own response is seen; only when it never shows
/// up does the drain run until the stream goes quiet.
async fn summarize_responses(
    responses: &mut EventStream<EventResponseReceived>,
    requested: &str,
    final_url: &str,
) -> (Option<u16>, HashMap<String, String>, Option<String>) {
    let mut summary = ResponseSummary::new(requested, final_url);

    // Events for the finished navigation are already buffered.
    while let Ok(Some(event)) = timeout(EVENT_DRAIN_TIMEOUT, responses.next()).await {
        if !matches!(event.r#type, ResourceType::Document) {
            continue;
        }

        let settled = summary.observe(
            event.response.url.as_str(),
            u16::try_from(event.response.status).ok(),
            event.response.headers.inner(),
        );
        if settled {
            break;
        }
    }

    summary.finish()
}

/// Folds Document response events into the main-document status, lowercased
/// headers, and redirect origin for one navigation.
struct ResponseSummary {
    requested: String,
    final_url: String,
    status: Option<u16>,
    headers: HashMap<String, String>,
    last_redirect_origin: Option<String>,
}

impl ResponseSummary {
    fn new(requested: &str, final_url: &str) -> Self {
        Self {
            requested: requested.to_string(),
            final_url: final_url.to_string(),
            status: None,
            headers: HashMap::new(),
            last_redirect_origin: None,
        }
    }

    /// Feeds one Document response. Returns `true` once the landed
    /// document's own (non-redirect) response has been seen; later events
    /// cannot change the outcome.
    fn observe(&mut self, url: &str, status: Option<u16>, headers: &serde_json::Value) -> bool {
        if url == self.final_url || (self.status.is_none() && url == self.requested) {
            self.status = status;
            self.headers = lowercase_headers(headers);
        }

        let is_redirect = matches!(status, Some(s) if (300..400).contains(&s));
        if is_redirect {
            self.last_redirect_origin = Some(url.to_string());
        }

        url == self.final_url && !is_redirect
    }

    fn finish(self) -> (Option<u16>, HashMap<String, String>, Option<String>) {
        let redirected_from = if self.final_url != self.requested {
            self.last_redirect_origin.or(Some(self.requested))
        } else {
            None
        };
        (self.status, self.headers, redirected_from)
    }
}

fn lowercase_headers(raw: &serde_json::Value) -> HashMap<String, String> {
    let mut headers = HashMap::new();
    if let Some(object) = raw.as_object() {
        for (key, value) in object {
            let value = value
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| value.to_string());
            headers.insert(key.to_ascii_lowercase(), value);
        }
    }
    headers
}

// Chrome arguments tuned for unattended crawling; headless mode itself is
// handled by the config builder.
fn browser_arguments() -> Vec<String> {
    [
        "--no-sandbox",
        "--disable-gpu",
        "--disable-dev-shm-usage",
        "--disable-extensions",
        "--disable-notifications",
        "--disable-infobars",
        "--disable-popup-blocking",
        "--disable-background-networking",
        "--disable-background-timer-throttling",
        "--disable-backgrounding-occluded-windows",
        "--disable-breakpad",
        "--disable-component-extensions-with-background-pages",
        "--disable-features=TranslateUI",
        "--disable-ipc-flooding-protection",
        "--disable-renderer-backgrounding",
        "--disable-prompt-on-repost",
        "--disable-hang-monitor",
        "--no-first-run",
        "--no-default-browser-check",
        "--metrics-recording-only",
        "--mute-audio",
        "--hide-scrollbars",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_lowercase_headers_normalizes_keys() {
        let raw = json!({
            "Content-Type": "text/html; charset=utf-8",
            "X-Frame-Options": "DENY",
            "content-length": 1234,
        });

        let headers = lowercase_headers(&raw);
        assert_eq!(
            headers.get("content-type").map(String::as_str),
            Some("text/html; charset=utf-8")
        );
        assert_eq!(headers.get("x-frame-options").map(String::as_str), Some("DENY"));
        // Non-string values are rendered rather than dropped.
        assert_eq!(headers.get("content-length").map(String::as_str), Some("1234"));
        assert!(!headers.contains_key("Content-Type"));
    }

    #[test]
    fn test_response_summary_direct_hit_settles_immediately() {
        let mut summary = ResponseSummary::new("https://a.example/", "https://a.example/");

        let settled = summary.observe(
            "https://a.example/",
            Some(200),
            &json!({"Content-Type": "text/html"}),
        );
        assert!(settled, "a direct document response should end the drain");

        let (status, headers, redirected_from) = summary.finish();
        assert_eq!(status, Some(200));
        assert_eq!(headers.get("content-type").map(String::as_str), Some("text/html"));
        assert_eq!(redirected_from, None);
    }

    #[test]
    fn test_response_summary_tracks_redirect_chain() {
        let mut summary = ResponseSummary::new("https://a.example/old", "https://a.example/new");

        assert!(!summary.observe("https://a.example/old", Some(301), &json!({})));
        assert!(summary.observe(
            "https://a.example/new",
            Some(200),
            &json!({"Server": "nginx"}),
        ));

        let (status, headers, redirected_from) = summary.finish();
        assert_eq!(status, Some(200));
        assert_eq!(headers.get("server").map(String::as_str), Some("nginx"));
        assert_eq!(redirected_from, Some("https://a.example/old".to_string()));
    }

    #[test]
    fn test_response_summary_redirect_without_hop_event_falls_back() {
        // The navigation landed elsewhere but no 3xx hop was observed.
        let summary = ResponseSummary::new("https://a.example/old", "https://a.example/new");
        let (status, _, redirected_from) = summary.finish();
        assert_eq!(status, None);
        assert_eq!(redirected_from, Some("https://a.example/old".to_string()));
    }

    #[test]
    fn test_browser_arguments_are_flag_shaped() {
        for arg in browser_arguments() {
            assert!(arg.starts_with("--"), "unexpected argument: {}", arg);
        }
    }
}
