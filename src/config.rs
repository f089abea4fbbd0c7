use std::path::PathBuf;
use std::time::Duration;
use url::Url;

use crate::error::CrawlError;

// Defaults for crawl sizing and timing
const DEFAULT_MAX_WORKERS: usize = 4;
const DEFAULT_MAX_VISITS: usize = 100;
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_CLAIM_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Readiness condition the browser waits for before a fetch is treated as
/// complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum WaitUntil {
    /// `document.readyState` has left `"loading"`.
    DomReady,
    /// The navigation's load lifecycle completed.
    Load,
    /// Load completed and the network stayed quiet for a short window.
    NetworkIdle,
}

/// Configuration for a single crawl run.
///
/// Allows customization of crawl scope, sizing, and browser behavior
/// including the worker/context pool size, the visit budget, same-origin
/// gating, and per-fetch timeouts.
#[derive(Debug, Clone)]
pub struct CrawlerConfig {
    /// Root URL: origin derivation and resolution fallback for seeds.
    pub base_url: String,

    /// Initial frontier contents; may be relative to `base_url`. Empty
    /// means crawl starts from `base_url` alone.
    pub seeds: Vec<String>,

    /// Size of the worker pool and the browser-context pool.
    pub max_workers: usize,

    /// Hard cap on total URLs fetched in one crawl.
    pub max_visits: usize,

    /// Restrict discovered links to the base origin's host/port.
    pub same_origin_only: bool,

    /// Per-fetch deadline covering navigation and readiness wait.
    pub request_timeout: Duration,

    /// How long an idle worker sleeps between frontier polls.
    pub claim_poll_interval: Duration,

    /// Whether the browser renders off-screen.
    pub headless: bool,

    /// Browser viewport width in pixels.
    pub viewport_width: u32,

    /// Browser viewport height in pixels.
    pub viewport_height: u32,

    /// Readiness condition for each fetch.
    pub wait_until: WaitUntil,

    /// Explicit Chrome/Chromium binary; auto-detected when `None`.
    pub chrome_executable: Option<PathBuf>,
}

impl CrawlerConfig {
    /// Creates a configuration rooted at the given base URL, with defaults
    /// for everything else.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Sets the initial seed URLs (absolute or relative to the base URL).
    pub fn with_seeds(mut self, seeds: Vec<String>) -> Self {
        self.seeds = seeds;
        self
    }

    /// Sets the worker/browser-context pool size.
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    /// Sets the hard cap on URLs fetched in this crawl.
    pub fn with_max_visits(mut self, max_visits: usize) -> Self {
        self.max_visits = max_visits;
        self
    }

    /// Enables or disables same-origin gating of discovered links.
    pub fn with_same_origin_only(mut self, same_origin_only: bool) -> Self {
        self.same_origin_only = same_origin_only;
        self
    }

    /// Sets the per-fetch timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the idle-worker frontier poll interval.
    pub fn with_claim_poll_interval(mut self, interval: Duration) -> Self {
        self.claim_poll_interval = interval;
        self
    }

    /// Sets whether the browser runs headless.
    pub fn with_headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    /// Sets the browser viewport dimensions.
    pub fn with_viewport(mut self, width: u32, height: u32) -> Self {
        self.viewport_width = width;
        self.viewport_height = height;
        self
    }

    /// Sets the readiness condition waited for on each fetch.
    pub fn with_wait_until(mut self, wait_until: WaitUntil) -> Self {
        self.wait_until = wait_until;
        self
    }

    /// Sets an explicit Chrome/Chromium executable path.
    pub fn with_chrome_executable(mut self, path: PathBuf) -> Self {
        self.chrome_executable = Some(path);
        self
    }

    /// Checks that the configuration describes a runnable crawl and returns
    /// the parsed base URL.
    pub fn validate(&self) -> Result<Url, CrawlError> {
        if self.max_workers < 1 {
            return Err(CrawlError::Config("max_workers must be at least 1".into()));
        }
        if self.max_visits < 1 {
            return Err(CrawlError::Config("max_visits must be at least 1".into()));
        }

        let base = Url::parse(&self.base_url)
            .map_err(|e| CrawlError::Config(format!("base_url '{}': {}", self.base_url, e)))?;

        if base.scheme() != "http" && base.scheme() != "https" {
            return Err(CrawlError::Config(format!(
                "base_url must be http or https, got '{}'",
                base.scheme()
            )));
        }
        if base.host_str().is_none() {
            return Err(CrawlError::Config(format!(
                "base_url '{}' has no host",
                self.base_url
            )));
        }

        Ok(base)
    }
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            seeds: Vec::new(),
            max_workers: DEFAULT_MAX_WORKERS,
            max_visits: DEFAULT_MAX_VISITS,
            same_origin_only: true,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            claim_poll_interval: DEFAULT_CLAIM_POLL_INTERVAL,
            headless: true,
            viewport_width: 1280,
            viewport_height: 800,
            wait_until: WaitUntil::Load,
            chrome_executable: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = CrawlerConfig::new("https://a.example")
            .with_seeds(vec!["/login".to_string()])
            .with_max_workers(2)
            .with_max_visits(25)
            .with_same_origin_only(false)
            .with_request_timeout(Duration::from_secs(10))
            .with_wait_until(WaitUntil::NetworkIdle);

        assert_eq!(config.base_url, "https://a.example");
        assert_eq!(config.seeds, vec!["/login".to_string()]);
        assert_eq!(config.max_workers, 2);
        assert_eq!(config.max_visits, 25);
        assert!(!config.same_origin_only);
        assert_eq!(config.request_timeout, Duration::from_secs(10));
        assert_eq!(config.wait_until, WaitUntil::NetworkIdle);
    }

    #[test]
    fn test_validate_accepts_http_base() {
        let base = CrawlerConfig::new("http://a.example:8080/app").validate();
        assert!(base.is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_config() {
        assert!(CrawlerConfig::new("not a url").validate().is_err());
        assert!(CrawlerConfig::new("ftp://a.example").validate().is_err());
        assert!(CrawlerConfig::new("https://a.example")
            .with_max_workers(0)
            .validate()
            .is_err());
        assert!(CrawlerConfig::new("https://a.example")
            .with_max_visits(0)
            .validate()
            .is_err());
    }
}
