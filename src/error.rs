use thiserror::Error;

/// Errors that surface to the caller of a crawl.
///
/// Everything that can go wrong with a single page — timeouts, navigation
/// failures, extractor bugs, unparseable links — is absorbed into the
/// corresponding [`FetchRecord`](crate::record::FetchRecord) instead of being
/// raised. Only the two conditions below abort a crawl.
#[derive(Debug, Error)]
pub enum CrawlError {
    /// The configuration cannot describe a runnable crawl (bad base URL,
    /// zero workers, zero budget).
    #[error("invalid crawler configuration: {0}")]
    Config(String),

    /// The browser automation layer could not be brought up. Raised from
    /// `prepare()` and fatal to the whole crawl.
    #[error("failed to acquire browser resources: {0}")]
    ResourceAcquisition(String),
}
