//! Concurrent, budget-bounded web crawler driven through a real browser.
//!
//! Pages are fetched by navigating headless Chrome over CDP rather than by
//! raw HTTP, so the crawl sees what a browser sees: executed scripts,
//! rendered markup, redirects, and per-navigation response metadata. Each
//! worker owns an isolated browser context with its own cookie jar; a shared
//! frontier hands out each URL at most once and enforces a hard visit
//! budget; every fetch, successful or not, lands in an append-only request
//! log.
//!
//! ```no_run
//! use recon_crawler::{Crawler, CrawlerConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = CrawlerConfig::new("https://target.example")
//!     .with_max_workers(4)
//!     .with_max_visits(50);
//!
//! let mut crawler = Crawler::new(config)?;
//! for record in crawler.run().await? {
//!     println!("{} -> {:?}", record.url, record.status);
//! }
//! # Ok(())
//! # }
//! ```

pub mod browser;
pub mod config;
pub mod crawler;
pub mod error;
pub mod extract;
pub mod frontier;
pub mod record;
pub mod resolve;
pub mod utils;

pub use browser::{BrowserContext, PageCapture};
pub use config::{CrawlerConfig, WaitUntil};
pub use crawler::{CrawlHandle, Crawler};
pub use error::CrawlError;
pub use extract::{collect_links, AttributeExtractor, DomExtractor, LinkExtractor};
pub use record::{FetchRecord, RequestLog};
pub use resolve::{resolve_candidate, ScopePolicy};
