use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::browser::BrowserContext;
use crate::config::{CrawlerConfig, WaitUntil};
use crate::error::CrawlError;
use crate::extract::{collect_links, AttributeExtractor, LinkExtractor};
use crate::frontier::{Claim, Frontier};
use crate::record::{FetchRecord, RequestLog};
use crate::resolve::{resolve_candidate, ScopePolicy};

/// Cheap cloneable handle for stopping a crawl from outside `run()`, e.g.
/// from a signal handler.
#[derive(Clone)]
pub struct CrawlHandle {
    frontier: Arc<Frontier>,
}

impl CrawlHandle {
    /// Requests cooperative shutdown. Workers finish their in-flight fetch,
    /// append its record, and exit; records already produced are retained.
    pub fn stop(&self) {
        self.frontier.request_stop();
    }

    pub fn is_stopped(&self) -> bool {
        self.frontier.is_stopped()
    }
}

// Everything a worker touches besides its own browser context.
struct WorkerShared {
    frontier: Arc<Frontier>,
    log: RequestLog,
    extractors: Vec<Arc<dyn LinkExtractor>>,
    scope: ScopePolicy,
    wait_until: WaitUntil,
    request_timeout: Duration,
}

/// A single crawl run: seeds in, [`FetchRecord`]s out.
///
/// Two-phase lifecycle: [`prepare`](Self::prepare) acquires every browser
/// context up front (the one unrecoverable precondition), then
/// [`run`](Self::run) starts all workers and blocks until the frontier
/// drains, the visit budget is spent, or a stop is requested. Teardown of
/// every context happens on all of those paths. A `Crawler` has no meaning
/// beyond its single run; construct a new one per crawl.
pub struct Crawler {
    config: CrawlerConfig,
    scope: ScopePolicy,
    frontier: Arc<Frontier>,
    log: RequestLog,
    extractors: Vec<Arc<dyn LinkExtractor>>,
    contexts: Vec<BrowserContext>,
}

impl Crawler {
    /// Builds a crawl from its configuration, deriving the scope origin and
    /// seeding the frontier. Seeds resolve against the base URL and pass
    /// through the same scope filter as discovered links; unusable seeds
    /// are logged and skipped.
    pub fn new(config: CrawlerConfig) -> Result<Self, CrawlError> {
        let base = config.validate()?;
        let scope = ScopePolicy::new(&base, config.same_origin_only);

        let seed_inputs = if config.seeds.is_empty() {
            vec![config.base_url.clone()]
        } else {
            config.seeds.clone()
        };

        let mut seeds = Vec::new();
        for raw in &seed_inputs {
            match resolve_candidate(raw, &base) {
                Some(resolved) if scope.is_in_scope(&resolved) => {
                    seeds.push(resolved.to_string());
                }
                Some(resolved) => {
                    warn!("Seed {} is out of scope, skipping", resolved);
                }
                None => {
                    warn!("Seed '{}' does not resolve to a navigable URL, skipping", raw);
                }
            }
        }
        if seeds.is_empty() {
            warn!("No usable seeds; the crawl will produce no records");
        }

        let frontier = Arc::new(Frontier::new(
            config.max_visits,
            config.claim_poll_interval,
            seeds,
        ));

        Ok(Self {
            config,
            scope,
            frontier,
            log: RequestLog::new(),
            extractors: Vec::new(),
            contexts: Vec::new(),
        })
    }

    /// Registers an additional link extractor. Extractors run in
    /// registration order; when none are registered, the built-in
    /// attribute extractor is used.
    pub fn with_extractor(mut self, extractor: Arc<dyn LinkExtractor>) -> Self {
        self.extractors.push(extractor);
        self
    }

    /// Handle for requesting an external stop while `run()` is in progress.
    pub fn stop_handle(&self) -> CrawlHandle {
        CrawlHandle {
            frontier: self.frontier.clone(),
        }
    }

    /// Handle onto the request log, usable for polling from another task.
    pub fn request_log(&self) -> RequestLog {
        self.log.clone()
    }

    /// Streams records as workers append them.
    pub async fn subscribe(&self) -> mpsc::UnboundedReceiver<FetchRecord> {
        self.log.subscribe().await
    }

    /// Acquires all browser contexts up front. If any launch fails, the
    /// contexts already acquired are closed and the whole crawl fails with
    /// [`CrawlError::ResourceAcquisition`].
    pub async fn prepare(&mut self) -> Result<(), CrawlError> {
        if !self.contexts.is_empty() {
            return Ok(());
        }

        info!("Acquiring {} browser contexts", self.config.max_workers);
        for worker_id in 0..self.config.max_workers {
            match BrowserContext::launch(worker_id, &self.config).await {
                Ok(context) => self.contexts.push(context),
                Err(e) => {
                    error!("Failed to launch browser context {}: {:#}", worker_id, e);
                    for context in self.contexts.drain(..) {
                        context.close().await;
                    }
                    return Err(CrawlError::ResourceAcquisition(format!("{e:#}")));
                }
            }
        }
        Ok(())
    }

    /// Runs the crawl to completion and returns every record produced.
    ///
    /// Calls [`prepare`](Self::prepare) if it has not run yet, starts one
    /// worker per context, and blocks until all workers have terminated.
    /// Always returns the records accumulated so far, however the crawl
    /// ended.
    pub async fn run(&mut self) -> Result<Vec<FetchRecord>, CrawlError> {
        self.prepare().await?;

        let extractors = if self.extractors.is_empty() {
            vec![Arc::new(AttributeExtractor) as Arc<dyn LinkExtractor>]
        } else {
            self.extractors.clone()
        };

        info!(
            "Starting crawl of {} with {} workers, budget {}",
            self.config.base_url,
            self.contexts.len(),
            self.config.max_visits
        );

        let shared = Arc::new(WorkerShared {
            frontier: self.frontier.clone(),
            log: self.log.clone(),
            extractors,
            scope: self.scope.clone(),
            wait_until: self.config.wait_until,
            request_timeout: self.config.request_timeout,
        });

        let mut handles = Vec::with_capacity(self.contexts.len());
        for context in self.contexts.drain(..) {
            let shared = shared.clone();
            let worker_id = context.id();
            handles.push(tokio::spawn(worker_loop(worker_id, context, shared)));
        }

        join_workers(&self.frontier, handles).await;

        info!("Crawl finished: {} fetches recorded", self.log.len().await);
        Ok(self.log.snapshot().await)
    }
}

/// Waits for every worker task, in completion order rather than spawn order.
///
/// A worker that dies between claim and complete leaves its in-flight slot
/// leaked, and idle peers would poll against it forever. Joining in
/// completion order means the dead worker is observed as soon as it dies,
/// whatever its position, and the stop request lets the peers exit.
async fn join_workers(frontier: &Frontier, handles: Vec<JoinHandle<()>>) {
    let mut handles: FuturesUnordered<_> = handles.into_iter().collect();
    while let Some(result) = handles.next().await {
        if let Err(e) = result {
            error!("Worker task terminated abnormally: {}", e);
            frontier.request_stop();
        }
    }
}

/// One worker's life: claim, fetch through its own browser context, extract
/// and re-enqueue, record, repeat until the frontier declares exhaustion.
/// The context is closed on every exit path.
async fn worker_loop(worker_id: usize, context: BrowserContext, shared: Arc<WorkerShared>) {
    debug!("Worker {} started", worker_id);

    loop {
        let url = match shared.frontier.claim().await {
            Claim::Url(url) => url,
            Claim::Exhausted => break,
        };

        debug!("Worker {} fetching {}", worker_id, url);
        let started = Instant::now();
        let mut record = FetchRecord::new(url.clone());
        let mut context_lost = false;

        match context
            .fetch(&url, shared.wait_until, shared.request_timeout)
            .await
        {
            Ok(capture) => {
                record.status = capture.status;
                record.headers = capture.headers;
                if capture.final_url != url {
                    record.final_url = Some(capture.final_url.clone());
                    record.redirected_from = capture.redirected_from;
                }

                // Discovered links resolve against the page actually landed
                // on; the claimed URL is always parseable as a fallback.
                match Url::parse(&capture.final_url).or_else(|_| Url::parse(&url)) {
                    Ok(page_url) => {
                        for candidate in collect_links(&shared.extractors, &capture.markup) {
                            let Some(resolved) = resolve_candidate(&candidate, &page_url) else {
                                continue;
                            };
                            if !shared.scope.is_in_scope(&resolved) {
                                continue;
                            }
                            let resolved = resolved.to_string();
                            if !record.links.contains(&resolved) {
                                shared.frontier.enqueue(&resolved).await;
                                record.links.push(resolved);
                            }
                        }
                    }
                    Err(e) => {
                        warn!(
                            "Worker {} cannot derive a base URL from {}: {}",
                            worker_id, capture.final_url, e
                        );
                    }
                }
            }
            Err(e) => {
                warn!("Worker {} fetch of {} failed: {:#}", worker_id, url, e);
                record.error = Some(format!("{e:#}"));

                if !context.is_healthy().await {
                    error!(
                        "Worker {} browser context is unusable, worker exiting",
                        worker_id
                    );
                    context_lost = true;
                }
            }
        }

        record.duration_ms = started.elapsed().as_millis() as u64;
        shared.log.append(record).await;
        shared.frontier.complete().await;

        if context_lost {
            break;
        }
    }

    context.close().await;
    debug!("Worker {} finished", worker_id);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_invalid_config() {
        assert!(matches!(
            Crawler::new(CrawlerConfig::new("not a url")),
            Err(CrawlError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_seeds_default_to_base_url() {
        let crawler = Crawler::new(CrawlerConfig::new("https://a.example/")).expect("crawler");
        assert_eq!(
            crawler.frontier.claim().await,
            Claim::Url("https://a.example/".to_string())
        );
    }

    #[tokio::test]
    async fn test_seeds_resolve_and_scope_filter() {
        let config = CrawlerConfig::new("https://a.example/").with_seeds(vec![
            "/admin".to_string(),
            "https://b.example/out-of-scope".to_string(),
            "javascript:void(0)".to_string(),
        ]);
        let crawler = Crawler::new(config).expect("crawler");

        assert_eq!(
            crawler.frontier.claim().await,
            Claim::Url("https://a.example/admin".to_string())
        );
        crawler.frontier.complete().await;
        assert_eq!(crawler.frontier.claim().await, Claim::Exhausted);
    }

    #[tokio::test]
    async fn test_dead_worker_does_not_hang_its_peers() {
        let frontier = Arc::new(Frontier::new(
            10,
            Duration::from_millis(2),
            vec![
                "https://a.example/".to_string(),
                "https://a.example/b".to_string(),
            ],
        ));

        // Claims a URL and dies before calling complete(), leaking its
        // in-flight slot.
        let dying = {
            let frontier = frontier.clone();
            tokio::spawn(async move {
                let _ = frontier.claim().await;
                panic!("browser context lost");
            })
        };

        // Drains the rest, then polls against the leaked slot.
        let peer = {
            let frontier = frontier.clone();
            tokio::spawn(async move {
                loop {
                    match frontier.claim().await {
                        Claim::Url(_) => frontier.complete().await,
                        Claim::Exhausted => break,
                    }
                }
            })
        };

        tokio::time::timeout(
            Duration::from_secs(5),
            join_workers(&frontier, vec![dying, peer]),
        )
        .await
        .expect("crawl must terminate despite the dead worker");
        assert!(frontier.is_stopped());
    }

    #[tokio::test]
    async fn test_stop_handle_reaches_frontier() {
        let crawler = Crawler::new(CrawlerConfig::new("https://a.example/")).expect("crawler");
        let handle = crawler.stop_handle();
        assert!(!handle.is_stopped());
        handle.stop();
        assert!(handle.is_stopped());
        assert_eq!(crawler.frontier.claim().await, Claim::Exhausted);
    }
}
