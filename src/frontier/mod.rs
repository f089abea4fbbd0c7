use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, trace};

/// Outcome of a claim attempt against the frontier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Claim {
    /// A not-yet-visited URL, now marked visited and counted against the
    /// budget. The claiming worker must call [`Frontier::complete`] when it
    /// is done producing links for it.
    Url(String),
    /// No further work will ever be handed out: the budget is spent, the
    /// frontier drained with no fetch in flight, or a stop was requested.
    Exhausted,
}

#[derive(Debug, Default)]
struct FrontierState {
    queue: VecDeque<String>,
    visited: HashSet<String>,
    claimed: usize,
    in_flight: usize,
}

/// Coordination core of a crawl: the FIFO of URLs awaiting fetch, the
/// visited set, and the visit budget, all guarded by a single mutex.
///
/// The check-membership / insert / count step of [`claim`](Self::claim) is
/// one critical section, so two workers can never claim the same URL and the
/// budget can never be overrun under races. Idle claimers poll with a short
/// sleep instead of blocking, re-checking the shared stop flag each
/// iteration.
pub struct Frontier {
    inner: Mutex<FrontierState>,
    stop: AtomicBool,
    max_visits: usize,
    poll_interval: Duration,
}

impl Frontier {
    /// Creates a frontier seeded with the given URLs. Seeds are expected to
    /// be resolved, in-scope absolute URLs; duplicates are dropped.
    pub fn new(max_visits: usize, poll_interval: Duration, seeds: Vec<String>) -> Self {
        let mut queue = VecDeque::with_capacity(seeds.len());
        for seed in seeds {
            if !queue.contains(&seed) {
                queue.push_back(seed);
            }
        }

        Self {
            inner: Mutex::new(FrontierState {
                queue,
                ..FrontierState::default()
            }),
            stop: AtomicBool::new(false),
            max_visits,
            poll_interval,
        }
    }

    /// Claims the next unvisited URL, marking it visited and counting it
    /// against the budget in the same critical section.
    ///
    /// Blocks (politely, via short-interval polling) while the queue is
    /// transiently empty but other workers may still be producing links.
    /// Returns [`Claim::Exhausted`] once no further work can ever arrive.
    pub async fn claim(&self) -> Claim {
        loop {
            if self.stop.load(Ordering::Acquire) {
                return Claim::Exhausted;
            }

            {
                let mut state = self.inner.lock().await;

                if state.claimed >= self.max_visits {
                    drop(state);
                    debug!("Visit budget of {} reached, declaring exhaustion", self.max_visits);
                    self.request_stop();
                    return Claim::Exhausted;
                }

                while let Some(url) = state.queue.pop_front() {
                    if state.visited.insert(url.clone()) {
                        state.claimed += 1;
                        state.in_flight += 1;
                        trace!(
                            "Claimed {} ({}/{} of budget)",
                            url,
                            state.claimed,
                            self.max_visits
                        );
                        return Claim::Url(url);
                    }
                }

                // Queue empty. If nobody is mid-fetch, no new links can
                // appear and the crawl is naturally finished.
                if state.in_flight == 0 {
                    drop(state);
                    debug!("Frontier drained with no fetch in flight, declaring exhaustion");
                    self.request_stop();
                    return Claim::Exhausted;
                }
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Offers a URL to the frontier. No-op if the URL has been visited,
    /// already sits in the queue, or a stop has been requested. Returns
    /// whether the URL was actually enqueued.
    pub async fn enqueue(&self, url: &str) -> bool {
        if self.stop.load(Ordering::Acquire) {
            return false;
        }

        let mut state = self.inner.lock().await;
        if state.visited.contains(url) || state.queue.iter().any(|queued| queued == url) {
            return false;
        }

        state.queue.push_back(url.to_string());
        true
    }

    /// Marks one claimed fetch as finished producing links. Must be called
    /// exactly once per successful [`claim`](Self::claim), after any
    /// re-enqueues from that fetch.
    pub async fn complete(&self) {
        let mut state = self.inner.lock().await;
        state.in_flight = state.in_flight.saturating_sub(1);
    }

    /// Requests cooperative shutdown: no further claims will be honored
    /// anywhere, workers exit as soon as they observe the flag.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    /// Number of URLs claimed so far (equals the visited-set size).
    pub async fn claimed(&self) -> usize {
        self.inner.lock().await.claimed
    }
}
