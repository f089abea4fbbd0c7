use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::trace;

/// The structured result of one page fetch attempt.
///
/// Created when a worker claims a URL, fully populated when the fetch
/// completes (success or failure), appended once to the [`RequestLog`] and
/// never mutated afterward.
#[derive(Debug, Clone, Serialize)]
pub struct FetchRecord {
    /// The claimed crawl target (queue/visited key).
    pub url: String,

    /// HTTP method of the navigation. Top-level navigations are GET.
    pub method: String,

    /// Status code of the main-document response; `None` on hard failure
    /// or when no response was observed.
    pub status: Option<u16>,

    /// Main-document response headers, keys lowercased.
    pub headers: HashMap<String, String>,

    /// URL of the hop that redirected to the final document, if the
    /// navigation was redirected.
    pub redirected_from: Option<String>,

    /// The landed URL, when it differs from `url`.
    pub final_url: Option<String>,

    /// Resolved, in-scope URLs discovered by this fetch, in first-seen
    /// order.
    pub links: Vec<String>,

    /// Error description on timeout or navigation failure.
    pub error: Option<String>,

    /// Wall-clock duration of the fetch in milliseconds.
    pub duration_ms: u64,

    /// When the fetch was started.
    pub fetched_at: DateTime<Utc>,
}

impl FetchRecord {
    /// Creates an empty record for a freshly claimed target.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: "GET".to_string(),
            status: None,
            headers: HashMap::new(),
            redirected_from: None,
            final_url: None,
            links: Vec::new(),
            error: None,
            duration_ms: 0,
            fetched_at: Utc::now(),
        }
    }
}

/// Append-only, thread-safe collection of [`FetchRecord`]s — the crawler's
/// primary output.
///
/// Cloning the log clones a handle to the same underlying storage; records
/// reflect completion order, not discovery order. A caller may either poll
/// [`snapshot`](Self::snapshot) after the crawl or [`subscribe`](Self::subscribe)
/// up front to stream records as they are appended.
#[derive(Clone, Default)]
pub struct RequestLog {
    records: Arc<Mutex<Vec<FetchRecord>>>,
    stream: Arc<Mutex<Option<mpsc::UnboundedSender<FetchRecord>>>>,
}

impl RequestLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one completed record, forwarding a copy to the streaming
    /// subscriber if one is attached.
    pub async fn append(&self, record: FetchRecord) {
        trace!("Appending fetch record for {}", record.url);

        {
            let mut stream = self.stream.lock().await;
            if let Some(tx) = stream.as_ref() {
                // Receiver gone means the subscriber lost interest; drop the
                // sender so later appends skip the clone.
                if tx.send(record.clone()).is_err() {
                    *stream = None;
                }
            }
        }

        self.records.lock().await.push(record);
    }

    /// Returns a copy of every record appended so far.
    pub async fn snapshot(&self) -> Vec<FetchRecord> {
        self.records.lock().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }

    /// Attaches a streaming subscriber. Records appended after this call are
    /// delivered on the returned channel as well as retained in the log.
    /// A later call replaces the previous subscriber.
    pub async fn subscribe(&self) -> mpsc::UnboundedReceiver<FetchRecord> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.stream.lock().await = Some(tx);
        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_append_and_snapshot() {
        let log = RequestLog::new();
        log.append(FetchRecord::new("https://a.example/")).await;
        log.append(FetchRecord::new("https://a.example/b")).await;

        let records = log.snapshot().await;
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].url, "https://a.example/");
        assert_eq!(records[1].url, "https://a.example/b");
        assert_eq!(log.len().await, 2);
    }

    #[tokio::test]
    async fn test_clone_shares_storage() {
        let log = RequestLog::new();
        let handle = log.clone();
        handle.append(FetchRecord::new("https://a.example/")).await;
        assert_eq!(log.len().await, 1);
    }

    #[tokio::test]
    async fn test_subscribe_streams_records() {
        let log = RequestLog::new();
        let mut rx = log.subscribe().await;

        log.append(FetchRecord::new("https://a.example/")).await;
        let streamed = rx.recv().await.expect("streamed record");
        assert_eq!(streamed.url, "https://a.example/");

        // Log retains the record too.
        assert_eq!(log.len().await, 1);
    }

    #[tokio::test]
    async fn test_dropped_subscriber_does_not_block_appends() {
        let log = RequestLog::new();
        let rx = log.subscribe().await;
        drop(rx);

        log.append(FetchRecord::new("https://a.example/")).await;
        log.append(FetchRecord::new("https://a.example/b")).await;
        assert_eq!(log.len().await, 2);
    }

    #[test]
    fn test_record_serializes_to_json() {
        let mut record = FetchRecord::new("https://a.example/");
        record.status = Some(200);
        record
            .headers
            .insert("content-type".to_string(), "text/html".to_string());

        let json = serde_json::to_string(&record).expect("serializable record");
        assert!(json.contains("\"url\":\"https://a.example/\""));
        assert!(json.contains("\"status\":200"));
        assert!(json.contains("\"method\":\"GET\""));
    }
}
