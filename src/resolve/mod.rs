use tracing::trace;
use url::Url;

// Schemes a crawl target may use; anything else (javascript:, data:,
// mailto:, ...) is dropped during resolution.
const NAVIGABLE_SCHEMES: [&str; 2] = ["http", "https"];

/// Resolves a candidate link string against the page it was discovered on.
///
/// Returns `None` for empty/whitespace-only strings, non-navigable schemes,
/// and anything that fails RFC 3986 reference resolution. Fragments never
/// distinguish crawl targets, so the fragment is stripped from the result;
/// a fragment-only href resolves to the discovering page itself.
/// Protocol-relative references (`//host/path`) inherit the scheme of the
/// discovering page via `Url::join`. Resolution failure is a normal
/// filtering outcome, never an error.
pub fn resolve_candidate(raw: &str, base: &Url) -> Option<Url> {
    let candidate = raw.trim();
    if candidate.is_empty() {
        return None;
    }

    let mut resolved = match base.join(candidate) {
        Ok(url) => url,
        Err(e) => {
            trace!("Dropping unresolvable link '{}' on {}: {}", candidate, base, e);
            return None;
        }
    };

    if !NAVIGABLE_SCHEMES.contains(&resolved.scheme()) {
        trace!("Dropping non-navigable link '{}' on {}", candidate, base);
        return None;
    }

    resolved.set_fragment(None);
    Some(resolved)
}

/// Same-origin (or unrestricted) filter applied to resolved links before
/// enqueue.
///
/// Origin is derived once at crawl construction; a URL is in scope iff its
/// host/port tuple matches the base origin exactly — no subdomain wildcard.
#[derive(Debug, Clone)]
pub struct ScopePolicy {
    same_origin_only: bool,
    host: Option<String>,
    port: Option<u16>,
}

impl ScopePolicy {
    pub fn new(base: &Url, same_origin_only: bool) -> Self {
        Self {
            same_origin_only,
            host: base.host_str().map(|h| h.to_ascii_lowercase()),
            port: base.port_or_known_default(),
        }
    }

    /// Whether a resolved URL is eligible for enqueue.
    pub fn is_in_scope(&self, url: &Url) -> bool {
        if !self.same_origin_only {
            return true;
        }

        url.host_str().map(|h| h.to_ascii_lowercase()) == self.host
            && url.port_or_known_default() == self.port
    }
}
