use std::borrow::Cow;
use url::Url;

/// Path fragments that indicate a chat/completion/generation endpoint.
const BUILTIN_PATTERNS: &[&str] = &[
    "/api/",
    "/backend-api/",
    "/chat",
    "/completion",
    "/conversation",
    "/generate",
    "/stream",
];

/// Cheap begin-time check deciding whether a request is worth tracking.
///
/// Errs toward recall; the [`Classifier`](super::Classifier) makes the
/// precise call when the request completes.
#[derive(Debug, Clone)]
pub struct Prefilter {
    patterns: Vec<String>,
    require_post: bool,
}

impl Prefilter {
    /// Prefilter for network-level observation: only POST requests qualify.
    pub fn network() -> Self {
        Prefilter {
            patterns: BUILTIN_PATTERNS.iter().map(|p| p.to_string()).collect(),
            require_post: true,
        }
    }

    /// Prefilter for in-page interception, where the method is not reported.
    pub fn page() -> Self {
        Prefilter {
            require_post: false,
            ..Self::network()
        }
    }

    pub fn with_patterns(mut self, extra: impl IntoIterator<Item = String>) -> Self {
        self.patterns
            .extend(extra.into_iter().map(|p| p.to_ascii_lowercase()));
        self
    }

    pub fn looks_like_ai_endpoint(&self, url: &str, method: Option<&str>) -> bool {
        if self.require_post && !method.is_some_and(|m| m.eq_ignore_ascii_case("POST")) {
            return false;
        }
        let path = request_path(url).to_ascii_lowercase();
        self.patterns.iter().any(|p| path.contains(p.as_str()))
    }
}

/// Path of an absolute URL. Relative URLs, as the page source reports them,
/// are already a path and are returned as-is.
fn request_path(url: &str) -> Cow<'_, str> {
    match Url::parse(url) {
        Ok(parsed) => Cow::Owned(parsed.path().to_string()),
        Err(_) => Cow::Borrowed(url),
    }
}
