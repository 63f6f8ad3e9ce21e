use super::PlatformId;
use serde::{Deserialize, Serialize};

/// How a rule matches a request's hostname.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostMatch {
    /// Full hostname equality (e.g. `gemini.google.com`).
    Host(String),
    /// Registrable domain equality: the last two labels of the hostname.
    Domain(String),
    /// Hostname substring.
    Contains(String),
}

impl HostMatch {
    /// Lower rank is more specific and is tried first.
    fn rank(&self) -> u8 {
        match self {
            HostMatch::Host(_) => 0,
            HostMatch::Domain(_) => 1,
            HostMatch::Contains(_) => 2,
        }
    }

    fn matches(&self, host: &str, registrable: &str) -> bool {
        match self {
            HostMatch::Host(h) => host == h,
            HostMatch::Domain(d) => registrable == d,
            HostMatch::Contains(s) => host.contains(s.as_str()),
        }
    }

    fn normalized(self) -> Self {
        match self {
            HostMatch::Host(h) => HostMatch::Host(h.to_ascii_lowercase()),
            HostMatch::Domain(d) => HostMatch::Domain(d.to_ascii_lowercase()),
            HostMatch::Contains(s) => HostMatch::Contains(s.to_ascii_lowercase()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostRule {
    #[serde(flatten)]
    pub matcher: HostMatch,
    pub platform: PlatformId,
}

impl HostRule {
    pub fn host(host: &str, platform: &str) -> Self {
        HostRule {
            matcher: HostMatch::Host(host.to_string()),
            platform: PlatformId::new(platform),
        }
    }

    pub fn domain(domain: &str, platform: &str) -> Self {
        HostRule {
            matcher: HostMatch::Domain(domain.to_string()),
            platform: PlatformId::new(platform),
        }
    }

    pub fn contains(fragment: &str, platform: &str) -> Self {
        HostRule {
            matcher: HostMatch::Contains(fragment.to_string()),
            platform: PlatformId::new(platform),
        }
    }
}

/// Subdomains whose platform differs from (or is absent for) their parent brand.
const BUILTIN_HOSTS: &[(&str, &str)] = &[
    ("gemini.google.com", "gemini"),
    ("bard.google.com", "gemini"),
    ("chat.deepseek.com", "deepseek"),
    ("copilot.microsoft.com", "copilot"),
    ("chat.openai.com", "chatgpt"),
];

const BUILTIN_DOMAINS: &[(&str, &str)] = &[
    ("chatgpt.com", "chatgpt"),
    ("openai.com", "chatgpt"),
    ("claude.ai", "claude"),
    ("anthropic.com", "claude"),
    ("deepseek.com", "deepseek"),
    ("grok.com", "grok"),
    ("x.ai", "grok"),
    ("poe.com", "poe"),
    ("perplexity.ai", "perplexity"),
    ("character.ai", "characterai"),
    ("huggingface.co", "huggingface"),
    ("replicate.com", "replicate"),
];

/// Maps a request URL to the platform it belongs to.
///
/// Rules are tried most-specific first (full host, then registrable domain,
/// then substring); within one kind, declaration order decides.
#[derive(Debug, Clone)]
pub struct Classifier {
    rules: Vec<HostRule>,
}

impl Classifier {
    pub fn new(rules: impl IntoIterator<Item = HostRule>) -> Self {
        let mut rules: Vec<HostRule> = rules
            .into_iter()
            .map(|r| HostRule {
                matcher: r.matcher.normalized(),
                platform: r.platform,
            })
            .collect();
        // stable: keeps declaration order inside each rank
        rules.sort_by_key(|r| r.matcher.rank());
        Classifier { rules }
    }

    pub fn builtin() -> Self {
        Self::new(Self::builtin_rules())
    }

    pub fn builtin_rules() -> Vec<HostRule> {
        BUILTIN_HOSTS
            .iter()
            .map(|&(h, p)| HostRule::host(h, p))
            .chain(BUILTIN_DOMAINS.iter().map(|&(d, p)| HostRule::domain(d, p)))
            .collect()
    }

    /// Builtin rules with `extra` rules taking precedence within their rank.
    pub fn builtin_with(extra: impl IntoIterator<Item = HostRule>) -> Self {
        let mut rules: Vec<HostRule> = extra.into_iter().collect();
        rules.extend(Self::builtin_rules());
        Self::new(rules)
    }

    /// Classify a URL. Malformed URLs and hostless URLs are unrecognized.
    pub fn classify(&self, url: &str) -> Option<PlatformId> {
        let host = extract_host(url)?;
        let registrable = registrable_domain(&host);
        self.rules
            .iter()
            .find(|r| r.matcher.matches(&host, registrable))
            .map(|r| r.platform.clone())
    }

    pub fn rules(&self) -> &[HostRule] {
        &self.rules
    }
}

fn extract_host(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let host = parsed.host_str()?;
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    if host.is_empty() { None } else { Some(host) }
}

/// Last two dot-separated labels of a hostname.
fn registrable_domain(host: &str) -> &str {
    let mut dots = host.rmatch_indices('.');
    match (dots.next(), dots.next()) {
        (Some(_), Some((second, _))) => &host[second + 1..],
        _ => host,
    }
}
