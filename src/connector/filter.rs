use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

/// Navigation resource types a [`RequestFilter`] can select on. Wire names
/// follow the extension webRequest vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    MainFrame,
    SubFrame,
    Stylesheet,
    Script,
    Image,
    #[serde(rename = "xmlhttprequest")]
    XmlHttpRequest,
    Other,
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResourceType::MainFrame => "main_frame",
            ResourceType::SubFrame => "sub_frame",
            ResourceType::Stylesheet => "stylesheet",
            ResourceType::Script => "script",
            ResourceType::Image => "image",
            ResourceType::XmlHttpRequest => "xmlhttprequest",
            ResourceType::Other => "other",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternError {
    pub pattern: String,
    pub message: String,
}

impl PatternError {
    fn new(pattern: &str, message: impl Into<String>) -> Self {
        Self {
            pattern: pattern.to_string(),
            message: message.into(),
        }
    }
}

impl fmt::Display for PatternError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid match pattern '{}': {}", self.pattern, self.message)
    }
}

impl std::error::Error for PatternError {}

#[derive(Debug, Clone, PartialEq, Eq)]
enum SchemePattern {
    /// `*://` form: http or https.
    Web,
    Exact(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum HostPattern {
    Any,
    /// `*.example.com` form: the domain itself or any subdomain.
    Suffix(String),
    Exact(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PatternRule {
    AllUrls,
    Parts {
        scheme: SchemePattern,
        host: HostPattern,
        path: String,
    },
}

/// Extension-style URL match pattern: `<all_urls>` or
/// `scheme://host/path`, where scheme may be `*` (http or https), host may
/// be `*` or `*.domain`, and the path glob treats `*` as "any characters".
///
/// The path glob is applied to the URL's path plus query string, so
/// `https://sso.example.com/login*` matches
/// `https://sso.example.com/login?redirect_uri=...`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlPattern {
    raw: String,
    rule: PatternRule,
}

impl UrlPattern {
    pub fn parse(pattern: &str) -> Result<Self, PatternError> {
        if pattern == "<all_urls>" {
            return Ok(Self {
                raw: pattern.to_string(),
                rule: PatternRule::AllUrls,
            });
        }

        let (scheme_part, rest) = pattern
            .split_once("://")
            .ok_or_else(|| PatternError::new(pattern, "missing '://'"))?;
        if scheme_part.is_empty() {
            return Err(PatternError::new(pattern, "missing scheme"));
        }
        let scheme = if scheme_part == "*" {
            SchemePattern::Web
        } else if scheme_part.contains('*') {
            return Err(PatternError::new(pattern, "scheme may only be '*' or literal"));
        } else {
            SchemePattern::Exact(scheme_part.to_ascii_lowercase())
        };

        let (host_part, path_part) = match rest.find('/') {
            Some(index) => (&rest[..index], &rest[index..]),
            None => return Err(PatternError::new(pattern, "missing path")),
        };
        let host = if host_part == "*" {
            HostPattern::Any
        } else if let Some(domain) = host_part.strip_prefix("*.") {
            if domain.is_empty() || domain.contains('*') {
                return Err(PatternError::new(pattern, "invalid host wildcard"));
            }
            HostPattern::Suffix(domain.to_ascii_lowercase())
        } else if host_part.contains('*') {
            return Err(PatternError::new(
                pattern,
                "host wildcard must be '*' or a '*.' prefix",
            ));
        } else if host_part.is_empty() {
            if scheme_part != "file" {
                return Err(PatternError::new(pattern, "missing host"));
            }
            HostPattern::Any
        } else {
            HostPattern::Exact(host_part.to_ascii_lowercase())
        };

        Ok(Self {
            raw: pattern.to_string(),
            rule: PatternRule::Parts {
                scheme,
                host,
                path: path_part.to_string(),
            },
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn matches(&self, url: &Url) -> bool {
        match &self.rule {
            PatternRule::AllUrls => true,
            PatternRule::Parts { scheme, host, path } => {
                let scheme_ok = match scheme {
                    SchemePattern::Web => matches!(url.scheme(), "http" | "https"),
                    SchemePattern::Exact(expected) => url.scheme() == expected,
                };
                if !scheme_ok {
                    return false;
                }

                let host_ok = match host {
                    HostPattern::Any => true,
                    HostPattern::Suffix(domain) => url.host_str().is_some_and(|actual| {
                        actual == domain || actual.ends_with(&format!(".{domain}"))
                    }),
                    HostPattern::Exact(expected) => {
                        url.host_str().is_some_and(|actual| actual == expected)
                    }
                };
                if !host_ok {
                    return false;
                }

                glob_match(path, &path_for_request(url))
            }
        }
    }

    /// Convenience over [`matches`](UrlPattern::matches) for callers holding
    /// an unparsed URL; unparseable URLs match nothing.
    pub fn matches_str(&self, url: &str) -> bool {
        Url::parse(url).map(|url| self.matches(&url)).unwrap_or(false)
    }
}

impl fmt::Display for UrlPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The path-plus-query string a pattern's path glob is applied to.
fn path_for_request(url: &Url) -> String {
    match url.query() {
        Some(query) => format!("{}?{}", url.path(), query),
        None => url.path().to_string(),
    }
}

fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    let mut p = 0;
    let mut t = 0;
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() && pattern[p] == '*' {
            backtrack = Some((p, t));
            p += 1;
        } else if p < pattern.len() && pattern[p] == text[t] {
            p += 1;
            t += 1;
        } else if let Some((star_p, star_t)) = backtrack {
            p = star_p + 1;
            t = star_t + 1;
            backtrack = Some((star_p, star_t + 1));
        } else {
            return false;
        }
    }
    while p < pattern.len() && pattern[p] == '*' {
        p += 1;
    }
    p == pattern.len()
}

/// Navigation-interception configuration owned by the connector: which URLs
/// to divert and which resource types count. Immutable once the connector
/// starts; the default resource set is top-level navigations only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestFilter {
    patterns: Vec<UrlPattern>,
    resource_types: Vec<ResourceType>,
}

impl RequestFilter {
    pub fn new(patterns: Vec<UrlPattern>) -> Self {
        Self {
            patterns,
            resource_types: vec![ResourceType::MainFrame],
        }
    }

    /// Parses every pattern string; the first malformed one fails the whole
    /// filter.
    pub fn parse<I, S>(patterns: I) -> Result<Self, PatternError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .map(|pattern| UrlPattern::parse(pattern.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(patterns))
    }

    pub fn with_resource_types(mut self, resource_types: Vec<ResourceType>) -> Self {
        self.resource_types = resource_types;
        self
    }

    pub fn patterns(&self) -> &[UrlPattern] {
        &self.patterns
    }

    pub fn resource_types(&self) -> &[ResourceType] {
        &self.resource_types
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn matches(&self, url: &Url, resource_type: ResourceType) -> bool {
        self.resource_types.contains(&resource_type)
            && self.patterns.iter().any(|pattern| pattern.matches(url))
    }

    pub fn matches_str(&self, url: &str, resource_type: ResourceType) -> bool {
        Url::parse(url)
            .map(|url| self.matches(&url, resource_type))
            .unwrap_or(false)
    }
}
