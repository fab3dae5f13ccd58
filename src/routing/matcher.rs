//! Template matching: upstream path, host and header templates.
//!
//! # Responsibilities
//! - Parse path templates (`/api/{id}`, `/files/{*rest}`) at config load
//! - Match upstream paths in lockstep with the template, capturing placeholders
//! - Match header templates (`v{version}`) through named capture groups
//! - Match host header (case-insensitive, port optional)
//!
//! # Design Decisions
//! - Templates are compiled once; broken templates never reach the hot path
//! - Path matching walks template and path together, failing on the first
//!   literal mismatch; no regex in the path hot path
//! - A placeholder captures one segment; the last placeholder of a template
//!   (or an explicit `{*name}`) captures the remainder including slashes
//! - Case folding is ASCII-only so captured values keep their byte offsets

use axum::http::uri::Authority;
use axum::http::HeaderMap;
use regex::Regex;
use thiserror::Error;

/// A placeholder captured at match time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaceholderNameAndValue {
    /// Name without braces.
    pub name: String,
    pub value: String,
}

impl PlaceholderNameAndValue {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Reasons a template is rejected at load time.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("template must not be empty")]
    Empty,
    #[error("path template must start with '/'")]
    MissingLeadingSlash,
    #[error("empty placeholder at position {0}")]
    EmptyPlaceholder(usize),
    #[error("unclosed placeholder at position {0}")]
    UnclosedPlaceholder(usize),
    #[error("unexpected '}}' at position {0}")]
    UnexpectedClose(usize),
    #[error("invalid placeholder name {0}")]
    InvalidPlaceholderName(String),
    #[error("placeholder {0} declared more than once")]
    DuplicatePlaceholder(String),
    #[error("catch-all placeholder {0} must be last")]
    CatchAllNotLast(String),
    #[error("placeholders {0} and {1} are adjacent")]
    AdjacentPlaceholders(String, String),
    #[error("header template {0} does not compile: {1}")]
    InvalidHeaderPattern(String, String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Part {
    Literal(String),
    Segment(String),
    CatchAll(String),
}

impl Part {
    fn placeholder_name(&self) -> Option<&str> {
        match self {
            Part::Literal(_) => None,
            Part::Segment(name) | Part::CatchAll(name) => Some(name),
        }
    }
}

/// Tokenize a template into literal and placeholder parts.
/// Explicit catch-alls (`{*name}`) come back as `CatchAll`, all others as `Segment`.
fn tokenize(template: &str) -> Result<Vec<Part>, TemplateError> {
    let mut parts = Vec::new();
    let mut literal = String::new();
    let mut chars = template.char_indices();

    while let Some((pos, c)) = chars.next() {
        match c {
            '{' => {
                let close = template[pos..]
                    .find('}')
                    .map(|offset| pos + offset)
                    .ok_or(TemplateError::UnclosedPlaceholder(pos))?;
                let raw = &template[pos + 1..close];
                if raw.contains('{') {
                    return Err(TemplateError::UnclosedPlaceholder(pos));
                }
                let (catch_all, name) = match raw.strip_prefix('*') {
                    Some(rest) => (true, rest.trim()),
                    None => (false, raw.trim()),
                };
                if name.is_empty() {
                    return Err(TemplateError::EmptyPlaceholder(pos));
                }
                if name.contains('/') {
                    return Err(TemplateError::InvalidPlaceholderName(name.to_string()));
                }

                if literal.is_empty() {
                    if let Some(prev) = parts.last().and_then(Part::placeholder_name) {
                        return Err(TemplateError::AdjacentPlaceholders(prev.to_string(), name.to_string()));
                    }
                } else {
                    parts.push(Part::Literal(std::mem::take(&mut literal)));
                }

                parts.push(if catch_all {
                    Part::CatchAll(name.to_string())
                } else {
                    Part::Segment(name.to_string())
                });

                // skip to the closing brace
                for (p, _) in chars.by_ref() {
                    if p == close {
                        break;
                    }
                }
            }
            '}' => return Err(TemplateError::UnexpectedClose(pos)),
            other => literal.push(other),
        }
    }

    if !literal.is_empty() {
        parts.push(Part::Literal(literal));
    }

    let mut seen: Vec<&str> = Vec::new();
    for part in &parts {
        if let Some(name) = part.placeholder_name() {
            if seen.iter().any(|s| s.eq_ignore_ascii_case(name)) {
                return Err(TemplateError::DuplicatePlaceholder(name.to_string()));
            }
            seen.push(name);
        }
    }

    Ok(parts)
}

fn eq_case(a: &str, b: &str, case_sensitive: bool) -> bool {
    if case_sensitive {
        a == b
    } else {
        a.eq_ignore_ascii_case(b)
    }
}

/// A compiled upstream path template.
#[derive(Debug, Clone)]
pub struct PathTemplate {
    original: String,
    parts: Vec<Part>,
    case_sensitive: bool,
}

impl PathTemplate {
    /// Parse a path template.
    pub fn parse(template: &str, case_sensitive: bool) -> Result<Self, TemplateError> {
        if template.is_empty() {
            return Err(TemplateError::Empty);
        }
        if !template.starts_with('/') {
            return Err(TemplateError::MissingLeadingSlash);
        }

        let mut parts = tokenize(template)?;

        let last = parts.len() - 1;
        for (i, part) in parts.iter().enumerate() {
            if let Part::CatchAll(name) = part {
                if i != last {
                    return Err(TemplateError::CatchAllNotLast(name.clone()));
                }
            }
        }
        // A trailing placeholder consumes the remainder of the path.
        if let Some(Part::Segment(name)) = parts.last() {
            let name = name.clone();
            parts[last] = Part::CatchAll(name);
        }

        Ok(Self {
            original: template.to_string(),
            parts,
            case_sensitive,
        })
    }

    /// The template as configured.
    pub fn as_str(&self) -> &str {
        &self.original
    }

    /// Number of `/`-separated segments that contain no placeholder.
    pub fn literal_segments(&self) -> usize {
        self.original
            .split('/')
            .filter(|s| !s.is_empty() && !s.contains('{'))
            .count()
    }

    /// Number of placeholders, catch-all included.
    pub fn placeholder_count(&self) -> usize {
        self.parts.iter().filter(|p| p.placeholder_name().is_some()).count()
    }

    /// Whether the template ends in a placeholder that spans segments.
    pub fn has_catch_all(&self) -> bool {
        matches!(self.parts.last(), Some(Part::CatchAll(_)))
    }

    /// Placeholder names in declaration order.
    pub fn placeholder_names(&self) -> impl Iterator<Item = &str> {
        self.parts.iter().filter_map(Part::placeholder_name)
    }

    /// Match an upstream path, returning captured placeholders on success.
    pub fn matches(&self, path: &str) -> Option<Vec<PlaceholderNameAndValue>> {
        let mut rest = path;
        let mut placeholders = Vec::with_capacity(self.placeholder_count());

        for (i, part) in self.parts.iter().enumerate() {
            match part {
                Part::Literal(literal) => {
                    if let Some(Part::CatchAll(name)) = self.parts.get(i + 1) {
                        // `/files/{rest}` also accepts `/files` with an empty remainder.
                        let bare = literal.trim_end_matches('/');
                        if bare.len() < literal.len() && !bare.is_empty() && eq_case(rest, bare, self.case_sensitive) {
                            placeholders.push(PlaceholderNameAndValue::new(name.as_str(), ""));
                            return Some(placeholders);
                        }
                    }
                    let head = rest.get(..literal.len())?;
                    if !eq_case(head, literal, self.case_sensitive) {
                        return None;
                    }
                    rest = &rest[literal.len()..];
                }
                Part::Segment(name) => {
                    let segment_end = rest.find('/').unwrap_or(rest.len());
                    let segment = &rest[..segment_end];

                    // literal text sharing the segment, e.g. `.json` in `/{file}.json`
                    let suffix = match self.parts.get(i + 1) {
                        Some(Part::Literal(next)) => next.split('/').next().unwrap_or(""),
                        _ => "",
                    };
                    let value_len = segment.len().checked_sub(suffix.len())?;
                    let value = segment.get(..value_len)?;
                    if !eq_case(&segment[value_len..], suffix, self.case_sensitive) || value.is_empty() {
                        return None;
                    }

                    placeholders.push(PlaceholderNameAndValue::new(name.as_str(), value));
                    rest = &rest[value_len..];
                }
                Part::CatchAll(name) => {
                    placeholders.push(PlaceholderNameAndValue::new(name.as_str(), rest));
                    rest = "";
                }
            }
        }

        rest.is_empty().then_some(placeholders)
    }
}

/// Matches one upstream header against a value template.
#[derive(Debug, Clone)]
pub struct HeaderTemplate {
    name: String,
    pattern: Regex,
    placeholders: Vec<String>,
}

impl HeaderTemplate {
    /// Compile `template` into an anchored, case-insensitive pattern whose
    /// placeholders become named capture groups.
    pub fn parse(name: &str, template: &str) -> Result<Self, TemplateError> {
        let parts = tokenize(template)?;
        let mut pattern = String::from("^(?i)");
        let mut placeholders = Vec::new();

        for part in &parts {
            match part {
                Part::Literal(literal) => pattern.push_str(&regex::escape(literal)),
                Part::Segment(placeholder) | Part::CatchAll(placeholder) => {
                    if !placeholder.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                        return Err(TemplateError::InvalidPlaceholderName(placeholder.clone()));
                    }
                    pattern.push_str(&format!("(?P<{}>.+)", placeholder));
                    placeholders.push(placeholder.clone());
                }
            }
        }
        pattern.push('$');

        let pattern = Regex::new(&pattern)
            .map_err(|e| TemplateError::InvalidHeaderPattern(template.to_string(), e.to_string()))?;

        Ok(Self {
            name: name.to_ascii_lowercase(),
            pattern,
            placeholders,
        })
    }

    /// Header name this template applies to.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Placeholder names in declaration order.
    pub fn placeholder_names(&self) -> &[String] {
        &self.placeholders
    }

    /// Match the header's values; the first matching value wins.
    pub fn matches(&self, headers: &HeaderMap) -> Option<Vec<PlaceholderNameAndValue>> {
        headers
            .get_all(self.name.as_str())
            .iter()
            .filter_map(|v| v.to_str().ok())
            .find_map(|value| {
                let captures = self.pattern.captures(value)?;
                Some(
                    self.placeholders
                        .iter()
                        .filter_map(|p| {
                            captures
                                .name(p)
                                .map(|m| PlaceholderNameAndValue::new(p.as_str(), m.as_str()))
                        })
                        .collect(),
                )
            })
    }
}

/// Match every header template; all must match (conjunction).
/// An empty template list always passes.
pub fn match_headers(templates: &[HeaderTemplate], headers: &HeaderMap) -> Option<Vec<PlaceholderNameAndValue>> {
    let mut placeholders = Vec::new();
    for template in templates {
        placeholders.extend(template.matches(headers)?);
    }
    Some(placeholders)
}

/// Matches the Host header.
#[derive(Debug, Clone)]
pub struct HostMatcher {
    expected_host: String,
    has_port: bool,
}

impl HostMatcher {
    /// Create a new host matcher.
    /// The host is normalized to lowercase for case-insensitive matching.
    pub fn new(host: impl Into<String>) -> Self {
        let expected_host = host.into().to_lowercase();
        let has_port = expected_host
            .parse::<Authority>()
            .is_ok_and(|authority| authority.port().is_some());
        Self {
            expected_host,
            has_port,
        }
    }

    /// Returns true if the request host matches. Ports are ignored unless the
    /// template declares one.
    pub fn matches(&self, host: Option<&str>) -> bool {
        let Some(host) = host else {
            return false;
        };
        if self.has_port {
            return host.eq_ignore_ascii_case(&self.expected_host);
        }
        match host.parse::<Authority>() {
            Ok(authority) => authority.host().eq_ignore_ascii_case(&self.expected_host),
            Err(_) => host.eq_ignore_ascii_case(&self.expected_host),
        }
    }
}
