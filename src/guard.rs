//! Allow/deny pre-flight check on the page's hostname.

use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDecision {
    Allowed,
    Denylisted,
    NotAllowlisted,
}

impl AccessDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, AccessDecision::Allowed)
    }

    pub fn reason(&self) -> &'static str {
        match self {
            AccessDecision::Allowed => "Domain allowed",
            AccessDecision::Denylisted => "Domain is denylisted. Agent will not run.",
            AccessDecision::NotAllowlisted => "Domain not in allowlist. Agent will not run.",
        }
    }
}

/// `hostname` equals `entry` or is a subdomain of it (dot boundary).
fn matches_entry(hostname: &str, entry: &str) -> bool {
    let entry = entry.trim().trim_end_matches('.').to_ascii_lowercase();
    if entry.is_empty() {
        return false;
    }
    hostname == entry
        || hostname
            .strip_suffix(entry.as_str())
            .is_some_and(|prefix| prefix.ends_with('.'))
}

fn matches_any(hostname: &str, list: &[String]) -> bool {
    list.iter().any(|entry| matches_entry(hostname, entry))
}

pub fn evaluate(hostname: &str, allowlist: &[String], denylist: &[String]) -> AccessDecision {
    let hostname = hostname.trim().trim_end_matches('.').to_ascii_lowercase();
    if matches_any(&hostname, denylist) {
        return AccessDecision::Denylisted;
    }
    let restricted = allowlist.iter().any(|entry| !entry.trim().is_empty());
    if restricted && !matches_any(&hostname, allowlist) {
        return AccessDecision::NotAllowlisted;
    }
    AccessDecision::Allowed
}

/// Denylist wins; a non-empty allowlist must then match; an empty one
/// places no restriction.
pub fn check_access(hostname: &str, allowlist: &[String], denylist: &[String]) -> bool {
    evaluate(hostname, allowlist, denylist).is_allowed()
}

/// Host part of a page URL, empty for URLs without one (`about:blank`).
pub fn hostname_of(page_url: &str) -> String {
    Url::parse(page_url)
        .ok()
        .and_then(|url| url.host_str().map(str::to_string))
        .unwrap_or_default()
}
