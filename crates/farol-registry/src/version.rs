//! Version rule resolution
//!
//! Selects matching service versions from a candidate set. Versions are
//! ordered semver-descending with a lexicographic fallback for strings
//! that do not parse; rules are `exact`, `x.y.z+` (at least), a half-open
//! range `x.y.z-a.b.c`, or `latest` (the empty rule means `latest`).

use std::cmp::Ordering;

use farol_api::model::{
    VERSION_RULE_AT_LEAST_SUFFIX, VERSION_RULE_LATEST, VERSION_RULE_RANGE_SEPARATOR,
};
use farol_common::error::RegistryError;
use semver::Version;

/// One resolvable version of a service.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VersionCandidate {
    pub version: String,
    pub service_id: String,
    pub create_time: i64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VersionRule {
    Exact(String),
    AtLeast(String),
    /// Half-open range `[start, end)`.
    Range(String, String),
    Latest,
}

impl VersionRule {
    pub fn parse(rule: &str) -> Result<VersionRule, RegistryError> {
        let rule = rule.trim();
        if rule.is_empty() || rule == VERSION_RULE_LATEST {
            return Ok(VersionRule::Latest);
        }
        if let Some(start) = rule.strip_suffix(VERSION_RULE_AT_LEAST_SUFFIX) {
            if start.is_empty() {
                return Err(RegistryError::InvalidParameter(format!(
                    "version rule '{}' is invalid",
                    rule
                )));
            }
            return Ok(VersionRule::AtLeast(start.to_string()));
        }
        if let Some((start, end)) = rule.split_once(VERSION_RULE_RANGE_SEPARATOR) {
            if start.is_empty() || end.is_empty() {
                return Err(RegistryError::InvalidParameter(format!(
                    "version rule '{}' is invalid",
                    rule
                )));
            }
            return Ok(VersionRule::Range(start.to_string(), end.to_string()));
        }
        Ok(VersionRule::Exact(rule.to_string()))
    }

    fn matches(&self, version: &str) -> bool {
        match self {
            VersionRule::Latest => true,
            VersionRule::Exact(expected) => compare_versions(version, expected) == Ordering::Equal,
            VersionRule::AtLeast(start) => compare_versions(version, start) != Ordering::Less,
            VersionRule::Range(start, end) => {
                compare_versions(version, start) != Ordering::Less
                    && compare_versions(version, end) == Ordering::Less
            }
        }
    }
}

/// Parses `x`, `x.y` or `x.y.z` into a semver version; anything else is
/// unparseable and falls back to lexicographic ordering.
fn parse_version(version: &str) -> Option<Version> {
    let mut parts = version.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = match parts.next() {
        Some(p) => p.parse().ok()?,
        None => 0,
    };
    let patch = match parts.next() {
        Some(p) => p.parse().ok()?,
        None => 0,
    };
    if parts.next().is_some() {
        return None;
    }
    Some(Version::new(major, minor, patch))
}

/// Semver comparison with lexicographic fallback.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    match (parse_version(a), parse_version(b)) {
        (Some(va), Some(vb)) => va.cmp(&vb),
        _ => a.cmp(b),
    }
}

/// Sorts candidates greatest-version first; ties break on greater
/// `create_time`, then lexicographic `service_id`.
pub fn sort_candidates(candidates: &mut [VersionCandidate]) {
    candidates.sort_by(|a, b| {
        compare_versions(&b.version, &a.version)
            .then_with(|| b.create_time.cmp(&a.create_time))
            .then_with(|| a.service_id.cmp(&b.service_id))
    });
}

/// Applies `rule` over candidates, returning the matches in sorted order.
/// `latest` selects the single greatest version.
pub fn resolve(rule: &VersionRule, candidates: &[VersionCandidate]) -> Vec<VersionCandidate> {
    let mut sorted = candidates.to_vec();
    sort_candidates(&mut sorted);
    match rule {
        VersionRule::Latest => sorted.into_iter().take(1).collect(),
        _ => sorted
            .into_iter()
            .filter(|c| rule.matches(&c.version))
            .collect(),
    }
}
