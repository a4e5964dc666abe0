//! Collection selection by include/exclude glob patterns.

use beacon_core::{DiscoveryError, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::collections::BTreeSet;

/// Resolves the set of collections a request searches.
///
/// An empty include list matches every collection. Exclusion wins over
/// inclusion.
#[derive(Debug, Clone)]
pub struct PatternFilter {
    include: Option<GlobSet>,
    exclude: GlobSet,
}

impl PatternFilter {
    /// Compile the pattern lists, rejecting malformed globs.
    pub fn new(include: &[String], exclude: &[String]) -> Result<Self> {
        let include = if include.is_empty() {
            None
        } else {
            Some(build_globset(include)?)
        };

        Ok(Self {
            include,
            exclude: build_globset(exclude)?,
        })
    }

    pub fn matches(&self, collection: &str) -> bool {
        let included = self
            .include
            .as_ref()
            .is_none_or(|set| set.is_match(collection));
        included && !self.exclude.is_match(collection)
    }

    /// Filter `available` down to the matching collections, sorted and
    /// deduplicated.
    ///
    /// An empty result is an invalid request.
    pub fn resolve(&self, available: &[String]) -> Result<Vec<String>> {
        let resolved: BTreeSet<&String> = available
            .iter()
            .filter(|name| self.matches(name))
            .collect();

        if resolved.is_empty() {
            return Err(DiscoveryError::invalid(format!(
                "no collection matches the include/exclude patterns ({} available)",
                available.len()
            )));
        }

        Ok(resolved.into_iter().cloned().collect())
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|e| {
            DiscoveryError::invalid(format!("invalid collection pattern '{}': {}", pattern, e))
        })?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| DiscoveryError::invalid(format!("failed to compile collection patterns: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_empty_include_matches_all() {
        let filter = PatternFilter::new(&[], &[]).unwrap();
        let resolved = filter
            .resolve(&names(&["docs", "code", "api-docs"]))
            .unwrap();
        assert_eq!(resolved, names(&["api-docs", "code", "docs"]));
    }

    #[test]
    fn test_exclude_wins() {
        let filter = PatternFilter::new(&names(&["*docs*"]), &names(&["api-*"])).unwrap();
        let resolved = filter
            .resolve(&names(&["docs", "api-docs", "user-docs", "code"]))
            .unwrap();
        assert_eq!(resolved, names(&["docs", "user-docs"]));
    }

    #[test]
    fn test_include_and_exclude_same_pattern() {
        let filter = PatternFilter::new(&names(&["docs"]), &names(&["docs"])).unwrap();
        assert!(!filter.matches("docs"));
        assert!(matches!(
            filter.resolve(&names(&["docs"])),
            Err(DiscoveryError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_no_match_is_invalid() {
        let filter = PatternFilter::new(&names(&["nothing-*"]), &[]).unwrap();
        assert!(matches!(
            filter.resolve(&names(&["docs", "code"])),
            Err(DiscoveryError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_malformed_pattern() {
        let result = PatternFilter::new(&names(&["docs[", "code"]), &[]);
        assert!(matches!(result, Err(DiscoveryError::InvalidRequest(_))));
    }

    #[test]
    fn test_duplicate_names_collapse() {
        let filter = PatternFilter::new(&[], &[]).unwrap();
        let resolved = filter.resolve(&names(&["docs", "docs"])).unwrap();
        assert_eq!(resolved, names(&["docs"]));
    }
}
