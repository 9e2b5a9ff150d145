use std::collections::BTreeMap;

use enricher_model::CanonicalEvent;
use serde::{Deserialize, Serialize};

/// Exact-match attribute filter with an optional body substring.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterPolicy {
    /// Attribute key to allowed values. Every key must be present on the
    /// event with one of its values.
    #[serde(default)]
    pub attributes: BTreeMap<String, Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_contains: Option<String>,
}

impl FilterPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allow<I, V>(mut self, key: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        self.attributes
            .entry(key.into())
            .or_default()
            .extend(values.into_iter().map(Into::into));
        self
    }

    pub fn with_body_contains(mut self, needle: impl Into<String>) -> Self {
        self.body_contains = Some(needle.into());
        self
    }

    pub fn matches(&self, event: &CanonicalEvent) -> bool {
        let attributes_match =
            self.attributes.iter().all(|(key, allowed)| {
                event
                    .get(key)
                    .is_some_and(|value| allowed.iter().any(|a| a == value))
            });
        attributes_match
            && self
                .body_contains
                .as_ref()
                .is_none_or(|needle| event.body.contains(needle.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allow_list_is_exact() {
        let filter = FilterPolicy::new().allow("dns_status", ["0"]);
        let gated = CanonicalEvent::new("x").with_attribute("dns_status", "0");
        let done = CanonicalEvent::new("x").with_attribute("dns_status", "00");
        let absent = CanonicalEvent::new("x");
        assert!(filter.matches(&gated));
        assert!(!filter.matches(&done));
        assert!(!filter.matches(&absent));
    }

    #[test]
    fn body_filter_requires_substring() {
        let filter = FilterPolicy::new()
            .allow("alert", ["quota"])
            .with_body_contains("WARNING");
        let hit = CanonicalEvent::new("WARNING: x").with_attribute("alert", "quota");
        let miss = CanonicalEvent::new("note").with_attribute("alert", "quota");
        assert!(filter.matches(&hit));
        assert!(!filter.matches(&miss));
    }
}
