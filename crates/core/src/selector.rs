//! Exact-match label selectors, applied client-side to cached lists.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelSelector(BTreeMap<String, String>);

impl LabelSelector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Build from a `matchLabels`-shaped object; non-string values are ignored.
    pub fn from_match_labels(v: Option<&Json>) -> Self {
        let mut out = BTreeMap::new();
        if let Some(map) = v.and_then(|m| m.as_object()) {
            for (k, val) in map {
                if let Some(s) = val.as_str() {
                    out.insert(k.clone(), s.to_string());
                }
            }
        }
        Self(out)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Every selector pair must be present in `metadata.labels`. An empty selector matches anything.
    pub fn matches(&self, obj: &Json) -> bool {
        if self.0.is_empty() {
            return true;
        }
        let labels = match obj.get("metadata").and_then(|m| m.get("labels")).and_then(|l| l.as_object()) {
            Some(l) => l,
            None => return false,
        };
        self.0
            .iter()
            .all(|(k, v)| labels.get(k).and_then(|x| x.as_str()) == Some(v.as_str()))
    }

    /// True when `labels` (a plain label map, e.g. a pod template's) satisfies this selector.
    pub fn matches_labels(&self, labels: Option<&Json>) -> bool {
        let map = labels.and_then(|l| l.as_object());
        self.0.iter().all(|(k, v)| {
            map.and_then(|m| m.get(k)).and_then(|x| x.as_str()) == Some(v.as_str())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn exact_match_over_labels() {
        let obj = json!({"metadata": {"labels": {"app": "web", "tier": "fe"}}});
        assert!(LabelSelector::new().matches(&obj));
        assert!(LabelSelector::new().with("app", "web").matches(&obj));
        assert!(!LabelSelector::new().with("app", "db").matches(&obj));
        assert!(!LabelSelector::new().with("app", "web").matches(&json!({"metadata": {}})));
    }

    #[test]
    fn from_match_labels_skips_non_strings() {
        let sel = LabelSelector::from_match_labels(Some(&json!({"app": "web", "n": 1})));
        assert_eq!(sel, LabelSelector::new().with("app", "web"));
    }
}
