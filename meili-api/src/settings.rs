//! Index settings and settings transfer.
//!
//! Settings are kept as a raw json object so categories this crate does not
//! know about (typo tolerance, faceting, embedders, ...) are copied verbatim.
//!
//! [`SettingsTransfer`] first tries one bulk `PATCH /indexes/{uid}/settings`.
//! If that is rejected, or its task does not succeed, each category in
//! [`SettingCategory`] is applied on its own with
//! `PUT /indexes/{uid}/settings/{category}`. A failing category does not stop
//! the others.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::{Display, EnumIter, IntoEnumIterator};
use tracing::{debug, info, warn};

use crate::{
    service::SearchService,
    tasks::{TaskWaiter, WaitStrategy, WriteOutcome},
};

/// Settings json key holding vector embedder configuration.
pub const EMBEDDERS_KEY: &str = "embedders";

/// Settings object of one index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Settings(pub Map<String, Value>);

impl Settings {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Removes a top-level key, returning the removed value.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Map<String, Value>> for Settings {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Setting categories that can be applied one at a time.
/// `Display` gives the url path segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, Serialize, Deserialize)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "camelCase")]
pub enum SettingCategory {
    DisplayedAttributes,
    FilterableAttributes,
    SortableAttributes,
    RankingRules,
    StopWords,
    Synonyms,
    DistinctAttribute,
}

impl SettingCategory {
    /// Key of this category in the settings object
    pub fn key(self) -> &'static str {
        match self {
            Self::DisplayedAttributes => "displayedAttributes",
            Self::FilterableAttributes => "filterableAttributes",
            Self::SortableAttributes => "sortableAttributes",
            Self::RankingRules => "rankingRules",
            Self::StopWords => "stopWords",
            Self::Synonyms => "synonyms",
            Self::DistinctAttribute => "distinctAttribute",
        }
    }

    /// Path segment under `/indexes/{uid}/settings/`
    pub fn path(self) -> String {
        self.to_string()
    }

    pub fn all() -> impl Iterator<Item = Self> {
        Self::iter()
    }
}

/// Whether an empty category value (`null`, `[]`, `{}`, `""`) is applied
/// during the per-category fallback.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmptySettingPolicy {
    /// Empty values are treated as absent.
    #[default]
    Skip,
    /// Empty lists, maps and strings are applied, which clears the category on
    /// the target. `null` is still skipped.
    Apply,
}

impl EmptySettingPolicy {
    fn should_apply(self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) => false,
            (Self::Apply, _) => true,
            (Self::Skip, value) => !is_empty_value(value),
        }
    }
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64().is_some_and(|v| v == 0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
    }
}

/// Outcome of one fallback category.
#[derive(Debug)]
pub enum CategoryOutcome {
    /// Absent or empty in the source settings
    Skipped,
    Applied(WriteOutcome),
}

/// What happened while applying settings to one index.
#[derive(Debug)]
pub struct SettingsReport {
    pub bulk: WriteOutcome,
    /// Empty when the bulk update succeeded.
    pub categories: Vec<(SettingCategory, CategoryOutcome)>,
}

impl SettingsReport {
    pub fn used_fallback(&self) -> bool {
        !self.bulk.is_success()
    }

    /// True when the bulk update succeeded, or every attempted category succeeded.
    pub fn is_success(&self) -> bool {
        self.bulk.is_success()
            || self.categories.iter().all(|(_, outcome)| match outcome {
                CategoryOutcome::Skipped => true,
                CategoryOutcome::Applied(write) => write.is_success(),
            })
    }
}

/// Applies a settings object to an index, falling back to per-category updates.
#[derive(Debug)]
pub struct SettingsTransfer<'a, S, W> {
    service: &'a S,
    waiter: &'a TaskWaiter<W>,
    empty_policy: EmptySettingPolicy,
}

impl<'a, S: SearchService, W: WaitStrategy> SettingsTransfer<'a, S, W> {
    pub fn new(service: &'a S, waiter: &'a TaskWaiter<W>) -> Self {
        Self {
            service,
            waiter,
            empty_policy: EmptySettingPolicy::default(),
        }
    }

    #[must_use]
    pub fn empty_policy(mut self, policy: EmptySettingPolicy) -> Self {
        self.empty_policy = policy;
        self
    }

    pub async fn apply(&self, index_uid: &str, settings: &Settings) -> SettingsReport {
        let bulk = self
            .waiter
            .run(self.service, self.service.update_settings(index_uid, settings))
            .await;
        if bulk.is_success() {
            info!(index = index_uid, "applied all settings");
            return SettingsReport {
                bulk,
                categories: Vec::new(),
            };
        }
        warn!(index = index_uid, "bulk settings update failed, applying categories: {bulk}");

        let mut categories = Vec::new();
        for category in SettingCategory::all() {
            let value = match settings.get(category.key()) {
                Some(value) if self.empty_policy.should_apply(value) => value,
                _ => {
                    debug!(index = index_uid, %category, "skipping empty setting");
                    categories.push((category, CategoryOutcome::Skipped));
                    continue;
                }
            };
            let outcome = self
                .waiter
                .run(
                    self.service,
                    self.service.update_setting(index_uid, category, value),
                )
                .await;
            if outcome.is_success() {
                info!(index = index_uid, %category, "applied setting");
            } else {
                warn!(index = index_uid, %category, "setting failed: {outcome}");
            }
            categories.push((category, CategoryOutcome::Applied(outcome)));
        }
        SettingsReport { bulk, categories }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn category_paths_and_keys() {
        assert_eq!(SettingCategory::RankingRules.path(), "ranking-rules");
        assert_eq!(SettingCategory::DistinctAttribute.path(), "distinct-attribute");
        assert_eq!(SettingCategory::StopWords.key(), "stopWords");
        assert_eq!(SettingCategory::all().count(), 7);
    }

    #[test]
    fn empty_values_follow_policy() {
        let skip = EmptySettingPolicy::Skip;
        let apply = EmptySettingPolicy::Apply;
        assert!(!skip.should_apply(&json!([])));
        assert!(!skip.should_apply(&json!({})));
        assert!(!skip.should_apply(&json!(null)));
        assert!(skip.should_apply(&json!(["the"])));
        assert!(apply.should_apply(&json!([])));
        assert!(!apply.should_apply(&json!(null)));
    }

    #[test]
    fn settings_round_trip_transparently() {
        let raw = json!({"rankingRules": ["words"], "embedders": {"default": {"source": "userProvided"}}});
        let mut settings: Settings = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(serde_json::to_value(&settings).unwrap(), raw);
        assert!(settings.remove(EMBEDDERS_KEY).is_some());
        assert!(!settings.contains(EMBEDDERS_KEY));
    }
}
