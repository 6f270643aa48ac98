//! Per-content-type filter settings and the two-level hierarchical filter.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::grouping::{Separator, FIRST_WORD};

/// How a hidden-name set is applied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterMode {
    /// Named entries are hidden.
    #[default]
    Blacklist,
    /// Only named entries are shown, except that an empty set restricts
    /// nothing. A literal whitelist would hide everything when empty; this
    /// mode treats "no selection yet" as "show all" instead.
    Whitelist,
}

impl FilterMode {
    /// Whether `name` survives this mode against `names`.
    ///
    /// An empty whitelist admits every name rather than none.
    pub fn admits(&self, names: &BTreeSet<String>, name: &str) -> bool {
        match self {
            FilterMode::Blacklist => !names.contains(name),
            FilterMode::Whitelist => names.is_empty() || names.contains(name),
        }
    }
}

impl std::str::FromStr for FilterMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "blacklist" | "hide" => Ok(FilterMode::Blacklist),
            "whitelist" | "only" => Ok(FilterMode::Whitelist),
            other => Err(format!(
                "unknown filter mode '{}' (expected blacklist or whitelist)",
                other
            )),
        }
    }
}

/// Grouping and filtering choices of one content type.
///
/// Stored as JSON in the preferences table; missing fields take defaults so
/// older stored values keep loading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContentFilterSettings {
    pub grouping_enabled: bool,
    /// Raw separator setting, see [`Separator`].
    pub separator: String,
    pub filter_mode: FilterMode,
    pub hidden_groups: BTreeSet<String>,
    pub hidden_categories: BTreeSet<String>,
}

impl Default for ContentFilterSettings {
    fn default() -> Self {
        Self {
            grouping_enabled: true,
            separator: FIRST_WORD.to_string(),
            filter_mode: FilterMode::Blacklist,
            hidden_groups: BTreeSet::new(),
            hidden_categories: BTreeSet::new(),
        }
    }
}

impl ContentFilterSettings {
    /// The separator rule these settings select, with first-word fallback.
    pub fn separator_rule(&self) -> Separator {
        Separator::resolve(&self.separator)
    }

    /// Group-level inclusion rule.
    pub fn admits_group(&self, group: &str) -> bool {
        self.filter_mode.admits(&self.hidden_groups, group)
    }

    /// Category-level inclusion rule.
    pub fn admits_category(&self, category_name: &str) -> bool {
        self.filter_mode.admits(&self.hidden_categories, category_name)
    }
}
