use std::collections::BTreeMap;

use super::filter::ContentFilterSettings;
use super::grouping::group_key;
use crate::storage::Category;

/// Name of the single group produced when grouping is disabled.
pub const ALL_CATEGORIES: &str = "All Categories";

/// A named cluster of categories sharing a group key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupNode {
    pub name: String,
    /// Sorted by name.
    pub categories: Vec<Category>,
}

impl GroupNode {
    pub fn count(&self) -> usize {
        self.categories.len()
    }

    pub fn category(&self, name: &str) -> Option<&Category> {
        self.categories.iter().find(|c| c.name == name)
    }
}

/// Groups of categories, sorted by group name.
///
/// Derived from a category list and filter settings; never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NavigationTree {
    pub groups: Vec<GroupNode>,
}

impl NavigationTree {
    pub fn group(&self, name: &str) -> Option<&GroupNode> {
        self.groups.iter().find(|g| g.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Every category of the tree, in display order.
    pub fn categories(&self) -> impl Iterator<Item = &Category> {
        self.groups.iter().flat_map(|g| g.categories.iter())
    }

    pub fn category_count(&self) -> usize {
        self.groups.iter().map(GroupNode::count).sum()
    }
}

fn sort_categories(categories: &mut [Category]) {
    categories.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
}

/// Build the navigation tree of a flat category list.
///
/// With grouping enabled, categories are bucketed by [`group_key`], groups
/// are filtered against `hidden_groups`, then categories against
/// `hidden_categories`, and groups left empty are dropped. With grouping
/// disabled, a single [`ALL_CATEGORIES`] group holds every category that
/// passes the category-level rule. If none passes, the result is an empty
/// tree rather than an empty [`ALL_CATEGORIES`] group.
pub fn build_tree(categories: &[Category], settings: &ContentFilterSettings) -> NavigationTree {
    if !settings.grouping_enabled {
        let mut kept: Vec<Category> = categories
            .iter()
            .filter(|c| settings.admits_category(&c.name))
            .cloned()
            .collect();
        if kept.is_empty() {
            return NavigationTree::default();
        }
        sort_categories(&mut kept);
        return NavigationTree {
            groups: vec![GroupNode {
                name: ALL_CATEGORIES.to_string(),
                categories: kept,
            }],
        };
    }

    let separator = settings.separator_rule();
    let mut buckets: BTreeMap<&str, Vec<Category>> = BTreeMap::new();
    for category in categories {
        buckets
            .entry(group_key(&category.name, &separator))
            .or_default()
            .push(category.clone());
    }

    let groups = buckets
        .into_iter()
        .filter(|(key, _)| settings.admits_group(key))
        .filter_map(|(key, members)| {
            let mut kept: Vec<Category> = members
                .into_iter()
                .filter(|c| settings.admits_category(&c.name))
                .collect();
            if kept.is_empty() {
                return None;
            }
            sort_categories(&mut kept);
            Some(GroupNode {
                name: key.to_string(),
                categories: kept,
            })
        })
        .collect();

    NavigationTree { groups }
}
