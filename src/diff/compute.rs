use std::collections::{BTreeSet, HashMap};

use crate::navigation::NavigationTree;
use crate::storage::ContentType;

/// One structural change between two navigation trees.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentDiff {
    GroupAdded {
        content_type: ContentType,
        group: String,
    },
    GroupRemoved {
        content_type: ContentType,
        group: String,
    },
    /// The number of categories shown in a group changed.
    GroupCountChanged {
        content_type: ContentType,
        group: String,
        old: usize,
        new: usize,
    },
    ItemsAddedToCategory {
        content_type: ContentType,
        category_id: String,
        delta: u64,
    },
    ItemsRemovedFromCategory {
        content_type: ContentType,
        category_id: String,
        delta: u64,
    },
}

impl ContentDiff {
    pub fn content_type(&self) -> ContentType {
        match self {
            ContentDiff::GroupAdded { content_type, .. }
            | ContentDiff::GroupRemoved { content_type, .. }
            | ContentDiff::GroupCountChanged { content_type, .. }
            | ContentDiff::ItemsAddedToCategory { content_type, .. }
            | ContentDiff::ItemsRemovedFromCategory { content_type, .. } => *content_type,
        }
    }
}

/// Diff two snapshots of a content type's tree.
///
/// Output order: added groups, removed groups (each sorted by name), group
/// count changes in new-tree order, then item count changes for categories
/// present in both trees, in new-tree order. `item_count_lookup` returns
/// the current item count of a category id; `None` falls back to the count
/// recorded in the new tree.
pub fn compute_diffs<F>(
    old: &NavigationTree,
    new: &NavigationTree,
    item_count_lookup: F,
    content_type: ContentType,
) -> Vec<ContentDiff>
where
    F: Fn(&str) -> Option<u64>,
{
    let old_groups: BTreeSet<&str> = old.groups.iter().map(|g| g.name.as_str()).collect();
    let new_groups: BTreeSet<&str> = new.groups.iter().map(|g| g.name.as_str()).collect();

    let mut diffs: Vec<ContentDiff> = new_groups
        .difference(&old_groups)
        .map(|name| ContentDiff::GroupAdded {
            content_type,
            group: name.to_string(),
        })
        .collect();

    diffs.extend(
        old_groups
            .difference(&new_groups)
            .map(|name| ContentDiff::GroupRemoved {
                content_type,
                group: name.to_string(),
            }),
    );

    for group in &new.groups {
        if let Some(previous) = old.group(&group.name) {
            if previous.count() != group.count() {
                diffs.push(ContentDiff::GroupCountChanged {
                    content_type,
                    group: group.name.clone(),
                    old: previous.count(),
                    new: group.count(),
                });
            }
        }
    }

    let known_counts: HashMap<&str, u64> = old
        .categories()
        .map(|c| (c.id.as_str(), c.item_count))
        .collect();

    for category in new.categories() {
        let Some(&before) = known_counts.get(category.id.as_str()) else {
            continue;
        };
        let now = item_count_lookup(&category.id).unwrap_or(category.item_count);

        if now > before {
            diffs.push(ContentDiff::ItemsAddedToCategory {
                content_type,
                category_id: category.id.clone(),
                delta: now - before,
            });
        } else if now < before {
            diffs.push(ContentDiff::ItemsRemovedFromCategory {
                content_type,
                category_id: category.id.clone(),
                delta: before - now,
            });
        }
    }

    diffs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::navigation::{build_tree, ContentFilterSettings};
    use crate::storage::Category;
    use pretty_assertions::assert_eq;

    const CT: ContentType = ContentType::Movies;

    fn tree(categories: &[(&str, &str, u64)]) -> NavigationTree {
        let cats: Vec<Category> = categories
            .iter()
            .map(|(id, name, count)| Category {
                id: id.to_string(),
                name: name.to_string(),
                parent_id: None,
                item_count: *count,
                is_leaf: true,
            })
            .collect();
        let settings = ContentFilterSettings {
            separator: "|".to_string(),
            ..Default::default()
        };
        build_tree(&cats, &settings)
    }

    fn no_lookup(_: &str) -> Option<u64> {
        None
    }

    #[test]
    fn test_identical_trees_produce_no_diffs() {
        let t = tree(&[("1", "EN | Action", 5), ("2", "FR | Comedy", 3)]);
        assert!(compute_diffs(&t, &t, no_lookup, CT).is_empty());
    }

    #[test]
    fn test_group_changes_precede_count_changes() {
        let old = tree(&[
            ("1", "EN | Action", 5),
            ("2", "EN | Drama", 2),
            ("3", "DE | News", 1),
        ]);
        let new = tree(&[
            ("1", "EN | Action", 5),
            ("4", "FR | Comedy", 3),
            ("5", "ES | Cine", 1),
        ]);

        let lookup = |id: &str| match id {
            "1" => Some(8),
            _ => None,
        };
        let diffs = compute_diffs(&old, &new, lookup, CT);

        assert_eq!(
            diffs,
            vec![
                ContentDiff::GroupAdded {
                    content_type: CT,
                    group: "ES".into()
                },
                ContentDiff::GroupAdded {
                    content_type: CT,
                    group: "FR".into()
                },
                ContentDiff::GroupRemoved {
                    content_type: CT,
                    group: "DE".into()
                },
                ContentDiff::GroupCountChanged {
                    content_type: CT,
                    group: "EN".into(),
                    old: 2,
                    new: 1
                },
                ContentDiff::ItemsAddedToCategory {
                    content_type: CT,
                    category_id: "1".into(),
                    delta: 3
                },
            ]
        );
    }

    #[test]
    fn test_item_removals_use_signed_delta() {
        let old = tree(&[("1", "EN | Action", 10), ("2", "EN | Drama", 4)]);
        let new = tree(&[("1", "EN | Action", 10), ("2", "EN | Drama", 4)]);

        let lookup = |id: &str| match id {
            "1" => Some(7),
            "2" => Some(4),
            _ => None,
        };
        let diffs = compute_diffs(&old, &new, lookup, CT);
        assert_eq!(
            diffs,
            vec![ContentDiff::ItemsRemovedFromCategory {
                content_type: CT,
                category_id: "1".into(),
                delta: 3
            }]
        );
        assert!(diffs.iter().all(|d| d.content_type() == CT));
    }

    #[test]
    fn test_lookup_miss_falls_back_to_new_tree_count() {
        let old = tree(&[("1", "EN | Action", 2)]);
        let new = tree(&[("1", "EN | Action", 6)]);
        let diffs = compute_diffs(&old, &new, no_lookup, CT);
        assert_eq!(
            diffs,
            vec![ContentDiff::ItemsAddedToCategory {
                content_type: CT,
                category_id: "1".into(),
                delta: 4
            }]
        );
    }

    #[test]
    fn test_empty_old_tree_reports_every_group_added() {
        let new = tree(&[("1", "EN | Action", 1), ("2", "FR | Comedy", 1)]);
        let diffs = compute_diffs(&NavigationTree::default(), &new, no_lookup, CT);
        assert_eq!(diffs.len(), 2);
        assert!(diffs.iter().all(|d| matches!(d, ContentDiff::GroupAdded { .. })));
    }
}
