//! Navigation state with single-choice screens skipped.
//!
//! A screen that would offer exactly one choice (one group, or one category
//! inside the selected group) is never displayed: the choice is taken
//! automatically. The breadcrumb still records every level passed through,
//! while back navigation only returns to screens that were actually shown.

use super::tree::NavigationTree;

/// Screen depth of the browsing context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigationLevel {
    Groups,
    Categories,
    Content,
}

/// One displayed screen, with the selection that was current on it.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Frame {
    level: NavigationLevel,
    selected_group: Option<String>,
    selected_category: Option<String>,
    breadcrumb_len: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigationState {
    /// Displayed screens, oldest first. Never empty.
    frames: Vec<Frame>,
    breadcrumb: Vec<String>,
}

impl NavigationState {
    /// Enter the browsing context of a tree.
    pub fn enter(tree: &NavigationTree) -> Self {
        let mut state = Self {
            frames: Vec::new(),
            breadcrumb: Vec::new(),
        };

        match tree.groups.as_slice() {
            [only] => {
                state.breadcrumb.push(only.name.clone());
                match only.categories.as_slice() {
                    [category] => {
                        state.breadcrumb.push(category.name.clone());
                        state.push(
                            NavigationLevel::Content,
                            Some(only.name.clone()),
                            Some(category.name.clone()),
                        );
                    }
                    _ => state.push(NavigationLevel::Categories, Some(only.name.clone()), None),
                }
            }
            _ => state.push(NavigationLevel::Groups, None, None),
        }

        tracing::trace!(level = ?state.level(), breadcrumb = ?state.breadcrumb, "Entered navigation");
        state
    }

    fn push(
        &mut self,
        level: NavigationLevel,
        selected_group: Option<String>,
        selected_category: Option<String>,
    ) {
        self.frames.push(Frame {
            level,
            selected_group,
            selected_category,
            breadcrumb_len: self.breadcrumb.len(),
        });
    }

    fn current(&self) -> Option<&Frame> {
        self.frames.last()
    }

    pub fn level(&self) -> NavigationLevel {
        self.current()
            .map(|f| f.level)
            .unwrap_or(NavigationLevel::Groups)
    }

    pub fn selected_group(&self) -> Option<&str> {
        self.current().and_then(|f| f.selected_group.as_deref())
    }

    pub fn selected_category(&self) -> Option<&str> {
        self.current().and_then(|f| f.selected_category.as_deref())
    }

    /// Every level passed through, skipped ones included.
    pub fn breadcrumb(&self) -> &[String] {
        &self.breadcrumb
    }

    /// Levels that were actually displayed, oldest first.
    pub fn displayed_levels(&self) -> Vec<NavigationLevel> {
        self.frames.iter().map(|f| f.level).collect()
    }

    /// Select a group on the groups screen.
    ///
    /// A group with a single category goes straight to its content. Returns
    /// false when not on the groups screen or the group is not in the tree.
    pub fn select_group(&mut self, tree: &NavigationTree, name: &str) -> bool {
        if self.level() != NavigationLevel::Groups {
            return false;
        }
        let Some(group) = tree.group(name) else {
            return false;
        };

        self.breadcrumb.push(group.name.clone());
        match group.categories.as_slice() {
            [category] => {
                self.breadcrumb.push(category.name.clone());
                self.push(
                    NavigationLevel::Content,
                    Some(group.name.clone()),
                    Some(category.name.clone()),
                );
            }
            _ => self.push(NavigationLevel::Categories, Some(group.name.clone()), None),
        }
        true
    }

    /// Select a category on the categories screen.
    pub fn select_category(&mut self, name: &str) -> bool {
        if self.level() != NavigationLevel::Categories {
            return false;
        }
        let group = self.selected_group().map(str::to_string);
        self.breadcrumb.push(name.to_string());
        self.push(NavigationLevel::Content, group, Some(name.to_string()));
        true
    }

    /// Return to the previous displayed screen.
    ///
    /// Returns false when the current screen is the first one displayed;
    /// the caller should leave the browsing context.
    pub fn navigate_back(&mut self) -> bool {
        if self.frames.len() <= 1 {
            return false;
        }
        self.frames.pop();
        if let Some(frame) = self.current() {
            let len = frame.breadcrumb_len;
            self.breadcrumb.truncate(len);
        }
        true
    }
}
