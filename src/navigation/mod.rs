//! Grouped navigation over a flat category list.

pub mod auto_skip;
pub mod filter;
pub mod grouping;
pub mod tree;

pub use auto_skip::{NavigationLevel, NavigationState};
pub use filter::{ContentFilterSettings, FilterMode};
pub use grouping::{group_key, strip_group_prefix, Separator};
pub use tree::{build_tree, GroupNode, NavigationTree, ALL_CATEGORIES};
