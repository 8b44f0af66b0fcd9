//! Per-snapshot mapping from node id to element reference.
//!
//! The map is cleared and rebuilt on every capture, so an id from an older
//! snapshot can only ever come back through [`ElementAddressMap::resolve`]'s
//! degraded path, never as a stale exact hit.

use std::collections::HashMap;

use crate::perception::types::{AxTree, ElementRef};

/// Roles the model is allowed to address. Everything else is traversed for
/// its children but never inserted.
pub const INTERACTIVE_ROLES: &[&str] = &[
    "button",
    "checkbox",
    "combobox",
    "link",
    "menu",
    "menubar",
    "menuitem",
    "menuitemcheckbox",
    "menuitemradio",
    "option",
    "radio",
    "scrollbar",
    "searchbox",
    "slider",
    "spinbutton",
    "switch",
    "tab",
    "textbox",
];

pub fn is_interactive_role(role: &str) -> bool {
    INTERACTIVE_ROLES
        .iter()
        .any(|r| r.eq_ignore_ascii_case(role))
}

/// Outcome of looking up a model-supplied id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Exact(ElementRef),
    /// Heuristic match on name/role text. May be a false positive.
    Degraded {
        matched_id: String,
        element: ElementRef,
    },
    NotFound,
}

impl Resolution {
    pub fn element(&self) -> Option<&ElementRef> {
        match self {
            Resolution::Exact(e) | Resolution::Degraded { element: e, .. } => Some(e),
            Resolution::NotFound => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ElementAddressMap {
    entries: Vec<(String, ElementRef)>,
    index: HashMap<String, usize>,
    generation: u64,
}

impl ElementAddressMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole map with the addressable nodes of `tree`.
    pub fn rebuild(&mut self, tree: &AxTree) {
        self.entries.clear();
        self.index.clear();
        self.generation += 1;

        for idx in tree.dfs() {
            let Some(node) = tree.node(idx) else { continue };
            if node.ignored || !is_interactive_role(&node.role) {
                continue;
            }
            if self.index.contains_key(&node.id) {
                continue;
            }
            self.index.insert(node.id.clone(), self.entries.len());
            self.entries.push((node.id.clone(), node.element_ref()));
        }

        tracing::debug!(
            generation = self.generation,
            addressable = self.entries.len(),
            total = tree.len(),
            "element address map rebuilt"
        );
    }

    /// Drop every entry without a new snapshot. Bumps the generation so the
    /// old ids cannot be mistaken for current ones.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.index.clear();
        self.generation += 1;
        tracing::debug!(generation = self.generation, "element address map cleared");
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of rebuilds so far; each snapshot bumps it.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn get(&self, id: &str) -> Option<&ElementRef> {
        self.index.get(id).map(|&i| &self.entries[i].1)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(id, _)| id.as_str())
    }

    /// Exact lookup first, then the degraded name/role containment scan.
    pub fn resolve(&self, id: &str) -> Resolution {
        if let Some(element) = self.get(id) {
            tracing::debug!(id, role = %element.role, "exact element resolution");
            return Resolution::Exact(element.clone());
        }

        let needle = id.trim();
        if needle.is_empty() {
            return Resolution::NotFound;
        }

        let hit = self
            .entries
            .iter()
            .find(|(_, e)| e.name.contains(needle) || e.role.contains(needle));

        match hit {
            Some((matched_id, element)) => {
                tracing::warn!(
                    target: "sidepilot::degraded_resolution",
                    requested = id,
                    matched = %matched_id,
                    role = %element.role,
                    name = %element.name,
                    generation = self.generation,
                    "element id missing from address map, using degraded match"
                );
                Resolution::Degraded {
                    matched_id: matched_id.clone(),
                    element: element.clone(),
                }
            }
            None => Resolution::NotFound,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree_with(addressable: &[(&str, &str, &str)]) -> AxTree {
        let mut tree = AxTree::new();
        let root = tree.push(None, "root", "RootWebArea", "Page");
        let wrapper = tree.push(Some(root), "w", "generic", "");
        for (id, role, name) in addressable {
            tree.push(Some(wrapper), *id, *role, *name);
        }
        tree.push(Some(wrapper), "txt", "StaticText", "Some text");
        tree
    }

    #[test]
    fn only_interactive_roles_are_addressable() {
        let tree = tree_with(&[("1", "button", "OK"), ("2", "textbox", "Email"), ("3", "link", "Home")]);
        let mut map = ElementAddressMap::new();
        map.rebuild(&tree);
        assert_eq!(map.len(), 3);
        assert!(map.get("txt").is_none());
        assert!(map.get("root").is_none());
        assert_eq!(map.ids().collect::<Vec<_>>(), vec!["1", "2", "3"]);
    }

    #[test]
    fn rebuild_replaces_instead_of_merging() {
        let mut map = ElementAddressMap::new();
        map.rebuild(&tree_with(&[("1", "button", "a"), ("2", "button", "b"), ("3", "button", "c")]));
        assert_eq!(map.len(), 3);

        map.rebuild(&tree_with(&[
            ("10", "link", "d"),
            ("11", "link", "e"),
            ("12", "link", "f"),
            ("13", "checkbox", "g"),
            ("14", "tab", "h"),
        ]));
        assert_eq!(map.len(), 5);
        assert_eq!(map.generation(), 2);
        assert!(map.get("1").is_none());
    }

    #[test]
    fn clear_forgets_every_id() {
        let mut map = ElementAddressMap::new();
        map.rebuild(&tree_with(&[("5", "button", "Submit")]));
        map.clear();
        assert!(map.is_empty());
        assert_eq!(map.generation(), 2);
        assert!(matches!(map.resolve("5"), Resolution::NotFound));
        assert!(matches!(map.resolve("Submit"), Resolution::NotFound));
    }

    #[test]
    fn stale_id_never_resolves_exactly() {
        let mut map = ElementAddressMap::new();
        map.rebuild(&tree_with(&[("5", "button", "Submit")]));
        assert!(matches!(map.resolve("5"), Resolution::Exact(_)));

        map.rebuild(&tree_with(&[("8", "button", "Submit")]));
        assert_eq!(map.resolve("5"), Resolution::NotFound);
    }

    #[test]
    fn degraded_match_on_name_or_role() {
        let mut map = ElementAddressMap::new();
        map.rebuild(&tree_with(&[("1", "button", "Search"), ("2", "searchbox", "Query")]));

        match map.resolve("Search") {
            Resolution::Degraded { matched_id, element } => {
                assert_eq!(matched_id, "1");
                assert_eq!(element.name, "Search");
            }
            other => panic!("expected degraded match, got {other:?}"),
        }

        match map.resolve("searchbox") {
            Resolution::Degraded { matched_id, .. } => assert_eq!(matched_id, "2"),
            other => panic!("expected degraded match, got {other:?}"),
        }

        assert_eq!(map.resolve("nothing-like-this"), Resolution::NotFound);
        assert_eq!(map.resolve(""), Resolution::NotFound);
    }

    #[test]
    fn ignored_nodes_are_not_addressable() {
        let mut tree = tree_with(&[("1", "button", "OK")]);
        let idx = tree.push(None, "hidden", "button", "Hidden");
        tree.node_mut(idx).unwrap().ignored = true;

        let mut map = ElementAddressMap::new();
        map.rebuild(&tree);
        assert_eq!(map.len(), 1);
    }
}
