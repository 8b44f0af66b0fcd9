use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Live reference to an on-page element, valid for the snapshot that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementRef {
    pub node_id: String,
    /// DOM backend id used to resolve the element over CDP.
    pub backend_node_id: Option<i64>,
    pub role: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AxNode {
    pub id: String,
    pub role: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub backend_node_id: Option<i64>,
    pub ignored: bool,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
}

impl AxNode {
    pub fn element_ref(&self) -> ElementRef {
        ElementRef {
            node_id: self.id.clone(),
            backend_node_id: self.backend_node_id,
            role: self.role.clone(),
            name: self.name.clone(),
        }
    }
}

/// Accessibility tree stored as an arena. Nodes refer to each other by index.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AxTree {
    nodes: Vec<AxNode>,
    index: HashMap<String, usize>,
    roots: Vec<usize>,
}

/// Structural roles whose unnamed instances are flattened out of the model view.
const TRANSPARENT_ROLES: &[&str] = &[
    "generic",
    "none",
    "presentation",
    "InlineTextBox",
    "LineBreak",
    "Section",
    "group",
];

impl AxTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a node under `parent` (or as a root) and return its index.
    pub fn push(
        &mut self,
        parent: Option<usize>,
        id: impl Into<String>,
        role: impl Into<String>,
        name: impl Into<String>,
    ) -> usize {
        let idx = self.nodes.len();
        let id = id.into();
        self.index.insert(id.clone(), idx);
        self.nodes.push(AxNode {
            id,
            role: role.into(),
            name: name.into(),
            value: None,
            backend_node_id: None,
            ignored: false,
            parent,
            children: Vec::new(),
        });
        match parent.and_then(|p| self.nodes.get_mut(p)) {
            Some(p) => p.children.push(idx),
            None => self.roots.push(idx),
        }
        idx
    }

    /// Build the arena from an `Accessibility.getFullAXTree` reply.
    pub fn from_cdp(reply: &Value) -> Self {
        let mut tree = Self::new();
        let Some(raw_nodes) = reply.get("nodes").and_then(Value::as_array) else {
            return tree;
        };

        let mut child_ids: Vec<Vec<String>> = Vec::with_capacity(raw_nodes.len());
        for raw in raw_nodes {
            let Some(id) = raw.get("nodeId").and_then(value_as_id) else {
                continue;
            };
            let idx = tree.nodes.len();
            tree.index.insert(id.clone(), idx);
            tree.nodes.push(AxNode {
                id,
                role: ax_value(raw, "role").unwrap_or_default(),
                name: ax_value(raw, "name").unwrap_or_default(),
                value: ax_value(raw, "value").filter(|v| !v.is_empty()),
                backend_node_id: raw.get("backendDOMNodeId").and_then(Value::as_i64),
                ignored: raw.get("ignored").and_then(Value::as_bool).unwrap_or(false),
                parent: None,
                children: Vec::new(),
            });
            child_ids.push(
                raw.get("childIds")
                    .and_then(Value::as_array)
                    .map(|ids| ids.iter().filter_map(value_as_id).collect())
                    .unwrap_or_default(),
            );
        }

        for (parent_idx, ids) in child_ids.into_iter().enumerate() {
            for child_id in ids {
                let Some(&child_idx) = tree.index.get(&child_id) else {
                    continue;
                };
                // First parent wins and no edge may close a cycle.
                if tree.nodes[child_idx].parent.is_some() || tree.is_ancestor(child_idx, parent_idx) {
                    continue;
                }
                tree.nodes[child_idx].parent = Some(parent_idx);
                tree.nodes[parent_idx].children.push(child_idx);
            }
        }

        tree.roots = (0..tree.nodes.len())
            .filter(|&i| tree.nodes[i].parent.is_none())
            .collect();
        tree
    }

    fn is_ancestor(&self, candidate: usize, mut of: usize) -> bool {
        loop {
            if of == candidate {
                return true;
            }
            match self.nodes[of].parent {
                Some(p) => of = p,
                None => return false,
            }
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, idx: usize) -> Option<&AxNode> {
        self.nodes.get(idx)
    }

    pub fn node_mut(&mut self, idx: usize) -> Option<&mut AxNode> {
        self.nodes.get_mut(idx)
    }

    pub fn get(&self, id: &str) -> Option<&AxNode> {
        self.index.get(id).and_then(|&i| self.nodes.get(i))
    }

    pub fn roots(&self) -> &[usize] {
        &self.roots
    }

    /// Depth-first pre-order walk over every node, in document order.
    pub fn dfs(&self) -> Vec<usize> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack: Vec<usize> = self.roots.iter().rev().copied().collect();
        while let Some(idx) = stack.pop() {
            order.push(idx);
            if let Some(node) = self.nodes.get(idx) {
                stack.extend(node.children.iter().rev().copied());
            }
        }
        order
    }

    /// Compact nested JSON shown to the model. Ignored nodes and unnamed
    /// structural wrappers are dropped and their children hoisted.
    pub fn to_model_json(&self) -> Value {
        let mut top = Vec::new();
        for &root in &self.roots {
            self.model_nodes(root, &mut top);
        }
        if top.len() == 1 {
            top.pop().unwrap_or(Value::Null)
        } else {
            Value::Array(top)
        }
    }

    fn model_nodes(&self, idx: usize, out: &mut Vec<Value>) {
        let Some(node) = self.nodes.get(idx) else {
            return;
        };

        let mut children = Vec::new();
        for &child in &node.children {
            self.model_nodes(child, &mut children);
        }

        let transparent = node.ignored
            || (node.name.is_empty()
                && node.value.is_none()
                && TRANSPARENT_ROLES.contains(&node.role.as_str()));
        if transparent {
            out.extend(children);
            return;
        }

        let mut obj = Map::new();
        obj.insert("id".into(), json!(node.id));
        obj.insert("role".into(), json!(node.role));
        if !node.name.is_empty() {
            obj.insert("name".into(), json!(node.name));
        }
        if let Some(value) = &node.value {
            obj.insert("value".into(), json!(value));
        }
        if !children.is_empty() {
            obj.insert("children".into(), Value::Array(children));
        }
        out.push(Value::Object(obj));
    }
}

fn value_as_id(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Read `node[field].value` from a CDP AXNode, stringifying non-string values.
fn ax_value(raw: &Value, field: &str) -> Option<String> {
    match raw.get(field)?.get("value")? {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cdp_reply() -> Value {
        json!({
            "nodes": [
                { "nodeId": "1", "ignored": false, "role": { "type": "role", "value": "RootWebArea" },
                  "name": { "type": "computedString", "value": "Search" }, "childIds": ["2"], "backendDOMNodeId": 1 },
                { "nodeId": "2", "ignored": false, "role": { "type": "role", "value": "generic" },
                  "name": { "type": "computedString", "value": "" }, "childIds": ["3", "4", "5"], "parentId": "1" },
                { "nodeId": "3", "ignored": false, "role": { "type": "role", "value": "textbox" },
                  "name": { "type": "computedString", "value": "Query" },
                  "value": { "type": "string", "value": "cats" }, "childIds": [], "backendDOMNodeId": 12 },
                { "nodeId": "4", "ignored": true, "role": { "type": "role", "value": "none" },
                  "childIds": ["6"] },
                { "nodeId": "5", "ignored": false, "role": { "type": "role", "value": "button" },
                  "name": { "type": "computedString", "value": "Go" }, "childIds": [], "backendDOMNodeId": 14 },
                { "nodeId": "6", "ignored": false, "role": { "type": "role", "value": "link" },
                  "name": { "type": "computedString", "value": "Help" }, "childIds": [], "backendDOMNodeId": 16 }
            ]
        })
    }

    #[test]
    fn builds_arena_with_edges() {
        let tree = AxTree::from_cdp(&cdp_reply());
        assert_eq!(tree.len(), 6);
        assert_eq!(tree.roots(), &[0]);

        let generic = tree.get("2").unwrap();
        assert_eq!(generic.parent, Some(0));
        assert_eq!(generic.children, vec![2, 3, 4]);

        let textbox = tree.get("3").unwrap();
        assert_eq!(textbox.value.as_deref(), Some("cats"));
        assert_eq!(textbox.backend_node_id, Some(12));
        assert!(tree.get("4").unwrap().ignored);
    }

    #[test]
    fn dfs_is_document_order() {
        let tree = AxTree::from_cdp(&cdp_reply());
        let ids: Vec<&str> = tree
            .dfs()
            .into_iter()
            .map(|i| tree.node(i).unwrap().id.as_str())
            .collect();
        assert_eq!(ids, vec!["1", "2", "3", "4", "6", "5"]);
    }

    #[test]
    fn model_json_hoists_wrappers_and_ignored_nodes() {
        let tree = AxTree::from_cdp(&cdp_reply());
        let view = tree.to_model_json();
        assert_eq!(view["role"], "RootWebArea");
        let children = view["children"].as_array().unwrap();
        let ids: Vec<&str> = children.iter().map(|c| c["id"].as_str().unwrap()).collect();
        assert_eq!(ids, vec!["3", "6", "5"]);
        assert_eq!(children[0]["value"], "cats");
    }

    #[test]
    fn cyclic_child_ids_do_not_loop() {
        let reply = json!({
            "nodes": [
                { "nodeId": "a", "role": { "value": "group" }, "childIds": ["b"] },
                { "nodeId": "b", "role": { "value": "button" }, "name": { "value": "x" }, "childIds": ["a"] }
            ]
        });
        let tree = AxTree::from_cdp(&reply);
        assert_eq!(tree.roots(), &[0]);
        assert_eq!(tree.dfs(), vec![0, 1]);
    }

    #[test]
    fn push_builds_nested_trees() {
        let mut tree = AxTree::new();
        let root = tree.push(None, "r", "RootWebArea", "Page");
        let form = tree.push(Some(root), "f", "form", "");
        tree.push(Some(form), "t", "textbox", "Email");
        assert_eq!(tree.dfs(), vec![0, 1, 2]);
        assert_eq!(tree.get("t").unwrap().parent, Some(1));
    }
}
