use crate::model::{GenerationKind, Id, ParamLocation, ParamType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Status code assigned to response parameters submitted without one
pub const DEFAULT_STATUS_CODE: i32 = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamSide {
    Request,
    Response,
}

/// One of the four parameter tables: request/response crossed with live/draft
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ParamTable {
    pub generation: GenerationKind,
    pub side: ParamSide,
}

impl ParamTable {
    pub fn new(generation: GenerationKind, side: ParamSide) -> Self {
        Self { generation, side }
    }

    pub fn table_name(&self) -> &'static str {
        match (self.generation, self.side) {
            (GenerationKind::Live, ParamSide::Request) => "request_params",
            (GenerationKind::Live, ParamSide::Response) => "response_params",
            (GenerationKind::Draft, ParamSide::Request) => "request_param_drafts",
            (GenerationKind::Draft, ParamSide::Response) => "response_param_drafts",
        }
    }

    /// Both parameter tables of a generation
    pub fn both(generation: GenerationKind) -> [ParamTable; 2] {
        [
            ParamTable::new(generation, ParamSide::Request),
            ParamTable::new(generation, ParamSide::Response),
        ]
    }
}

/// The side-specific part of a parameter row; also decides its bucket key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamSlot {
    Request { location: ParamLocation },
    Response { status_code: i32 },
}

impl ParamSlot {
    pub fn side(&self) -> ParamSide {
        match self {
            ParamSlot::Request { .. } => ParamSide::Request,
            ParamSlot::Response { .. } => ParamSide::Response,
        }
    }

    /// Grouping key: the location for request rows, the stringified status code for response rows
    pub fn bucket_key(&self) -> String {
        match self {
            ParamSlot::Request { location } => location.as_str().to_string(),
            ParamSlot::Response { status_code } => status_code.to_string(),
        }
    }
}

/// A stored parameter row. Rows of one endpoint form a forest through `parent_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamNode {
    pub id: Id,
    pub endpoint_id: Id,
    pub parent_id: Option<Id>,
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ParamType,
    pub required: bool,
    pub default_value: Option<String>,
    pub description: Option<String>,
    pub example: Option<String>,
    pub array_child_type: Option<ParamType>,
    #[serde(flatten)]
    pub slot: ParamSlot,
}

impl ParamNode {
    /// Parentless copy of this row for insertion under another endpoint
    pub fn detached_copy(&self, endpoint_id: Id) -> NewParamNode {
        NewParamNode {
            endpoint_id,
            parent_id: None,
            name: self.name.clone(),
            param_type: self.param_type,
            required: self.required,
            default_value: self.default_value.clone(),
            description: self.description.clone(),
            example: self.example.clone(),
            array_child_type: self.array_child_type,
            slot: self.slot,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewParamNode {
    pub endpoint_id: Id,
    pub parent_id: Option<Id>,
    pub name: String,
    pub param_type: ParamType,
    pub required: bool,
    pub default_value: Option<String>,
    pub description: Option<String>,
    pub example: Option<String>,
    pub array_child_type: Option<ParamType>,
    pub slot: ParamSlot,
}

/// Caller-supplied nested parameter description. Enum-valued fields stay raw
/// strings here; they are coerced when the tree is built.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParamInput {
    pub name: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(rename = "type", default)]
    pub param_type: String,
    #[serde(default)]
    pub required: Option<bool>,
    #[serde(default)]
    pub default_value: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub example: Option<String>,
    #[serde(default)]
    pub array_child_type: Option<String>,
    #[serde(default)]
    pub children: Option<Vec<ParamInput>>,
    #[serde(default)]
    pub status_code: Option<i32>,
}

/// A parameter node with its children attached
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParamTree {
    #[serde(flatten)]
    pub node: ParamNode,
    pub children: Vec<ParamTree>,
}

/// Organized forest of one endpoint side, keyed by bucket
pub type ParamForest = BTreeMap<String, Vec<ParamTree>>;

impl ParamTree {
    pub fn leaf(node: ParamNode) -> Self {
        Self {
            node,
            children: Vec::new(),
        }
    }

    /// Depth-first pre-order walk; the callback receives each node and its depth (roots are 0)
    pub fn walk<F: FnMut(&ParamNode, usize)>(&self, f: &mut F) {
        self.walk_at(0, f);
    }

    fn walk_at<F: FnMut(&ParamNode, usize)>(&self, depth: usize, f: &mut F) {
        f(&self.node, depth);
        for child in &self.children {
            child.walk_at(depth + 1, f);
        }
    }

    /// Number of levels, a leaf being 1
    pub fn depth(&self) -> usize {
        1 + self.children.iter().map(ParamTree::depth).max().unwrap_or(0)
    }

    pub fn node_count(&self) -> usize {
        let mut count = 0;
        self.walk(&mut |_, _| count += 1);
        count
    }

    /// Rows of this tree in pre-order, as they were stored
    pub fn flatten(&self) -> Vec<ParamNode> {
        let mut rows = Vec::new();
        self.walk(&mut |node, _| rows.push(node.clone()));
        rows
    }

    /// Identity-free description of this tree, with siblings in a canonical order
    pub fn shape(&self) -> ParamShape {
        let mut children: Vec<ParamShape> = self.children.iter().map(ParamTree::shape).collect();
        children.sort();
        ParamShape {
            name: self.node.name.clone(),
            param_type: self.node.param_type,
            array_child_type: self.node.array_child_type,
            required: self.node.required,
            bucket: self.node.slot.bucket_key(),
            children,
        }
    }
}

/// Structural fingerprint of a parameter tree; two trees are isomorphic when their shapes are equal
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ParamShape {
    pub name: String,
    pub param_type: ParamType,
    pub array_child_type: Option<ParamType>,
    pub required: bool,
    pub bucket: String,
    pub children: Vec<ParamShape>,
}

/// Shape of a whole organized forest, empty buckets dropped
pub fn forest_shape(forest: &ParamForest) -> BTreeMap<String, Vec<ParamShape>> {
    forest
        .iter()
        .filter(|(_, roots)| !roots.is_empty())
        .map(|(bucket, roots)| {
            let mut shapes: Vec<ParamShape> = roots.iter().map(ParamTree::shape).collect();
            shapes.sort();
            (bucket.clone(), shapes)
        })
        .collect()
}

pub fn flatten_forest(forest: &ParamForest) -> Vec<ParamNode> {
    forest
        .values()
        .flat_map(|roots| roots.iter().flat_map(ParamTree::flatten))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: Id, parent_id: Option<Id>, name: &str, param_type: ParamType) -> ParamNode {
        ParamNode {
            id,
            endpoint_id: 1,
            parent_id,
            name: name.to_string(),
            param_type,
            required: false,
            default_value: None,
            description: None,
            example: None,
            array_child_type: None,
            slot: ParamSlot::Request {
                location: ParamLocation::Body,
            },
        }
    }

    #[test]
    fn test_walk_depth_and_flatten() {
        let tree = ParamTree {
            node: node(1, None, "user", ParamType::Object),
            children: vec![
                ParamTree::leaf(node(2, Some(1), "name", ParamType::String)),
                ParamTree {
                    node: node(3, Some(1), "profile", ParamType::Object),
                    children: vec![ParamTree::leaf(node(4, Some(3), "age", ParamType::Int))],
                },
            ],
        };

        assert_eq!(tree.depth(), 3);
        assert_eq!(tree.node_count(), 4);

        let mut depths = Vec::new();
        tree.walk(&mut |n, d| depths.push((n.name.clone(), d)));
        assert_eq!(
            depths,
            vec![
                ("user".to_string(), 0),
                ("name".to_string(), 1),
                ("profile".to_string(), 1),
                ("age".to_string(), 2)
            ]
        );

        let ids: Vec<Id> = tree.flatten().iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_shape_ignores_identity_and_sibling_order() {
        let a = ParamTree {
            node: node(1, None, "root", ParamType::Object),
            children: vec![
                ParamTree::leaf(node(2, Some(1), "a", ParamType::Int)),
                ParamTree::leaf(node(3, Some(1), "b", ParamType::String)),
            ],
        };
        let b = ParamTree {
            node: node(40, None, "root", ParamType::Object),
            children: vec![
                ParamTree::leaf(node(42, Some(40), "b", ParamType::String)),
                ParamTree::leaf(node(41, Some(40), "a", ParamType::Int)),
            ],
        };
        assert_eq!(a.shape(), b.shape());
    }

    #[test]
    fn test_param_node_serializes_flat_slot() {
        let mut response = node(5, None, "code", ParamType::Int);
        response.slot = ParamSlot::Response { status_code: 404 };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["status_code"], 404);
        assert_eq!(json["type"], "int");
        assert!(json.get("location").is_none());
    }

    #[test]
    fn test_param_input_accepts_minimal_node() {
        let input: ParamInput =
            serde_json::from_str(r#"{"name": "token", "type": "string", "children": null}"#).unwrap();
        assert_eq!(input.name, "token");
        assert!(input.children.is_none());
        assert!(input.location.is_none());
    }
}
