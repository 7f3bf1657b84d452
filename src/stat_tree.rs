//! Hierarchical statistics tree keyed by dotted name paths.
//!
//! The tree is stored as an arena with a name-to-index map, so building from
//! a flat record list is idempotent per path and parent/child traversal is
//! index-based rather than pointer-based.

use std::collections::HashMap;

use serde::Serialize;

use crate::error::{Error, Result};
use crate::hook::LeafUnitRecord;

/// One node of the statistics tree. Metric fields are zero on intermediate
/// nodes until a query aggregates their subtree.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatNode {
    pub name: String,
    pub input_shape: Vec<usize>,
    pub output_shape: Vec<usize>,
    pub parameter_quantity: u64,
    pub inference_memory: u64,
    pub madd: u64,
    pub flops: u64,
    pub duration: f64,
    /// `[parameter_bytes, activation_bytes]`
    pub memory: [u64; 2],
}

struct TreeEntry {
    parent: Option<usize>,
    children: Vec<usize>,
    depth: usize,
    stat: StatNode,
}

/// Exclusive owner of the stat node arena
pub struct StatTree {
    entries: Vec<TreeEntry>,
    index: HashMap<String, usize>,
}

impl StatTree {
    pub fn new() -> Self {
        let root = TreeEntry {
            parent: None,
            children: Vec::new(),
            depth: 0,
            stat: StatNode {
                name: "root".to_string(),
                ..StatNode::default()
            },
        };
        Self {
            entries: vec![root],
            index: HashMap::new(),
        }
    }

    /// Build a tree from the flat leaf-record collection. Paths are inserted
    /// idempotently, so the resulting structure does not depend on record
    /// order.
    pub fn from_leaf_records(records: &[LeafUnitRecord]) -> Self {
        let mut tree = Self::new();
        for record in records {
            tree.insert(record);
        }
        tree
    }

    fn insert(&mut self, record: &LeafUnitRecord) {
        let segments: Vec<&str> = record.name_path.split('.').collect();
        let mut parent = 0usize;
        let mut path = String::new();
        for (i, segment) in segments.iter().enumerate() {
            if !path.is_empty() {
                path.push('.');
            }
            path.push_str(segment);
            let node = match self.index.get(&path) {
                Some(&existing) => existing,
                None => {
                    let id = self.entries.len();
                    self.entries.push(TreeEntry {
                        parent: Some(parent),
                        children: Vec::new(),
                        depth: i + 1,
                        stat: StatNode {
                            name: path.clone(),
                            ..StatNode::default()
                        },
                    });
                    self.entries[parent].children.push(id);
                    self.index.insert(path.clone(), id);
                    id
                }
            };
            if i == segments.len() - 1 {
                let stat = &mut self.entries[node].stat;
                stat.input_shape = record.input_shape.clone();
                stat.output_shape = record.output_shape.clone();
                stat.parameter_quantity = record.parameter_quantity;
                stat.inference_memory = record.inference_memory;
                stat.madd = record.madd;
                stat.flops = record.flops;
                stat.duration = record.duration;
                stat.memory = record.memory;
            }
            parent = node;
        }
    }

    /// Look up a node by its full dotted path
    pub fn get(&self, path: &str) -> Result<&StatNode> {
        match self.index.get(path) {
            Some(&id) => Ok(&self.entries[id].stat),
            None => Err(Error::PathNotFound(path.to_string())),
        }
    }

    /// Aggregated metrics over the subtree rooted at `path`
    pub fn aggregated(&self, path: &str) -> Result<StatNode> {
        match self.index.get(path) {
            Some(&id) => Ok(self.aggregate_entry(id)),
            None => Err(Error::PathNotFound(path.to_string())),
        }
    }

    fn leaf_entries(&self) -> Vec<usize> {
        let mut leaves = Vec::new();
        let mut stack = vec![0usize];
        while let Some(id) = stack.pop() {
            let entry = &self.entries[id];
            if entry.children.is_empty() {
                // A childless root means an empty tree, not a leaf
                if id != 0 {
                    leaves.push(id);
                }
            } else {
                for &child in entry.children.iter().rev() {
                    stack.push(child);
                }
            }
        }
        leaves
    }

    /// Nodes at (or coarser than) `query_granularity` depth, with subtree
    /// metrics aggregated onto each returned node. Leaves shallower than the
    /// requested depth are returned as-is.
    pub fn collected_nodes(&self, query_granularity: usize) -> Vec<StatNode> {
        let mut picked: Vec<usize> = Vec::new();
        for leaf in self.leaf_entries() {
            let mut chosen = leaf;
            let mut cursor = Some(leaf);
            while let Some(id) = cursor {
                if self.entries[id].depth == query_granularity {
                    chosen = id;
                }
                cursor = self.entries[id].parent;
            }
            if !picked.contains(&chosen) {
                picked.push(chosen);
            }
        }
        picked.into_iter().map(|id| self.aggregate_entry(id)).collect()
    }

    fn aggregate_entry(&self, id: usize) -> StatNode {
        let entry = &self.entries[id];
        let mut stat = entry.stat.clone();
        if entry.children.is_empty() {
            return stat;
        }
        let mut madd = 0u64;
        let mut flops = 0u64;
        let mut params = 0u64;
        let mut inference = 0u64;
        let mut memory = [0u64; 2];
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let node = &self.entries[current];
            madd += node.stat.madd;
            flops += node.stat.flops;
            params += node.stat.parameter_quantity;
            inference += node.stat.inference_memory;
            memory[0] += node.stat.memory[0];
            memory[1] += node.stat.memory[1];
            stack.extend(&node.children);
        }
        stat.madd = madd;
        stat.flops = flops;
        stat.parameter_quantity = params;
        stat.inference_memory = inference;
        stat.memory = memory;
        // Wall-clock time does not sum meaningfully across nesting levels
        stat.duration = 0.0;
        stat
    }
}

impl Default for StatTree {
    fn default() -> Self {
        Self::new()
    }
}
