//! Shared aircraft file
//!
//! Every module reads and writes the same hierarchical document. The routine
//! only needs it as a key-path store, so adapters talk to [`SharedFile`] and
//! the document itself is a JSON tree addressed by `/`-separated paths
//! (`/aircraft/model/reference/area`).

use std::fs;
use std::path::Path;

use serde_json::{Map, Value as Json};
use tracing::debug;

use crate::error::{Result, RoutineError};
use crate::value::Value;

/// Key-path access to the shared aircraft file.
pub trait SharedFile {
    /// Leaf value at `path`, if present.
    fn get(&self, path: &str) -> Option<Value>;

    /// Write a leaf, creating intermediate branches.
    fn set(&mut self, path: &str, value: &Value) -> Result<()>;

    /// Make sure every branch along `path` exists.
    fn create_branch(&mut self, path: &str) -> Result<()>;

    fn contains(&self, path: &str) -> bool;
}

fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

#[derive(Debug, Clone, PartialEq)]
pub struct JsonTree {
    root: Json,
}

impl Default for JsonTree {
    fn default() -> Self {
        Self {
            root: Json::Object(Map::new()),
        }
    }
}

impl JsonTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(root: Json) -> Result<Self> {
        if !root.is_object() {
            return Err(RoutineError::Store(
                "shared file root must be an object".to_string(),
            ));
        }
        Ok(Self { root })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| RoutineError::io(path, e))?;
        let root: Json = serde_json::from_str(&text)
            .map_err(|e| RoutineError::Store(format!("{}: {e}", path.display())))?;
        debug!(path = %path.display(), "loaded shared file");
        Self::from_json(root)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| RoutineError::io(parent, e))?;
        }
        let text = serde_json::to_string_pretty(&self.root)
            .map_err(|e| RoutineError::Store(e.to_string()))?;
        fs::write(path, text).map_err(|e| RoutineError::io(path, e))?;
        debug!(path = %path.display(), "saved shared file");
        Ok(())
    }

    /// Snapshot the current document to `path`, leaving the working copy as is.
    pub fn copy_to(&self, path: &Path) -> Result<()> {
        self.save(path)
    }

    fn node(&self, path: &str) -> Option<&Json> {
        segments(path).try_fold(&self.root, |node, seg| node.get(seg))
    }

    fn branch_mut(&mut self, path: &str) -> Result<&mut Map<String, Json>> {
        let mut node = &mut self.root;
        for seg in segments(path) {
            let map = node
                .as_object_mut()
                .ok_or_else(|| RoutineError::Store(format!("'{path}' crosses a leaf")))?;
            node = map
                .entry(seg.to_string())
                .or_insert_with(|| Json::Object(Map::new()));
        }
        node.as_object_mut()
            .ok_or_else(|| RoutineError::Store(format!("'{path}' is a leaf, not a branch")))
    }
}

impl SharedFile for JsonTree {
    fn get(&self, path: &str) -> Option<Value> {
        self.node(path).and_then(Value::from_json)
    }

    fn set(&mut self, path: &str, value: &Value) -> Result<()> {
        let (parent, leaf) = match path.trim_end_matches('/').rsplit_once('/') {
            Some((parent, leaf)) if !leaf.is_empty() => (parent, leaf),
            _ => return Err(RoutineError::Store(format!("invalid leaf path '{path}'"))),
        };
        let branch = self.branch_mut(parent)?;
        if matches!(branch.get(leaf), Some(Json::Object(_))) {
            return Err(RoutineError::Store(format!(
                "'{path}' is a branch, cannot hold a value"
            )));
        }
        branch.insert(leaf.to_string(), value.to_json());
        Ok(())
    }

    fn create_branch(&mut self, path: &str) -> Result<()> {
        self.branch_mut(path).map(|_| ())
    }

    fn contains(&self, path: &str) -> bool {
        self.node(path).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_get_creates_branches() {
        let mut tree = JsonTree::new();
        tree.set("/aircraft/model/reference/area", &Value::Real(40.5))
            .unwrap();
        assert_eq!(
            tree.get("/aircraft/model/reference/area"),
            Some(Value::Real(40.5))
        );
        assert!(tree.contains("/aircraft/model"));
        assert_eq!(tree.get("/aircraft/model"), None);
    }

    #[test]
    fn textual_leaves_are_parsed() {
        let tree = JsonTree::from_json(serde_json::json!({
            "a": { "flag": "True", "n": "12", "x": "0.25", "name": "wing" }
        }))
        .unwrap();
        assert_eq!(tree.get("/a/flag"), Some(Value::Bool(true)));
        assert_eq!(tree.get("/a/n"), Some(Value::Int(12)));
        assert_eq!(tree.get("/a/x"), Some(Value::Real(0.25)));
        assert_eq!(tree.get("/a/name"), Some(Value::Str("wing".into())));
    }

    #[test]
    fn leaf_and_branch_conflicts() {
        let mut tree = JsonTree::new();
        tree.set("/a/b", &Value::Int(1)).unwrap();
        assert!(tree.set("/a/b/c", &Value::Int(2)).is_err());
        tree.create_branch("/x/y").unwrap();
        assert!(tree.set("/x/y", &Value::Int(3)).is_err());
        assert!(tree.set("/", &Value::Int(3)).is_err());
    }

    #[test]
    fn save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub/aircraft.json");
        let mut tree = JsonTree::new();
        tree.set("/settings/workdir", &Value::Str("runs/Run1".into()))
            .unwrap();
        tree.save(&path).unwrap();
        assert_eq!(JsonTree::load(&path).unwrap(), tree);
    }

    #[test]
    fn non_object_root_is_rejected() {
        assert!(JsonTree::from_json(serde_json::json!([1, 2])).is_err());
    }
}
