//! Versioned JSON serialization of a [`TreeEnsemble`].
//!
//! ```json
//! {
//!   "format": "sinkhole-tree-ensemble",
//!   "version": 1,
//!   "feature_names": ["domain_length", "entropy"],
//!   "base_margin": 0.0,
//!   "trees": [
//!     { "nodes": [
//!       { "feature": 1, "threshold": 3.2, "left": 1, "right": 2, "default_left": true },
//!       { "leaf": -1.3 },
//!       { "leaf": 0.8 }
//!     ] }
//!   ]
//! }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use super::ensemble::{Node, TreeEnsemble};
use crate::error::ModelError;

/// Value of the `format` field.
pub const FORMAT: &str = "sinkhole-tree-ensemble";

/// Highest supported `version`.
pub const VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct ModelFile {
    format: String,
    version: u32,
    feature_names: Vec<String>,
    #[serde(default)]
    base_margin: f64,
    trees: Vec<TreeFile>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct TreeFile {
    nodes: Vec<NodeFile>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum NodeFile {
    Leaf {
        leaf: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
        #[serde(default = "default_left")]
        default_left: bool,
    },
}

const fn default_left() -> bool {
    true
}

impl From<NodeFile> for Node {
    fn from(node: NodeFile) -> Self {
        match node {
            NodeFile::Leaf { leaf } => Self::Leaf(leaf),
            NodeFile::Split {
                feature,
                threshold,
                left,
                right,
                default_left,
            } => Self::Split {
                feature,
                threshold,
                left,
                right,
                default_left,
            },
        }
    }
}

impl From<&Node> for NodeFile {
    fn from(node: &Node) -> Self {
        match *node {
            Node::Leaf(leaf) => Self::Leaf { leaf },
            Node::Split {
                feature,
                threshold,
                left,
                right,
                default_left,
            } => Self::Split {
                feature,
                threshold,
                left,
                right,
                default_left,
            },
        }
    }
}

impl TreeEnsemble {
    /// Load a model file. Any failure here must stop the process.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ModelError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ModelError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let model = Self::from_json(&content)?;
        info!(
            path = %path.display(),
            trees = model.tree_count(),
            features = model.feature_count(),
            "model loaded"
        );
        Ok(model)
    }

    /// Parse and validate a model from its JSON text.
    pub fn from_json(content: &str) -> Result<Self, ModelError> {
        let file: ModelFile = serde_json::from_str(content)?;
        if file.format != FORMAT || file.version == 0 || file.version > VERSION {
            return Err(ModelError::UnsupportedFormat {
                format: file.format,
                version: file.version,
            });
        }

        let trees = file
            .trees
            .into_iter()
            .map(|tree| tree.nodes.into_iter().map(Node::from).collect())
            .collect();
        Self::new(file.feature_names, file.base_margin, trees)
    }

    /// Serialize the model to its JSON file format.
    pub fn to_json(&self) -> Result<String, ModelError> {
        let file = ModelFile {
            format: FORMAT.to_string(),
            version: VERSION,
            feature_names: self.feature_names().to_vec(),
            base_margin: self.base_margin(),
            trees: self
                .trees()
                .iter()
                .map(|tree| TreeFile {
                    nodes: tree.nodes().iter().map(NodeFile::from).collect(),
                })
                .collect(),
        };
        Ok(serde_json::to_string_pretty(&file)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const MODEL: &str = r#"{
        "format": "sinkhole-tree-ensemble",
        "version": 1,
        "feature_names": ["domain_length", "ad_keyword_count"],
        "base_margin": -0.5,
        "trees": [
            { "nodes": [
                { "feature": 1, "threshold": 0.5, "left": 1, "right": 2 },
                { "leaf": -1.0 },
                { "leaf": 2.0 }
            ] },
            { "nodes": [
                { "feature": 0, "threshold": 20, "left": 1, "right": 2, "default_left": false },
                { "leaf": 0.0 },
                { "leaf": 0.5 }
            ] }
        ]
    }"#;

    #[test]
    fn should_parse_model_json() {
        let model = TreeEnsemble::from_json(MODEL).unwrap();

        assert_eq!(model.feature_names(), ["domain_length", "ad_keyword_count"]);
        assert_eq!(model.tree_count(), 2);
        // -0.5 + 2.0 + 0.5
        assert!((model.margin(&[30.0, 2.0]).unwrap() - 2.0).abs() < 1e-12);
        // -0.5 - 1.0 + 0.0
        assert!((model.margin(&[10.0, 0.0]).unwrap() + 1.5).abs() < 1e-12);
    }

    #[test]
    fn should_default_missing_values_to_left() {
        let model = TreeEnsemble::from_json(MODEL).unwrap();
        let margin = model.margin(&[f64::NAN, f64::NAN]).unwrap();
        // tree 0 goes left (-1.0), tree 1 goes right (0.5)
        assert!((margin + 1.0).abs() < 1e-12);
    }

    #[test]
    fn should_round_trip_through_json() {
        let model = TreeEnsemble::from_json(MODEL).unwrap();
        let reloaded = TreeEnsemble::from_json(&model.to_json().unwrap()).unwrap();

        assert_eq!(reloaded.feature_names(), model.feature_names());
        assert_eq!(reloaded.trees()[1].nodes(), model.trees()[1].nodes());
    }

    #[test]
    fn should_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(MODEL.as_bytes()).unwrap();

        let model = TreeEnsemble::load(file.path()).unwrap();
        assert_eq!(model.feature_count(), 2);
    }

    #[test]
    fn should_fail_on_missing_file() {
        let err = TreeEnsemble::load("/nonexistent/model.json").unwrap_err();
        assert!(matches!(err, ModelError::Read { .. }));
    }

    #[test]
    fn should_fail_on_corrupt_json() {
        assert!(matches!(
            TreeEnsemble::from_json("{ not json"),
            Err(ModelError::Json(_))
        ));
        assert!(matches!(
            TreeEnsemble::from_json(r#"{"format": "sinkhole-tree-ensemble"}"#),
            Err(ModelError::Json(_))
        ));
    }

    #[test]
    fn should_reject_unknown_format_or_version() {
        let other_format = MODEL.replace("sinkhole-tree-ensemble", "xgboost");
        assert!(matches!(
            TreeEnsemble::from_json(&other_format),
            Err(ModelError::UnsupportedFormat { .. })
        ));

        let future = MODEL.replace("\"version\": 1", "\"version\": 2");
        assert!(matches!(
            TreeEnsemble::from_json(&future),
            Err(ModelError::UnsupportedFormat { version: 2, .. })
        ));
    }

    #[test]
    fn should_reject_structurally_invalid_trees() {
        let bad_feature = MODEL.replace("\"feature\": 1", "\"feature\": 7");
        assert!(matches!(
            TreeEnsemble::from_json(&bad_feature),
            Err(ModelError::FeatureOutOfRange { feature: 7, .. })
        ));
    }
}
