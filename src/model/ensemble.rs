//! Tree-ensemble evaluation.
//!
//! A model is an additive ensemble of binary decision trees. Scoring walks
//! every tree from its root to a leaf, sums the leaf values with the base
//! margin and maps the sum to a probability with the logistic function.
//!
//! Trees are validated at construction: every split references an existing
//! feature and both children sit strictly after their parent, so a walk
//! always terminates without bounds checks failing.

use std::collections::HashSet;

use crate::error::ModelError;

/// A node of a decision tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// Descend `left` when `features[feature] < threshold`, else `right`.
    /// A NaN feature value follows `default_left`.
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
        default_left: bool,
    },
    /// Contribution added to the margin.
    Leaf(f64),
}

/// A validated decision tree; node 0 is the root.
#[derive(Debug, Clone)]
pub struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    fn validate(index: usize, nodes: Vec<Node>, feature_count: usize) -> Result<Self, ModelError> {
        if nodes.is_empty() {
            return Err(ModelError::EmptyTree { tree: index });
        }

        for (position, node) in nodes.iter().enumerate() {
            match *node {
                Node::Leaf(value) if !value.is_finite() => {
                    return Err(ModelError::NonFinite {
                        tree: index,
                        node: position,
                    });
                }
                Node::Leaf(_) => {}
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                    ..
                } => {
                    if feature >= feature_count {
                        return Err(ModelError::FeatureOutOfRange {
                            tree: index,
                            node: position,
                            feature,
                        });
                    }
                    if !threshold.is_finite() {
                        return Err(ModelError::NonFinite {
                            tree: index,
                            node: position,
                        });
                    }
                    for child in [left, right] {
                        if child <= position || child >= nodes.len() {
                            return Err(ModelError::InvalidChild {
                                tree: index,
                                node: position,
                                child,
                            });
                        }
                    }
                }
            }
        }

        Ok(Self { nodes })
    }

    /// Walk to the leaf selected by `features` and return its value.
    #[inline]
    fn leaf_value(&self, features: &[f64]) -> f64 {
        let mut index = 0;
        loop {
            match self.nodes[index] {
                Node::Leaf(value) => return value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                    default_left,
                } => {
                    let value = features[feature];
                    let go_left = if value.is_nan() {
                        default_left
                    } else {
                        value < threshold
                    };
                    index = if go_left { left } else { right };
                }
            }
        }
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }
}

/// A gradient-boosted tree ensemble producing probabilities.
///
/// Read-only once built; share it behind an `Arc` and score from any thread.
#[derive(Debug, Clone)]
pub struct TreeEnsemble {
    feature_names: Vec<String>,
    base_margin: f64,
    trees: Vec<Tree>,
}

impl TreeEnsemble {
    /// Build and validate an ensemble.
    pub fn new(
        feature_names: Vec<String>,
        base_margin: f64,
        trees: Vec<Vec<Node>>,
    ) -> Result<Self, ModelError> {
        if feature_names.is_empty() {
            return Err(ModelError::NoFeatures);
        }
        let mut seen = HashSet::with_capacity(feature_names.len());
        for name in &feature_names {
            if !seen.insert(name.as_str()) {
                return Err(ModelError::DuplicateFeature(name.clone()));
            }
        }
        if !base_margin.is_finite() {
            return Err(ModelError::NonFiniteMargin);
        }
        if trees.is_empty() {
            return Err(ModelError::NoTrees);
        }

        let trees = trees
            .into_iter()
            .enumerate()
            .map(|(index, nodes)| Tree::validate(index, nodes, feature_names.len()))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            feature_names,
            base_margin,
            trees,
        })
    }

    /// Probability in [0, 1] that the domain behind `features` should be blocked.
    pub fn score(&self, features: &[f64]) -> Result<f64, ModelError> {
        self.margin(features).map(logistic)
    }

    /// Raw additive score before the logistic transform.
    pub fn margin(&self, features: &[f64]) -> Result<f64, ModelError> {
        if features.len() != self.feature_names.len() {
            return Err(ModelError::FeatureMismatch {
                expected: self.feature_names.len(),
                actual: features.len(),
            });
        }

        Ok(self.base_margin
            + self
                .trees
                .iter()
                .map(|tree| tree.leaf_value(features))
                .sum::<f64>())
    }

    /// Ordered feature names the model was trained on.
    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    #[inline]
    pub fn feature_count(&self) -> usize {
        self.feature_names.len()
    }

    pub const fn base_margin(&self) -> f64 {
        self.base_margin
    }

    pub fn trees(&self) -> &[Tree] {
        &self.trees
    }

    #[inline]
    pub fn tree_count(&self) -> usize {
        self.trees.len()
    }
}

/// Map a margin to a probability.
#[inline]
pub fn logistic(margin: f64) -> f64 {
    1.0 / (1.0 + (-margin).exp())
}

/// Inverse of [`logistic`]; the margin that yields `probability`.
pub fn logit(probability: f64) -> f64 {
    (probability / (1.0 - probability)).ln()
}

#[cfg(test)]
pub mod tests {
    use super::*;

    /// One-feature model: `f0 < 0.5` scores `low`, otherwise `high`.
    pub fn two_class_model(low: f64, high: f64) -> TreeEnsemble {
        TreeEnsemble::new(
            vec!["ad_signal".into()],
            0.0,
            vec![vec![
                Node::Split {
                    feature: 0,
                    threshold: 0.5,
                    left: 1,
                    right: 2,
                    default_left: true,
                },
                Node::Leaf(logit(low)),
                Node::Leaf(logit(high)),
            ]],
        )
        .unwrap()
    }

    fn stump(feature: usize, threshold: f64, left: f64, right: f64) -> Vec<Node> {
        vec![
            Node::Split {
                feature,
                threshold,
                left: 1,
                right: 2,
                default_left: false,
            },
            Node::Leaf(left),
            Node::Leaf(right),
        ]
    }

    fn names(count: usize) -> Vec<String> {
        (0..count).map(|i| format!("f{i}")).collect()
    }

    #[test]
    fn should_descend_left_below_threshold() {
        let model = TreeEnsemble::new(names(1), 0.0, vec![stump(0, 5.0, -2.0, 3.0)]).unwrap();

        assert!((model.margin(&[1.0]).unwrap() + 2.0).abs() < 1e-12);
        assert!((model.margin(&[5.0]).unwrap() - 3.0).abs() < 1e-12);
        assert!((model.score(&[9.0]).unwrap() - logistic(3.0)).abs() < 1e-12);
    }

    #[test]
    fn should_sum_trees_and_base_margin() {
        let model = TreeEnsemble::new(
            names(2),
            0.25,
            vec![stump(0, 1.0, 0.5, -0.5), stump(1, 10.0, 1.0, 2.0)],
        )
        .unwrap();

        let margin = model.margin(&[0.0, 20.0]).unwrap();
        assert!((margin - (0.25 + 0.5 + 2.0)).abs() < 1e-12);
        assert_eq!(model.tree_count(), 2);
    }

    #[test]
    fn should_walk_deep_trees() {
        let nodes = vec![
            Node::Split {
                feature: 0,
                threshold: 0.0,
                left: 1,
                right: 2,
                default_left: true,
            },
            Node::Leaf(-1.0),
            Node::Split {
                feature: 1,
                threshold: 3.0,
                left: 3,
                right: 4,
                default_left: true,
            },
            Node::Leaf(0.5),
            Node::Leaf(1.5),
        ];
        let model = TreeEnsemble::new(names(2), 0.0, vec![nodes]).unwrap();

        assert!((model.margin(&[-1.0, 0.0]).unwrap() + 1.0).abs() < 1e-12);
        assert!((model.margin(&[1.0, 2.0]).unwrap() - 0.5).abs() < 1e-12);
        assert!((model.margin(&[1.0, 4.0]).unwrap() - 1.5).abs() < 1e-12);
    }

    #[test]
    fn should_follow_default_direction_for_missing_values() {
        let mut nodes = stump(0, 5.0, -2.0, 3.0);
        let model = TreeEnsemble::new(names(1), 0.0, vec![nodes.clone()]).unwrap();
        assert!((model.margin(&[f64::NAN]).unwrap() - 3.0).abs() < 1e-12);

        if let Node::Split { default_left, .. } = &mut nodes[0] {
            *default_left = true;
        }
        let model = TreeEnsemble::new(names(1), 0.0, vec![nodes]).unwrap();
        assert!((model.margin(&[f64::NAN]).unwrap() + 2.0).abs() < 1e-12);
    }

    #[test]
    fn should_reject_wrong_feature_count() {
        let model = TreeEnsemble::new(names(2), 0.0, vec![stump(0, 1.0, 0.0, 1.0)]).unwrap();

        assert!(matches!(
            model.score(&[1.0]),
            Err(ModelError::FeatureMismatch {
                expected: 2,
                actual: 1
            })
        ));
    }

    #[test]
    fn should_keep_probabilities_in_unit_interval() {
        for margin in [-1000.0, -10.0, 0.0, 10.0, 1000.0] {
            let p = logistic(margin);
            assert!((0.0..=1.0).contains(&p), "{margin} -> {p}");
        }
        assert!((logistic(0.0) - 0.5).abs() < 1e-12);
        assert!((logistic(logit(0.994)) - 0.994).abs() < 1e-12);
    }

    #[test]
    fn should_reject_cycles_and_out_of_range_children() {
        let backwards = vec![
            Node::Split {
                feature: 0,
                threshold: 1.0,
                left: 0,
                right: 1,
                default_left: true,
            },
            Node::Leaf(1.0),
        ];
        assert!(matches!(
            TreeEnsemble::new(names(1), 0.0, vec![backwards]),
            Err(ModelError::InvalidChild { child: 0, .. })
        ));

        let dangling = stump(0, 1.0, 0.0, 1.0)[..2].to_vec();
        assert!(matches!(
            TreeEnsemble::new(names(1), 0.0, vec![dangling]),
            Err(ModelError::InvalidChild { child: 2, .. })
        ));
    }

    #[test]
    fn should_reject_invalid_structure() {
        assert!(matches!(
            TreeEnsemble::new(vec![], 0.0, vec![vec![Node::Leaf(0.0)]]),
            Err(ModelError::NoFeatures)
        ));
        assert!(matches!(
            TreeEnsemble::new(vec!["a".into(), "a".into()], 0.0, vec![vec![Node::Leaf(0.0)]]),
            Err(ModelError::DuplicateFeature(_))
        ));
        assert!(matches!(
            TreeEnsemble::new(names(1), 0.0, vec![]),
            Err(ModelError::NoTrees)
        ));
        assert!(matches!(
            TreeEnsemble::new(names(1), 0.0, vec![vec![]]),
            Err(ModelError::EmptyTree { tree: 0 })
        ));
        assert!(matches!(
            TreeEnsemble::new(names(1), 0.0, vec![stump(3, 1.0, 0.0, 1.0)]),
            Err(ModelError::FeatureOutOfRange { feature: 3, .. })
        ));
        assert!(matches!(
            TreeEnsemble::new(names(1), 0.0, vec![vec![Node::Leaf(f64::INFINITY)]]),
            Err(ModelError::NonFinite { .. })
        ));
        assert!(matches!(
            TreeEnsemble::new(names(1), f64::NAN, vec![vec![Node::Leaf(0.0)]]),
            Err(ModelError::NonFiniteMargin)
        ));
    }

    #[test]
    fn two_class_model_should_separate_scores() {
        let model = two_class_model(0.05, 0.994);

        assert!((model.score(&[0.0]).unwrap() - 0.05).abs() < 1e-9);
        assert!((model.score(&[1.0]).unwrap() - 0.994).abs() < 1e-9);
    }
}
