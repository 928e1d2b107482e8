//! Domain → feature vector extraction.

pub mod lexical;

pub use lexical::LexicalFeatures;

/// Turns a domain into the fixed-length vector a model scores.
///
/// Implementations must be deterministic and must not fail: a malformed
/// domain yields a neutral vector of the same length.
pub trait FeatureProvider: Send + Sync + 'static {
    /// Length of every vector returned by [`extract`](Self::extract).
    fn feature_count(&self) -> usize;

    fn extract(&self, domain: &str) -> Vec<f64>;
}
