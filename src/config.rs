//! Driver configuration and adaptation parameters.
//!
//! Both structures deserialize with `serde`, so a caller can keep them in a
//! JSON file next to the model. Validation is explicit: [`DriverConfig::validate`]
//! and [`AdaptParameters::validate`] return [`MeshAdaptError::Config`].

use crate::mesh_error::MeshAdaptError;
use serde::{Deserialize, Serialize};

/// Ordering of a flat solver field buffer.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldLayout {
    /// `buffer[var * num_nodes + node]`.
    #[default]
    VariableMajor,
    /// `buffer[node * num_vars + var]`.
    NodeMajor,
}

impl FieldLayout {
    /// Position of `(node, var)` in a buffer of this layout.
    #[inline]
    pub fn index(self, node: usize, var: usize, num_nodes: usize, num_vars: usize) -> usize {
        match self {
            FieldLayout::VariableMajor => var * num_nodes + node,
            FieldLayout::NodeMajor => node * num_vars + var,
        }
    }
}

/// Scalar configuration fixed at driver construction.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct DriverConfig {
    /// Largest admissible target size.
    pub hmax: f64,
    /// Smallest admissible target size.
    pub hmin: f64,
    /// Bound on refinement passes inside one adaptation call.
    pub num_iter: usize,
    #[serde(default)]
    pub layout: FieldLayout,
}

impl DriverConfig {
    pub fn new(hmax: f64, hmin: f64, num_iter: usize) -> Self {
        Self {
            hmax,
            hmin,
            num_iter,
            layout: FieldLayout::default(),
        }
    }

    pub fn with_layout(mut self, layout: FieldLayout) -> Self {
        self.layout = layout;
        self
    }

    pub fn validate(&self) -> Result<(), MeshAdaptError> {
        if !(self.hmin.is_finite() && self.hmin > 0.0) {
            return Err(MeshAdaptError::Config(format!("hmin must be positive, got {}", self.hmin)));
        }
        if !(self.hmax.is_finite() && self.hmax > 0.0) {
            return Err(MeshAdaptError::Config(format!("hmax must be positive, got {}", self.hmax)));
        }
        if self.hmin > self.hmax {
            return Err(MeshAdaptError::Config(format!(
                "hmin ({}) is larger than hmax ({})",
                self.hmin, self.hmax
            )));
        }
        if self.num_iter == 0 {
            return Err(MeshAdaptError::Config("num_iter must be at least 1".into()));
        }
        Ok(())
    }

    /// Clamp a size into `[hmin, hmax]`.
    #[inline]
    pub fn clamp(&self, h: f64) -> f64 {
        h.clamp(self.hmin, self.hmax)
    }
}

/// How the isotropic target size is derived.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SizeMetric {
    /// `factor` times the mean length of the edges incident to each vertex.
    EdgeLengthScale { factor: f64 },
    /// `hmin` where `|u| <= band_width` for the given solution component,
    /// `hmax` elsewhere.
    InterfaceBand { component: usize, band_width: f64 },
    /// `target_error / |grad u|` of the given solution component.
    GradientError { component: usize, target_error: f64 },
}

/// Bounds on the shape of anisotropic sizes.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct AnisotropyBounds {
    /// Largest allowed ratio between the biggest and smallest principal size.
    pub max_ratio: f64,
    /// Interpolation error target for the Hessian-based sizes.
    pub target_error: f64,
}

impl Default for AnisotropyBounds {
    fn default() -> Self {
        Self {
            max_ratio: 10.0,
            target_error: 0.01,
        }
    }
}

/// Parameters of one size-field computation.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct AdaptParameters {
    pub metric: SizeMetric,
    #[serde(default)]
    pub anisotropy: AnisotropyBounds,
    #[serde(default)]
    pub smoothing_iterations: usize,
    #[serde(default = "default_smoothing_weight")]
    pub smoothing_weight: f64,
}

fn default_smoothing_weight() -> f64 {
    0.5
}

impl Default for AdaptParameters {
    fn default() -> Self {
        Self {
            metric: SizeMetric::EdgeLengthScale { factor: 1.0 },
            anisotropy: AnisotropyBounds::default(),
            smoothing_iterations: 0,
            smoothing_weight: default_smoothing_weight(),
        }
    }
}

impl AdaptParameters {
    pub fn edge_length_scale(factor: f64) -> Self {
        Self {
            metric: SizeMetric::EdgeLengthScale { factor },
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), MeshAdaptError> {
        let positive = |what: &str, v: f64| {
            if v.is_finite() && v > 0.0 {
                Ok(())
            } else {
                Err(MeshAdaptError::Config(format!("{what} must be positive, got {v}")))
            }
        };
        match self.metric {
            SizeMetric::EdgeLengthScale { factor } => positive("factor", factor)?,
            SizeMetric::InterfaceBand { band_width, .. } => {
                if !(band_width.is_finite() && band_width >= 0.0) {
                    return Err(MeshAdaptError::Config(format!(
                        "band_width must be non-negative, got {band_width}"
                    )));
                }
            }
            SizeMetric::GradientError { target_error, .. } => positive("target_error", target_error)?,
        }
        positive("anisotropy.target_error", self.anisotropy.target_error)?;
        if !(self.anisotropy.max_ratio.is_finite() && self.anisotropy.max_ratio >= 1.0) {
            return Err(MeshAdaptError::Config(format!(
                "anisotropy.max_ratio must be at least 1, got {}",
                self.anisotropy.max_ratio
            )));
        }
        if !(0.0..=1.0).contains(&self.smoothing_weight) {
            return Err(MeshAdaptError::Config(format!(
                "smoothing_weight must lie in [0, 1], got {}",
                self.smoothing_weight
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_inverted_bounds() {
        assert!(DriverConfig::new(1.0, 0.1, 3).validate().is_ok());
        let err = DriverConfig::new(0.1, 1.0, 3).validate().unwrap_err();
        assert!(matches!(err, MeshAdaptError::Config(_)));
        assert!(DriverConfig::new(1.0, 0.0, 3).validate().is_err());
        assert!(DriverConfig::new(1.0, 0.1, 0).validate().is_err());
    }

    #[test]
    fn layout_indices() {
        assert_eq!(FieldLayout::VariableMajor.index(2, 1, 5, 3), 7);
        assert_eq!(FieldLayout::NodeMajor.index(2, 1, 5, 3), 7);
        assert_eq!(FieldLayout::NodeMajor.index(4, 2, 5, 3), 14);
    }

    #[test]
    fn deserializes_with_defaults() {
        let config: DriverConfig = serde_json::from_str(r#"{"hmax": 0.5, "hmin": 0.01, "num_iter": 4}"#).unwrap();
        assert_eq!(config.layout, FieldLayout::VariableMajor);

        let params: AdaptParameters =
            serde_json::from_str(r#"{"metric": {"kind": "gradient_error", "component": 0, "target_error": 0.1}}"#)
                .unwrap();
        assert_eq!(params.smoothing_weight, 0.5);
        assert!(params.validate().is_ok());

        let bad = AdaptParameters {
            smoothing_weight: 2.0,
            ..AdaptParameters::default()
        };
        assert!(bad.validate().is_err());
    }
}
