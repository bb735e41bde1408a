//! Node-attached fields and the size field consumed by adaptation.

use crate::mesh_error::MeshAdaptError;

/// A named, multi-component value attached to every vertex.
///
/// Values are stored node-major: `values[node * components + c]`.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct NodeField {
    name: String,
    components: usize,
    values: Vec<f64>,
}

impl NodeField {
    /// A zero-initialised field over `num_nodes` vertices.
    pub fn zeros(name: impl Into<String>, components: usize, num_nodes: usize) -> Self {
        Self {
            name: name.into(),
            components,
            values: vec![0.0; components * num_nodes],
        }
    }

    /// Wrap node-major `values`; the length must be a multiple of `components`.
    pub fn from_values(
        name: impl Into<String>,
        components: usize,
        values: Vec<f64>,
    ) -> Result<Self, MeshAdaptError> {
        if components == 0 {
            return Err(MeshAdaptError::ShapeMismatch {
                what: "field components",
                expected: 1,
                found: 0,
            });
        }
        if values.len() % components != 0 {
            return Err(MeshAdaptError::ShapeMismatch {
                what: "field values",
                expected: (values.len() / components + 1) * components,
                found: values.len(),
            });
        }
        Ok(Self {
            name: name.into(),
            components,
            values,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn components(&self) -> usize {
        self.components
    }

    pub fn num_nodes(&self) -> usize {
        self.values.len() / self.components.max(1)
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn values_mut(&mut self) -> &mut [f64] {
        &mut self.values
    }

    /// Components of one node.
    pub fn node(&self, node: usize) -> &[f64] {
        &self.values[node * self.components..(node + 1) * self.components]
    }

    pub fn node_mut(&mut self, node: usize) -> &mut [f64] {
        &mut self.values[node * self.components..(node + 1) * self.components]
    }

    /// Append a node whose value is the mean of `parents`. Returns its index.
    pub fn push_average(&mut self, parents: &[usize]) -> usize {
        let n = self.components;
        let weight = 1.0 / parents.len().max(1) as f64;
        let mut value = vec![0.0; n];
        for &p in parents {
            for (acc, v) in value.iter_mut().zip(self.node(p)) {
                *acc += weight * v;
            }
        }
        self.values.extend_from_slice(&value);
        self.num_nodes() - 1
    }
}

/// Per-vertex target size (isotropic) or shape (anisotropic).
#[derive(Clone, Debug, PartialEq)]
pub enum SizeField {
    /// One target edge length per vertex.
    Isotropic(NodeField),
    /// `dim` principal sizes and a `dim × dim` row-major frame per vertex,
    /// one principal direction per row.
    Anisotropic { scales: NodeField, frames: NodeField },
}

impl SizeField {
    pub fn num_nodes(&self) -> usize {
        match self {
            SizeField::Isotropic(h) => h.num_nodes(),
            SizeField::Anisotropic { scales, .. } => scales.num_nodes(),
        }
    }

    pub fn is_isotropic(&self) -> bool {
        matches!(self, SizeField::Isotropic(_))
    }

    /// Length of `edge` measured in the metric of `node` (1.0 = on target).
    pub fn metric_length(&self, node: usize, edge: [f64; 3]) -> f64 {
        match self {
            SizeField::Isotropic(h) => norm(edge) / h.node(node)[0],
            SizeField::Anisotropic { scales, frames } => {
                let sizes = scales.node(node);
                let dim = sizes.len();
                let frame = frames.node(node);
                let mut sum = 0.0;
                for (i, h) in sizes.iter().enumerate() {
                    let projected: f64 = (0..dim).map(|k| frame[i * dim + k] * edge[k]).sum();
                    sum += (projected / h) * (projected / h);
                }
                sum.sqrt()
            }
        }
    }

    /// Append a vertex interpolated between `parents`.
    ///
    /// Scales are averaged; an anisotropic frame is taken from the first parent
    /// because averaged frames are no longer orthonormal.
    pub fn push_average(&mut self, parents: &[usize]) {
        match self {
            SizeField::Isotropic(h) => {
                h.push_average(parents);
            }
            SizeField::Anisotropic { scales, frames } => {
                scales.push_average(parents);
                if let Some(&first) = parents.first() {
                    let frame = frames.node(first).to_vec();
                    frames.values.extend_from_slice(&frame);
                }
            }
        }
    }

    /// Every size must be positive and finite.
    pub fn validate(&self) -> Result<(), MeshAdaptError> {
        let sizes = match self {
            SizeField::Isotropic(h) => h,
            SizeField::Anisotropic { scales, .. } => scales,
        };
        match sizes.values().iter().position(|v| !(v.is_finite() && *v > 0.0)) {
            Some(i) => Err(MeshAdaptError::InvalidSizeField(format!(
                "node {} has size {}",
                i / sizes.components().max(1),
                sizes.values()[i]
            ))),
            None => Ok(()),
        }
    }
}

pub(crate) fn norm(v: [f64; 3]) -> f64 {
    (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt()
}
