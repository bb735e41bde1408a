//! MeshAdaptError: unified error type for mesh-adapt-driver public APIs
//!
//! Every public operation returns `Result<_, MeshAdaptError>`. Each variant
//! belongs to exactly one [`ErrorKind`], which mirrors the failure taxonomy of
//! the construction / transfer / adaptation pipeline. None of these conditions
//! is recoverable inside the driver: the operation that raised it is aborted
//! and nothing is retried.

use crate::driver::MeshState;
use crate::topology::entity::EntityDim;
use thiserror::Error;

/// Coarse failure category of a [`MeshAdaptError`].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ErrorKind {
    /// Unreadable, missing or malformed model/mesh files.
    Io,
    /// Solver and library representations disagree, or an entity is unclassified.
    Topology,
    /// A field buffer does not match the node/variable counts.
    Shape,
    /// Ranks failed to reconcile numbering or shared values.
    Distributed,
    /// The adaptation service could not produce a valid mesh.
    Adaptation,
    /// Invalid scalar configuration or adaptation parameters.
    Configuration,
    /// Operation is not valid in the driver's current state.
    State,
}

/// Unified error type for mesh-adapt-driver operations.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MeshAdaptError {
    /// A model or mesh file could not be read.
    #[error("failed to read `{path}`: {message}")]
    Io { path: String, message: String },
    /// A mesh file was readable but malformed.
    #[error("mesh file parse error: {0}")]
    MeshIoParse(String),
    /// A geometric model file was readable but malformed.
    #[error("model file parse error: {0}")]
    ModelParse(String),

    /// Solver arrays and library topology disagree.
    #[error("topology error: {0}")]
    TopologyMismatch(String),
    /// An array has the wrong number of entries for the declared counts.
    #[error("topology error: `{array}` has {found} entries, expected {expected}")]
    ArrayLengthMismatch {
        array: &'static str,
        expected: usize,
        found: usize,
    },
    /// The solver's element description matches no supported cell type.
    #[error(
        "topology error: unsupported element with {nodes_per_element} nodes and {nodes_per_boundary} nodes per boundary"
    )]
    UnsupportedCell {
        nodes_per_element: usize,
        nodes_per_boundary: usize,
    },
    /// An entity has no valid geometric classification.
    #[error("topology error: {dim:?} {index} has no valid geometric classification ({reason})")]
    UnclassifiedEntity {
        dim: EntityDim,
        index: usize,
        reason: String,
    },
    /// A requested entity dimension does not exist in the mesh.
    #[error("topology error: the mesh has no {0:?} entities")]
    MissingDimension(EntityDim),

    /// A field buffer or count does not match the library representation.
    #[error("shape mismatch: {what} is {found}, expected {expected}")]
    ShapeMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },
    /// A named node field is not attached to the mesh.
    #[error("field `{0}` is not attached to the mesh")]
    FieldNotFound(String),

    /// Communication with a neighbour failed.
    #[error("communication with rank {neighbor} failed: {message}")]
    CommError { neighbor: usize, message: String },
    /// A received buffer had the wrong byte length.
    #[error("rank {neighbor} sent {got} bytes, expected {expected}")]
    BufferSizeMismatch {
        neighbor: usize,
        expected: usize,
        got: usize,
    },
    /// A neighbour sent a different number of records than the overlap implies.
    #[error("rank {neighbor} sent {got} records, expected {expected}")]
    PartCountMismatch {
        neighbor: usize,
        expected: usize,
        got: usize,
    },
    /// Ranks disagree about shared data.
    #[error("distributed consistency error: {0}")]
    DistributedConsistency(String),

    /// The adaptation service reported a failure.
    #[error("adaptation failed: {0}")]
    AdaptationFailed(String),

    /// Scalar configuration or adaptation parameters are invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// The driver is not in a state that allows the operation.
    #[error("`{operation}` is not allowed while the driver is {state:?}")]
    InvalidState {
        operation: &'static str,
        state: MeshState,
    },
    /// No size field has been computed for the current mesh.
    #[error("no size field has been computed for the current mesh")]
    MissingSizeField,
    /// The size field was not synchronised across partitions.
    #[error("the size field has not been synchronised across partitions")]
    SizeFieldNotSynchronized,
    /// A size field holds a non-positive or non-finite value.
    #[error("invalid size field: {0}")]
    InvalidSizeField(String),
}

impl MeshAdaptError {
    /// Failure category of this error.
    pub fn kind(&self) -> ErrorKind {
        use MeshAdaptError::*;
        match self {
            Io { .. } | MeshIoParse(_) | ModelParse(_) => ErrorKind::Io,
            TopologyMismatch(_)
            | ArrayLengthMismatch { .. }
            | UnsupportedCell { .. }
            | UnclassifiedEntity { .. }
            | MissingDimension(_) => ErrorKind::Topology,
            ShapeMismatch { .. } | FieldNotFound(_) => ErrorKind::Shape,
            CommError { .. }
            | BufferSizeMismatch { .. }
            | PartCountMismatch { .. }
            | DistributedConsistency(_) => ErrorKind::Distributed,
            AdaptationFailed(_) => ErrorKind::Adaptation,
            Config(_) => ErrorKind::Configuration,
            InvalidState { .. } | MissingSizeField | SizeFieldNotSynchronized | InvalidSizeField(_) => {
                ErrorKind::State
            }
        }
    }
}

impl From<std::io::Error> for MeshAdaptError {
    fn from(err: std::io::Error) -> Self {
        MeshAdaptError::Io {
            path: String::from("<stream>"),
            message: err.to_string(),
        }
    }
}

/// Convert a local index into the solver's `i32` index space.
pub(crate) fn to_index(value: usize) -> Result<i32, MeshAdaptError> {
    i32::try_from(value).map_err(|_| {
        MeshAdaptError::TopologyMismatch(format!("index {value} does not fit the solver's i32 arrays"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_the_taxonomy() {
        let io = MeshAdaptError::Io {
            path: "mesh.msh".into(),
            message: "not found".into(),
        };
        assert_eq!(io.kind(), ErrorKind::Io);
        let shape = MeshAdaptError::ShapeMismatch {
            what: "num_nodes",
            expected: 4,
            found: 3,
        };
        assert_eq!(shape.kind(), ErrorKind::Shape);
        assert_eq!(MeshAdaptError::Config("hmin > hmax".into()).kind(), ErrorKind::Configuration);
        assert_eq!(
            MeshAdaptError::DistributedConsistency("x".into()).kind(),
            ErrorKind::Distributed
        );
    }

    #[test]
    fn to_index_rejects_overflow() {
        assert_eq!(to_index(7).unwrap(), 7);
        assert!(to_index(usize::MAX).is_err());
    }
}
