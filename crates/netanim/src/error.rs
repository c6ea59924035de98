use thiserror::Error;

/// Error types for controller construction and snapshot handling
#[derive(Error, Debug)]
pub enum AnimError {
    /// Two states (or a state and a layer) share the same lookup name
    #[error("Duplicate state name: '{0}'")]
    DuplicateStateName(String),

    /// A mirror binding references a state that does not exist
    #[error("Mirror state '{mirror}' referenced by '{state}' not found")]
    MirrorNotFound { state: String, mirror: String },

    /// A mirror binding references a state of the wrong kind
    #[error("Mirror state '{mirror}' referenced by '{state}' is not a multi blend tree state")]
    MirrorKindMismatch { state: String, mirror: String },

    /// A mirror state would be evaluated before its partner
    #[error("Mirror state '{mirror}' must be evaluated before '{state}'")]
    MirrorEvaluationOrder { state: String, mirror: String },

    /// Mirror set layout does not line up with the partner state
    #[error("State '{state}' has {actual} sets, mirror '{mirror}' has {expected}")]
    MirrorSetCountMismatch {
        state: String,
        mirror: String,
        expected: usize,
        actual: usize,
    },

    /// A motion clip has zero or negative length
    #[error("Clip '{clip}' in state '{state}' has non-positive length")]
    InvalidClipLength { state: String, clip: String },

    /// A multi clip state was declared without any clips
    #[error("State '{0}' has no clip nodes")]
    EmptyState(String),

    /// A declared network property occupies no words
    #[error("Network property '{0}' has zero word count")]
    ZeroSizedProperty(String),

    /// Two network properties share the same name
    #[error("Duplicate network property: '{0}'")]
    DuplicateProperty(String),

    /// A property names an interpolation hook that is not registered
    #[error("Unknown interpolation hook '{hook}' for property '{name}'")]
    UnknownInterpolationHook { name: String, hook: String },

    /// A snapshot buffer does not match the wire schema - peers disagree
    /// on the protocol version and the payload must not be decoded
    #[error("Snapshot buffer has {actual} words, schema requires {expected}")]
    BufferSize { expected: usize, actual: usize },
}

/// Result type using AnimError
pub type Result<T> = std::result::Result<T, AnimError>;
