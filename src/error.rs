use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoordError {
    #[error("coordination directory not initialized: {0} (run `agentcoord init` first)")]
    NotInitialized(String),

    #[error("contention: could not lock '{path}' after {attempts} attempts")]
    Contention { path: String, attempts: u32 },

    #[error("corrupt document '{0}': {1}")]
    CorruptDocument(String, String),

    #[error("invalid instance id '{0}'")]
    InvalidInstanceId(String),

    #[error("invalid instance id prefix '{0}' (expected lowercase ASCII letters)")]
    InvalidIdPrefix(String),

    #[error("instance '{0}' is not registered")]
    InstanceNotFound(String),

    #[error("no calling instance given (pass --instance or set AGENTCOORD_INSTANCE_ID)")]
    MissingInstance,

    #[error("could not allocate a unique instance id after {0} attempts")]
    IdCollision(u32),

    #[error("could not read OS randomness: {0}")]
    Randomness(String),

    #[error("invalid resource path '{0}': {1}")]
    InvalidPath(String, String),

    #[error("invalid decision: {0}")]
    InvalidDecision(String),

    #[error("decision sequence exhausted for {0} (the daily counter is limited to 9999)")]
    DecisionSequenceExhausted(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CoordError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotInitialized(_) => "not_initialized",
            Self::Contention { .. } => "contention",
            Self::CorruptDocument(_, _) => "corrupt_document",
            Self::InvalidInstanceId(_) => "invalid_instance_id",
            Self::InvalidIdPrefix(_) => "invalid_id_prefix",
            Self::InstanceNotFound(_) => "instance_not_found",
            Self::MissingInstance => "missing_instance",
            Self::IdCollision(_) => "id_collision",
            Self::Randomness(_) => "randomness_error",
            Self::InvalidPath(_, _) => "invalid_path",
            Self::InvalidDecision(_) => "invalid_decision",
            Self::DecisionSequenceExhausted(_) => "decision_sequence_exhausted",
            Self::InvalidConfig(_) => "invalid_config",
            Self::Io(_) => "io_error",
            Self::Json(_) => "json_error",
        }
    }

    /// Errors a caller can reasonably retry after a short pause.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Contention { .. } | Self::IdCollision(_))
    }
}

pub type Result<T> = std::result::Result<T, CoordError>;
