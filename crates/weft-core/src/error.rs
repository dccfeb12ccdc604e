use thiserror::Error;

/// A convenience `Result` alias using [`WeftError`].
pub type WeftResult<T> = Result<T, WeftError>;

/// Top-level error type for the Weft engine.
///
/// Unknown identifiers are not errors: lookups and updates report them as
/// `Ok(None)` or `Ok(false)`.
#[derive(Error, Debug)]
pub enum WeftError {
    /// A failure reported by the durable store backend.
    #[error("Store error: {0}")]
    Store(String),

    /// A mutating call that would move an entity backwards or out of a
    /// terminal state.
    #[error("Invalid {entity} transition: {from} -> {to}")]
    InvalidTransition {
        /// Entity kind, e.g. `"message"`.
        entity: &'static str,
        /// Current status.
        from: String,
        /// Requested status.
        to: String,
    },

    /// A dependency edge that would close a cycle in the task graph.
    #[error("Dependency cycle: task {task_id} depending on {depends_on} closes a cycle")]
    DependencyCycle {
        /// The dependent task.
        task_id: String,
        /// The task it would depend on.
        depends_on: String,
    },

    /// A dependency edge that references a missing task or itself.
    #[error("Invalid dependency: {0}")]
    InvalidDependency(String),

    /// A checkpoint payload that could not be encoded or decoded.
    #[error("Codec error: {0}")]
    Codec(String),

    /// A stored value that does not parse into its enum.
    #[error("Parse error: {0}")]
    Parse(String),

    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WeftError {
    /// Build an [`WeftError::InvalidTransition`] from two displayable states.
    pub fn transition(
        entity: &'static str,
        from: impl std::fmt::Display,
        to: impl std::fmt::Display,
    ) -> Self {
        WeftError::InvalidTransition {
            entity,
            from: from.to_string(),
            to: to.to_string(),
        }
    }
}
