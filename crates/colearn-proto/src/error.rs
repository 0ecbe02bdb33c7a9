//! Error types shared across CoLearn crates.

/// Errors raised at the boundary between the learning core and its external
/// collaborators (hardware drivers and the event transport).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A joint, grasp, or reach command could not be completed.
    #[error("hardware command '{command}' failed: {reason}")]
    Hardware { command: String, reason: String },

    /// The event transport could not be reached.
    #[error("event bus unavailable: {0}")]
    BusUnavailable(String),
}

impl Error {
    /// Convenience constructor for hardware failures.
    pub fn hardware(command: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Hardware {
            command: command.into(),
            reason: reason.into(),
        }
    }
}

/// Result alias using the shared [`Error`] type.
pub type Result<T> = std::result::Result<T, Error>;
