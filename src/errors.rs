use thiserror::Error;

use crate::category::Category;

/// Result type for engine operations
pub type ProbeResult<T> = Result<T, ProbeError>;

/// Failures the resolution engine can report.
///
/// None of these escape as panics; `resolve` and `heal_locator` surface a miss as
/// `NotFound`/`MissingReference`, everything else degrades locally and is only
/// logged.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// No candidate survived scanning and scoring (exit code 2)
    #[error("No element resolved for '{target}': {reason}")]
    NotFound { target: String, reason: String },

    /// A cached or healed handle no longer points at a live node (exit code 5)
    #[error("Stale element reference for '{target}'")]
    StaleReference { target: String },

    /// The visual comparator is not loaded
    #[error("Visual similarity model unavailable")]
    ModelUnavailable,

    /// Healing needs a golden reference that was never captured (exit code 2)
    #[error("No golden reference stored for '{name}'")]
    MissingReference { name: String },

    /// Every alternative strategy failed (exit code 6)
    #[error("All {tried} recovery strategies failed for {intent}")]
    RecoveryExhausted { intent: Category, tried: usize },

    /// Durable store could not be parsed
    #[error("Storage at {path} is corrupt: {message}")]
    StorageCorrupt { path: String, message: String },

    /// Configuration file could not be read or parsed
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Automation driver failure (exit code 4)
    #[error("Driver error: {0}")]
    Driver(#[from] anyhow::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ProbeError {
    /// Shorthand for a resolution miss
    pub fn not_found(target: impl Into<String>, reason: impl Into<String>) -> Self {
        ProbeError::NotFound {
            target: target.into(),
            reason: reason.into(),
        }
    }

    /// Whether the caller may treat this as a plain "no match" rather than a fault
    pub fn is_miss(&self) -> bool {
        matches!(
            self,
            ProbeError::NotFound { .. } | ProbeError::MissingReference { .. }
        )
    }

    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            ProbeError::NotFound { .. } | ProbeError::MissingReference { .. } => 2,
            ProbeError::Driver(_) => 4,
            ProbeError::StaleReference { .. } => 5,
            ProbeError::RecoveryExhausted { .. } => 6,
            _ => 1,
        }
    }
}

#[cfg(test)]
#[path = "errors_test.rs"]
mod errors_test;
