//! Error types surfaced by running effects.

use thiserror::Error;

/// Failure produced by a running effect.
///
/// Failures that the reducer's domain does not convert into an action (see
/// [`Effect::catch`](crate::effect::Effect::catch) and
/// [`Effect::result`](crate::effect::Effect::result)) are treated by the
/// runtime as unhandled and reported loudly.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EffectError {
    /// The effect's work failed with the given message
    #[error("Effect failed: {0}")]
    Failed(String),

    /// An async effect was started outside of a tokio runtime
    #[error("No tokio runtime available to drive async effect")]
    NoRuntime,

    /// The task driving an async effect panicked
    #[error("Effect task panicked: {0}")]
    Panicked(String),
}

impl EffectError {
    /// Build a [`EffectError::Failed`] from anything displayable
    #[must_use]
    pub fn failed(error: impl std::fmt::Display) -> Self {
        Self::Failed(error.to_string())
    }
}
