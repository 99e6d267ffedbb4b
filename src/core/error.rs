//! Engine-level error taxonomy.

use std::fmt;

use crate::core::config::ConfigError;
use crate::core::history::HistoryError;
use crate::core::provider::ClassifiedFailure;

#[derive(Debug)]
pub enum EngineError {
    /// The attempt cascade ended without an accepted response; carries the
    /// last classified failure (also used for immediately fatal failures).
    Completion(ClassifiedFailure),
    /// The model kept requesting tools past the round-trip ceiling.
    ToolLoopDidNotConverge,
    Config(ConfigError),
    History(HistoryError),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Completion(failure) => write!(f, "{failure}"),
            EngineError::ToolLoopDidNotConverge => {
                write!(f, "tool-calling did not converge within the iteration limit")
            }
            EngineError::Config(err) => write!(f, "{err}"),
            EngineError::History(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::Completion(failure) => Some(failure),
            EngineError::ToolLoopDidNotConverge => None,
            EngineError::Config(err) => Some(err),
            EngineError::History(err) => Some(err),
        }
    }
}

impl From<ClassifiedFailure> for EngineError {
    fn from(failure: ClassifiedFailure) -> Self {
        EngineError::Completion(failure)
    }
}

impl From<ConfigError> for EngineError {
    fn from(err: ConfigError) -> Self {
        EngineError::Config(err)
    }
}

impl From<HistoryError> for EngineError {
    fn from(err: HistoryError) -> Self {
        EngineError::History(err)
    }
}
