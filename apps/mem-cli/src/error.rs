use std::path::PathBuf;

use thiserror::Error;

/// User-facing failures with stable phrasing; everything else surfaces as a
/// contextual error chain.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("{message}")]
    InvalidInput { message: String },

    #[error("workspace at {path} is not initialized")]
    WorkspaceNotInitialized { path: PathBuf },

    #[error("access denied: workspace token does not match")]
    AccessDenied,
}

impl CliError {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Extra line shown after the error message, when one helps.
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::WorkspaceNotInitialized { .. } => Some("run `mem-cli init` to create it"),
            _ => None,
        }
    }
}
