//! Typed error hierarchy for linboard.
//!
//! `BoardError` is the single result error of every gateway operation. The
//! HTTP layer maps each variant onto a status code; the store layer produces
//! `anyhow` errors that surface here as `BoardError::Database`.

use thiserror::Error;

/// Fixed message shown for every failed ownership/membership check.
pub const PERMISSION_DENIED_MESSAGE: &str = "You do not have the permission to do this action!";

/// Errors from the board gateway and the layers beneath it.
#[derive(Debug, Error)]
pub enum BoardError {
    #[error("Not signed in")]
    Unauthenticated,

    #[error("Workspace not found")]
    WorkspaceNotFound { id: i64 },

    #[error("Issue not found")]
    IssueNotFound { id: i64 },

    #[error("Project not found")]
    ProjectNotFound { id: i64 },

    #[error("Milestone not found")]
    MilestoneNotFound { id: i64 },

    #[error("Comment not found")]
    CommentNotFound { id: i64 },

    #[error("Invite code not found")]
    InviteNotFound,

    #[error("{}", PERMISSION_DENIED_MESSAGE)]
    PermissionDenied,

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Assistant error: {0}")]
    Assistant(String),

    #[error("Realtime channel error: {0}")]
    Realtime(String),

    #[error("Database error: {0}")]
    Database(#[source] anyhow::Error),
}

impl BoardError {
    /// True for every "referenced entity does not exist" variant.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::WorkspaceNotFound { .. }
                | Self::IssueNotFound { .. }
                | Self::ProjectNotFound { .. }
                | Self::MilestoneNotFound { .. }
                | Self::CommentNotFound { .. }
                | Self::InviteNotFound
        )
    }
}

impl From<anyhow::Error> for BoardError {
    fn from(err: anyhow::Error) -> Self {
        Self::Database(err)
    }
}

impl From<crate::board::events::EventBusError> for BoardError {
    fn from(err: crate::board::events::EventBusError) -> Self {
        Self::Realtime(err.to_string())
    }
}
