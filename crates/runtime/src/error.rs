// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use thiserror::Error;

/// Unified error taxonomy for the board runtime (spec.md §7).
///
/// Every variant maps to an `error_tag` used in event payloads and to a
/// [`Kind`] used for dispatch by callers that need to distinguish terminal
/// from non-terminal outcomes (e.g. `ApprovalRequired` is not a failure).
#[derive(Debug, Error, Clone)]
pub enum RuntimeError {
    #[error("board or card not found: {0}")]
    NotFound(String),

    #[error("card has no code: {0}")]
    NoCode(String),

    #[error("Recursive action call detected")]
    Recursion,

    #[error("card failed to compile: {0}")]
    CompileError(String),

    #[error("card body error: {0}")]
    BodyError(String),

    #[error("approval required")]
    ApprovalRequired { approval_id: String },

    #[error("execution cancelled")]
    Cancelled,

    #[error("ephemeral context expired or unknown: {0}")]
    ContextExpired(String),

    #[error("board store error: {0}")]
    StoreError(String),

    #[error("autopilot supervisor error: {0}")]
    SupervisorError(String),
}

impl RuntimeError {
    /// The `_err` tag carried in event payloads, per spec.md §4.5/§6.
    pub fn error_tag(&self) -> &'static str {
        match self {
            Self::CompileError(_) | Self::BodyError(_) | Self::Recursion => "e_code",
            _ => "e_general",
        }
    }

    /// The event path suffix this error publishes under (spec.md §6).
    pub fn event_path_suffix(&self) -> &'static str {
        match self {
            Self::CompileError(_) | Self::BodyError(_) | Self::Recursion => "code/error",
            Self::Cancelled => "cancelled",
            _ => "error",
        }
    }
}

pub type Result<T> = std::result::Result<T, RuntimeError>;
