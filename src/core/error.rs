use rusqlite;
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TissueError {
    #[error("SQLite error: {0}")]
    RusqliteError(#[from] rusqlite::Error),
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("Config error: {0}")]
    ConfigError(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Invalid execution spec: {0}")]
    InvalidSpec(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Unknown issue: {0}")]
    UnknownIssue(String),
    #[error("Outcome required when closing {0}")]
    OutcomeRequired(String),
    #[error("Outcome {outcome:?} given for non-terminal status {status} on {id}")]
    OutcomeOnNonTerminal {
        id: String,
        status: String,
        outcome: String,
    },
    #[error("Issue {id} carries more than one team tag: {tags:?}")]
    AmbiguousTeamTag { id: String, tags: Vec<String> },
    #[error("No team tag on {0} or its ancestors and no default team")]
    UnresolvableTeam(String),
}

impl TissueError {
    /// Stable machine-readable code, used by the CLI error envelope.
    pub fn code(&self) -> &'static str {
        match self {
            TissueError::RusqliteError(_) => "storage_error",
            TissueError::IoError(_) => "io_error",
            TissueError::JsonError(_) => "json_error",
            TissueError::ConfigError(_) => "config_error",
            TissueError::ValidationError(_) => "validation_error",
            TissueError::InvalidSpec(_) => "invalid_spec",
            TissueError::NotFound(_) => "not_found",
            TissueError::UnknownIssue(_) => "unknown_issue",
            TissueError::OutcomeRequired(_) => "outcome_required",
            TissueError::OutcomeOnNonTerminal { .. } => "outcome_on_non_terminal",
            TissueError::AmbiguousTeamTag { .. } => "ambiguous_team_tag",
            TissueError::UnresolvableTeam(_) => "unresolvable_team",
        }
    }
}
