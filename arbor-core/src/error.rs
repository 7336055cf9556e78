//! Error types for arbor operations

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Structured error payload handed to the protocol layer.
///
/// Every failure reaching a caller carries a stable `code`, a human
/// readable `message`, the offending identifier (`subject`) and a hint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    pub hint: String,
}

impl ErrorEnvelope {
    pub fn new(
        code: impl Into<String>,
        message: impl Into<String>,
        subject: Option<String>,
        hint: impl Into<String>,
    ) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            subject,
            hint: hint.into(),
        }
    }
}

impl From<&ArborError> for ErrorEnvelope {
    fn from(err: &ArborError) -> Self {
        Self::new(err.code(), err.to_string(), err.subject(), err.hint())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ArborError {
    #[error("Invalid path {}: {reason}", .path.display())]
    InvalidPath { path: PathBuf, reason: String },

    #[error("Access denied for {}: {reason}", .path.display())]
    SecurityViolation { path: PathBuf, reason: String },

    #[error("Project not found: {0}")]
    ProjectNotFound(String),

    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("Could not detect language for {}", .0.display())]
    LanguageNotDetected(PathBuf),

    #[error("Project name already registered: {0}")]
    DuplicateName(String),

    #[error("Language '{language}' is unavailable: {reason}")]
    LanguageUnavailable { language: String, reason: String },

    #[error("Failed to parse {}: {message}", .path.display())]
    ParseFailure { path: PathBuf, message: String },

    #[error("Query error at offset {offset} (row {row}, column {column}): {message}")]
    QueryError {
        offset: usize,
        row: usize,
        column: usize,
        message: String,
    },

    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),

    #[error("No query template '{name}' for {language}")]
    TemplateNotFound { language: String, name: String },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Config parse error: {0}")]
    ConfigParse(String),

    #[error("Unknown config setting: {0}")]
    UnknownSetting(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ArborError {
    /// Stable machine-readable error kind
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidPath { .. } => "invalid_path",
            Self::SecurityViolation { .. } => "security_violation",
            Self::ProjectNotFound(_)
            | Self::FileNotFound(_)
            | Self::LanguageNotDetected(_)
            | Self::TemplateNotFound { .. } => "not_found",
            Self::DuplicateName(_) => "duplicate_name",
            Self::LanguageUnavailable { .. } => "language_unavailable",
            Self::ParseFailure { .. } => "parse_failure",
            Self::QueryError { .. } => "query_error",
            Self::InvalidPattern(_) => "invalid_pattern",
            Self::InvalidArgument(_) => "invalid_argument",
            Self::ConfigParse(_) | Self::UnknownSetting(_) => "config_error",
            Self::Io(_) => "io_error",
            Self::Serialization(_) => "serialization_error",
        }
    }

    /// The identifier the error is about (path, project, language...)
    pub fn subject(&self) -> Option<String> {
        match self {
            Self::InvalidPath { path, .. }
            | Self::SecurityViolation { path, .. }
            | Self::ParseFailure { path, .. } => Some(path.display().to_string()),
            Self::FileNotFound(path) | Self::LanguageNotDetected(path) => {
                Some(path.display().to_string())
            }
            Self::ProjectNotFound(name) | Self::DuplicateName(name) => Some(name.clone()),
            Self::LanguageUnavailable { language, .. } => Some(language.clone()),
            Self::QueryError { offset, .. } => Some(offset.to_string()),
            Self::InvalidPattern(pattern) => Some(pattern.clone()),
            Self::TemplateNotFound { name, .. } => Some(name.clone()),
            Self::UnknownSetting(path) => Some(path.clone()),
            Self::InvalidArgument(_)
            | Self::ConfigParse(_)
            | Self::Io(_)
            | Self::Serialization(_) => None,
        }
    }

    fn hint(&self) -> &'static str {
        match self {
            Self::InvalidPath { .. } => "Pass an existing directory",
            Self::SecurityViolation { .. } => {
                "Paths must stay inside the project root and pass the security filters"
            }
            Self::ProjectNotFound(_) => "Call list_projects to see registered projects",
            Self::FileNotFound(_) => "Call list_files to see available files",
            Self::LanguageNotDetected(_) => "Pass the language explicitly",
            Self::DuplicateName(_) => "Choose another name or remove the existing project",
            Self::LanguageUnavailable { .. } => "Call list_languages to see supported languages",
            Self::ParseFailure { .. } => "Check that the file matches the language grammar",
            Self::QueryError { .. } => "Fix the query syntax near the reported offset",
            Self::InvalidPattern(_) => "Fix the glob or regex pattern",
            Self::TemplateNotFound { .. } => "Call list_query_templates to see available templates",
            Self::InvalidArgument(_) => "Check the request arguments",
            Self::ConfigParse(_) | Self::UnknownSetting(_) => "Check the configuration file",
            Self::Io(_) | Self::Serialization(_) => "Check server logs for details",
        }
    }

    pub fn envelope(&self) -> ErrorEnvelope {
        ErrorEnvelope::from(self)
    }
}
