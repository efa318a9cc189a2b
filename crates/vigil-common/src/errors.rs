use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for supervisor operations.
#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Process error: {0}")]
    Process(#[from] ProcessError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Shutdown error: {0}")]
    Shutdown(String),
}

/// Descriptor loading and validation failures.
///
/// Every variant is raised before any process is launched.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {format} configuration: {message}")]
    Parse { format: String, message: String },

    #[error("Unsupported configuration format: {path} (expected .yaml, .yml or .json)")]
    UnsupportedFormat { path: PathBuf },

    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Duplicate process name: {name}")]
    DuplicateName { name: String },

    #[error("At least one app must be configured")]
    NoApps,
}

/// Plausibility failures for the executable and working directory.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LaunchError {
    #[error("Executable not found: {path}")]
    ExecutableNotFound { path: String },

    #[error("Executable is not runnable (permission denied or not a file): {path}")]
    NotExecutable { path: PathBuf },

    #[error("Working directory not found: {path}")]
    WorkingDirectoryNotFound { path: PathBuf },

    #[error("Script not found: {path}")]
    ScriptNotFound { path: PathBuf },
}

/// Process-specific error types
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Process not found: {id}")]
    NotFound { id: String },

    #[error("Process already exists: {id}")]
    AlreadyExists { id: String },

    #[error("Process launch rejected: {id} - {source}")]
    Launch {
        id: String,
        #[source]
        source: LaunchError,
    },

    #[error("Process spawn failed: {id} - {reason}")]
    SpawnFailed { id: String, reason: String },

    #[error("Process stop failed: {id} - {reason}")]
    StopFailed { id: String, reason: String },

    #[error("Process state error: {id} - cannot move from {from} to {to}")]
    InvalidState { id: String, from: String, to: String },

    #[error("Process file error: {id} - {reason}")]
    ProcessFile { id: String, reason: String },

    #[error("Process monitoring error: {id} - {reason}")]
    Monitoring { id: String, reason: String },

    #[error("Process watch error: {id} - {reason}")]
    Watch { id: String, reason: String },

    #[error("Process logging error: {id} - {reason}")]
    Logging { id: String, reason: String },
}

impl ConfigError {
    pub fn parse(format: impl Into<String>, message: impl ToString) -> Self {
        Self::Parse {
            format: format.into(),
            message: message.to_string(),
        }
    }

    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::MissingField {
            field: field.into(),
        }
    }

    pub fn invalid_value(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::parse("YAML", err)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        Self::parse("JSON", err)
    }
}

impl ProcessError {
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }

    pub fn already_exists(id: impl Into<String>) -> Self {
        Self::AlreadyExists { id: id.into() }
    }

    pub fn launch(id: impl Into<String>, source: LaunchError) -> Self {
        Self::Launch {
            id: id.into(),
            source,
        }
    }

    pub fn spawn_failed(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SpawnFailed {
            id: id.into(),
            reason: reason.into(),
        }
    }

    pub fn stop_failed(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::StopFailed {
            id: id.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_state(
        id: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
    ) -> Self {
        Self::InvalidState {
            id: id.into(),
            from: from.into(),
            to: to.into(),
        }
    }

    pub fn process_file(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ProcessFile {
            id: id.into(),
            reason: reason.into(),
        }
    }
}

// Result type aliases for convenience
pub type Result<T> = std::result::Result<T, SupervisorError>;
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
pub type ProcessResult<T> = std::result::Result<T, ProcessError>;
