use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MeillionenError {
    // Validator registry
    #[error("No validator registered for type name '{type_name}'")]
    UnknownTypeName { type_name: String },

    #[error("A validator for type name '{type_name}' is already registered")]
    DuplicateTypeName { type_name: String },

    #[error("Schema '{schema}' mismatch: expected {expected}, got {actual}")]
    SchemaMismatch {
        schema: String,
        expected: String,
        actual: String,
    },

    #[error("Invalid payload for type name '{type_name}': {message}")]
    InvalidPayload { type_name: String, message: String },

    #[error("Unknown resource handle {id}")]
    UnknownHandle { id: u64 },

    // Interface definition
    #[error("Class '{class}' is already registered")]
    DuplicateClass { class: String },

    #[error("Method '{method}' is declared twice in class '{class}'")]
    DuplicateMethod { class: String, method: String },

    #[error("Schema '{name}' is declared twice in method '{method}'")]
    DuplicateSchema { method: String, name: String },

    // Routing
    #[error("Unknown class '{class}'")]
    UnknownClass { class: String },

    #[error("Unknown method '{method}' in class '{class}'")]
    UnknownMethod { class: String, method: String },

    #[error("Missing source '{name}'")]
    MissingSource { name: String },

    #[error("Missing sink '{name}'")]
    MissingSink { name: String },

    #[error("Invalid source '{name}': {source}")]
    InvalidSource {
        name: String,
        #[source]
        source: Box<MeillionenError>,
    },

    #[error("Invalid sink '{name}': {source}")]
    InvalidSink {
        name: String,
        #[source]
        source: Box<MeillionenError>,
    },

    // Invocation
    #[error("Model execution failed: {cause}")]
    ExecutionError { cause: String },

    #[error("Model execution timed out after {timeout:?}")]
    ExecutionTimeout { timeout: Duration },

    // Lifecycle
    #[error("Model is already initialized")]
    AlreadyInitialized,

    #[error("Model is not initialized")]
    NotInitialized,

    #[error("Model is already finalized")]
    AlreadyFinalized,

    #[error("Unknown variable '{name}'")]
    UnknownVariable { name: String },

    #[error("Invalid value for variable '{name}': {source}")]
    InvalidVariable {
        name: String,
        #[source]
        source: Box<MeillionenError>,
    },

    #[error("Required input '{name}' has not been set")]
    MissingRequiredInput { name: String },

    #[error("Value '{name}' is not available until an update produces it")]
    ValueNotYetAvailable { name: String },

    // Wire envelope
    #[error("Malformed envelope: {message}")]
    WireFormat { message: String },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("CSV processing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    // Configuration
    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Invalid value '{value}' for '{field}': {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Missing required configuration field '{field}'")]
    MissingConfigError { field: String },
}

/// 錯誤類別，供 CLI 決定退出碼
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Validation,
    Routing,
    Lifecycle,
    Execution,
    System,
}

impl MeillionenError {
    pub fn category(&self) -> ErrorCategory {
        use MeillionenError::*;
        match self {
            UnknownTypeName { .. }
            | SchemaMismatch { .. }
            | InvalidPayload { .. }
            | UnknownHandle { .. }
            | InvalidSource { .. }
            | InvalidSink { .. }
            | InvalidVariable { .. }
            | WireFormat { .. } => ErrorCategory::Validation,
            UnknownClass { .. }
            | UnknownMethod { .. }
            | MissingSource { .. }
            | MissingSink { .. } => ErrorCategory::Routing,
            AlreadyInitialized
            | NotInitialized
            | AlreadyFinalized
            | UnknownVariable { .. }
            | MissingRequiredInput { .. }
            | ValueNotYetAvailable { .. } => ErrorCategory::Lifecycle,
            ExecutionError { .. } | ExecutionTimeout { .. } => ErrorCategory::Execution,
            DuplicateTypeName { .. }
            | DuplicateClass { .. }
            | DuplicateMethod { .. }
            | DuplicateSchema { .. }
            | ConfigError { .. }
            | InvalidConfigValueError { .. }
            | MissingConfigError { .. } => ErrorCategory::Configuration,
            IoError(_) | CsvError(_) | SerializationError(_) => ErrorCategory::System,
        }
    }

    /// Strips channel annotations and returns the innermost error.
    pub fn root(&self) -> &MeillionenError {
        match self {
            MeillionenError::InvalidSource { source, .. }
            | MeillionenError::InvalidSink { source, .. }
            | MeillionenError::InvalidVariable { source, .. } => source.root(),
            other => other,
        }
    }

    pub(crate) fn mismatch(
        schema: &str,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        MeillionenError::SchemaMismatch {
            schema: schema.to_string(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    pub(crate) fn execution(cause: impl Into<String>) -> Self {
        MeillionenError::ExecutionError {
            cause: cause.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, MeillionenError>;
