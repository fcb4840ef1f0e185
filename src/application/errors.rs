//! Application layer errors

use std::time::Duration;
use thiserror::Error;

/// General runtime errors
#[derive(Error, Debug)]
pub enum BotError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Namespace error: {0}")]
    Namespace(#[from] NamespaceError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Command error: {0}")]
    Command(#[from] CommandError),

    #[error("Module error: {0}")]
    Module(#[from] ModuleError),

    #[error("Setting error: {0}")]
    Setting(#[from] SettingError),

    #[error("Platform error: {0}")]
    Platform(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Command execution errors
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("Command not found: {0}")]
    NotFound(String),

    #[error("Invalid arguments: {0}")]
    InvalidArgs(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Timed out after {0:?}")]
    TimedOut(Duration),

    #[error("Handler panicked")]
    Panicked,

    #[error("Permission denied")]
    PermissionDenied,
}

impl From<BotError> for CommandError {
    fn from(e: BotError) -> Self {
        CommandError::ExecutionFailed(e.to_string())
    }
}

/// Storage errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Duplicate key: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::Serialization(e.to_string())
    }
}

impl From<rusqlite::Error> for StorageError {
    fn from(e: rusqlite::Error) -> Self {
        StorageError::Database(e.to_string())
    }
}

/// Namespace tree registration errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NamespaceError {
    #[error("empty namespace path")]
    EmptyPath,

    #[error("empty segment in '{0}'")]
    EmptySegment(String),

    #[error("cannot create namespace '{segment}' in '{path}': it is already an end node")]
    LeafInPath { path: String, segment: String },

    #[error("'{0}' already holds child nodes")]
    SubtreeAtTerminal(String),

    #[error("segment '{segment}' in '{path}' is reserved")]
    ReservedSegment { path: String, segment: String },

    #[error("'{path}' is already registered by '{owner}'")]
    Owned { path: String, owner: String },
}

/// Module lifecycle errors
#[derive(Error, Debug)]
pub enum ModuleError {
    #[error("Manifest error: {0}")]
    Manifest(String),

    #[error("Module '{0}' is not compiled into this build")]
    NotInCatalog(String),

    #[error("Module '{0}' is already loaded")]
    AlreadyLoaded(String),

    #[error("Module '{0}' is not loaded")]
    NotLoaded(String),

    #[error("Module '{0}' is disabled by its manifest")]
    Disabled(String),

    #[error("Registration failed for '{module}': {reason}")]
    Registration { module: String, reason: String },

    #[error("Init rejected for '{module}': {reason}")]
    InitRejected { module: String, reason: String },
}

/// Setting validation and conversion errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SettingError {
    #[error("Unknown setting: {0}")]
    Unknown(String),

    #[error("Expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },

    #[error("Value {value} outside of [{min}, {max}]")]
    OutOfRange { value: f64, min: f64, max: f64 },

    #[error("Value is longer than {0} characters")]
    TooLong(usize),

    #[error("'{0}' is not one of the allowed options")]
    InvalidOption(String),

    #[error("'{0}' is not a valid id")]
    InvalidId(String),

    #[error("Missing field: {0}")]
    MissingField(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("Parse error: {0}")]
    Parse(String),
}
