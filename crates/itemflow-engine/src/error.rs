//! Engine error types.

use thiserror::Error;

/// Errors that can occur while running a workflow.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Connection string could not be turned into a state-store adapter.
    #[error("Adapter resolution failed: {0}")]
    AdapterResolution(String),

    /// Adapter-level storage failure.
    #[error("Store error: {0}")]
    Store(String),

    /// A source or filter stage received something other than an array.
    #[error("Expected an array at `{path}`, found {found}")]
    Shape { path: String, found: String },

    /// A template referenced an identifier that is not defined.
    #[error("Reference error: {0}")]
    Reference(String),

    /// Template rendering error.
    #[error("Template error: {0}")]
    Template(String),

    /// A non-muted command segment exited unsuccessfully.
    #[error("Command failed with exit code {code}: {stderr}")]
    Command { code: i32, stderr: String },

    /// A command chain could not be parsed.
    #[error("Command parse error: {0}")]
    CommandParse(String),

    /// Script evaluation error.
    #[error("Script error: {0}")]
    Script(String),

    /// Malformed identifier or identifier field.
    #[error("Identifier error: {0}")]
    Identifier(String),

    /// Step kind not found in registry.
    #[error("Step not found: {0}")]
    StepNotFound(String),

    /// Source kind not found in registry.
    #[error("Source not found: {0}")]
    SourceNotFound(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(String),
}

/// Result type alias using EngineError.
pub type EngineResult<T> = Result<T, EngineError>;

impl EngineError {
    /// Build a shape error describing the JSON type that was found instead.
    pub fn shape(path: impl Into<String>, found: &serde_json::Value) -> Self {
        let found = match found {
            serde_json::Value::Null => "null",
            serde_json::Value::Bool(_) => "a boolean",
            serde_json::Value::Number(_) => "a number",
            serde_json::Value::String(_) => "a string",
            serde_json::Value::Array(_) => "an array",
            serde_json::Value::Object(_) => "an object",
        };
        EngineError::Shape {
            path: path.into(),
            found: found.to_string(),
        }
    }
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        EngineError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::Json(e.to_string())
    }
}

impl From<serde_yaml::Error> for EngineError {
    fn from(e: serde_yaml::Error) -> Self {
        EngineError::Configuration(e.to_string())
    }
}

impl From<minijinja::Error> for EngineError {
    fn from(e: minijinja::Error) -> Self {
        EngineError::Template(e.to_string())
    }
}

impl From<sqlx::Error> for EngineError {
    fn from(e: sqlx::Error) -> Self {
        EngineError::Store(e.to_string())
    }
}

impl From<url::ParseError> for EngineError {
    fn from(e: url::ParseError) -> Self {
        EngineError::AdapterResolution(e.to_string())
    }
}

impl From<envy::Error> for EngineError {
    fn from(e: envy::Error) -> Self {
        EngineError::Configuration(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = EngineError::StepNotFound("shell".to_string());
        assert_eq!(err.to_string(), "Step not found: shell");

        let err = EngineError::Command {
            code: 2,
            stderr: "boom".to_string(),
        };
        assert_eq!(err.to_string(), "Command failed with exit code 2: boom");
    }

    #[test]
    fn test_shape_error() {
        let err = EngineError::shape("result", &serde_json::json!({"a": 1}));
        assert_eq!(err.to_string(), "Expected an array at `result`, found an object");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: EngineError = io_err.into();
        assert!(matches!(err, EngineError::Io(_)));
    }
}
