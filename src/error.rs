use thiserror::Error;

/// Structured error context for better error handling and debugging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorContext {
    /// Field path or configuration key that caused the error (e.g., "cache.ttl_seconds")
    pub field_path: Option<String>,
    /// Additional context about the error (e.g., expected range, actual value)
    pub details: Option<String>,
    /// Source of the error (e.g., "memory_cache", "pipeline_config")
    pub source: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self {
            field_path: None,
            details: None,
            source: None,
        }
    }

    pub fn with_field_path(mut self, path: impl Into<String>) -> Self {
        self.field_path = Some(path.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

impl Default for ErrorContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Unified error type for the optimization layer.
///
/// Only `Handler` errors are meant to reach callers of a composed handler;
/// everything raised by the cache or metrics stages is absorbed there.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {message}{}", format_context(.context))]
    Configuration {
        message: String,
        context: ErrorContext,
    },

    #[error("Validation error: {message}{}", format_context(.context))]
    Validation {
        message: String,
        context: ErrorContext,
    },

    #[error("Runtime error: {message}{}", format_context(.context))]
    Runtime {
        message: String,
        context: ErrorContext,
    },

    #[error("Handler error: HTTP {}: {message}", .status.unwrap_or(500))]
    Handler {
        status: Option<u16>,
        message: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),
}

// Helper function to format error context for display
fn format_context(ctx: &ErrorContext) -> String {
    let mut parts = Vec::new();
    if let Some(ref field) = ctx.field_path {
        parts.push(format!("field: {}", field));
    }
    if let Some(ref details) = ctx.details {
        parts.push(format!("details: {}", details));
    }
    if let Some(ref source) = ctx.source {
        parts.push(format!("source: {}", source));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" ({})", parts.join(", "))
    }
}

impl Error {
    /// Create a new runtime error with structured context
    pub fn runtime_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Runtime {
            message: msg.into(),
            context,
        }
    }

    /// Create a new validation error with structured context
    pub fn validation_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Validation {
            message: msg.into(),
            context,
        }
    }

    /// Create a new configuration error with structured context
    pub fn configuration_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Configuration {
            message: msg.into(),
            context,
        }
    }

    /// A failure reported by business logic, with the status it wants recorded.
    pub fn handler(status: u16, msg: impl Into<String>) -> Self {
        Error::Handler {
            status: Some(status),
            message: msg.into(),
        }
    }

    /// A handler failure without a status of its own (recorded as 500).
    pub fn handler_failed(msg: impl Into<String>) -> Self {
        Error::Handler {
            status: None,
            message: msg.into(),
        }
    }

    /// Status code this error is accounted as by the metrics stage.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::Handler {
                status: Some(status),
                ..
            } => *status,
            _ => 500,
        }
    }

    /// Extract error context if available
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::Configuration { context, .. }
            | Error::Validation { context, .. }
            | Error::Runtime { context, .. } => Some(context),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_formatting() {
        let err = Error::configuration_with_context(
            "ttl must be positive",
            ErrorContext::new()
                .with_field_path("cache.ttl_seconds")
                .with_source("pipeline_config"),
        );
        assert_eq!(
            err.to_string(),
            "Configuration error: ttl must be positive (field: cache.ttl_seconds, source: pipeline_config)"
        );
        assert_eq!(
            err.context().and_then(|c| c.field_path.as_deref()),
            Some("cache.ttl_seconds")
        );
    }

    #[test]
    fn test_status_code_mapping() {
        assert_eq!(Error::handler(404, "missing").status_code(), 404);
        assert_eq!(Error::handler_failed("boom").status_code(), 500);
        assert_eq!(
            Error::runtime_with_context("poisoned", ErrorContext::new()).status_code(),
            500
        );
        assert_eq!(Error::handler_failed("boom").to_string(), "Handler error: HTTP 500: boom");
    }
}
