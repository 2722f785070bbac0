//! Render errors.

use thiserror::Error;

/// Failure producing a resource's content
///
/// Errors are cached alongside successful content, so they are `Clone`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    /// Template source failed to parse
    #[error("template {name} is invalid: {message}")]
    Template {
        /// Template name
        name: String,
        /// Parser message
        message: String,
    },

    /// Evaluation failed, including failures of template functions
    #[error("rendering {name} failed: {message}")]
    Render {
        /// Template name
        name: String,
        /// Cause
        message: String,
    },

    /// Content could not be generated at all
    #[error("generating {name} failed: {reason}")]
    Generate {
        /// Resource name
        name: String,
        /// Cause
        reason: String,
    },

    /// Content is not valid UTF-8
    #[error("resource {name} is not valid UTF-8")]
    Encoding {
        /// Resource name
        name: String,
    },
}

impl RenderError {
    /// Name of the template or resource that failed
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Template { name, .. }
            | Self::Render { name, .. }
            | Self::Generate { name, .. }
            | Self::Encoding { name } => name,
        }
    }
}

/// Failure inside a template function
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{function}: {message}")]
pub struct FunctionError {
    /// Function name
    pub function: String,
    /// Cause
    pub message: String,
}

impl FunctionError {
    /// Create a function error
    #[must_use]
    pub fn new(function: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            function: function.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_error_name() {
        let err = RenderError::Encoding {
            name: "nodeup.sh".to_string(),
        };
        assert_eq!(err.name(), "nodeup.sh");
        assert_eq!(err.to_string(), "resource nodeup.sh is not valid UTF-8");
    }

    #[test]
    fn test_function_error_display() {
        let err = FunctionError::new("KubeEnv", "configBase is not set");
        assert_eq!(err.to_string(), "KubeEnv: configBase is not set");
    }
}
