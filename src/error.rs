//! Unified error handling for the trail pipeline.
//!
//! Per-record defects (`InsufficientPoints`, `InvalidCoordinates`) cause the
//! record to be skipped; `Persistence` fails the record; `Config` is fatal at
//! startup. Remote place-search faults never surface here, they are mapped to
//! "no match" inside the resolver.

use std::fmt;

/// Unified error type for pipeline operations.
#[derive(Debug)]
pub enum PipelineError {
    /// Path has too few points for processing
    InsufficientPoints {
        trail_id: String,
        point_count: usize,
        minimum_required: usize,
    },
    /// Path or record has invalid coordinates
    InvalidCoordinates { trail_id: String, message: String },
    /// Storage error
    Persistence { message: String },
    /// JSON encode/decode error
    Serialization { message: String },
    /// HTTP/API error
    Http {
        message: String,
        status_code: Option<u16>,
    },
    /// Configuration error
    Config { message: String },
    /// File system error
    Io { message: String },
}

impl PipelineError {
    pub fn config(message: impl Into<String>) -> Self {
        PipelineError::Config {
            message: message.into(),
        }
    }

    /// Input defects skip the record instead of failing it.
    pub fn is_input_defect(&self) -> bool {
        matches!(
            self,
            PipelineError::InsufficientPoints { .. } | PipelineError::InvalidCoordinates { .. }
        )
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::InsufficientPoints {
                trail_id,
                point_count,
                minimum_required,
            } => {
                write!(
                    f,
                    "Trail '{}' has {} points, minimum {} required",
                    trail_id, point_count, minimum_required
                )
            }
            PipelineError::InvalidCoordinates { trail_id, message } => {
                write!(f, "Trail '{}' has invalid coordinates: {}", trail_id, message)
            }
            PipelineError::Persistence { message } => {
                write!(f, "Persistence error: {}", message)
            }
            PipelineError::Serialization { message } => {
                write!(f, "Serialization error: {}", message)
            }
            PipelineError::Http {
                message,
                status_code,
            } => {
                if let Some(code) = status_code {
                    write!(f, "HTTP error ({}): {}", code, message)
                } else {
                    write!(f, "HTTP error: {}", message)
                }
            }
            PipelineError::Config { message } => {
                write!(f, "Configuration error: {}", message)
            }
            PipelineError::Io { message } => {
                write!(f, "I/O error: {}", message)
            }
        }
    }
}

impl std::error::Error for PipelineError {}

impl From<rusqlite::Error> for PipelineError {
    fn from(e: rusqlite::Error) -> Self {
        PipelineError::Persistence {
            message: e.to_string(),
        }
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(e: serde_json::Error) -> Self {
        PipelineError::Serialization {
            message: e.to_string(),
        }
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(e: std::io::Error) -> Self {
        PipelineError::Io {
            message: e.to_string(),
        }
    }
}

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Extension trait for converting Option to PipelineError.
pub trait OptionExt<T> {
    /// Convert Option to Result with insufficient points error.
    fn ok_or_insufficient_points(self, trail_id: &str, point_count: usize, minimum: usize)
        -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_insufficient_points(
        self,
        trail_id: &str,
        point_count: usize,
        minimum: usize,
    ) -> Result<T> {
        self.ok_or_else(|| PipelineError::InsufficientPoints {
            trail_id: trail_id.to_string(),
            point_count,
            minimum_required: minimum,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PipelineError::InsufficientPoints {
            trail_id: "bukhan-01".to_string(),
            point_count: 1,
            minimum_required: 2,
        };
        assert!(err.to_string().contains("bukhan-01"));
        assert!(err.to_string().contains("1 points"));
        assert!(err.is_input_defect());

        let err = PipelineError::Http {
            message: "timeout".to_string(),
            status_code: Some(504),
        };
        assert_eq!(err.to_string(), "HTTP error (504): timeout");
        assert!(!err.is_input_defect());
    }

    #[test]
    fn test_option_ext() {
        let none: Option<i32> = None;
        let result = none.ok_or_insufficient_points("test", 0, 2);
        assert!(matches!(
            result,
            Err(PipelineError::InsufficientPoints { .. })
        ));

        assert_eq!(Some(3).ok_or_insufficient_points("test", 1, 2).unwrap(), 3);
    }

    #[test]
    fn test_from_sqlite_error() {
        let err: PipelineError = rusqlite::Error::QueryReturnedNoRows.into();
        assert!(matches!(err, PipelineError::Persistence { .. }));
    }
}
